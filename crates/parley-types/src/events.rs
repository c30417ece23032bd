use serde::{Deserialize, Serialize};

/// Frames sent FROM client TO server over a conversation socket.
///
/// The wire shape is one top-level key per frame (`{"send": {…}}`,
/// `{"vote": {…}}`, …), which is exactly serde's externally-tagged enum
/// encoding. An unknown top-level key fails to parse and is reported back
/// to the requester as a validation error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientFrame {
    Send(SendPayload),
    Vote(VotePayload),
    ChangeMessage(ChangeMessagePayload),
    DeleteMessage(DeleteMessagePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPayload {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "fileUrl", default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub original_message_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePayload {
    pub message_id: i64,
    pub dir: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeMessagePayload {
    pub id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessagePayload {
    pub id: i64,
}

/// Liveness ping emitted by the notification channel: sender and message id
/// only, never bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "new_message")]
pub struct NotifyEvent {
    pub sender_id: i64,
    pub message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_frame() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"send": {"message": "hello", "fileUrl": null}}"#).unwrap();
        match frame {
            ClientFrame::Send(p) => {
                assert_eq!(p.message.as_deref(), Some("hello"));
                assert!(p.file_url.is_none());
                assert!(p.original_message_id.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn parses_vote_and_change_and_delete() {
        let vote: ClientFrame =
            serde_json::from_str(r#"{"vote": {"message_id": 3, "dir": 1}}"#).unwrap();
        assert!(matches!(vote, ClientFrame::Vote(p) if p.message_id == 3 && p.dir == 1));

        let change: ClientFrame =
            serde_json::from_str(r#"{"change_message": {"id": 9, "message": "fixed"}}"#).unwrap();
        assert!(matches!(change, ClientFrame::ChangeMessage(p) if p.id == 9));

        let delete: ClientFrame =
            serde_json::from_str(r#"{"delete_message": {"id": 4}}"#).unwrap();
        assert!(matches!(delete, ClientFrame::DeleteMessage(p) if p.id == 4));
    }

    #[test]
    fn rejects_unknown_discriminant() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"shout": {"message": "HI"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_malformed_payload() {
        // message_id missing
        let result = serde_json::from_str::<ClientFrame>(r#"{"vote": {"dir": 1}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn notify_event_wire_shape() {
        let event = NotifyEvent {
            sender_id: 7,
            message_id: 21,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "new_message");
        assert_eq!(json["sender_id"], 7);
        assert_eq!(json["message_id"], 21);
    }
}
