use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{CloseFrame, Message},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use parley_crypto::{MessageCipher, keys};
use parley_db::Database;
use parley_gateway::{CLOSE_POLICY_VIOLATION, GatewayState, auth, notify, session};
use parley_types::models::UserProfile;

#[derive(Clone)]
struct ServerState {
    gateway: GatewayState,
    jwt_secret: String,
    notify_poll: Duration,
}

/// Both WebSocket endpoints carry the bearer token as a query parameter.
#[derive(Debug, Deserialize)]
struct WsAuthParams {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PARLEY_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let notify_poll_secs: u64 = std::env::var("PARLEY_NOTIFY_POLL_SECS")
        .unwrap_or_else(|_| "2".into())
        .parse()?;

    let cipher_key = match std::env::var("PARLEY_CIPHER_KEY") {
        Ok(encoded) => keys::key_from_base64(&encoded)?,
        Err(_) => {
            warn!(
                "PARLEY_CIPHER_KEY not set; using an ephemeral key — bodies stored under it \
                 will not decrypt after a restart"
            );
            keys::generate_key()
        }
    };

    // Init database and shared state
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);
    let cipher = Arc::new(MessageCipher::new(cipher_key));
    let gateway = GatewayState::new(db, cipher);

    let state = ServerState {
        gateway,
        jwt_secret,
        notify_poll: Duration::from_secs(notify_poll_secs),
    };

    // Routes
    let app = Router::new()
        .route("/ws/private/{peer_id}", get(conversation_upgrade))
        .route("/ws/notification", get(notification_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pairwise messaging channel. An invalid token refuses the upgrade
/// outright (401); an unknown peer is a 404 before any socket exists.
async fn conversation_upgrade(
    State(state): State<ServerState>,
    Path(peer_id): Path<i64>,
    Query(params): Query<WsAuthParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match auth::verify_token(&params.token, &state.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            warn!("conversation upgrade rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let db = state.gateway.db.clone();
    let user_id = claims.sub;
    let lookups = tokio::task::spawn_blocking(move || {
        Ok::<_, anyhow::Error>((db.find_user(user_id)?, db.find_user(peer_id)?))
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|inner| inner);

    let (user_row, peer_row) = match lookups {
        Ok(rows) => rows,
        Err(e) => {
            error!("user lookup failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // A verified token for a user the store has never seen is still an
    // identity failure.
    let user: UserProfile = match user_row {
        Some(row) => row.into(),
        None => return StatusCode::UNAUTHORIZED.into_response(),
    };
    if peer_row.is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    ws.on_upgrade(move |socket| session::run_conversation(socket, state.gateway, user, peer_id))
}

/// Per-user notification channel. This endpoint accepts the socket first
/// and closes with a policy-violation code on a bad token — the close
/// frame is the only way to tell the client why, since the upgrade has
/// already happened by the time older clients send anything.
async fn notification_upgrade(
    State(state): State<ServerState>,
    Query(params): Query<WsAuthParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let claims = match auth::verify_token(&params.token, &state.jwt_secret) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("notification socket rejected: {}", e);
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_POLICY_VIOLATION,
                        reason: "invalid token".into(),
                    })))
                    .await;
                return;
            }
        };

        notify::run_notification(socket, state.gateway, claims.sub, state.notify_poll).await;
    })
}
