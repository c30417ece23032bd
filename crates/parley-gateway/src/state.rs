use std::sync::Arc;

use parley_crypto::MessageCipher;
use parley_db::Database;

use crate::delivery::DeliveryEngine;
use crate::registry::{ConnectionRegistry, NotifyRegistry};

/// Everything a session task needs, cloned into each connection handler.
/// The two registries are the only cross-session shared mutable state.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub cipher: Arc<MessageCipher>,
    pub registry: ConnectionRegistry,
    pub notify: NotifyRegistry,
    pub engine: DeliveryEngine,
}

impl GatewayState {
    pub fn new(db: Arc<Database>, cipher: Arc<MessageCipher>) -> Self {
        let registry = ConnectionRegistry::new();
        let engine = DeliveryEngine::new(db.clone(), cipher.clone(), registry.clone());
        Self {
            db,
            cipher,
            registry,
            notify: NotifyRegistry::new(),
            engine,
        }
    }
}
