/// Parley Crypto
///
/// Reversible at-rest transform for message bodies: AES-256-GCM under a
/// single server-held key, emitted as one base64 token per body. This is
/// encryption at rest, not end-to-end — the server encrypts before storage
/// and decrypts after retrieval, transparently to the protocol.

pub mod cipher;
pub mod keys;

pub use cipher::MessageCipher;
