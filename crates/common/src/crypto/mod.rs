//! Node identities.
//!
//! Each keyed entity (bootnode, rendezvous node, client) owns a secp256k1
//! keypair generated on the orchestrator, so its address is known before
//! its container is created.

mod keys;

pub use keys::{KeyError, PublicKey, SecretKey};
