use std::fmt;

use libp2p_identity::secp256k1;

/// Size of a secp256k1 private key in bytes
pub const PRIVATE_KEY_SIZE: usize = 32;
/// Size of a SEC1 compressed secp256k1 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public half of a node identity.
///
/// Devp2p addresses carry it as a node id (the uncompressed point
///  without its `0x04` tag), libp2p addresses as a peer id.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(secp256k1::PublicKey);

impl PublicKey {
    /// Parse a SEC1 compressed public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        let key = secp256k1::PublicKey::try_from_bytes(&buff)
            .map_err(|e| anyhow::anyhow!("invalid public key: {}", e))?;
        Ok(Self(key))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// 64 byte devp2p node id, as used in `enode://` urls
    pub fn node_id(&self) -> String {
        hex::encode(&self.0.to_bytes_uncompressed()[1..])
    }

    /// Base58 libp2p peer id
    pub fn peer_id(&self) -> String {
        libp2p_identity::PublicKey::from(self.0.clone())
            .to_peer_id()
            .to_base58()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node_id())
    }
}

/// Private identity handed to a node binary on its command line.
///
/// Every bootnode, rendezvous node and client gets a fresh key, so the
///  cluster can compute a node's address before the container starts.
#[derive(Clone)]
pub struct SecretKey(secp256k1::Keypair);

impl SecretKey {
    /// Parse a secret key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PRIVATE_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("private key hex decode error"))?;
        let secret = secp256k1::SecretKey::try_from_bytes(buff)
            .map_err(|e| anyhow::anyhow!("invalid private key: {}", e))?;
        Ok(Self(secret.into()))
    }

    /// Generate a new random secret key
    pub fn generate() -> Self {
        Self(secp256k1::Keypair::generate())
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.public().clone())
    }

    pub fn to_bytes(&self) -> [u8; PRIVATE_KEY_SIZE] {
        self.0.secret().to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(public: {})", self.public().to_hex())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// The generator point, public key of the secret scalar 1
    const ONE: &str = "0000000000000000000000000000000000000000000000000000000000000001";
    const ONE_NODE_ID: &str = "79be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
                               483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";

    #[test]
    fn test_keypair_generation() {
        let private_key = SecretKey::generate();
        let public_key = private_key.public();

        let recovered_private = SecretKey::from_hex(&private_key.to_hex()).unwrap();
        assert_eq!(private_key.to_bytes(), recovered_private.to_bytes());

        let recovered_public = PublicKey::from_hex(&format!("0x{}", public_key.to_hex())).unwrap();
        assert_eq!(public_key, recovered_public);
    }

    #[test]
    fn test_node_id_of_known_key() {
        let key = SecretKey::from_hex(ONE).unwrap();
        assert_eq!(key.public().node_id(), ONE_NODE_ID);
        assert_eq!(
            key.public().to_hex(),
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        );
        assert_eq!(key.public().to_string(), ONE_NODE_ID);
    }

    #[test]
    fn test_peer_id_is_secp256k1_inline() {
        let key = SecretKey::from_hex(ONE).unwrap();
        let peer_id = key.public().peer_id();
        // identity multihash of a protobuf-wrapped secp256k1 key
        assert!(peer_id.starts_with("16Uiu2"), "{}", peer_id);
        let parsed: libp2p_identity::PeerId = peer_id.parse().unwrap();
        assert_eq!(
            parsed,
            libp2p_identity::PublicKey::from(key.public().0).to_peer_id()
        );
    }

    #[test]
    fn test_generated_keys_differ() {
        assert_ne!(
            SecretKey::generate().public(),
            SecretKey::generate().public()
        );
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let key = SecretKey::generate();
        let debug = format!("{:?}", key);
        assert!(!debug.contains(&key.to_hex()));
        assert!(debug.contains(&key.public().to_hex()));
    }

    #[test]
    fn test_bad_hex() {
        assert!(SecretKey::from_hex("zz").is_err());
        assert!(SecretKey::from_hex(&"00".repeat(PRIVATE_KEY_SIZE)).is_err());
        assert!(PublicKey::from_hex("00").is_err());
    }
}
