use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::error::IdentityError;
use crate::types::EncryptionKey;

/// The local encryption identity based on X25519.
/// Peers seal one-time archive passwords to its public key.
#[derive(Clone)]
pub struct Identity {
    secret: StaticSecret,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(*secret),
        }
    }

    /// Restore identity from a hex-encoded secret key
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_secret.trim()).map_err(|_| IdentityError::InvalidKeyBytes)?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Restore identity from a serialized export, checking that the stored
    /// public key still matches the secret.
    pub fn from_export(export: &IdentityExport) -> Result<Self, IdentityError> {
        let identity = Self::from_secret_bytes(&export.secret_key);
        if identity.public_key().0 != export.public_key {
            return Err(IdentityError::KeyFile(
                "public key does not match secret key".to_string(),
            ));
        }
        Ok(identity)
    }

    /// Get the encryption public key
    pub fn public_key(&self) -> EncryptionKey {
        EncryptionKey(PublicKey::from(&self.secret).to_bytes())
    }

    /// Get the raw secret key bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn diffie_hellman(&self, their_public: &EncryptionKey) -> SharedSecret {
        self.secret.diffie_hellman(&PublicKey::from(their_public.0))
    }

    /// Export identity for serialization
    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: self.secret.to_bytes(),
            public_key: self.public_key().0,
        }
    }
}
