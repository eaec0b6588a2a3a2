use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Key file error: {0}")]
    KeyFile(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed request JSON: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("Payload exceeds {max} bytes ({size})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Invalid percent-encoding in archive name")]
    InvalidPercentEncoding,
}
