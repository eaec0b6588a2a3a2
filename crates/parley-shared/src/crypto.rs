use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::constants::{KDF_CONTEXT_SEALED_BOX, NONCE_SIZE, PUBKEY_SIZE};
use crate::error::CryptoError;
use crate::identity::Identity;
use crate::types::EncryptionKey;

pub type SymmetricKey = [u8; 32];

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn derive_key_from_passphrase(passphrase: &[u8], context: &str) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(passphrase);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Random password drawn from lower/upper case letters, digits and symbols.
/// Every class is represented once `length >= 4`.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    let classes = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS];
    let alphabet: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = classes
        .iter()
        .take(length)
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < length {
        chars.push(alphabet[rng.gen_range(0..alphabet.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// Asymmetric encryption used to hand secrets to a specific peer.
pub trait CryptoProvider: Send + Sync {
    /// Encrypt `plaintext` so that only the holder of `recipient`'s secret
    /// key can read it.
    fn encrypt(&self, plaintext: &[u8], recipient: &EncryptionKey) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a ciphertext addressed to the local identity.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Public key peers should encrypt to.
    fn public_key(&self) -> EncryptionKey;
}

/// X25519 sealed box: ephemeral_pk || nonce || ciphertext.
///
/// The symmetric key is derived with BLAKE3 from the shared secret and both
/// public keys, so a ciphertext cannot be replayed against another recipient.
pub struct SealedBoxProvider {
    identity: Identity,
}

impl SealedBoxProvider {
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

fn sealed_box_key(shared: &[u8; 32], ephemeral: &[u8; 32], recipient: &[u8; 32]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared);
    hasher.update(ephemeral);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

impl CryptoProvider for SealedBoxProvider {
    fn encrypt(&self, plaintext: &[u8], recipient: &EncryptionKey) -> Result<Vec<u8>, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral_pk = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));
        if !shared.was_contributory() {
            return Err(CryptoError::EncryptionFailed);
        }

        let key = sealed_box_key(shared.as_bytes(), ephemeral_pk.as_bytes(), &recipient.0);
        let sealed = encrypt(&key, plaintext)?;

        let mut output = Vec::with_capacity(PUBKEY_SIZE + sealed.len());
        output.extend_from_slice(ephemeral_pk.as_bytes());
        output.extend_from_slice(&sealed);
        Ok(output)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < PUBKEY_SIZE + NONCE_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let (ephemeral_bytes, sealed) = ciphertext.split_at(PUBKEY_SIZE);
        let ephemeral: [u8; 32] = ephemeral_bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength)?;
        let shared = self.identity.diffie_hellman(&EncryptionKey(ephemeral));
        if !shared.was_contributory() {
            return Err(CryptoError::DecryptionFailed);
        }

        let own = self.identity.public_key();
        let key = sealed_box_key(shared.as_bytes(), &ephemeral, &own.0);
        decrypt(&key, sealed)
    }

    fn public_key(&self) -> EncryptionKey {
        self.identity.public_key()
    }
}
