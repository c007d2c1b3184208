use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::CrmAuthError;

type HmacSha256 = Hmac<Sha256>;

/// Random bytes behind each OAuth state token.
const STATE_TOKEN_BYTES: usize = 32;

fn new_hmac(key: &[u8]) -> Result<HmacSha256, CrmAuthError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CrmAuthError::Crypto(format!("HMAC init failed: {e}")))
}

fn decode_key(name: &str, b64: &str) -> Result<Vec<u8>, CrmAuthError> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(|e| CrmAuthError::Crypto(format!("Invalid {name} base64: {e}")))?;

    if key.len() != 32 {
        return Err(CrmAuthError::Crypto(format!(
            "{name} must be 32 bytes, got {}",
            key.len()
        )));
    }
    Ok(key)
}

/// AES-256-GCM encryption for stored CRM tokens, plus generation and
/// keyed digests of OAuth state tokens.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    state_key: Vec<u8>,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded keys.
    pub fn new(master_key_b64: &str, state_secret_b64: &str) -> Result<Self, CrmAuthError> {
        let master_key = decode_key("MASTER_KEY", master_key_b64)?;
        let state_key = decode_key("STATE_SECRET", state_secret_b64)?;

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| CrmAuthError::Crypto(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, state_key })
    }

    /// Encrypt plaintext using AES-256-GCM. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CrmAuthError> {
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CrmAuthError::Crypto(format!("Encryption failed: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt base64(nonce || ciphertext) back to plaintext.
    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, CrmAuthError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| CrmAuthError::Crypto(format!("Invalid base64: {e}")))?;

        if combined.len() < 12 {
            return Err(CrmAuthError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| CrmAuthError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| CrmAuthError::Crypto(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    /// Fresh URL-safe state token for an authorization request.
    pub fn new_state_token(&self) -> String {
        let mut bytes = [0u8; STATE_TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }

    /// HMAC-SHA256 digest of a state token. Only the digest is persisted.
    pub fn state_digest(&self, state_token: &str) -> Result<String, CrmAuthError> {
        let mut mac = new_hmac(&self.state_key)?;
        mac.update(state_token.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest))
    }
}
