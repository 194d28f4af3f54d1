use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use tokio::sync::OnceCell;

/// Random bytes behind each session token.
pub const SESSION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum HashingError {
    #[error("bcrypt failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("hashing task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Hashes `plaintext` with a fresh salt. bcrypt is slow on purpose, so the work
/// happens on the blocking pool.
pub async fn hash_password(plaintext: &str, cost: u32) -> Result<String, HashingError> {
    let plaintext = plaintext.to_owned();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(plaintext, cost)).await??;
    Ok(hash)
}

/// False on mismatch and on anything that is not a valid bcrypt hash.
pub async fn verify_password(plaintext: &str, hash: &str) -> bool {
    let plaintext = plaintext.to_owned();
    let hash = hash.to_owned();
    match tokio::task::spawn_blocking(move || bcrypt::verify(plaintext, &hash)).await {
        Ok(Ok(matches)) => matches,
        Ok(Err(err)) => {
            tracing::warn!(%err, "stored password hash is unusable");
            false
        }
        Err(err) => {
            tracing::error!(%err, "password verification task failed");
            false
        }
    }
}

static DECOY_HASH: OnceCell<String> = OnceCell::const_new();

/// Spends a full bcrypt verification for a user that does not exist, so the
/// response time does not reveal which names are registered. Always false.
pub async fn verify_decoy(plaintext: &str, cost: u32) -> bool {
    match DECOY_HASH
        .get_or_try_init(|| hash_password("decoy-password", cost))
        .await
    {
        Ok(hash) => {
            verify_password(plaintext, hash).await;
        }
        Err(err) => tracing::warn!(%err, "could not build decoy hash"),
    }
    false
}

/// `byte_len` bytes from the OS RNG, URL-safe base64 without padding.
///
/// Panics if the OS RNG is unavailable.
pub fn generate_session_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
