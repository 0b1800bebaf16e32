//! Anti-CSRF state values for the authorization redirect.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

/// Raw entropy behind every state value.
pub const STATE_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
#[error("secure random source failed: {0}")]
pub struct EntropyError(String);

/// Fill `byte_len` bytes from the OS CSPRNG and encode them base64url
/// without padding, so the result can sit unescaped in a query string.
///
/// An entropy failure is not retried.
pub fn generate(byte_len: usize) -> Result<String, EntropyError> {
    let mut bytes = vec![0u8; byte_len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| EntropyError(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(&bytes))
}
