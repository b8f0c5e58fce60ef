//! Random token generation and constant-time comparison.
//!
//! Agent bearer tokens are 32 bytes of OS randomness, hex-encoded, and shown
//! exactly once at registration. Every comparison against a secret value goes
//! through [`constant_time_eq`].

use crate::error::{GatewayError, Result};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Length of the random token in bytes (256 bits of entropy).
pub const TOKEN_BYTES: usize = 32;

/// Generate a fresh agent token.
///
/// Returns a 64-character lowercase hex string. The raw bytes are wiped
/// before returning.
pub fn generate_token() -> Result<Zeroizing<String>> {
    let mut bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
    fill_random(&mut bytes[..])?;
    Ok(Zeroizing::new(hex::encode(&bytes[..])))
}

/// Fill `buf` with cryptographically secure random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| GatewayError::InternalConfig(format!("RNG failure: {}", e)))
}

/// Constant-time comparison of two byte strings.
///
/// Length mismatch returns early; only the contents are compared in
/// constant time.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
