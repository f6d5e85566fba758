//! Grant token generation.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Generate an unguessable grant token.
///
/// 32 cryptographically-secure random bytes encoded as base64url without
/// padding (43 characters).
pub fn generate_token() -> String {
    let random_bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
