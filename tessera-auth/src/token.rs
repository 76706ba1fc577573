//! Join-token value generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Token length in random bytes. 16 bytes is 128 bits of entropy.
const TOKEN_BYTES: usize = 16;

/// Generate a fresh opaque join-token value.
pub fn generate_join_token() -> String {
    let mut random = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut random);
    hex::encode(random)
}
