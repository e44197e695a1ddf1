//! Identifier and token generation.
//!
//! Container IDs are 64 hex characters derived by hashing fresh UUIDs, so
//! they are unpredictable without needing an OS entropy call per byte.
//! Generated names follow the adjective-noun convention clients expect.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::SHORT_ID_LEN;

/// Generates a 64-hex container ID.
pub fn generate_id() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    hex_encode(&hasher.finalize())
}

/// Generates a bearer token for agent authorization.
pub fn generate_token() -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"agent-token");
    hasher.update(Uuid::new_v4().as_bytes());
    hex_encode(&hasher.finalize())
}

/// Returns the 12-character prefix used in client messages and cloud tags.
pub fn short_id(id: &str) -> &str {
    if id.len() >= SHORT_ID_LEN {
        &id[..SHORT_ID_LEN]
    } else {
        id
    }
}

/// Generates a human-readable container name when the client supplies none.
pub fn generate_name() -> String {
    const ADJECTIVES: &[&str] = &[
        "bold", "brisk", "calm", "deft", "eager", "fond", "keen", "merry", "quiet", "rapid",
        "sly", "spry", "stout", "swift", "warm", "wise",
    ];
    const NOUNS: &[&str] = &[
        "archer", "beacon", "cedar", "delta", "ember", "falcon", "garnet", "harbor", "iris",
        "juniper", "kestrel", "lantern", "meadow", "nimbus", "osprey", "pike",
    ];

    let bytes = Uuid::new_v4().into_bytes();
    let adj = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let noun = NOUNS[bytes[1] as usize % NOUNS.len()];
    format!("{adj}_{noun}")
}

/// Constant-time equality for bearer tokens.
///
/// Length differences leak through timing; only content comparison is
/// constant-time, which matches the threat model for random tokens.
pub fn token_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
