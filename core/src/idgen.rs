//! SHA-256 based ID generation.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Number of hash bytes kept in an ID (rendered as 12 hex characters).
const ID_BYTES: usize = 6;

/// Creates an ID such as `sol-3f9a0c12be47` from a type prefix and some
/// content that describes the entity.
///
/// A process-wide nonce keeps IDs distinct when the same content is hashed
/// twice within one clock tick.
pub fn generate_id(prefix: &str, content: &str) -> String {
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    let hash = Sha256::digest(format!("{content}|{timestamp}|{nonce}").as_bytes());

    let mut id = String::with_capacity(prefix.len() + 1 + ID_BYTES * 2);
    id.push_str(prefix);
    id.push('-');
    for byte in &hash[..ID_BYTES] {
        id.push_str(&format!("{byte:02x}"));
    }
    id
}
