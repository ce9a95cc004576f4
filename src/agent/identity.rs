//! Agent identity derivation.
//!
//! Identities are the registry keys agents are stored under. A named agent
//! gets a slug of its name; an unnamed one gets a time-derived token.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Prefix for identities generated when no name was supplied.
pub const FALLBACK_IDENTITY_PREFIX: &str = "agent";

static TOKEN_SEQ: AtomicU64 = AtomicU64::new(0);

/// Derive the registry identity for an agent name.
///
/// Present names are lower-cased and every run of whitespace becomes a single
/// underscore (`"Friendly Bot"` -> `"friendly_bot"`). Absent or blank names
/// get a generated `agent_<millis>_<seq>` identity.
pub fn derive_identity(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => slugify(name),
        None => unique_token(FALLBACK_IDENTITY_PREFIX),
    }
}

fn slugify(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Produce `<prefix>_<unix-millis>_<seq>`.
///
/// The sequence number is process-wide, so tokens never repeat within one
/// process even when issued in the same millisecond. Tokens from different
/// processes can still collide.
pub fn unique_token(prefix: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let seq = TOKEN_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{millis}_{seq}")
}
