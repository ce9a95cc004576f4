//! Agent Session
//!
//! A session is the (thread id, resource id) pair that scopes one
//! conversation's memory. Ids are opaque: supplied ids pass through
//! unchecked, missing ones are synthesized.

use serde::{Deserialize, Serialize};

use super::identity::unique_token;

pub const THREAD_ID_PREFIX: &str = "thread";
pub const RESOURCE_ID_PREFIX: &str = "resource";

/// Resolved session identifiers, echoed back to the caller so it can resume.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIds {
    /// Conversation id
    pub thread_id: String,
    /// Participant id
    pub resource_id: String,
}

/// Fill in whichever of the two ids is absent or blank.
///
/// The two ids are resolved independently; a supplied id is never checked
/// against previous calls.
pub fn resolve_session(thread_id: Option<&str>, resource_id: Option<&str>) -> SessionIds {
    SessionIds {
        thread_id: supplied(thread_id).unwrap_or_else(|| unique_token(THREAD_ID_PREFIX)),
        resource_id: supplied(resource_id).unwrap_or_else(|| unique_token(RESOURCE_ID_PREFIX)),
    }
}

fn supplied(id: Option<&str>) -> Option<String> {
    id.filter(|s| !s.trim().is_empty()).map(str::to_string)
}
