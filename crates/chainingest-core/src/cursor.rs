//! Ingestion cursor: marks how far a source has been ingested.

use serde::{Deserialize, Serialize};

/// A position in the upstream source's sequence.
///
/// The orchestrator treats it as opaque: it hands the cursor to the source
/// client and stores whatever `next_cursor` comes back. Sources that page by
/// height use `height`; sources with provider page tokens also carry `token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Highest height covered by this cursor.
    pub height: u64,
    /// Provider-specific continuation token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Cursor {
    /// The configured starting position for a source that has no checkpoint.
    pub fn genesis(height: u64) -> Self {
        Self {
            height,
            token: None,
        }
    }

    /// Create a cursor carrying a provider page token.
    pub fn with_token(height: u64, token: impl Into<String>) -> Self {
        Self {
            height,
            token: Some(token.into()),
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.token {
            Some(token) => write!(f, "{}#{}", self.height, token),
            None => write!(f, "{}", self.height),
        }
    }
}
