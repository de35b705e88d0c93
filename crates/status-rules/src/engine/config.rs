use serde::{Deserialize, Serialize};

use super::distributor::DocumentFallback;
use super::resolution::TiePolicy;

pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;

/// Policy dials for resolution and ruleset distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tie_policy: TiePolicy,
    pub document_fallback: DocumentFallback,
    pub max_document_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tie_policy: TiePolicy::Report,
            document_fallback: DocumentFallback::Exact,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }
}
