//! Long-poll query and response shapes.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query string of the poll route.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PollQuery {
    /// Version the client already has. Missing or unparsable values count as 0.
    pub version: Option<String>,
}

impl PollQuery {
    /// Parsed client version.
    pub fn known_version(&self) -> u64 {
        self.version
            .as_deref()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Outcome of a long-poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    /// Latest version known for the game.
    pub version: u64,
    /// Whether `version` is newer than the one the client sent.
    pub has_update: bool,
}

impl PollResponse {
    /// Answer for a client at `known` when the game is at `latest`.
    pub fn new(known: u64, latest: u64) -> Self {
        Self {
            version: latest,
            has_update: latest > known,
        }
    }
}
