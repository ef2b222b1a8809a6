//! Load options and insertion strategies.

use crate::Result;
use crate::error::LoadError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// MySQL limit on placeholders in one prepared statement.
pub(crate) const MAX_PLACEHOLDERS: usize = 65_535;

/// What to do with rows the sanitizer rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectionPolicy {
    /// Record the rejection and keep loading
    #[default]
    Skip,
    /// Flush the rows already accepted, then stop the batch
    Abort,
}

/// Insertion strategy for a batch.
///
/// All three share one submission loop and differ only in chunk size and in
/// how a chunk is handed to the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Large chunks, one multi-row statement each
    #[default]
    Standard,
    /// Small chunks, rows pulled lazily, one transaction per chunk
    Streaming,
    /// One statement per row
    Direct,
}

impl Strategy {
    /// Rows submitted together under this strategy.
    pub fn chunk_size(self, options: &LoadOptions) -> usize {
        match self {
            Self::Standard => options.standard_chunk_size,
            Self::Streaming => options.streaming_chunk_size,
            Self::Direct => 1,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standard => "standard",
            Self::Streaming => "streaming",
            Self::Direct => "direct",
        };
        f.write_str(name)
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Chunk size for [`Strategy::Standard`]
    pub standard_chunk_size: usize,
    /// Chunk size for [`Strategy::Streaming`]
    pub streaming_chunk_size: usize,
    pub rejection_policy: RejectionPolicy,
    /// Failures kept per table result; counts stay exact beyond this
    pub max_recorded_failures: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            standard_chunk_size: 500,
            streaming_chunk_size: 100,
            rejection_policy: RejectionPolicy::Skip,
            max_recorded_failures: 1000,
        }
    }
}

impl LoadOptions {
    /// Validates load options.
    ///
    /// # Errors
    /// Returns error if a chunk size is zero or exceeds the placeholder limit
    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("standard_chunk_size", self.standard_chunk_size),
            ("streaming_chunk_size", self.streaming_chunk_size),
        ] {
            if size == 0 {
                return Err(LoadError::configuration(format!(
                    "{name} must be greater than 0"
                )));
            }
            if size > MAX_PLACEHOLDERS {
                return Err(LoadError::configuration(format!(
                    "{name} cannot exceed {MAX_PLACEHOLDERS}"
                )));
            }
        }
        Ok(())
    }

    /// Builder method to set the chunk size used by `strategy`.
    ///
    /// Direct loading always submits single rows and ignores this.
    pub fn with_chunk_size(mut self, strategy: Strategy, size: usize) -> Self {
        match strategy {
            Strategy::Standard => self.standard_chunk_size = size,
            Strategy::Streaming => self.streaming_chunk_size = size,
            Strategy::Direct => {}
        }
        self
    }

    pub fn with_rejection_policy(mut self, policy: RejectionPolicy) -> Self {
        self.rejection_policy = policy;
        self
    }

    pub fn with_max_recorded_failures(mut self, max: usize) -> Self {
        self.max_recorded_failures = max;
        self
    }
}
