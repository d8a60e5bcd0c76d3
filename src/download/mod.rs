//! Media retrieval: extractor invocation, temp artifacts, format listing and
//! the orchestrator that ties them together.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod formats;
pub mod invoker;
pub mod job;
pub mod orchestrator;
pub mod scratch;
pub mod ytdlp;
pub mod ytdlp_errors;

// Re-exports for convenience
pub use formats::{FormatDescriptor, FormatLines};
pub use invoker::{ExtractionInvoker, FileOutput, FileStream, StreamOutput};
pub use job::{JobLifecycle, JobState};
pub use orchestrator::{Delivery, Orchestrator, RetrievalRequest};
pub use scratch::{ScratchDir, TempArtifact};

/// How retrieved bytes reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Materialize into a temp file, then send it as an attachment
    #[default]
    File,
    /// Relay the extractor's stdout as it is produced
    Stream,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::File => "file",
            DeliveryMode::Stream => "stream",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(DeliveryMode::File),
            "stream" => Ok(DeliveryMode::Stream),
            other => Err(format!("unknown delivery mode '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!("file".parse::<DeliveryMode>().unwrap(), DeliveryMode::File);
        assert_eq!(" Stream ".parse::<DeliveryMode>().unwrap(), DeliveryMode::Stream);
        assert!("pigeon".parse::<DeliveryMode>().is_err());
    }

    #[test]
    fn test_delivery_mode_serde() {
        let mode: DeliveryMode = serde_json::from_str("\"stream\"").unwrap();
        assert_eq!(mode, DeliveryMode::Stream);
        assert_eq!(serde_json::to_string(&DeliveryMode::File).unwrap(), "\"file\"");
    }
}
