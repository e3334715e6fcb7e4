//! Error taxonomy for a provisioning run.
//!
//! Every variant is terminal for the current run; nothing here is retried.

use camino::Utf8PathBuf;

pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// Top-level failure of a provisioning run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error("failed to retrieve {url}: {source}")]
    Retrieval {
        url: String,
        #[source]
        source: RetrievalError,
    },

    #[error("failed to extract {archive}: {reason}")]
    Extraction {
        archive: Utf8PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("host command {operation} failed: {message}")]
    HostCommand { operation: String, message: String },

    #[error("work area: {0}")]
    WorkArea(#[source] std::io::Error),
}

impl ProvisionError {
    pub fn host(operation: &str, message: impl std::fmt::Display) -> Self {
        Self::HostCommand {
            operation: operation.to_owned(),
            message: message.to_string(),
        }
    }

    pub fn extraction(archive: &camino::Utf8Path, reason: impl std::fmt::Display) -> Self {
        Self::Extraction {
            archive: archive.to_owned(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocationError {
    #[error("no free machine identifier in {start}..{end}")]
    Exhausted { start: u32, end: u32 },
    #[error("machine identifier {0} already exists on the host")]
    AlreadyExists(u32),
}

/// Network and HTTP failures are kept apart from local filesystem failures.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("unsupported URL scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("server responded with HTTP {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("writing download: {0}")]
    Storage(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("no disk image located under {root}")]
    NoDiskImage { root: Utf8PathBuf },
    #[error("archives nested deeper than {depth} levels")]
    TooDeep { depth: usize },
    #[error("updating descriptor {path}")]
    Descriptor {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_command_message() {
        let e = ProvisionError::host("importDisk", "Subprocess failed: exit status: 2");
        assert_eq!(
            e.to_string(),
            "host command importDisk failed: Subprocess failed: exit status: 2"
        );
    }

    #[test]
    fn test_allocation_is_transparent() {
        let e: ProvisionError = AllocationError::AlreadyExists(400).into();
        assert!(e.to_string().contains("400 already exists"));
    }
}
