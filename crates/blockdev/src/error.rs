use stackdev_utils::RunResult;
use thiserror::Error;

/// The three error kinds a caller of this crate needs to distinguish:
/// a recoverable per-operation failure, a contract violation by the caller
/// (a bug, not a runtime condition), and malformed constructor arguments.
#[derive(Debug, Error)]
pub enum Error {
    /// A recoverable per-operation failure: tool failure, parse failure,
    /// timeout, insufficient space, invalid metadata, wrong peer, missing
    /// kernel state. Carries enough context to log: the failing command and
    /// its captured output, when the failure originated from a subprocess.
    #[error("{message}")]
    BlockDevice {
        message: String,
        command: Option<String>,
        output: Option<String>,
    },
    /// A contract violation: unknown device type, cross-volume-group
    /// rename, rename of a replicated-mirror device. Callers must not
    /// attempt to handle these; they indicate a bug in the caller.
    #[error("programmer error: {0}")]
    Programmer(String),
    /// Malformed constructor arguments: children cardinality, version
    /// mismatch.
    #[error("invalid value: {0}")]
    Value(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn block_device(message: impl Into<String>) -> Self {
        Error::BlockDevice {
            message: message.into(),
            command: None,
            output: None,
        }
    }

    /// Build a `BlockDevice` error from a failed [`RunResult`], in the style
    /// of `"{context}: {fail_reason} - {output}"`.
    pub fn from_run_result(context: &str, result: &RunResult) -> Self {
        Error::BlockDevice {
            message: format!("{context}: {} - {}", result.fail_reason, result.output()),
            command: Some(result.cmd.clone()),
            output: Some(result.output()),
        }
    }

    pub fn programmer(message: impl Into<String>) -> Self {
        Error::Programmer(message.into())
    }

    pub fn value(message: impl Into<String>) -> Self {
        Error::Value(message.into())
    }
}
