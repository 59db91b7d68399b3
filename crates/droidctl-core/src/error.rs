//! Error taxonomy shared by every droidctl-core component.
//!
//! The channel, parser, sampler, poller and emulator manager all report
//! failures through [`DroidError`], so callers can match on one type no matter
//! which layer failed. Every variant carries enough context (command text, raw
//! output, attempt budget) to diagnose the failure without re-running it.

use thiserror::Error;

use crate::channel::ChannelError;

/// Errors that can occur while driving a device or an emulator.
#[derive(Error, Debug)]
pub enum DroidError {
    /// The command channel itself failed to run a command.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Channel output did not match an expected text pattern.
    #[error("Unable to parse {input:?}: {reason}")]
    Parse {
        /// The text that failed to parse.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A polled predicate was never satisfied within its budget.
    #[error("Reached max retry attempts of {attempts}")]
    RetryExhausted {
        /// The original attempt budget.
        attempts: u32,
    },

    /// A precondition for launching an emulator is unmet.
    #[error("Cannot start AVD emulator: {0}")]
    Environment(String),

    /// The UI hierarchy capture did not produce a usable path.
    #[error("Failed to dump xml screen; command: {command}; output: {output}")]
    Dump {
        /// The dump command that was issued.
        command: String,
        /// What the device printed instead of a dump path.
        output: String,
    },

    /// The screen-size query did not report a physical size.
    #[error("Failed to fetch physical screen size; output: {output}")]
    Size {
        /// Raw output of the size query.
        output: String,
    },

    /// `adb devices` listed no usable device.
    #[error("No devices found")]
    NoDevices,

    /// A device command ran but its output reported failure.
    #[error("{action} failed; output: {output}")]
    Command {
        /// Short description of what was attempted.
        action: String,
        /// Raw output of the device command.
        output: String,
    },

    /// Caller-supplied input was rejected before anything was sent.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DroidError {
    pub(crate) fn parse(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DroidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_retry_exhausted() {
        let err = DroidError::RetryExhausted { attempts: 7 };
        assert_eq!(err.to_string(), "Reached max retry attempts of 7");
    }

    #[test]
    fn error_display_parse_includes_input() {
        let err = DroidError::parse("[1,2]", "expected two corners");
        let msg = err.to_string();
        assert!(msg.contains("[1,2]"));
        assert!(msg.contains("expected two corners"));
    }

    #[test]
    fn error_display_channel_is_transparent() {
        let err: DroidError = ChannelError {
            command: "adb devices".to_string(),
            message: "not found".to_string(),
        }
        .into();
        assert!(err.to_string().contains("adb devices"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn error_display_dump() {
        let err = DroidError::Dump {
            command: "adb shell uiautomator dump".to_string(),
            output: "ERROR: null root node".to_string(),
        };
        assert!(err.to_string().contains("null root node"));
    }

    #[test]
    fn error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = DroidError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(err.to_string().contains("file not found"));
    }
}
