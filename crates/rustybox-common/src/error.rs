//! Error types for applet operations.
//!
//! Applets return `AppletResult<i32>`; the registry prints the error as
//! `APPLET: message` on stderr and exits with [`AppletError::exit_code`].

use std::io;
use thiserror::Error;

/// Result type alias for applet operations.
pub type AppletResult<T> = Result<T, AppletError>;

/// Exit code for a generic failure.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code for syntax errors in conditional expressions.
pub const EXIT_SYNTAX: i32 = 2;

/// Exit code for a command that exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Exit code for an unknown command.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Errors that can occur while running an applet.
#[derive(Debug, Error)]
pub enum AppletError {
    /// Wrong number or shape of operands.
    #[error("{message}")]
    Usage {
        /// Usage text or specific complaint.
        message: String,
    },

    /// Unrecognised option.
    #[error("invalid option -- '{option}'")]
    InvalidOption {
        /// The option as given (without the leading dash).
        option: String,
    },

    /// Option that needs a value was given without one.
    #[error("option requires an argument -- '{option}'")]
    MissingArgument {
        /// The option missing its value.
        option: String,
    },

    /// A numeric operand could not be parsed.
    #[error("invalid number '{value}'")]
    InvalidNumber {
        /// The offending text.
        value: String,
    },

    /// I/O failure on a named path.
    #[error("{path}: {}", io_message(.source))]
    Io {
        /// The path being read or written.
        path: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// I/O failure on one of the standard streams.
    #[error("{}", io_message(.0))]
    Stream(#[from] io::Error),

    /// Malformed conditional expression (`test`/`[`).
    #[error("{message}")]
    Syntax {
        /// Error message.
        message: String,
    },

    /// Command lookup failed.
    #[error("{command}: command not found")]
    NotFound {
        /// The command that was not found.
        command: String,
    },

    /// Command exists but could not be executed.
    #[error("{command}: {}", io_message(.source))]
    NotExecutable {
        /// The command that failed to start.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Operation failed with a free-form message.
    #[error("{message}")]
    Failed {
        /// Error message.
        message: String,
    },
}

/// Formats an I/O error the way the C tools do, without the
/// ` (os error N)` suffix std appends.
pub fn io_message(err: &io::Error) -> String {
    let text = err.to_string();
    match text.rfind(" (os error ") {
        Some(idx) if err.raw_os_error().is_some() => text[..idx].to_string(),
        _ => text,
    }
}

impl AppletError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates an invalid option error.
    pub fn invalid_option(option: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.into(),
        }
    }

    /// Creates a missing option argument error.
    pub fn missing_argument(option: impl Into<String>) -> Self {
        Self::MissingArgument {
            option: option.into(),
        }
    }

    /// Creates an invalid number error.
    pub fn invalid_number(value: impl Into<String>) -> Self {
        Self::InvalidNumber {
            value: value.into(),
        }
    }

    /// Creates a path I/O error.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a syntax error.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(command: impl Into<String>) -> Self {
        Self::NotFound {
            command: command.into(),
        }
    }

    /// Creates a generic failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns the process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppletError::Syntax { .. } => EXIT_SYNTAX,
            AppletError::NotFound { .. } => EXIT_NOT_FOUND,
            AppletError::NotExecutable { .. } => EXIT_NOT_EXECUTABLE,
            _ => EXIT_FAILURE,
        }
    }

    /// Returns true if this error is a write to a closed pipe, which applets
    /// treat as a quiet exit.
    pub fn is_broken_pipe(&self) -> bool {
        match self {
            AppletError::Stream(e) | AppletError::Io { source: e, .. } => {
                e.kind() == io::ErrorKind::BrokenPipe
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppletError::invalid_option("z");
        assert_eq!(err.to_string(), "invalid option -- 'z'");

        let err = AppletError::not_found("frobnicate");
        assert_eq!(err.to_string(), "frobnicate: command not found");
    }

    #[test]
    fn test_io_error_display() {
        let err = AppletError::io(
            "/nonexistent",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(err.to_string(), "/nonexistent: No such file or directory");
    }

    #[test]
    fn test_io_message_strips_os_error() {
        let err = io::Error::from_raw_os_error(2);
        assert_eq!(io_message(&err), "No such file or directory");
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(AppletError::usage("x").exit_code(), EXIT_FAILURE);
        assert_eq!(AppletError::syntax("x").exit_code(), EXIT_SYNTAX);
        assert_eq!(AppletError::not_found("x").exit_code(), EXIT_NOT_FOUND);
    }

    #[test]
    fn test_is_broken_pipe() {
        let pipe = AppletError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(pipe.is_broken_pipe());
        assert!(!AppletError::failed("boom").is_broken_pipe());
    }
}
