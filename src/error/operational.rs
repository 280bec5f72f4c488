//! Operational error context propagation with `anyhow`.
//!
//! Adds context to errors on their way up to `main` and logs them at a
//! severity matching how badly they affect playback.

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{error, warn},
};

use crate::error::domain::PlayerError;

/// Extension trait adding context to errors.
pub trait ResultExt<T, E> {
    /// Adds a static context message.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with `context`.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds a formatted context message.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with `context`.
    fn add_contextf(self, context: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;
}

impl<T, E> ResultExt<T, E> for Result<T, E> {
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(context)
    }

    fn add_contextf(self, context: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.with_context(|| context.to_string())
    }
}

/// Centralized error logging.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Logs an error at a severity derived from its kind.
    ///
    /// Fatal player errors are logged as errors, everything else as
    /// warnings.
    ///
    /// # Returns
    ///
    /// Whether the error is fatal.
    pub fn report(error: &Error, context: &str) -> bool {
        let fatal = Self::is_fatal(error);
        let message = Self::to_user_message(error);
        if fatal {
            error!(context, error = %message, "Fatal error");
        } else {
            warn!(context, error = %message, "Recoverable error");
        }
        fatal
    }

    /// Whether any error in the chain is a fatal player error.
    #[must_use]
    pub fn is_fatal(error: &Error) -> bool {
        error
            .chain()
            .filter_map(|cause| cause.downcast_ref::<PlayerError>())
            .any(PlayerError::is_fatal)
    }

    /// Formats the whole error chain on one line.
    #[must_use]
    pub fn to_user_message(error: &Error) -> String {
        error
            .chain()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(": ")
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use crate::{
        audio::{demux::DemuxError, output::OutputError},
        error::{
            domain::PlayerError,
            operational::{ErrorReporter, ResultExt},
        },
    };

    #[test]
    fn test_add_context() {
        let result: Result<(), DemuxError> = Err(DemuxError::Truncated);
        let error = result.add_context("Opening playlist").unwrap_err();
        assert_eq!(error.to_string(), "Opening playlist");
        assert_eq!(
            ErrorReporter::to_user_message(&error),
            "Opening playlist: File is truncated"
        );
    }

    #[test]
    fn test_add_contextf() {
        let result: Result<(), DemuxError> = Err(DemuxError::Truncated);
        let error = result.add_contextf(format!("Opening {}", "a.opus")).unwrap_err();
        assert_eq!(error.to_string(), "Opening a.opus");
    }

    #[test]
    fn test_report_classifies_chain() {
        let fatal: Result<(), PlayerError> = Err(OutputError::NoDeviceFound.into());
        let fatal = fatal.add_context("Starting output").unwrap_err();
        assert!(ErrorReporter::report(&fatal, "test"));

        let recoverable: Result<(), PlayerError> = Err(DemuxError::Truncated.into());
        let recoverable = recoverable.add_context("Opening file").unwrap_err();
        assert!(!ErrorReporter::report(&recoverable, "test"));

        assert!(!ErrorReporter::is_fatal(&anyhow!("plain message")));
    }
}
