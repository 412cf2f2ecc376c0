//! Operational error context propagation with `anyhow`.
//!
//! Used at the edges of the crate (the binary, background tasks) where an
//! error only needs to be reported, not matched on.

use std::{error::Error as StdError, fmt::Display};

use {
    anyhow::{Context, Error, Result as AnyhowResult},
    tracing::{error, warn},
};

use crate::error::domain::PlayerError;

/// Extension trait for attaching context to foreign errors.
pub trait ResultExt<T, E> {
    /// Adds a static context message.
    fn add_context(self, context: &'static str) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static;

    /// Adds a formatted context message.
    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
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

    fn add_contextf(self, format: impl Display) -> AnyhowResult<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        self.context(format.to_string())
    }
}

/// Centralized reporting for errors that are handled by logging them.
pub struct ErrorReporter;

impl ErrorReporter {
    /// Logs a recoverable failure, e.g. an auto-advance that could not start.
    pub fn warn(error: &Error, context: &str) {
        warn!(context = context, error = %format!("{error:#}"), "Recoverable failure");
    }

    /// Logs a failure that ends the current operation.
    pub fn error(error: &Error, context: &str) {
        error!(context = context, error = %format!("{error:#}"), "Operation failed");
    }

    /// Formats an error chain for display to a user.
    ///
    /// Device and queue problems get a hint on what to do next; everything
    /// else is shown with its full cause chain.
    pub fn to_user_message(error: &Error) -> String {
        match error.downcast_ref::<PlayerError>() {
            Some(PlayerError::DeviceUnusable { device }) => {
                format!("{device} cannot play audio at any supported sample rate; pick another device")
            }
            Some(PlayerError::NoDeviceSelected) => {
                "No output device selected; use --list-devices to see what is available".to_string()
            }
            Some(PlayerError::EmptyQueue) => "No playable tracks were found".to_string(),
            _ => format!("{error:#}"),
        }
    }
}
