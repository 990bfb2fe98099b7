//! Error types for the sweep engine.
//!
//! `SweepError` covers caller misuse that is rejected synchronously: starting
//! a worker that is already running, starting one that was never configured,
//! and plans that fail validation. These never reach the notification channel.
//!
//! Failures raised by a step routine are a different category. They are
//! carried as [`SweepFailure`] inside the error notification and are never
//! returned to the caller that started the sweep.
//!
//! Aborting a sweep is not an error at all; it ends with a normal terminal
//! notification whose status is `Aborted`.

use thiserror::Error;

/// Convenience alias for results using the sweep error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Configuration errors reported synchronously to the caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SweepError {
    /// `start()` or `configure()` called while a sweep is in progress.
    ///
    /// Only one sweep runs per worker. The in-progress sweep is not affected.
    #[error("Cannot {operation}: a sweep is already running")]
    AlreadyRunning {
        /// The rejected operation
        operation: &'static str,
    },

    /// `start()` called before any plan was configured.
    #[error("Cannot start: no sweep has been configured")]
    NotConfigured,

    /// Pause/resume requested while no sweep is running.
    #[error("Cannot {operation}: worker is {state}")]
    NotRunning {
        /// The rejected operation
        operation: &'static str,
        /// Worker state at the time of the request
        state: String,
    },

    /// A background task was requested outside a Tokio runtime.
    #[error("Cannot {operation}: no Tokio runtime is running")]
    NoRuntime {
        /// The rejected operation
        operation: &'static str,
    },

    /// An axis definition is unusable.
    ///
    /// Raised for zero-point axes, equal start and stop, or non-finite bounds.
    #[error("Invalid axis '{axis}': {reason}")]
    InvalidAxis {
        /// Axis name
        axis: String,
        /// What is wrong with it
        reason: String,
    },

    /// The plan as a whole is unusable (no axes, duplicate names, ...).
    #[error("Invalid sweep plan: {0}")]
    InvalidPlan(String),

    /// Configuration values parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

/// A measurement failure captured at the worker boundary.
///
/// Holds the rendered message and the full cause chain of the error raised by
/// the step routine, so it can be cloned and sent to any number of consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepFailure {
    /// Top-level error message
    pub message: String,
    /// Cause chain, outermost first (excluding `message`)
    pub causes: Vec<String>,
    /// Number of samples recorded before the failure
    pub samples_recorded: u64,
}

impl SweepFailure {
    /// Capture an `anyhow` error together with its cause chain.
    pub fn from_error(err: &anyhow::Error, samples_recorded: u64) -> Self {
        Self {
            message: err.to_string(),
            causes: err.chain().skip(1).map(|c| c.to_string()).collect(),
            samples_recorded,
        }
    }

    /// Build a failure from a panic payload raised inside the step routine.
    pub fn from_panic(payload: &(dyn std::any::Any + Send), samples_recorded: u64) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self {
            message: format!("step routine panicked: {}", detail),
            causes: Vec::new(),
            samples_recorded,
        }
    }
}

impl std::fmt::Display for SweepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for cause in &self.causes {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for SweepFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_error_display() {
        let err = SweepError::AlreadyRunning { operation: "start" };
        assert_eq!(
            err.to_string(),
            "Cannot start: a sweep is already running"
        );

        let err = SweepError::InvalidAxis {
            axis: "gate".into(),
            reason: "start equals stop".into(),
        };
        assert_eq!(err.to_string(), "Invalid axis 'gate': start equals stop");
    }

    #[test]
    fn test_failure_keeps_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("GPIB timeout"))
            .context("read of dmm1 failed")
            .unwrap_err();
        let failure = SweepFailure::from_error(&err, 4);

        assert_eq!(failure.message, "read of dmm1 failed");
        assert_eq!(failure.causes, vec!["GPIB timeout".to_string()]);
        assert_eq!(failure.samples_recorded, 4);
        assert_eq!(failure.to_string(), "read of dmm1 failed: GPIB timeout");
    }

    #[test]
    fn test_failure_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let failure = SweepFailure::from_panic(payload.as_ref(), 0);
        assert_eq!(failure.message, "step routine panicked: boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        let failure = SweepFailure::from_panic(payload.as_ref(), 0);
        assert_eq!(failure.message, "step routine panicked: owned boom");
    }
}
