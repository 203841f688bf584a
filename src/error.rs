//! Error taxonomy of the simulation core.

use thiserror::Error;

/// Errors produced by the simulation core.
///
/// Extinction is not an error: it is reported through [`crate::model::Status`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    /// Invalid topology, out-of-bounds trait or unstable time step.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Divergent learning or population values during a run.
    #[error("numerical instability at step {step}: {reason}")]
    NumericalInstability { step: usize, reason: String },
}

impl SimError {
    /// Create a numerical instability error whose step is filled in by the engine.
    pub fn instability(reason: impl Into<String>) -> Self {
        Self::NumericalInstability {
            step: 0,
            reason: reason.into(),
        }
    }

    /// Attach the step index at which the error was detected.
    pub fn at_step(self, step: usize) -> Self {
        match self {
            Self::NumericalInstability { reason, .. } => {
                Self::NumericalInstability { step, reason }
            }
            other => other,
        }
    }
}

/// Convert an `anyhow` validation chain into a configuration error.
impl From<anyhow::Error> for SimError {
    fn from(error: anyhow::Error) -> Self {
        Self::Configuration(format!("{error:#}"))
    }
}
