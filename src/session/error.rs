//! Session start errors

use thiserror::Error;
use uuid::Uuid;

use crate::acquisition::AcquisitionError;
use crate::lifecycle::ResourceError;

#[derive(Debug, Error)]
pub enum StartError {
    #[error("positioning is disabled")]
    PositioningDisabled,

    #[error("a tracking session is already active ({session_id})")]
    SessionAlreadyActive { session_id: Uuid },

    #[error("could not keep the device awake: {0}")]
    ResourceAcquisition(#[from] ResourceError),

    #[error("position source failed to start: {0}")]
    SourceStart(#[source] AcquisitionError),

    #[error("stop was requested before the session finished starting")]
    Cancelled,
}

impl StartError {
    /// Failed a start precondition rather than a runtime step.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            StartError::PositioningDisabled | StartError::SessionAlreadyActive { .. }
        )
    }

    /// What the user can do about it.
    pub fn remediation(&self) -> &'static str {
        match self {
            StartError::PositioningDisabled => "Turn on location services and try again.",
            StartError::SessionAlreadyActive { .. } => {
                "Live tracking is already running. Stop the current delivery first."
            }
            StartError::ResourceAcquisition(_) => {
                "The device refused to stay awake for tracking. Close other tracking apps and retry."
            }
            StartError::SourceStart(_) => "Location could not be read. Check the GPS signal and retry.",
            StartError::Cancelled => "Tracking was stopped while it was starting. Start it again if needed.",
        }
    }
}
