//! Error types for the alignment pipeline.

use thiserror::Error;

use crate::data::ImageReadError;
use crate::model::ObjectId;
use crate::registration::RegistrationError;

/// Errors that can occur while aligning annotations inside a container.
#[derive(Error, Debug)]
pub enum AlignError {
    /// No childless annotations were found under the container
    #[error("No annotations to align under object {parent}")]
    NoEligibleAnnotations {
        /// The container that was searched
        parent: ObjectId,
    },

    /// Object id not present in the hierarchy
    #[error("Object not found: {id}")]
    ObjectNotFound {
        /// The missing object id
        id: ObjectId,
    },

    /// The hierarchy has no TMA cores to align
    #[error("No TMA grid: the hierarchy contains no cores")]
    NoTmaGrid,

    /// An object with this id is already in the hierarchy
    #[error("Duplicate object id {id}")]
    DuplicateObject {
        /// The id that was already taken
        id: ObjectId,
    },

    /// Every object id is in use
    #[error("No object ids left to allocate")]
    IdsExhausted,

    /// The selected object cannot hold annotations for alignment
    #[error("Object {id} is not a TMA core")]
    NotAContainer {
        /// The offending object id
        id: ObjectId,
    },

    /// The requested region lies outside the image or has no area
    #[error("Region is empty: {message}")]
    EmptyRegion {
        /// Description of the region problem
        message: String,
    },

    /// Reading pixels from the image source failed
    #[error("Image read failed: {0}")]
    ImageRead(#[from] ImageReadError),

    /// A transform that must be inverted is singular
    #[error("Transform is not invertible (determinant {determinant})")]
    NonInvertible {
        /// Determinant of the linear part
        determinant: f64,
    },

    /// The registration solver failed numerically
    #[error("Registration failed: {0}")]
    Registration(#[from] RegistrationError),

    /// The run was cancelled by the caller
    #[error("Alignment cancelled")]
    Cancelled,

    /// The background worker thread is no longer running
    #[error("Alignment worker has stopped")]
    WorkerStopped,

    /// Configuration values are out of range
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the bad setting
        message: String,
    },
}

impl AlignError {
    /// Create an empty region error with a message.
    pub fn empty_region(message: impl Into<String>) -> Self {
        Self::EmptyRegion {
            message: message.into(),
        }
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// True for failures raised before any pixels were read.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NoEligibleAnnotations { .. }
                | Self::NoTmaGrid
                | Self::ObjectNotFound { .. }
                | Self::NotAContainer { .. }
                | Self::EmptyRegion { .. }
                | Self::InvalidConfig { .. }
        )
    }

    /// True when the run stopped because the caller asked it to.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Registration(RegistrationError::Cancelled { .. })
        )
    }
}
