//! Error types for VM, runtime and marshaling operations
//!
//! [`VmError`] is what every public operation reports. Errors are terminal for
//! the call that raised them, never for the VM: after a
//! [`VmError::CycleLimitExceeded`] or [`VmError::EngineException`] the VM
//! stays usable, though side effects of the aborted call remain.

use crate::engine::EngineError;
use thiserror::Error;

/// Errors surfaced by [`ForkableVm`](crate::ForkableVm),
/// [`Runtime`](crate::runtime::Runtime) and [`StandIn`](crate::StandIn)
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    /// The VM was disposed; nothing can run on it anymore
    #[error("VM has been disposed")]
    AlreadyDisposed,

    /// Another operation holds the VM
    #[error("VM operation already in progress")]
    OperationInProgress,

    /// A snapshot does not fit the memory of the runtime it is restored into
    #[error("Snapshot size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// No metadata block could be located in restored memory
    #[error("Corrupt snapshot: runtime metadata block not found")]
    CorruptSnapshot,

    /// The call's cycle budget ran out
    #[error("Cycle limit exceeded: {cycles} cycles used, limit {limit}")]
    CycleLimitExceeded { limit: u64, cycles: u64 },

    /// A host value that cannot be converted to an engine value
    #[error("Unsupported argument type: {0}")]
    UnsupportedArgumentType(String),

    /// A property key the engine cannot represent
    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    /// Accessor descriptors cannot be forwarded
    #[error("Unsupported property descriptor: accessors are not supported")]
    UnsupportedDescriptor,

    /// An exception thrown by guest code, as rendered by the engine
    #[error("{0}")]
    EngineException(String),

    /// Host-side engine failure
    #[error("engine error: {0}")]
    Engine(EngineError),
}

impl VmError {
    /// `true` for errors raised by guest code rather than the host.
    pub fn is_guest_error(&self) -> bool {
        matches!(
            self,
            VmError::EngineException(_) | VmError::CycleLimitExceeded { .. }
        )
    }
}

/// Mapping for engine failures outside a metered call.
///
/// A bare [`EngineError::Interrupted`] keeps its textual form here; metered
/// calls turn it into [`VmError::CycleLimitExceeded`] before this applies.
impl From<EngineError> for VmError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Exception(text) => VmError::EngineException(text),
            EngineError::Interrupted => VmError::EngineException(err.to_string()),
            EngineError::SizeMismatch { expected, actual } => {
                VmError::SizeMismatch { expected, actual }
            }
            other => VmError::Engine(other),
        }
    }
}

pub type VmResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        assert_eq!(
            VmError::from(EngineError::Exception("TypeError: x".into())),
            VmError::EngineException("TypeError: x".into())
        );
        assert_eq!(
            VmError::from(EngineError::Interrupted),
            VmError::EngineException("InternalError: interrupted".into())
        );
        assert_eq!(
            VmError::from(EngineError::SizeMismatch {
                expected: 4,
                actual: 2
            }),
            VmError::SizeMismatch {
                expected: 4,
                actual: 2
            }
        );
        assert_eq!(
            VmError::from(EngineError::Uninitialized),
            VmError::Engine(EngineError::Uninitialized)
        );
    }

    #[test]
    fn test_display_texts() {
        assert_eq!(VmError::AlreadyDisposed.to_string(), "VM has been disposed");
        assert_eq!(
            VmError::OperationInProgress.to_string(),
            "VM operation already in progress"
        );
        assert!(VmError::SizeMismatch {
            expected: 8,
            actual: 4
        }
        .to_string()
        .starts_with("Snapshot size mismatch"));
        assert_eq!(
            VmError::UnsupportedArgumentType("function".into()).to_string(),
            "Unsupported argument type: function"
        );
        assert_eq!(
            VmError::EngineException("Error: boom".into()).to_string(),
            "Error: boom"
        );
    }
}
