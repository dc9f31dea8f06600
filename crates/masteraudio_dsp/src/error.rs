//! DSP Error Types

use thiserror::Error;

use crate::attributes::AttributeId;

/// Errors that can occur while negotiating formats or pulling audio
/// through the filter graph
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid bus index: {bus} (filter has {count})")]
    InvalidBus { bus: usize, count: usize },

    #[error("Missing attribute: {0:?}")]
    MissingAttribute(AttributeId),

    #[error("Attribute {0:?} holds a different type")]
    TypeMismatch(AttributeId),

    #[error("Format not supported: {0}")]
    NotSupported(String),

    /// Transient: the destination has no room for the whole request
    #[error("Buffer full: requested {requested} bytes, {available} free")]
    BusyOrFull { requested: usize, available: usize },

    /// Transient: upstream has not buffered enough data yet
    #[error("Need data: requested {requested} bytes, {available} buffered")]
    NeedData { requested: usize, available: usize },

    #[error("Buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Input of {len} bytes is not a whole number of {frame_size}-byte codec frames")]
    FrameMisaligned { len: usize, frame_size: usize },

    #[error("Internal DSP error: {0}")]
    Internal(String),
}

impl DspError {
    /// Steady-state conditions the caller is expected to retry, not faults
    pub fn is_transient(&self) -> bool {
        matches!(self, DspError::BusyOrFull { .. } | DspError::NeedData { .. })
    }
}

/// Result type alias for DSP operations
pub type DspResult<T> = Result<T, DspError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidBus { bus: 3, count: 1 };
        assert!(err.to_string().contains('3'));

        let err = DspError::MissingAttribute(AttributeId::SampleRate);
        assert!(err.to_string().contains("SampleRate"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DspError::NeedData { requested: 8, available: 4 }.is_transient());
        assert!(DspError::BusyOrFull { requested: 8, available: 4 }.is_transient());
        assert!(!DspError::NotSupported("dts".into()).is_transient());
        assert!(!DspError::Internal("boom".into()).is_transient());
    }
}
