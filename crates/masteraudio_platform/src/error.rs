//! Platform Error Types

use thiserror::Error;

/// Errors from renderer backends
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV writer error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::UnsupportedFormat("IEC61937 DTS".into());
        assert!(err.to_string().contains("DTS"));
    }
}
