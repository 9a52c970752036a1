/// Result alias that carries the custom [`RepellerError`] type.
pub type Result<T> = std::result::Result<T, RepellerError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum RepellerError {
    /// The output graph could not be created, typically because no audio
    /// device is present or the platform has not granted playback yet. The
    /// engine stays stopped and `start` may be retried.
    #[error("audio output unavailable: {0}")]
    OutputUnavailable(String),
    /// Caller supplied a value the core refuses to act on.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("settings could not be parsed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("spectrum analysis failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl RepellerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<&str> for RepellerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for RepellerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
