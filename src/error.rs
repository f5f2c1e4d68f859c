use thiserror::Error;

/// Coarse error category, one per failure class a caller can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    InvalidArgument,
    UnsupportedFormat,
    OutOfMemory,
    ResourceExhausted,
    Io,
    Protocol,
    Timeout,
    Config,
}

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("{operation} is not valid while the device is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Unsupported pixel format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Out of memory: {details}")]
    OutOfMemory { details: String },

    #[error("Resource exhausted: {details}: {source}")]
    ResourceExhausted {
        details: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Control protocol error: {message}")]
    Protocol { message: String },

    #[error("Capture thread terminated abnormally: {details}")]
    ThreadPanicked { details: String },

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),
}

impl CameraError {
    pub fn invalid_state<S: Into<String>>(operation: &'static str, state: S) -> Self {
        Self::InvalidState {
            operation,
            state: state.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(details: S) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }

    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            Self::Io { .. } | Self::ThreadPanicked { .. } => ErrorKind::Io,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Config(_) | Self::Serialization(_) => ErrorKind::Config,
        }
    }

    /// Negative errno status code for callers that speak `status_t`.
    pub fn status_code(&self) -> i32 {
        let errno = match self {
            Self::InvalidState { .. }
            | Self::InvalidArgument { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Config(_)
            | Self::Serialization(_) => libc::EINVAL,
            Self::OutOfMemory { .. } => libc::ENOMEM,
            Self::ResourceExhausted { source, .. } => source.raw_os_error().unwrap_or(libc::EMFILE),
            Self::Io { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            Self::ThreadPanicked { .. } => libc::EIO,
            Self::Protocol { .. } => libc::EPROTO,
            Self::Timeout { .. } => libc::ETIMEDOUT,
        };
        -errno
    }
}

/// Status code for a finished operation: `0` on success.
pub fn status_of<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => e.status_code(),
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
