use std::fmt;

/// Machine-readable classification of an [`Error`].
///
/// Mirrors the taxonomy used throughout the ingestion client: every fallible
/// operation raises exactly one of these, never a bare string.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    CouldNotResolveAddr,
    InvalidApiCall,
    SocketError,
    InvalidUtf8,
    InvalidName,
    InvalidTimestamp,
    AuthError,
    TlsError,
    HttpNotSupported,
    ServerFlushError,
    ConfigError,
    ProtocolVersionError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::CouldNotResolveAddr => "could not resolve address",
            ErrorCode::InvalidApiCall => "invalid api call",
            ErrorCode::SocketError => "socket error",
            ErrorCode::InvalidUtf8 => "invalid utf-8",
            ErrorCode::InvalidName => "invalid name",
            ErrorCode::InvalidTimestamp => "invalid timestamp",
            ErrorCode::AuthError => "authentication error",
            ErrorCode::TlsError => "tls error",
            ErrorCode::HttpNotSupported => "operation not supported over http",
            ErrorCode::ServerFlushError => "server flush error",
            ErrorCode::ConfigError => "configuration error",
            ErrorCode::ProtocolVersionError => "protocol version error",
        };
        f.write_str(s)
    }
}

/// The single error type returned by this crate.
///
/// Every variant below is a thin wrapper that attaches an [`ErrorCode`] and a
/// human-readable message to an optional lower-layer cause, in the spirit of
/// the teacher crate's `Error::Configuration(Box<dyn std::error::Error>)`
/// pattern: callers match on `.code()`, humans read `.to_string()`.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    code: ErrorCode,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        code: ErrorCode,
        message: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error {
            code,
            message: message.into(),
            cause: Some(Box::new(cause)),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

macro_rules! ctor {
    ($name:ident, $code:ident) => {
        impl Error {
            pub fn $name(message: impl Into<String>) -> Self {
                Error::new(ErrorCode::$code, message)
            }
        }
    };
}

ctor!(could_not_resolve_addr, CouldNotResolveAddr);
ctor!(invalid_api_call, InvalidApiCall);
ctor!(socket_error, SocketError);
ctor!(invalid_utf8, InvalidUtf8);
ctor!(invalid_name, InvalidName);
ctor!(invalid_timestamp, InvalidTimestamp);
ctor!(auth_error, AuthError);
ctor!(tls_error, TlsError);
ctor!(http_not_supported, HttpNotSupported);
ctor!(server_flush_error, ServerFlushError);
ctor!(config_error, ConfigError);
ctor!(protocol_version_error, ProtocolVersionError);

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_cause(ErrorCode::SocketError, err.to_string(), err)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::with_cause(ErrorCode::InvalidUtf8, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_and_message() {
        let err = Error::invalid_name("table name too long");
        let s = err.to_string();
        assert!(s.contains("invalid name"));
        assert!(s.contains("table name too long"));
    }

    #[test]
    fn cause_is_preserved() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert_eq!(err.code(), ErrorCode::SocketError);
        assert!(std::error::Error::source(&err).is_some());
    }
}
