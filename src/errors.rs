//! Error taxonomy for the gateway core.
//!
//! `DavError` is the single error type threaded through path parsing, the
//! property system, the lock manager, upload sessions and the method
//! handlers. `statuscode()` is the only place that maps it onto an HTTP
//! status, per the propagation policy in SPEC_FULL.md §7.

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

use crate::davpath::ParseError as PathParseError;

#[derive(Debug)]
pub enum DavError {
    /// RFC4918 `404 Not Found`.
    NotFound,
    /// Parent missing or name collision.
    Conflict,
    /// `If`/`Overwrite` precondition failed, or a lock token was required
    /// but absent/unknown.
    PreconditionFailed,
    /// A conflicting lock blocks this operation.
    Locked,
    /// Policy refusal (infinite-depth rejected, read-only mount, ...).
    Forbidden,
    /// Malformed request (bad Depth/If/Destination header, bad XML).
    BadRequest,
    /// MKCOL (or similar) received a non-empty body.
    UnsupportedMediaType,
    /// Backend reported a transient failure; retried internally up to 3x,
    /// surfaced as 503 if still failing.
    BackendTransient,
    /// Backend reported a non-retryable failure.
    BackendPermanent,
    /// Client disconnected; no response should be generated.
    Cancelled,
    /// Carries an already-decided status code (used by header/body parsing
    /// that wants to short-circuit with something more specific).
    Status(StatusCode),
    /// A status that also requires the response to close the connection.
    StatusClose(StatusCode),
    InvalidPath,
    IllegalPath,
    ForbiddenPath,
    UnknownDavMethod,
    XmlReadError,
    XmlParseError,
    IoError(std::io::Error),
    XmlReaderError(xml::reader::Error),
    XmlWriterError(xml::writer::Error),
}

impl StdError for DavError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::BackendTransient => write!(f, "backend transient failure"),
            DavError::BackendPermanent => write!(f, "backend failure"),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(e: std::io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<xml::reader::Error> for DavError {
    fn from(e: xml::reader::Error) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(s: StatusCode) -> Self {
        DavError::Status(s)
    }
}

impl From<PathParseError> for DavError {
    fn from(e: PathParseError) -> Self {
        match e {
            PathParseError::InvalidPath => DavError::InvalidPath,
            PathParseError::PrefixMismatch => DavError::IllegalPath,
            PathParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

fn ioerror_to_status(ioerror: &std::io::Error) -> StatusCode {
    use std::io::ErrorKind;
    match ioerror.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl DavError {
    pub fn statuscode(&self) -> StatusCode {
        match self {
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::Conflict => StatusCode::CONFLICT,
            DavError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            DavError::Locked => StatusCode::LOCKED,
            DavError::Forbidden => StatusCode::FORBIDDEN,
            DavError::BadRequest => StatusCode::BAD_REQUEST,
            DavError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DavError::BackendTransient => StatusCode::SERVICE_UNAVAILABLE,
            DavError::BackendPermanent => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Status(s) | DavError::StatusClose(s) => *s,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::IllegalPath => StatusCode::BAD_GATEWAY,
            DavError::ForbiddenPath => StatusCode::FORBIDDEN,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::XmlReadError | DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::IoError(e) => ioerror_to_status(e),
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the response to this error must close the connection (used
    /// for errors where the request body might not have been fully read).
    pub fn must_close(&self) -> bool {
        matches!(self, DavError::StatusClose(_))
    }
}

pub type DavResult<T> = Result<T, DavError>;
