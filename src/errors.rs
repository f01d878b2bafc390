use crate::query;
use std::{error, fmt, io};

/// Classifies every way a connection's parse/handle/write cycle can fail.
///
/// Each non-[`ErrorKind::CleanEof`] variant carries a precompiled response
/// the connection loop can write back before closing, produced by
/// [`ErrorKind::as_response`].
#[derive(Debug, PartialEq)]
pub enum ErrorKind {
    /// Reader closed with zero bytes buffered. Not an error: a normal
    /// idle-connection shutdown. Never turned into a response.
    CleanEof,

    InvalidMethod,
    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    /// Request-line or header block exceeded its configured byte cap.
    HeaderTooLarge,
    /// Non-`HTTP/1.1` request-line protocol token.
    UnsupportedProtocol,
    /// Malformed request-line token, missing CRLF, or other structural defect.
    BadRequest,
    /// CR or LF found inside a header name/value (request smuggling attempt)
    /// or another header-syntax violation.
    InvalidHeader,
    InvalidContentLength,
    InvalidConnection,

    /// Chunk-size line is not hex, missing its terminating CRLF, or a
    /// chunk's trailing CRLF didn't match.
    MalformedChunk,
    /// Declared or accumulated body size exceeded its configured cap.
    PayloadTooLarge,
    #[allow(dead_code)]
    BodyMismatch { expected: usize, available: usize },

    /// A [`Response::body_bounded`](crate::Response::body_bounded) write
    /// pushed the body past the length it declared up front.
    ContentLengthOverflow,

    /// Handler returned an error after already committing a response.
    HandlerError,
    /// Read or write on the underlying endpoint failed outside normal
    /// protocol flow.
    EndpointError,
    /// Read deadline exceeded while waiting for the next pipelined request.
    Timeout,

    ServiceUnavailable,
    Io(IoError),
}

macro_rules! http_errors {
    ($($name:ident: $status_code:expr, $len:literal => $json:literal; )*) => {
        /// Precompiled `HTTP/1.1` response bytes for this error kind, or
        /// `None` for kinds that never reach the wire (e.g. [`ErrorKind::CleanEof`],
        /// [`ErrorKind::EndpointError`]).
        ///
        /// `json` selects between a structured JSON body
        /// ([`ServerLimits::json_errors`](crate::limits::ServerLimits::json_errors)
        /// `true`) and a bodyless plain response (`false`).
        pub(crate) const fn as_response(&self, json: bool) -> Option<&'static [u8]> {
            match (self, json) { $(
                (Self::$name { .. }, true) => Some(concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: ", $len, "\r\n",
                    "content-type: application/json\r\n",
                    "\r\n",
                    $json
                ).as_bytes()),
                (Self::$name { .. }, false) => Some(concat!(
                    "HTTP/1.1 ", $status_code, "\r\n",
                    "connection: close\r\n",
                    "content-length: 0\r\n",
                    "\r\n",
                ).as_bytes()),
            )* _ => None }
        }
    };
}

impl ErrorKind {
    http_errors! {
        InvalidMethod: "400 Bad Request", "55"
            => r#"{"error":"Invalid HTTP method","code":"INVALID_METHOD"}"#;
        InvalidUrl: "400 Bad Request", "51"
            => r#"{"error":"Invalid URL format","code":"INVALID_URL"}"#;
        Query: "400 Bad Request", "55"
            => r#"{"error":"Invalid query string","code":"INVALID_QUERY"}"#;

        HeaderTooLarge: "431 Request Header Fields Too Large", "54"
            => r#"{"error":"Request header fields too large","code":"HEADER_TOO_LARGE"}"#;
        UnsupportedProtocol: "505 HTTP Version Not Supported", "67"
            => r#"{"error":"HTTP version not supported","code":"UNSUPPORTED_PROTOCOL"}"#;
        BadRequest: "400 Bad Request", "49"
            => r#"{"error":"Malformed request","code":"BAD_REQUEST"}"#;
        InvalidHeader: "400 Bad Request", "57"
            => r#"{"error":"Invalid header format","code":"INVALID_HEADER"}"#;
        InvalidContentLength: "400 Bad Request", "66"
            => r#"{"error":"Invalid Content-Length","code":"INVALID_CONTENT_LENGTH"}"#;
        InvalidConnection: "400 Bad Request", "65"
            => r#"{"error":"Invalid Connection header","code":"INVALID_CONNECTION"}"#;

        MalformedChunk: "400 Bad Request", "58"
            => r#"{"error":"Malformed chunked body","code":"MALFORMED_CHUNK"}"#;
        PayloadTooLarge: "413 Payload Too Large", "58"
            => r#"{"error":"Request body too large","code":"BODY_TOO_LARGE"}"#;
        BodyMismatch: "400 Bad Request", "55"
            => r#"{"error":"Body length mismatch","code":"BODY_MISMATCH"}"#;

        ContentLengthOverflow: "500 Internal Server Error", "66"
            => r#"{"error":"Response exceeded Content-Length","code":"LENGTH_OVERFLOW"}"#;

        HandlerError: "500 Internal Server Error", "51"
            => r#"{"error":"Handler error","code":"HANDLER_ERROR"}"#;

        ServiceUnavailable: "503 Service Unavailable", "72"
            => r#"{"error":"Service temporarily unavailable","code":"SERVICE_UNAVAILABLE"}"#;
        Io: "503 Service Unavailable", "48"
            => r#"{"error":"I/O error occurred","code":"IO_ERROR"}"#;
    }

    /// Whether this kind indicates the underlying endpoint is no longer usable
    /// for a best-effort response (no `WriteHeader` attempt should be made).
    pub(crate) const fn is_silent(&self) -> bool {
        matches!(self, Self::CleanEof | Self::EndpointError | Self::Timeout)
    }
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::TimedOut {
            return ErrorKind::Timeout;
        }
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
