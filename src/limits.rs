//! Server configuration limits and timeouts.
//!
//! # Security-first defaults
//!
//! Default limits are intentionally conservative to prevent:
//! - Resource exhaustion attacks
//! - Memory overflows
//! - Slowloris attacks
//! - Header flooding
//!
//! # Memory consumption
//!
//! Each active connection consumes memory according to:
//!
//! `Total` = [`Request Buffer`](crate::limits::ReqLimits#memory-allocation-strategy) +
//!           [`Response Buffer`](crate::limits::RespLimits#buffer-management) +
//!           `Runtime Overhead`
//!
//! See each component's documentation for details and configuration options.
//!
//! # Examples
//!
//! ```no_run
//! # httpcore::impt_default_handler!{MyHandler}
//! use httpcore::{Server, limits::{ConnLimits, ReqLimits, ServerLimits}};
//! use tokio::net::TcpListener;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Server::builder()
//!         .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
//!         .handler(MyHandler)
//!         .server_limits(ServerLimits {
//!             max_connections: 5000, // Higher concurrency
//!             ..ServerLimits::default()
//!         })
//!         .connection_limits(ConnLimits {
//!             keep_alive_timeout: Duration::from_secs(5),
//!             max_requests_per_connection: 10_000,
//!             ..ConnLimits::default()
//!         })
//!         .request_limits(ReqLimits {
//!             header_count: 48,      // More headers for complex APIs
//!             body_size: 16 * 1024,  // 16KB cap for larger payloads
//!             ..ReqLimits::default()
//!         })
//!         .build()
//!         .launch()
//!         .await;
//! }
//! ```

use crate::http::headers;
use std::time::Duration;

/// Controls server-level concurrency, queueing, and admission behavior.
///
/// Configures how the server handles connection admission, worker pools,
/// and overload protection with tunable parameters for different workloads.
///
/// # Connection management
/// ```text
///                            [------------]
///                            [ Tcp accept ]
///                            [------------]
///                                  ||
///                                  || TCP_STREAM
///                                  \/
/// [--------------]   Yes   /----------------\   No   [-------------]
/// [ Add to queue ] <====== | Queue if full? | =====> [ Sending 503 ]
/// [--------------]         \----------------/        [-------------]
///        ||
///        \==================\\          //====================\
///                            V          V                    ||
/// [---------]   Yes   /--------------------------\   No   [------]
/// [ Handler ] <====== | Is there a free handler? | =====> [ Wait ]
/// [---------]         \--------------------------/        [------]
/// ```
///
/// The queue acts as a buffer between connection acceptance and processing.
/// Workers continuously poll the queue using the configured `wait_strategy`.
///
/// # Handler
/// A worker process is a continuously running asynchronous task, created once
/// during initialization (from [tokio::spawn]). It runs in an infinite loop,
/// processing connections from a shared queue, which is replenished by a TCP
/// listener. This design eliminates the need to create tasks for each connection,
/// allowing efficient resource reuse across an unlimited number of connections.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    /// Maximum number of concurrent active connections being processed (default: `100`).
    ///
    /// When the server starts, exactly `max_connections` [handlers](#handler) are
    /// created and used.
    pub max_connections: usize,

    /// Maximum number of TCP connections waiting in the admission queue (default: `250`).
    ///
    /// All accepted connections first go into this queue. Worker processes select
    /// connections from here. If the queue becomes full, new connections receive immediate
    /// HTTP `503` responses.
    ///
    /// For more information, see [Connection management](#connection-management).
    pub max_pending_connections: usize,

    /// Strategy for worker task waiting behavior (default: `Sleep(50us)`).
    ///
    /// Controls how worker tasks wait when connection buffers are empty
    /// (the size is set by field `max_pending_connections`). Affects latency,
    /// CPU usage, and throughput characteristics.
    pub wait_strategy: WaitStrategy,

    /// Dedicated handlers for queue overflow responses (default: `1`).
    ///
    /// When the connection queue becomes full, these handlers immediately send
    /// responses with the [503](crate::StatusCode::ServiceUnavailable) code. Using
    /// multiple handlers prevents bottlenecks in scenarios with a large volume of
    /// rejected requests. Set to 0 to silently close the connection (not recommended
    /// for production HTTP servers).
    pub count_503_handlers: usize,

    /// Format for error responses (default: `true`).
    ///
    /// # Examples
    /// If `true`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 55\r
    /// content-type: application/json\r
    /// \r
    /// {"error":"Invalid HTTP method","code":"INVALID_METHOD"}
    /// ```
    /// If `false`, then on error the server will return:
    /// ```text
    /// HTTP/1.1 400 Bad Request\r
    /// connection: close\r
    /// content-length: 0\r
    /// \r
    /// ```
    pub json_errors: bool,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_pending_connections: 250,
            wait_strategy: WaitStrategy::Sleep(Duration::from_micros(50)),
            count_503_handlers: 1,
            json_errors: true,

            _priv: (),
        }
    }
}

/// Strategy for worker task waiting when no connections are available.
///
/// Different strategies optimize for different workload patterns.
/// Choose based on your latency requirements and resource constraints.
#[derive(Debug, Clone)]
pub enum WaitStrategy {
    /// While waiting, uses [`tokio::task::yield_now()`].
    ///
    /// # Note
    /// According to internal measurements, this keeps the CPU pegged near
    /// 97-99% while idle, so it is not recommended for production.
    Yield,

    /// While waiting, uses [`tokio::time::sleep()`].
    Sleep(Duration),
}

/// Connection-level limits and timeouts.
///
/// Controls the per-connection serve loop: keep-alive idle timeout, total
/// connection lifetime, and the request count at which a connection is
/// forcibly closed.
///
/// Default values balance performance, resource usage, and security.
/// Only change if you understand the consequences.
#[derive(Debug, Clone)]
pub struct ConnLimits {
    /// Idle keep-alive timeout (default: `60 seconds`).
    ///
    /// Set as the endpoint's read deadline before each inter-request read.
    /// If no bytes arrive within this window the connection is closed
    /// cleanly (not an error) — this is the primary defense against
    /// slowloris-style idle connections.
    pub keep_alive_timeout: Duration,

    /// Maximum duration to wait for writing data to the socket (default: `3 seconds`).
    ///
    /// If data can't be written in time, the connection is terminated.
    /// Applies to individual write operations.
    pub socket_write_timeout: Duration,

    /// Maximum number of requests allowed per connection (default: `0`, unlimited).
    ///
    /// Connection closes after processing this many requests when non-zero.
    /// Combined with `connection_lifetime`, ensures connections don't live
    /// indefinitely.
    pub max_requests_per_connection: usize,

    /// Maximum lifetime of a connection from establishment to closure
    /// (default: `0`, unlimited).
    ///
    /// A safety net that guarantees no connection lives longer than this
    /// duration regardless of keep-alive activity, when non-zero.
    pub connection_lifetime: Duration,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for ConnLimits {
    #[inline(always)]
    fn default() -> Self {
        Self {
            keep_alive_timeout: Duration::from_secs(60),
            socket_write_timeout: Duration::from_secs(3),
            connection_lifetime: Duration::ZERO,
            max_requests_per_connection: 0,

            _priv: (),
        }
    }
}

/// HTTP request parsing limits and buffer pre-allocation strategy.
///
/// **SECURITY-FIRST DEFAULTS**
///
/// These limits are intentionally conservative to prevent resource
/// exhaustion and various parsing attacks. They work well for:
/// - Simple REST APIs
/// - Microservices
/// - Internal tools
/// - Low-memory environments
///
/// You MAY need to increase these if you see:
/// - `413 Payload Too Large` for legitimate requests
/// - `414 URI Too Long` for normal API calls
/// - `431 Request Header Fields Too Large`
///
/// # Memory allocation strategy
///
/// Each connection pre-allocates a fixed-size accumulation buffer sized to
/// hold the request-line and header block:
///
/// ```text
/// Header Buffer = First Line + (header_count x Header Line) + Overhead
/// ```
///
/// The body is read separately: a bounded `Content-Length` body is read
/// directly into a growable scratch buffer up to `body_size` (or the
/// per-request declared length, whichever is smaller when `body_size == 0`
/// means unlimited); a chunked body streams through
/// [`ChunkedDecoder`](crate::http::chunked) with its own `max_chunk_size`
/// and `body_size` caps, so it never needs the whole body resident in the
/// header accumulation buffer.
///
/// ## Buffer size calculation (default values)
///
/// | Component | Formula | Size | Purpose |
/// |-----------|---------|------|---------|
/// | First Line | `19 + url_size` | 275 B | `METHOD URL HTTP/1.1\r\n` |
/// | Headers | `header_count x Header Line` | 6,208 B | Headers storage |
/// | Header Line | `header_name_size + header_value_size + 4` | 194 B | `Name: Value\r\n` |
/// | **Total** | **Sum + 2 bytes CRLF** | **~6.4 KB** | Per-connection header buffer |
///
/// # Example
/// ```
/// use httpcore::limits::ReqLimits;
///
/// let limits = ReqLimits::default();
/// let buffer_size = limits.estimated_buffer_size();
/// println!("Each connection needs {} bytes for its header buffer", buffer_size);
/// ```
#[derive(Debug, Clone)]
pub struct ReqLimits {
    /// Maximum URL length in bytes including path and query string (default: `256 B`).
    pub url_size: usize,
    /// Maximum number of path segments in the URL (default: `8`).
    pub url_parts: usize,
    /// Maximum query string length (default: `128 B`).
    pub url_query_size: usize,
    /// Maximum number of query parameters (default: `8`).
    pub url_query_parts: usize,

    /// Maximum number of headers per request (default: `32`, matching the
    /// header container's [inline capacity](crate::http::headers::INLINE_CAPACITY)).
    pub header_count: usize,
    /// Maximum header name length in bytes (default: `64 B`, matching
    /// [`headers::MAX_NAME_LEN`]).
    pub header_name_size: usize,
    /// Maximum header value length accepted before it is forced to spill to
    /// overflow storage (default: `128 B`, matching
    /// [`headers::MAX_INLINE_VALUE_LEN`]).
    pub header_value_size: usize,

    /// Maximum size of a single chunk in a chunked-encoded body (default: `16 MiB`).
    pub max_chunk_size: usize,
    /// Maximum total request body size in bytes, `0` means unlimited (default: `0`).
    pub body_size: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub precalc: ReqLimitsPrecalc,
}

impl Default for ReqLimits {
    fn default() -> Self {
        Self {
            url_size: 256,
            url_parts: 8,
            url_query_size: 128,
            url_query_parts: 8,

            header_count: headers::INLINE_CAPACITY,
            header_name_size: headers::MAX_NAME_LEN,
            header_value_size: headers::MAX_INLINE_VALUE_LEN,

            max_chunk_size: crate::http::chunked::DEFAULT_MAX_CHUNK_SIZE,
            body_size: 0,

            precalc: ReqLimitsPrecalc::default(),
        }
    }
}

impl ReqLimits {
    /// Returns the estimated size of the per-connection header accumulation
    /// buffer required by the current limits (the body is not included — see
    /// the type-level docs).
    #[inline(always)]
    pub fn estimated_buffer_size(self) -> usize {
        self.precalculate().precalc.buffer
    }

    #[inline(always)]
    pub(crate) fn precalculate(mut self) -> Self {
        self.precalc.first_line = self.first_line();
        self.precalc.h_line = self.h_line();
        self.precalc.buffer = self.buffer();
        self.precalc.url_size_memchr = self.url_size + 1;

        self
    }

    #[inline(always)]
    // First line + Header * N + "\r\n"
    fn buffer(&self) -> usize {
        self.precalc.first_line + self.header_count * self.precalc.h_line + 2
    }

    #[inline(always)]
    // First line of an HTTP request:
    // CONNECT /url/test HTTP/1.1\r\n
    // |-----| |-------| |------|
    //  Method    URl    Version
    //
    // Formula: Method(7) + " " + URl + " " + Version(8) + "\r\n"
    // In Code: 19 + url_size
    fn first_line(&self) -> usize {
        19 + self.url_size
    }

    #[inline(always)]
    // Header:
    // Authorization: Sample%20Data\r\n
    // |-----------|  |-----------|
    //     Name           Value
    //
    // Formula: Name + ": " + Value +  "\r\n"
    // In Code: 4 + header_name_size + header_value_size
    fn h_line(&self) -> usize {
        self.header_name_size + self.header_value_size + 4
    }
}

#[doc(hidden)]
#[derive(Debug, Clone, Default)]
pub struct ReqLimitsPrecalc {
    pub(crate) buffer: usize,
    pub(crate) first_line: usize,
    pub(crate) h_line: usize,
    pub(crate) url_size_memchr: usize,
}

/// Configuration for response processing and memory allocation limits.
///
/// Controls how response buffers are allocated and managed to balance
/// memory usage and performance.
///
/// # Buffer management
///
/// Based on the configured limits, response buffers are managed as follows:
/// ```rust
/// # use httpcore::limits::RespLimits;
/// # let limits = RespLimits::default();
/// # let mut buffer: Vec<()> = Vec::with_capacity(limits.default_capacity);
/// #
/// // `buffer` is Vec
/// if buffer.capacity() > limits.max_capacity {
///     buffer = Vec::with_capacity(limits.default_capacity);
/// } else {
///     buffer.clear();
/// }
/// ```
///
/// When the server starts, buffers are created with a capacity equal to `default_capacity`.
#[derive(Debug, Clone)]
pub struct RespLimits {
    /// Initial buffer capacity allocated for responses (default: `1024 B`).
    pub default_capacity: usize,
    /// Maximum allowed buffer capacity for responses (default: `8192 B`).
    //
    // Note: if the response exceeds `max_capacity * 2`, it may be sent in 1 or more `syscall`s.
    pub max_capacity: usize,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            default_capacity: 1024,
            max_capacity: 8 * 1024,

            _priv: (),
        }
    }
}
