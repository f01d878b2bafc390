use crate::{
    errors::ErrorKind,
    http::{
        request::{Parser, Request},
        response::Response,
    },
    limits::{ConnLimits, ReqLimits, RespLimits, ServerLimits},
    log,
    server::server_impl::{AllLimits, Handler},
    Handled,
};
use std::{
    future::Future,
    io,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{io::AsyncWriteExt, net::TcpStream, time::sleep};

pub(crate) struct HttpConnection<H: Handler<S>, S: ConnectionData> {
    handler: Arc<H>,
    connection_data: S,

    connection: Connection,
    remote_addr: Option<SocketAddr>,
    pub(crate) parser: Parser,
    pub(crate) request: Request,
    pub(crate) response: Response,

    pub(crate) server_limits: ServerLimits,
    pub(crate) conn_limits: ConnLimits,
    pub(crate) req_limits: ReqLimits,
    pub(crate) resp_limits: RespLimits,
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    pub(crate) fn new(handler: Arc<H>, limits: AllLimits) -> Self {
        Self {
            handler,
            connection_data: S::new(),

            connection: Connection::new(),
            remote_addr: None,
            parser: Parser::new(&limits.2),
            request: Request::new(&limits.2),
            response: Response::new(&limits.3),

            server_limits: limits.0,
            conn_limits: limits.1,
            req_limits: limits.2,
            resp_limits: limits.3,
        }
    }

    #[inline]
    fn reset_request_response(&mut self) {
        self.parser.reset();
        self.request.reset();
        self.response.reset(&self.resp_limits);
    }
}

impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Runs the serve loop for one accepted TCP stream until the connection
    /// is closed (cleanly, by the peer, or by a fatal error).
    #[inline]
    pub(crate) async fn run(
        &mut self,
        stream: &mut TcpStream,
        client_addr: SocketAddr,
    ) -> Result<(), io::Error> {
        self.remote_addr = Some(client_addr);

        match self.impl_run(stream).await {
            Ok(()) => Ok(()),
            Err(ErrorKind::Io(e)) => Err(e.0),
            // Silent kinds (clean EOF, endpoint failure, read-deadline
            // expiry) get no best-effort response: the stream is either
            // already gone or waiting on it further would only stall.
            Err(error) if error.is_silent() => Ok(()),
            Err(error) => {
                log::warning!("closing connection after {:?}", error);
                self.conn_limits
                    .send_error(stream, error, self.server_limits.json_errors)
                    .await
            }
        }
    }

    /// The per-connection state machine: `New -> Active -> Idle -> Active
    /// -> ... -> Closed`. Every step below corresponds to one iteration of
    /// the request/response cycle.
    #[inline]
    pub(crate) async fn impl_run(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        self.connection.reset();
        self.connection_data.reset();

        loop {
            if self.connection.is_closed() {
                return Ok(());
            }
            self.connection.set_state(ConnState::Active);

            self.reset_request_response();

            log::trace!("awaiting next request");
            match self.parse(stream).await {
                Ok(()) => {}
                Err(ErrorKind::CleanEof) => {
                    self.connection.close();
                    return Ok(());
                }
                Err(error) => {
                    self.connection.close();
                    return Err(error);
                }
            }
            log::trace!(
                "parsed request, body {} bytes",
                self.request.body().map_or(0, <[u8]>::len)
            );

            if let Some(addr) = self.remote_addr {
                self.request.set_remote_addr(addr);
            }
            if self.request.close() {
                self.response.keep_alive = false;
            }

            self.handler
                .handle(&mut self.connection_data, &self.request, &mut self.response)
                .await;

            if let Some(error) = self.response.take_failure() {
                self.connection.close();
                return Err(error);
            }

            self.conn_limits
                .write_bytes(stream, self.response.buffer())
                .await?;

            self.connection.request_count += 1;

            if self.should_close() {
                self.connection.close();
                log::debug!("connection closed after {} request(s)", self.connection.request_count);
                return Ok(());
            }

            self.connection.set_state(ConnState::Idle);
        }
    }

    /// Whether the connection should end after the response just flushed:
    /// the peer or handler asked for `close`, the per-connection request
    /// cap was reached, or the connection has outlived its configured
    /// lifetime.
    #[inline]
    fn should_close(&self) -> bool {
        let limits = &self.conn_limits;

        !self.response.keep_alive
            || (limits.max_requests_per_connection != 0
                && self.connection.request_count >= limits.max_requests_per_connection)
            || (!limits.connection_lifetime.is_zero()
                && self.connection.created.elapsed() > limits.connection_lifetime)
    }
}

impl ConnLimits {
    #[inline]
    pub(crate) async fn send_error(
        &self,
        stream: &mut TcpStream,
        error: ErrorKind,
        json_errors: bool,
    ) -> Result<(), io::Error> {
        match error.as_response(json_errors) {
            Some(bytes) => self.write_bytes(stream, bytes).await,
            None => Ok(()),
        }
    }

    #[inline]
    pub(crate) async fn write_bytes(
        &self,
        stream: &mut TcpStream,
        response: &[u8],
    ) -> Result<(), io::Error> {
        tokio::select! {
            biased;

            result = stream.write_all(response) => result,
            _ = sleep(self.socket_write_timeout) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "write timeout"))
            },
        }
    }
}

//

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    New = 0,
    Active = 1,
    Idle = 2,
    Closed = 3,
}

/// Per-connection bookkeeping: age, request count, and lifecycle state.
///
/// `state` is the only piece touched outside the serve loop — [`Connection::close`]
/// is a plain atomic store, so it's safe to call from any thread (e.g. a
/// future graceful-shutdown signal) without synchronizing with the task
/// that's running [`HttpConnection::impl_run`].
#[derive(Debug)]
pub(crate) struct Connection {
    created: Instant,
    request_count: usize,
    state: AtomicU8,
}

impl Connection {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            created: Instant::now(),
            request_count: 0,
            state: AtomicU8::new(ConnState::New as u8),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.created = Instant::now();
        self.request_count = 0;
        *self.state.get_mut() = ConnState::New as u8;
    }

    #[inline]
    fn set_state(&self, state: ConnState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == ConnState::Closed as u8
    }

    /// Idempotent; safe to call concurrently with the serve loop from any
    /// thread. The serve loop only observes `Closed` at the top of its next
    /// iteration, so this requests a close rather than forcing one.
    #[inline]
    pub(crate) fn close(&self) {
        self.state.store(ConnState::Closed as u8, Ordering::Release);
    }
}

//

/// Storing per-connection user data across the requests of one HTTP
/// keep-alive connection.
///
/// This trait allows you to store arbitrary state (e.g., authentication
/// data, multistep form status, cache, etc.). The state is available
/// across all requests within a single HTTP keep-alive connection.
///
/// # Examples
/// ```no_run
/// use httpcore::ConnectionData;
/// use std::collections::HashMap;
///
/// struct MyConnectionData {
///     user_id: Option<i32>,
///     request_count: usize,
///     cache: HashMap<usize, [u8; 4]>,
/// }
///
/// impl ConnectionData for MyConnectionData {
///     fn new() -> Self {
///         Self {
///             user_id: None,
///             request_count: 0,
///             cache: HashMap::new(),
///         }
///     }
///
///     fn reset(&mut self) {
///         self.user_id = None;
///         self.request_count = 0;
///         self.cache.clear(); // Saving the allocated memory
///     }
/// }
/// ```
pub trait ConnectionData: Sync + Send + 'static {
    /// Creates a new instance of user data.
    ///
    /// It is called once at server startup, which avoids runtime allocations.
    fn new() -> Self;

    /// Resets the internal state of the instance to its initial values.
    ///
    /// It is called after the connection is closed. Allows repeated
    /// use of the instance for the following connections. If implemented
    /// correctly, avoids any allocations.
    fn reset(&mut self);
}

impl ConnectionData for () {
    #[inline(always)]
    fn new() -> Self {}

    #[inline(always)]
    fn reset(&mut self) {}
}

/// A trait for filtering TCP connections before HTTP processing.
///
/// # Examples
///
/// Simple IP Blacklist:
/// ```
/// use std::{collections::HashSet, net::{SocketAddr, IpAddr}};
/// use httpcore::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// struct MyConnFilter {
///     blacklist: HashSet<IpAddr>
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(
///         &self, client_addr: SocketAddr, _: SocketAddr, err_resp: &mut Response
///     ) -> Result<(), Handled> {
///         if self.blacklist.contains(&client_addr.ip()) {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("Your IP is permanently banned"))
///         } else {
///             Ok(())
///         }
///     }
/// }
/// ```
/// File-based IP blacklist:
/// ```
/// use std::net::SocketAddr;
/// use httpcore::{Server, ConnectionFilter, Response, Handled, StatusCode};
///
/// # struct DatabaseClient;
/// #
/// # impl DatabaseClient {
/// #     async fn execute(&self, _: &str) -> Option<Vec<&str>> {
/// #         Some(vec!["true"])
/// #     }
/// # }
/// #
/// #
/// struct MyConnFilter {
///     db: DatabaseClient
/// }
///
/// impl ConnectionFilter for MyConnFilter {
///     fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
///         Ok(())
///     }
///
///     async fn filter_async(
///         &self,
///         client_addr: SocketAddr,
///         _: SocketAddr,
///         err_resp: &mut Response,
///     ) -> Result<(), Handled> {
///         let request = format!(
///             "SELECT EXISTS (SELECT 1 FROM ip_blacklist WHERE ip_address = '{}')",
///             client_addr.ip()
///         );
///
///         if self.db.execute(&request).await == Some(vec!["false"]) {
///             Ok(()) // IP not found in blacklist
///         } else {
///             Err(err_resp
///                 .status(StatusCode::Forbidden)
///                 .body("IP found in blacklist file"))
///         }
///     }
/// }
/// ```
/// # Connection Filter Architecture
/// ```text
///                     [ QUEUE TCP_STREAM ]
///                              ||
/// /----------------------------||----------------------------------\
/// |                            || TCP_STREAM            Tokio Task |
/// |       /=====================/                                  |
/// |       \/                                                       |
/// |   [--------]   Err(Handled)   [----------------------]         |
/// |   [ filter ] ===============> [ Send `error_response`]         |
/// |   [--------]                  [----------------------]         |
/// |       ||                                 /\                    |
/// |       || Ok(())                          ||                    |
/// |       \/                Err(Handled)     ||                    |
/// |   [--------------] ========================/                   |
/// |   [ filter_async ]                             [-----------]   |
/// |   [--------------] ==========================> [  Handler  ]   |
/// |                             Ok(())             [-----------]   |
/// |                                                                |
/// \----------------------------------------------------------------/
/// ```
pub trait ConnectionFilter: Sync + Send + 'static {
    /// Synchronous connection validation.
    ///
    /// Perform fast, in-memory checks here. Expensive operations should be deferred
    /// to [`filter_async`](Self::filter_async).
    ///
    /// Use for:
    /// - IP blacklist/whitelist (in-memory cache)
    /// - Geographic IP restrictions
    /// - Rate limiting counters
    fn filter(
        &self,
        client_addr: SocketAddr,
        server_addr: SocketAddr,
        error_response: &mut Response,
    ) -> Result<(), Handled>;

    /// Asynchronous connection inspection.
    ///
    /// Called after [`filter`](Self::filter) succeeds. Executes asynchronously within
    /// the Tokio runtime.
    ///
    /// Use for:
    /// - Database lookups
    /// - External API calls
    /// - File system operations
    /// - Complex business logic
    /// - Machine learning inference
    fn filter_async(
        &self,
        #[allow(unused_variables)] client_addr: SocketAddr,
        #[allow(unused_variables)] server_addr: SocketAddr,
        #[allow(unused_variables)] error_response: &mut Response,
    ) -> impl Future<Output = Result<(), Handled>> + Send {
        async { Ok(()) }
    }
}

impl ConnectionFilter for () {
    fn filter(&self, _: SocketAddr, _: SocketAddr, _: &mut Response) -> Result<(), Handled> {
        Ok(())
    }
}

//

#[cfg(test)]
mod def_handler {
    use super::*;
    use crate::{Handled, StatusCode};

    pub(crate) struct DefHandler;

    impl Handler<()> for DefHandler {
        async fn handle(&self, _: &mut (), _: &Request, r: &mut Response) -> Handled {
            r.status(StatusCode::Ok).body("test")
        }
    }

    impl HttpConnection<DefHandler, ()> {
        #[inline]
        pub(crate) fn from_req<V: AsRef<[u8]>>(value: V) -> Self {
            let req_limits = ReqLimits::default().precalculate();
            let resp_limits = RespLimits::default();

            Self {
                handler: Arc::new(DefHandler),
                connection_data: (),

                connection: Connection::new(),
                remote_addr: None,
                parser: Parser::from(&req_limits, value),
                request: Request::new(&req_limits),
                response: Response::new(&resp_limits),

                server_limits: ServerLimits::default(),
                conn_limits: ConnLimits::default(),
                req_limits,
                resp_limits,
            }
        }
    }

    #[test]
    fn closes_after_max_requests() {
        let mut conn = HttpConnection::<DefHandler, ()>::from_req("");
        conn.conn_limits.max_requests_per_connection = 2;
        conn.connection.request_count = 2;
        assert!(conn.should_close());
    }

    #[test]
    fn stays_open_below_max_requests() {
        let mut conn = HttpConnection::<DefHandler, ()>::from_req("");
        conn.conn_limits.max_requests_per_connection = 2;
        conn.connection.request_count = 1;
        conn.response.keep_alive = true;
        assert!(!conn.should_close());
    }

    #[test]
    fn state_machine_starts_new_and_closes_idempotently() {
        let conn = Connection::new();
        assert!(!conn.is_closed());

        conn.set_state(ConnState::Active);
        assert!(!conn.is_closed());

        conn.close();
        conn.close();
        assert!(conn.is_closed());
    }
}
