use crate::{
    errors::*,
    http::{
        chunked::ChunkedDecoder,
        headers::HeaderContainer,
        types::{self, is_tchar},
    },
    limits::ReqLimits,
    query::Query,
    server::connection::HttpConnection,
    ConnectionData, Handler, Method, Url, Version,
};
use memchr::{memchr, memchr_iter};
use std::{mem, net::SocketAddr};
use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};

/// High-performance HTTP/1.1 request representation.
///
/// Uses strategic memory alignment for cache-friendly access. Method, URL,
/// and header data are zero-copy slices referencing the connection's pooled
/// parser buffers — valid only for the duration of the handler invocation
/// that receives this `Request`.
#[derive(Debug, Clone)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderContainer,
    body: Option<&'static [u8]>,
    is_chunked: bool,
    close: bool,
    remote_addr: Option<SocketAddr>,
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            headers: HeaderContainer::new(),
            body: None,
            is_chunked: false,
            close: false,
            remote_addr: None,
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.headers.reset();
        self.body = None;
        self.is_chunked = false;
        self.close = false;
        self.remote_addr = None;
    }

    #[inline(always)]
    pub(crate) fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The only protocol this engine accepts on the wire.
    #[inline(always)]
    pub const fn version(&self) -> Version {
        Version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present. `None`
    /// both when there's no body and when the body is chunked — use
    /// [`Request::is_chunked`] to tell the two apart.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Whether the body is framed with `Transfer-Encoding: chunked` rather
    /// than a declared `Content-Length`.
    #[inline(always)]
    pub const fn is_chunked(&self) -> bool {
        self.is_chunked
    }

    /// Returns the request body if present. Already fully decoded for
    /// chunked bodies — framing and trailers are never visible here.
    #[inline(always)]
    pub const fn body(&self) -> Option<&[u8]> {
        self.body
    }

    /// Whether the client (or the engine, on a fatal parse error) asked for
    /// the connection to close after this response.
    #[inline(always)]
    pub const fn close(&self) -> bool {
        self.close
    }

    /// The peer address this request arrived on, when known.
    #[inline(always)]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

// If you don't like using HttpConnection instead of transmitting all the
// values, then you can't even imagine what happened here...
// It's a pity now that you can understand this code (when passing all the
//  values, I didn't understand it myself):(
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    /// Parses one request off `stream`, reading further bytes as needed for
    /// the header block and, separately, the body. Bytes read past the
    /// request's terminator are retained in [`Parser::tail`] and consumed
    /// first by the next call — the pipelining hook.
    pub(crate) async fn parse(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        match self.read_headers(stream).await {
            Ok(()) => {}
            Err(e) => return Err(e),
        }

        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;
        self.parse_headers()?;
        self.read_body(stream).await?;

        Ok(())
    }

    /// Fills [`Parser::header_buf`] until a bare `CRLF CRLF` terminator is
    /// found, carrying over any bytes already buffered from a previous
    /// pipelined parse.
    async fn read_headers(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let parser = &mut self.parser;
        parser.position = 0;
        parser.header_filled = 0;

        if !parser.tail.is_empty() {
            let take = parser.tail.len().min(parser.header_buf.len());
            parser.header_buf[..take].copy_from_slice(&parser.tail[..take]);
            parser.header_filled = take;
            parser.tail.drain(..take);
        }

        let mut searched_from = 0usize;
        loop {
            if let Some(end) = parser.find_terminator(searched_from) {
                // Anything past the terminator belongs to the body or to the
                // next pipelined request; stash it and trim header_filled so
                // later header parsing never looks past it.
                if parser.header_filled > end {
                    parser.tail.extend_from_slice(&parser.header_buf[end..parser.header_filled]);
                }
                parser.header_filled = end;
                return Ok(());
            }
            searched_from = parser.header_filled.saturating_sub(3);

            if parser.header_filled >= parser.header_buf.len() {
                return Err(ErrorKind::HeaderTooLarge);
            }

            let dst = &mut parser.header_buf[parser.header_filled..];
            let read = match timeout(self.conn_limits.keep_alive_timeout, stream.read(dst)).await {
                Ok(r) => r?,
                Err(_) => return Err(ErrorKind::Timeout),
            };

            if read == 0 {
                return Err(if parser.header_filled == 0 {
                    ErrorKind::CleanEof
                } else {
                    ErrorKind::BadRequest
                });
            }
            parser.header_filled += read;
        }
    }

    /// Reads the request body, if any, following the semantics derived by
    /// [`HttpConnection::parse_headers`]'s Content-Length/Transfer-Encoding
    /// handling. Leaves any bytes past the body (the next pipelined
    /// request's header block) in [`Parser::tail`].
    async fn read_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        if self.request.is_chunked {
            return self.read_chunked_body(stream).await;
        }

        let Some(len) = self.request.headers.content_length else {
            self.request.body = None;
            return Ok(());
        };

        let parser = &mut self.parser;
        while parser.tail.len() < len {
            let mut scratch = [0u8; 4096];
            let want = (len - parser.tail.len()).min(scratch.len());
            let read = match timeout(
                self.conn_limits.keep_alive_timeout,
                stream.read(&mut scratch[..want]),
            )
            .await
            {
                Ok(r) => r?,
                Err(_) => return Err(ErrorKind::Timeout),
            };
            if read == 0 {
                return Err(ErrorKind::BodyMismatch {
                    expected: len,
                    available: parser.tail.len(),
                });
            }
            parser.tail.extend_from_slice(&scratch[..read]);
        }

        // Copy out before draining `tail` — `tail` keeps growing/shrinking
        // across pipelined requests, so a slice straight into it would
        // dangle the moment the next request's bytes are appended.
        parser.body_decoded.clear();
        parser.body_decoded.extend_from_slice(&parser.tail[..len]);
        parser.tail.drain(..len);

        // SAFETY: `body_decoded` is pooled on the Parser and stable until
        // the next `Request::reset`, by which point the handler has returned.
        let body: &'static [u8] = unsafe { mem::transmute(parser.body_decoded.as_slice()) };
        self.request.body = Some(body);
        Ok(())
    }

    async fn read_chunked_body(&mut self, stream: &mut TcpStream) -> Result<(), ErrorKind> {
        let mut decoder = ChunkedDecoder::new(self.req_limits.max_chunk_size, self.req_limits.body_size);
        let parser = &mut self.parser;
        parser.body_decoded.clear();

        loop {
            let consumed = decoder.decode(&parser.tail, &mut parser.body_decoded)?;
            parser.tail.drain(..consumed);
            if decoder.is_done() {
                break;
            }

            let mut scratch = [0u8; 4096];
            let read = match timeout(self.conn_limits.keep_alive_timeout, stream.read(&mut scratch)).await
            {
                Ok(r) => r?,
                Err(_) => return Err(ErrorKind::Timeout),
            };
            if read == 0 {
                return Err(ErrorKind::MalformedChunk);
            }
            parser.tail.extend_from_slice(&scratch[..read]);
        }

        // SAFETY: see `read_body` — `body_decoded` is pooled on the Parser
        // and stable until the next reset.
        let body: &'static [u8] = unsafe { mem::transmute(parser.body_decoded.as_slice()) };
        self.request.body = Some(body);
        Ok(())
    }
}

// Parse first line
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_method(&mut self) -> Result<(), ErrorKind> {
        // "OPTIONS " - the longest known method with its trailing space (8 bytes)
        let slice = self
            .parser
            .get_slice(0, 8)
            .ok_or(ErrorKind::InvalidMethod)?;

        let (method, consumed) = Method::from_bytes(slice)?;
        self.request.method = method;
        self.parser.position = consumed;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` due to ownership
    // error, and there's no need for `into_static` here.
    fn parse_url(&mut self) -> Result<(), ErrorKind> {
        let posit = self
            .parser
            .find_char(self.req_limits.precalc.url_size_memchr, b' ')
            .ok_or(ErrorKind::InvalidUrl)?;

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let start = parser.position;
        let slice_url = &parser.header_buf[start..start + posit];

        if slice_url.is_empty() || slice_url[0] != b'/' {
            return Err(ErrorKind::InvalidUrl);
        }

        let query_at = memchr(b'?', slice_url);
        let path_len = query_at.unwrap_or(posit);

        let mut last = 0;
        for index in memchr_iter(b'/', &slice_url[..path_len]) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl);
            }
            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;
            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }
        if last < path_len {
            let slice_part = parser
                .get_slice_static(start + last, path_len - last)
                .ok_or(ErrorKind::InvalidUrl)?;
            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
        }

        if let Some(q) = query_at {
            let query_slice = parser
                .get_slice_static(start + q, posit - q)
                .ok_or(ErrorKind::InvalidUrl)?;
            Query::parse_into(&mut url.query_parts, query_slice, self.req_limits.url_query_parts)?;
            url.query = Some(query_slice);
        }

        url.path = parser
            .get_slice_static(start, path_len)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(start, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);
        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> Result<(), ErrorKind> {
        // "HTTP/1.1\r\n" - the only accepted protocol token plus CRLF (10 bytes)
        let slice = self
            .parser
            .get_slice(self.parser.position, 10)
            .ok_or(ErrorKind::BadRequest)?;

        if &slice[8..] != b"\r\n" {
            return Err(ErrorKind::BadRequest);
        }
        Version::from_bytes(&slice[..8])?;
        self.parser.position += 10;

        Ok(())
    }
}

// Parse headers
impl<H: Handler<S>, S: ConnectionData> HttpConnection<H, S> {
    #[inline]
    fn parse_headers(&mut self) -> Result<(), ErrorKind> {
        for _ in 0..=self.req_limits.header_count {
            let Some((name, value)) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(name, value)? {
                self.request.headers.add(name, value)?;
            }
        }

        Err(ErrorKind::HeaderTooLarge)
    }

    /// Parses one `name ":" OWS value OWS CRLF` line, or `None` when the
    /// empty line terminating the header block is found instead.
    #[inline]
    fn parse_header(&mut self) -> Result<Option<(&'static [u8], &'static [u8])>, ErrorKind> {
        let parser = &mut self.parser;

        if parser.get_slice(parser.position, 2) == Some(b"\r\n") {
            parser.position += 2;
            return Ok(None);
        }

        let remaining = parser.header_filled - parser.position;
        let end = parser
            .find_char(remaining, b'\n')
            .ok_or(ErrorKind::InvalidHeader)?;
        if end == 0 || parser.header_buf[parser.position + end - 1] != b'\r' {
            return Err(ErrorKind::InvalidHeader);
        }
        let line_len = end - 1; // exclude the trailing \r, \n already excluded by find_char

        let Some(colon) = memchr(b':', &parser.header_buf[parser.position..parser.position + line_len])
        else {
            return Err(ErrorKind::InvalidHeader);
        };
        if colon == 0 {
            return Err(ErrorKind::InvalidHeader);
        }

        if colon > self.req_limits.header_name_size {
            return Err(ErrorKind::HeaderTooLarge);
        }

        let name = {
            let name_mut = parser
                .get_slice_mut(parser.position, colon)
                .ok_or(ErrorKind::InvalidHeader)?;
            if !name_mut.iter().all(|&b| is_tchar(b)) {
                return Err(ErrorKind::InvalidHeader);
            }
            unsafe { Parser::into_static(name_mut) }
        };

        // value ::= OWS *( visible / HTAB ) OWS, per RFC 7230's `name ":" OWS value OWS`.
        let value_region = &parser.header_buf[parser.position + colon + 1..parser.position + line_len];
        let leading_ows = value_region.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
        let trailing_ows = value_region[leading_ows..]
            .iter()
            .rev()
            .take_while(|&&b| b == b' ' || b == b'\t')
            .count();
        let value_start = parser.position + colon + 1 + leading_ows;
        let value_len = value_region.len() - leading_ows - trailing_ows;

        let value = parser
            .get_slice_static(value_start, value_len)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.position += end + 1;
        Ok(Some((name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, name: &[u8], value: &[u8]) -> Result<bool, ErrorKind> {
        if name.eq_ignore_ascii_case(b"content-length") {
            self.parse_content_length(value)
        } else if name.eq_ignore_ascii_case(b"connection") {
            self.parse_connection(value)
        } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
            self.parse_transfer_encoding(value)
        } else {
            return Ok(false);
        }
        .map(|_| true)
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if self.request.headers.content_length.is_some() {
            return Err(ErrorKind::InvalidContentLength);
        }
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if self.req_limits.body_size != 0 && len > self.req_limits.body_size {
            return Err(ErrorKind::PayloadTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    /// Per RFC 7230 6.1: `Connection` is a comma-separated list of
    /// connection-option tokens. Only `close` and `keep-alive` are
    /// recognized; any other token (e.g. `Upgrade`) is left alone rather
    /// than rejected, since its presence doesn't change persistence.
    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut recognized = false;

        for token in value.split(|&b| b == b',') {
            let token = trim_ows(token);
            if token.is_empty() {
                continue;
            }
            if token.eq_ignore_ascii_case(b"close") {
                self.request.close = true;
                recognized = true;
            } else if token.eq_ignore_ascii_case(b"keep-alive") {
                self.request.close = false;
                recognized = true;
            }
        }

        if recognized {
            Ok(())
        } else {
            Err(ErrorKind::InvalidConnection)
        }
    }

    /// Per RFC 7230 3.3.1: a comma-separated list of codings; `chunked` must
    /// be last when present. Any other non-final `chunked` is an error.
    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let last = value.rsplit(|&b| b == b',').next().unwrap_or(value);
        let trimmed = trim_ows(last);

        if trimmed.eq_ignore_ascii_case(b"chunked") {
            self.request.is_chunked = true;
            self.request.headers.content_length = None;
            Ok(())
        } else {
            Err(ErrorKind::BadRequest)
        }
    }
}

#[inline(always)]
fn trim_ows(b: &[u8]) -> &[u8] {
    let b = match b.iter().position(|&c| c != b' ' && c != b'\t') {
        Some(i) => &b[i..],
        None => return b"",
    };
    match b.iter().rposition(|&c| c != b' ' && c != b'\t') {
        Some(i) => &b[..=i],
        None => b"",
    }
}

//

/// The per-connection, pooled byte accumulation buffer and its parse cursor.
#[derive(Debug, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    /// Fixed-capacity buffer for the request-line and header block only —
    /// sized once at construction from [`ReqLimits::precalc`] and never
    /// reallocated (zero-copy slices taken from it must stay valid for the
    /// lifetime of the handler invocation).
    header_buf: Box<[u8]>,
    header_filled: usize,
    position: usize,
    /// Bytes read past the header terminator: raw body bytes (content-length
    /// or not-yet-decoded chunked framing) while a request is being
    /// assembled, and whatever's left over afterward — the pipelining seed
    /// for the next [`HttpConnection::parse`] call.
    tail: Vec<u8>,
    /// Chunked-decode output, separate from `tail` since chunked framing
    /// bytes and decoded data bytes must never alias.
    body_decoded: Vec<u8>,
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.url == other.url
            && self.headers == other.headers
            && self.body == other.body
            && self.is_chunked == other.is_chunked
            && self.close == other.close
    }
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Self {
            header_buf: vec![0; limits.precalc.buffer].into_boxed_slice(),
            header_filled: 0,
            position: 0,
            tail: Vec::new(),
            body_decoded: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut header_buf = vec![0; limits.precalc.buffer];
        let value = value.as_ref();
        let len = value.len().min(header_buf.len());
        header_buf[..len].copy_from_slice(&value[..len]);

        Self {
            header_buf: header_buf.into_boxed_slice(),
            header_filled: len,
            position: 0,
            tail: Vec::new(),
            body_decoded: Vec::new(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.header_filled = 0;
        self.position = 0;
        self.tail.clear();
        self.body_decoded.clear();
        self.header_buf.fill(0);
    }
}

// Search & scan
impl Parser {
    /// Looks for `\r\n\r\n` in `header_buf[0..header_filled]`, resuming the
    /// scan from `from` (the caller passes `header_filled - 3` from the
    /// previous attempt so each extension only rescans the 3-byte overlap
    /// plus whatever's new, avoiding quadratic work across repeated reads).
    fn find_terminator(&self, from: usize) -> Option<usize> {
        if self.header_filled < 4 {
            return None;
        }
        let haystack = &self.header_buf[from..self.header_filled];
        memchr::memmem::find(haystack, b"\r\n\r\n").map(|i| from + i + 4)
    }

    #[inline]
    fn find_char(&self, limit: usize, delimiter: u8) -> Option<usize> {
        let slice = self.get_slice(self.position, limit)?;
        memchr(delimiter, slice)
    }

    #[inline(always)]
    fn get_slice(&self, start: usize, step: usize) -> Option<&[u8]> {
        let end = start.checked_add(step)?;
        if end > self.header_filled {
            return None;
        }
        self.header_buf.get(start..end)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        let end = start.checked_add(step)?;
        if end > self.header_filled {
            return None;
        }
        self.header_buf.get_mut(start..end)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: slices are only ever handed to a Request while that Request's
    // Parser is alive and not yet reset; `header_buf` and `tail`/`body_decoded`
    // are pooled and not touched again until `Parser::reset`, which happens
    // only after the handler returns and the Request has been released.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        unsafe { mem::transmute(src) }
    }
}

// io-level helper shared with the serve loop for the pre-request idle wait.
impl Parser {
    #[inline(always)]
    pub(crate) async fn peek_has_buffered(&self) -> bool {
        !self.tail.is_empty()
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t = HttpConnection::from_req("OPTIONS /qwe&q=1 HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse_method(), Ok(()));
        assert_eq!(t.parse_url(), Ok(()));
        assert_eq!(t.check_version(), Ok(()));
        assert_eq!(t.parse_headers(), Ok(()));

        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GET",        None),
            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert_eq!(t.parse_method(), Ok(()));
                assert_eq!(t.request.method(), expected);
            } else {
                assert_eq!(t.parse_method(), Err(ErrorKind::InvalidMethod));
            }
        }
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
            ("/qwe",           None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((url, query)) = expected {
                assert_eq!(t.parse_url(), Ok(()));

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert_eq!(t.parse_url(), Err(ErrorKind::InvalidUrl));
            }
        }
    }

    #[test]
    fn parse_url_full() {
        let mut t = HttpConnection::from_req("/api/users/123?sort=name&debug ");
        let segments = &[b"api" as &[u8], b"users" as &[u8], b"123" as &[u8]] as &[&[u8]];

        assert_eq!(t.parse_url(), Ok(()));

        assert_eq!(str_op(t.request.url().target()), "/api/users/123?sort=name&debug");
        assert_eq!(str_op(t.request.url().path()), "/api/users/123");

        assert!(t.request.url().matches(segments));
        assert!(t.request.url().starts_with(&segments[..1]));
        assert!(t.request.url().ends_with(&segments[1..]));

        assert_eq!(t.request.url().path_segments(), segments);
        assert_eq!(str(t.request.url().query(b"sort")), Some("name"));
        assert_eq!(str(t.request.url().query(b"debug")), Some(""));
    }

    #[test]
    fn check_version() {
        let cases = [
            ("HTTP/1.1\r\n", Ok(())),
            ("HTTP/1.0\r\n", Err(ErrorKind::UnsupportedProtocol)),
            ("HTTP/2.0\r\n", Err(ErrorKind::UnsupportedProtocol)),
            ("http/1.1\r\n", Err(ErrorKind::UnsupportedProtocol)),
            ("HTTP/1.1\n", Err(ErrorKind::BadRequest)),
            ("HTTP/1.1", Err(ErrorKind::BadRequest)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);
            assert_eq!(t.check_version(), expected);
        }
    }

    #[test]
    fn parse_header_is_ows_tolerant() {
        #[rustfmt::skip]
        let cases = [
            ("header: value\r\n",  Some(("header", "value"))),
            ("HEADER: value\r\n",  Some(("HEADER", "value"))),
            ("header:value\r\n",   Some(("header", "value"))),
            ("header:   value  \r\n", Some(("header", "value"))),
            ("header: \r\n",       Some(("header", ""))),

            ("header: value",      None),
            (": value\r\n",        None),
            ("header value\r\n",   None),
            ("head\x01er: v\r\n",  None),
        ];

        for (header, expected) in cases {
            let mut t = HttpConnection::from_req(header);

            if let Some((name, value)) = expected {
                let (n, v) = t.parse_header().unwrap().unwrap();
                assert_eq!(str_op(n), name);
                assert_eq!(str_op(v), value);
            } else {
                assert!(t.parse_header().is_err());
            }
        }
    }

    #[test]
    fn parse_headers_terminates_on_empty_line() {
        let mut t = HttpConnection::from_req("A: 1\r\nB: 2\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));
        assert_eq!(str(t.request.header(b"a")), Some("1"));
        assert_eq!(str(t.request.header(b"b")), Some("2"));
    }

    #[test]
    fn parse_headers_stores_name_casing_verbatim() {
        let mut t = HttpConnection::from_req("X-Request-Id: abc\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));
        assert_eq!(str(t.request.header(b"x-request-id")), Some("abc"));

        let mut seen = None;
        t.request.headers.visit_all(|name, _| {
            seen = Some(name.to_vec());
            true
        });
        assert_eq!(seen.as_deref(), Some(b"X-Request-Id".as_ref()));
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\r\n\r\n", Ok((Some(1256), None))),
            ("connection: keep-alive\r\n\r\n", Ok((None, Some(false)))),
            ("connection: close\r\n\r\n", Ok((None, Some(true)))),
            ("connection: keep_alive\r\n\r\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\r\n\r\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 5\r\ncontent-length: 5\r\n\r\n",
                Err(ErrorKind::InvalidContentLength),
            ),
        ];

        for (headers, result) in cases {
            let mut t = HttpConnection::from_req(headers);

            if let Ok((content_length, close)) = result {
                assert_eq!(t.parse_headers(), Ok(()));
                assert!(t.request.headers.is_empty());

                if let Some(len) = content_length {
                    assert_eq!(t.request.headers.content_length, Some(len));
                }
                if let Some(close) = close {
                    assert_eq!(t.request.close, close);
                }
            } else if let Err(e) = result {
                assert_eq!(t.parse_headers(), Err(e));
            }
        }
    }

    #[test]
    fn transfer_encoding_chunked_clears_content_length() {
        let mut t = HttpConnection::from_req("transfer-encoding: chunked\r\n\r\n");
        assert_eq!(t.parse_headers(), Ok(()));
        assert!(t.request.is_chunked);
        assert_eq!(t.request.headers.content_length, None);
    }

    #[test]
    fn transfer_encoding_non_final_chunked_is_bad_request() {
        let mut t = HttpConnection::from_req("transfer-encoding: chunked, gzip\r\n\r\n");
        assert_eq!(t.parse_headers(), Err(ErrorKind::BadRequest));
    }
}
