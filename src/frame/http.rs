//! Incremental HTTP/1.x frame source.
//!
//! # Responsibilities
//! - Accumulate bytes across read events
//! - Decode start line and headers with `httparse`
//! - Collect bodies delimited by `Content-Length` or chunked encoding
//! - Keep a partially received message as an in-progress frame
//!
//! # Design Decisions
//! - A start line beginning with `HTTP/` is a response, anything else a request
//! - A message without length headers has an empty body
//! - Only the last frame in the sequence can be in progress
//! - Heads are capped at `MAX_HEAD_BYTES` and bodies at `MAX_BODY_BYTES`

use bytes::{Buf, BytesMut};

use super::{Frame, FrameError, FrameSource};

/// Upper bound on headers per message.
pub const MAX_HEADERS: usize = 64;

/// Upper bound on a start line plus headers, and on a chunk size or trailer line.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Upper bound on a decoded body.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

const RESPONSE_PREFIX: &[u8] = b"HTTP/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data { remaining: usize },
    DataEnd,
    Trailers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Complete,
    Length { remaining: usize },
    Chunked(ChunkState),
}

/// A decoded (or decoding) HTTP request or response.
#[derive(Debug, Clone)]
pub struct HttpFrame {
    method: String,
    uri: String,
    version: u8,
    status_code: Option<u16>,
    reason: String,
    headers: Vec<(String, String)>,
    body: BytesMut,
    state: BodyState,
}

impl HttpFrame {
    /// Request method. Empty for responses.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target. Empty for responses.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Status code of a response.
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First header with the given name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn from_head(
        method: String,
        uri: String,
        version: u8,
        status_code: Option<u16>,
        reason: String,
        raw_headers: &[httparse::Header<'_>],
    ) -> Result<Self, FrameError> {
        let headers: Vec<(String, String)> = raw_headers
            .iter()
            .map(|h| {
                let value = String::from_utf8_lossy(h.value).trim().to_string();
                (h.name.to_string(), value)
            })
            .collect();

        let mut frame = Self {
            method,
            uri,
            version,
            status_code,
            reason,
            headers,
            body: BytesMut::new(),
            state: BodyState::Complete,
        };
        frame.state = frame.body_state()?;
        Ok(frame)
    }

    fn body_state(&self) -> Result<BodyState, FrameError> {
        if let Some(code) = self.status_code {
            if (100..200).contains(&code) || code == 204 || code == 304 {
                return Ok(BodyState::Complete);
            }
        }

        let chunked = self
            .header("transfer-encoding")
            .and_then(|te| te.rsplit(',').next())
            .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);
        if chunked {
            return Ok(BodyState::Chunked(ChunkState::Size));
        }

        match self.header("content-length") {
            Some(value) => {
                let length: usize = value
                    .parse()
                    .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
                if length > MAX_BODY_BYTES {
                    Err(FrameError::BodyTooLarge {
                        limit: MAX_BODY_BYTES,
                    })
                } else if length == 0 {
                    Ok(BodyState::Complete)
                } else {
                    Ok(BodyState::Length { remaining: length })
                }
            }
            None => Ok(BodyState::Complete),
        }
    }

    /// Move body bytes out of `buf` until the frame completes or `buf` runs dry.
    fn read_body(&mut self, buf: &mut BytesMut) -> Result<(), FrameError> {
        loop {
            match self.state {
                BodyState::Complete => return Ok(()),
                BodyState::Length { remaining } => {
                    let n = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf[..n]);
                    buf.advance(n);
                    self.state = if n == remaining {
                        BodyState::Complete
                    } else {
                        BodyState::Length { remaining: remaining - n }
                    };
                    return Ok(());
                }
                BodyState::Chunked(ChunkState::Size) => match httparse::parse_chunk_size(buf) {
                    Ok(httparse::Status::Complete((consumed, size))) => {
                        buf.advance(consumed);
                        let size = usize::try_from(size)
                            .ok()
                            .filter(|size| self.body.len().saturating_add(*size) <= MAX_BODY_BYTES)
                            .ok_or(FrameError::BodyTooLarge {
                                limit: MAX_BODY_BYTES,
                            })?;
                        self.state = if size == 0 {
                            BodyState::Chunked(ChunkState::Trailers)
                        } else {
                            BodyState::Chunked(ChunkState::Data { remaining: size })
                        };
                    }
                    Ok(httparse::Status::Partial) => return check_line_length(buf),
                    Err(_) => return Err(FrameError::InvalidChunk("bad chunk size line".into())),
                },
                BodyState::Chunked(ChunkState::Data { remaining }) => {
                    if buf.is_empty() {
                        return Ok(());
                    }
                    let n = remaining.min(buf.len());
                    self.body.extend_from_slice(&buf[..n]);
                    buf.advance(n);
                    self.state = if n == remaining {
                        BodyState::Chunked(ChunkState::DataEnd)
                    } else {
                        BodyState::Chunked(ChunkState::Data { remaining: remaining - n })
                    };
                }
                BodyState::Chunked(ChunkState::DataEnd) => {
                    if buf.len() < 2 {
                        return Ok(());
                    }
                    if &buf[..2] != b"\r\n" {
                        return Err(FrameError::InvalidChunk(
                            "missing CRLF after chunk data".into(),
                        ));
                    }
                    buf.advance(2);
                    self.state = BodyState::Chunked(ChunkState::Size);
                }
                BodyState::Chunked(ChunkState::Trailers) => {
                    let Some(pos) = find_crlf(buf) else {
                        return check_line_length(buf);
                    };
                    // An empty line ends the trailer section; trailer fields are dropped.
                    buf.advance(pos + 2);
                    if pos == 0 {
                        self.state = BodyState::Complete;
                    }
                }
            }
        }
    }
}

impl Frame for HttpFrame {
    fn is_complete(&self) -> bool {
        self.state == BodyState::Complete
    }

    fn classification(&self) -> &str {
        &self.method
    }
}

/// Per-connection HTTP decoder.
#[derive(Debug, Default)]
pub struct HttpFrameSource {
    buf: BytesMut,
    frames: Vec<HttpFrame>,
}

impl HttpFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet part of any frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn parse_head(&self) -> Result<Option<(HttpFrame, usize)>, FrameError> {
        let buf = &self.buf[..];
        if buf.len() < RESPONSE_PREFIX.len() && RESPONSE_PREFIX.starts_with(buf) {
            return Ok(None);
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        if buf.starts_with(RESPONSE_PREFIX) {
            let mut res = httparse::Response::new(&mut headers);
            match res.parse(buf).map_err(map_parse_error)? {
                httparse::Status::Partial => Ok(None),
                httparse::Status::Complete(consumed) => {
                    let frame = HttpFrame::from_head(
                        String::new(),
                        String::new(),
                        res.version.unwrap_or(1),
                        res.code,
                        res.reason.unwrap_or_default().to_string(),
                        res.headers,
                    )?;
                    Ok(Some((frame, consumed)))
                }
            }
        } else {
            let mut req = httparse::Request::new(&mut headers);
            match req.parse(buf).map_err(map_parse_error)? {
                httparse::Status::Partial => Ok(None),
                httparse::Status::Complete(consumed) => {
                    let frame = HttpFrame::from_head(
                        req.method.unwrap_or_default().to_string(),
                        req.path.unwrap_or_default().to_string(),
                        req.version.unwrap_or(1),
                        None,
                        String::new(),
                        req.headers,
                    )?;
                    Ok(Some((frame, consumed)))
                }
            }
        }
    }

    fn skip_empty_lines(&mut self) {
        while self.buf.starts_with(b"\r\n") {
            self.buf.advance(2);
        }
    }
}

impl FrameSource for HttpFrameSource {
    type Frame = HttpFrame;

    fn feed(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        self.buf.extend_from_slice(bytes);

        loop {
            if let Some(frame) = self.frames.last_mut().filter(|f| !f.is_complete()) {
                frame.read_body(&mut self.buf)?;
                if !frame.is_complete() {
                    return Ok(());
                }
                continue;
            }

            self.skip_empty_lines();
            if self.buf.is_empty() {
                return Ok(());
            }

            match self.parse_head()? {
                Some((_, consumed)) if consumed > MAX_HEAD_BYTES => {
                    return Err(FrameError::HeadTooLarge {
                        limit: MAX_HEAD_BYTES,
                    });
                }
                Some((frame, consumed)) => {
                    self.buf.advance(consumed);
                    self.frames.push(frame);
                }
                None if self.buf.len() > MAX_HEAD_BYTES => {
                    return Err(FrameError::HeadTooLarge {
                        limit: MAX_HEAD_BYTES,
                    });
                }
                None => return Ok(()),
            }
        }
    }

    fn frames(&self) -> &[HttpFrame] {
        &self.frames
    }

    fn frames_mut(&mut self) -> &mut Vec<HttpFrame> {
        &mut self.frames
    }
}

fn map_parse_error(err: httparse::Error) -> FrameError {
    match err {
        httparse::Error::TooManyHeaders => FrameError::TooManyHeaders { limit: MAX_HEADERS },
        other => FrameError::Malformed(other.to_string()),
    }
}

/// An unterminated chunk size or trailer line may not outgrow the head limit.
fn check_line_length(buf: &[u8]) -> Result<(), FrameError> {
    if buf.len() > MAX_HEAD_BYTES {
        return Err(FrameError::InvalidChunk(format!(
            "line exceeds {MAX_HEAD_BYTES} bytes"
        )));
    }
    Ok(())
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_request_in_one_chunk() {
        let mut source = HttpFrameSource::new();
        source.feed(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(source.frames().len(), 1);
        let frame = &source.frames()[0];
        assert!(frame.is_complete());
        assert_eq!(frame.method(), "GET");
        assert_eq!(frame.uri(), "/");
        assert_eq!(frame.version(), 1);
    }

    #[test]
    fn request_split_across_reads() {
        let mut source = HttpFrameSource::new();
        source.feed(b"GET / HTTP/1").unwrap();
        assert!(source.frames().is_empty());
        assert_eq!(source.buffered(), 12);

        source.feed(b".1\r\n\r\n").unwrap();
        assert_eq!(source.frames().len(), 1);
        assert!(source.frames()[0].is_complete());
        assert_eq!(source.buffered(), 0);
    }

    #[test]
    fn content_length_body_stays_in_progress() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"POST /submit HTTP/1.1\r\nHost: a\r\nContent-Length: 10\r\n\r\nhello")
            .unwrap();
        assert_eq!(source.frames().len(), 1);
        assert!(!source.frames()[0].is_complete());
        assert_eq!(source.frames()[0].body(), b"hello");

        source.feed(b"world").unwrap();
        let frame = &source.frames()[0];
        assert!(frame.is_complete());
        assert_eq!(frame.body(), b"helloworld");
        assert_eq!(frame.header("host"), Some("a"));
    }

    #[test]
    fn chunked_body_across_reads() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi")
            .unwrap();
        assert!(!source.frames()[0].is_complete());

        source.feed(b"ki\r\n5\r\npedia\r\n0\r\n").unwrap();
        assert!(!source.frames()[0].is_complete());

        source.feed(b"\r\n").unwrap();
        let frame = &source.frames()[0];
        assert!(frame.is_complete());
        assert_eq!(frame.body(), b"Wikipedia");
    }

    #[test]
    fn chunked_trailers_are_skipped() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();
        source.feed(b"1\r\nx\r\n0\r\nX-Sum: 1\r\n\r\n").unwrap();
        assert!(source.frames()[0].is_complete());
        assert_eq!(source.frames()[0].body(), b"x");
    }

    #[test]
    fn response_has_empty_classification() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .unwrap();
        let frame = &source.frames()[0];
        assert!(frame.is_complete());
        assert_eq!(frame.classification(), "");
        assert_eq!(frame.status_code(), Some(200));
        assert_eq!(frame.reason(), "OK");
        assert_eq!(frame.body(), b"ok");
    }

    #[test]
    fn partial_response_prefix_waits() {
        let mut source = HttpFrameSource::new();
        source.feed(b"HTT").unwrap();
        assert!(source.frames().is_empty());
        source.feed(b"P/1.1 204 No Content\r\n\r\n").unwrap();
        assert_eq!(source.frames()[0].status_code(), Some(204));
        assert!(source.frames()[0].is_complete());
    }

    #[test]
    fn pipelined_requests_keep_arrival_order() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\nGET /c HT")
            .unwrap();
        let uris: Vec<_> = source.frames().iter().map(|f| f.uri().to_string()).collect();
        assert_eq!(uris, vec!["/a", "/b"]);
        assert_eq!(source.buffered(), 9);
    }

    #[test]
    fn malformed_start_line_is_an_error() {
        let mut source = HttpFrameSource::new();
        let err = source.feed(b"GE(T / HTTP/1.1\r\n\r\n").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn bad_content_length_is_an_error() {
        let mut source = HttpFrameSource::new();
        let err = source
            .feed(b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n")
            .unwrap_err();
        assert!(matches!(err, FrameError::InvalidContentLength(_)));
    }

    #[test]
    fn endless_head_is_rejected_once_over_limit() {
        let mut source = HttpFrameSource::new();
        source.feed(b"GET / HTTP/1.1\r\n").unwrap();

        let filler = format!("X-Fill: {}\r\n", "a".repeat(4000));
        let mut result = Ok(());
        let mut fed = 16;
        while result.is_ok() && fed <= MAX_HEAD_BYTES {
            result = source.feed(filler.as_bytes());
            fed += filler.len();
        }

        assert!(matches!(
            result,
            Err(FrameError::HeadTooLarge { limit }) if limit == MAX_HEAD_BYTES
        ));
        assert!(source.frames().is_empty());
    }

    #[test]
    fn oversized_head_in_one_read_is_rejected() {
        let mut source = HttpFrameSource::new();
        let mut request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        let err = source.feed(request.as_bytes()).unwrap_err();
        assert!(matches!(err, FrameError::HeadTooLarge { .. }));

        request = format!("GET /{} HTTP/1.1\r\n\r\n", "a".repeat(1024));
        let mut source = HttpFrameSource::new();
        source.feed(request.as_bytes()).unwrap();
        assert!(source.frames()[0].is_complete());
    }

    #[test]
    fn content_length_over_limit_is_rejected() {
        let mut source = HttpFrameSource::new();
        let head = format!(
            "POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            MAX_BODY_BYTES + 1
        );
        let err = source.feed(head.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BodyTooLarge { limit } if limit == MAX_BODY_BYTES
        ));

        let mut source = HttpFrameSource::new();
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {MAX_BODY_BYTES}\r\n\r\n");
        source.feed(head.as_bytes()).unwrap();
        assert!(!source.frames()[0].is_complete());
    }

    #[test]
    fn chunked_body_over_limit_is_rejected() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .unwrap();

        let half = MAX_BODY_BYTES / 2;
        let mut chunk = format!("{half:x}\r\n").into_bytes();
        chunk.extend(std::iter::repeat(b'a').take(half));
        chunk.extend_from_slice(b"\r\n");
        source.feed(&chunk).unwrap();
        source.feed(&chunk).unwrap();
        assert_eq!(source.frames()[0].body().len(), MAX_BODY_BYTES);

        let err = source.feed(b"1\r\n").unwrap_err();
        assert!(matches!(err, FrameError::BodyTooLarge { .. }));
    }

    #[test]
    fn unterminated_trailer_line_is_rejected() {
        let mut source = HttpFrameSource::new();
        source
            .feed(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n")
            .unwrap();
        let err = source.feed(&vec![b'x'; MAX_HEAD_BYTES + 1]).unwrap_err();
        assert!(matches!(err, FrameError::InvalidChunk(_)));
    }
}
