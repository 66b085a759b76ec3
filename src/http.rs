//! Receive-side HTTP message validation per RFC 9114 Section 4.1.
//!
//! The frame-level parser reduces incoming frames to five events
//! ([`HttpEvent`]); [`RxHttp`] runs them through a deterministic state
//! machine that enforces message structure (headers, body, trailers, end)
//! and rejects malformed orderings. Rejection never mutates state, so the
//! connection can surface the error and reset the stream without tearing
//! down unrelated bookkeeping.
//!
//! Field validation is structural only: byte-level name/value checks and
//! content-length consistency. Semantic interpretation of headers belongs
//! to the layer above.

use crate::error::{Error, ErrorCode, Result};

/// Framing events delivered to the receive state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpEvent {
    HeadersBegin,
    HeadersEnd,
    DataBegin,
    DataEnd,
    MsgEnd,
}

/// Receive HTTP state. `None` means the stream was never bound to a
/// message direction; delivering events in that state is a caller bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpState {
    None,
    ReqInitial,
    ReqHeadersBegin,
    ReqHeadersEnd,
    ReqDataBegin,
    ReqDataEnd,
    ReqTrailersBegin,
    ReqTrailersEnd,
    ReqEnd,
    RespInitial,
    RespHeadersBegin,
    RespHeadersEnd,
    RespDataBegin,
    RespDataEnd,
    RespTrailersBegin,
    RespTrailersEnd,
    RespEnd,
}

/// Per-stream receive-side HTTP message state.
#[derive(Debug)]
pub struct RxHttp {
    state: HttpState,
    /// Parsed status code; -1 until a final response header block is seen.
    status_code: i32,
    /// Declared content-length; -1 when absent.
    content_length: i64,
    /// DATA payload bytes observed so far.
    recv_content_length: u64,
    /// The request method was CONNECT; trailers are forbidden.
    meth_connect: bool,
    /// An informational (1xx) response was received and the final response
    /// headers are still outstanding.
    expect_final_response: bool,
}

impl Default for RxHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl RxHttp {
    pub fn new() -> Self {
        Self {
            state: HttpState::None,
            status_code: -1,
            content_length: -1,
            recv_content_length: 0,
            meth_connect: false,
            expect_final_response: false,
        }
    }

    /// Bind the stream as carrying an incoming request (server side).
    pub fn start_request(&mut self) {
        self.state = HttpState::ReqInitial;
    }

    /// Bind the stream as carrying an incoming response (client side, and
    /// push streams).
    pub fn start_response(&mut self) {
        self.state = HttpState::RespInitial;
    }

    pub fn state(&self) -> HttpState {
        self.state
    }

    pub fn status_code(&self) -> i32 {
        self.status_code
    }

    pub fn content_length(&self) -> i64 {
        self.content_length
    }

    pub fn set_meth_connect(&mut self, on: bool) {
        self.meth_connect = on;
    }

    pub fn meth_connect(&self) -> bool {
        self.meth_connect
    }

    pub fn expect_final_response(&self) -> bool {
        self.expect_final_response
    }

    /// Record the status code of a completed response header block. A 1xx
    /// code marks the block as informational: the final response is still
    /// outstanding and DATA must not arrive before it.
    pub fn on_status(&mut self, code: i32) {
        if code / 100 == 1 {
            self.expect_final_response = true;
            self.status_code = -1;
        } else {
            self.expect_final_response = false;
            self.status_code = code;
        }
    }

    /// Record a declared content-length.
    pub fn on_content_length(&mut self, len: i64) {
        self.content_length = len;
    }

    /// Account DATA payload bytes against the declared content-length.
    pub fn observe_data(&mut self, n: u64) {
        self.recv_content_length += n;
    }

    /// The peer finished its message body: verify content-length
    /// consistency.
    pub fn on_remote_end_stream(&self) -> Result<()> {
        if self.content_length >= 0 && self.recv_content_length != self.content_length as u64 {
            return Err(Error::protocol(
                ErrorCode::GeneralProtocolError,
                "content-length does not match received DATA length",
            ));
        }
        Ok(())
    }

    /// Whether a HEADERS frame with zero field lines is acceptable in the
    /// current state. Only trailers may be empty.
    pub fn empty_headers_allowed(&self) -> Result<()> {
        match self.state {
            HttpState::ReqTrailersBegin | HttpState::RespTrailersBegin => Ok(()),
            _ => Err(Error::protocol(
                ErrorCode::GeneralProtocolError,
                "empty header block outside trailers",
            )),
        }
    }

    /// Drive the state machine with one event.
    ///
    /// On error the state is unchanged: `FrameUnexpected` for frames that
    /// are illegal in the current state, `GeneralProtocolError` for
    /// orderings that can only come from a broken peer, `InternalError`
    /// when the stream was never bound.
    pub fn transit(&mut self, event: HttpEvent) -> Result<()> {
        use HttpEvent::*;

        let next = match self.state {
            HttpState::None => {
                return Err(Error::protocol(
                    ErrorCode::InternalError,
                    "http event on unbound stream",
                ))
            }
            HttpState::ReqInitial => match event {
                HeadersBegin => HttpState::ReqHeadersBegin,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::ReqHeadersBegin => match event {
                HeadersEnd => HttpState::ReqHeadersEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::ReqHeadersEnd => match event {
                HeadersBegin => self.enter_req_trailers()?,
                DataBegin => HttpState::ReqDataBegin,
                MsgEnd => HttpState::ReqEnd,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::ReqDataBegin => match event {
                DataEnd => HttpState::ReqDataEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::ReqDataEnd => match event {
                DataBegin => HttpState::ReqDataBegin,
                HeadersBegin => self.enter_req_trailers()?,
                MsgEnd => HttpState::ReqEnd,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::ReqTrailersBegin => match event {
                HeadersEnd => HttpState::ReqTrailersEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::ReqTrailersEnd => match event {
                MsgEnd => HttpState::ReqEnd,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::ReqEnd => return Err(general_error(event)),
            HttpState::RespInitial => match event {
                HeadersBegin => HttpState::RespHeadersBegin,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::RespHeadersBegin => match event {
                HeadersEnd => HttpState::RespHeadersEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::RespHeadersEnd => match event {
                HeadersBegin => {
                    if self.status_code == -1 {
                        // Previous block was informational; this begins the
                        // next response header block.
                        HttpState::RespHeadersBegin
                    } else {
                        self.enter_resp_trailers()?
                    }
                }
                DataBegin => {
                    if self.expect_final_response {
                        return Err(unexpected_frame(event));
                    }
                    HttpState::RespDataBegin
                }
                MsgEnd => HttpState::RespEnd,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::RespDataBegin => match event {
                DataEnd => HttpState::RespDataEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::RespDataEnd => match event {
                DataBegin => HttpState::RespDataBegin,
                HeadersBegin => self.enter_resp_trailers()?,
                MsgEnd => HttpState::RespEnd,
                _ => return Err(unexpected_frame(event)),
            },
            HttpState::RespTrailersBegin => match event {
                HeadersEnd => HttpState::RespTrailersEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::RespTrailersEnd => match event {
                MsgEnd => HttpState::RespEnd,
                _ => return Err(general_error(event)),
            },
            HttpState::RespEnd => return Err(general_error(event)),
        };

        self.state = next;
        Ok(())
    }

    fn enter_req_trailers(&self) -> Result<HttpState> {
        if self.meth_connect {
            return Err(Error::protocol(
                ErrorCode::FrameUnexpected,
                "trailers on CONNECT request",
            ));
        }
        self.on_remote_end_stream()?;
        Ok(HttpState::ReqTrailersBegin)
    }

    fn enter_resp_trailers(&self) -> Result<HttpState> {
        if self.meth_connect && self.status_code / 100 == 2 {
            return Err(Error::protocol(
                ErrorCode::FrameUnexpected,
                "trailers on established CONNECT tunnel",
            ));
        }
        self.on_remote_end_stream()?;
        Ok(HttpState::RespTrailersBegin)
    }
}

fn unexpected_frame(event: HttpEvent) -> Error {
    Error::protocol(
        ErrorCode::FrameUnexpected,
        format!("unexpected http event {:?}", event),
    )
}

fn general_error(event: HttpEvent) -> Error {
    Error::protocol(
        ErrorCode::GeneralProtocolError,
        format!("malformed http event ordering at {:?}", event),
    )
}

/// Validate a field name/value pair at the byte level.
///
/// Names must be non-empty lowercase tokens (pseudo-header names carry a
/// leading `:` followed by a token); values must not contain NUL, CR, or
/// LF. Anything else is a malformed message.
pub fn validate_field(name: &[u8], value: &[u8]) -> Result<()> {
    let token = match name {
        [] => {
            return Err(Error::protocol(
                ErrorCode::MessageError,
                "empty field name",
            ))
        }
        [b':', rest @ ..] if !rest.is_empty() => rest,
        [b':'] => {
            return Err(Error::protocol(
                ErrorCode::MessageError,
                "bare pseudo-header marker",
            ))
        }
        other => other,
    };

    for &b in token {
        let ok = matches!(b,
            b'a'..=b'z' | b'0'..=b'9' |
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' |
            b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~');
        if !ok {
            return Err(Error::protocol(
                ErrorCode::MessageError,
                "invalid character in field name",
            ));
        }
    }

    if value.iter().any(|&b| b == 0 || b == b'\r' || b == b'\n') {
        return Err(Error::protocol(
            ErrorCode::MessageError,
            "invalid character in field value",
        ));
    }

    Ok(())
}

/// Parse a content-length value: one or more ASCII digits, no sign, no
/// whitespace.
pub fn parse_content_length(value: &[u8]) -> Result<i64> {
    if value.is_empty() {
        return Err(Error::protocol(
            ErrorCode::MessageError,
            "empty content-length",
        ));
    }

    let mut n: i64 = 0;
    for &b in value {
        if !b.is_ascii_digit() {
            return Err(Error::protocol(
                ErrorCode::MessageError,
                "non-digit in content-length",
            ));
        }
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(i64::from(b - b'0')))
            .ok_or_else(|| {
                Error::protocol(ErrorCode::MessageError, "content-length overflow")
            })?;
    }

    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbound_stream_is_internal_error() {
        let mut rx = RxHttp::new();
        let err = rx.transit(HttpEvent::HeadersBegin).unwrap_err();
        assert_eq!(err.to_error_code(), ErrorCode::InternalError);
        assert_eq!(rx.state(), HttpState::None);
    }

    #[test]
    fn test_informational_then_final_response() {
        let mut rx = RxHttp::new();
        rx.start_response();

        rx.transit(HttpEvent::HeadersBegin).unwrap();
        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.on_status(103);
        assert!(rx.expect_final_response());

        // DATA before the final response is rejected, state intact.
        let err = rx.transit(HttpEvent::DataBegin).unwrap_err();
        assert_eq!(err.to_error_code(), ErrorCode::FrameUnexpected);
        assert_eq!(rx.state(), HttpState::RespHeadersEnd);

        // A second header block is the final response.
        rx.transit(HttpEvent::HeadersBegin).unwrap();
        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.on_status(200);
        rx.transit(HttpEvent::DataBegin).unwrap();
        rx.transit(HttpEvent::DataEnd).unwrap();
        rx.transit(HttpEvent::MsgEnd).unwrap();
        assert_eq!(rx.state(), HttpState::RespEnd);
    }

    #[test]
    fn test_connect_tunnel_rejects_trailers() {
        let mut rx = RxHttp::new();
        rx.start_response();
        rx.set_meth_connect(true);

        rx.transit(HttpEvent::HeadersBegin).unwrap();
        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.on_status(200);
        rx.transit(HttpEvent::DataBegin).unwrap();
        rx.transit(HttpEvent::DataEnd).unwrap();

        let err = rx.transit(HttpEvent::HeadersBegin).unwrap_err();
        assert_eq!(err.to_error_code(), ErrorCode::FrameUnexpected);
        assert_eq!(rx.state(), HttpState::RespDataEnd);
    }

    #[test]
    fn test_connect_rejection_only_for_2xx() {
        let mut rx = RxHttp::new();
        rx.start_response();
        rx.set_meth_connect(true);

        rx.transit(HttpEvent::HeadersBegin).unwrap();
        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.on_status(407);
        rx.transit(HttpEvent::DataBegin).unwrap();
        rx.transit(HttpEvent::DataEnd).unwrap();
        // The tunnel was refused; trailers are an ordinary response tail.
        rx.transit(HttpEvent::HeadersBegin).unwrap();
        assert_eq!(rx.state(), HttpState::RespTrailersBegin);
    }

    #[test]
    fn test_content_length_mismatch_blocks_trailers() {
        let mut rx = RxHttp::new();
        rx.start_request();
        rx.on_content_length(10);

        rx.transit(HttpEvent::HeadersBegin).unwrap();
        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.transit(HttpEvent::DataBegin).unwrap();
        rx.observe_data(4);
        rx.transit(HttpEvent::DataEnd).unwrap();

        let err = rx.transit(HttpEvent::HeadersBegin).unwrap_err();
        assert_eq!(err.to_error_code(), ErrorCode::GeneralProtocolError);
        assert_eq!(rx.state(), HttpState::ReqDataEnd);

        rx.transit(HttpEvent::DataBegin).unwrap();
        rx.observe_data(6);
        rx.transit(HttpEvent::DataEnd).unwrap();
        rx.transit(HttpEvent::HeadersBegin).unwrap();
        assert_eq!(rx.state(), HttpState::ReqTrailersBegin);
    }

    #[test]
    fn test_empty_headers_only_in_trailers() {
        let mut rx = RxHttp::new();
        rx.start_request();
        rx.transit(HttpEvent::HeadersBegin).unwrap();
        assert!(rx.empty_headers_allowed().is_err());

        rx.transit(HttpEvent::HeadersEnd).unwrap();
        rx.transit(HttpEvent::HeadersBegin).unwrap();
        assert_eq!(rx.state(), HttpState::ReqTrailersBegin);
        assert!(rx.empty_headers_allowed().is_ok());
    }

    #[test]
    fn test_validate_field() {
        assert!(validate_field(b"content-type", b"text/html").is_ok());
        assert!(validate_field(b":method", b"GET").is_ok());
        assert!(validate_field(b"", b"x").is_err());
        assert!(validate_field(b":", b"x").is_err());
        assert!(validate_field(b"Content-Type", b"x").is_err());
        assert!(validate_field(b"sp ace", b"x").is_err());
        assert!(validate_field(b"x", b"a\r\nb").is_err());
        assert!(validate_field(b"x", b"a\0b").is_err());
    }

    #[test]
    fn test_parse_content_length() {
        assert_eq!(parse_content_length(b"0").unwrap(), 0);
        assert_eq!(parse_content_length(b"1048576").unwrap(), 1048576);
        assert!(parse_content_length(b"").is_err());
        assert!(parse_content_length(b"-1").is_err());
        assert!(parse_content_length(b"12a").is_err());
        assert!(parse_content_length(b"99999999999999999999").is_err());
    }
}
