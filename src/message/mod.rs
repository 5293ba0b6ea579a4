//! SIP Message types
//!
//! The module provides the request and response message bodies the stack
//! moves around. Messages arrive already parsed; everything here owns its
//! data so a message can cross thread boundaries freely.

use std::fmt;

use bytes::Bytes;

use crate::headers::Headers;

pub mod auth;

mod code;
mod method;
mod uri;

pub use code::*;
pub use method::*;
pub use uri::*;

/// The request line of a SIP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// The request method.
    pub method: SipMethod,
    /// The request target.
    pub uri: Uri,
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.uri)
    }
}

/// The status line of a SIP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// The response status code.
    pub code: StatusCode,
    /// The reason phrase.
    pub reason: String,
}

impl StatusLine {
    /// Creates a status line with the default reason phrase for `code`.
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            reason: code.reason().to_string(),
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {} {}\r\n", self.code, self.reason)
    }
}

/// An SIP Request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The request line.
    pub req_line: RequestLine,
    /// All headers of the request, in wire order.
    pub headers: Headers,
    /// The message body, if any.
    pub body: Option<Bytes>,
}

impl Request {
    /// Creates a new request with no headers and no body.
    pub fn new(method: SipMethod, uri: Uri) -> Self {
        Self {
            req_line: RequestLine { method, uri },
            headers: Headers::new(),
            body: None,
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> SipMethod {
        self.req_line.method
    }
}

/// An SIP Response.
#[derive(Debug, Clone)]
pub struct Response {
    /// The status line.
    pub status_line: StatusLine,
    /// All headers of the response, in wire order.
    pub headers: Headers,
    /// The message body, if any.
    pub body: Option<Bytes>,
}

impl Response {
    /// Creates a new response with no headers and no body.
    pub fn new(status_line: StatusLine) -> Self {
        Self {
            status_line,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Returns the response status code.
    pub fn status_code(&self) -> StatusCode {
        self.status_line.code
    }
}
