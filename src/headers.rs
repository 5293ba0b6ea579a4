//! SIP Headers types
//!
//! Only the headers this stack reads or writes get a concrete type; anything
//! else rides along untouched as [`Header::Other`].

use std::fmt;
use std::net::IpAddr;

use crate::message::auth::{Challenge, Credential};
use crate::message::{HostPort, SipMethod, Uri};

/// The `Call-ID` SIP header.
///
/// Uniquely identifies a particular invitation or all
/// registrations of a particular client.
#[derive(Debug, PartialEq, Eq, Clone, Hash)]
pub struct CallId(String);

impl CallId {
    /// Creates a new `CallId` instance with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the internal `CallId` identifier.
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Call-ID: {}", self.0)
    }
}

/// The `CSeq` SIP header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct CSeq {
    /// The sequence number.
    pub cseq: u32,
    /// The method of the request this sequence number belongs to.
    pub method: SipMethod,
}

impl CSeq {
    pub fn new(cseq: u32, method: SipMethod) -> Self {
        Self { cseq, method }
    }

    /// Returns the method carried by this header.
    pub fn method(&self) -> SipMethod {
        self.method
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CSeq: {} {}", self.cseq, self.method)
    }
}

/// The `From` SIP header.
///
/// Indicates the initiator of the request.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct From {
    /// The URI of the initiator.
    pub uri: Uri,
    /// The tag parameter.
    pub tag: Option<String>,
}

impl From {
    pub fn new(uri: Uri) -> Self {
        Self { uri, tag: None }
    }

    pub fn with_tag(uri: Uri, tag: impl Into<String>) -> Self {
        Self {
            uri,
            tag: Some(tag.into()),
        }
    }

    /// Returns the tag parameter.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Get the URI of the `From` header.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl fmt::Display for From {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "From: <{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// The `To` SIP header.
///
/// Specifies the logical recipient of the request.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct To {
    /// The URI of the recipient.
    pub uri: Uri,
    /// The tag parameter.
    pub tag: Option<String>,
}

impl To {
    pub fn new(uri: Uri) -> Self {
        Self { uri, tag: None }
    }

    pub fn with_tag(uri: Uri, tag: impl Into<String>) -> Self {
        Self {
            uri,
            tag: Some(tag.into()),
        }
    }

    /// Returns the tag parameter.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Sets the tag parameter.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = Some(tag.into());
    }
}

impl fmt::Display for To {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "To: <{}>", self.uri)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={}", tag)?;
        }
        Ok(())
    }
}

/// The `Via` SIP header.
///
/// Records the path a request has taken and where the response must return.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Via {
    /// The transport the message was sent over ("UDP", "TCP", ...).
    pub transport: String,
    /// The sent-by host and port.
    pub sent_by: HostPort,
    /// The branch parameter.
    pub branch: Option<String>,
    /// The received parameter (RFC 3581).
    pub received: Option<IpAddr>,
    /// The rport parameter (RFC 3581).
    pub rport: Option<u16>,
}

impl Via {
    pub fn new(transport: impl Into<String>, sent_by: HostPort) -> Self {
        Self {
            transport: transport.into(),
            sent_by,
            branch: None,
            received: None,
            rport: None,
        }
    }

    /// Returns the branch parameter.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    /// Sets the source IP address the message actually came from.
    pub fn set_received(&mut self, addr: IpAddr) {
        self.received = Some(addr);
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Via: SIP/2.0/{} {}", self.transport, self.sent_by)?;
        if let Some(rport) = self.rport {
            write!(f, ";rport={}", rport)?;
        }
        if let Some(received) = self.received {
            write!(f, ";received={}", received)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        Ok(())
    }
}

/// The `WWW-Authenticate` SIP header.
///
/// Carries the challenge the server demands credentials for.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct WWWAuthenticate(pub Challenge);

impl fmt::Display for WWWAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WWW-Authenticate: {}", self.0)
    }
}

/// The `Authorization` SIP header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Authorization(pub Credential);

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Authorization: {}", self.0)
    }
}

/// The `Content-Length` SIP header.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct ContentLength(pub u32);

impl fmt::Display for ContentLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Content-Length: {}", self.0)
    }
}

/// An SIP header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Header {
    Via(Via),
    From(From),
    To(To),
    CallId(CallId),
    CSeq(CSeq),
    RecordRoute(String),
    WWWAuthenticate(WWWAuthenticate),
    Authorization(Authorization),
    ContentLength(ContentLength),
    /// Any header without a concrete type, kept as name and raw value.
    Other {
        name: String,
        value: String,
    },
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Header::Via(h) => write!(f, "{}", h),
            Header::From(h) => write!(f, "{}", h),
            Header::To(h) => write!(f, "{}", h),
            Header::CallId(h) => write!(f, "{}", h),
            Header::CSeq(h) => write!(f, "{}", h),
            Header::RecordRoute(v) => write!(f, "Record-Route: {}", v),
            Header::WWWAuthenticate(h) => write!(f, "{}", h),
            Header::Authorization(h) => write!(f, "{}", h),
            Header::ContentLength(h) => write!(f, "{}", h),
            Header::Other { name, value } => write!(f, "{}: {}", name, value),
        }
    }
}

/// An ordered list of SIP headers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Creates an empty header list with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    /// Appends a header to the list.
    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Returns an iterator over the headers.
    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.0.iter()
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when the list holds no header.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<Header> for Headers {
    fn extend<T: IntoIterator<Item = Header>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl std::convert::From<Vec<Header>> for Headers {
    fn from(headers: Vec<Header>) -> Self {
        Self(headers)
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
