//! SIP Transport Layer.
//!
//! The [`Transport`] trait abstracts a wire protocol; [`RxRequest`] and
//! [`RxResponse`] wrap an already-parsed message together with the packet it
//! arrived in and the per-module data slots the services communicate through.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::headers::{CSeq, CallId, ContentLength, From as FromHdr, Header, Headers, To, Via};
use crate::message::{Request, Response, SipMethod, StatusCode};

pub mod udp;

/// This trait represents a abstraction over a SIP transport implementation.
#[async_trait::async_trait]
pub trait Transport: Sync + Send + 'static {
    /// Sends a buffer to the specified remote socket address.
    ///
    /// Returns the number of bytes sent or an I/O error.
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize>;

    /// Returns the transport kind (e.g., UDP, TCP).
    fn protocol(&self) -> TransportProtocol;

    /// Returns the local socket address bound to this transport.
    fn addr(&self) -> SocketAddr;

    /// Returns the local transport name.
    fn local_name(&self) -> Cow<'_, str>;

    /// Returns `true` if the transport is reliable (e.g., TCP or TLS).
    fn reliable(&self) -> bool;

    /// Returns `true` if the transport is secure (e.g., TLS).
    fn secure(&self) -> bool;
}

/// The transport protocol of a SIP message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TransportProtocol {
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Udp => write!(f, "UDP"),
            TransportProtocol::Tcp => write!(f, "TCP"),
            TransportProtocol::Tls => write!(f, "TLS"),
            TransportProtocol::Ws => write!(f, "WS"),
        }
    }
}

/// This type represents a received SIP packet.
#[derive(Clone)]
pub struct Packet {
    /// The packet payload.
    pub payload: Bytes,
    /// The address of the sender.
    pub addr: SocketAddr,
    /// The time the packet was received.
    pub time: SystemTime,
}

/// Handler for raw packets delivered by a transport.
///
/// The parser sits outside this crate; whoever wires a transport up turns the
/// packet into a parsed message and feeds it to the stack core.
#[async_trait::async_trait]
pub trait PacketHandler: Send + Sync + 'static {
    /// Called for every packet the transport receives.
    async fn handle_packet(&self, transport: Arc<dyn Transport>, packet: Packet);
}

pub(crate) fn get_local_name(addr: &SocketAddr) -> String {
    let ip = local_ip_address::local_ip().unwrap_or(addr.ip());

    format!("{}:{}", ip, addr.port())
}

/// Number of per-module data slots a message carries.
///
/// The set of services that attach data to messages is known up front, so the
/// slots are a fixed-size array rather than a map.
pub(crate) const MOD_DATA_SLOTS: usize = 4;

/// Index of a per-module data slot on a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModSlot(pub(crate) usize);

/// A value stored in a per-module data slot.
#[derive(Clone, EnumAsInner)]
pub enum SlotValue {
    /// A reference to an identified remote endpoint.
    Endpoint(Arc<Endpoint>),
    /// A serializer name.
    Name(Arc<str>),
}

/// The per-module data slots attached to every message.
#[derive(Clone)]
pub struct ModData {
    slots: [Option<SlotValue>; MOD_DATA_SLOTS],
}

impl Default for ModData {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl ModData {
    pub(crate) fn get(&self, slot: ModSlot) -> Option<&SlotValue> {
        self.slots[slot.0].as_ref()
    }

    pub(crate) fn set(&mut self, slot: ModSlot, value: SlotValue) {
        self.slots[slot.0] = Some(value);
    }
}

/// The mandatory headers every message must carry, extracted once so the
/// services don't have to walk the header list repeatedly.
#[derive(Debug, Clone)]
pub struct MandatoryHeaders {
    /// The topmost `Via` header, with `received` filled in.
    pub via: Via,
    /// The `From` header.
    pub from: FromHdr,
    /// The `To` header.
    pub to: To,
    /// The `Call-ID` header.
    pub call_id: CallId,
    /// The `CSeq` header.
    pub cseq: CSeq,
}

fn extract_mandatory_headers(headers: &Headers, packet: &Packet) -> Result<MandatoryHeaders> {
    let mut via: Option<Via> = None;
    let mut from: Option<FromHdr> = None;
    let mut to: Option<To> = None;
    let mut call_id: Option<CallId> = None;
    let mut cseq: Option<CSeq> = None;

    for header in headers.iter() {
        match header {
            Header::Via(v) if via.is_none() => via = Some(v.clone()),
            Header::From(f) => from = Some(f.clone()),
            Header::To(t) => to = Some(t.clone()),
            Header::CallId(c) => call_id = Some(c.clone()),
            Header::CSeq(c) => cseq = Some(*c),
            _ => (),
        }
    }

    let Some(mut via) = via else {
        return Err(Error::MissingRequiredHeader("Via"));
    };
    let Some(from) = from else {
        return Err(Error::MissingRequiredHeader("From"));
    };
    let Some(to) = to else {
        return Err(Error::MissingRequiredHeader("To"));
    };
    let Some(call_id) = call_id else {
        return Err(Error::MissingRequiredHeader("Call-ID"));
    };
    let Some(cseq) = cseq else {
        return Err(Error::MissingRequiredHeader("CSeq"));
    };

    // 4. Server Behavior (https://datatracker.ietf.org/doc/html/rfc3581#section-4)
    // The server MUST insert a "received" parameter containing the source IP
    // address that the request came from even if it is identical to the value
    // of the "sent-by" component.
    via.set_received(packet.addr.ip());

    Ok(MandatoryHeaders {
        via,
        from,
        to,
        call_id,
        cseq,
    })
}

/// This type represents a received SIP request.
pub struct RxRequest {
    pub(crate) request: Request,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) packet: Packet,
    pub(crate) mandatory_headers: MandatoryHeaders,
    pub(crate) mod_data: ModData,
}

impl RxRequest {
    /// Wraps a parsed request together with the packet it arrived in.
    pub fn new(request: Request, transport: Arc<dyn Transport>, packet: Packet) -> Result<Self> {
        let mandatory_headers = extract_mandatory_headers(&request.headers, &packet)?;

        Ok(Self {
            request,
            transport,
            packet,
            mandatory_headers,
            mod_data: ModData::default(),
        })
    }

    /// Returns the message method.
    pub fn method(&self) -> SipMethod {
        self.request.method()
    }

    /// Returns `true` if the message method matches the given `SipMethod`.
    #[inline(always)]
    pub fn is_method(&self, method: &SipMethod) -> bool {
        self.request.method() == *method
    }

    /// Returns the request body.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Returns the `Call-ID` header of the request.
    pub fn call_id(&self) -> &CallId {
        &self.mandatory_headers.call_id
    }

    /// Returns the `From` header of the request.
    pub fn from(&self) -> &FromHdr {
        &self.mandatory_headers.from
    }

    /// Returns the `To` header of the request.
    pub fn to(&self) -> &To {
        &self.mandatory_headers.to
    }

    /// Returns the `CSeq` header of the request.
    pub fn cseq(&self) -> &CSeq {
        &self.mandatory_headers.cseq
    }

    /// Returns the topmost `Via` header of the request.
    pub fn via(&self) -> &Via {
        &self.mandatory_headers.via
    }

    /// Gets the source socket address of the packet.
    pub fn addr(&self) -> SocketAddr {
        self.packet.addr
    }

    pub(crate) fn packet(&self) -> &Packet {
        &self.packet
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the endpoint identified for this request, if any.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        self.mod_data
            .get(crate::distributor::ENDPOINT_SLOT)?
            .as_endpoint()
            .cloned()
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Arc<Endpoint>) {
        self.mod_data
            .set(crate::distributor::ENDPOINT_SLOT, SlotValue::Endpoint(endpoint));
    }
}

impl fmt::Display for RxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {} (callid {})",
            self.method(),
            self.packet.addr,
            self.call_id().id()
        )
    }
}

/// Represents a received SIP response.
pub struct RxResponse {
    pub(crate) response: Response,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) packet: Packet,
    pub(crate) mandatory_headers: MandatoryHeaders,
    pub(crate) mod_data: ModData,
}

impl RxResponse {
    /// Wraps a parsed response together with the packet it arrived in.
    pub fn new(response: Response, transport: Arc<dyn Transport>, packet: Packet) -> Result<Self> {
        let mandatory_headers = extract_mandatory_headers(&response.headers, &packet)?;

        Ok(Self {
            response,
            transport,
            packet,
            mandatory_headers,
            mod_data: ModData::default(),
        })
    }

    /// Returns the response status code.
    pub fn status_code(&self) -> StatusCode {
        self.response.status_code()
    }

    /// Returns the `Call-ID` header of the response.
    pub fn call_id(&self) -> &CallId {
        &self.mandatory_headers.call_id
    }

    /// Returns the `From` header of the response.
    pub fn from(&self) -> &FromHdr {
        &self.mandatory_headers.from
    }

    /// Returns the `To` header of the response.
    pub fn to(&self) -> &To {
        &self.mandatory_headers.to
    }

    /// Returns the `CSeq` header of the response.
    pub fn cseq(&self) -> &CSeq {
        &self.mandatory_headers.cseq
    }

    /// Returns the topmost `Via` header of the response.
    pub fn via(&self) -> &Via {
        &self.mandatory_headers.via
    }

    /// Gets the source socket address of the packet.
    pub fn addr(&self) -> SocketAddr {
        self.packet.addr
    }

    pub(crate) fn set_endpoint(&mut self, endpoint: Arc<Endpoint>) {
        self.mod_data
            .set(crate::distributor::ENDPOINT_SLOT, SlotValue::Endpoint(endpoint));
    }
}

impl fmt::Display for RxResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} response from {} (callid {})",
            self.status_code(),
            self.packet.addr,
            self.call_id().id()
        )
    }
}

/// This type represents an outbound SIP request.
pub struct TxRequest {
    /// The SIP request message.
    pub request: Request,
    /// The address to send the request to, when known.
    pub addr: Option<SocketAddr>,
    /// The transport to use for sending the request, when known.
    pub transport: Option<Arc<dyn Transport>>,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
    pub(crate) mod_data: ModData,
}

impl TxRequest {
    /// Creates an outbound request with no destination wired up yet.
    pub fn new(request: Request) -> Self {
        Self {
            request,
            addr: None,
            transport: None,
            buf: None,
            mod_data: ModData::default(),
        }
    }

    /// Name of the serializer this request was sent from, if recorded.
    pub fn serializer_name(&self) -> Option<Arc<str>> {
        self.mod_data
            .get(crate::distributor::SERIALIZER_SLOT)?
            .as_name()
            .cloned()
    }

    pub(crate) fn set_serializer_name(&mut self, name: Arc<str>) {
        self.mod_data
            .set(crate::distributor::SERIALIZER_SLOT, SlotValue::Name(name));
    }
}

impl ToBytes for TxRequest {
    fn to_bytes(&self) -> Result<Bytes> {
        let estimated_message_size = if self.request.body.is_none() { 800 } else { 1500 };
        let buf = BytesMut::with_capacity(estimated_message_size);

        let mut buf_writer = buf.writer();

        // Request line.
        write!(buf_writer, "{}", &self.request.req_line)?;

        // Headers.
        for header in self.request.headers.iter() {
            write!(buf_writer, "{header}\r\n")?;
        }

        // Body.
        if let Some(body) = &self.request.body {
            write!(buf_writer, "{}\r\n\r\n", ContentLength(body.len() as u32))?;
            buf_writer.write_all(body)?;
        } else {
            write!(buf_writer, "{}\r\n\r\n", ContentLength(0))?;
        }

        Ok(buf_writer.into_inner().freeze())
    }
}

/// This trait is used to convert a type into a byte buffer.
pub trait ToBytes: Sized {
    /// Converts the type into a byte buffer.
    fn to_bytes(&self) -> Result<Bytes>;
}

/// This type represents an outgoing SIP response.
pub struct OutgoingResponse {
    /// The SIP response message.
    pub response: Response,
    /// The address to send the response to.
    pub addr: SocketAddr,
    /// The transport to send the response over.
    pub transport: Arc<dyn Transport>,
    /// The message raw buffer.
    pub buf: Option<Bytes>,
}

impl OutgoingResponse {
    /// Returns the message status code.
    pub fn status_code(&self) -> StatusCode {
        self.response.status_line.code
    }

    /// Returns the message reason text.
    pub fn reason(&self) -> &str {
        &self.response.status_line.reason
    }

    /// Returns a mutable reference to the response headers.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.response.headers
    }

    /// Set the message body.
    pub fn set_body(&mut self, body: Bytes) {
        self.response.body = Some(body);
    }
}

impl ToBytes for OutgoingResponse {
    fn to_bytes(&self) -> Result<Bytes> {
        let estimated_message_size = if self.response.body.is_none() { 800 } else { 1500 };
        let buf = BytesMut::with_capacity(estimated_message_size);

        let mut buf_writer = buf.writer();

        // Status line.
        write!(buf_writer, "{}", &self.response.status_line)?;

        // Headers.
        for header in self.response.headers.iter() {
            write!(buf_writer, "{header}\r\n")?;
        }

        // Body.
        if let Some(body) = &self.response.body {
            write!(buf_writer, "{}\r\n\r\n", ContentLength(body.len() as u32))?;
            buf_writer.write_all(body)?;
        } else {
            write!(buf_writer, "{}\r\n\r\n", ContentLength(0))?;
        }

        Ok(buf_writer.into_inner().freeze())
    }
}
