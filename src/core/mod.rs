//! SIP Core.
//!
//! The [`Core`] is the stack handle everything plugs into: it owns the
//! dialog and transaction registries and runs every received message through
//! the priority-ordered [`SipService`] chain.

pub mod builder;
pub mod service;

pub use builder::Builder;
pub use service::SipService;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use rand::distr::Alphanumeric;
use rand::Rng;

use crate::dialog::DialogLayer;
use crate::error::{Error, Result};
use crate::headers::{Header, Via};
use crate::message::{Response, StatusCode, StatusLine};
use crate::transaction::TsxLayer;
use crate::transport::{OutgoingResponse, Packet, RxRequest, RxResponse, ToBytes, TxRequest};

pub(crate) struct Registered {
    pub(crate) priority: i32,
    pub(crate) service: Arc<dyn SipService>,
}

impl Registered {
    pub(crate) fn new(service: Arc<dyn SipService>) -> Self {
        Self {
            priority: service.priority(),
            service,
        }
    }
}

impl Clone for Registered {
    fn clone(&self) -> Self {
        Self {
            priority: self.priority,
            service: self.service.clone(),
        }
    }
}

pub(crate) struct Inner {
    /// The name of the core.
    pub(crate) name: String,
    /// The dialog registry.
    pub(crate) dialogs: DialogLayer,
    /// The transaction registry.
    pub(crate) transactions: TsxLayer,
    /// The service chain, kept sorted by priority.
    pub(crate) services: RwLock<Vec<Registered>>,
    /// Set once startup has finished; messages arriving earlier are ignored.
    pub(crate) fully_booted: AtomicBool,
}

/// The SIP core.
///
/// A cheaply clonable handle; all clones share the same state.
#[derive(Clone)]
pub struct Core(pub(crate) Arc<Inner>);

impl Core {
    /// Returns a builder to create a `Core`.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Get the core name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// The dialog registry.
    pub fn dialogs(&self) -> &DialogLayer {
        &self.0.dialogs
    }

    /// The transaction registry.
    pub fn transactions(&self) -> &TsxLayer {
        &self.0.transactions
    }

    /// Whether startup has finished.
    pub fn is_fully_booted(&self) -> bool {
        self.0.fully_booted.load(Ordering::SeqCst)
    }

    /// Marks startup as finished. One-way.
    pub fn set_fully_booted(&self) {
        self.0.fully_booted.store(true, Ordering::SeqCst);
    }

    /// Adds a service to the chain at its declared priority.
    ///
    /// Fails if a service with the same name is already registered, leaving
    /// the chain untouched.
    pub fn register_service(&self, service: Arc<dyn SipService>) -> Result<()> {
        let mut services = self.0.services.write().expect("Lock failed");

        let name = service.name();
        if services.iter().any(|s| s.service.name() == name) {
            return Err(Error::ServiceExists(name.to_string()));
        }

        let entry = Registered::new(service);
        let pos = services.partition_point(|s| s.priority <= entry.priority);
        log::debug!(
            "Service '{}' registered at priority {}",
            entry.service.name(),
            entry.priority
        );
        services.insert(pos, entry);

        Ok(())
    }

    /// Removes a service from the chain by name.
    pub fn unregister_service(&self, name: &str) -> Option<Arc<dyn SipService>> {
        let mut services = self.0.services.write().expect("Lock failed");
        let pos = services.iter().position(|s| s.service.name() == name)?;

        Some(services.remove(pos).service)
    }

    fn snapshot(&self) -> Vec<Registered> {
        self.0.services.read().expect("Lock failed").clone()
    }

    /// Feeds a received request into the service chain.
    pub async fn receive_request(&self, request: RxRequest) -> Result<()> {
        log::debug!("<= Request {}", request);

        let mut msg = Some(request);
        self.run_request_chain(&mut msg, None).await?;

        if let Some(msg) = msg {
            log::debug!("Request {} was unhandled by any service", msg);
        }

        Ok(())
    }

    /// Feeds a received response into the service chain.
    pub async fn receive_response(&self, response: RxResponse) -> Result<()> {
        log::debug!("<= Response {}", response);

        let mut msg = Some(response);
        self.run_response_chain(&mut msg, None).await?;

        if let Some(msg) = msg {
            log::debug!("Response {} was unhandled by any service", msg);
        }

        Ok(())
    }

    /// Runs the request chain, optionally resuming at the service right after
    /// `start_after`.
    pub(crate) async fn run_request_chain(
        &self,
        request: &mut Option<RxRequest>,
        start_after: Option<&str>,
    ) -> Result<()> {
        let services = self.snapshot();
        let mut skipping = start_after.is_some();

        for entry in services {
            if skipping {
                if Some(entry.service.name()) == start_after {
                    skipping = false;
                }
                continue;
            }
            entry.service.on_rx_request(self, request).await?;
            if request.is_none() {
                break;
            }
        }

        Ok(())
    }

    /// Runs the response chain, optionally resuming at the service right
    /// after `start_after`.
    pub(crate) async fn run_response_chain(
        &self,
        response: &mut Option<RxResponse>,
        start_after: Option<&str>,
    ) -> Result<()> {
        let services = self.snapshot();
        let mut skipping = start_after.is_some();

        for entry in services {
            if skipping {
                if Some(entry.service.name()) == start_after {
                    skipping = false;
                }
                continue;
            }
            entry.service.on_rx_response(self, response).await?;
            if response.is_none() {
                break;
            }
        }

        Ok(())
    }

    /// Runs the transmit hooks over an outbound request, then sends it when a
    /// destination is wired up.
    pub async fn send_request(&self, request: &mut TxRequest) -> Result<()> {
        let services = self.snapshot();
        for entry in services {
            entry.service.on_tx_request(self, request).await?;
        }

        if let (Some(addr), Some(transport)) = (request.addr, request.transport.clone()) {
            log::debug!("=> Request {} to /{}", request.request.method(), addr);
            let buf = match request.buf.take() {
                Some(buf) => buf,
                None => request.to_bytes()?,
            };
            transport.send(&buf, &addr).await?;
            request.buf = Some(buf);
        }

        Ok(())
    }

    /// Creates a new SIP response based on an incoming request.
    ///
    /// Copies the `Via` chain, `Record-Route` set, `Call-ID`, `From`, `To`
    /// and `CSeq` headers from the request, adding a `To` tag on final
    /// responses per RFC 3261 section 8.2.6.2.
    pub fn new_response(&self, request: &RxRequest, code: StatusCode) -> OutgoingResponse {
        let mut headers = crate::headers::Headers::with_capacity(7);
        let msg_headers = &request.request().headers;

        // `Via` headers: the stored topmost one (with `received` filled in),
        // then the rest as they arrived.
        headers.push(Header::Via(request.via().clone()));
        let via = msg_headers
            .iter()
            .filter(|h| matches!(h, Header::Via(_)))
            .skip(1);
        headers.extend(via.cloned());

        // `Record-Route` headers.
        let rr = msg_headers
            .iter()
            .filter(|h| matches!(h, Header::RecordRoute(_)));
        headers.extend(rr.cloned());

        // `Call-ID` and `From`.
        headers.push(Header::CallId(request.call_id().clone()));
        headers.push(Header::From(request.from().clone()));

        // `To` header.
        // 8.2.6.2 Headers and Tags
        // The UAS MUST add a tag to the To header field in the response
        // (with the exception of the 100 (Trying) response).
        let mut to = request.to().clone();
        if to.tag().is_none() && code.into_i32() > 100 {
            match request.via().branch() {
                Some(branch) => to.set_tag(branch),
                None => to.set_tag(random_tag()),
            }
        }
        headers.push(Header::To(to));

        // `CSeq` header.
        headers.push(Header::CSeq(*request.cseq()));

        OutgoingResponse {
            response: Response {
                status_line: StatusLine::new(code),
                headers,
                body: None,
            },
            addr: response_addr(request.via(), request.packet()),
            transport: request.transport().clone(),
            buf: None,
        }
    }

    /// Sends a SIP response over the transport the request arrived on.
    pub async fn send_response(&self, response: &mut OutgoingResponse) -> Result<()> {
        log::debug!(
            "=> Response {} {}",
            response.status_code().into_i32(),
            response.reason()
        );

        let buf = match response.buf.take() {
            Some(buf) => buf,
            None => response.to_bytes()?,
        };
        response.transport.send(&buf, &response.addr).await?;
        response.buf = Some(buf);

        Ok(())
    }

    /// Responds to a request statelessly: no transaction is created and no
    /// state is kept.
    pub async fn respond_statelessly(&self, request: &RxRequest, code: StatusCode) -> Result<()> {
        let mut response = self.new_response(request, code);

        self.send_response(&mut response).await
    }
}

/// Return address for a response, per RFC 3261 section 18.2.2 and RFC 3581.
fn response_addr(via: &Via, packet: &Packet) -> SocketAddr {
    match (via.received, via.rport) {
        (Some(ip), Some(rport)) => SocketAddr::new(ip, rport),
        (Some(ip), None) => SocketAddr::new(ip, via.sent_by.port.unwrap_or(5060)),
        _ => packet.addr,
    }
}

fn random_tag() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;
    use crate::message::SipMethod;

    #[tokio::test]
    async fn test_register_service_rejects_duplicates() {
        let core = Core::builder().with_name("test").build();

        let first = Arc::new(test_utils::RecordingService::new("app", 64));
        let second = Arc::new(test_utils::RecordingService::new("app", 64));

        core.register_service(first).unwrap();
        let err = core.register_service(second).unwrap_err();
        assert_matches!(err, Error::ServiceExists(name) if name == "app");

        assert!(core.unregister_service("app").is_some());
        assert!(core.unregister_service("app").is_none());
    }

    #[tokio::test]
    async fn test_new_response_adds_to_tag_on_final() {
        let core = Core::builder().build();
        let (request, _) = test_utils::rx_request(SipMethod::Options, "abc@x", "T1", None);

        let response = core.new_response(&request, StatusCode::NotImplemented);
        let to = response
            .response
            .headers
            .iter()
            .find_map(|h| match h {
                Header::To(to) => Some(to.clone()),
                _ => None,
            })
            .unwrap();

        // The branch doubles as the local tag.
        assert_eq!(to.tag(), request.via().branch());
    }

    #[tokio::test]
    async fn test_response_addr_prefers_rport() {
        let core = Core::builder().build();
        let (mut request, _) = test_utils::rx_request(SipMethod::Options, "abc@x", "T1", None);
        request.mandatory_headers.via.rport = Some(5071);
        request.mandatory_headers.via.received = Some("10.1.2.3".parse().unwrap());

        let response = core.new_response(&request, StatusCode::Ok);
        assert_eq!(response.addr, "10.1.2.3:5071".parse().unwrap());
    }

    #[tokio::test]
    async fn test_send_request_transmits_encoded_bytes() {
        use crate::transport::Transport;

        let core = Core::builder().build();
        let transport = test_utils::MockTransport::new();

        let mut request = test_utils::tx_request(SipMethod::Options, "tx@x", "z9hG4bKtx1");
        let wired: Arc<dyn Transport> = transport.clone();
        request.addr = Some("127.0.0.1:5070".parse().unwrap());
        request.transport = Some(wired);

        core.send_request(&mut request).await.unwrap();

        assert_eq!(transport.sent_count(), 1);
        let text = transport.last_sent_text().unwrap();
        assert!(text.starts_with("OPTIONS sip:bob@biloxi.com SIP/2.0\r\n"));
        assert!(text.contains("Via: SIP/2.0/UDP 127.0.0.1:5070;branch=z9hG4bKtx1\r\n"));
        assert!(text.contains("Call-ID: tx@x\r\n"));
        assert!(text.contains("CSeq: 1 OPTIONS\r\n"));
        assert!(text.ends_with("Content-Length: 0\r\n\r\n"));

        // The encoded buffer stays on the message for retransmission.
        assert!(request.buf.is_some());
    }
}
