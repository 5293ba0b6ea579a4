//! Shared fixtures for the crate tests.

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use crate::core::Core;
use crate::distributor::{AuthVerifier, CheckAuthResult, EndpointIdentifier};
use crate::endpoint::Endpoint;
use crate::events::SecurityEvents;
use crate::headers::{
    Authorization, CSeq, CallId, From as FromHdr, Header, Headers, To, Via, WWWAuthenticate,
};
use crate::message::auth::{Challenge, Credential, DigestChallenge, DigestCredential};
use crate::message::{HostPort, Request, Response, SipMethod, StatusCode, StatusLine, Uri};
use crate::serializer::{OverloadOracle, Serializer};
use crate::transport::{
    OutgoingResponse, Packet, RxRequest, RxResponse, Transport, TransportProtocol, TxRequest,
};
use crate::{Result, SipService};

pub(crate) fn peer_addr() -> SocketAddr {
    "127.0.0.1:5070".parse().unwrap()
}

pub(crate) fn new_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Polls `cond` until it holds, or panics after five (virtual) seconds.
pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

/// A transport that records everything sent through it.
pub(crate) struct MockTransport {
    addr: SocketAddr,
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            addr: "127.0.0.1:5060".parse().unwrap(),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_sent_text(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (buf, _) = sent.last()?;

        Some(String::from_utf8_lossy(buf).into_owned())
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, buf: &[u8], addr: &SocketAddr) -> Result<usize> {
        self.sent
            .lock()
            .unwrap()
            .push((Bytes::copy_from_slice(buf), *addr));

        Ok(buf.len())
    }

    fn protocol(&self) -> TransportProtocol {
        TransportProtocol::Udp
    }

    fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn local_name(&self) -> Cow<'_, str> {
        Cow::Borrowed("127.0.0.1:5060")
    }

    fn reliable(&self) -> bool {
        false
    }

    fn secure(&self) -> bool {
        false
    }
}

fn base_headers(
    method: SipMethod,
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
    branch: &str,
) -> Headers {
    let mut headers = Headers::with_capacity(5);

    let mut via = Via::new("UDP", HostPort::new("127.0.0.1", Some(5070)));
    via.branch = Some(branch.to_string());
    headers.push(Header::Via(via));

    headers.push(Header::From(FromHdr::with_tag(
        Uri::sip("alice", "atlanta.com"),
        from_tag,
    )));

    let to_uri = Uri::sip("bob", "biloxi.com");
    let to = match to_tag {
        Some(tag) => To::with_tag(to_uri, tag),
        None => To::new(to_uri),
    };
    headers.push(Header::To(to));

    headers.push(Header::CallId(CallId::new(call_id)));
    headers.push(Header::CSeq(CSeq::new(1, method)));

    headers
}

pub(crate) fn rx_request_on(
    transport: Arc<MockTransport>,
    method: SipMethod,
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
    branch: &str,
) -> RxRequest {
    let mut request = Request::new(method, Uri::sip("bob", "biloxi.com"));
    request.headers = base_headers(method, call_id, from_tag, to_tag, branch);

    let packet = Packet {
        payload: Bytes::new(),
        addr: peer_addr(),
        time: SystemTime::now(),
    };

    RxRequest::new(request, transport, packet).unwrap()
}

pub(crate) fn rx_request(
    method: SipMethod,
    call_id: &str,
    from_tag: &str,
    to_tag: Option<&str>,
) -> (RxRequest, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let request = rx_request_on(
        transport.clone(),
        method,
        call_id,
        from_tag,
        to_tag,
        "z9hG4bK74bf9",
    );

    (request, transport)
}

/// Like [`rx_request`], with the given user in the `From` URI.
pub(crate) fn rx_request_from_user(
    user: &str,
    method: SipMethod,
    call_id: &str,
    from_tag: &str,
) -> (RxRequest, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let mut request = Request::new(method, Uri::sip("bob", "biloxi.com"));
    request.headers = base_headers(method, call_id, from_tag, None, "z9hG4bK74bf9");

    // Swap the From header for one naming `user`.
    let headers: Vec<Header> = request
        .headers
        .iter()
        .map(|h| match h {
            Header::From(from) => Header::From(FromHdr::with_tag(
                Uri::sip(user, "atlanta.com"),
                from.tag().unwrap_or_default(),
            )),
            other => other.clone(),
        })
        .collect();
    request.headers = Headers::from(headers);

    let packet = Packet {
        payload: Bytes::new(),
        addr: peer_addr(),
        time: SystemTime::now(),
    };

    let request = RxRequest::new(request, transport.clone(), packet).unwrap();
    (request, transport)
}

/// Like [`rx_request`], with a digest `Authorization` header whose response
/// hash is `response`.
pub(crate) fn rx_request_with_auth(
    method: SipMethod,
    call_id: &str,
    from_tag: &str,
    response: &str,
) -> (RxRequest, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let mut request = Request::new(method, Uri::sip("bob", "biloxi.com"));
    request.headers = base_headers(method, call_id, from_tag, None, "z9hG4bK74bf9");
    request
        .headers
        .push(Header::Authorization(Authorization(Credential::Digest(
            DigestCredential {
                username: Some("alice".into()),
                response: Some(response.into()),
                ..Default::default()
            },
        ))));

    let packet = Packet {
        payload: Bytes::new(),
        addr: peer_addr(),
        time: SystemTime::now(),
    };

    let request = RxRequest::new(request, transport.clone(), packet).unwrap();
    (request, transport)
}

pub(crate) fn rx_response(
    status: StatusCode,
    call_id: &str,
    from_tag: &str,
    to_tag: &str,
    branch: &str,
    cseq_method: SipMethod,
) -> (RxResponse, Arc<MockTransport>) {
    let transport = MockTransport::new();
    let mut response = Response::new(StatusLine::new(status));
    response.headers = base_headers(cseq_method, call_id, from_tag, Some(to_tag), branch);

    let packet = Packet {
        payload: Bytes::new(),
        addr: peer_addr(),
        time: SystemTime::now(),
    };

    let response = RxResponse::new(response, transport.clone(), packet).unwrap();
    (response, transport)
}

pub(crate) fn tx_request(method: SipMethod, call_id: &str, branch: &str) -> TxRequest {
    let mut request = Request::new(method, Uri::sip("bob", "biloxi.com"));
    request.headers = base_headers(method, call_id, "T1", None, branch);

    TxRequest::new(request)
}

pub(crate) fn booted_core() -> Core {
    let core = Core::builder().with_name("test").build();
    core.set_fully_booted();

    core
}

/// What a [`RecordingService`] saw when a message passed it.
#[derive(Clone)]
pub(crate) struct SeenMessage {
    pub call_id: String,
    pub serializer: Option<Arc<str>>,
    pub endpoint: Option<Arc<Endpoint>>,
}

/// A service that records every message it sees, optionally consuming it.
pub(crate) struct RecordingService {
    name: String,
    priority: i32,
    consume: bool,
    seen: Mutex<Vec<SeenMessage>>,
}

impl RecordingService {
    pub fn new(name: &str, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            consume: false,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn consuming(name: &str, priority: i32) -> Self {
        Self {
            consume: true,
            ..Self::new(name, priority)
        }
    }

    pub fn seen(&self) -> Vec<SeenMessage> {
        self.seen.lock().unwrap().clone()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    /// Drops everything recorded so far, including the endpoint references
    /// the records hold.
    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

#[async_trait::async_trait]
impl SipService for RecordingService {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn on_rx_request(&self, _core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        if let Some(req) = request.as_ref() {
            self.seen.lock().unwrap().push(SeenMessage {
                call_id: req.call_id().id().to_string(),
                serializer: Serializer::current_name(),
                endpoint: req.endpoint(),
            });
            if self.consume {
                request.take();
            }
        }

        Ok(())
    }

    async fn on_rx_response(&self, _core: &Core, response: &mut Option<RxResponse>) -> Result<()> {
        if let Some(resp) = response.as_ref() {
            self.seen.lock().unwrap().push(SeenMessage {
                call_id: resp.call_id().id().to_string(),
                serializer: Serializer::current_name(),
                endpoint: None,
            });
            if self.consume {
                response.take();
            }
        }

        Ok(())
    }
}

/// A security-event sink that counts what it is told.
#[derive(Default)]
pub(crate) struct RecordingEvents {
    pub invalid: Mutex<Vec<String>>,
    pub challenges: Mutex<usize>,
    pub successes: Mutex<usize>,
    pub failures: Mutex<usize>,
}

impl SecurityEvents for RecordingEvents {
    fn invalid_endpoint(&self, name: &str, _request: &RxRequest) {
        self.invalid.lock().unwrap().push(name.to_string());
    }

    fn auth_challenge_sent(&self, _endpoint: &Endpoint, _request: &RxRequest) {
        *self.challenges.lock().unwrap() += 1;
    }

    fn auth_success(&self, _endpoint: &Endpoint, _request: &RxRequest) {
        *self.successes.lock().unwrap() += 1;
    }

    fn auth_failed_challenge_response(&self, _endpoint: &Endpoint, _request: &RxRequest) {
        *self.failures.lock().unwrap() += 1;
    }
}

/// An overload oracle pinned to whatever the test needs.
pub(crate) struct PinnedOracle(AtomicBool);

impl PinnedOracle {
    pub fn new(alert: bool) -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(alert)))
    }

    pub fn set(&self, alert: bool) {
        self.0.store(alert, Ordering::SeqCst);
    }
}

impl OverloadOracle for PinnedOracle {
    fn alert(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identifies endpoints by the user part of the From URI.
pub(crate) struct MapIdentifier {
    name: String,
    by_user: HashMap<String, Arc<Endpoint>>,
}

impl MapIdentifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            by_user: HashMap::new(),
        }
    }

    pub fn with(mut self, user: &str, endpoint: Arc<Endpoint>) -> Self {
        self.by_user.insert(user.to_string(), endpoint);
        self
    }
}

#[async_trait::async_trait]
impl EndpointIdentifier for MapIdentifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn identify(&self, _core: &Core, request: &RxRequest) -> Option<Arc<Endpoint>> {
        let user = request.from().uri().user.as_deref()?;

        self.by_user.get(user).cloned()
    }
}

/// A verifier that always returns the same verdict.
pub(crate) struct StaticVerifier(pub CheckAuthResult);

#[async_trait::async_trait]
impl AuthVerifier for StaticVerifier {
    async fn check(
        &self,
        _endpoint: &Endpoint,
        _request: &RxRequest,
        _challenge: &mut OutgoingResponse,
    ) -> CheckAuthResult {
        self.0
    }
}

/// A digest verifier good enough for pipeline tests: a credential whose
/// response hash is literally `"valid"` passes, anything else re-challenges,
/// no credential at all draws the initial challenge.
pub(crate) struct DigestFakeVerifier {
    pub realm: String,
    pub nonce: String,
}

impl DigestFakeVerifier {
    pub fn new(realm: &str, nonce: &str) -> Self {
        Self {
            realm: realm.to_string(),
            nonce: nonce.to_string(),
        }
    }

    fn fill_challenge(&self, challenge: &mut OutgoingResponse) {
        challenge
            .headers_mut()
            .push(Header::WWWAuthenticate(WWWAuthenticate(Challenge::Digest(
                DigestChallenge {
                    realm: Some(self.realm.clone()),
                    nonce: Some(self.nonce.clone()),
                    algorithm: Some("MD5".into()),
                    qop: Some("auth".into()),
                    ..Default::default()
                },
            ))));
    }
}

#[async_trait::async_trait]
impl AuthVerifier for DigestFakeVerifier {
    async fn check(
        &self,
        _endpoint: &Endpoint,
        request: &RxRequest,
        challenge: &mut OutgoingResponse,
    ) -> CheckAuthResult {
        let credential = request.request().headers.iter().find_map(|h| match h {
            Header::Authorization(Authorization(Credential::Digest(digest))) => {
                Some(digest.clone())
            }
            _ => None,
        });

        match credential {
            Some(digest) if digest.response.as_deref() == Some("valid") => {
                CheckAuthResult::Success
            }
            Some(_) => {
                self.fill_challenge(challenge);
                CheckAuthResult::Failed
            }
            None => {
                self.fill_challenge(challenge);
                CheckAuthResult::Challenge
            }
        }
    }
}
