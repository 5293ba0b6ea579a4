//! The incoming-message distributor.
//!
//! Every message the transports deliver passes through here first. The
//! distributor picks the serializer that owns the message's conversation,
//! taking it from the dialog's attached state, from the transaction the
//! message answers, or by hashing Call-ID and remote tag over the pool, and
//! moves the message onto it. Endpoint identification and authentication then
//! run on the serializer, ahead of the application services.

pub mod auth;
pub mod identify;


pub use auth::{AuthVerifier, CheckAuthResult};
pub use identify::EndpointIdentifier;

use std::sync::{Arc, RwLock};

use crate::core::service::{SipService, PRIORITY_APPLICATION, PRIORITY_TSX_LAYER};
use crate::core::Core;
use crate::dialog::Dialog;
use crate::endpoint::{self, AuthRecord, Endpoint};
use crate::error::Result;
use crate::events::{LogEvents, SecurityEvents};
use crate::message::{SipMethod, StatusCode};
use crate::serializer::{
    OverloadOracle, Serializer, SerializerPool, SerializerRegistry, DEFAULT_POOL_SIZE,
};
use crate::transaction::TsxKey;
use crate::transport::{ModSlot, RxRequest, RxResponse, TxRequest};

use auth::AuthService;
use identify::{EndpointIdService, IdentifierEntry};

const DISTRIBUTOR_NAME: &str = "Request Distributor";
const ENDPOINT_ID_NAME: &str = "Endpoint Identifier";
const AUTH_NAME: &str = "Request Authenticator";

const DISTRIBUTOR_PRIORITY: i32 = PRIORITY_TSX_LAYER - 6;
const ENDPOINT_ID_PRIORITY: i32 = PRIORITY_TSX_LAYER - 3;
const AUTH_PRIORITY: i32 = PRIORITY_APPLICATION - 2;

/// Slot the serializer name is recorded in on outbound requests.
pub(crate) const SERIALIZER_SLOT: ModSlot = ModSlot(0);
/// Slot the identified endpoint is stored in on received messages.
pub(crate) const ENDPOINT_SLOT: ModSlot = ModSlot(1);

/// Configuration for [`Distributor::setup`].
pub struct DistributorConfig {
    /// Number of serializers in the pool. Best if prime.
    pub pool_size: usize,
    /// Prefix of the serializer names.
    pub prefix: String,
    /// Digest realm of the artificial credential.
    pub realm: String,
    /// Overload verdict source. Defaults to the pool's own queue accounting.
    pub oracle: Option<Arc<dyn OverloadOracle>>,
    /// Security-event sink. Defaults to [`LogEvents`].
    pub events: Option<Arc<dyn SecurityEvents>>,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            prefix: "sipdist".into(),
            realm: "sipdist".into(),
            oracle: None,
            events: None,
        }
    }
}

pub(crate) struct Shared {
    pub(crate) pool: SerializerPool,
    pub(crate) registry: SerializerRegistry,
    pub(crate) artificial_endpoint: Arc<Endpoint>,
    pub(crate) artificial_auth: Arc<AuthRecord>,
    pub(crate) oracle: Arc<dyn OverloadOracle>,
    pub(crate) events: Arc<dyn SecurityEvents>,
    pub(crate) identifiers: RwLock<Vec<IdentifierEntry>>,
    pub(crate) verifier: RwLock<Option<Arc<dyn AuthVerifier>>>,
}

impl Shared {
    fn pick_for_request(&self, request: &RxRequest) -> Serializer {
        let remote_tag = request.from().tag().unwrap_or_default();
        let serializer = self.pool.pick(request.call_id().id(), remote_tag);
        log::debug!(
            "Calculated serializer {} to use for {}",
            serializer.name(),
            request
        );

        serializer
    }

    fn pick_for_response(&self, response: &RxResponse) -> Serializer {
        let remote_tag = response.to().tag().unwrap_or_default();
        let serializer = self.pool.pick(response.call_id().id(), remote_tag);
        log::debug!(
            "Calculated serializer {} to use for {}",
            serializer.name(),
            response
        );

        serializer
    }

    /// Dialog a received request belongs to, if any.
    fn find_dialog_for_request(&self, core: &Core, request: &RxRequest) -> Option<Dialog> {
        // An incoming CANCEL without a to-tag can't be found by tags.
        // Instead, find the matching INVITE transaction and take the dialog
        // from the transaction.
        if request.is_method(&SipMethod::Cancel) && request.to().tag().is_none() {
            let key = TsxKey::for_cancel_target(request)?;
            let Some(tsx) = core.transactions().find_server(&key) else {
                log::warn!("Could not find matching INVITE transaction for CANCEL request");
                return None;
            };
            return tsx.dialog();
        }

        let local_tag = request.to().tag().unwrap_or_default();
        let remote_tag = request.from().tag().unwrap_or_default();

        core.dialogs()
            .find(request.call_id().id(), local_tag, remote_tag)
    }

    /// Dialog a received response belongs to, if any. Tags swap direction.
    fn find_dialog_for_response(&self, core: &Core, response: &RxResponse) -> Option<Dialog> {
        let local_tag = response.from().tag().unwrap_or_default();
        let remote_tag = response.to().tag().unwrap_or_default();

        core.dialogs()
            .find(response.call_id().id(), local_tag, remote_tag)
    }

    /// Serializer the request this response answers was transmitted from.
    fn find_request_serializer(&self, core: &Core, response: &RxResponse) -> Option<Serializer> {
        let key = TsxKey::for_response(response)?;
        let Some(tsx) = core.transactions().find_client(&key) else {
            log::debug!(
                "Could not find {} transaction for {}",
                response.cseq().method(),
                response
            );
            return None;
        };

        let name = tsx.last_tx_serializer_name()?;
        let serializer = self.registry.get(&name);
        if let Some(serializer) = &serializer {
            log::debug!("Found serializer {} on transaction", serializer.name());
        }

        serializer
    }
}

/// Where the distributor decided a request must go.
enum Route {
    Serializer(Serializer, Option<Arc<Endpoint>>),
    DoesNotExist,
    Drop,
}

/// The distributor service: claims every received message, decides its
/// serializer and re-enters the chain from there. Also records the sending
/// serializer's name on outbound requests so responses can find their way
/// back.
pub(crate) struct DistributorService {
    pub(crate) shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl SipService for DistributorService {
    fn name(&self) -> &str {
        DISTRIBUTOR_NAME
    }

    fn priority(&self) -> i32 {
        DISTRIBUTOR_PRIORITY
    }

    async fn on_rx_request(&self, core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        let route = {
            let Some(req) = request.as_ref() else {
                return Ok(());
            };

            if !core.is_fully_booted() {
                // Ignore everything until we are fully booted. Let the peer
                // retransmit messages until we are ready.
                Route::Drop
            } else {
                let mut serializer = None;
                let mut dialog_endpoint = None;

                if let Some(dialog) = self.shared.find_dialog_for_request(core, req) {
                    log::debug!(
                        "Searching for serializer on dialog {} for {}",
                        dialog.id(),
                        req
                    );
                    let (found, endpoint) = dialog.attached();
                    if let Some(found) = &found {
                        log::debug!(
                            "Found serializer {} on dialog {}",
                            found.name(),
                            dialog.id()
                        );
                    }
                    serializer = found;
                    dialog_endpoint = endpoint;
                }

                match serializer {
                    Some(serializer) => Route::Serializer(serializer, dialog_endpoint),
                    None if req.method().is_dialog_bound() => Route::DoesNotExist,
                    None if self.shared.oracle.alert() => {
                        // When the queues back up there is a good chance we
                        // are overloaded and need to defer adding new work.
                        // Ignore the request and rely on the peer's transport
                        // layer to retransmit; the overload usually clears
                        // within seconds.
                        log::debug!("Taskprocessor overload alert: ignoring '{}'", req);
                        Route::Drop
                    }
                    None => Route::Serializer(self.shared.pick_for_request(req), dialog_endpoint),
                }
            }
        };

        match route {
            Route::Drop => {
                request.take();
            }
            Route::DoesNotExist => {
                // A BYE or CANCEL outside any known dialog; fabricating a
                // serializer would create a phantom conversation.
                let req = request.take().expect("distributor runs on a live message");
                if let Err(err) = core
                    .respond_statelessly(&req, StatusCode::CallOrTransactionDoesNotExist)
                    .await
                {
                    log::warn!("Failed to reply 481 to {}: {}", req, err);
                }
            }
            Route::Serializer(serializer, dialog_endpoint) => {
                let mut msg = request.take().expect("distributor runs on a live message");
                if let Some(endpoint) = dialog_endpoint {
                    msg.set_endpoint(endpoint);
                }
                let core = core.clone();
                if let Err(err) = serializer.push(async move {
                    distribute_request(core, msg).await;
                }) {
                    // The message and the endpoint reference stored on it die
                    // with the rejected task.
                    log::debug!("Dropping request: {}", err);
                }
            }
        }

        Ok(())
    }

    async fn on_rx_response(&self, core: &Core, response: &mut Option<RxResponse>) -> Result<()> {
        let picked = {
            let Some(resp) = response.as_ref() else {
                return Ok(());
            };

            if !core.is_fully_booted() {
                None
            } else {
                let mut serializer = None;
                let mut dialog_endpoint = None;

                if let Some(dialog) = self.shared.find_dialog_for_response(core, resp) {
                    let (found, endpoint) = dialog.attached();
                    if let Some(found) = &found {
                        log::debug!(
                            "Found serializer {} on dialog {}",
                            found.name(),
                            dialog.id()
                        );
                    }
                    serializer = found;
                    dialog_endpoint = endpoint;
                }

                match serializer {
                    Some(serializer) => Some((serializer, dialog_endpoint)),
                    None => {
                        log::debug!(
                            "No dialog serializer for {}. Using request transaction as basis",
                            resp
                        );
                        match self.shared.find_request_serializer(core, resp) {
                            Some(serializer) => Some((serializer, dialog_endpoint)),
                            None if self.shared.oracle.alert() => {
                                // We're overloaded; ignore the unmatched response.
                                log::debug!(
                                    "Taskprocessor overload alert: ignoring unmatched '{}'",
                                    resp
                                );
                                None
                            }
                            None => {
                                // Pick a serializer for the unmatched response.
                                // Maybe the stack can figure out what it is for.
                                Some((self.shared.pick_for_response(resp), dialog_endpoint))
                            }
                        }
                    }
                }
            }
        };

        match picked {
            None => {
                response.take();
            }
            Some((serializer, dialog_endpoint)) => {
                let mut msg = response.take().expect("distributor runs on a live message");
                if let Some(endpoint) = dialog_endpoint {
                    msg.set_endpoint(endpoint);
                }
                let core = core.clone();
                if let Err(err) = serializer.push(async move {
                    distribute_response(core, msg).await;
                }) {
                    log::debug!("Dropping response: {}", err);
                }
            }
        }

        Ok(())
    }

    /// Record the sending serializer's name on the outbound request.
    async fn on_tx_request(&self, _core: &Core, request: &mut TxRequest) -> Result<()> {
        let Some(name) = Serializer::current_name() else {
            return Ok(());
        };

        // The serializer in use changed (or was never recorded).
        let changed = request.serializer_name().map_or(true, |current| current != name);
        if changed {
            request.set_serializer_name(name);
        }

        Ok(())
    }
}

/// Resumes processing on the serializer: everything in the chain after the
/// distributor runs here, and a non-ACK request nobody claimed draws a 501.
async fn distribute_request(core: Core, request: RxRequest) {
    let is_ack = request.method().is_ack();

    let mut msg = Some(request);
    if let Err(err) = core.run_request_chain(&mut msg, Some(DISTRIBUTOR_NAME)).await {
        log::warn!("Error processing distributed request: {}", err);
    }

    if let Some(req) = msg {
        if !is_ack {
            if let Err(err) = core
                .respond_statelessly(&req, StatusCode::NotImplemented)
                .await
            {
                log::warn!("Failed to reply 501 to {}: {}", req, err);
            }
        }
    }
}

async fn distribute_response(core: Core, response: RxResponse) {
    let mut msg = Some(response);
    if let Err(err) = core
        .run_response_chain(&mut msg, Some(DISTRIBUTOR_NAME))
        .await
    {
        log::warn!("Error processing distributed response: {}", err);
    }

    if let Some(resp) = msg {
        log::debug!("Response {} was unhandled by any service", resp);
    }
}

/// Handle to a running distributor subsystem.
pub struct Distributor {
    core: Core,
    pub(crate) shared: Arc<Shared>,
}

impl Distributor {
    /// Builds the serializer pool and the artificial endpoint/auth pair, then
    /// registers the distributor, the endpoint identifier and the
    /// authenticator with `core`, in that order.
    ///
    /// Any failure tears the partial setup down again; no registration
    /// survives a failed call. Must be called from within a Tokio runtime.
    pub fn setup(core: &Core, config: DistributorConfig) -> Result<Distributor> {
        let registry = SerializerRegistry::default();
        let pool = SerializerPool::build(&config.prefix, config.pool_size, &registry);
        let alerts = pool.alerts();

        let shared = Arc::new(Shared {
            pool,
            registry,
            artificial_endpoint: endpoint::artificial_endpoint(),
            artificial_auth: endpoint::artificial_auth(&config.realm),
            oracle: match config.oracle {
                Some(oracle) => oracle,
                None => alerts,
            },
            events: match config.events {
                Some(events) => events,
                None => Arc::new(LogEvents),
            },
            identifiers: RwLock::new(Vec::new()),
            verifier: RwLock::new(None),
        });

        if let Err(err) = core.register_service(Arc::new(DistributorService {
            shared: shared.clone(),
        })) {
            shared.pool.shutdown();
            return Err(err);
        }
        if let Err(err) = core.register_service(Arc::new(EndpointIdService {
            shared: shared.clone(),
        })) {
            core.unregister_service(DISTRIBUTOR_NAME);
            shared.pool.shutdown();
            return Err(err);
        }
        if let Err(err) = core.register_service(Arc::new(AuthService {
            shared: shared.clone(),
        })) {
            core.unregister_service(ENDPOINT_ID_NAME);
            core.unregister_service(DISTRIBUTOR_NAME);
            shared.pool.shutdown();
            return Err(err);
        }

        Ok(Distributor {
            core: core.clone(),
            shared,
        })
    }

    /// Unregisters the three services in reverse order and stops the pool.
    pub fn shutdown(&self) {
        self.core.unregister_service(AUTH_NAME);
        self.core.unregister_service(ENDPOINT_ID_NAME);
        self.core.unregister_service(DISTRIBUTOR_NAME);
        self.shared.pool.shutdown();
    }

    /// Returns a new reference to the artificial endpoint.
    pub fn artificial_endpoint(&self) -> Arc<Endpoint> {
        self.shared.artificial_endpoint.clone()
    }

    /// Returns a new reference to the artificial auth record.
    pub fn artificial_auth(&self) -> Arc<AuthRecord> {
        self.shared.artificial_auth.clone()
    }

    /// Pool pick for a request; for callers that need to originate work on
    /// the serializer the request's conversation will run on.
    pub fn serializer_for_request(&self, request: &RxRequest) -> Serializer {
        self.shared.pick_for_request(request)
    }

    /// Pool pick for a response.
    pub fn serializer_for_response(&self, response: &RxResponse) -> Serializer {
        self.shared.pick_for_response(response)
    }

    /// Adds an identifier to the chain. Lower priority values run first.
    pub fn register_identifier(&self, priority: u32, identifier: Arc<dyn EndpointIdentifier>) {
        let mut identifiers = self.shared.identifiers.write().expect("Lock failed");
        let pos = identifiers.partition_point(|e| e.priority <= priority);
        identifiers.insert(
            pos,
            IdentifierEntry {
                priority,
                identifier,
            },
        );
    }

    /// Removes an identifier from the chain by name.
    pub fn unregister_identifier(&self, name: &str) -> Option<Arc<dyn EndpointIdentifier>> {
        let mut identifiers = self.shared.identifiers.write().expect("Lock failed");
        let pos = identifiers.iter().position(|e| e.identifier.name() == name)?;

        Some(identifiers.remove(pos).identifier)
    }

    /// Installs the authentication verifier.
    pub fn register_authenticator(&self, verifier: Arc<dyn AuthVerifier>) {
        let mut slot = self.shared.verifier.write().expect("Lock failed");
        *slot = Some(verifier);
    }

    /// Removes the authentication verifier. Requests then flow through
    /// unauthenticated.
    pub fn unregister_authenticator(&self) {
        let mut slot = self.shared.verifier.write().expect("Lock failed");
        *slot = None;
    }
}
