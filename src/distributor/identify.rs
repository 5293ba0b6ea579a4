//! Endpoint identification.
//!
//! Runs on the serializer, before the transaction layer sees the request.
//! Walks the registered identifiers in priority order; the first to claim the
//! request wins. An unclaimed non-ACK request is attributed to the artificial
//! endpoint, which guarantees it will fail authentication downstream.

use std::sync::Arc;

use crate::core::service::SipService;
use crate::core::Core;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::transport::RxRequest;

use super::{Shared, ENDPOINT_ID_NAME, ENDPOINT_ID_PRIORITY};

/// An endpoint identifier plug-in.
///
/// Implementations inspect a received request (source address, user name,
/// header contents) and return the endpoint it belongs to, or `None` to let
/// the next identifier in the chain have a look.
#[async_trait::async_trait]
pub trait EndpointIdentifier: Send + Sync + 'static {
    /// Returns the identifier name.
    fn name(&self) -> &str;

    /// Attributes the request to an endpoint, or declines.
    async fn identify(&self, core: &Core, request: &RxRequest) -> Option<Arc<Endpoint>>;
}

pub(crate) struct IdentifierEntry {
    pub(crate) priority: u32,
    pub(crate) identifier: Arc<dyn EndpointIdentifier>,
}

impl Shared {
    pub(crate) async fn identify(&self, core: &Core, request: &RxRequest) -> Option<Arc<Endpoint>> {
        let identifiers: Vec<Arc<dyn EndpointIdentifier>> = {
            self.identifiers
                .read()
                .expect("Lock failed")
                .iter()
                .map(|entry| entry.identifier.clone())
                .collect()
        };

        for identifier in identifiers {
            if let Some(endpoint) = identifier.identify(core, request).await {
                log::debug!(
                    "Endpoint '{}' identified by '{}' for {}",
                    endpoint.name(),
                    identifier.name(),
                    request
                );
                return Some(endpoint);
            }
        }

        None
    }
}

pub(crate) struct EndpointIdService {
    pub(crate) shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl SipService for EndpointIdService {
    fn name(&self) -> &str {
        ENDPOINT_ID_NAME
    }

    fn priority(&self) -> i32 {
        ENDPOINT_ID_PRIORITY
    }

    async fn on_rx_request(&self, core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        let Some(req) = request.as_mut() else {
            return Ok(());
        };

        // Already set from the dialog's attached state.
        if req.endpoint().is_some() {
            return Ok(());
        }

        if let Some(endpoint) = self.shared.identify(core, req).await {
            req.set_endpoint(endpoint);
            return Ok(());
        }

        if req.method().is_ack() {
            // ACKs are hop-by-hop fire-and-forget; fabricating an endpoint
            // here would only duplicate the log noise of the original request.
            return Ok(());
        }

        // Always use the artificial endpoint for an unknown sender, so a
        // request for a nonexistent account is indistinguishable from one for
        // an existing account with bad credentials.
        req.set_endpoint(self.shared.artificial_endpoint.clone());

        let name = match req.from().uri() {
            uri if uri.is_sip_or_sips() => uri.user.clone().unwrap_or_default(),
            _ => String::new(),
        };
        log::warn!(
            "Request from '{}' failed for '{}' (callid: {}) - No matching endpoint found",
            req.from().uri(),
            req.addr(),
            req.call_id().id()
        );
        self.shared.events.invalid_endpoint(&name, req);

        Ok(())
    }
}
