//! Request authentication.
//!
//! Runs on the serializer just below the application services, for requests
//! only. ACKs are exempt: they cannot be challenged.

use std::sync::Arc;

use crate::core::service::SipService;
use crate::core::Core;
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::message::StatusCode;
use crate::transport::{OutgoingResponse, RxRequest};

use super::{Shared, AUTH_NAME, AUTH_PRIORITY};

/// Verdict of the authentication verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckAuthResult {
    /// The request carried no usable credentials; the prepared 401 now holds
    /// a challenge and must be sent.
    Challenge,
    /// The credentials check out.
    Success,
    /// The credentials were wrong; the prepared 401 re-challenges.
    Failed,
    /// The verifier itself failed.
    Error,
}

/// The digest-authentication verifier.
///
/// The verification algorithm lives outside this crate; the pipeline hands it
/// the endpoint, the request, and a pre-built 401 to fill in.
#[async_trait::async_trait]
pub trait AuthVerifier: Send + Sync + 'static {
    /// Whether requests for this endpoint must authenticate.
    fn requires_authentication(&self, endpoint: &Endpoint, _request: &RxRequest) -> bool {
        !endpoint.inbound_auths().is_empty()
    }

    /// Verifies the request's credentials against the endpoint's.
    async fn check(
        &self,
        endpoint: &Endpoint,
        request: &RxRequest,
        challenge: &mut OutgoingResponse,
    ) -> CheckAuthResult;
}

impl Shared {
    pub(crate) fn requires_authentication(&self, endpoint: &Endpoint, request: &RxRequest) -> bool {
        let verifier = { self.verifier.read().expect("Lock failed").clone() };
        match verifier {
            Some(verifier) => verifier.requires_authentication(endpoint, request),
            None => {
                log::warn!(
                    "No authenticator registered: letting {} through unauthenticated",
                    request
                );
                false
            }
        }
    }

    pub(crate) async fn check_authentication(
        &self,
        endpoint: &Endpoint,
        request: &RxRequest,
        challenge: &mut OutgoingResponse,
    ) -> CheckAuthResult {
        let verifier = { self.verifier.read().expect("Lock failed").clone() };
        match verifier {
            Some(verifier) => verifier.check(endpoint, request, challenge).await,
            None => CheckAuthResult::Error,
        }
    }
}

pub(crate) struct AuthService {
    pub(crate) shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl SipService for AuthService {
    fn name(&self) -> &str {
        AUTH_NAME
    }

    fn priority(&self) -> i32 {
        AUTH_PRIORITY
    }

    async fn on_rx_request(&self, core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        let Some(req) = request.as_ref() else {
            return Ok(());
        };

        if req.method().is_ack() {
            return Ok(());
        }

        let Some(endpoint) = req.endpoint() else {
            // The identifier stage guarantees an endpoint on non-ACK requests.
            debug_assert!(false, "request reached the authenticator without an endpoint");
            return Ok(());
        };

        if !self.shared.requires_authentication(&endpoint, req) {
            return Ok(());
        }

        let mut challenge = core.new_response(req, StatusCode::Unauthorized);
        match self
            .shared
            .check_authentication(&endpoint, req, &mut challenge)
            .await
        {
            CheckAuthResult::Challenge => {
                // Send the 401 the verifier filled in for them.
                let req = request.take().expect("authenticator runs on a live message");
                self.shared.events.auth_challenge_sent(&endpoint, &req);
                if let Err(err) = core.send_response(&mut challenge).await {
                    log::warn!("Failed to send challenge for {}: {}", req, err);
                }
            }
            CheckAuthResult::Success => {
                self.shared.events.auth_success(&endpoint, req);
            }
            CheckAuthResult::Failed => {
                let req = request.take().expect("authenticator runs on a live message");
                self.shared.events.auth_failed_challenge_response(&endpoint, &req);
                if let Err(err) = core.send_response(&mut challenge).await {
                    log::warn!("Failed to send challenge for {}: {}", req, err);
                }
            }
            CheckAuthResult::Error => {
                let req = request.take().expect("authenticator runs on a live message");
                self.shared.events.auth_failed_challenge_response(&endpoint, &req);
                if let Err(err) = core
                    .respond_statelessly(&req, StatusCode::ServerInternalError)
                    .await
                {
                    log::warn!("Failed to reply 500 to {}: {}", req, err);
                }
            }
        }

        Ok(())
    }
}
