//! Security-event sinks.

use crate::endpoint::Endpoint;
use crate::transport::RxRequest;

/// Receiver for the security-relevant events the request pipeline raises.
///
/// Implementations must be cheap; the hooks run on the serializer that is
/// processing the message.
#[allow(unused_variables)]
pub trait SecurityEvents: Send + Sync + 'static {
    /// A request could not be attributed to any configured endpoint.
    fn invalid_endpoint(&self, name: &str, request: &RxRequest) {}

    /// A challenge was sent in response to an unauthenticated request.
    fn auth_challenge_sent(&self, endpoint: &Endpoint, request: &RxRequest) {}

    /// A request presented valid credentials.
    fn auth_success(&self, endpoint: &Endpoint, request: &RxRequest) {}

    /// A challenge response failed verification.
    fn auth_failed_challenge_response(&self, endpoint: &Endpoint, request: &RxRequest) {}
}

/// Default sink: one log line per event.
pub struct LogEvents;

impl SecurityEvents for LogEvents {
    fn invalid_endpoint(&self, name: &str, request: &RxRequest) {
        log::info!("SecurityEvent: invalid endpoint '{}' for {}", name, request);
    }

    fn auth_challenge_sent(&self, endpoint: &Endpoint, request: &RxRequest) {
        log::info!(
            "SecurityEvent: challenge sent to '{}' for {}",
            endpoint.name(),
            request
        );
    }

    fn auth_success(&self, endpoint: &Endpoint, request: &RxRequest) {
        log::info!(
            "SecurityEvent: successful auth of '{}' for {}",
            endpoint.name(),
            request
        );
    }

    fn auth_failed_challenge_response(&self, endpoint: &Endpoint, request: &RxRequest) {
        log::info!(
            "SecurityEvent: failed challenge response from '{}' for {}",
            endpoint.name(),
            request
        );
    }
}
