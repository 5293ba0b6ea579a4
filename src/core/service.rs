//! The service chain a [`Core`] runs every message through.

use crate::core::Core;
use crate::error::Result;
use crate::transport::{RxRequest, RxResponse, TxRequest};

/// Priority of the transport layer pseudo-module.
pub const PRIORITY_TRANSPORT_LAYER: i32 = 8;
/// Priority of the transaction layer.
pub const PRIORITY_TSX_LAYER: i32 = 16;
/// Priority of the UA/proxy layer.
pub const PRIORITY_UA_LAYER: i32 = 32;
/// Priority of dialog usages.
pub const PRIORITY_DIALOG_USAGE: i32 = 48;
/// Priority of application services.
pub const PRIORITY_APPLICATION: i32 = 64;

/// A trait which provides a way to extend the SIP core functionalities.
///
/// Services form a chain ordered by [`SipService::priority`] (lower runs
/// earlier). A service consumes a message by taking it out of the `Option`;
/// later services then never see it.
#[async_trait::async_trait]
#[allow(unused_variables)]
pub trait SipService: Sync + Send + 'static {
    /// Returns the service name. Must be unique within a core.
    fn name(&self) -> &str;

    /// Position of this service in the chain; lower values run earlier.
    fn priority(&self) -> i32 {
        PRIORITY_APPLICATION
    }

    /// Called when an inbound SIP request is received.
    async fn on_rx_request(&self, core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        Ok(())
    }

    /// Called when an inbound SIP response is received.
    async fn on_rx_response(&self, core: &Core, response: &mut Option<RxResponse>) -> Result<()> {
        Ok(())
    }

    /// Called for every outbound SIP request, just before it is transmitted.
    async fn on_tx_request(&self, core: &Core, request: &mut TxRequest) -> Result<()> {
        Ok(())
    }
}
