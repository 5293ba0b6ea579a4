//! SIP Transaction Layer.
//!
//! Only the parts the message pipeline needs: branch-based keys, a registry
//! of live transactions, the last transmitted request of a client transaction
//! (responses are routed back by the serializer name recorded on it), and the
//! dialog a server transaction belongs to.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::core::service::{SipService, PRIORITY_TSX_LAYER};
use crate::core::Core;
use crate::dialog::Dialog;
use crate::error::Result;
use crate::message::{HostPort, SipMethod};
use crate::transport::{RxRequest, RxResponse, TxRequest};

/// Key identifying a transaction per RFC 3261 section 17.2.3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TsxKey {
    /// A client (UAC) transaction key.
    Client {
        /// The Via branch of the request.
        branch: String,
        /// The CSeq method of the request.
        method: SipMethod,
    },
    /// A server (UAS) transaction key.
    Server {
        /// The Via branch of the request.
        branch: String,
        /// The sent-by of the topmost Via.
        sent_by: HostPort,
        /// The CSeq method of the request.
        method: SipMethod,
    },
}

impl TsxKey {
    pub fn client(branch: impl Into<String>, method: SipMethod) -> Self {
        TsxKey::Client {
            branch: branch.into(),
            method,
        }
    }

    pub fn server(branch: impl Into<String>, sent_by: HostPort, method: SipMethod) -> Self {
        TsxKey::Server {
            branch: branch.into(),
            sent_by,
            method,
        }
    }

    /// Key of the client transaction a received response belongs to.
    pub fn for_response(response: &RxResponse) -> Option<Self> {
        let branch = response.via().branch()?;

        Some(Self::client(branch, response.cseq().method()))
    }

    /// Key of the server transaction a received request matches.
    pub fn for_request(request: &RxRequest) -> Option<Self> {
        let branch = request.via().branch()?;

        Some(Self::server(
            branch,
            request.via().sent_by.clone(),
            request.cseq().method(),
        ))
    }

    /// Key of the INVITE server transaction a CANCEL targets: same branch and
    /// sent-by, INVITE in place of the CANCEL method.
    pub fn for_cancel_target(request: &RxRequest) -> Option<Self> {
        let branch = request.via().branch()?;

        Some(Self::server(
            branch,
            request.via().sent_by.clone(),
            SipMethod::Invite,
        ))
    }
}

/// The possible roles of a SIP Transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// (User Agent Client): The entity that initiates the request.
    Uac,
    /// (User Agent Server): The entity that responds to the request.
    Uas,
}

struct Inner {
    key: TsxKey,
    role: Role,
    /// Last request transmitted on this transaction.
    last_tx: Mutex<Option<TxRequest>>,
    /// Dialog this transaction belongs to, if any.
    dialog: Mutex<Option<Dialog>>,
}

/// Represents a SIP Transaction.
#[derive(Clone)]
pub struct Transaction(Arc<Inner>);

impl Transaction {
    pub fn new_client(key: TsxKey) -> Self {
        Self::new(key, Role::Uac)
    }

    pub fn new_server(key: TsxKey) -> Self {
        Self::new(key, Role::Uas)
    }

    fn new(key: TsxKey, role: Role) -> Self {
        Self(Arc::new(Inner {
            key,
            role,
            last_tx: Mutex::new(None),
            dialog: Mutex::new(None),
        }))
    }

    pub fn key(&self) -> &TsxKey {
        &self.0.key
    }

    pub fn role(&self) -> Role {
        self.0.role
    }

    /// Records the request this transaction last transmitted.
    pub fn set_last_tx(&self, request: TxRequest) {
        let mut last_tx = self.0.last_tx.lock().expect("Lock failed");
        *last_tx = Some(request);
    }

    /// Name of the serializer recorded on the last transmitted request.
    pub(crate) fn last_tx_serializer_name(&self) -> Option<Arc<str>> {
        let last_tx = self.0.last_tx.lock().expect("Lock failed");
        last_tx.as_ref()?.serializer_name()
    }

    /// Attach a dialog to the transaction.
    pub fn set_dialog(&self, dialog: Dialog) {
        let mut guard = self.0.dialog.lock().expect("Lock failed");
        *guard = Some(dialog);
    }

    /// Returns the dialog attached to this transaction, if any.
    pub fn dialog(&self) -> Option<Dialog> {
        self.0.dialog.lock().expect("Lock failed").clone()
    }
}

/// Represents the transaction layer of the SIP protocol.
///
/// This type holds all server and client transactions created by the
/// transaction user.
#[derive(Default)]
pub struct TsxLayer {
    client_transactions: Mutex<HashMap<TsxKey, Transaction>>,
    server_transactions: Mutex<HashMap<TsxKey, Transaction>>,
}

impl TsxLayer {
    /// Adds a transaction to the map matching its role.
    pub fn register(&self, tsx: Transaction) {
        let key = tsx.key().clone();
        let map = match tsx.role() {
            Role::Uac => &self.client_transactions,
            Role::Uas => &self.server_transactions,
        };

        map.lock().expect("Lock failed").insert(key, tsx);
    }

    /// Finds a client transaction by key.
    pub fn find_client(&self, key: &TsxKey) -> Option<Transaction> {
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    /// Finds a server transaction by key.
    pub fn find_server(&self, key: &TsxKey) -> Option<Transaction> {
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .get(key)
            .cloned()
    }

    /// Removes a client transaction.
    pub fn remove_client(&self, key: &TsxKey) -> Option<Transaction> {
        self.client_transactions
            .lock()
            .expect("Lock failed")
            .remove(key)
    }

    /// Removes a server transaction.
    pub fn remove_server(&self, key: &TsxKey) -> Option<Transaction> {
        self.server_transactions
            .lock()
            .expect("Lock failed")
            .remove(key)
    }
}

/// Chain adapter for the transaction layer.
///
/// A request matching a live server transaction is a retransmission and is
/// absorbed here; a response matching a live client transaction is delivered
/// to the transaction and consumed. Everything else passes through to the
/// services above.
pub(crate) struct TsxService;

#[async_trait::async_trait]
impl SipService for TsxService {
    fn name(&self) -> &str {
        "Transaction Layer"
    }

    fn priority(&self) -> i32 {
        PRIORITY_TSX_LAYER
    }

    async fn on_rx_request(&self, core: &Core, request: &mut Option<RxRequest>) -> Result<()> {
        let Some(req) = request.as_ref() else {
            return Ok(());
        };

        if let Some(key) = TsxKey::for_request(req) {
            if core.transactions().find_server(&key).is_some() {
                log::debug!("{} matches a live transaction, absorbed", req);
                request.take();
            }
        }

        Ok(())
    }

    async fn on_rx_response(&self, core: &Core, response: &mut Option<RxResponse>) -> Result<()> {
        let Some(resp) = response.as_ref() else {
            return Ok(());
        };

        if let Some(key) = TsxKey::for_response(resp) {
            if core.transactions().find_client(&key).is_some() {
                log::debug!("{} delivered to its transaction", resp);
                response.take();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_find_by_role() {
        let layer = TsxLayer::default();
        let key = TsxKey::client("z9hG4bK776asdhds", SipMethod::Options);
        layer.register(Transaction::new_client(key.clone()));

        assert!(layer.find_client(&key).is_some());
        assert!(layer.find_server(&key).is_none());

        layer.remove_client(&key);
        assert!(layer.find_client(&key).is_none());
    }

    #[test]
    fn test_cancel_targets_the_invite_transaction() {
        let key_invite = TsxKey::server(
            "z9hG4bK776asdhds",
            HostPort::new("pc33.atlanta.com", None),
            SipMethod::Invite,
        );
        let key_cancel = TsxKey::server(
            "z9hG4bK776asdhds",
            HostPort::new("pc33.atlanta.com", None),
            SipMethod::Cancel,
        );
        assert_ne!(key_invite, key_cancel);

        let layer = TsxLayer::default();
        layer.register(Transaction::new_server(key_invite.clone()));
        assert!(layer.find_server(&key_invite).is_some());
        assert!(layer.find_server(&key_cancel).is_none());
    }
}
