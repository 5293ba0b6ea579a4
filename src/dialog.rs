//! SIP dialogs and the per-dialog routing state.
//!
//! The dialog state machine itself lives above this crate; what lives here is
//! the identifier-keyed registry the distributor consults and the
//! dialog-attached record binding a dialog to a serializer and an endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::endpoint::Endpoint;
use crate::serializer::Serializer;

/// Unique identifier of a SIP dialog (Call-ID + local tag + remote tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(
        call_id: impl Into<String>,
        local_tag: impl Into<String>,
        remote_tag: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};{};{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// Routing state the application attaches to a dialog.
///
/// Allocated lazily on first write; both references are replaced wholesale by
/// the setters.
#[derive(Default)]
struct AttachedState {
    serializer: Option<Serializer>,
    endpoint: Option<Arc<Endpoint>>,
}

struct Inner {
    id: DialogId,
    attached: Mutex<Option<Box<AttachedState>>>,
}

/// Represents a SIP Dialog.
#[derive(Clone)]
pub struct Dialog(Arc<Inner>);

impl Dialog {
    pub fn new(id: DialogId) -> Self {
        Self(Arc::new(Inner {
            id,
            attached: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> &DialogId {
        &self.0.id
    }

    /// Installs the serializer every message of this dialog must run on,
    /// replacing any previous one.
    pub fn set_serializer(&self, serializer: Serializer) {
        let mut attached = self.0.attached.lock().expect("Lock failed");
        attached.get_or_insert_with(Default::default).serializer = Some(serializer);
    }

    /// Installs the endpoint this dialog belongs to, replacing any previous
    /// one.
    pub fn set_endpoint(&self, endpoint: Arc<Endpoint>) {
        let mut attached = self.0.attached.lock().expect("Lock failed");
        attached.get_or_insert_with(Default::default).endpoint = Some(endpoint);
    }

    /// Returns a new reference to the endpoint attached to this dialog.
    pub fn endpoint(&self) -> Option<Arc<Endpoint>> {
        let attached = self.0.attached.lock().expect("Lock failed");
        attached.as_ref()?.endpoint.clone()
    }

    /// Snapshot of the attached routing state, both references bumped under
    /// the dialog lock.
    pub(crate) fn attached(&self) -> (Option<Serializer>, Option<Arc<Endpoint>>) {
        let attached = self.0.attached.lock().expect("Lock failed");
        match attached.as_ref() {
            Some(state) => (state.serializer.clone(), state.endpoint.clone()),
            None => (None, None),
        }
    }
}

/// Registry of the dialogs this process currently knows about.
#[derive(Default)]
pub struct DialogLayer {
    dialogs: Mutex<HashMap<DialogId, Dialog>>,
}

impl DialogLayer {
    /// Creates a dialog and registers it under its identifier.
    pub fn create(&self, id: DialogId) -> Dialog {
        let dialog = Dialog::new(id.clone());
        self.dialogs
            .lock()
            .expect("Lock failed")
            .insert(id, dialog.clone());

        dialog
    }

    /// Looks a dialog up by its identifying triple.
    pub fn find(&self, call_id: &str, local_tag: &str, remote_tag: &str) -> Option<Dialog> {
        let id = DialogId::new(call_id, local_tag, remote_tag);

        self.dialogs.lock().expect("Lock failed").get(&id).cloned()
    }

    /// Removes a dialog at the end of its life. Attached state is freed with
    /// the last handle.
    pub fn remove(&self, id: &DialogId) -> Option<Dialog> {
        self.dialogs.lock().expect("Lock failed").remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attached_state_is_lazy() {
        let dialog = Dialog::new(DialogId::new("abc@x", "lt", "rt"));
        assert!(dialog.endpoint().is_none());

        let endpoint = Arc::new(Endpoint::new("alice"));
        dialog.set_endpoint(endpoint.clone());

        let found = dialog.endpoint().unwrap();
        assert_eq!(found.name(), "alice");
        // One in the dialog, one in `endpoint`, one in `found`.
        assert_eq!(Arc::strong_count(&endpoint), 3);
    }

    #[test]
    fn test_layer_find_and_remove() {
        let layer = DialogLayer::default();
        let id = DialogId::new("abc@x", "lt", "rt");
        layer.create(id.clone());

        assert!(layer.find("abc@x", "lt", "rt").is_some());
        assert!(layer.find("abc@x", "lt", "other").is_none());

        layer.remove(&id);
        assert!(layer.find("abc@x", "lt", "rt").is_none());
    }
}
