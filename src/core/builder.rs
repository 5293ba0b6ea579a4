//! SIP Core Builder.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, RwLock};

use itertools::Itertools;

use crate::core::{Core, Inner, Registered};
use crate::dialog::DialogLayer;
use crate::transaction::{TsxLayer, TsxService};
use crate::SipService;

/// Builder for creating a new SIP [`Core`].
pub struct Builder {
    name: String,
    services: Vec<Arc<dyn SipService>>,
}

impl Builder {
    /// Creates a new default instance of `Builder` to construct a `Core`.
    pub fn new() -> Self {
        Builder {
            name: String::new(),
            services: vec![],
        }
    }

    /// Sets the core name.
    pub fn with_name<T: AsRef<str>>(mut self, s: T) -> Self {
        self.name = s.as_ref().to_string();

        self
    }

    /// Adds a service to the core.
    ///
    /// This function can be called multiple times to add additional services.
    /// If a service with the same name already exists, the new service will
    /// not be added.
    pub fn with_service(mut self, service: impl SipService) -> Self {
        if self.service_exists(service.name()) {
            return self;
        }
        self.services.push(Arc::new(service));

        self
    }

    fn service_exists(&self, name: &str) -> bool {
        let exists = self.services.iter().any(|s| s.name() == name);
        if exists {
            log::warn!("Service with name '{}' already exists", name);
        }
        exists
    }

    /// Finalize the builder into a `Core`.
    pub fn build(self) -> Core {
        log::trace!("Creating core...");

        let mut services: Vec<Registered> = Vec::with_capacity(self.services.len() + 1);
        services.push(Registered::new(Arc::new(TsxService)));
        services.extend(self.services.into_iter().map(Registered::new));
        services.sort_by_key(|entry| entry.priority);

        log::debug!(
            "Services registered ({})",
            services.iter().map(|s| s.service.name()).join(", ")
        );

        Core(Arc::new(Inner {
            name: self.name,
            dialogs: DialogLayer::default(),
            transactions: TsxLayer::default(),
            services: RwLock::new(services),
            fully_booted: AtomicBool::new(false),
        }))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
