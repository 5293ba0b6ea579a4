//! # sipdist
//!
//! The incoming-message distributor of a SIP user agent.
//!
//! Every message a transport delivers is claimed by the distributor, which
//! assigns it to a serializer (a single-consumer work queue) so that all
//! messages of one dialog or transaction are processed in order on one task.
//! Endpoint identification and digest-authentication gating then run on the
//! serializer before the application services see the message.
//!
//! The SIP parser, the transaction and dialog state machines, and the digest
//! algorithm itself live outside this crate; their seams are the
//! [`SipService`], [`distributor::EndpointIdentifier`] and
//! [`distributor::AuthVerifier`] traits.

pub mod core;
pub mod dialog;
pub mod distributor;
pub mod endpoint;
pub mod events;
pub mod headers;
pub mod message;
pub mod serializer;
pub mod transaction;
pub mod transport;

pub(crate) mod error;

pub use crate::core::service::SipService;
pub use crate::core::Core;
pub use crate::distributor::{Distributor, DistributorConfig};
pub use crate::error::{Error, Result};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

#[cfg(test)]
pub(crate) mod test_utils;
