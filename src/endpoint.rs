//! Remote endpoint accounts and their inbound authentication records.

use std::sync::Arc;

/// How an inbound auth credential verifies a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    /// Plain username/password digest verification.
    UserPass,
    /// Pre-computed MD5 hash verification.
    Md5,
    /// The artificial credential: never matches anything.
    Artificial,
}

/// A configured inbound authentication credential.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    /// The name the credential is referenced by.
    pub name: String,
    /// The verification scheme.
    pub kind: AuthKind,
    /// The digest realm.
    pub realm: String,
    /// The expected username.
    pub username: String,
    /// The expected password (or hash, depending on `kind`).
    pub password: String,
}

/// A remote SIP endpoint: the account a request is attributed to.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    inbound_auths: Vec<String>,
}

impl Endpoint {
    /// Creates an endpoint that does not demand authentication.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inbound_auths: Vec::new(),
        }
    }

    /// Creates an endpoint with the given inbound auth credential names.
    pub fn with_inbound_auths(name: impl Into<String>, inbound_auths: Vec<String>) -> Self {
        Self {
            name: name.into(),
            inbound_auths,
        }
    }

    /// The account name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of the credentials a request for this endpoint may satisfy.
    pub fn inbound_auths(&self) -> &[String] {
        &self.inbound_auths
    }
}

/// The artificial endpoint unmatched requests are attributed to.
///
/// It carries a single bogus inbound auth entry so downstream code sees
/// "authentication required" and challenges; the entry's value is never read.
/// Requests for unknown accounts thereby take the same path as requests for
/// known ones and fail authentication the same way.
pub(crate) fn artificial_endpoint() -> Arc<Endpoint> {
    Arc::new(Endpoint::with_inbound_auths("", vec!["artificial".into()]))
}

/// The credential record backing the artificial endpoint.
pub(crate) fn artificial_auth(realm: &str) -> Arc<AuthRecord> {
    Arc::new(AuthRecord {
        name: "artificial".into(),
        kind: AuthKind::Artificial,
        realm: realm.into(),
        username: String::new(),
        password: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artificial_endpoint_demands_auth() {
        let endpoint = artificial_endpoint();
        assert!(!endpoint.inbound_auths().is_empty());
        assert_eq!(endpoint.name(), "");

        let auth = artificial_auth("example.org");
        assert_eq!(auth.kind, AuthKind::Artificial);
        assert_eq!(auth.realm, "example.org");
    }
}
