use std::fmt;

/// An URI scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// The `sip` scheme.
    Sip,
    /// The `sips` scheme.
    Sips,
    /// Any other scheme (`tel`, `mailto`, ...).
    Other(String),
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Sip => write!(f, "sip"),
            Scheme::Sips => write!(f, "sips"),
            Scheme::Other(s) => write!(f, "{}", s),
        }
    }
}

/// A host with an optional port, as found in URIs and `Via` headers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    /// The host, an IP literal or a domain name.
    pub host: String,
    /// The optional port.
    pub port: Option<u16>,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}

/// A SIP(S) URI, reduced to the parts this stack reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uri {
    pub scheme: Scheme,
    pub user: Option<String>,
    pub host_port: HostPort,
}

impl Uri {
    /// Constructs a `sip:` URI.
    pub fn sip(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            scheme: Scheme::Sip,
            user: Some(user.into()),
            host_port: HostPort::new(host, None),
        }
    }

    /// Returns `true` for `sip:` and `sips:` URIs.
    pub fn is_sip_or_sips(&self) -> bool {
        matches!(self.scheme, Scheme::Sip | Scheme::Sips)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}@", user)?;
        }
        write!(f, "{}", self.host_port)
    }
}
