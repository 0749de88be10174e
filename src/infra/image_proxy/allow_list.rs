//! Upstream URL admission.

use url::{Host, Url};

use super::error::ProxyError;

/// A single host rule: `example.com` matches exactly, `*.example.com` matches
/// any subdomain but not the apex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRule {
    Exact(String),
    Suffix(String),
}

impl HostRule {
    pub fn parse(rule: &str) -> Option<Self> {
        let rule = rule.trim().trim_end_matches('.').to_ascii_lowercase();
        if rule.is_empty() {
            return None;
        }
        match rule.strip_prefix("*.") {
            Some(rest) if !rest.is_empty() && !rest.contains('*') => {
                Some(Self::Suffix(format!(".{rest}")))
            }
            Some(_) => None,
            None if rule.contains('*') => None,
            None => Some(Self::Exact(rule)),
        }
    }

    fn matches(&self, host: &str) -> bool {
        match self {
            Self::Exact(expected) => host == expected,
            Self::Suffix(suffix) => host.len() > suffix.len() && host.ends_with(suffix.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AllowList {
    schemes: Vec<String>,
    hosts: Vec<HostRule>,
}

impl AllowList {
    /// Build from configured rule strings. Unparseable host rules are dropped.
    pub fn new<S, H>(schemes: S, hosts: H) -> Self
    where
        S: IntoIterator,
        S::Item: AsRef<str>,
        H: IntoIterator,
        H::Item: AsRef<str>,
    {
        Self {
            schemes: schemes
                .into_iter()
                .map(|scheme| scheme.as_ref().trim().to_ascii_lowercase())
                .filter(|scheme| !scheme.is_empty())
                .collect(),
            hosts: hosts
                .into_iter()
                .filter_map(|rule| HostRule::parse(rule.as_ref()))
                .collect(),
        }
    }

    pub fn rules(&self) -> &[HostRule] {
        &self.hosts
    }

    /// Parse `raw` and admit it, or explain why it was refused.
    pub fn check(&self, raw: &str) -> Result<Url, ProxyError> {
        let url = Url::parse(raw.trim()).map_err(|err| ProxyError::InvalidUrl(err.to_string()))?;
        if self.permits(&url) {
            Ok(url)
        } else {
            Err(ProxyError::Disallowed(
                url.host_str().unwrap_or_default().to_string(),
            ))
        }
    }

    pub fn permits(&self, url: &Url) -> bool {
        if !self.schemes.iter().any(|scheme| scheme == url.scheme()) {
            return false;
        }
        if !url.username().is_empty() || url.password().is_some() {
            return false;
        }
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.trim_end_matches('.').to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return false,
        };
        self.hosts.iter().any(|rule| rule.matches(&host))
    }
}
