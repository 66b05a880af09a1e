use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use url::Url;

use crate::address::host_string;
use crate::directory::RawEndpoint;

/// Protocol a bound endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Tcp,
    Tls,
}

impl Protocol {
    pub fn from_scheme(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "ws" => Some(Protocol::Http),
            "https" | "wss" => Some(Protocol::Https),
            "tcp" => Some(Protocol::Tcp),
            "tls" => Some(Protocol::Tls),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Tcp => "tcp",
            Protocol::Tls => "tls",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            Protocol::Http => Some(80),
            Protocol::Https | Protocol::Tls => Some(443),
            Protocol::Tcp => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bound endpoint reachable through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub protocol: Protocol,
    pub url: String,
}

impl Endpoint {
    /// Interpret a directory listing entry. `None` if the URL has no host,
    /// no recognisable protocol, or no port can be determined.
    pub fn from_raw(raw: &RawEndpoint) -> Option<Self> {
        let url = Url::parse(&raw.url).ok()?;
        let hostname = host_string(&url)?;
        let scheme = Protocol::from_scheme(url.scheme());
        let protocol = Protocol::from_scheme(&raw.proto).or(scheme)?;
        let port = url
            .port()
            .or_else(|| u16::try_from(raw.port).ok().filter(|p| *p != 0))
            .or_else(|| scheme.and_then(|s| s.default_port()))
            .or_else(|| protocol.default_port())?;
        Some(Self {
            id: raw.id.clone(),
            hostname,
            port,
            protocol,
            url: raw.url.clone(),
        })
    }
}

/// Turn a directory listing into endpoints. Entries repeating an earlier
/// URL are dropped (first wins); entries that cannot be interpreted are
/// skipped with a warning.
pub fn endpoints_from_listing(raw: &[RawEndpoint]) -> Vec<Endpoint> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(raw.len());
    for entry in raw {
        if !seen.insert(entry.url.as_str()) {
            continue;
        }
        match Endpoint::from_raw(entry) {
            Some(ep) => out.push(ep),
            None => tracing::warn!(id = %entry.id, url = %entry.url, "skipping unusable endpoint"),
        }
    }
    out
}

/// Hostname-keyed view of the bound endpoints. Refreshes swap in a whole
/// new map, so readers see either the old set or the new one.
#[derive(Debug, Default)]
pub struct EndpointCache {
    entries: RwLock<Arc<HashMap<String, Endpoint>>>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, hostname: &str) -> Option<Endpoint> {
        self.entries.read().await.get(hostname).cloned()
    }

    pub async fn contains(&self, hostname: &str) -> bool {
        self.entries.read().await.contains_key(hostname)
    }

    pub async fn snapshot(&self) -> Arc<HashMap<String, Endpoint>> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Replace the whole cache. Hostnames absent from `endpoints` are gone afterwards.
    pub async fn replace(&self, endpoints: &[Endpoint]) {
        let next: HashMap<_, _> = endpoints
            .iter()
            .map(|ep| (ep.hostname.clone(), ep.clone()))
            .collect();
        *self.entries.write().await = Arc::new(next);
    }

    pub async fn clear(&self) {
        self.replace(&[]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, url: &str) -> RawEndpoint {
        RawEndpoint {
            id: id.into(),
            url: url.into(),
            proto: String::new(),
            port: 0,
            bindings: vec![],
        }
    }

    #[test]
    fn from_raw_ports() {
        let ep = Endpoint::from_raw(&raw("ep_1", "https://api.internal")).unwrap();
        assert_eq!((ep.hostname.as_str(), ep.port, ep.protocol), ("api.internal", 443, Protocol::Https));

        let ep = Endpoint::from_raw(&raw("ep_2", "http://web.internal")).unwrap();
        assert_eq!(ep.port, 80);

        let ep = Endpoint::from_raw(&raw("ep_3", "tcp://db.internal:5432")).unwrap();
        assert_eq!((ep.port, ep.protocol), (5432, Protocol::Tcp));
    }

    #[test]
    fn from_raw_uses_listed_proto_and_port() {
        let mut entry = raw("ep_4", "tcp://db.internal");
        assert!(Endpoint::from_raw(&entry).is_none(), "tcp without a port");
        entry.port = 6379;
        let ep = Endpoint::from_raw(&entry).unwrap();
        assert_eq!(ep.port, 6379);

        let mut entry = raw("ep_5", "https://svc.internal");
        entry.proto = "tls".into();
        let ep = Endpoint::from_raw(&entry).unwrap();
        assert_eq!((ep.protocol, ep.port), (Protocol::Tls, 443));
    }

    #[test]
    fn from_raw_rejects_garbage() {
        assert!(Endpoint::from_raw(&raw("x", "not a url")).is_none());
        assert!(Endpoint::from_raw(&raw("x", "ftp://files.internal")).is_none());
    }

    #[test]
    fn listing_dedups_by_url_first_wins() {
        let listing = vec![
            raw("ep_1", "https://a.internal"),
            raw("ep_2", "https://a.internal"),
            raw("ep_3", "https://b.internal"),
            raw("ep_4", "::nonsense"),
        ];
        let eps = endpoints_from_listing(&listing);
        let ids: Vec<_> = eps.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["ep_1", "ep_3"]);
    }

    #[tokio::test]
    async fn cache_replace_drops_stale_entries() {
        let cache = EndpointCache::new();
        let first = endpoints_from_listing(&[
            raw("ep_a", "https://a.internal"),
            raw("ep_b", "https://b.internal"),
        ]);
        cache.replace(&first).await;
        assert_eq!(cache.len().await, 2);

        let before = cache.snapshot().await;
        let second = endpoints_from_listing(&[raw("ep_c", "https://c.internal")]);
        cache.replace(&second).await;

        assert!(!cache.contains("a.internal").await);
        assert!(!cache.contains("b.internal").await);
        assert_eq!(cache.get("c.internal").await.unwrap().id, "ep_c");
        // earlier snapshots are untouched by a swap
        assert_eq!(before.len(), 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
