//! Address parsing for dial targets and the ingress endpoint.
//!
//! Accepted forms:
//!   - `my-app.internal`                → port 443
//!   - `my-app.internal:8080`
//!   - `[fd00::1]:8080`
//!   - `http://my-app.internal`         → port 80
//!   - `https://my-app.internal`        → port 443
//!   - `tcp://my-app.internal:5432`     (tcp/tls need an explicit port)

use url::{Host, Url};

use crate::TomDialerError;

/// Port used when neither the address nor its scheme says otherwise.
pub const DEFAULT_PORT: u16 = 443;

/// Split a dial address into `(hostname, port)`.
pub fn parse_address(address: &str) -> Result<(String, u16), TomDialerError> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(TomDialerError::invalid_address(address, "empty address"));
    }

    if trimmed.contains("://") {
        return parse_url(address, trimmed);
    }

    let (host, port) = split_host_port(trimmed)
        .map_err(|reason| TomDialerError::invalid_address(address, reason))?;
    Ok((host.to_string(), port.unwrap_or(DEFAULT_PORT)))
}

fn parse_url(address: &str, trimmed: &str) -> Result<(String, u16), TomDialerError> {
    let url = Url::parse(trimmed)
        .map_err(|e| TomDialerError::invalid_address(address, format!("invalid url: {e}")))?;
    let host = host_string(&url)
        .ok_or_else(|| TomDialerError::invalid_address(address, "missing host"))?;

    let port = match url.port() {
        Some(0) => return Err(TomDialerError::invalid_address(address, "port must be non-zero")),
        Some(port) => port,
        None => match url.scheme() {
            "http" | "ws" => 80,
            "https" | "wss" => 443,
            "tcp" | "tls" => {
                return Err(TomDialerError::invalid_address(
                    address,
                    format!("{}:// addresses need an explicit port", url.scheme()),
                ))
            }
            _ => DEFAULT_PORT,
        },
    };
    Ok((host, port))
}

/// Hostname of a URL, with IPv6 brackets stripped.
pub(crate) fn host_string(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(d) if !d.is_empty() => Some(d.to_string()),
        Host::Domain(_) => None,
        Host::Ipv4(ip) => Some(ip.to_string()),
        Host::Ipv6(ip) => Some(ip.to_string()),
    }
}

/// Split `host[:port]`, accepting bracketed and bare IPv6 literals.
pub(crate) fn split_host_port(address: &str) -> Result<(&str, Option<u16>), String> {
    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| "unterminated '[' in address".to_string())?;
        match tail {
            "" => (host, None),
            _ => match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None => return Err(format!("unexpected {tail:?} after ']'")),
            },
        }
    } else if address.matches(':').count() > 1 {
        // bare IPv6 literal, no port
        (address, None)
    } else {
        match address.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err("missing host".to_string());
    }

    let port = match port {
        None => None,
        Some(raw) => match raw.parse::<u16>() {
            Ok(0) => return Err("port must be non-zero".to_string()),
            Ok(p) => Some(p),
            Err(_) => return Err(format!("invalid port {raw:?}")),
        },
    };
    Ok((host, port))
}
