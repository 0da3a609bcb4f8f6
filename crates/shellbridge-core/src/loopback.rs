// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Loopback addressing convention.
//
// Requests between the hosted runtime and the native shell are addressed as
// `native://127.0.0.1:<port>/...`.  The pseudo-scheme marks traffic that
// never leaves the device; any URL whose host is not a loopback address is
// refused before a socket is opened.  Plain `http://` is accepted as an alias
// so tooling can hit the same endpoints.

use std::fmt;

use url::{Host, Url};

use crate::error::{BridgeError, Result};

/// Reserved pseudo-scheme for on-device bridge traffic.
pub const NATIVE_SCHEME: &str = "native";

/// Port used when a `native://` URL omits one.
pub const DEFAULT_NATIVE_PORT: u16 = 4580;

/// Hosted → native call endpoint.
pub const CALL_PATH: &str = "/_native/api/call";

/// Native → hosted event ingress endpoint.
pub const EVENTS_PATH: &str = "/_native/api/events";

/// Hosted → native UI snapshot sink.
pub const UI_STATE_PATH: &str = "/_native/api/ui-state";

/// A parsed URL that is guaranteed to point at this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackUrl {
    scheme: String,
    host: String,
    port: u16,
    path: String,
}

impl LoopbackUrl {
    /// Parse `scheme://host[:port][/path]`, enforcing a loopback host.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| BridgeError::Transport(format!("invalid URL '{url}': {e}")))?;

        let default_port = match parsed.scheme() {
            NATIVE_SCHEME => DEFAULT_NATIVE_PORT,
            "http" => 80,
            other => {
                return Err(BridgeError::Transport(format!(
                    "unsupported scheme '{other}' in '{url}'"
                )));
            }
        };

        // `native` is not a special scheme, so its hosts come back opaque.
        let host = match parsed.host() {
            Some(Host::Domain(name)) if !name.is_empty() => name.to_ascii_lowercase(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            _ => return Err(BridgeError::Transport(format!("invalid URL '{url}': empty host"))),
        };

        if !is_loopback_host(&host) {
            return Err(BridgeError::Transport(format!(
                "refusing non-loopback host '{host}' in '{url}'"
            )));
        }

        let mut path = match parsed.path() {
            "" => "/".to_owned(),
            path => path.to_owned(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            scheme: parsed.scheme().to_owned(),
            host,
            port: parsed.port().unwrap_or(default_port),
            path,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Address suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        match self.host.as_str() {
            "localhost" => format!("127.0.0.1:{}", self.port),
            "::1" => format!("[::1]:{}", self.port),
            host => format!("{host}:{}", self.port),
        }
    }

    /// Value for the HTTP `Host` header.
    pub fn host_header(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Same origin, different path.
    pub fn with_path(&self, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        Self {
            path,
            ..self.clone()
        }
    }
}

impl fmt::Display for LoopbackUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.host_header(), self.path)
    }
}

impl std::str::FromStr for LoopbackUrl {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn is_loopback_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    host.parse::<std::net::IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
