//! Transport types for reaching the engine.

use std::path::PathBuf;

/// Transport mechanism used to reach the engine API.
///
/// Parsed from the same URIs the engine CLI accepts in `DOCKER_HOST`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Transport {
    /// Unix socket transport
    Unix { socket_path: PathBuf },

    /// TCP transport (plain HTTP, no TLS)
    Tcp { host: String, port: u16 },
}

impl Transport {
    /// Create a Unix socket transport.
    pub fn unix(socket_path: impl Into<PathBuf>) -> Self {
        Self::Unix {
            socket_path: socket_path.into(),
        }
    }

    /// Create a TCP transport.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::Tcp {
            host: host.into(),
            port,
        }
    }

    /// Get the URI representation of this transport.
    pub fn to_uri(&self) -> String {
        match self {
            Transport::Unix { socket_path } => format!("unix://{}", socket_path.display()),
            Transport::Tcp { host, port } => format!("tcp://{}:{}", host, port),
        }
    }

    /// Parse a transport from a URI string.
    pub fn from_uri(uri: &str) -> Result<Self, String> {
        if let Some(rest) = uri.strip_prefix("tcp://") {
            let (host, port) = rest
                .rsplit_once(':')
                .ok_or_else(|| format!("invalid TCP URI '{}': missing port", uri))?;
            if host.is_empty() {
                return Err(format!("invalid TCP URI '{}': missing host", uri));
            }
            let port = port
                .trim_end_matches('/')
                .parse::<u16>()
                .map_err(|e| format!("invalid TCP port in '{}': {}", uri, e))?;
            Ok(Self::tcp(host, port))
        } else if let Some(path) = uri.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(format!("invalid unix URI '{}': missing socket path", uri));
            }
            Ok(Self::unix(path))
        } else {
            Err(format!(
                "invalid transport URI '{}': expected unix:// or tcp://",
                uri
            ))
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::unix(crate::constants::api::DEFAULT_SOCKET_PATH)
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl std::str::FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_uri(s)
    }
}
