//! Server spec parsing.
//!
//! A server spec names the transport and the endpoint:
//!
//! ```text
//! [tcp:]host[,port]
//! np:server
//! np:\\server\pipe\name
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{Provider, SniErrorCode, TransportError};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 1433;

/// Pipe name used when a named-pipe spec only names the server.
pub const DEFAULT_PIPE_NAME: &str = r"sql\query";

const PIPE_SEGMENT: &str = r"pipe\";

/// Parsed server spec.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ServerSpec {
    /// TCP endpoint.
    Tcp {
        /// Host name or address literal.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Named-pipe endpoint.
    NamedPipe {
        /// Server hosting the pipe.
        server: String,
        /// Pipe name below `\\server\pipe\`.
        pipe: String,
    },
}

impl ServerSpec {
    /// Parse a server spec.
    ///
    /// `parallel` requests multi-subnet failover, which only TCP supports.
    pub fn parse(spec: &str, parallel: bool) -> Result<Self, TransportError> {
        let parts: Vec<&str> = spec.split(':').collect();

        match parts.as_slice() {
            [endpoint] => Self::parse_tcp(endpoint),
            ["tcp", endpoint] => Self::parse_tcp(endpoint),
            ["np", endpoint] => {
                if parallel {
                    return Err(TransportError::new(
                        Provider::Np,
                        SniErrorCode::MultiSubnetNonTcp,
                        "multi-subnet failover requires TCP",
                    ));
                }
                Self::parse_pipe(endpoint)
            }
            [protocol, _] => {
                let code = if parallel {
                    SniErrorCode::MultiSubnetNonTcp
                } else {
                    SniErrorCode::ProtocolNotSupported
                };
                Err(TransportError::new(
                    Provider::Invalid,
                    code,
                    format!("unsupported transport protocol: '{protocol}'"),
                ))
            }
            _ => Err(invalid(Provider::Invalid, "server spec has more than one ':'")),
        }
    }

    fn parse_tcp(endpoint: &str) -> Result<Self, TransportError> {
        let (host, port) = match endpoint.split(',').collect::<Vec<_>>().as_slice() {
            [host] => (*host, DEFAULT_PORT),
            [host, port] => {
                let port = port
                    .trim()
                    .parse::<u16>()
                    .map_err(|_| invalid(Provider::Tcp, format!("port number is malformed: '{port}'")))?;
                (*host, port)
            }
            _ => return Err(invalid(Provider::Tcp, "server spec has more than one ','")),
        };

        let host = host.trim();
        if host.is_empty() {
            return Err(invalid(Provider::Tcp, "host name is empty"));
        }
        if host.contains('\\') {
            return Err(invalid(
                Provider::Tcp,
                "named instances require an explicit port",
            ));
        }

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }

    fn parse_pipe(endpoint: &str) -> Result<Self, TransportError> {
        if endpoint.is_empty() || endpoint.contains('/') {
            return Err(invalid(Provider::Np, "pipe paths only allow back slashes"));
        }

        if !endpoint.contains('\\') {
            return Ok(Self::NamedPipe {
                server: endpoint.to_string(),
                pipe: DEFAULT_PIPE_NAME.to_string(),
            });
        }

        let rest = endpoint
            .strip_prefix(r"\\")
            .ok_or_else(|| invalid(Provider::Np, "pipe path must start with \\\\"))?;
        let (server, resource) = rest
            .split_once('\\')
            .ok_or_else(|| invalid(Provider::Np, "pipe path has no pipe name"))?;
        let pipe = resource
            .strip_prefix(PIPE_SEGMENT)
            .filter(|pipe| !pipe.is_empty())
            .ok_or_else(|| invalid(Provider::Np, "pipe path must be \\\\server\\pipe\\name"))?;
        if server.is_empty() {
            return Err(invalid(Provider::Np, "pipe path has no server"));
        }

        Ok(Self::NamedPipe {
            server: server.to_string(),
            pipe: pipe.to_string(),
        })
    }

    /// Host used for name resolution and TLS server name checks.
    #[must_use]
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host,
            Self::NamedPipe { server, .. } => server,
        }
    }

    /// Provider that serves this spec.
    #[must_use]
    pub fn provider(&self) -> Provider {
        match self {
            Self::Tcp { .. } => Provider::Tcp,
            Self::NamedPipe { .. } => Provider::Np,
        }
    }

    /// Full UNC path for a named-pipe spec.
    #[must_use]
    pub fn pipe_path(&self) -> Option<String> {
        match self {
            Self::NamedPipe { server, pipe } => Some(format!(r"\\{server}\pipe\{pipe}")),
            Self::Tcp { .. } => None,
        }
    }
}

impl FromStr for ServerSpec {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, false)
    }
}

impl fmt::Display for ServerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp:{host},{port}"),
            Self::NamedPipe { server, pipe } => write!(f, r"np:\\{server}\pipe\{pipe}"),
        }
    }
}

fn invalid(provider: Provider, message: impl Into<String>) -> TransportError {
    TransportError::new(provider, SniErrorCode::InvalidConnString, message)
}
