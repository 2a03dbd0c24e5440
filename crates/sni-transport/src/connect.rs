//! Opening transport handles from a server spec.

use std::sync::Arc;

use tokio::time::Instant;

use crate::error::TransportError;
use crate::handle::TransportHandle;
use crate::pipe::connect_pipe;
use crate::server_spec::ServerSpec;
use crate::tcp::connect_tcp;

/// Parse `server_spec` and open a handle to it.
///
/// `deadline` bounds name resolution and connect; `None` waits forever.
/// `parallel` races every resolved TCP address (multi-subnet failover).
///
/// # Example
///
/// ```rust,ignore
/// use std::time::Duration;
/// use tokio::time::Instant;
///
/// let deadline = Instant::now() + Duration::from_secs(15);
/// let handle = sni_transport::connect("tcp:db.corp.local,1433", Some(deadline), false).await?;
/// ```
pub async fn connect(
    server_spec: &str,
    deadline: Option<Instant>,
    parallel: bool,
) -> Result<Arc<dyn TransportHandle>, TransportError> {
    let spec = ServerSpec::parse(server_spec, parallel)?;
    connect_spec(&spec, deadline, parallel).await
}

/// Open a handle to an already parsed spec.
pub async fn connect_spec(
    spec: &ServerSpec,
    deadline: Option<Instant>,
    parallel: bool,
) -> Result<Arc<dyn TransportHandle>, TransportError> {
    let handle = match spec {
        ServerSpec::Tcp { host, port } => connect_tcp(host, *port, deadline, parallel).await?,
        ServerSpec::NamedPipe { server, pipe } => connect_pipe(server, pipe, deadline).await?,
    };
    Ok(Arc::new(handle))
}
