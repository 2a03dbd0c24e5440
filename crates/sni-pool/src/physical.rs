//! Physical connections opened from a server spec.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sni_mux::{MultiplexedConnection, Session};
use sni_tls::TlsConfig;
use sni_transport::{
    DEFAULT_BUFFER_SIZE, Provider, ServerSpec, SniErrorCode, TransportError, TransportHandle,
    connect_spec,
};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::PoolError;
use crate::lifecycle::{ConnectionFactory, PooledObject};

/// Default time allowed for opening a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// How [`TransportConnectionFactory`] opens connections.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectOptions {
    /// Server spec, `[tcp:|np:]host[,port|\pipe]`.
    pub server_spec: String,
    /// Time allowed for the transport connect. Zero waits forever.
    pub connect_timeout: Duration,
    /// Race every resolved address (multi-subnet failover).
    pub parallel: bool,
    /// Enable TLS after connecting.
    pub tls: Option<TlsConfig>,
    /// Enable MARS and open a primary session.
    pub multiplexing: bool,
    /// Transport receive buffer size.
    pub buffer_size: usize,
}

impl ConnectOptions {
    /// Options for `server_spec` with default values.
    pub fn new(server_spec: impl Into<String>) -> Self {
        Self {
            server_spec: server_spec.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            parallel: false,
            tls: None,
            multiplexing: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable or disable parallel connect.
    #[must_use]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Enable TLS with `config`.
    #[must_use]
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// Enable or disable MARS.
    #[must_use]
    pub fn multiplexing(mut self, enabled: bool) -> Self {
        self.multiplexing = enabled;
        self
    }

    /// Set the receive buffer size.
    #[must_use]
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Validate the options and parse the server spec.
    pub fn validate(&self) -> Result<ServerSpec, PoolError> {
        if self.buffer_size == 0 {
            return Err(PoolError::Configuration(
                "buffer_size must be greater than 0".into(),
            ));
        }
        ServerSpec::parse(&self.server_spec, self.parallel)
            .map_err(|e| PoolError::Configuration(e.to_string()))
    }
}

/// A physical connection, optionally multiplexed.
///
/// With MARS enabled, [`handle`](Self::handle) is the primary session and
/// further sessions come from [`open_session`](Self::open_session).
pub struct PhysicalConnection {
    id: Uuid,
    transport: Arc<dyn TransportHandle>,
    mux: Option<MultiplexedConnection>,
    primary: Arc<dyn TransportHandle>,
}

impl PhysicalConnection {
    /// Identifier of this connection.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.id
    }

    /// Handle to send and receive on: the primary session with MARS, the
    /// transport otherwise.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn TransportHandle> {
        &self.primary
    }

    /// The physical transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportHandle> {
        &self.transport
    }

    /// The multiplexer, when MARS is enabled.
    #[must_use]
    pub fn multiplexer(&self) -> Option<&MultiplexedConnection> {
        self.mux.as_ref()
    }

    /// Open an additional MARS session.
    pub async fn open_session(&self) -> Result<Session, TransportError> {
        match &self.mux {
            Some(mux) => mux.create_session().await,
            None => Err(TransportError::new(
                Provider::Smux,
                SniErrorCode::InvalidParameter,
                "multiplexing is not enabled on this connection",
            )),
        }
    }
}

#[async_trait]
impl PooledObject for PhysicalConnection {
    fn is_alive(&self) -> bool {
        self.primary.check_connection().is_ok()
    }

    fn can_be_pooled(&self) -> bool {
        self.mux.as_ref().is_none_or(|mux| !mux.is_closed())
    }

    async fn activate(&self) -> Result<(), PoolError> {
        self.primary.check_connection().map_err(PoolError::from)
    }

    async fn close(&self) {
        let closed = match &self.mux {
            Some(mux) => {
                if let Err(e) = self.primary.close().await {
                    tracing::trace!(connection_id = %self.id, error = %e, "error while closing primary session");
                }
                mux.close().await
            }
            None => self.transport.close().await,
        };
        if let Err(e) = closed {
            tracing::trace!(connection_id = %self.id, error = %e, "error while closing connection");
        }
    }
}

impl fmt::Debug for PhysicalConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalConnection")
            .field("id", &self.id)
            .field("provider", &self.transport.provider())
            .field("multiplexed", &self.mux.is_some())
            .finish_non_exhaustive()
    }
}

/// Opens [`PhysicalConnection`]s from [`ConnectOptions`].
#[derive(Debug, Clone)]
pub struct TransportConnectionFactory {
    options: ConnectOptions,
    spec: ServerSpec,
}

impl TransportConnectionFactory {
    /// Create a factory, validating `options` up front.
    pub fn new(options: ConnectOptions) -> Result<Self, PoolError> {
        let spec = options.validate()?;
        Ok(Self { options, spec })
    }

    /// The options connections are opened with.
    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    async fn establish(
        &self,
        transport: Arc<dyn TransportHandle>,
    ) -> Result<PhysicalConnection, TransportError> {
        transport.set_buffer_size(self.options.buffer_size);
        if let Some(tls) = &self.options.tls {
            transport.enable_tls(tls).await?;
        }

        let (mux, primary) = if self.options.multiplexing {
            let mux = MultiplexedConnection::new(Arc::clone(&transport));
            let session: Arc<dyn TransportHandle> = Arc::new(mux.create_session().await?);
            (Some(mux), session)
        } else {
            (None, Arc::clone(&transport))
        };

        Ok(PhysicalConnection {
            id: Uuid::new_v4(),
            transport,
            mux,
            primary,
        })
    }
}

#[async_trait]
impl ConnectionFactory for TransportConnectionFactory {
    type Connection = PhysicalConnection;

    async fn create(&self) -> Result<PhysicalConnection, PoolError> {
        let timeout = self.options.connect_timeout;
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);
        let transport = connect_spec(&self.spec, deadline, self.options.parallel).await?;

        match self.establish(Arc::clone(&transport)).await {
            Ok(connection) => {
                tracing::debug!(
                    connection_id = %connection.id,
                    provider = ?transport.provider(),
                    multiplexed = connection.mux.is_some(),
                    "physical connection opened"
                );
                Ok(connection)
            }
            Err(e) => {
                transport.kill();
                Err(e.into())
            }
        }
    }
}
