//! Pooling real transports over loopback.
//!
//! Run with:
//! ```bash
//! cargo test -p sni-driver-pool --test physical
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use sni_driver_pool::{
    ConnectOptions, ConnectionFactory, OwnerToken, Pool, PoolConfig, PoolError, PooledObject,
    TransportConnectionFactory,
};
use sni_protocol::FrameFlags;
use sni_testing::{EchoServer, MockSmuxPeer, TestCertificate};
use sni_tls::TlsConfig;
use sni_transport::{Packet, Provider, SniErrorCode};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

#[tokio::test]
async fn test_pooled_tcp_connection_round_trip() {
    init_tracing();
    let server = EchoServer::start().await.unwrap();
    let factory = TransportConnectionFactory::new(ConnectOptions::new(server.server_spec())).unwrap();
    let pool = Pool::new(PoolConfig::new().max_pool_size(2), factory).unwrap();
    pool.startup();
    let owner = OwnerToken::new();

    let conn = pool.checkout(&owner, None).await.unwrap();
    assert_eq!(conn.handle().provider(), Provider::Tcp);
    assert!(conn.multiplexer().is_none());
    conn.handle().send(Packet::from_slice(b"ping")).await.unwrap();
    let reply = conn.handle().receive(WAIT).await.unwrap();
    assert_eq!(reply.data(), b"ping");
    let id = conn.connection_id();
    conn.release().await;

    let again = pool.checkout(&owner, None).await.unwrap();
    assert_eq!(again.connection_id(), id);
    assert_eq!(server.accepted_connections(), 1);
    again.release().await;

    pool.shutdown().await;
    assert_eq!(pool.status().total, 0);
}

#[tokio::test]
async fn test_killed_transport_is_not_handed_out() {
    let server = EchoServer::start().await.unwrap();
    let factory = TransportConnectionFactory::new(ConnectOptions::new(server.server_spec())).unwrap();
    let pool = Pool::new(PoolConfig::new().max_pool_size(2), factory).unwrap();
    pool.startup();
    let owner = OwnerToken::new();

    let conn = pool.checkout(&owner, None).await.unwrap();
    let first = conn.connection_id();
    conn.transport().kill();
    assert!(!conn.is_alive());
    conn.release().await;

    let conn = pool.checkout(&owner, None).await.unwrap();
    assert_ne!(conn.connection_id(), first);
    assert!(conn.is_alive());
    conn.handle().send(Packet::from_slice(b"fresh")).await.unwrap();
    assert_eq!(conn.handle().receive(WAIT).await.unwrap().data(), b"fresh");
    assert_eq!(server.accepted_connections(), 2);
}

#[tokio::test]
async fn test_connect_failure_is_connection_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let factory =
        TransportConnectionFactory::new(ConnectOptions::new(format!("tcp:127.0.0.1,{port}")))
            .unwrap();
    let err = factory.create().await.unwrap_err();
    assert!(matches!(err, PoolError::Connection(ref e) if e.code == SniErrorCode::ConnOpenFailed));
}

#[tokio::test]
async fn test_factory_enables_tls() {
    let cert = TestCertificate::generate(&["db.test.local"]).unwrap();
    let server = EchoServer::start_tls(cert.acceptor().unwrap()).await.unwrap();
    let tls = TlsConfig::new()
        .add_root_certificate(cert.der().clone())
        .with_server_name("db.test.local");
    let factory =
        TransportConnectionFactory::new(ConnectOptions::new(server.server_spec()).tls(tls))
            .unwrap();

    let conn = factory.create().await.unwrap();
    conn.handle().send(Packet::from_slice(b"sealed")).await.unwrap();
    assert_eq!(conn.handle().receive(WAIT).await.unwrap().data(), b"sealed");
    conn.close().await;
}

#[tokio::test]
async fn test_factory_opens_primary_mars_session() {
    init_tracing();
    let peer = MockSmuxPeer::bind().await.unwrap();
    let factory = TransportConnectionFactory::new(
        ConnectOptions::new(peer.server_spec()).multiplexing(true),
    )
    .unwrap();

    let (conn, mut wire) = tokio::join!(factory.create(), async {
        peer.accept().await.unwrap()
    });
    let conn = conn.unwrap();
    let syn = wire.expect_frame(FrameFlags::Syn).await.unwrap();

    assert_eq!(conn.handle().provider(), Provider::Smux);
    let mux = conn.multiplexer().unwrap();
    assert_eq!(mux.session_count(), 1);

    let second = conn.open_session().await.unwrap();
    let syn2 = wire.expect_frame(FrameFlags::Syn).await.unwrap();
    assert_ne!(syn.header.session_id, syn2.header.session_id);
    assert_eq!(second.session_id(), syn2.header.session_id);

    conn.close().await;
    let fin = wire.expect_frame(FrameFlags::Fin).await.unwrap();
    assert_eq!(fin.header.session_id, syn.header.session_id);
    assert!(!conn.is_alive());
    drop(second);
}

#[tokio::test]
async fn test_open_session_requires_multiplexing() {
    let server = EchoServer::start().await.unwrap();
    let factory = TransportConnectionFactory::new(ConnectOptions::new(server.server_spec())).unwrap();
    let conn = factory.create().await.unwrap();

    let err = conn.open_session().await.unwrap_err();
    assert_eq!(err.code, SniErrorCode::InvalidParameter);
}
