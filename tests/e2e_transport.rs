//! End-to-end transport tests: TLS, proxy chains, connect failures and the
//! client session pool.

mod common;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{CLIENT_ID, PASSWORD};
use epp::client::{ClientPool, EppClient};
use epp::objects::{default_registry, DomainCheck, DomainCheckData};
use epp::protocol::{Command, Login, ResultCode, Verb};
use epp::server::ServerContext;
use epp::session::{Authenticator, StaticAuthenticator};
use epp::transport::{CertConfig, ClientTlsConfig, ProxyChain, TlsConfig};
use epp::EppError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Minimal HTTP CONNECT proxy recording each requested target.
struct TestProxy {
    port: u16,
    targets: Arc<Mutex<Vec<String>>>,
}

impl TestProxy {
    async fn start(status: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let targets = Arc::new(Mutex::new(Vec::new()));
        let seen = targets.clone();

        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let target = read_connect_target(&mut inbound).await?;
                    seen.lock().unwrap().push(target.clone());
                    let reply = format!("HTTP/1.1 {status}\r\n\r\n");
                    inbound.write_all(reply.as_bytes()).await?;
                    if !status.starts_with("200") {
                        return Ok::<_, io::Error>(());
                    }
                    let mut outbound = TcpStream::connect(target).await?;
                    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
                    Ok(())
                });
            }
        });

        Self { port, targets }
    }

    fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn targets(&self) -> Vec<String> {
        self.targets.lock().unwrap().clone()
    }
}

async fn read_connect_target(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await?);
    }
    let head = String::from_utf8_lossy(&head);
    let mut parts = head.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("CONNECT"), Some(target)) => Ok(target.to_string()),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "not a CONNECT request")),
    }
}

/// Counts successful logins.
struct CountingAuthenticator {
    inner: StaticAuthenticator,
    logins: AtomicUsize,
}

impl Authenticator for CountingAuthenticator {
    fn authenticate(&self, client_id: &str, password: &str) -> bool {
        let ok = self.inner.authenticate(client_id, password);
        if ok {
            self.logins.fetch_add(1, Ordering::SeqCst);
        }
        ok
    }

    fn change_password(&self, client_id: &str, new_password: &str) -> bool {
        self.inner.change_password(client_id, new_password)
    }
}

async fn check_one(client: &mut EppClient) {
    let response = client
        .send(Command::object(Verb::Check, DomainCheck::new(["example.com"])))
        .await
        .unwrap();
    assert!(response.res_data::<DomainCheckData>().unwrap().results[0].available);
}

async fn login(client: &mut EppClient) {
    let login = Login::new(CLIENT_ID, PASSWORD).with_services_from(client.greeting());
    client.login(login).await.unwrap();
}

#[tokio::test]
async fn test_tls_session() {
    let cert = CertConfig::generate("localhost").unwrap();
    let leaf = cert.leaf_der().unwrap().to_vec();
    let config = common::server_config().with_tls(TlsConfig::with_cert(cert));
    let server = common::start(ServerContext::new(config, default_registry(), common::dispatcher())).await;

    let descriptor = common::descriptor(server.local_addr())
        .with_tls(ClientTlsConfig::trusting(leaf).with_server_name("localhost"));
    let mut client = EppClient::connect(descriptor, common::registry()).await.unwrap();
    login(&mut client).await;
    check_one(&mut client).await;
    assert_eq!(
        client.logout().await.unwrap().code(),
        ResultCode::SuccessEndingSession
    );

    server.shutdown();
}

#[tokio::test]
async fn test_tls_untrusted_certificate() {
    let served = CertConfig::generate("localhost").unwrap();
    let other = CertConfig::generate("localhost").unwrap();
    let config = common::server_config().with_tls(TlsConfig::with_cert(served));
    let server = common::start(ServerContext::new(config, default_registry(), common::dispatcher())).await;

    let descriptor = common::descriptor(server.local_addr()).with_tls(
        ClientTlsConfig::trusting(other.leaf_der().unwrap().to_vec()).with_server_name("localhost"),
    );
    let result = EppClient::connect(descriptor, common::registry()).await;
    assert!(matches!(result, Err(EppError::Connect { .. })));

    server.shutdown();
}

#[tokio::test]
async fn test_single_proxy_hop() {
    let server = common::start_default().await;
    let proxy = TestProxy::start("200 Connection established").await;

    let chain: ProxyChain = proxy.address().parse().unwrap();
    let descriptor = common::descriptor(server.local_addr()).with_proxies(chain);
    let mut client = EppClient::connect(descriptor, common::registry()).await.unwrap();
    login(&mut client).await;
    check_one(&mut client).await;
    client.logout().await.unwrap();

    assert_eq!(proxy.targets(), [server.local_addr().to_string()]);
    server.shutdown();
}

#[tokio::test]
async fn test_proxy_chain_is_traversed_in_order() {
    let server = common::start_default().await;
    let first = TestProxy::start("200 OK").await;
    let second = TestProxy::start("200 OK").await;

    let chain: ProxyChain = format!("{},{}", first.address(), second.address())
        .parse()
        .unwrap();
    let descriptor = common::descriptor(server.local_addr()).with_proxies(chain);
    let mut client = EppClient::connect(descriptor, common::registry()).await.unwrap();
    login(&mut client).await;
    client.logout().await.unwrap();

    assert_eq!(first.targets(), [second.address()]);
    assert_eq!(second.targets(), [server.local_addr().to_string()]);
    server.shutdown();
}

#[tokio::test]
async fn test_proxy_refusal_is_connect_error() {
    let server = common::start_default().await;
    let proxy = TestProxy::start("403 Forbidden").await;

    let descriptor = common::descriptor(server.local_addr())
        .with_proxies(proxy.address().parse().unwrap());
    let err = EppClient::connect(descriptor, common::registry())
        .await
        .unwrap_err();
    match err {
        EppError::Connect { target, .. } => assert_eq!(target, server.local_addr().to_string()),
        other => panic!("expected connect error, got {other}"),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_refused_connection_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = EppClient::connect(common::descriptor(addr), common::registry())
        .await
        .unwrap_err();
    assert!(matches!(err, EppError::Connect { .. }));
}

#[tokio::test]
async fn test_pool_reuses_sessions() {
    let auth = Arc::new(CountingAuthenticator {
        inner: common::authenticator(),
        logins: AtomicUsize::new(0),
    });
    let ctx = ServerContext::new(
        common::server_config(),
        default_registry(),
        common::dispatcher_with(auth.clone()),
    );
    let server = common::start(ctx).await;

    let pool = ClientPool::new(
        common::descriptor(server.local_addr()),
        common::registry(),
        Login::new(CLIENT_ID, PASSWORD),
        2,
        Duration::from_secs(5),
    );
    assert_eq!(pool.size(), 2);

    {
        let mut client = pool.checkout().await.unwrap();
        check_one(&mut client).await;
    }
    assert_eq!(pool.idle(), 1);
    {
        let mut client = pool.checkout().await.unwrap();
        check_one(&mut client).await;
        assert_eq!(pool.idle(), 0);
    }
    assert_eq!(pool.idle(), 1);
    assert_eq!(auth.logins.load(Ordering::SeqCst), 1);

    pool.close_idle().await;
    assert_eq!(pool.idle(), 0);
    server.shutdown();
}

#[tokio::test]
async fn test_pool_drops_closed_sessions() {
    let server = common::start_default().await;
    let pool = ClientPool::new(
        common::descriptor(server.local_addr()),
        common::registry(),
        Login::new(CLIENT_ID, PASSWORD),
        1,
        Duration::from_secs(5),
    );

    {
        let mut client = pool.checkout().await.unwrap();
        client.logout().await.unwrap();
    }
    assert_eq!(pool.idle(), 0);

    let mut client = pool.checkout().await.unwrap();
    check_one(&mut client).await;
    drop(client);
    server.shutdown();
}

#[tokio::test]
async fn test_pool_checkout_times_out() {
    let server = common::start_default().await;
    let pool = ClientPool::new(
        common::descriptor(server.local_addr()),
        common::registry(),
        Login::new(CLIENT_ID, PASSWORD),
        1,
        Duration::from_millis(100),
    );

    let held = pool.checkout().await.unwrap();
    let err = pool.checkout().await.unwrap_err();
    assert!(matches!(err, EppError::PoolTimeout(_)));
    drop(held);

    server.shutdown();
}
