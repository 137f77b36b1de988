//! End-to-end session management tests.
//!
//! These tests run a real server on localhost and drive it with the client,
//! covering login negotiation, command gating, idle timeout and framing
//! faults.

mod common;

use std::time::Duration;

use common::{CLIENT_ID, PASSWORD};
use epp::client::EppClient;
use epp::objects::{default_registry, DomainCheck, DomainCheckData, DOMAIN_NS};
use epp::protocol::{Command, Login, Message, Response, ResultCode, Verb};
use epp::server::ServerContext;
use epp::transport::{read_frame, write_frame, FrameError};
use epp::{EppError, XmlCodec};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

fn failure_code(result: Result<Response, EppError>) -> ResultCode {
    match result {
        Err(e) => e.response().expect("command failure carries the response").code(),
        Ok(r) => panic!("expected failure, got {}", r.result()),
    }
}

/// Greeting, login, one check, logout, close.
#[tokio::test]
async fn test_login_check_logout() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();

    assert_eq!(client.greeting().server_id, "Example EPP server");
    assert!(client.greeting().supports_object(DOMAIN_NS));

    let login = Login::new(CLIENT_ID, PASSWORD).with_services_from(client.greeting());
    let response = client.login(login).await.unwrap();
    assert_eq!(response.code(), ResultCode::Success);
    assert!(client.is_logged_in());

    let response = client
        .send(Command::object(Verb::Check, DomainCheck::new(["example.com"])))
        .await
        .unwrap();
    assert_eq!(response.code(), ResultCode::Success);
    let data = response.res_data::<DomainCheckData>().unwrap();
    assert_eq!(data.results.len(), 1);
    assert_eq!(data.results[0].name, "example.com");
    assert!(data.results[0].available);

    let response = client.logout().await.unwrap();
    assert_eq!(response.code(), ResultCode::SuccessEndingSession);
    assert!(client.is_closed());
    assert!(matches!(
        client.send(Command::poll_request()).await,
        Err(EppError::SessionClosed)
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_check_reports_taken_name() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();
    let login = Login::new(CLIENT_ID, PASSWORD).with_services_from(client.greeting());
    client.login(login).await.unwrap();

    let response = client
        .send(Command::object(
            Verb::Check,
            DomainCheck::new(["free.example", "TAKEN.example"]),
        ))
        .await
        .unwrap();
    let data = response.res_data::<DomainCheckData>().unwrap();
    assert!(data.get("free.example").unwrap().available);
    let taken = data.get("TAKEN.example").unwrap();
    assert!(!taken.available);
    assert_eq!(taken.reason.as_deref(), Some("In use"));

    client.logout().await.unwrap();
    server.shutdown();
}

#[tokio::test]
async fn test_second_login_keeps_session() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();
    let login = Login::new(CLIENT_ID, PASSWORD).with_services_from(client.greeting());
    client.login(login.clone()).await.unwrap();

    assert_eq!(failure_code(client.login(login).await), ResultCode::CommandUseError);
    assert!(!client.is_closed());

    // Still authenticated.
    let response = client
        .send(Command::object(Verb::Check, DomainCheck::new(["example.com"])))
        .await
        .unwrap();
    assert!(response.is_success());

    client.logout().await.unwrap();
    server.shutdown();
}

#[tokio::test]
async fn test_command_before_login_closes() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();

    let result = client
        .send(Command::object(Verb::Check, DomainCheck::new(["example.com"])))
        .await;
    assert_eq!(failure_code(result), ResultCode::CommandFailedClosing);
    assert!(client.is_closed());
    assert!(matches!(
        client.send(Command::poll_request()).await,
        Err(EppError::SessionClosed)
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_hello_before_login() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();

    let greeting = client.hello().await.unwrap();
    assert_eq!(greeting.server_id, "Example EPP server");
    assert!(!client.is_closed());

    server.shutdown();
}

#[tokio::test]
async fn test_failed_logins_close_connection() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();
    let login = Login::new(CLIENT_ID, "wrong").with_services_from(client.greeting());

    assert_eq!(
        failure_code(client.login(login.clone()).await),
        ResultCode::AuthenticationError
    );
    assert_eq!(
        failure_code(client.login(login.clone()).await),
        ResultCode::AuthenticationError
    );
    assert_eq!(
        failure_code(client.login(login).await),
        ResultCode::AuthenticationErrorClosing
    );
    assert!(client.is_closed());

    server.shutdown();
}

#[tokio::test]
async fn test_unoffered_service_is_refused() {
    let server = common::start_default().await;
    let mut client = EppClient::connect(common::descriptor(server.local_addr()), common::registry())
        .await
        .unwrap();

    let login = Login::new(CLIENT_ID, PASSWORD).with_object("urn:ietf:params:xml:ns:host-1.0");
    assert_eq!(
        failure_code(client.login(login).await),
        ResultCode::UnimplementedObjectService
    );
    assert!(!client.is_closed());

    server.shutdown();
}

#[tokio::test]
async fn test_idle_session_is_closed() {
    let config = common::server_config().with_idle_timeout(Duration::from_millis(100));
    let ctx = ServerContext::new(config, default_registry(), common::dispatcher());
    let server = common::start(ctx).await;

    let (mut stream, _codec) = common::raw_connect(server.local_addr()).await;
    let read = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream, 1 << 20))
        .await
        .expect("server should close the idle connection");
    assert!(matches!(read, Err(FrameError::Closed)));

    server.shutdown();
}

#[tokio::test]
async fn test_invalid_frame_length_closes() {
    let server = common::start_default().await;
    let (mut stream, mut codec) = common::raw_connect(server.local_addr()).await;

    stream.write_all(&3u32.to_be_bytes()).await.unwrap();

    let reply = read_frame(&mut stream, 1 << 20).await.unwrap();
    let Message::Response(response) = codec.decode(&reply).unwrap() else {
        panic!("expected response");
    };
    assert_eq!(response.code(), ResultCode::CommandFailedClosing);
    assert!(matches!(
        read_frame(&mut stream, 1 << 20).await,
        Err(FrameError::Closed)
    ));

    server.shutdown();
}

const UNKNOWN_VERB: &[u8] = br#"<?xml version="1.0" encoding="UTF-8"?>
<epp xmlns="urn:ietf:params:xml:ns:epp-1.0">
  <command>
    <frobnicate/>
    <clTRID>ABC-12345</clTRID>
  </command>
</epp>"#;

async fn read_response(stream: &mut TcpStream, codec: &mut XmlCodec) -> Response {
    let reply = read_frame(stream, 1 << 20).await.unwrap();
    let Message::Response(response) = codec.decode(&reply).unwrap() else {
        panic!("expected response");
    };
    response
}

#[tokio::test]
async fn test_undecodable_command_before_login_closes() {
    let server = common::start_default().await;
    let (mut stream, mut codec) = common::raw_connect(server.local_addr()).await;

    write_frame(&mut stream, UNKNOWN_VERB).await.unwrap();

    let response = read_response(&mut stream, &mut codec).await;
    assert_eq!(response.code(), ResultCode::CommandFailedClosing);
    assert_eq!(response.trans_id.client.as_deref(), Some("ABC-12345"));
    assert!(matches!(
        read_frame(&mut stream, 1 << 20).await,
        Err(FrameError::Closed)
    ));

    server.shutdown();
}

#[tokio::test]
async fn test_undecodable_command_after_login_echoes_client_trid() {
    let server = common::start_default().await;
    let (mut stream, mut codec) = common::raw_connect(server.local_addr()).await;

    let login = Command::login(Login::new(CLIENT_ID, PASSWORD).with_object(DOMAIN_NS));
    write_frame(&mut stream, &codec.encode(&Message::Command(login)).unwrap())
        .await
        .unwrap();
    assert_eq!(read_response(&mut stream, &mut codec).await.code(), ResultCode::Success);

    write_frame(&mut stream, UNKNOWN_VERB).await.unwrap();
    let response = read_response(&mut stream, &mut codec).await;
    assert_eq!(response.code(), ResultCode::UnknownCommand);
    assert_eq!(response.trans_id.client.as_deref(), Some("ABC-12345"));
    assert!(!response.trans_id.server.is_empty());

    // Session is still usable.
    let check = Command::object(Verb::Check, DomainCheck::new(["example.com"]));
    write_frame(&mut stream, &codec.encode(&Message::Command(check)).unwrap())
        .await
        .unwrap();
    assert!(read_response(&mut stream, &mut codec).await.is_success());

    server.shutdown();
}
