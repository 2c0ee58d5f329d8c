//! RCON client behaviour against a live socket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use overseer::rcon::{RconClient, RconErrorKind, RconSettings};

use crate::fake_server::{self, Mode, PASSWORD};

#[tokio::test]
async fn command_returns_response_body() {
    let server = fake_server::spawn(Mode::Normal, |cmd| format!("ran: {cmd}")).await;
    let client = RconClient::new(server.settings(PASSWORD));

    let body = client.execute("status").await.expect("call should succeed");
    assert_eq!(body, "ran: status");
    assert_eq!(server.commands(), vec!["status"]);
}

#[tokio::test]
async fn wrong_password_is_auth_failure() {
    let server = fake_server::spawn(Mode::Normal, |_| "never".to_owned()).await;
    let client = RconClient::new(server.settings("wrong"));

    let err = client.execute("status").await.expect_err("auth must fail");
    assert_eq!(err.kind(), RconErrorKind::AuthFailed);
    assert!(server.commands().is_empty());
}

#[tokio::test]
async fn empty_response_is_success_not_failure() {
    let server = fake_server::spawn(Mode::Normal, |_| String::new()).await;
    let client = RconClient::new(server.settings(PASSWORD));

    let body = client.execute("save").await.expect("empty body is ok");
    assert!(body.is_empty());
}

#[tokio::test]
async fn silent_server_times_out() {
    let server = fake_server::spawn(Mode::Silent, |_| String::new()).await;
    let settings = RconSettings {
        call_timeout: Duration::from_millis(300),
        ..server.settings(PASSWORD)
    };
    let client = RconClient::new(settings);

    let err = client.execute("status").await.expect_err("must time out");
    assert_eq!(err.kind(), RconErrorKind::Timeout);
}

#[tokio::test]
async fn unrelated_frames_are_skipped() {
    let server = fake_server::spawn(Mode::StrayFrame, |_| "ok".to_owned()).await;
    let client = RconClient::new(server.settings(PASSWORD));

    let body = client.execute("players").await.expect("call should succeed");
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let client = RconClient::new(RconSettings {
        addr,
        password: PASSWORD.to_owned(),
        connect_timeout: Duration::from_secs(1),
        call_timeout: Duration::from_secs(2),
        post_call_delay: Duration::ZERO,
    });
    let err = client.execute("status").await.expect_err("nothing listens");
    assert_eq!(err.kind(), RconErrorKind::Connect);
}

#[tokio::test]
async fn concurrent_calls_never_overlap() {
    let server = fake_server::spawn(Mode::Normal, |cmd| cmd.to_owned()).await;
    let settings = RconSettings {
        post_call_delay: Duration::from_millis(50),
        ..server.settings(PASSWORD)
    };
    let client = Arc::new(RconClient::new(settings));

    let mut tasks = tokio::task::JoinSet::new();
    for n in 0..4 {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.execute(&format!("cmd {n}")).await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.expect("task").expect("call should succeed");
    }

    assert_eq!(server.commands().len(), 4);
    assert_eq!(server.peak_connections(), 1);
}

#[tokio::test]
async fn post_call_delay_is_held_before_returning() {
    let server = fake_server::spawn(Mode::Normal, |_| "ok".to_owned()).await;
    let settings = RconSettings {
        post_call_delay: Duration::from_millis(150),
        ..server.settings(PASSWORD)
    };
    let client = RconClient::new(settings);

    let started = Instant::now();
    client.execute("status").await.expect("call should succeed");
    assert!(started.elapsed() >= Duration::from_millis(150));
}
