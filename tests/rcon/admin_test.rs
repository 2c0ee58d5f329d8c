//! Command rendering, response classification, and the private message
//! fallback chain.

use std::sync::Arc;
use std::time::Duration;

use overseer::config::CommandSet;
use overseer::rcon::{CommandOutcome, GameAdmin, MessageRoute, RconClient, RconErrorKind};
use overseer::sinks::Player;

use crate::fake_server::{self, Mode, NO_REPLY, PASSWORD};

fn alice() -> Player {
    Player::new("76561198000000001", "Alice")
}

#[tokio::test]
async fn unknown_private_message_falls_back_to_alternate_and_sticks() {
    let server = fake_server::spawn(Mode::Normal, |cmd| {
        if cmd.starts_with("pm ") {
            "Unknown command: pm".to_owned()
        } else {
            String::new()
        }
    })
    .await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let first = admin.private_message(&alice(), "hi").await.expect("sent");
    let second = admin.private_message(&alice(), "again").await.expect("sent");

    assert_eq!(first, MessageRoute::PrivateAlternate);
    assert_eq!(second, MessageRoute::PrivateAlternate);
    assert_eq!(
        server.commands(),
        vec![
            "pm 76561198000000001 hi",
            "tell 76561198000000001 hi",
            "tell 76561198000000001 again",
        ]
    );
}

#[tokio::test]
async fn unsupported_private_messages_become_addressed_broadcasts() {
    let server = fake_server::spawn(Mode::Normal, |cmd| {
        if cmd.starts_with("say ") {
            String::new()
        } else {
            "Unknown command".to_owned()
        }
    })
    .await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let first = admin.private_message(&alice(), "hi").await.expect("sent");
    assert_eq!(first, MessageRoute::Broadcast);
    assert!(admin.private_messages_unsupported());

    let second = admin.private_message(&alice(), "again").await.expect("sent");
    assert_eq!(second, MessageRoute::Broadcast);

    let commands = server.commands();
    assert_eq!(commands.len(), 4);
    assert_eq!(commands[2], "say @Alice: hi");
    assert_eq!(commands[3], "say @Alice: again");
}

#[tokio::test]
async fn rejected_grant_is_reported_as_failed() {
    let server = fake_server::spawn(Mode::Normal, |_| "Player not found".to_owned()).await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let outcome = admin.give_currency(&alice(), 50).await.expect("rcon ok");
    assert!(matches!(outcome, CommandOutcome::Failed(_)));
    assert_eq!(server.commands(), vec!["giveitem 76561198000000001 coins 50"]);
}

#[tokio::test]
async fn item_delivery_reports_each_item() {
    let server = fake_server::spawn(Mode::Normal, |cmd| {
        if cmd.contains("rifle") {
            "Error: invalid item".to_owned()
        } else {
            "Gave item".to_owned()
        }
    })
    .await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let items = vec![("wood".to_owned(), 100), ("rifle".to_owned(), 1)];
    let report = admin.deliver_items(&alice(), &items).await;

    assert!(!report.success);
    assert_eq!(report.items.len(), 2);
    assert!(matches!(&report.items[0].outcome, Ok(CommandOutcome::Succeeded)));
    assert!(matches!(&report.items[1].outcome, Ok(CommandOutcome::Failed(_))));
}

#[tokio::test]
async fn broadcast_without_rcon_is_not_configured() {
    let admin = GameAdmin::new(None, CommandSet::default(), None);
    let err = admin.broadcast("hello").await.expect_err("no channel");
    assert_eq!(err.kind(), RconErrorKind::NotConfigured);
}

#[tokio::test]
async fn timed_out_alternate_keeps_private_messages_enabled() {
    let server = fake_server::spawn(Mode::Normal, |cmd| {
        if cmd.starts_with("pm ") {
            "Unknown command: pm".to_owned()
        } else if cmd.starts_with("tell ") {
            NO_REPLY.to_owned()
        } else {
            String::new()
        }
    })
    .await;
    let mut settings = server.settings(PASSWORD);
    settings.call_timeout = Duration::from_millis(300);
    let admin = GameAdmin::new(
        Some(Arc::new(RconClient::new(settings))),
        CommandSet::default(),
        None,
    );

    let err = admin
        .private_message(&alice(), "hi")
        .await
        .expect_err("alternate timed out");

    assert_eq!(err.kind(), RconErrorKind::Timeout);
    assert!(!admin.private_messages_unsupported());
    assert!(server.commands().iter().all(|c| !c.starts_with("say ")));

    admin
        .private_message(&alice(), "again")
        .await
        .expect_err("still trying private first");
    assert_eq!(
        server.commands().first().map(String::as_str),
        Some("pm 76561198000000001 hi")
    );
    assert_eq!(
        server.commands().get(2).map(String::as_str),
        Some("pm 76561198000000001 again")
    );
}

#[tokio::test]
async fn rejected_broadcast_is_an_error() {
    let server = fake_server::spawn(Mode::Normal, |_| "Error: chat is muted".to_owned()).await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let err = admin.broadcast("restart soon").await.expect_err("refused");
    assert_eq!(err.kind(), RconErrorKind::Rejected);
    assert_eq!(server.commands(), vec!["say restart soon"]);
}

#[tokio::test]
async fn refused_addressed_broadcast_is_not_reported_as_delivered() {
    let server = fake_server::spawn(Mode::Normal, |cmd| {
        if cmd.starts_with("say ") {
            "Error: chat is muted".to_owned()
        } else {
            "Unknown command".to_owned()
        }
    })
    .await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    let err = admin
        .private_message(&alice(), "hi")
        .await
        .expect_err("nobody saw it");
    assert_eq!(err.kind(), RconErrorKind::Rejected);
}

#[tokio::test]
async fn braces_in_chat_text_are_sent_literally() {
    let server = fake_server::spawn(Mode::Normal, |_| String::new()).await;
    let client = Arc::new(RconClient::new(server.settings(PASSWORD)));
    let admin = GameAdmin::new(Some(client), CommandSet::default(), None);

    admin.broadcast("type {message} to win").await.expect("sent");
    assert_eq!(server.commands(), vec!["say type {message} to win"]);
}
