//! Echo suppression between the game and the chat platform.

use overseer::config::RelayConfig;
use overseer::pipeline::{ChatRelay, DedupeKey, DedupeSet, OutboundDecision};

fn relay(marker: &str, capacity: usize) -> ChatRelay {
    ChatRelay::new(&RelayConfig {
        enabled: true,
        marker: marker.to_owned(),
        capacity,
        command_prefix: "!".to_owned(),
    })
}

#[test]
fn marker_stops_inbound_messages_coming_back_out() {
    let relay = relay("[TG]", 100);
    let tagged = relay.inbound("bob", "evening all").expect("accepted");
    assert_eq!(tagged, "[TG] bob: evening all");

    assert_eq!(relay.outbound("Server", &tagged), OutboundDecision::LoopMarker);
}

#[test]
fn dedupe_alone_stops_the_echo_without_a_marker() {
    let relay = relay("", 100);
    let tagged = relay.inbound("bob", "evening all").expect("accepted");
    assert_eq!(tagged, "bob: evening all");

    assert_eq!(relay.outbound("bob", "evening all"), OutboundDecision::Duplicate);
    assert_eq!(relay.outbound("bob", &tagged), OutboundDecision::Duplicate);
}

#[test]
fn same_text_from_two_players_is_relayed_for_each() {
    let relay = relay("[TG]", 100);
    assert_eq!(relay.outbound("Alice", "gg"), OutboundDecision::Relay);
    assert_eq!(relay.outbound("Bob", "gg"), OutboundDecision::Relay);
    assert_eq!(relay.outbound("alice ", "gg"), OutboundDecision::Duplicate);
}

#[test]
fn commands_and_blank_text_are_not_forwarded_in() {
    let relay = relay("[TG]", 100);
    assert!(relay.inbound("bob", "!status").is_none());
    assert!(relay.inbound("bob", "   ").is_none());
    assert_eq!(relay.remembered(), 0);
}

#[test]
fn disabled_relay_passes_nothing() {
    let relay = ChatRelay::new(&RelayConfig {
        enabled: false,
        ..RelayConfig::default()
    });
    assert_eq!(relay.outbound("Alice", "hi"), OutboundDecision::Disabled);
    assert!(relay.inbound("bob", "hi").is_none());
}

#[test]
fn oldest_entries_are_forgotten_at_capacity() {
    let mut set = DedupeSet::new(2);
    assert!(set.insert(DedupeKey::new("a", "1")));
    assert!(set.insert(DedupeKey::new("a", "2")));
    assert!(!set.insert(DedupeKey::new("a", "1")));
    assert!(set.insert(DedupeKey::new("a", "3")));

    assert_eq!(set.len(), 2);
    assert!(!set.contains(&DedupeKey::new("a", "1")));
    assert!(set.contains(&DedupeKey::new("a", "3")));
}

#[test]
fn evicted_message_can_be_relayed_again() {
    let relay = relay("[TG]", 1);
    assert_eq!(relay.outbound("Alice", "first"), OutboundDecision::Relay);
    assert_eq!(relay.outbound("Alice", "second"), OutboundDecision::Relay);
    assert_eq!(relay.outbound("Alice", "first"), OutboundDecision::Relay);
}
