//! SQLite ledger persistence and concurrent crediting.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinSet;

use overseer::ledger::SqliteLedger;
use overseer::sinks::{LoginRecord, Player, RewardSink};

async fn open_ledger(dir: &tempfile::TempDir) -> SqliteLedger {
    SqliteLedger::open(&dir.path().join("data").join("ledger.db"))
        .await
        .expect("ledger opens")
}

fn alice() -> Player {
    Player::new("76561198000000001", "Alice")
}

#[tokio::test]
async fn concurrent_credits_all_land() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = Arc::new(open_ledger(&dir).await);

    let mut tasks = JoinSet::new();
    for n in 0..20 {
        let ledger = Arc::clone(&ledger);
        tasks.spawn(async move {
            ledger
                .credit_currency(&alice(), 5, &format!("credit {n}"))
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.expect("task joins").expect("credit lands");
    }

    assert_eq!(
        ledger.balance(&alice().id).await.expect("balance"),
        Some(100)
    );
    assert_eq!(
        ledger.transaction_count(&alice().id).await.expect("count"),
        20
    );
}

#[tokio::test]
async fn experience_reports_level_ups() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_ledger(&dir).await;

    let first = ledger
        .credit_experience(&alice(), 60)
        .await
        .expect("credit");
    assert!(!first.leveled_up);
    assert_eq!(first.new_level, 1);

    let second = ledger
        .credit_experience(&alice(), 60)
        .await
        .expect("credit");
    assert!(second.leveled_up);
    assert_eq!(second.new_level, 2);
}

#[tokio::test]
async fn rank_follows_experience() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_ledger(&dir).await;

    assert_eq!(
        ledger.player_rank("nobody").await.expect("rank"),
        "survivor"
    );

    ledger
        .credit_experience(&alice(), 1_600)
        .await
        .expect("credit");
    assert_eq!(
        ledger.player_rank(&alice().id).await.expect("rank"),
        "scavenger"
    );
}

#[tokio::test]
async fn login_record_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_ledger(&dir).await;
    assert!(ledger.last_login(&alice().id).await.expect("read").is_none());

    let record = LoginRecord {
        day: NaiveDate::from_ymd_opt(2026, 3, 14).expect("valid date"),
        streak: 6,
    };
    ledger.store_login(&alice(), record).await.expect("store");

    assert_eq!(
        ledger.last_login(&alice().id).await.expect("read"),
        Some(record)
    );
}

#[tokio::test]
async fn profile_collects_standing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = open_ledger(&dir).await;
    assert!(ledger.profile("nobody").await.expect("read").is_none());

    ledger
        .credit_currency(&alice(), 42, "test")
        .await
        .expect("credit");
    ledger
        .credit_experience(&alice(), 400)
        .await
        .expect("credit");

    let profile = ledger
        .profile(&alice().id)
        .await
        .expect("read")
        .expect("known player");
    assert_eq!(profile.name, "Alice");
    assert_eq!(profile.balance, 42);
    assert_eq!(profile.level, 3);
    assert_eq!(profile.rank, "survivor");
}

#[tokio::test]
async fn reopening_keeps_balances() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let ledger = open_ledger(&dir).await;
        ledger
            .credit_currency(&alice(), 7, "first run")
            .await
            .expect("credit");
    }
    let ledger = open_ledger(&dir).await;
    assert_eq!(ledger.balance(&alice().id).await.expect("balance"), Some(7));
}
