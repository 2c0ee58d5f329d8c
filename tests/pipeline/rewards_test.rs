//! Reward tables, streaks, rig tiers, and rank multipliers.

use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

use overseer::config::{RewardsConfig, RigPosition};
use overseer::pipeline::rewards::{classify_rig_position, resolve_rig_tier, Cooldowns};
use overseer::pipeline::{advance_streak, EventDetail, Reward, RewardTable, RigTier};
use overseer::sinks::LoginRecord;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 5, d).expect("valid date")
}

fn table() -> RewardTable {
    RewardTable::new(RewardsConfig::default())
}

#[test]
fn ingot_base_reward_doubles_for_legend_currency_only() {
    let t = table();
    let base = t.base_reward(&EventDetail::Crafting {
        item: "IronIngot".to_owned(),
        count: 1,
    });
    assert_eq!(base, Reward::new(4, 6));
    assert_eq!(base.with_multiplier(t.multiplier("Legend")), Reward::new(8, 6));
}

#[test]
fn crafting_count_scales_the_reward() {
    let reward = table().base_reward(&EventDetail::Crafting {
        item: "Rifle Ammo".to_owned(),
        count: 3,
    });
    assert_eq!(reward, Reward::new(45, 60));
}

#[test]
fn building_prefers_material_over_item_name() {
    let t = table();
    let by_material = t.base_reward(&EventDetail::Building {
        item: "Wooden Door".to_owned(),
        material: Some("Metal".to_owned()),
    });
    let by_name = t.base_reward(&EventDetail::Building {
        item: "Stone Wall".to_owned(),
        material: None,
    });
    let fallback = t.base_reward(&EventDetail::Building {
        item: "Campfire".to_owned(),
        material: None,
    });
    assert_eq!(by_material, Reward::new(20, 20));
    assert_eq!(by_name, Reward::new(10, 10));
    assert_eq!(fallback, Reward::new(2, 2));
}

#[test]
fn unknown_rank_uses_base_rate() {
    assert!((table().multiplier("wanderer") - 1.0).abs() < f64::EPSILON);
}

#[test]
fn multiplier_rounds_to_nearest_coin() {
    assert_eq!(Reward::new(10, 3).with_multiplier(1.25), Reward::new(13, 3));
    assert_eq!(Reward::new(5, 5).with_multiplier(1.1), Reward::new(6, 5));
}

#[test]
fn consecutive_days_extend_the_streak() {
    let previous = Some(LoginRecord {
        day: day(1),
        streak: 4,
    });
    let update = advance_streak(previous, day(2));
    assert!(update.first_today);
    assert_eq!(update.streak, 5);
}

#[test]
fn a_missed_day_resets_the_streak() {
    let previous = Some(LoginRecord {
        day: day(1),
        streak: 9,
    });
    let update = advance_streak(previous, day(3));
    assert!(update.first_today);
    assert_eq!(update.streak, 1);
}

#[test]
fn second_login_same_day_is_not_first() {
    let previous = Some(LoginRecord {
        day: day(2),
        streak: 3,
    });
    let update = advance_streak(previous, day(2));
    assert!(!update.first_today);
    assert_eq!(update.streak, 3);
}

#[test]
fn first_login_ever_starts_at_one() {
    let update = advance_streak(None, day(2));
    assert!(update.first_today);
    assert_eq!(update.streak, 1);
}

#[test]
fn streak_bonus_pays_only_the_exact_tier() {
    let t = table();
    assert_eq!(t.streak_bonus(7), 75);
    assert_eq!(t.streak_bonus(6), 0);
    assert_eq!(t.streak_bonus(8), 0);
    assert_eq!(t.streak_bonus(30), 500);
}

#[test]
fn rig_position_picks_nearest_centre_in_range() {
    let rigs = vec![
        RigPosition {
            tier: "small".to_owned(),
            x: 0.0,
            z: 0.0,
            radius: 200.0,
        },
        RigPosition {
            tier: "large".to_owned(),
            x: 300.0,
            z: 0.0,
            radius: 200.0,
        },
    ];
    assert_eq!(
        classify_rig_position(Some((250.0, 40.0, 10.0)), &rigs),
        Some(RigTier::Large)
    );
    assert_eq!(
        classify_rig_position(Some((100.0, 40.0, 0.0)), &rigs),
        Some(RigTier::Small)
    );
    assert_eq!(classify_rig_position(Some((0.0, 0.0, 900.0)), &rigs), None);
    assert_eq!(classify_rig_position(None, &rigs), None);
}

#[test]
fn disagreeing_rig_classifiers_pay_the_lower_tier() {
    let resolution = resolve_rig_tier(Some(RigTier::Large), Some(RigTier::Small));
    assert_eq!(resolution.tier, Some(RigTier::Small));
    assert_eq!(resolution.mismatch, Some((RigTier::Large, RigTier::Small)));

    let agreed = resolve_rig_tier(Some(RigTier::Large), None);
    assert_eq!(agreed.tier, Some(RigTier::Large));
    assert!(agreed.mismatch.is_none());

    assert_eq!(table().rig_reward(None), Reward::new(100, 100));
}

#[test]
fn chat_cooldown_is_per_player() {
    let mut cooldowns = Cooldowns::new(Duration::from_secs(60));
    let start = Instant::now();
    let later = start
        .checked_add(Duration::from_secs(61))
        .expect("instant in range");

    assert!(cooldowns.try_claim("76", start));
    assert!(!cooldowns.try_claim("76", start));
    assert!(cooldowns.try_claim("77", start));
    assert!(cooldowns.try_claim("76", later));
}
