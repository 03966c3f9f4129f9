//! Acceptance scenarios: trust build-up, risk gating near empty, extinction
//! of an unreinforced habit, efficiency-boosted earnings.

use std::sync::Arc;

use serde_json::Value;

use companion_engine::clock::{Clock, ManualClock, HOUR_MS, SECOND_MS};
use companion_engine::config::{EconomyConfig, EngineConfig, MatrixConfig};
use companion_engine::economy::{Decision, DenyReason, ResourceAccount};
use companion_engine::engine::Engine;
use companion_engine::matrix::{BehaviorMatrix, BehaviorRecord, ManifestContext};
use companion_engine::trust::{Phase, TokenEvent};

fn engine_at(start: u64) -> (Engine, ManualClock) {
    let clock = ManualClock::new(start);
    let cfg = EngineConfig {
        rng_seed: Some(3),
        ..EngineConfig::default()
    };
    (Engine::with_clock(cfg, Arc::new(clock.clone())), clock)
}

// ---------------------------------------------------------------------------
// A: spaced positive tokens build trust into PatternRecognition
// ---------------------------------------------------------------------------

#[test]
fn spaced_tokens_cross_pattern_threshold() {
    let (mut engine, clock) = engine_at(10_000);
    let mut last = 0.0;
    let mut crossed_at = None;
    for i in 1..=4 {
        let r = engine.submit_token(TokenEvent::new("sit", 1.0, clock.now_ms()));
        assert!(r.trust > last, "token {} did not raise trust", i);
        last = r.trust;
        if crossed_at.is_none() && r.phase == Phase::PatternRecognition {
            crossed_at = Some(i);
        }
        clock.advance(3 * SECOND_MS);
    }
    assert!(last >= 0.3);
    assert!(matches!(crossed_at, Some(3) | Some(4)), "crossed at {:?}", crossed_at);
    assert_eq!(engine.trust_state().phase, Phase::PatternRecognition);
}

// ---------------------------------------------------------------------------
// B: six spends of 15 from 100, the last one risk-gated
// ---------------------------------------------------------------------------

fn gated_account(p_success: f64) -> ResourceAccount {
    let mut cfg = EconomyConfig::default();
    cfg.base_success_rates.insert("basic".to_string(), p_success);
    cfg.reward_table.insert("basic".to_string(), 30);
    ResourceAccount::new(cfg)
}

fn spend_six(p_success: f64) -> (ResourceAccount, Vec<Result<u64, DenyReason>>) {
    let matrix = BehaviorMatrix::new(MatrixConfig::default());
    let mut account = gated_account(p_success);
    let results = (0..6)
        .map(|i| {
            account
                .spend("basic", Some(15), Value::Null, &matrix, i)
                .map_err(|d| d.reason)
        })
        .collect();
    (account, results)
}

#[test]
fn sixth_spend_allowed_when_odds_are_good() {
    let (account, results) = spend_six(0.9);
    let first_five: Vec<Result<u64, DenyReason>> = vec![Ok(85), Ok(70), Ok(55), Ok(40), Ok(25)];
    assert_eq!(results[..5].to_vec(), first_five);
    // 0.9 * 30 - 15 = 12 > 0 and 0.9 > 0.6
    assert_eq!(results[5], Ok(10));
    assert_eq!(account.balance(), 10);
}

#[test]
fn sixth_spend_denied_when_odds_are_poor() {
    let (account, results) = spend_six(0.3);
    assert!(results[..5].iter().all(Result::is_ok));
    assert_eq!(results[5], Err(DenyReason::UnfavorableRisk));
    assert_eq!(account.balance(), 25);

    let matrix = BehaviorMatrix::new(MatrixConfig::default());
    let a = account.assess("basic", Some(15), &matrix);
    assert_eq!(a.decision, Decision::Denied(DenyReason::UnfavorableRisk));
    assert!((a.p_success.unwrap() - 0.3).abs() < 1e-12);
    assert!(a.expected_value.unwrap() < 0.0);
}

// ---------------------------------------------------------------------------
// C: a strong habit manifests; ten half-lives of neglect extinguish it
// ---------------------------------------------------------------------------

#[test]
fn neglected_habit_stops_manifesting() {
    let now = 5 * HOUR_MS;
    let mut matrix = BehaviorMatrix::new(MatrixConfig::default());
    let mut record = BehaviorRecord::new(now);
    record.strength = 0.9;
    record.confidence = 0.9;
    record.reinforcement_count = 1;
    matrix.insert_record("fetch", record);

    let ctx = ManifestContext::default();
    let fresh = matrix.probability("fetch", ctx, now);
    assert!(fresh > matrix.config().reinforcement_threshold, "p = {}", fresh);

    let later = now + 10 * matrix.config().half_life_ms;
    assert_eq!(matrix.probability("fetch", ctx, later), 0.0);
    assert!(matrix.record("fetch").unwrap().extinguished);
}

#[test]
fn neglected_habit_is_pruned_by_the_engine_sweep() {
    let (mut engine, clock) = engine_at(0);
    for _ in 0..8 {
        engine.submit_token(TokenEvent::new("fetch", 1.0, clock.now_ms()));
        clock.advance(SECOND_MS);
    }
    assert!(engine.matrix().record("fetch").unwrap().strength > 0.0);

    clock.advance(10 * HOUR_MS);
    let report = engine.tick();
    assert!(report.sweep.unwrap().extinguished.contains(&"fetch".to_string()));
    assert_eq!(engine.manifestation_probability("fetch", ManifestContext::default()), 0.0);
}

// ---------------------------------------------------------------------------
// D: efficiency bonus on earnings resets the failure streak
// ---------------------------------------------------------------------------

#[test]
fn efficient_milestone_earns_bonus_and_resets_failures() {
    let matrix = BehaviorMatrix::new(MatrixConfig::default());
    let mut account = ResourceAccount::new(EconomyConfig::default());
    account.escalate("generate_content", &matrix, 0);
    account.escalate("generate_content", &matrix, 1);
    assert_eq!(account.consecutive_failures(), 2);

    let before = account.balance();
    let after = account.earn("milestone", Some(20), Some(0.9), 2);
    assert_eq!(after - before, 26);
    assert_eq!(account.consecutive_failures(), 0);
}

#[test]
fn ordinary_efficiency_earns_base_reward() {
    let (mut engine, _) = engine_at(0);
    assert_eq!(engine.earn("milestone", None, Some(0.8)), 120);
    assert_eq!(engine.earn("partial", None, None), 128);
}
