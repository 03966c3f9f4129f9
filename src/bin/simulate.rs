//! Deterministic training session on a manual clock.
//!
//! Usage: simulate [seed] [minutes]
//!
//! A scripted user rewards "sit" and "stay", occasionally punishes "jump",
//! and the companion spends points on animations and content. Prints one JSON
//! line per simulated minute, then the sealed final snapshot hash.

use std::sync::Arc;

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;

use companion_engine::clock::{Clock, ManualClock, SECOND_MS};
use companion_engine::config::EngineConfig;
use companion_engine::engine::{Engine, OutcomeMetrics, OutcomeReport};
use companion_engine::matrix::ManifestContext;
use companion_engine::trust::TokenEvent;

const ACTIONS: [&str; 4] = ["sit", "stay", "roll", "jump"];

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let seed: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(7);
    let minutes: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(30);

    let clock = ManualClock::new(0);
    let cfg = EngineConfig {
        rng_seed: Some(seed),
        ..EngineConfig::default()
    };
    let mut engine = Engine::with_clock(cfg, Arc::new(clock.clone()));
    let mut user = StdRng::seed_from_u64(seed.wrapping_add(1));
    engine.set_instinct("sit", 0.4);
    engine.start_training();

    for minute in 0..minutes {
        // Burst of feedback, 1.5-4s apart
        for _ in 0..user.gen_range(2..6) {
            clock.advance(user.gen_range(1_500..4_000));
            let action = ACTIONS[user.gen_range(0..ACTIONS.len())];
            let value = match action {
                "jump" if user.gen_bool(0.7) => -1.0,
                "roll" => 0.5,
                _ => 1.0,
            };
            engine.submit_token(TokenEvent::new(action, value, clock.now_ms()));
        }

        let ctx = ManifestContext::from_signals(true, true, 0.0);
        let manifested: Vec<&str> = ACTIONS
            .iter()
            .copied()
            .filter(|a| engine.query_manifestation(a, ctx).will_manifest)
            .collect();

        let kind = if minute % 5 == 4 { "generate_content" } else { "animation" };
        let spent = engine
            .spend_action(kind, None, json!({ "minute": minute }))
            .is_ok();
        let outcome = if spent {
            let success = user.gen_bool(0.65);
            let metrics = OutcomeMetrics {
                efficiency: Some(user.gen_range(0.5..1.0)),
                ..OutcomeMetrics::default()
            };
            match engine.record_outcome(kind, success, metrics) {
                OutcomeReport::Earned { amount, .. } => json!({ "earned": amount }),
                OutcomeReport::Escalated(r) => json!({
                    "escalated": r.steps.iter().map(|s| s.kind().to_string()).collect::<Vec<_>>(),
                    "fallback": r.fallback,
                }),
            }
        } else {
            json!("denied")
        };

        // Idle out the rest of the minute so decay and timers get a turn
        clock.advance(60 * SECOND_MS / 2);
        let tick = engine.tick();

        let state = engine.trust_state();
        println!(
            "{}",
            json!({
                "minute": minute,
                "trust": state.trust,
                "phase": state.phase.as_str(),
                "learned": engine.matrix().learned_behaviors(),
                "manifested": manifested,
                "action": kind,
                "outcome": outcome,
                "balance": engine.account().balance(),
                "tier": engine.account().strategy_tier().as_str(),
                "mood": engine.mood().mood,
                "fired": tick.fired,
            })
        );
    }

    let last = engine.shutdown()?;
    println!("{}", json!({ "final_hash": last.state_hash, "telemetry": last.telemetry }));
    Ok(())
}
