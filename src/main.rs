//! JSON-lines driver: one command per stdin line, one response per stdout line.
//!
//! ```text
//! {"cmd":"token","action_id":"sit","value":1.0}
//! {"cmd":"manifest","action_id":"sit","user_present":true}
//! {"cmd":"spend","action_kind":"animation"}
//! {"cmd":"outcome","action_kind":"generate_content","success":false}
//! ```
//!
//! Logs go to stderr. When `SQLITE_PATH` is set the latest snapshot for
//! `AGENT_ID` is restored on startup and the final state saved on exit.

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use companion_engine::config::EngineConfig;
use companion_engine::engine::{Engine, OutcomeMetrics};
use companion_engine::logging::{log, obj, v_num, v_str, Domain, Level};
use companion_engine::matrix::ManifestContext;
use companion_engine::shared::{SharedEngine, Sweeper};
use companion_engine::snapshot::EngineSnapshot;
use companion_engine::storage::SnapshotStore;
use companion_engine::trust::TokenEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
enum Command {
    Token {
        action_id: String,
        value: f64,
        timestamp: Option<u64>,
    },
    Manifest {
        action_id: String,
        #[serde(default)]
        user_present: bool,
        #[serde(default)]
        recent_reward: bool,
        #[serde(default)]
        stress: f64,
        /// Probability only, no draw
        #[serde(default)]
        peek: bool,
    },
    Instinct {
        action_id: String,
        base_reliability: f64,
    },
    Price {
        action_kind: String,
        cost: Option<u64>,
    },
    Spend {
        action_kind: String,
        cost: Option<u64>,
        #[serde(default)]
        metadata: Value,
    },
    Earn {
        outcome_kind: String,
        amount: Option<u64>,
        efficiency: Option<f64>,
    },
    Outcome {
        action_kind: String,
        success: bool,
        #[serde(default)]
        metrics: OutcomeMetrics,
    },
    Training {
        active: bool,
    },
    Tick,
    Mood,
    Snapshot,
    Load {
        snapshot: EngineSnapshot,
    },
    Reset,
    Shutdown,
}

fn handle(engine: &mut Engine, cmd: Command) -> Result<Value> {
    let out = match cmd {
        Command::Token { action_id, value, timestamp } => {
            let ts = timestamp.unwrap_or_else(|| engine.now());
            json!(engine.submit_token(TokenEvent::new(action_id, value, ts)))
        }
        Command::Manifest { action_id, user_present, recent_reward, stress, peek } => {
            let ctx = ManifestContext::from_signals(user_present, recent_reward, stress);
            if peek {
                json!({ "probability": engine.manifestation_probability(&action_id, ctx) })
            } else {
                json!(engine.query_manifestation(&action_id, ctx))
            }
        }
        Command::Instinct { action_id, base_reliability } => {
            engine.set_instinct(&action_id, base_reliability);
            json!({ "ok": true })
        }
        Command::Price { action_kind, cost } => json!(engine.assess_action(&action_kind, cost)),
        Command::Spend { action_kind, cost, metadata } => {
            match engine.spend_action(&action_kind, cost, metadata) {
                Ok(balance) => json!({ "allowed": true, "balance": balance }),
                Err(denied) => json!({
                    "allowed": false,
                    "reason": denied.reason.as_str(),
                    "cost": denied.cost,
                    "balance": denied.balance,
                }),
            }
        }
        Command::Earn { outcome_kind, amount, efficiency } => {
            json!({ "balance": engine.earn(&outcome_kind, amount, efficiency) })
        }
        Command::Outcome { action_kind, success, metrics } => {
            json!(engine.record_outcome(&action_kind, success, metrics))
        }
        Command::Training { active } => {
            if active {
                engine.start_training();
            } else {
                engine.stop_training();
            }
            json!({ "training_active": engine.training_active() })
        }
        Command::Tick => json!(engine.tick()),
        Command::Mood => json!(engine.mood()),
        Command::Snapshot => json!(engine.export_snapshot()?),
        Command::Load { snapshot } => {
            engine.load_snapshot(snapshot)?;
            json!({ "ok": true })
        }
        Command::Reset => {
            engine.reset();
            json!({ "ok": true })
        }
        // Handled by the read loop
        Command::Shutdown => json!({ "ok": true }),
    };
    Ok(out)
}

fn open_store() -> Result<Option<SnapshotStore>> {
    let Ok(path) = std::env::var("SQLITE_PATH") else {
        return Ok(None);
    };
    let mut store = SnapshotStore::new(&path)?;
    store.init()?;
    Ok(Some(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = EngineConfig::from_env();
    let sweep_period = Duration::from_millis(cfg.timers.sweep_interval_ms.clamp(100, 1_000));
    let mut store = open_store()?;

    let mut engine = Engine::new(cfg.clone());
    if let Some(store) = &store {
        if let Some(snapshot) = store.load_latest(&cfg.agent_id)? {
            engine.load_snapshot(snapshot)?;
        }
    }
    let engine = SharedEngine::new(engine);
    let sweeper = Sweeper::spawn(engine.clone(), sweep_period);

    log(
        Level::Info,
        Domain::System,
        "driver_ready",
        obj(&[
            ("agent_id", v_str(&cfg.agent_id)),
            ("sweep_poll_ms", v_num(sweep_period.as_millis() as f64)),
            ("persistent", json!(store.is_some())),
        ]),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Command>(line) {
            Ok(Command::Shutdown) => break,
            Ok(cmd) => match engine.with(|e| handle(e, cmd)) {
                Some(Ok(value)) => value,
                Some(Err(err)) => json!({ "error": err.to_string() }),
                None => break,
            },
            Err(err) => json!({ "error": format!("bad command: {}", err) }),
        };
        stdout.write_all(format!("{}\n", response).as_bytes()).await?;
        stdout.flush().await?;
    }

    sweeper.stop();
    if let Some(last) = engine.shutdown() {
        let last = last?;
        if let Some(store) = store.as_mut() {
            store.save(&last)?;
        }
        stdout.write_all(format!("{}\n", json!({ "shutdown": last.state_hash })).as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
