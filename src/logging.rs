//! Structured logging for the companion engine.
//!
//! Design goals:
//! 1. Multi-level granularity (TRACE → FATAL)
//! 2. Domain-specific categories for filtering
//! 3. Replay/audit support via sequence numbers and state hashes
//! 4. Every learning and spending decision carries its inputs
//!
//! Records are JSON lines on stderr. When `LOG_DIR` is set they are also
//! appended to `<LOG_DIR>/<run_id>/events.jsonl` (TRACE/DEBUG go to
//! `trace.jsonl`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Trust,   // Token ingestion, phase progression
    Matrix,  // Reinforcement, decay, extinction, manifestation
    Economy, // Affordability, spends, earnings, escalation
    Engine,  // Facade lifecycle, snapshots
    Timer,   // Deadline arming and firing
    Storage, // Snapshot persistence
    System,  // Startup, shutdown
    Audit,   // State hashes for replay
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Trust => "trust",
            Domain::Matrix => "matrix",
            Domain::Economy => "economy",
            Domain::Engine => "engine",
            Domain::Timer => "timer",
            Domain::Storage => "storage",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let Ok(base) = std::env::var("LOG_DIR") else {
            return RunContext { run_id, events: None, trace: None };
        };
        let mut run_dir = PathBuf::from(base);
        run_dir.push(&run_id);
        if let Err(err) = create_dir_all(&run_dir) {
            eprintln!("[log] failed to create run dir: {}", err);
            return RunContext { run_id, events: None, trace: None };
        }
        let open = |name: &str| match File::create(run_dir.join(name)) {
            Ok(f) => Some(Mutex::new(BufWriter::new(f))),
            Err(err) => {
                eprintln!("[log] failed to create {}: {}", name, err);
                None
            }
        };
        RunContext {
            events: open("events.jsonl"),
            trace: open("trace.jsonl"),
            run_id,
        }
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["agent_id", "action_id", "action_kind", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Option<Mutex<BufWriter<File>>>, line: &str) {
    if let Some(writer) = writer {
        if let Ok(mut w) = writer.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    match level {
        Level::Trace | Level::Debug => write_line(&ctx.trace, &line),
        _ => write_line(&ctx.events, &line),
    }
    eprintln!("{}", line);
}

// =============================================================================
// Trust
// =============================================================================

pub fn log_token(action_id: &str, value: f64, timing_factor: f64, trust: f64, phase: &str) {
    log(
        Level::Debug,
        Domain::Trust,
        "token",
        obj(&[
            ("action_id", v_str(action_id)),
            ("value", v_num(value)),
            ("timing_factor", v_num(timing_factor)),
            ("trust", v_num(trust)),
            ("phase", v_str(phase)),
        ]),
    );
}

pub fn log_phase_change(from: &str, to: &str, trust: f64, behaviors: usize) {
    log(
        Level::Info,
        Domain::Trust,
        "phase_change",
        obj(&[
            ("from", v_str(from)),
            ("to", v_str(to)),
            ("trust", v_num(trust)),
            ("behaviors", json!(behaviors)),
        ]),
    );
}

// =============================================================================
// Matrix
// =============================================================================

pub fn log_reinforce(action_id: &str, delta: f64, strength: f64, confidence: f64) {
    log(
        Level::Debug,
        Domain::Matrix,
        "reinforce",
        obj(&[
            ("action_id", v_str(action_id)),
            ("delta", v_num(delta)),
            ("strength", v_num(strength)),
            ("confidence", v_num(confidence)),
        ]),
    );
}

pub fn log_extinction(action_id: &str, idle_ms: u64) {
    log(
        Level::Info,
        Domain::Matrix,
        "extinguished",
        obj(&[("action_id", v_str(action_id)), ("idle_ms", json!(idle_ms))]),
    );
}

pub fn log_manifest(action_id: &str, probability: f64, draw: f64, manifested: bool) {
    log(
        Level::Debug,
        Domain::Matrix,
        "manifest",
        obj(&[
            ("action_id", v_str(action_id)),
            ("probability", v_num(probability)),
            ("draw", v_num(draw)),
            ("manifested", Value::Bool(manifested)),
        ]),
    );
}

// =============================================================================
// Economy
// =============================================================================

pub fn log_afford(action_kind: &str, cost: u64, balance: u64, result: &str, p_success: Option<f64>) {
    log(
        Level::Debug,
        Domain::Economy,
        "afford_check",
        obj(&[
            ("action_kind", v_str(action_kind)),
            ("cost", json!(cost)),
            ("balance", json!(balance)),
            ("result", v_str(result)),
            ("p_success", p_success.map(v_num).unwrap_or(Value::Null)),
        ]),
    );
}

pub fn log_transaction(kind: &str, action_kind: &str, amount: u64, balance_after: u64, tier: &str) {
    log(
        Level::Info,
        Domain::Economy,
        kind,
        obj(&[
            ("action_kind", v_str(action_kind)),
            ("amount", json!(amount)),
            ("balance_after", json!(balance_after)),
            ("tier", v_str(tier)),
        ]),
    );
}

pub fn log_escalation(failed_kind: &str, steps: &[&str], fallback: Option<&str>, balance: u64) {
    log(
        Level::Warn,
        Domain::Economy,
        "escalation",
        obj(&[
            ("action_kind", v_str(failed_kind)),
            ("steps", Value::Array(steps.iter().map(|s| v_str(s)).collect())),
            ("fallback", fallback.map(v_str).unwrap_or(Value::Null)),
            ("balance", json!(balance)),
        ]),
    );
}

// =============================================================================
// Audit
// =============================================================================

pub fn log_snapshot(agent_id: &str, state_hash: &str, behaviors: usize, balance: u64) {
    log(
        Level::Info,
        Domain::Audit,
        "snapshot",
        obj(&[
            ("agent_id", v_str(agent_id)),
            ("state_hash", v_str(state_hash)),
            ("behaviors", json!(behaviors)),
            ("balance", json!(balance)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}
