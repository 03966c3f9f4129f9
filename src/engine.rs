//! Engine facade.
//!
//! One `Engine` per companion. It owns the trust state, the behavior matrix
//! and the resource account exclusively and is the only surface external
//! collaborators address:
//!
//! ```text
//! TokenEvent ──► TrustController ──► BehaviorMatrix
//!                                         │ success rates (read-only)
//! price/spend ────────────────────► ResourceAccount ──► Decision
//! ```
//!
//! Every method takes `&mut self` and runs to completion, so a single engine
//! is a single logical writer. Hosts with several event sources wrap it in
//! [`crate::shared::SharedEngine`].

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::EngineConfig;
use crate::economy::{Assessment, Decision, Denied, EscalationReport, ResourceAccount};
use crate::logging::{log, log_snapshot, obj, v_str, Domain, Level};
use crate::matrix::{BehaviorMatrix, ManifestContext, ManifestDecision, SweepReport};
use crate::mood::MoodHint;
use crate::schedule::{Schedule, TimerKind};
use crate::snapshot::{EngineSnapshot, SnapshotError, Telemetry, SNAPSHOT_VERSION};
use crate::trust::{TokenEvent, TrustController, TrustState, TrustUpdateResult};

/// What the collaborator observed about a paid attempt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    /// 0..1; above the efficiency threshold the reward gets a bonus
    pub efficiency: Option<f64>,
    /// Explicit reward, overriding the reward table
    pub reward: Option<u64>,
    /// Reward-table key, "success" when absent
    pub outcome_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutcomeReport {
    Earned { amount: u64, balance: u64 },
    Escalated(EscalationReport),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub fired: Vec<TimerKind>,
    pub sweep: Option<SweepReport>,
    pub training_ended: bool,
}

pub struct Engine {
    cfg: EngineConfig,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    trust: TrustController,
    matrix: BehaviorMatrix,
    account: ResourceAccount,
    schedule: Schedule,
    training_active: bool,
    telemetry: Telemetry,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match cfg.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut engine = Self {
            trust: TrustController::new(cfg.trust.clone()),
            matrix: BehaviorMatrix::new(cfg.matrix.clone()),
            account: ResourceAccount::new(cfg.economy.clone()),
            schedule: Schedule::default(),
            training_active: false,
            telemetry: Telemetry::default(),
            rng,
            clock,
            cfg,
        };
        engine.arm_sweep();
        log(
            Level::Info,
            Domain::Engine,
            "started",
            obj(&[
                ("agent_id", v_str(&engine.cfg.agent_id)),
                ("balance", serde_json::json!(engine.account.balance())),
            ]),
        );
        engine
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn trust_state(&self) -> &TrustState {
        self.trust.state()
    }

    pub fn matrix(&self) -> &BehaviorMatrix {
        &self.matrix
    }

    pub fn account(&self) -> &ResourceAccount {
        &self.account
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn training_active(&self) -> bool {
        self.training_active
    }

    pub fn set_instinct(&mut self, action_id: &str, base_reliability: f64) {
        self.matrix.set_instinct(action_id, base_reliability);
    }

    // -------------------------------------------------------------------------
    // Learning
    // -------------------------------------------------------------------------

    pub fn submit_token(&mut self, token: TokenEvent) -> TrustUpdateResult {
        self.telemetry.tokens += 1;
        if self.training_active {
            let at = token
                .timestamp
                .max(self.now())
                .saturating_add(self.cfg.timers.training_timeout_ms);
            self.schedule.arm(TimerKind::TrainingTimeout, at);
        }
        self.trust.ingest(&token, &mut self.matrix)
    }

    /// Draw once against the action's manifestation probability.
    pub fn query_manifestation(&mut self, action_id: &str, ctx: ManifestContext) -> ManifestDecision {
        let now = self.now();
        self.telemetry.manifestation_queries += 1;
        let decision = self.matrix.should_manifest(action_id, ctx, &mut self.rng, now);
        if decision.will_manifest {
            self.telemetry.manifestations += 1;
        }
        decision
    }

    /// Probability only, no draw and no manifestation bookkeeping.
    pub fn manifestation_probability(&mut self, action_id: &str, ctx: ManifestContext) -> f64 {
        let now = self.now();
        self.matrix.probability(action_id, ctx, now)
    }

    // -------------------------------------------------------------------------
    // Economy
    // -------------------------------------------------------------------------

    pub fn price_action(&self, action_kind: &str) -> Decision {
        self.account.can_afford(action_kind, None, &self.matrix)
    }

    pub fn assess_action(&self, action_kind: &str, explicit_cost: Option<u64>) -> Assessment {
        self.account.assess(action_kind, explicit_cost, &self.matrix)
    }

    pub fn spend_action(
        &mut self,
        action_kind: &str,
        explicit_cost: Option<u64>,
        metadata: Value,
    ) -> Result<u64, Denied> {
        let now = self.now();
        let result = self
            .account
            .spend(action_kind, explicit_cost, metadata, &self.matrix, now);
        match result {
            Ok(_) => self.telemetry.spends += 1,
            Err(_) => self.telemetry.denials += 1,
        }
        result
    }

    pub fn earn(&mut self, outcome_kind: &str, amount: Option<u64>, efficiency: Option<f64>) -> u64 {
        let now = self.now();
        self.telemetry.earnings += 1;
        self.account.earn(outcome_kind, amount, efficiency, now)
    }

    /// Report how a paid attempt turned out. Success credits the reward;
    /// failure runs the escalation ladder. Either way the outcome feeds the
    /// action's observed success rate.
    pub fn record_outcome(&mut self, action_kind: &str, success: bool, metrics: OutcomeMetrics) -> OutcomeReport {
        let now = self.now();
        self.matrix.observe_outcome(action_kind, success, now);
        if success {
            self.telemetry.earnings += 1;
            let before = self.account.balance();
            let kind = metrics.outcome_kind.as_deref().unwrap_or("success");
            let balance = self.account.earn(kind, metrics.reward, metrics.efficiency, now);
            OutcomeReport::Earned { amount: balance - before, balance }
        } else {
            self.telemetry.failures += 1;
            let report = self.account.escalate(action_kind, &self.matrix, now);
            self.telemetry.spends += report
                .steps
                .iter()
                .filter(|s| s.spent() > 0)
                .count() as u64;
            OutcomeReport::Escalated(report)
        }
    }

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------

    pub fn start_training(&mut self) {
        self.training_active = true;
        let at = self.now().saturating_add(self.cfg.timers.training_timeout_ms);
        self.schedule.arm(TimerKind::TrainingTimeout, at);
    }

    pub fn stop_training(&mut self) {
        self.training_active = false;
        self.schedule.training_timeout.cancel();
    }

    /// Fire every due deadline.
    pub fn tick(&mut self) -> TickReport {
        let now = self.now();
        let mut report = TickReport::default();
        for kind in self.schedule.due(now) {
            match kind {
                TimerKind::DecaySweep => {
                    self.telemetry.sweeps += 1;
                    report.sweep = Some(self.matrix.sweep(now));
                    self.arm_sweep();
                }
                TimerKind::TrainingTimeout => {
                    self.training_active = false;
                    report.training_ended = true;
                }
            }
            log(
                Level::Debug,
                Domain::Timer,
                "fired",
                obj(&[("timer", v_str(kind.as_str()))]),
            );
            report.fired.push(kind);
        }
        report
    }

    fn arm_sweep(&mut self) {
        let at = self.now().saturating_add(self.cfg.timers.sweep_interval_ms);
        self.schedule.arm(TimerKind::DecaySweep, at);
    }

    // -------------------------------------------------------------------------
    // Presentation hints
    // -------------------------------------------------------------------------

    pub fn mood(&self) -> MoodHint {
        let state = self.trust.state();
        MoodHint::new(state.phase, state.trust, self.account.strategy_tier())
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    pub fn export_snapshot(&self) -> Result<EngineSnapshot, SnapshotError> {
        let snapshot = EngineSnapshot {
            version: SNAPSHOT_VERSION,
            agent_id: self.cfg.agent_id.clone(),
            exported_at: self.now(),
            trust: self.trust.state().clone(),
            behaviors: self.matrix.records().clone(),
            sequences: self.matrix.sequences().clone(),
            instincts: self.matrix.instincts().clone(),
            account: self.account.clone(),
            schedule: self.schedule,
            training_active: self.training_active,
            telemetry: self.telemetry.clone(),
            state_hash: String::new(),
        }
        .seal()?;
        log_snapshot(
            &snapshot.agent_id,
            &snapshot.state_hash,
            snapshot.behaviors.len(),
            snapshot.account.balance(),
        );
        Ok(snapshot)
    }

    /// Reset, then bulk-load a previously exported snapshot. Instincts are
    /// replaced by the snapshot's. The engine is left untouched when the
    /// snapshot fails validation.
    pub fn load_snapshot(&mut self, snapshot: EngineSnapshot) -> Result<(), SnapshotError> {
        snapshot.validate()?;
        self.reset();
        self.matrix.clear_instincts();
        self.trust.restore(snapshot.trust);
        for (id, record) in snapshot.behaviors {
            self.matrix.insert_record(&id, record);
        }
        for (key, record) in snapshot.sequences {
            self.matrix.insert_sequence(&key, record);
        }
        for (id, instinct) in snapshot.instincts {
            self.matrix.set_instinct(&id, instinct.base_reliability);
        }
        self.account = snapshot.account;
        self.account.normalize();
        self.schedule = snapshot.schedule;
        if !self.schedule.decay_sweep.is_armed() {
            self.arm_sweep();
        }
        self.training_active = snapshot.training_active;
        self.telemetry = snapshot.telemetry;
        log(
            Level::Info,
            Domain::Engine,
            "snapshot_loaded",
            obj(&[("agent_id", v_str(&self.cfg.agent_id))]),
        );
        Ok(())
    }

    /// Forget everything learned and earned. Instincts are innate and stay.
    pub fn reset(&mut self) {
        self.schedule.cancel_all();
        self.trust.reset();
        self.matrix.clear();
        self.account.reset();
        self.training_active = false;
        self.telemetry = Telemetry::default();
        self.arm_sweep();
        log(
            Level::Info,
            Domain::Engine,
            "reset",
            obj(&[("agent_id", v_str(&self.cfg.agent_id))]),
        );
    }

    /// Cancel every pending deadline, then hand back the final state.
    pub fn shutdown(mut self) -> Result<EngineSnapshot, SnapshotError> {
        self.schedule.cancel_all();
        self.training_active = false;
        log(
            Level::Info,
            Domain::System,
            "shutdown",
            obj(&[("agent_id", v_str(&self.cfg.agent_id))]),
        );
        self.export_snapshot()
    }
}
