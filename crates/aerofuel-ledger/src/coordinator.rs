//! # Transaction Coordinator
//!
//! Wraps every fuel operation in one SQLite transaction, checks consistency
//! around it, retries on write conflicts and writes the audit trail.
//!
//! ## State Machine (per attempt)
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Start ──► PreCheck ──► Execute ──► PostCheck ──► Commit ──► Log ──► Done│
//! │    ▲  snapshot   │ verify     │ run op      │ verify     │ audit rows   │
//! │    │  tanks      │ (override?)│             │ (warn only)│ + COMMIT     │
//! │    │             │            │             │            │              │
//! │    │             └────────────┴──── conflict┴────────────┘              │
//! │    │                               │                                    │
//! │    │                  retries left?├── yes ──► Retrying                 │
//! │    │                               │            │ sleep 100ms × 2^n ±25%│
//! │    └───────────────────────────────┼────────────┘                       │
//! │                                    └── no ───► Failed                   │
//! │  any other error ─────────────────────────────► Failed                  │
//! │                                                  │                      │
//! │                       fresh transaction: one audit row per tank,        │
//! │                       success = false, before = after = pre-snapshot    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Success rows are inserted inside the operation's own transaction right
//! before COMMIT, so a committed change never lacks its audit rows.
//!
//! An attempt never touches the pool while it holds its transaction; the
//! in-memory database has exactly one connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use aerofuel_core::consistency;
use aerofuel_core::{
    Clock, CoreError, DensityBand, IdGenerator, Mass, OperationKind, OperationLogEntry,
    TankSnapshot, Volume,
};
use aerofuel_db::{AuditRepository, Database, LotRepository, OverrideRepository, TankRepository};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

// =============================================================================
// Phases
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    PreCheck,
    Execute,
    PostCheck,
    Commit,
    Log,
    Retrying,
    Failed,
    Done,
}

/// How a phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Lock conflict. The whole attempt may be run again.
    Conflict,
    Fatal,
}

impl StepOutcome {
    pub fn of(err: &LedgerError) -> Self {
        if err.is_conflict() {
            StepOutcome::Conflict
        } else {
            StepOutcome::Fatal
        }
    }
}

impl Phase {
    /// The phase that follows `self` given how it ended.
    pub fn next(self, outcome: StepOutcome, retries_left: bool) -> Phase {
        use Phase::*;

        match (self, outcome) {
            (Done, _) | (Failed, _) => self,
            (Retrying, _) => Start,
            (Log, _) => Done,
            (_, StepOutcome::Fatal) => Failed,
            (_, StepOutcome::Conflict) if retries_left => Retrying,
            (_, StepOutcome::Conflict) => Failed,
            (Start, StepOutcome::Completed) => PreCheck,
            (PreCheck, StepOutcome::Completed) => Execute,
            (Execute, StepOutcome::Completed) => PostCheck,
            (PostCheck, StepOutcome::Completed) => Commit,
            (Commit, StepOutcome::Completed) => Log,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

// =============================================================================
// Retry Policy
// =============================================================================

/// Conflict retry budget and delays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base: Duration,
    pub max_interval: Duration,
    /// ±fraction applied to every delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            base: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LedgerConfig) -> Self {
        RetryPolicy {
            max_retries: config.coordinator.max_retries,
            base: Duration::from_millis(config.coordinator.base_backoff_ms),
            max_interval: Duration::from_millis(config.coordinator.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Delay sequence `base × 2^n`, randomized by ±`jitter`.
    pub fn backoff(&self) -> ExponentialBackoff {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.base,
            current_interval: self.base,
            randomization_factor: self.jitter,
            multiplier: 2.0,
            max_interval: self.max_interval,
            max_elapsed_time: None,
            ..Default::default()
        };
        backoff.reset();
        backoff
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

// =============================================================================
// Options & Context
// =============================================================================

/// What the coordinator needs to know before running an operation.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    pub kind: OperationKind,
    /// Tanks snapshotted, pre-checked and logged.
    pub tank_ids: Vec<String>,
    pub actor: String,
    /// Quantities logged when the operation records no movement of its own
    /// (failures, mostly).
    pub mass: Mass,
    pub volume: Volume,
    pub declaration_ref: Option<String>,
    pub skip_consistency_check: bool,
    /// Overrides the coordinator's retry budget.
    pub max_retries: Option<u32>,
}

impl OperationOptions {
    pub fn new(kind: OperationKind, actor: impl Into<String>) -> Self {
        OperationOptions {
            kind,
            tank_ids: Vec::new(),
            actor: actor.into(),
            mass: Mass::zero(),
            volume: Volume::zero(),
            declaration_ref: None,
            skip_consistency_check: false,
            max_retries: None,
        }
    }

    pub fn tank(mut self, tank_id: impl Into<String>) -> Self {
        let tank_id = tank_id.into();
        if !self.tank_ids.contains(&tank_id) {
            self.tank_ids.push(tank_id);
        }
        self
    }

    pub fn quantity(mut self, mass: Mass, volume: Volume) -> Self {
        self.mass = mass;
        self.volume = volume;
        self
    }

    pub fn declaration_ref(mut self, declaration_ref: impl Into<String>) -> Self {
        self.declaration_ref = Some(declaration_ref.into());
        self
    }

    pub fn skip_consistency_check(mut self, skip: bool) -> Self {
        self.skip_consistency_check = skip;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Quantity an operation moved in or out of one tank, for its audit row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Movement {
    pub mass: Mass,
    pub volume: Volume,
    pub declaration_ref: Option<String>,
    pub counterpart_tank_id: Option<String>,
}

/// Per-operation state shared between the coordinator and the operation.
pub struct OperationContext {
    correlation_id: String,
    kind: OperationKind,
    actor: String,
    now: DateTime<Utc>,
    phase: Phase,
    ids: Arc<dyn IdGenerator>,
    density_band: DensityBand,
    inline_reconciliation: bool,
    /// Pre-operation snapshots, declared tanks first, then enlisted ones.
    before: Vec<TankSnapshot>,
    movements: HashMap<String, Movement>,
}

impl OperationContext {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Clock reading taken when the current attempt started.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    pub fn density_band(&self) -> &DensityBand {
        &self.density_band
    }

    pub fn inline_reconciliation(&self) -> bool {
        self.inline_reconciliation
    }

    /// Snapshots `tank_id` unless it is already part of the operation.
    ///
    /// Must be called before the operation's first write to that tank.
    pub async fn enlist(&mut self, conn: &mut SqliteConnection, tank_id: &str) -> LedgerResult<()> {
        if self.is_enlisted(tank_id) {
            return Ok(());
        }
        let snapshot = load_snapshot(conn, tank_id).await?;
        debug!(correlation_id = %self.correlation_id, tank_id = %tank_id, "Enlisted tank");
        self.before.push(snapshot);
        Ok(())
    }

    pub fn is_enlisted(&self, tank_id: &str) -> bool {
        self.before.iter().any(|s| s.tank.id == tank_id)
    }

    pub fn before(&self, tank_id: &str) -> Option<&TankSnapshot> {
        self.before.iter().find(|s| s.tank.id == tank_id)
    }

    /// Adds to the movement logged for `tank_id`.
    pub fn record(&mut self, tank_id: &str, movement: Movement) {
        let entry = self.movements.entry(tank_id.to_string()).or_default();
        entry.mass += movement.mass;
        entry.volume += movement.volume;
        if entry.declaration_ref.is_none() {
            entry.declaration_ref = movement.declaration_ref;
        }
        if entry.counterpart_tank_id.is_none() {
            entry.counterpart_tank_id = movement.counterpart_tank_id;
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(correlation_id = %self.correlation_id, from = ?self.phase, to = ?phase, "Phase");
        self.phase = phase;
    }

    fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.now = now;
        self.before.clear();
        self.movements.clear();
        self.phase = Phase::Start;
    }

    fn tank_ids(&self) -> Vec<String> {
        self.before.iter().map(|s| s.tank.id.clone()).collect()
    }

    fn entry(
        &self,
        options: &OperationOptions,
        tank_id: &str,
        before: Option<TankSnapshot>,
        after: Option<TankSnapshot>,
        error_message: Option<String>,
    ) -> OperationLogEntry {
        let movement = self.movements.get(tank_id);
        OperationLogEntry {
            id: self.ids.next_id(),
            correlation_id: self.correlation_id.clone(),
            kind: self.kind,
            tank_id: tank_id.to_string(),
            counterpart_tank_id: movement.and_then(|m| m.counterpart_tank_id.clone()),
            declaration_ref: movement
                .and_then(|m| m.declaration_ref.clone())
                .or_else(|| options.declaration_ref.clone()),
            mass: movement.map(|m| m.mass).unwrap_or(options.mass),
            volume: movement.map(|m| m.volume).unwrap_or(options.volume),
            before,
            after,
            actor: self.actor.clone(),
            success: error_message.is_none(),
            error_message,
            created_at: self.now,
        }
    }
}

/// Reads a tank and all of its lots.
pub(crate) async fn load_snapshot(conn: &mut SqliteConnection, tank_id: &str) -> LedgerResult<TankSnapshot> {
    let tank = TankRepository::new(&mut *conn)
        .get(tank_id)
        .await?
        .ok_or_else(|| CoreError::TankNotFound(tank_id.to_string()))?;
    let lots = LotRepository::new(&mut *conn).list_for_tank(tank_id).await?;
    Ok(TankSnapshot { tank, lots })
}

// =============================================================================
// Operation Trait
// =============================================================================

/// A unit of work the coordinator can run.
///
/// `execute` may be called more than once (conflict retries), each time on a
/// fresh transaction and a reset context.
pub trait FuelOperation: Send + Sync {
    type Output: Send;

    fn execute(
        &self,
        conn: &mut SqliteConnection,
        ctx: &mut OperationContext,
    ) -> impl Future<Output = LedgerResult<Self::Output>> + Send;
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct Coordinator {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry: RetryPolicy,
    statement_timeout: Duration,
    density_band: DensityBand,
    inline_reconciliation: bool,
}

impl Coordinator {
    pub fn new(
        db: Arc<Database>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: &LedgerConfig,
    ) -> Self {
        Coordinator {
            db,
            clock,
            ids,
            retry: RetryPolicy::from_config(config),
            statement_timeout: config.statement_timeout(),
            density_band: config.density,
            inline_reconciliation: config.reconciliation.inline,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs `op` to completion or failure.
    pub async fn run<O: FuelOperation>(&self, options: OperationOptions, op: &O) -> LedgerResult<O::Output> {
        let retry = RetryPolicy {
            max_retries: options.max_retries.unwrap_or(self.retry.max_retries),
            ..self.retry
        };
        let mut backoff = retry.backoff();
        let mut ctx = OperationContext {
            correlation_id: self.ids.next_id(),
            kind: options.kind,
            actor: options.actor.clone(),
            now: self.clock.now(),
            phase: Phase::Start,
            ids: self.ids.clone(),
            density_band: self.density_band,
            inline_reconciliation: self.inline_reconciliation,
            before: Vec::new(),
            movements: HashMap::new(),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            ctx.begin_attempt(self.clock.now());

            let result = match tokio::time::timeout(self.statement_timeout, self.attempt(&options, op, &mut ctx)).await {
                Ok(result) => result,
                Err(_) => Err(LedgerError::Timeout(self.statement_timeout)),
            };

            let err = match result {
                Ok(output) => {
                    ctx.enter(Phase::Log);
                    info!(
                        correlation_id = %ctx.correlation_id,
                        kind = %ctx.kind,
                        tanks = ?ctx.tank_ids(),
                        attempt,
                        "Operation committed"
                    );
                    ctx.enter(Phase::Done);
                    return Ok(output);
                }
                Err(err) => err,
            };

            let next = ctx
                .phase
                .next(StepOutcome::of(&err), retry.allows_retry_after(attempt));
            if next == Phase::Retrying {
                let delay = backoff.next_backoff().unwrap_or(retry.max_interval);
                warn!(
                    correlation_id = %ctx.correlation_id,
                    kind = %ctx.kind,
                    phase = ?ctx.phase,
                    attempt,
                    ?delay,
                    error = %err,
                    "Write conflict, retrying"
                );
                ctx.enter(Phase::Retrying);
                tokio::time::sleep(delay).await;
                continue;
            }

            let err = if err.is_conflict() {
                LedgerError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                }
            } else {
                err
            };
            error!(
                correlation_id = %ctx.correlation_id,
                kind = %ctx.kind,
                phase = ?ctx.phase,
                attempt,
                error = %err,
                "Operation failed"
            );
            ctx.enter(Phase::Failed);
            self.log_failure(&options, &ctx, &err).await;
            return Err(err);
        }
    }

    /// One attempt on its own transaction. Dropping the transaction on any
    /// error path rolls it back.
    async fn attempt<O: FuelOperation>(
        &self,
        options: &OperationOptions,
        op: &O,
        ctx: &mut OperationContext,
    ) -> LedgerResult<O::Output> {
        ctx.enter(Phase::Start);
        let mut tx = self.db.begin().await?;
        for tank_id in &options.tank_ids {
            ctx.enlist(&mut *tx, tank_id).await?;
        }

        ctx.enter(Phase::PreCheck);
        if options.skip_consistency_check {
            debug!(correlation_id = %ctx.correlation_id, "Consistency pre-check skipped");
        } else {
            self.pre_check(&mut *tx, ctx).await?;
        }

        ctx.enter(Phase::Execute);
        let output = op.execute(&mut *tx, ctx).await?;

        ctx.enter(Phase::PostCheck);
        let mut after = self.post_check(&mut *tx, ctx).await?;

        ctx.enter(Phase::Commit);
        {
            let mut audit = AuditRepository::new(&mut *tx);
            for tank_id in ctx.tank_ids() {
                let before = ctx.before(&tank_id).cloned();
                let entry = ctx.entry(options, &tank_id, before, after.remove(&tank_id), None);
                audit.insert(&entry).await?;
            }
        }
        tx.commit().await?;

        Ok(output)
    }

    /// Verifies every declared tank. An inconsistent tank aborts the attempt
    /// unless an active override covers it.
    async fn pre_check(&self, conn: &mut SqliteConnection, ctx: &OperationContext) -> LedgerResult<()> {
        for snapshot in &ctx.before {
            let report = consistency::verify(snapshot);
            if report.is_consistent {
                continue;
            }

            let grant = OverrideRepository::new(&mut *conn)
                .find_active(&snapshot.tank.id, ctx.kind, ctx.now)
                .await?;
            match grant {
                Some(grant) => warn!(
                    correlation_id = %ctx.correlation_id,
                    tank_id = %snapshot.tank.id,
                    difference = %report.difference,
                    tolerance = %report.tolerance,
                    granted_by = %grant.granted_by,
                    "Tank inconsistent, proceeding under override"
                ),
                None => return Err(report.to_violation().into()),
            }
        }
        Ok(())
    }

    /// Re-reads every involved tank. Inconsistencies are logged, never fatal.
    async fn post_check(
        &self,
        conn: &mut SqliteConnection,
        ctx: &OperationContext,
    ) -> LedgerResult<HashMap<String, TankSnapshot>> {
        let mut after = HashMap::new();
        for tank_id in ctx.tank_ids() {
            let snapshot = load_snapshot(conn, &tank_id).await?;
            let report = consistency::verify(&snapshot);
            if !report.is_consistent {
                warn!(
                    correlation_id = %ctx.correlation_id,
                    tank_id = %tank_id,
                    declared = %report.declared_total,
                    lot_sum = %report.lot_sum,
                    tolerance = %report.tolerance,
                    "Tank inconsistent after operation"
                );
            }
            after.insert(tank_id, snapshot);
        }
        Ok(after)
    }

    /// Writes one failed entry per tank in a fresh transaction. Best effort:
    /// a failure here is logged and the original error still returned.
    async fn log_failure(&self, options: &OperationOptions, ctx: &OperationContext, err: &LedgerError) {
        let mut tank_ids = options.tank_ids.clone();
        for tank_id in ctx.tank_ids() {
            if !tank_ids.contains(&tank_id) {
                tank_ids.push(tank_id);
            }
        }

        let result: LedgerResult<()> = async {
            let mut tx = self.db.begin().await?;
            {
                let mut audit = AuditRepository::new(&mut *tx);
                for tank_id in &tank_ids {
                    let before = ctx.before(tank_id).cloned();
                    let entry = ctx.entry(options, tank_id, before.clone(), before, Some(err.to_string()));
                    audit.insert(&entry).await?;
                }
            }
            tx.commit().await?;
            Ok(())
        }
        .await;

        if let Err(audit_err) = result {
            error!(
                correlation_id = %ctx.correlation_id,
                error = %audit_err,
                "Failed to write failure audit entries"
            );
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
