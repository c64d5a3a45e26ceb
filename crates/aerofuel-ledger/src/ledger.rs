//! # Fuel Ledger
//!
//! The public entry point. Every mutating call builds a request, declares
//! the tanks it touches and hands both to the [`Coordinator`]; reads go
//! straight to a pooled connection.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │ FuelLedger                                                             │
//! │                                                                        │
//! │  intake / consume / drain / transfer / reconcile / adjust              │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  OperationOptions { kind, tanks, actor, quantity }                     │
//! │        │                                                               │
//! │        ▼                                                               │
//! │  Coordinator::run ──► one SQLite transaction + audit rows              │
//! │                                                                        │
//! │  verify / list_* / get_tank ──► Database::acquire (no transaction)     │
//! │  register_tank / overrides  ──► short transaction, no audit            │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use aerofuel_core::consistency::{self, ConsistencyReport};
use aerofuel_core::validation::{
    validate_fuel_type, validate_positive_volume, validate_required, validate_tank_code,
};
use aerofuel_core::{
    Clock, ConsistencyOverride, CoreError, FuelLot, IdGenerator, LotTransfer, Mass, OperationKind,
    OperationLogEntry, RequestedQuantity, ReserveFuelRecord, SystemClock, Tank, TankKind,
    UuidGenerator, ValidationError, Volume,
};
use aerofuel_db::{
    AuditRepository, Database, LotRepository, OperationLogFilter, OverrideRepository,
    ReserveRepository, TankRepository, TransferRepository,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::coordinator::{load_snapshot, Coordinator, OperationOptions, RetryPolicy};
use crate::error::{ErrorKind, LedgerResult};
use crate::operations::{
    AdjustLot, AdjustmentResult, Consume, ConsumptionResult, Intake, IntakeResult, ReconcileExcess,
    ReconciliationResult, Transfer, TransferResult,
};

/// Actor recorded for reconciliations started by the sweep.
pub const SWEEPER_ACTOR: &str = "system:sweeper";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTank {
    pub code: String,
    pub kind: TankKind,
    pub fuel_type: String,
    pub capacity: Volume,
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stranded lots attempted, whatever the outcome.
    pub scanned: usize,
    /// At most `sweep_batch_size` per pass.
    pub reconciled: usize,
    /// No fixed-tank lot could take the orphan; retried next pass.
    pub unavailable: usize,
    pub failed: usize,
}

pub struct FuelLedger {
    db: Arc<Database>,
    coordinator: Coordinator,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    sweep_batch_size: usize,
}

impl FuelLedger {
    pub fn new(db: Arc<Database>, config: &LedgerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids: Arc<dyn IdGenerator> = Arc::new(UuidGenerator);
        FuelLedger {
            coordinator: Coordinator::new(db.clone(), clock.clone(), ids.clone(), config),
            db,
            clock,
            ids,
            sweep_batch_size: config.reconciliation.sweep_batch_size,
        }
    }

    /// Validates `config`, connects and migrates the database.
    pub async fn open(config: &LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let db = Database::new(config.database.db_config()?).await?;
        Ok(Self::new(Arc::new(db), config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.coordinator = self.coordinator.with_clock(clock.clone());
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.coordinator = self.coordinator.with_ids(ids.clone());
        self.ids = ids;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.coordinator = self.coordinator.with_retry_policy(retry);
        self
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    // =========================================================================
    // Tanks
    // =========================================================================

    pub async fn register_tank(&self, request: RegisterTank) -> LedgerResult<Tank> {
        validate_tank_code(&request.code)?;
        validate_fuel_type(&request.fuel_type)?;
        validate_positive_volume("capacity", request.capacity)?;

        let now = self.clock.now();
        let tank = Tank {
            id: self.ids.next_id(),
            code: request.code.trim().to_string(),
            kind: request.kind,
            fuel_type: request.fuel_type.trim().to_string(),
            capacity: request.capacity,
            declared_mass: Mass::zero(),
            declared_volume: Volume::zero(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.db.begin().await?;
        {
            let mut tanks = TankRepository::new(&mut *tx);
            if tanks.get_by_code(&tank.code).await?.is_some() {
                return Err(ValidationError::Duplicate {
                    field: "code".to_string(),
                    value: tank.code,
                }
                .into());
            }
            tanks.insert(&tank).await?;
        }
        tx.commit().await?;

        info!(tank_id = %tank.id, code = %tank.code, kind = %tank.kind, "Tank registered");
        Ok(tank)
    }

    pub async fn get_tank(&self, tank_id: &str) -> LedgerResult<Tank> {
        let mut conn = self.db.acquire().await?;
        TankRepository::new(&mut conn)
            .get(tank_id)
            .await?
            .ok_or_else(|| CoreError::TankNotFound(tank_id.to_string()).into())
    }

    pub async fn list_tanks(&self) -> LedgerResult<Vec<Tank>> {
        let mut conn = self.db.acquire().await?;
        Ok(TankRepository::new(&mut conn).list().await?)
    }

    // =========================================================================
    // Fuel Operations
    // =========================================================================

    pub async fn intake(&self, request: Intake, actor: &str) -> LedgerResult<IntakeResult> {
        let options = OperationOptions::new(OperationKind::Intake, actor)
            .tank(&request.tank_id)
            .quantity(request.mass, request.volume)
            .declaration_ref(&request.declaration_ref);
        self.coordinator.run(options, &request).await
    }

    pub async fn consume(&self, request: Consume, actor: &str) -> LedgerResult<ConsumptionResult> {
        self.withdraw(OperationKind::Consumption, request, actor).await
    }

    /// Quality or defuel drain, by volume.
    pub async fn drain(&self, tank_id: &str, volume: Volume, actor: &str) -> LedgerResult<ConsumptionResult> {
        let request = Consume {
            tank_id: tank_id.to_string(),
            quantity: RequestedQuantity::Volume(volume),
            allow_partial: false,
        };
        self.withdraw(OperationKind::Drain, request, actor).await
    }

    async fn withdraw(
        &self,
        kind: OperationKind,
        request: Consume,
        actor: &str,
    ) -> LedgerResult<ConsumptionResult> {
        let (mass, volume) = split(request.quantity);
        let options = OperationOptions::new(kind, actor)
            .tank(&request.tank_id)
            .quantity(mass, volume);
        self.coordinator.run(options, &request).await
    }

    pub async fn transfer_between_tanks(&self, request: Transfer, actor: &str) -> LedgerResult<TransferResult> {
        let (mass, volume) = split(request.quantity);
        let mut options = OperationOptions::new(OperationKind::Transfer, actor)
            .tank(&request.source_tank_id)
            .quantity(mass, volume);
        if request.target_tank_id != request.source_tank_id {
            options = options.tank(&request.target_tank_id);
        }
        self.coordinator.run(options, &request).await
    }

    pub async fn reconcile_excess(
        &self,
        mobile_tank_id: &str,
        orphaned_volume: Volume,
        source_lot_id: &str,
        actor: &str,
    ) -> LedgerResult<ReconciliationResult> {
        let request = ReconcileExcess {
            mobile_tank_id: mobile_tank_id.to_string(),
            source_lot_id: source_lot_id.to_string(),
            orphaned_volume,
            note: None,
        };
        self.run_reconciliation(request, actor).await
    }

    async fn run_reconciliation(
        &self,
        request: ReconcileExcess,
        actor: &str,
    ) -> LedgerResult<ReconciliationResult> {
        let options = OperationOptions::new(OperationKind::Reconciliation, actor)
            .tank(&request.mobile_tank_id)
            .quantity(Mass::zero(), request.orphaned_volume);
        self.coordinator.run(options, &request).await
    }

    pub async fn adjust_lot(&self, request: AdjustLot, actor: &str) -> LedgerResult<AdjustmentResult> {
        let tank_id = {
            let mut conn = self.db.acquire().await?;
            LotRepository::new(&mut conn)
                .get(&request.lot_id)
                .await?
                .ok_or_else(|| CoreError::LotNotFound(request.lot_id.clone()))?
                .tank_id
        };
        let options = OperationOptions::new(OperationKind::Adjustment, actor)
            .tank(tank_id)
            .quantity(request.remaining_mass, request.remaining_volume);
        self.coordinator.run(options, &request).await
    }

    // =========================================================================
    // Consistency
    // =========================================================================

    pub async fn verify_consistency(&self, tank_id: &str) -> LedgerResult<ConsistencyReport> {
        let mut conn = self.db.acquire().await?;
        let snapshot = load_snapshot(&mut conn, tank_id).await?;
        Ok(consistency::verify(&snapshot))
    }

    /// Lets `kind` operations on `tank_id` pass a failed pre-check until
    /// `ttl` from now.
    pub async fn grant_consistency_override(
        &self,
        tank_id: &str,
        kind: OperationKind,
        ttl: chrono::Duration,
        granted_by: &str,
        reason: &str,
    ) -> LedgerResult<ConsistencyOverride> {
        validate_required("granted_by", granted_by)?;
        validate_required("reason", reason)?;
        if ttl <= chrono::Duration::zero() {
            return Err(ValidationError::MustBePositive {
                field: "ttl".to_string(),
            }
            .into());
        }

        let now = self.clock.now();
        let grant = ConsistencyOverride {
            id: self.ids.next_id(),
            tank_id: tank_id.to_string(),
            kind,
            granted_by: granted_by.to_string(),
            reason: reason.to_string(),
            expires_at: now + ttl,
            created_at: now,
        };

        let mut tx = self.db.begin().await?;
        TankRepository::new(&mut *tx)
            .get(tank_id)
            .await?
            .ok_or_else(|| CoreError::TankNotFound(tank_id.to_string()))?;
        OverrideRepository::new(&mut *tx).insert(&grant).await?;
        tx.commit().await?;

        warn!(
            tank_id = %tank_id,
            kind = %kind,
            granted_by = %granted_by,
            expires_at = %grant.expires_at,
            reason = %reason,
            "Consistency override granted"
        );
        Ok(grant)
    }

    /// Expires every active override on a tank. Returns how many were active.
    pub async fn revoke_consistency_overrides(&self, tank_id: &str) -> LedgerResult<u64> {
        let now = self.clock.now();
        let mut tx = self.db.begin().await?;
        let revoked = OverrideRepository::new(&mut *tx).revoke_for_tank(tank_id, now).await?;
        tx.commit().await?;

        info!(tank_id = %tank_id, revoked, "Consistency overrides revoked");
        Ok(revoked)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn list_operation_log(&self, filter: &OperationLogFilter) -> LedgerResult<Vec<OperationLogEntry>> {
        let mut conn = self.db.acquire().await?;
        Ok(AuditRepository::new(&mut conn).list(filter).await?)
    }

    pub async fn list_reserve_records(&self, tank_id: &str) -> LedgerResult<Vec<ReserveFuelRecord>> {
        let mut conn = self.db.acquire().await?;
        Ok(ReserveRepository::new(&mut conn).list_for_tank(tank_id).await?)
    }

    /// Declaration links written by one operation (transfer or reconciliation).
    pub async fn list_lot_transfers(&self, correlation_id: &str) -> LedgerResult<Vec<LotTransfer>> {
        let mut conn = self.db.acquire().await?;
        Ok(TransferRepository::new(&mut conn)
            .list_by_correlation(correlation_id)
            .await?)
    }

    /// Lots still holding mass, oldest first.
    pub async fn list_active_lots(&self, tank_id: &str) -> LedgerResult<Vec<FuelLot>> {
        let mut conn = self.db.acquire().await?;
        Ok(LotRepository::new(&mut conn).list_active(tank_id).await?)
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Reconciles stranded volume in mobile tanks, one transaction per lot.
    ///
    /// Walks stranded lots oldest first, page by page, until
    /// `sweep_batch_size` lots were reconciled or none are left. Lots that
    /// cannot be reconciled are stepped over, so a backlog of them never
    /// hides newer orphans.
    pub async fn sweep_orphans(&self) -> LedgerResult<SweepReport> {
        let mut report = SweepReport::default();
        let mut cursor: Option<FuelLot> = None;

        'pages: while report.reconciled < self.sweep_batch_size {
            let page = {
                let mut conn = self.db.acquire().await?;
                LotRepository::new(&mut conn)
                    .list_stranded_in_mobile(cursor.as_ref(), self.sweep_batch_size)
                    .await?
            };
            let last_page = page.len() < self.sweep_batch_size;
            cursor = page.last().cloned();

            for lot in page {
                if report.reconciled >= self.sweep_batch_size {
                    break 'pages;
                }
                report.scanned += 1;

                let request = ReconcileExcess {
                    mobile_tank_id: lot.tank_id.clone(),
                    source_lot_id: lot.id.clone(),
                    orphaned_volume: lot.remaining_volume,
                    note: Some("periodic sweep".to_string()),
                };
                match self.run_reconciliation(request, SWEEPER_ACTOR).await {
                    Ok(_) => report.reconciled += 1,
                    Err(err) if err.kind() == ErrorKind::ReconciliationUnavailable => {
                        report.unavailable += 1;
                    }
                    Err(err) => {
                        warn!(lot_id = %lot.id, tank_id = %lot.tank_id, error = %err, "Sweep could not reconcile lot");
                        report.failed += 1;
                    }
                }
            }

            if last_page {
                break;
            }
        }

        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                reconciled = report.reconciled,
                unavailable = report.unavailable,
                failed = report.failed,
                "Orphan sweep finished"
            );
        }
        Ok(report)
    }
}

fn split(quantity: RequestedQuantity) -> (Mass, Volume) {
    match quantity {
        RequestedQuantity::Mass(mass) => (mass, Volume::zero()),
        RequestedQuantity::Volume(volume) => (Mass::zero(), volume),
    }
}
