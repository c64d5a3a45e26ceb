//! End-to-end ledger scenarios against an in-memory store.

use std::sync::{Arc, Mutex};

use aerofuel_core::{
    Clock, Density, FuelLot, Mass, OperationKind, RequestedQuantity, Tank, TankKind, Volume,
};
use aerofuel_db::{Database, DbConfig, LotRepository, OperationLogFilter, TankRepository};
use aerofuel_ledger::operations::{AdjustLot, Consume, Intake, Transfer};
use aerofuel_ledger::{
    ErrorKind, FuelLedger, LedgerConfig, OrphanSweeper, RegisterTank, RetryPolicy, SweepReport,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// =============================================================================
// Fixtures
// =============================================================================

struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap()
}

fn kg(value: Decimal) -> Mass {
    Mass::new(value)
}

fn litres(value: Decimal) -> Volume {
    Volume::new(value)
}

async fn ledger_with(config: LedgerConfig) -> (FuelLedger, Arc<TestClock>) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let clock = Arc::new(TestClock(Mutex::new(t0())));
    let ledger = FuelLedger::new(Arc::new(db), &config).with_clock(clock.clone());
    (ledger, clock)
}

async fn ledger() -> (FuelLedger, Arc<TestClock>) {
    ledger_with(LedgerConfig::default()).await
}

async fn tank(ledger: &FuelLedger, code: &str, kind: TankKind) -> Tank {
    ledger
        .register_tank(RegisterTank {
            code: code.to_string(),
            kind,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(50_000),
        })
        .await
        .unwrap()
}

async fn receive(
    ledger: &FuelLedger,
    tank: &Tank,
    declaration_ref: &str,
    mass: Mass,
    volume: Volume,
    days_ago: i64,
) -> FuelLot {
    ledger
        .intake(
            Intake {
                tank_id: tank.id.clone(),
                declaration_ref: declaration_ref.to_string(),
                mass,
                volume,
                density: Density::new(dec!(0.8)),
                received_at: Some(t0() - Duration::days(days_ago)),
                source_intake_id: None,
            },
            "ops:test",
        )
        .await
        .unwrap()
        .lot
}

fn consume(tank: &Tank, quantity: RequestedQuantity) -> Consume {
    Consume {
        tank_id: tank.id.clone(),
        quantity,
        allow_partial: false,
    }
}

async fn lot(ledger: &FuelLedger, lot_id: &str) -> FuelLot {
    let mut conn = ledger.database().acquire().await.unwrap();
    LotRepository::new(&mut conn).require(lot_id).await.unwrap()
}

async fn all_lots(ledger: &FuelLedger, tank: &Tank) -> Vec<FuelLot> {
    let mut conn = ledger.database().acquire().await.unwrap();
    LotRepository::new(&mut conn).list_for_tank(&tank.id).await.unwrap()
}

/// Mass and volume held by lots across `tanks`, plus reserved volume.
async fn system_totals(ledger: &FuelLedger, tanks: &[&Tank]) -> (Mass, Volume, Volume) {
    let mut mass = Mass::zero();
    let mut volume = Volume::zero();
    let mut reserved = Volume::zero();
    for tank in tanks {
        for lot in all_lots(ledger, tank).await {
            mass += lot.remaining_mass;
            volume += lot.remaining_volume;
        }
        for record in ledger.list_reserve_records(&tank.id).await.unwrap() {
            reserved += record.volume;
        }
    }
    (mass, volume, reserved)
}

/// Fixed tank with one old lot and a truck whose oldest lot has been dipped
/// down to 12 L of volume and no mass.
async fn stranded_truck(ledger: &FuelLedger) -> (Tank, Tank, FuelLot, FuelLot, FuelLot) {
    let fixed = tank(ledger, "FT-01", TankKind::Fixed).await;
    let truck = tank(ledger, "TRK-7", TankKind::Mobile).await;

    let fixed_lot = receive(ledger, &fixed, "MRN-F", Mass::from_whole(8000), Volume::from_whole(10_000), 10).await;
    let stranded = receive(ledger, &truck, "MRN-M1", Mass::from_whole(100), Volume::from_whole(125), 2).await;
    let newer = receive(ledger, &truck, "MRN-M2", Mass::from_whole(800), Volume::from_whole(1000), 1).await;

    strand(ledger, &stranded, Volume::from_whole(12)).await;

    (fixed, truck, fixed_lot, stranded, newer)
}

/// Dips a lot down to `volume` with no mass left, as after density drift.
async fn strand(ledger: &FuelLedger, lot: &FuelLot, volume: Volume) {
    ledger
        .adjust_lot(
            AdjustLot {
                lot_id: lot.id.clone(),
                remaining_mass: Mass::zero(),
                remaining_volume: volume,
                reason: "dip after density drift".to_string(),
            },
            "ops:test",
        )
        .await
        .unwrap();
}

// =============================================================================
// Intake
// =============================================================================

#[tokio::test]
async fn intake_merges_same_declaration_and_substitutes_bad_density() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;

    let first = ledger
        .intake(
            Intake {
                tank_id: fixed.id.clone(),
                declaration_ref: "MRN-1".to_string(),
                mass: Mass::from_whole(800),
                volume: Volume::from_whole(1000),
                density: Density::new(dec!(1.2)),
                received_at: None,
                source_intake_id: Some("rcpt-1".to_string()),
            },
            "ops:test",
        )
        .await
        .unwrap();
    assert!(!first.merged);
    assert_eq!(first.rejected_density, Some(Density::new(dec!(1.2))));
    assert_eq!(first.lot.density, Density::new(dec!(0.8)));
    assert_eq!(first.lot.received_at, t0());

    let second = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(400), Volume::from_whole(500), 0).await;
    assert_eq!(second.id, first.lot.id);
    assert_eq!(second.original_mass, Mass::from_whole(1200));
    assert_eq!(second.remaining_volume, Volume::from_whole(1500));

    let tank = ledger.get_tank(&fixed.id).await.unwrap();
    assert_eq!(tank.declared_mass, Mass::from_whole(1200));
    assert_eq!(tank.declared_volume, Volume::from_whole(1500));
}

#[tokio::test]
async fn failed_intake_is_audited_with_unchanged_snapshot() {
    let (ledger, _) = ledger().await;
    let truck = ledger
        .register_tank(RegisterTank {
            code: "TRK-1".to_string(),
            kind: TankKind::Mobile,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(1000),
        })
        .await
        .unwrap();

    let err = ledger
        .intake(
            Intake {
                tank_id: truck.id.clone(),
                declaration_ref: "MRN-1".to_string(),
                mass: Mass::from_whole(900),
                volume: Volume::from_whole(1100),
                density: Density::new(dec!(0.8)),
                received_at: None,
                source_intake_id: None,
            },
            "ops:test",
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let log = ledger
        .list_operation_log(&OperationLogFilter::default().tank(&truck.id))
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert!(!log[0].success);
    assert_eq!(log[0].kind, OperationKind::Intake);
    assert!(log[0].error_message.as_deref().unwrap_or_default().contains("capacity"));
    assert!(log[0].before.is_some());
    assert_eq!(log[0].before, log[0].after);
    assert!(all_lots(&ledger, &truck).await.is_empty());
}

#[tokio::test]
async fn duplicate_tank_code_is_rejected() {
    let (ledger, _) = ledger().await;
    tank(&ledger, "FT-01", TankKind::Fixed).await;

    let err = ledger
        .register_tank(RegisterTank {
            code: "FT-01".to_string(),
            kind: TankKind::Fixed,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(1000),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// =============================================================================
// FIFO
// =============================================================================

#[tokio::test]
async fn consumption_takes_oldest_lot_first() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let oldest = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 3).await;
    let middle = receive(&ledger, &fixed, "MRN-2", Mass::from_whole(1000), Volume::from_whole(1250), 2).await;
    let newest = receive(&ledger, &fixed, "MRN-3", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let result = ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(400))), "ops:test")
        .await
        .unwrap();

    assert_eq!(result.withdrawal.per_lot.len(), 1);
    assert_eq!(result.withdrawal.per_lot[0].lot_id, oldest.id);
    assert_eq!(result.withdrawal.deducted_volume, Volume::from_whole(500));
    assert!(result.withdrawal.shortfall.is_zero());

    let oldest = lot(&ledger, &oldest.id).await;
    assert_eq!(oldest.remaining_mass, Mass::from_whole(600));
    assert_eq!(oldest.remaining_volume, Volume::from_whole(750));
    assert_eq!(lot(&ledger, &middle.id).await.remaining_mass, Mass::from_whole(1000));
    assert_eq!(lot(&ledger, &newest.id).await.remaining_mass, Mass::from_whole(1000));

    let tank = ledger.get_tank(&fixed.id).await.unwrap();
    assert_eq!(tank.declared_mass, Mass::from_whole(2600));
    assert_eq!(tank.declared_volume, Volume::from_whole(3250));
    assert!(ledger.verify_consistency(&fixed.id).await.unwrap().is_consistent);
}

#[tokio::test]
async fn dust_remainder_is_absorbed_whole() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let first = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 2).await;
    let second = receive(&ledger, &fixed, "MRN-2", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(kg(dec!(999.95)))), "ops:test")
        .await
        .unwrap();
    assert_eq!(lot(&ledger, &first.id).await.remaining_mass, kg(dec!(0.05)));

    let result = ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(10))), "ops:test")
        .await
        .unwrap();

    let per_lot = &result.withdrawal.per_lot;
    assert_eq!(per_lot.len(), 2);
    assert_eq!(per_lot[0].lot_id, first.id);
    assert_eq!(per_lot[0].mass_deducted, kg(dec!(0.05)));
    assert_eq!(per_lot[1].lot_id, second.id);
    assert_eq!(per_lot[1].mass_deducted, kg(dec!(9.95)));

    let first = lot(&ledger, &first.id).await;
    assert!(first.remaining_mass.is_zero());
    assert!(first.remaining_volume.is_zero());
}

// =============================================================================
// Shortfall
// =============================================================================

#[tokio::test]
async fn shortfall_within_tolerance_is_satisfied() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let result = ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(1004))), "ops:test")
        .await
        .unwrap();

    assert_eq!(result.withdrawal.deducted_mass, Mass::from_whole(1000));
    assert_eq!(result.withdrawal.shortfall, Mass::from_whole(4));
}

#[tokio::test]
async fn shortfall_beyond_tolerance_fails_unless_partial() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let only = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let err = ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(1100))), "ops:test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFuel);
    assert_eq!(lot(&ledger, &only.id).await.remaining_mass, Mass::from_whole(1000));

    let failures = ledger
        .list_operation_log(&OperationLogFilter::default().tank(&fixed.id).failed_only())
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].kind, OperationKind::Consumption);
    assert_eq!(failures[0].mass, Mass::from_whole(1100));

    let partial = ledger
        .consume(
            Consume {
                allow_partial: true,
                ..consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(1100)))
            },
            "ops:test",
        )
        .await
        .unwrap();
    assert_eq!(partial.withdrawal.deducted_mass, Mass::from_whole(1000));
    assert_eq!(partial.withdrawal.shortfall, Mass::from_whole(100));
    assert!(ledger.get_tank(&fixed.id).await.unwrap().declared_mass.is_zero());
}

#[tokio::test]
async fn drain_by_volume_uses_lot_ratio() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    // 10 L short at 0.8 kg/L is 8 kg, beyond max(1 kg, 0.5% of 1008 kg)
    let err = ledger
        .drain(&fixed.id, Volume::from_whole(1260), "ops:test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFuel);

    let result = ledger.drain(&fixed.id, Volume::from_whole(1250), "ops:test").await.unwrap();
    assert_eq!(result.withdrawal.deducted_mass, Mass::from_whole(1000));
    assert_eq!(result.withdrawal.deducted_volume, Volume::from_whole(1250));
    assert!(result.withdrawal.shortfall.is_zero());

    let log = ledger
        .list_operation_log(&OperationLogFilter::default().correlation(&result.correlation_id))
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, OperationKind::Drain);
    assert!(log[0].success);
}

// =============================================================================
// Orphans & Reconciliation
// =============================================================================

#[tokio::test]
async fn consumption_reconciles_orphan_inline() {
    let (ledger, _) = ledger().await;
    let (fixed, truck, fixed_lot, stranded, newer) = stranded_truck(&ledger).await;
    let before = system_totals(&ledger, &[&fixed, &truck]).await;

    let result = ledger
        .consume(consume(&truck, RequestedQuantity::Mass(Mass::from_whole(400))), "ops:test")
        .await
        .unwrap();

    let withdrawal = &result.withdrawal;
    assert_eq!(withdrawal.orphans.len(), 1);
    assert_eq!(withdrawal.orphans[0].lot_id, stranded.id);
    assert_eq!(withdrawal.orphans[0].volume, Volume::from_whole(12));
    assert_eq!(withdrawal.per_lot.len(), 1);
    assert_eq!(withdrawal.per_lot[0].lot_id, newer.id);
    assert_eq!(withdrawal.reconciliations.len(), 1);
    assert!(withdrawal.unreconciled.is_empty());

    let reconciliation = &withdrawal.reconciliations[0];
    assert_eq!(reconciliation.plan.target_lot_id, fixed_lot.id);
    assert_eq!(reconciliation.plan.equivalent_mass, kg(dec!(9.6)));
    assert_eq!(reconciliation.substitute_lot.tank_id, truck.id);
    assert_eq!(reconciliation.substitute_lot.declaration_ref, "MRN-F");
    assert_eq!(reconciliation.substitute_lot.received_at, fixed_lot.received_at);

    assert!(lot(&ledger, &stranded.id).await.remaining_volume.is_zero());
    let fixed_lot = lot(&ledger, &fixed_lot.id).await;
    assert_eq!(fixed_lot.remaining_mass, kg(dec!(7990.4)));
    assert_eq!(fixed_lot.remaining_volume, Volume::from_whole(9988));

    let reserve = ledger.list_reserve_records(&truck.id).await.unwrap();
    assert_eq!(reserve.len(), 1);
    assert!(reserve[0].is_excess);
    assert_eq!(reserve[0].volume, Volume::from_whole(12));
    assert_eq!(reserve[0].source_lot_id, stranded.id);

    // Only the consumed fuel left the system; the orphan moved to reserve
    let after = system_totals(&ledger, &[&fixed, &truck]).await;
    assert_eq!(after.0, before.0 - Mass::from_whole(400));
    assert_eq!(after.1 + after.2, before.1 + before.2 - Volume::from_whole(500));

    let truck_now = ledger.get_tank(&truck.id).await.unwrap();
    assert_eq!(truck_now.declared_mass, kg(dec!(409.6)));
    assert_eq!(truck_now.declared_volume, Volume::from_whole(512));
    assert!(ledger.verify_consistency(&truck.id).await.unwrap().is_consistent);
    assert!(ledger.verify_consistency(&fixed.id).await.unwrap().is_consistent);

    // One audit row per tank, the reconciliation target included
    let log = ledger
        .list_operation_log(&OperationLogFilter::default().correlation(&result.correlation_id))
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|e| e.success && e.kind == OperationKind::Consumption));
    assert!(log.iter().any(|e| e.tank_id == fixed.id));
}

#[tokio::test]
async fn standalone_reconciliation_preserves_system_totals() {
    let (ledger, _) = ledger().await;
    let (fixed, truck, _, stranded, _) = stranded_truck(&ledger).await;
    let before = system_totals(&ledger, &[&fixed, &truck]).await;

    let result = ledger
        .reconcile_excess(&truck.id, Volume::from_whole(12), &stranded.id, "ops:test")
        .await
        .unwrap();
    assert_eq!(result.reserve_record.volume, Volume::from_whole(12));

    let after = system_totals(&ledger, &[&fixed, &truck]).await;
    assert_eq!(after.0, before.0);
    assert_eq!(after.1 + after.2, before.1 + before.2);
    assert_eq!(after.2, Volume::from_whole(12));

    let log = ledger
        .list_operation_log(&OperationLogFilter::default().kind(OperationKind::Reconciliation))
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn reconciliation_without_fixed_lot_changes_nothing() {
    let (ledger, _) = ledger().await;
    let truck = tank(&ledger, "TRK-7", TankKind::Mobile).await;
    let stranded = receive(&ledger, &truck, "MRN-M1", Mass::from_whole(100), Volume::from_whole(125), 2).await;
    ledger
        .adjust_lot(
            AdjustLot {
                lot_id: stranded.id.clone(),
                remaining_mass: Mass::zero(),
                remaining_volume: Volume::from_whole(12),
                reason: "dip".to_string(),
            },
            "ops:test",
        )
        .await
        .unwrap();

    let err = ledger
        .reconcile_excess(&truck.id, Volume::from_whole(12), &stranded.id, "ops:test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReconciliationUnavailable);
    assert_eq!(lot(&ledger, &stranded.id).await.remaining_volume, Volume::from_whole(12));
    assert!(ledger.list_reserve_records(&truck.id).await.unwrap().is_empty());

    let report = ledger.sweep_orphans().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.unavailable, 1);
    assert_eq!(report.reconciled, 0);
}

#[tokio::test]
async fn orphan_left_for_sweeper_when_inline_disabled() {
    let mut config = LedgerConfig::default();
    config.reconciliation.inline = false;
    let (ledger, _) = ledger_with(config).await;
    let (fixed, truck, _, stranded, _) = stranded_truck(&ledger).await;

    let result = ledger
        .consume(consume(&truck, RequestedQuantity::Mass(Mass::from_whole(400))), "ops:test")
        .await
        .unwrap();
    assert_eq!(result.withdrawal.unreconciled.len(), 1);
    assert!(result.withdrawal.reconciliations.is_empty());
    assert_eq!(lot(&ledger, &stranded.id).await.remaining_volume, Volume::from_whole(12));
    assert!(ledger.verify_consistency(&truck.id).await.unwrap().is_consistent);

    // Already reported; the next withdrawal walks past it
    let again = ledger
        .consume(consume(&truck, RequestedQuantity::Mass(Mass::from_whole(100))), "ops:test")
        .await
        .unwrap();
    assert!(again.withdrawal.orphans.is_empty());
    assert!(again.withdrawal.unreconciled.is_empty());

    let before = system_totals(&ledger, &[&fixed, &truck]).await;
    let report = ledger.sweep_orphans().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.reconciled, 1);

    assert!(lot(&ledger, &stranded.id).await.remaining_volume.is_zero());
    let after = system_totals(&ledger, &[&fixed, &truck]).await;
    assert_eq!(after.0, before.0);
    assert_eq!(after.1 + after.2, before.1 + before.2);

    let swept = ledger
        .list_operation_log(&OperationLogFilter::default().actor(aerofuel_ledger::SWEEPER_ACTOR))
        .await
        .unwrap();
    assert_eq!(swept.len(), 2);

    assert_eq!(ledger.sweep_orphans().await.unwrap().scanned, 0);
}

#[tokio::test]
async fn fixed_tank_orphan_is_reported_once() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let dipped = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(100), Volume::from_whole(125), 3).await;
    strand(&ledger, &dipped, Volume::from_whole(12)).await;
    receive(&ledger, &fixed, "MRN-2", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let mut per_withdrawal = Vec::new();
    let mut reported = Volume::zero();
    for _ in 0..3 {
        let result = ledger
            .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(10))), "ops:test")
            .await
            .unwrap();
        per_withdrawal.push(result.withdrawal.orphans.len());
        for orphan in &result.withdrawal.orphans {
            reported += orphan.volume;
        }
    }

    assert_eq!(per_withdrawal, vec![1, 0, 0]);
    assert_eq!(reported, Volume::from_whole(12));
    // The volume itself never moved
    assert_eq!(lot(&ledger, &dipped.id).await.remaining_volume, Volume::from_whole(12));
    assert!(ledger.verify_consistency(&fixed.id).await.unwrap().is_consistent);
}

#[tokio::test]
async fn sweep_steps_over_lots_it_cannot_reconcile() {
    let mut config = LedgerConfig::default();
    config.reconciliation.sweep_batch_size = 1;
    let (ledger, _) = ledger_with(config).await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let truck = tank(&ledger, "TRK-7", TankKind::Mobile).await;

    // Room for 12 L of orphan, not for 100 L
    receive(&ledger, &fixed, "MRN-F", Mass::from_whole(40), Volume::from_whole(50), 10).await;
    let blocked = receive(&ledger, &truck, "MRN-M1", Mass::from_whole(200), Volume::from_whole(250), 3).await;
    strand(&ledger, &blocked, Volume::from_whole(100)).await;
    let reachable = receive(&ledger, &truck, "MRN-M2", Mass::from_whole(100), Volume::from_whole(125), 2).await;
    strand(&ledger, &reachable, Volume::from_whole(12)).await;

    let report = ledger.sweep_orphans().await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            scanned: 2,
            reconciled: 1,
            unavailable: 1,
            failed: 0,
        }
    );
    assert!(lot(&ledger, &reachable.id).await.remaining_volume.is_zero());
    assert_eq!(lot(&ledger, &blocked.id).await.remaining_volume, Volume::from_whole(100));

    let report = ledger.sweep_orphans().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.unavailable, 1);
    assert_eq!(report.reconciled, 0);
}

#[tokio::test]
async fn sweeper_loop_reconciles_until_shut_down() {
    let (ledger, _) = ledger().await;
    let (_, _, _, stranded, _) = stranded_truck(&ledger).await;
    let ledger = Arc::new(ledger);

    let (sweeper, handle) = OrphanSweeper::new(ledger.clone(), std::time::Duration::from_millis(20));
    let task = tokio::spawn(sweeper.run());

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    handle.shutdown().await.unwrap();
    let totals = tokio::time::timeout(std::time::Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(totals.reconciled, 1);
    assert_eq!(totals.scanned, 1);
    assert_eq!(totals.unavailable, 0);
    assert_eq!(totals.failed, 0);
    assert!(lot(&ledger, &stranded.id).await.remaining_volume.is_zero());
}

#[tokio::test]
async fn reconciliation_rejects_fixed_tank_source() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let lot = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(100), Volume::from_whole(125), 1).await;

    let err = ledger
        .reconcile_excess(&fixed.id, Volume::from_whole(5), &lot.id, "ops:test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// =============================================================================
// Transfer
// =============================================================================

#[tokio::test]
async fn transfer_preserves_lot_attribution() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let truck = tank(&ledger, "TRK-7", TankKind::Mobile).await;
    let older = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 3).await;
    let newer = receive(&ledger, &fixed, "MRN-2", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;
    let before = system_totals(&ledger, &[&fixed, &truck]).await;

    let result = ledger
        .transfer_between_tanks(
            Transfer {
                source_tank_id: fixed.id.clone(),
                target_tank_id: truck.id.clone(),
                quantity: RequestedQuantity::Mass(Mass::from_whole(1500)),
                allow_partial: false,
            },
            "ops:test",
        )
        .await
        .unwrap();

    assert_eq!(result.links.len(), 2);
    assert_eq!(result.links[0].source_lot_id, older.id);
    assert_eq!(result.links[1].source_lot_id, newer.id);
    assert_eq!(result.target_lots[0].declaration_ref, "MRN-1");
    assert_eq!(result.target_lots[0].received_at, older.received_at);
    assert_eq!(result.target_lots[1].remaining_mass, Mass::from_whole(500));
    assert_eq!(result.target_lots[1].remaining_volume, Volume::from_whole(625));

    let source = ledger.get_tank(&fixed.id).await.unwrap();
    let target = ledger.get_tank(&truck.id).await.unwrap();
    assert_eq!(source.declared_mass, Mass::from_whole(500));
    assert_eq!(target.declared_mass, Mass::from_whole(1500));
    assert_eq!(target.declared_volume, Volume::from_whole(1875));
    assert_eq!(system_totals(&ledger, &[&fixed, &truck]).await, before);

    let log = ledger
        .list_operation_log(&OperationLogFilter::default().correlation(&result.correlation_id))
        .await
        .unwrap();
    assert_eq!(log.len(), 2);
    let source_row = log.iter().find(|e| e.tank_id == fixed.id).unwrap();
    assert_eq!(source_row.counterpart_tank_id.as_deref(), Some(truck.id.as_str()));

    let stored = ledger.list_lot_transfers(&result.correlation_id).await.unwrap();
    assert_eq!(stored, result.links);
}

#[tokio::test]
async fn transfer_checks_target_before_touching_source() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let small = ledger
        .register_tank(RegisterTank {
            code: "TRK-1".to_string(),
            kind: TankKind::Mobile,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(1000),
        })
        .await
        .unwrap();
    let avgas = ledger
        .register_tank(RegisterTank {
            code: "TRK-2".to_string(),
            kind: TankKind::Mobile,
            fuel_type: "AVGAS-100LL".to_string(),
            capacity: Volume::from_whole(10_000),
        })
        .await
        .unwrap();
    let only = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let request = |target: &Tank| Transfer {
        source_tank_id: fixed.id.clone(),
        target_tank_id: target.id.clone(),
        quantity: RequestedQuantity::Mass(Mass::from_whole(1000)),
        allow_partial: false,
    };

    let err = ledger.transfer_between_tanks(request(&small), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = ledger.transfer_between_tanks(request(&avgas), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = ledger.transfer_between_tanks(request(&fixed), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(lot(&ledger, &only.id).await.remaining_mass, Mass::from_whole(1000));
    assert!(all_lots(&ledger, &small).await.is_empty());
}

// =============================================================================
// Consistency & Overrides
// =============================================================================

async fn overwrite_declared(ledger: &FuelLedger, tank: &Tank, mass: Mass, volume: Volume) {
    let mut conn = ledger.database().acquire().await.unwrap();
    TankRepository::new(&mut conn)
        .update_declared(&tank.id, mass, volume, t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn tolerance_boundary_is_inclusive() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(7960), Volume::from_whole(9950), 1).await;

    overwrite_declared(&ledger, &fixed, Mass::from_whole(7960), Volume::from_whole(10_000)).await;
    let report = ledger.verify_consistency(&fixed.id).await.unwrap();
    assert_eq!(report.tolerance, Volume::from_whole(50));
    assert_eq!(report.difference.abs(), Volume::from_whole(50));
    assert!(report.is_consistent);

    overwrite_declared(&ledger, &fixed, Mass::from_whole(7960), litres(dec!(10000.001))).await;
    assert!(!ledger.verify_consistency(&fixed.id).await.unwrap().is_consistent);
}

#[tokio::test]
async fn inconsistent_tank_needs_scoped_unexpired_override() {
    let (ledger, clock) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(7200), Volume::from_whole(9000), 1).await;
    overwrite_declared(&ledger, &fixed, Mass::from_whole(8000), Volume::from_whole(10_000)).await;

    let request = || consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(100)));

    let err = ledger.consume(request(), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

    // An override for another kind does not help
    ledger
        .grant_consistency_override(&fixed.id, OperationKind::Drain, Duration::hours(1), "sup:ana", "dip pending")
        .await
        .unwrap();
    let err = ledger.consume(request(), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

    ledger
        .grant_consistency_override(
            &fixed.id,
            OperationKind::Consumption,
            Duration::hours(1),
            "sup:ana",
            "dip pending",
        )
        .await
        .unwrap();
    ledger.consume(request(), "ops:test").await.unwrap();

    clock.advance(Duration::hours(2));
    let err = ledger.consume(request(), "ops:test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

    let failures = ledger
        .list_operation_log(&OperationLogFilter::default().tank(&fixed.id).failed_only())
        .await
        .unwrap();
    assert_eq!(failures.len(), 3);
    assert!(failures.iter().all(|e| e.before == e.after));
}

#[tokio::test]
async fn revoked_override_stops_applying() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(7200), Volume::from_whole(9000), 1).await;
    overwrite_declared(&ledger, &fixed, Mass::from_whole(8000), Volume::from_whole(10_000)).await;

    ledger
        .grant_consistency_override(&fixed.id, OperationKind::Consumption, Duration::hours(1), "sup:ana", "dip")
        .await
        .unwrap();
    assert_eq!(ledger.revoke_consistency_overrides(&fixed.id).await.unwrap(), 1);

    let err = ledger
        .consume(consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(100))), "ops:test")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
}

// =============================================================================
// Adjustment
// =============================================================================

#[tokio::test]
async fn adjustment_moves_tank_by_same_delta() {
    let (ledger, _) = ledger().await;
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    let only = receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let result = ledger
        .adjust_lot(
            AdjustLot {
                lot_id: only.id.clone(),
                remaining_mass: Mass::from_whole(990),
                remaining_volume: Volume::from_whole(1240),
                reason: "dip".to_string(),
            },
            "sup:ana",
        )
        .await
        .unwrap();
    assert_eq!(result.mass_delta, -Mass::from_whole(10));
    assert_eq!(result.volume_delta, -Volume::from_whole(10));

    let tank = ledger.get_tank(&fixed.id).await.unwrap();
    assert_eq!(tank.declared_mass, Mass::from_whole(990));
    assert_eq!(tank.declared_volume, Volume::from_whole(1240));

    let over = ledger
        .adjust_lot(
            AdjustLot {
                lot_id: only.id.clone(),
                remaining_mass: Mass::from_whole(1001),
                remaining_volume: Volume::from_whole(1240),
                reason: "dip".to_string(),
            },
            "sup:ana",
        )
        .await
        .unwrap_err();
    assert_eq!(over.kind(), ErrorKind::Validation);

    let missing = ledger
        .adjust_lot(
            AdjustLot {
                lot_id: "missing".to_string(),
                remaining_mass: Mass::zero(),
                remaining_volume: Volume::zero(),
                reason: "dip".to_string(),
            },
            "sup:ana",
        )
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::LotNotFound);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumption_conserves_fuel() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(DbConfig::new(dir.path().join("ledger.db")).max_connections(4))
        .await
        .unwrap();
    let ledger = Arc::new(
        FuelLedger::new(Arc::new(db), &LedgerConfig::default()).with_retry_policy(RetryPolicy {
            max_retries: 10,
            base: std::time::Duration::from_millis(10),
            max_interval: std::time::Duration::from_millis(200),
            ..RetryPolicy::default()
        }),
    );
    let fixed = tank(&ledger, "FT-01", TankKind::Fixed).await;
    receive(&ledger, &fixed, "MRN-1", Mass::from_whole(1000), Volume::from_whole(1250), 1).await;

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let ledger = ledger.clone();
        let request = consume(&fixed, RequestedQuantity::Mass(Mass::from_whole(10)));
        tasks.push(tokio::spawn(async move { ledger.consume(request, "ops:test").await }));
    }

    let mut committed = 0i64;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => committed += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::TransactionConflict),
        }
    }
    assert!(committed > 0);

    let tank = ledger.get_tank(&fixed.id).await.unwrap();
    assert_eq!(tank.declared_mass, Mass::from_whole(1000 - 10 * committed));
    let lots = all_lots(&ledger, &fixed).await;
    let lot_mass: Mass = lots.iter().map(|l| l.remaining_mass).sum();
    assert_eq!(lot_mass, tank.declared_mass);

    let committed_rows = ledger
        .list_operation_log(
            &OperationLogFilter::default()
                .tank(&fixed.id)
                .kind(OperationKind::Consumption)
                .succeeded_only(),
        )
        .await
        .unwrap();
    assert_eq!(committed_rows.len() as i64, committed);
}
