//! # Consistency Verifier
//!
//! Compares a tank's declared total against the sum of its lots.
//!
//! ## Tolerance
//! ```text
//! tolerance = max(declared × 0.5%, 50 L)
//!
//!   small tanks → the absolute floor dominates
//!   large tanks → the relative term dominates
//!
//! consistent ⇔ |declared − Σ lots| ≤ tolerance      (boundary is consistent)
//! ```
//!
//! The check runs on the volume dimension. Mass sums are carried in the
//! report for information only.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::quantity::{Mass, Volume};
use crate::types::TankSnapshot;
use crate::{CONSISTENCY_ABSOLUTE_TOLERANCE, CONSISTENCY_RELATIVE_TOLERANCE};

/// Result of [`verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub tank_id: String,
    pub is_consistent: bool,
    pub declared_total: Volume,
    pub lot_sum: Volume,
    /// `declared_total − lot_sum` (signed).
    pub difference: Volume,
    pub tolerance: Volume,
    pub declared_mass: Mass,
    pub lot_mass_sum: Mass,
}

impl ConsistencyReport {
    /// Turns a failed report into the pre-check error.
    pub fn to_violation(&self) -> CoreError {
        CoreError::ConsistencyViolation {
            tank_id: self.tank_id.clone(),
            declared: self.declared_total,
            lot_sum: self.lot_sum,
            difference: self.difference,
            tolerance: self.tolerance,
        }
    }
}

/// `max(declared × 0.5%, 50 L)`.
pub fn consistency_tolerance(declared: Volume) -> Volume {
    let relative = declared.abs().scale_by(CONSISTENCY_RELATIVE_TOLERANCE);
    relative.max(Volume::new(CONSISTENCY_ABSOLUTE_TOLERANCE))
}

/// Verifies one tank snapshot.
///
/// ## Example
/// ```rust,no_run
/// use aerofuel_core::consistency::verify;
/// # fn snapshot() -> aerofuel_core::TankSnapshot { unimplemented!() }
///
/// let report = verify(&snapshot());
/// if !report.is_consistent {
///     eprintln!("{}", report.to_violation());
/// }
/// ```
pub fn verify(snapshot: &TankSnapshot) -> ConsistencyReport {
    let declared_total = snapshot.tank.declared_volume;
    let lot_sum = snapshot.lot_volume_sum();
    let difference = declared_total - lot_sum;
    let tolerance = consistency_tolerance(declared_total);

    ConsistencyReport {
        tank_id: snapshot.tank.id.clone(),
        is_consistent: difference.abs() <= tolerance,
        declared_total,
        lot_sum,
        difference,
        tolerance,
        declared_mass: snapshot.tank.declared_mass,
        lot_mass_sum: snapshot.lot_mass_sum(),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Density;
    use crate::types::{FuelLot, Tank, TankKind};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn snapshot(declared: Decimal, lot_volumes: &[Decimal]) -> TankSnapshot {
        let now = Utc::now();
        let tank = Tank {
            id: "ft-1".to_string(),
            code: "FT-01".to_string(),
            kind: TankKind::Fixed,
            fuel_type: "JET-A1".to_string(),
            capacity: Volume::from_whole(100_000),
            declared_mass: Mass::new(declared * dec!(0.8)),
            declared_volume: Volume::new(declared),
            created_at: now,
            updated_at: now,
        };
        let lots = lot_volumes
            .iter()
            .enumerate()
            .map(|(i, v)| FuelLot {
                id: format!("lot-{i}"),
                tank_id: tank.id.clone(),
                declaration_ref: format!("MRN-{i}"),
                original_mass: Mass::new(*v * dec!(0.8)),
                original_volume: Volume::new(*v),
                remaining_mass: Mass::new(*v * dec!(0.8)),
                remaining_volume: Volume::new(*v),
                density: Density::new(dec!(0.8)),
                received_at: now,
                source_intake_id: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        TankSnapshot { tank, lots }
    }

    #[test]
    fn test_tolerance_floor_and_relative() {
        assert_eq!(consistency_tolerance(Volume::from_whole(1_000)), Volume::from_whole(50));
        assert_eq!(consistency_tolerance(Volume::from_whole(40_000)), Volume::from_whole(200));
    }

    #[test]
    fn test_boundary_is_consistent() {
        // 20,000 L declared → tolerance 100 L
        let report = verify(&snapshot(dec!(20000), &[dec!(12000), dec!(7900)]));
        assert_eq!(report.tolerance, Volume::from_whole(100));
        assert_eq!(report.difference, Volume::from_whole(100));
        assert!(report.is_consistent);
    }

    #[test]
    fn test_just_beyond_boundary_is_inconsistent() {
        let report = verify(&snapshot(dec!(20000), &[dec!(12000), dec!(7899.999)]));
        assert!(!report.is_consistent);
        assert!(matches!(
            report.to_violation(),
            CoreError::ConsistencyViolation { .. }
        ));
    }

    #[test]
    fn test_lot_sum_above_declared() {
        let report = verify(&snapshot(dec!(1000), &[dec!(1050)]));
        assert_eq!(report.difference, Volume::from_whole(-50));
        assert!(report.is_consistent);

        let report = verify(&snapshot(dec!(1000), &[dec!(1050.001)]));
        assert!(!report.is_consistent);
    }

    #[test]
    fn test_empty_tank_is_consistent() {
        let report = verify(&snapshot(Decimal::ZERO, &[]));
        assert!(report.is_consistent);
        assert_eq!(report.lot_sum, Volume::zero());
    }
}
