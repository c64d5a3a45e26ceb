//! # FIFO Consumption Engine
//!
//! Deducts a requested mass from a tank's lots, oldest first.
//!
//! ## Algorithm
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for lot in lots (received_at, created_at, id ascending):               │
//! │                                                                         │
//! │    owed == 0?                         ──► stop                          │
//! │    lot mass == 0, volume > 0.1?       ──► orphan: zero volume, report   │
//! │    lot mass ≤ owed  OR  lot mass < 0.1 ──► take the WHOLE lot           │
//! │    otherwise                          ──► take exactly `owed`           │
//! │                                                                         │
//! │    volume taken = mass taken / lot mass × lot volume                    │
//! │                   (same proportion, never via intake density)           │
//! │                                                                         │
//! │  lots exhausted with mass still owed ──► report shortfall (no error)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Proportional volume means a deduction that empties a lot's mass always
//! takes its whole volume, so the engine never strands volume itself. Orphans
//! come only from lots that already sit at zero mass with volume left, which
//! an administrative adjustment after a dip produces. The engine reports such
//! a lot when a deduction walks past it; the caller keeps lots whose orphan
//! was already reported out of `lots`.
//!
//! The engine is pure: it receives lot copies and returns updated copies.
//! Persisting them is the caller's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::quantity::{Mass, Volume};
use crate::types::{sort_fifo, FuelLot};
use crate::{
    NEGLIGIBLE_MASS, NEGLIGIBLE_VOLUME, SHORTFALL_ABSOLUTE_TOLERANCE,
    SHORTFALL_RELATIVE_TOLERANCE,
};

// =============================================================================
// Result Types
// =============================================================================

/// What one lot contributed to a deduction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerLotDeduction {
    pub lot_id: String,
    pub declaration_ref: String,
    pub mass_deducted: Mass,
    pub volume_deducted: Volume,
}

/// Volume zeroed out of a lot whose mass is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedVolume {
    pub lot_id: String,
    pub declaration_ref: String,
    pub volume: Volume,
}

/// Outcome of [`deduct`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduction {
    pub requested: Mass,

    /// Lots whose remaining quantities changed, in FIFO order.
    pub updated_lots: Vec<FuelLot>,

    /// One entry per lot that gave up fuel.
    pub details: Vec<PerLotDeduction>,

    pub orphans: Vec<OrphanedVolume>,

    pub deducted_mass: Mass,
    pub deducted_volume: Volume,

    /// Mass still owed once every lot was walked. Zero when satisfied.
    pub shortfall: Mass,
}

impl Deduction {
    pub fn orphaned_volume(&self) -> Volume {
        self.orphans.iter().map(|o| o.volume).sum()
    }

    /// Shortfall is small enough to count the request as satisfied.
    pub fn within_tolerance(&self) -> bool {
        self.shortfall <= shortfall_tolerance(self.requested)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Allowed shortfall for a request: `max(1 kg, 0.5% × requested)`.
///
/// ## Example
/// ```rust
/// use aerofuel_core::fifo::shortfall_tolerance;
/// use aerofuel_core::quantity::Mass;
///
/// assert_eq!(shortfall_tolerance(Mass::from_whole(100)), Mass::from_whole(1));
/// assert_eq!(shortfall_tolerance(Mass::from_whole(10_000)), Mass::from_whole(50));
/// ```
pub fn shortfall_tolerance(requested: Mass) -> Mass {
    let relative = requested.abs().scale_by(SHORTFALL_RELATIVE_TOLERANCE);
    let absolute = Mass::new(SHORTFALL_ABSOLUTE_TOLERANCE);
    relative.max(absolute)
}

/// Deducts `requested` mass from `lots` oldest-first.
///
/// `lots` may come in any order and may include exhausted lots; they are
/// sorted into FIFO order first. Lots without mass or stranded volume are
/// skipped. `now` stamps `updated_at` on every touched lot.
pub fn deduct(lots: &[FuelLot], requested: Mass, now: DateTime<Utc>) -> Deduction {
    let negligible_mass = Mass::new(NEGLIGIBLE_MASS);
    let negligible_volume = Volume::new(NEGLIGIBLE_VOLUME);

    let mut ordered = lots.to_vec();
    sort_fifo(&mut ordered);

    let mut owed = requested.non_negative();
    let mut updated_lots = Vec::new();
    let mut details = Vec::new();
    let mut orphans = Vec::new();
    let mut deducted_mass = Mass::zero();
    let mut deducted_volume = Volume::zero();

    for mut lot in ordered {
        if !owed.is_positive() {
            break;
        }

        // Stranded volume left over from earlier drift
        if lot.remaining_mass.is_zero() {
            if lot.remaining_volume > negligible_volume {
                orphans.push(OrphanedVolume {
                    lot_id: lot.id.clone(),
                    declaration_ref: lot.declaration_ref.clone(),
                    volume: lot.remaining_volume,
                });
                lot.remaining_volume = Volume::zero();
                lot.updated_at = now;
                updated_lots.push(lot);
            }
            continue;
        }
        if !lot.remaining_mass.is_positive() {
            continue;
        }

        let take_whole = lot.remaining_mass <= owed || lot.remaining_mass < negligible_mass;
        let mass_taken = if take_whole { lot.remaining_mass } else { owed };
        let volume_taken =
            Volume::proportional(lot.remaining_volume, mass_taken, lot.remaining_mass);

        lot.remaining_mass -= mass_taken;
        lot.remaining_volume = (lot.remaining_volume - volume_taken).non_negative();
        owed = (owed - mass_taken).non_negative();

        deducted_mass += mass_taken;
        deducted_volume += volume_taken;
        details.push(PerLotDeduction {
            lot_id: lot.id.clone(),
            declaration_ref: lot.declaration_ref.clone(),
            mass_deducted: mass_taken,
            volume_deducted: volume_taken,
        });
        lot.updated_at = now;
        updated_lots.push(lot);
    }

    Deduction {
        requested,
        updated_lots,
        details,
        orphans,
        deducted_mass,
        deducted_volume,
        shortfall: owed,
    }
}

/// Converts a volume request into mass by walking lots oldest-first, using
/// each lot's own remaining mass/volume ratio.
///
/// Returns the mass equivalent of what the lots can cover and the volume
/// they could not cover.
///
/// ```text
/// request 1500 L, lots: A 1000 L / 790 kg, B 2000 L / 1620 kg
///   A fully   → 790 kg, 500 L left to cover
///   B partial → 500 × 1620 / 2000 = 405 kg
///   total     → 1195 kg, 0 L uncovered
/// ```
pub fn mass_for_volume(lots: &[FuelLot], requested: Volume) -> (Mass, Volume) {
    let mut ordered: Vec<&FuelLot> = lots.iter().filter(|l| l.is_active()).collect();
    ordered.sort_by(|a, b| a.fifo_key().cmp(&b.fifo_key()));

    let mut owed = requested.non_negative();
    let mut mass = Mass::zero();

    for lot in ordered {
        if !owed.is_positive() {
            break;
        }
        if !lot.remaining_volume.is_positive() {
            // Mass without volume cannot be reached by a volume request
            continue;
        }
        if lot.remaining_volume <= owed {
            mass += lot.remaining_mass;
            owed -= lot.remaining_volume;
        } else {
            let ratio: Decimal = lot.remaining_mass.value() / lot.remaining_volume.value();
            mass += Mass::new(owed.value() * ratio);
            owed = Volume::zero();
        }
    }

    (mass, owed)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::Density;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn lot(id: &str, age_hours: i64, mass: Decimal, volume: Decimal) -> FuelLot {
        FuelLot {
            id: id.to_string(),
            tank_id: "tank".to_string(),
            declaration_ref: format!("MRN-{id}"),
            original_mass: Mass::new(mass),
            original_volume: Volume::new(volume),
            remaining_mass: Mass::new(mass),
            remaining_volume: Volume::new(volume),
            density: Density::new(dec!(0.8)),
            received_at: base() + Duration::hours(age_hours),
            source_intake_id: None,
            created_at: base(),
            updated_at: base(),
        }
    }

    #[test]
    fn test_exact_match_drains_lot_without_orphan() {
        let lots = vec![lot("x1", 0, dec!(1000), dec!(1250))];
        let d = deduct(&lots, Mass::from_whole(1000), base());

        assert_eq!(d.deducted_mass, Mass::from_whole(1000));
        assert_eq!(d.deducted_volume, Volume::from_whole(1250));
        assert_eq!(d.updated_lots[0].remaining_mass, Mass::zero());
        assert_eq!(d.updated_lots[0].remaining_volume, Volume::zero());
        assert!(d.orphans.is_empty());
        assert_eq!(d.shortfall, Mass::zero());
    }

    #[test]
    fn test_drifted_lot_drains_full_volume() {
        let lots = vec![lot("x1", 0, dec!(1000), dec!(1260))];
        let d = deduct(&lots, Mass::from_whole(1000), base());

        assert_eq!(d.deducted_volume, Volume::from_whole(1260));
        assert_eq!(d.updated_lots[0].remaining_volume, Volume::zero());
        assert!(d.orphans.is_empty());
    }

    #[test]
    fn test_oldest_lot_only_when_it_suffices() {
        let lots = vec![
            lot("l3", 2, dec!(500), dec!(625)),
            lot("l1", 0, dec!(500), dec!(625)),
            lot("l2", 1, dec!(500), dec!(625)),
        ];
        let d = deduct(&lots, Mass::from_whole(300), base());

        assert_eq!(d.details.len(), 1);
        assert_eq!(d.details[0].lot_id, "l1");
        assert_eq!(d.details[0].volume_deducted, Volume::from_whole(375));
        assert_eq!(d.updated_lots.len(), 1);
        assert_eq!(d.updated_lots[0].remaining_mass, Mass::from_whole(200));
    }

    #[test]
    fn test_spans_lots_in_order() {
        let lots = vec![
            lot("l1", 0, dec!(100), dec!(125)),
            lot("l2", 1, dec!(100), dec!(125)),
        ];
        let d = deduct(&lots, Mass::from_whole(150), base());

        let ids: Vec<_> = d.details.iter().map(|p| p.lot_id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2"]);
        assert_eq!(d.details[1].mass_deducted, Mass::from_whole(50));
        assert_eq!(d.deducted_volume, Volume::new(dec!(187.5)));
    }

    #[test]
    fn test_negligible_remainder_is_absorbed() {
        let lots = vec![
            lot("dust", 0, dec!(0.05), dec!(0.06)),
            lot("next", 1, dec!(100), dec!(125)),
        ];
        let d = deduct(&lots, Mass::from_whole(10), base());

        assert_eq!(d.details[0].lot_id, "dust");
        assert_eq!(d.details[0].mass_deducted, Mass::new(dec!(0.05)));
        assert_eq!(d.updated_lots[0].remaining_mass, Mass::zero());
        assert_eq!(d.details[1].mass_deducted, Mass::new(dec!(9.95)));
        assert_eq!(d.deducted_mass, Mass::from_whole(10));
    }

    #[test]
    fn test_negligible_lot_taken_whole_even_above_owed() {
        let lots = vec![lot("dust", 0, dec!(0.05), dec!(0.06))];
        let d = deduct(&lots, Mass::new(dec!(0.02)), base());

        assert_eq!(d.deducted_mass, Mass::new(dec!(0.05)));
        assert_eq!(d.shortfall, Mass::zero());
    }

    #[test]
    fn test_stranded_volume_is_orphaned() {
        let mut stranded = lot("old", 0, dec!(500), dec!(625));
        stranded.remaining_mass = Mass::zero();
        stranded.remaining_volume = Volume::new(dec!(4.2));
        let lots = vec![stranded, lot("l2", 1, dec!(100), dec!(125))];

        let d = deduct(&lots, Mass::from_whole(10), base());

        assert_eq!(d.orphans.len(), 1);
        assert_eq!(d.orphans[0].lot_id, "old");
        assert_eq!(d.orphans[0].volume, Volume::new(dec!(4.2)));
        let old = d.updated_lots.iter().find(|l| l.id == "old").unwrap();
        assert_eq!(old.remaining_volume, Volume::zero());
        assert_eq!(d.orphaned_volume(), Volume::new(dec!(4.2)));
        // Orphans are not part of the deducted totals
        assert_eq!(d.deducted_mass, Mass::from_whole(10));
        assert_eq!(d.deducted_volume, Volume::new(dec!(12.5)));
    }

    #[test]
    fn test_dust_volume_is_not_orphaned() {
        let mut stranded = lot("old", 0, dec!(500), dec!(625));
        stranded.remaining_mass = Mass::zero();
        stranded.remaining_volume = Volume::new(dec!(0.1));
        let lots = vec![stranded, lot("l2", 1, dec!(100), dec!(125))];

        let d = deduct(&lots, Mass::from_whole(10), base());
        assert!(d.orphans.is_empty());
        assert_eq!(d.updated_lots.len(), 1);
    }

    #[test]
    fn test_shortfall_is_reported_not_raised() {
        let lots = vec![lot("l1", 0, dec!(100), dec!(125))];

        let small = deduct(&lots, Mass::new(dec!(100.9)), base());
        assert_eq!(small.shortfall, Mass::new(dec!(0.9)));
        assert!(small.within_tolerance());

        let large = deduct(&lots, Mass::from_whole(150), base());
        assert_eq!(large.shortfall, Mass::from_whole(50));
        assert_eq!(large.deducted_mass, Mass::from_whole(100));
        assert!(!large.within_tolerance());
    }

    #[test]
    fn test_shortfall_tolerance_relative_floor() {
        assert_eq!(shortfall_tolerance(Mass::from_whole(200)), Mass::from_whole(1));
        assert_eq!(shortfall_tolerance(Mass::from_whole(1000)), Mass::new(dec!(5)));
    }

    #[test]
    fn test_mass_for_volume_uses_each_lots_ratio() {
        let lots = vec![
            lot("a", 0, dec!(790), dec!(1000)),
            lot("b", 1, dec!(1620), dec!(2000)),
        ];
        let (mass, uncovered) = mass_for_volume(&lots, Volume::from_whole(1500));
        assert_eq!(mass, Mass::from_whole(1195));
        assert_eq!(uncovered, Volume::zero());

        let (mass, uncovered) = mass_for_volume(&lots, Volume::from_whole(3500));
        assert_eq!(mass, Mass::from_whole(2410));
        assert_eq!(uncovered, Volume::from_whole(500));
    }
}
