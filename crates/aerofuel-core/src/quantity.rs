//! # Quantity Module
//!
//! Provides the `Mass`, `Volume` and `Density` types for fuel bookkeeping.
//!
//! ## Why Fixed-Point Quantities?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE DRIFT PROBLEM                                                      │
//! │                                                                         │
//! │  A tanker lot of 20,000 kg is delivered in hundreds of small uplifts.   │
//! │  With f64:                                                              │
//! │    20000.0 - 0.1 - 0.2 - ...  → 19999.700000000004  ❌ phantom fuel     │
//! │                                                                         │
//! │  OUR SOLUTION: Decimal at a fixed scale                                 │
//! │    Mass   → kilograms, 3 decimals (grams)                               │
//! │    Volume → litres,    3 decimals (millilitres)                         │
//! │    Density→ kg/L,      6 decimals                                       │
//! │    Every rounding step uses banker's rounding and is explicit           │
//! │                                                                         │
//! │  Mass is AUTHORITATIVE. Volume is derived and may drift.                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use aerofuel_core::quantity::{Density, Mass, Volume};
//! use rust_decimal::Decimal;
//!
//! let volume = Volume::from_whole(1250);
//! let density = Density::new(Decimal::new(8, 1)); // 0.8 kg/L
//!
//! let mass = Mass::from_volume(volume, density);
//! assert_eq!(mass, Mass::from_whole(1000));
//! ```

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::{DEFAULT_DENSITY, MAX_DENSITY, MIN_DENSITY};

/// Decimal places kept for kilograms.
pub const MASS_SCALE: u32 = 3;

/// Decimal places kept for litres.
pub const VOLUME_SCALE: u32 = 3;

/// Decimal places kept for kg/L.
pub const DENSITY_SCALE: u32 = 6;

/// Rounds with banker's rounding (half to even).
#[inline]
fn round_to(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven)
}

// =============================================================================
// Mass & Volume
// =============================================================================

/// Generates the shared shape of the two additive quantities.
///
/// Mass and volume behave identically (add, subtract, compare, round to their
/// scale); only their unit and scale differ.
macro_rules! additive_quantity {
    ($(#[$meta:meta])* $name:ident, $scale:expr, $unit:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Decimal);

        impl $name {
            /// Creates a quantity, rounding to the type's scale.
            #[inline]
            pub fn new(value: Decimal) -> Self {
                $name(round_to(value, $scale))
            }

            /// Creates a quantity from a whole number of units.
            #[inline]
            pub fn from_whole(units: i64) -> Self {
                $name(Decimal::from(units))
            }

            /// Zero.
            #[inline]
            pub const fn zero() -> Self {
                $name(Decimal::ZERO)
            }

            /// Returns the underlying decimal value.
            #[inline]
            pub const fn value(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            /// Strictly greater than zero.
            #[inline]
            pub fn is_positive(&self) -> bool {
                self.0 > Decimal::ZERO
            }

            /// Strictly less than zero.
            #[inline]
            pub fn is_negative(&self) -> bool {
                self.0 < Decimal::ZERO
            }

            #[inline]
            pub fn abs(&self) -> Self {
                $name(self.0.abs())
            }

            /// Multiplies by a dimensionless factor and rounds to scale.
            #[inline]
            pub fn scale_by(&self, factor: Decimal) -> Self {
                $name::new(self.0 * factor)
            }

            /// Clamps negative values to zero.
            #[inline]
            pub fn non_negative(self) -> Self {
                if self.is_negative() {
                    $name::zero()
                } else {
                    self
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{} {}", self.0.normalize(), $unit)
            }
        }

        impl FromStr for $name {
            type Err = rust_decimal::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Decimal::from_str(s.trim()).map($name::new)
            }
        }

        impl Add for $name {
            type Output = Self;

            #[inline]
            fn add(self, other: Self) -> Self {
                $name(self.0 + other.0)
            }
        }

        impl AddAssign for $name {
            #[inline]
            fn add_assign(&mut self, other: Self) {
                self.0 += other.0;
            }
        }

        impl Sub for $name {
            type Output = Self;

            #[inline]
            fn sub(self, other: Self) -> Self {
                $name(self.0 - other.0)
            }
        }

        impl SubAssign for $name {
            #[inline]
            fn sub_assign(&mut self, other: Self) {
                self.0 -= other.0;
            }
        }

        impl Neg for $name {
            type Output = Self;

            #[inline]
            fn neg(self) -> Self {
                $name(-self.0)
            }
        }

        impl Sum for $name {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                iter.fold($name::zero(), |acc, q| acc + q)
            }
        }

        impl<'a> Sum<&'a $name> for $name {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                iter.fold($name::zero(), |acc, q| acc + *q)
            }
        }
    };
}

additive_quantity!(
    /// Mass in kilograms. The authoritative fuel quantity.
    Mass,
    MASS_SCALE,
    "kg"
);

additive_quantity!(
    /// Volume in litres. Derived from mass via density, tracked independently.
    Volume,
    VOLUME_SCALE,
    "L"
);

impl Mass {
    /// Mass equivalent of a volume at the given density.
    ///
    /// ## Example
    /// ```rust
    /// use aerofuel_core::quantity::{Density, Mass, Volume};
    /// use rust_decimal::Decimal;
    ///
    /// let mass = Mass::from_volume(Volume::from_whole(100), Density::new(Decimal::new(8, 1)));
    /// assert_eq!(mass, Mass::from_whole(80));
    /// ```
    pub fn from_volume(volume: Volume, density: Density) -> Mass {
        Mass::new(volume.value() * density.value())
    }
}

impl Volume {
    /// Volume equivalent of a mass at the given density.
    ///
    /// Returns zero for a zero density rather than dividing by zero.
    pub fn from_mass(mass: Mass, density: Density) -> Volume {
        if density.value().is_zero() {
            return Volume::zero();
        }
        Volume::new(mass.value() / density.value())
    }

    /// The share of `volume` that corresponds to `part` of `whole` mass.
    ///
    /// ```text
    /// consumed_volume = part / whole × volume
    /// ```
    ///
    /// Multiplication happens before division to keep precision. A `part`
    /// equal to `whole` returns `volume` unchanged so a fully drained lot
    /// never leaves rounding dust behind.
    pub fn proportional(volume: Volume, part: Mass, whole: Mass) -> Volume {
        if !whole.is_positive() {
            return Volume::zero();
        }
        if part >= whole {
            return volume;
        }
        Volume::new(volume.value() * part.value() / whole.value())
    }
}

// =============================================================================
// Density
// =============================================================================

/// Density in kilograms per litre.
///
/// Each lot records the density measured at receipt. It is fixed once
/// established and used whenever a volume must be expressed as mass for that
/// specific lot (reconciliation substitutions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Density(Decimal);

impl Density {
    /// Creates a density, rounding to six decimals.
    #[inline]
    pub fn new(value: Decimal) -> Self {
        Density(round_to(value, DENSITY_SCALE))
    }

    #[inline]
    pub const fn value(&self) -> Decimal {
        self.0
    }
}

impl Default for Density {
    fn default() -> Self {
        Density::new(DEFAULT_DENSITY)
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} kg/L", self.0.normalize())
    }
}

impl FromStr for Density {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Density::new)
    }
}

// =============================================================================
// Density Band
// =============================================================================

/// Physically plausible density range for aviation turbine fuel.
///
/// ## Substitution Rule
/// ```text
/// raw density ──► within [min, max]? ──yes──► use as-is
///                        │
///                        no (or ≤ 0)
///                        ▼
///                 use `default` + report the substitution (never fatal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensityBand {
    pub min: Density,
    pub max: Density,
    pub default: Density,
}

/// Result of running a density through [`DensityBand::sanitize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SanitizedDensity {
    /// The density to record.
    pub density: Density,
    /// The rejected input, when a substitution happened.
    pub rejected: Option<Density>,
}

impl DensityBand {
    /// Checks whether a density lies inside the band (inclusive).
    pub fn contains(&self, density: Density) -> bool {
        density.value() > Decimal::ZERO && density >= self.min && density <= self.max
    }

    /// Returns the density itself if sane, otherwise the band default.
    pub fn sanitize(&self, density: Density) -> SanitizedDensity {
        if self.contains(density) {
            SanitizedDensity {
                density,
                rejected: None,
            }
        } else {
            SanitizedDensity {
                density: self.default,
                rejected: Some(density),
            }
        }
    }
}

impl Default for DensityBand {
    fn default() -> Self {
        DensityBand {
            min: Density::new(MIN_DENSITY),
            max: Density::new(MAX_DENSITY),
            default: Density::new(DEFAULT_DENSITY),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
