//! # Validation Module
//!
//! Input validation utilities for Aerofuel.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (HTTP / UI, outside this workspace)                    │
//! │  └── Basic format checks, immediate feedback                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Ledger operation (Rust)                                       │
//! │  └── THIS MODULE: declaration refs, quantities, capacity                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── CHECK constraints                                                  │
//! │  ├── UNIQUE (tank_id, declaration_ref)                                  │
//! │  └── Foreign key constraints                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use aerofuel_core::validation::{validate_declaration_ref, validate_positive_mass};
//! use aerofuel_core::quantity::Mass;
//!
//! assert!(validate_declaration_ref("24FR000123456789A1").is_ok());
//! assert!(validate_positive_mass("mass", Mass::from_whole(1000)).is_ok());
//! ```

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::quantity::{Mass, Volume};
use crate::types::Tank;
use crate::{MAX_DECLARATION_REF_LEN, MAX_TANK_CODE_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a customs declaration reference (MRN).
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - No whitespace anywhere (references are compared byte-for-byte)
pub fn validate_declaration_ref(reference: &str) -> ValidationResult<()> {
    if reference.is_empty() {
        return Err(ValidationError::Required {
            field: "declaration_ref".to_string(),
        });
    }

    if reference.chars().count() > MAX_DECLARATION_REF_LEN {
        return Err(ValidationError::TooLong {
            field: "declaration_ref".to_string(),
            max: MAX_DECLARATION_REF_LEN,
        });
    }

    if reference.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidFormat {
            field: "declaration_ref".to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a tank code.
///
/// ## Rules
/// - Must not be empty
/// - At most 32 characters
/// - Letters, numbers, hyphens and underscores only
///
/// ## Example
/// ```rust
/// use aerofuel_core::validation::validate_tank_code;
///
/// assert!(validate_tank_code("TRK-7").is_ok());
/// assert!(validate_tank_code("").is_err());
/// assert!(validate_tank_code("tank 7").is_err());
/// ```
pub fn validate_tank_code(code: &str) -> ValidationResult<()> {
    let code = code.trim();

    if code.is_empty() {
        return Err(ValidationError::Required {
            field: "code".to_string(),
        });
    }

    if code.len() > MAX_TANK_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "code".to_string(),
            max: MAX_TANK_CODE_LEN,
        });
    }

    if !code
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "code".to_string(),
            reason: "must contain only letters, numbers, hyphens, and underscores".to_string(),
        });
    }

    Ok(())
}

/// Validates a fuel grade name ("JET-A1", "AVGAS-100LL").
pub fn validate_fuel_type(fuel_type: &str) -> ValidationResult<()> {
    let fuel_type = fuel_type.trim();

    if fuel_type.is_empty() {
        return Err(ValidationError::Required {
            field: "fuel_type".to_string(),
        });
    }

    if fuel_type.len() > MAX_TANK_CODE_LEN {
        return Err(ValidationError::TooLong {
            field: "fuel_type".to_string(),
            max: MAX_TANK_CODE_LEN,
        });
    }

    Ok(())
}

/// Validates a free-text field that must be filled in (actor, reason).
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Quantity Validators
// =============================================================================

pub fn validate_positive_mass(field: &str, mass: Mass) -> ValidationResult<()> {
    if !mass.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub fn validate_positive_volume(field: &str, volume: Volume) -> ValidationResult<()> {
    if !volume.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Checks that `additional` more litres fit in the tank.
///
/// ## Rule
/// ```text
/// declared_volume + additional ≤ capacity
/// ```
pub fn validate_capacity(tank: &Tank, additional: Volume) -> CoreResult<()> {
    let would_hold = tank.declared_volume + additional;
    if would_hold > tank.capacity {
        return Err(CoreError::CapacityExceeded {
            tank_id: tank.id.clone(),
            capacity: tank.capacity,
            would_hold,
        });
    }
    Ok(())
}

/// Validates a UUID string.
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    uuid::Uuid::parse_str(id).map_err(|e| ValidationError::InvalidFormat {
        field: "id".to_string(),
        reason: e.to_string(),
    })?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
