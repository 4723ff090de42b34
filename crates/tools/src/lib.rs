//! Built-in clinical calculators for Caduceus.
//!
//! Each module exposes a pure function and a [`Capability`] wrapping it, so
//! the agent loop can ask for a computation instead of doing arithmetic in
//! its head. Inputs are validated; out-of-range values come back as
//! [`CapabilityError::InvalidArguments`] and reach the model as an
//! observation.

pub mod bmi;
pub mod dosing;
pub mod renal;

use caduceus_core::{Capability, CapabilityError, CapabilityRegistry};

/// Create a registry with every built-in calculator.
pub fn default_registry() -> CapabilityRegistry {
    builtins()
        .into_iter()
        .fold(CapabilityRegistry::new(), CapabilityRegistry::with)
}

/// The built-in calculators, in registration order.
pub fn builtins() -> Vec<Capability> {
    vec![bmi::capability(), renal::capability(), dosing::capability()]
}

/// Reject zero, negative, and non-finite values.
pub(crate) fn positive(name: &str, value: f64) -> Result<f64, CapabilityError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(CapabilityError::InvalidArguments(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
