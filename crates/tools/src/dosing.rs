//! Weight-based dose calculation.

use caduceus_core::{Capability, CapabilityError, ToolArgs};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{positive, round_to};

/// Inputs for one weight-based dose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoseInput {
    pub weight_kg: f64,
    pub dose_mg_per_kg: f64,
    /// Ceiling for a single dose.
    pub max_dose_mg: Option<f64>,
    pub doses_per_day: Option<u32>,
    /// Solution strength, to express the dose as a volume.
    pub concentration_mg_per_ml: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DoseResult {
    pub dose_mg: f64,
    /// Whether `max_dose_mg` limited the dose.
    pub capped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_dose_mg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_ml: Option<f64>,
}

pub fn weight_based_dose(input: &DoseInput) -> Result<DoseResult, CapabilityError> {
    let weight_kg = positive("weight_kg", input.weight_kg)?;
    let per_kg = positive("dose_mg_per_kg", input.dose_mg_per_kg)?;
    let ceiling = input
        .max_dose_mg
        .map(|m| positive("max_dose_mg", m))
        .transpose()?;

    let raw = weight_kg * per_kg;
    let (dose, capped) = match ceiling {
        Some(max) if raw > max => (max, true),
        _ => (raw, false),
    };
    if capped {
        warn!(raw_mg = raw, dose_mg = dose, "Dose capped at maximum");
    }

    let daily_dose_mg = match input.doses_per_day {
        Some(0) => {
            return Err(CapabilityError::InvalidArguments(
                "doses_per_day must be at least 1".into(),
            ));
        }
        Some(n) => Some(round_to(dose * f64::from(n), 2)),
        None => None,
    };
    let volume_ml = input
        .concentration_mg_per_ml
        .map(|c| positive("concentration_mg_per_ml", c).map(|c| round_to(dose / c, 2)))
        .transpose()?;

    Ok(DoseResult {
        dose_mg: round_to(dose, 2),
        capped,
        daily_dose_mg,
        volume_ml,
    })
}

pub fn capability() -> Capability {
    Capability::from_fn(
        "weight_based_dose",
        "Compute a single dose from mg/kg and body weight, capped at a maximum, with optional daily total and volume.",
        json!({
            "type": "object",
            "properties": {
                "weight_kg": {"type": "number"},
                "dose_mg_per_kg": {"type": "number"},
                "max_dose_mg": {"type": "number", "description": "Maximum single dose"},
                "doses_per_day": {"type": "integer"},
                "concentration_mg_per_ml": {"type": "number"}
            },
            "required": ["weight_kg", "dose_mg_per_kg"]
        }),
        |args: ToolArgs| async move {
            let doses_per_day = match args.get("doses_per_day") {
                Some(_) => Some(u32::try_from(args.i64("doses_per_day")?).map_err(|_| {
                    CapabilityError::InvalidArguments("doses_per_day is out of range".into())
                })?),
                None => None,
            };
            let input = DoseInput {
                weight_kg: args.f64("weight_kg")?,
                dose_mg_per_kg: args.f64("dose_mg_per_kg")?,
                max_dose_mg: args.opt_f64("max_dose_mg"),
                doses_per_day,
                concentration_mg_per_ml: args.opt_f64("concentration_mg_per_ml"),
            };
            let result = weight_based_dose(&input)?;
            debug!(dose_mg = result.dose_mg, capped = result.capped, "Dose computed");
            Ok(result)
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(weight_kg: f64, dose_mg_per_kg: f64) -> DoseInput {
        DoseInput {
            weight_kg,
            dose_mg_per_kg,
            ..DoseInput::default()
        }
    }

    #[test]
    fn simple_dose() {
        let r = weight_based_dose(&input(20.0, 15.0)).unwrap();
        assert_eq!(r.dose_mg, 300.0);
        assert!(!r.capped);
        assert_eq!(r.daily_dose_mg, None);
    }

    #[test]
    fn capped_with_daily_total_and_volume() {
        let r = weight_based_dose(&DoseInput {
            max_dose_mg: Some(1000.0),
            doses_per_day: Some(4),
            concentration_mg_per_ml: Some(40.0),
            ..input(90.0, 15.0)
        })
        .unwrap();
        assert_eq!(r.dose_mg, 1000.0);
        assert!(r.capped);
        assert_eq!(r.daily_dose_mg, Some(4000.0));
        assert_eq!(r.volume_ml, Some(25.0));
    }

    #[test]
    fn rejects_invalid() {
        assert!(weight_based_dose(&input(-5.0, 10.0)).is_err());
        assert!(
            weight_based_dose(&DoseInput {
                doses_per_day: Some(0),
                ..input(20.0, 10.0)
            })
            .is_err()
        );
        assert!(
            weight_based_dose(&DoseInput {
                concentration_mg_per_ml: Some(0.0),
                ..input(20.0, 10.0)
            })
            .is_err()
        );
    }

    #[tokio::test]
    async fn capability_output_omits_absent_fields() {
        let args = ToolArgs::from_value(json!({"weight_kg": 12.5, "dose_mg_per_kg": 10})).unwrap();
        let out = capability().invoke(args).await.unwrap();
        assert_eq!(out, json!({"dose_mg": 125.0, "capped": false}));
    }
}
