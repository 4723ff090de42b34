//! Body-mass index.

use caduceus_core::{Capability, CapabilityError, ToolArgs};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::{positive, round_to};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BmiResult {
    pub bmi: f64,
    /// WHO adult category.
    pub category: &'static str,
}

/// `weight / height²`, rounded to one decimal.
pub fn bmi(weight_kg: f64, height_m: f64) -> Result<BmiResult, CapabilityError> {
    let weight_kg = positive("weight_kg", weight_kg)?;
    let height_m = positive("height_m", height_m)?;
    if height_m > 3.0 {
        return Err(CapabilityError::InvalidArguments(format!(
            "height_m {height_m} is implausible; was centimetres meant?"
        )));
    }

    let value = weight_kg / (height_m * height_m);
    Ok(BmiResult {
        bmi: round_to(value, 1),
        category: category(value),
    })
}

fn category(bmi: f64) -> &'static str {
    match bmi {
        b if b < 18.5 => "underweight",
        b if b < 25.0 => "normal",
        b if b < 30.0 => "overweight",
        b if b < 35.0 => "obese class I",
        b if b < 40.0 => "obese class II",
        _ => "obese class III",
    }
}

pub fn capability() -> Capability {
    Capability::from_fn(
        "bmi",
        "Compute body-mass index and its WHO category from weight and height.",
        json!({
            "type": "object",
            "properties": {
                "weight_kg": {"type": "number", "description": "Body weight in kilograms"},
                "height_m": {"type": "number", "description": "Height in metres"},
                "height_cm": {"type": "number", "description": "Height in centimetres, if height_m is not given"}
            },
            "required": ["weight_kg"]
        }),
        |args: ToolArgs| async move {
            let height_m = match args.opt_f64("height_m") {
                Some(m) => m,
                None => args.f64("height_cm")? / 100.0,
            };
            let result = bmi(args.f64("weight_kg")?, height_m)?;
            debug!(bmi = result.bmi, "BMI computed");
            Ok(result)
        },
    )
}
