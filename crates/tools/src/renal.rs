//! Creatinine clearance by the Cockcroft-Gault equation.

use caduceus_core::{Capability, CapabilityError, ToolArgs};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::{positive, round_to};

/// µmol/L per mg/dL of creatinine.
pub const CREATININE_UMOL_PER_MG_DL: f64 = 88.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "m" | "male" | "man" => Some(Self::Male),
            "f" | "female" | "woman" => Some(Self::Female),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClearanceResult {
    pub crcl_ml_min: f64,
    /// Dosing band commonly used in drug labelling.
    pub renal_function: &'static str,
}

/// `((140 - age) × weight) / (72 × SCr)`, × 0.85 for women.
pub fn creatinine_clearance(
    age_years: f64,
    weight_kg: f64,
    serum_creatinine_mg_dl: f64,
    sex: Sex,
) -> Result<ClearanceResult, CapabilityError> {
    if !(18.0..=120.0).contains(&age_years) {
        return Err(CapabilityError::InvalidArguments(format!(
            "age_years must be between 18 and 120, got {age_years}"
        )));
    }
    let weight_kg = positive("weight_kg", weight_kg)?;
    let scr = positive("serum_creatinine_mg_dl", serum_creatinine_mg_dl)?;

    let mut crcl = ((140.0 - age_years) * weight_kg) / (72.0 * scr);
    if sex == Sex::Female {
        crcl *= 0.85;
    }
    Ok(ClearanceResult {
        crcl_ml_min: round_to(crcl, 1),
        renal_function: band(crcl),
    })
}

fn band(crcl: f64) -> &'static str {
    match crcl {
        c if c >= 60.0 => "normal or mild impairment",
        c if c >= 30.0 => "moderate impairment",
        c if c >= 15.0 => "severe impairment",
        _ => "kidney failure",
    }
}

pub fn capability() -> Capability {
    Capability::from_fn(
        "creatinine_clearance",
        "Estimate creatinine clearance (mL/min) with the Cockcroft-Gault equation.",
        json!({
            "type": "object",
            "properties": {
                "age_years": {"type": "number"},
                "weight_kg": {"type": "number", "description": "Actual body weight in kilograms"},
                "sex": {"type": "string", "enum": ["male", "female"]},
                "serum_creatinine_mg_dl": {"type": "number"},
                "serum_creatinine_umol_l": {"type": "number", "description": "Used when mg/dL is not given"}
            },
            "required": ["age_years", "weight_kg", "sex"]
        }),
        |args: ToolArgs| async move {
            let sex = args.str("sex")?;
            let sex = Sex::parse(sex).ok_or_else(|| {
                CapabilityError::InvalidArguments(format!("sex must be male or female, got '{sex}'"))
            })?;
            let scr = match args.opt_f64("serum_creatinine_mg_dl") {
                Some(mg_dl) => mg_dl,
                None => args.f64("serum_creatinine_umol_l")? / CREATININE_UMOL_PER_MG_DL,
            };
            let result =
                creatinine_clearance(args.f64("age_years")?, args.f64("weight_kg")?, scr, sex)?;
            debug!(crcl = result.crcl_ml_min, "Creatinine clearance computed");
            Ok(result)
        },
    )
}
