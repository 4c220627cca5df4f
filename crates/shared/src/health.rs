use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{BloodPressureCategory, BloodPressureValues, ReadingValues};

const FULL_TERM_WEEKS: i64 = 40;
const MAX_GESTATIONAL_WEEK: i64 = 42;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{field} {message}")]
pub struct ReadingValidationError {
    pub field: &'static str,
    pub message: String,
}

/// Completed gestational weeks on `today` for a pregnancy due on `due_date`.
pub fn gestational_week(due_date: NaiveDate, today: NaiveDate) -> u32 {
    let days_until_due = (due_date - today).num_days();
    let week = if days_until_due <= 0 {
        FULL_TERM_WEEKS + (-days_until_due) / 7
    } else {
        FULL_TERM_WEEKS - (days_until_due + 6) / 7
    };
    week.clamp(0, MAX_GESTATIONAL_WEEK) as u32
}

pub fn trimester(week: u32) -> u8 {
    match week {
        0..=13 => 1,
        14..=27 => 2,
        _ => 3,
    }
}

pub fn classify_blood_pressure(values: &BloodPressureValues) -> BloodPressureCategory {
    let (systolic, diastolic) = (values.systolic, values.diastolic);
    if systolic > 180 || diastolic > 120 {
        BloodPressureCategory::Crisis
    } else if systolic >= 140 || diastolic >= 90 {
        BloodPressureCategory::HighStage2
    } else if systolic >= 130 || diastolic >= 80 {
        BloodPressureCategory::HighStage1
    } else if systolic >= 120 {
        BloodPressureCategory::Elevated
    } else {
        BloodPressureCategory::Normal
    }
}

pub fn validate_reading(values: &ReadingValues) -> Result<(), ReadingValidationError> {
    match values {
        ReadingValues::BloodPressure(bp) => {
            check_range("systolic", f64::from(bp.systolic), 50.0, 260.0)?;
            check_range("diastolic", f64::from(bp.diastolic), 30.0, 160.0)?;
            if bp.systolic <= bp.diastolic {
                return Err(ReadingValidationError {
                    field: "systolic",
                    message: "must be greater than diastolic".to_string(),
                });
            }
            if let Some(pulse) = bp.pulse {
                check_range("pulse", f64::from(pulse), 30.0, 220.0)?;
            }
            Ok(())
        }
        ReadingValues::BloodSugar(sugar) => {
            check_range("level_mg_dl", sugar.level_mg_dl, 20.0, 600.0)
        }
        ReadingValues::Weight(weight) => check_range("weight_kg", weight.weight_kg, 25.0, 300.0),
        ReadingValues::Bloodwork(bloodwork) => {
            let name = bloodwork.test_name.trim();
            if name.is_empty() || name.chars().count() > 120 {
                return Err(ReadingValidationError {
                    field: "test_name",
                    message: "must be 1-120 characters".to_string(),
                });
            }
            if let Some(value) = bloodwork.value
                && !value.is_finite()
            {
                return Err(ReadingValidationError {
                    field: "value",
                    message: "must be a finite number".to_string(),
                });
            }
            Ok(())
        }
    }
}

fn check_range(
    field: &'static str,
    value: f64,
    min: f64,
    max: f64,
) -> Result<(), ReadingValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        return Ok(());
    }
    Err(ReadingValidationError {
        field,
        message: format!("must be between {min} and {max}"),
    })
}
