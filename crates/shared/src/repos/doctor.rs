use chrono::{DateTime, Utc};

use super::{Store, StoreError};
use crate::models::{PatientOverviewResponse, PatientSummary, ReadingKind};

const RECENT_BLOOD_PRESSURE: usize = 5;
const UPCOMING_APPOINTMENTS: usize = 5;

impl Store {
    /// Patients whose profile names `doctor_id`, each with the latest
    /// blood pressure reading.
    pub async fn list_patients(
        &self,
        doctor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PatientSummary>, StoreError> {
        let profiles = self
            .list_assigned_profiles(doctor_id, now.date_naive())
            .await?;

        let mut patients = Vec::with_capacity(profiles.len());
        for profile in profiles {
            let latest_blood_pressure = self
                .latest_reading(&profile.user_id, ReadingKind::BloodPressure)
                .await?;
            patients.push(PatientSummary {
                user_id: profile.user_id,
                name: profile.name,
                due_date: profile.due_date,
                gestational_week: profile.gestational_week,
                latest_blood_pressure,
            });
        }
        Ok(patients)
    }

    /// Read-only view of one patient. Unassigned patients look missing.
    pub async fn patient_overview(
        &self,
        doctor_id: &str,
        patient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PatientOverviewResponse, StoreError> {
        let profile = self
            .get_profile(patient_id, now.date_naive())
            .await?
            .filter(|profile| profile.doctor_id.as_deref() == Some(doctor_id))
            .ok_or(StoreError::NotFound)?;

        let mut latest_readings = Vec::new();
        for kind in ReadingKind::ALL {
            if let Some(reading) = self.latest_reading(patient_id, kind).await? {
                latest_readings.push(reading);
            }
        }
        let recent_blood_pressure = self
            .list_readings(
                patient_id,
                ReadingKind::BloodPressure,
                Some(RECENT_BLOOD_PRESSURE),
                None,
            )
            .await?
            .items;
        let upcoming_appointments = self
            .upcoming_appointments(patient_id, now, UPCOMING_APPOINTMENTS)
            .await?;

        Ok(PatientOverviewResponse {
            profile,
            latest_readings,
            recent_blood_pressure,
            upcoming_appointments,
        })
    }
}
