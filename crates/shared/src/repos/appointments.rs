use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use super::{Store, StoreError, decode_document, into_map, stored_timestamp};
use crate::backend::{Permission, Query};
use crate::models::{
    Appointment, AppointmentStatus, CreateAppointmentRequest, ListAppointmentsResponse,
    UpdateAppointmentRequest,
};

const MAX_TITLE_CHARS: usize = 200;
const MAX_TEXT_CHARS: usize = 1_000;

impl Store {
    pub async fn create_appointment(
        &self,
        user_id: &str,
        request: &CreateAppointmentRequest,
    ) -> Result<Appointment, StoreError> {
        let title = validate_title(&request.title)?;
        for (field, value) in [
            ("doctor_name", &request.doctor_name),
            ("location", &request.location),
            ("notes", &request.notes),
        ] {
            validate_text(field, value.as_deref())?;
        }

        let data = json!({
            "user_id": user_id,
            "title": title,
            "scheduled_at": stored_timestamp(request.scheduled_at),
            "doctor_name": blank_to_none(request.doctor_name.as_deref()),
            "location": blank_to_none(request.location.as_deref()),
            "notes": blank_to_none(request.notes.as_deref()),
            "status": "scheduled",
        });
        let document = self
            .documents
            .create_document(
                &self.collections.appointments,
                None,
                into_map(data),
                &Permission::owner(user_id),
            )
            .await?;
        decode_document(&document)
    }

    /// Splits the user's appointments around `now`: upcoming soonest first,
    /// past most recent first. Cancelled visits always count as past.
    pub async fn list_appointments(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ListAppointmentsResponse, StoreError> {
        let documents = self
            .list_all(
                &self.collections.appointments,
                &[Query::equal("user_id", user_id)],
            )
            .await?;
        let appointments = documents
            .iter()
            .map(decode_document::<Appointment>)
            .collect::<Result<Vec<_>, _>>()?;

        let (mut upcoming, mut past): (Vec<_>, Vec<_>) =
            appointments.into_iter().partition(|appointment| {
                appointment.scheduled_at >= now
                    && appointment.status == AppointmentStatus::Scheduled
            });
        upcoming.sort_by_key(|appointment| appointment.scheduled_at);
        past.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));

        Ok(ListAppointmentsResponse { upcoming, past })
    }

    pub async fn upcoming_appointments(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Appointment>, StoreError> {
        let mut upcoming = self.list_appointments(user_id, now).await?.upcoming;
        upcoming.truncate(limit);
        Ok(upcoming)
    }

    pub async fn update_appointment(
        &self,
        user_id: &str,
        appointment_id: &str,
        request: &UpdateAppointmentRequest,
    ) -> Result<Appointment, StoreError> {
        let collection = &self.collections.appointments;
        self.get_owned(collection, appointment_id, user_id).await?;

        let mut data = Map::new();
        if let Some(title) = &request.title {
            data.insert("title".to_string(), Value::from(validate_title(title)?));
        }
        if let Some(scheduled_at) = request.scheduled_at {
            data.insert(
                "scheduled_at".to_string(),
                Value::from(stored_timestamp(scheduled_at)),
            );
        }
        for (field, value) in [
            ("doctor_name", &request.doctor_name),
            ("location", &request.location),
            ("notes", &request.notes),
        ] {
            if let Some(value) = value.as_deref() {
                validate_text(field, Some(value))?;
                data.insert(
                    field.to_string(),
                    blank_to_none(Some(value)).map_or(Value::Null, Value::from),
                );
            }
        }
        if let Some(status) = request.status {
            data.insert("status".to_string(), json!(status));
        }
        if data.is_empty() {
            return Err(StoreError::validation("no fields to update"));
        }

        let document = self
            .documents
            .update_document(collection, appointment_id, data)
            .await?;
        decode_document(&document)
    }

    pub async fn delete_appointment(
        &self,
        user_id: &str,
        appointment_id: &str,
    ) -> Result<(), StoreError> {
        let collection = &self.collections.appointments;
        self.get_owned(collection, appointment_id, user_id).await?;
        self.documents
            .delete_document(collection, appointment_id)
            .await?;
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<&str, StoreError> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(StoreError::validation("title must be 1-200 characters"));
    }
    Ok(title)
}

fn validate_text(field: &str, value: Option<&str>) -> Result<(), StoreError> {
    if value.is_some_and(|value| value.chars().count() > MAX_TEXT_CHARS) {
        return Err(StoreError::validation(format!(
            "{field} must be at most 1000 characters"
        )));
    }
    Ok(())
}

fn blank_to_none(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}
