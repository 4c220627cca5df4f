use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Store, StoreError, decode_document, into_map};
use crate::backend::{Document, FileUpload, Permission, Query};
use crate::health::{gestational_week, trimester};
use crate::models::{Profile, UpsertProfileRequest, UploadedFileResponse};

#[derive(Debug, Deserialize)]
struct ProfileRecord {
    user_id: String,
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    due_date: Option<NaiveDate>,
    #[serde(default)]
    pre_pregnancy_weight_kg: Option<f64>,
    #[serde(default)]
    height_cm: Option<f64>,
    #[serde(default)]
    blood_type: Option<String>,
    #[serde(default)]
    conditions: Vec<String>,
    #[serde(default)]
    emergency_contact: Option<String>,
    #[serde(default)]
    doctor_id: Option<String>,
    #[serde(default)]
    photo_file_id: Option<String>,
}

impl Store {
    pub async fn get_profile(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> Result<Option<Profile>, StoreError> {
        let document = self.get_optional(&self.collections.profiles, user_id).await?;
        document
            .map(|document| self.profile_from_document(&document, today))
            .transpose()
    }

    /// Creates the profile on first write; the document id is the user id.
    pub async fn upsert_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        request: &UpsertProfileRequest,
        today: NaiveDate,
    ) -> Result<Profile, StoreError> {
        validate_profile(request)?;

        let conditions = request
            .conditions
            .iter()
            .map(|condition| condition.trim())
            .filter(|condition| !condition.is_empty())
            .collect::<Vec<_>>();
        let data = into_map(json!({
            "user_id": user_id,
            "name": request.name.trim(),
            "email": email,
            "due_date": request.due_date.map(|date| date.to_string()),
            "pre_pregnancy_weight_kg": request.pre_pregnancy_weight_kg,
            "height_cm": request.height_cm,
            "blood_type": trimmed(request.blood_type.as_deref()),
            "conditions": conditions,
            "emergency_contact": trimmed(request.emergency_contact.as_deref()),
            "doctor_id": trimmed(request.doctor_id.as_deref()),
        }));

        let collection = &self.collections.profiles;
        let document = match self
            .documents
            .update_document(collection, user_id, data.clone())
            .await
        {
            Ok(document) => document,
            Err(err) if err.is_not_found() => {
                self.documents
                    .create_document(collection, Some(user_id), data, &Permission::owner(user_id))
                    .await?
            }
            Err(err) => return Err(err.into()),
        };

        self.profile_from_document(&document, today)
    }

    /// Replaces the profile photo; the previous file is deleted afterwards.
    pub async fn set_profile_photo(
        &self,
        user_id: &str,
        upload: FileUpload,
    ) -> Result<UploadedFileResponse, StoreError> {
        let collection = &self.collections.profiles;
        let document = self
            .get_optional(collection, user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let previous = photo_file_id(&document);

        let bucket = &self.buckets.profile_photos;
        let stored = self.store_file(bucket, user_id, upload).await?;
        if let Err(err) = self
            .documents
            .update_document(
                collection,
                user_id,
                into_map(json!({ "photo_file_id": stored.id })),
            )
            .await
        {
            self.discard_file(bucket, &stored.id).await;
            return Err(err.into());
        }

        if let Some(previous) = previous {
            self.discard_file(bucket, &previous).await;
        }

        Ok(UploadedFileResponse {
            url: self.file_url(bucket, &stored.id),
            file_id: stored.id,
        })
    }

    pub async fn remove_profile_photo(&self, user_id: &str) -> Result<(), StoreError> {
        let collection = &self.collections.profiles;
        let document = self
            .get_optional(collection, user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let Some(file_id) = photo_file_id(&document) else {
            return Ok(());
        };

        self.documents
            .update_document(collection, user_id, into_map(json!({ "photo_file_id": null })))
            .await?;
        self.discard_file(&self.buckets.profile_photos, &file_id)
            .await;
        Ok(())
    }

    /// Profiles whose `doctor_id` names the given doctor.
    pub async fn list_assigned_profiles(
        &self,
        doctor_id: &str,
        today: NaiveDate,
    ) -> Result<Vec<Profile>, StoreError> {
        let documents = self
            .list_all(
                &self.collections.profiles,
                &[Query::equal("doctor_id", doctor_id)],
            )
            .await?;
        let mut profiles = documents
            .iter()
            .map(|document| self.profile_from_document(document, today))
            .collect::<Result<Vec<_>, _>>()?;
        profiles.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(profiles)
    }

    fn profile_from_document(
        &self,
        document: &Document,
        today: NaiveDate,
    ) -> Result<Profile, StoreError> {
        let record: ProfileRecord = decode_document(document)?;
        let week = record.due_date.map(|due| gestational_week(due, today));
        let photo_url = record
            .photo_file_id
            .as_deref()
            .map(|file_id| self.file_url(&self.buckets.profile_photos, file_id));

        Ok(Profile {
            user_id: record.user_id,
            name: record.name,
            email: record.email,
            due_date: record.due_date,
            gestational_week: week,
            trimester: week.map(trimester),
            pre_pregnancy_weight_kg: record.pre_pregnancy_weight_kg,
            height_cm: record.height_cm,
            blood_type: record.blood_type,
            conditions: record.conditions,
            emergency_contact: record.emergency_contact,
            doctor_id: record.doctor_id,
            photo_file_id: record.photo_file_id,
            photo_url,
        })
    }
}

fn photo_file_id(document: &Document) -> Option<String> {
    document
        .data
        .get("photo_file_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn validate_profile(request: &UpsertProfileRequest) -> Result<(), StoreError> {
    let name_len = request.name.trim().chars().count();
    if !(1..=100).contains(&name_len) {
        return Err(StoreError::validation("name must be 1-100 characters"));
    }
    if let Some(weight) = request.pre_pregnancy_weight_kg
        && !(25.0..=300.0).contains(&weight)
    {
        return Err(StoreError::validation(
            "pre_pregnancy_weight_kg must be between 25 and 300",
        ));
    }
    if let Some(height) = request.height_cm
        && !(50.0..=250.0).contains(&height)
    {
        return Err(StoreError::validation("height_cm must be between 50 and 250"));
    }
    if request.conditions.len() > 20
        || request
            .conditions
            .iter()
            .any(|condition| condition.chars().count() > 100)
    {
        return Err(StoreError::validation(
            "conditions allows at most 20 entries of 100 characters",
        ));
    }
    if request
        .emergency_contact
        .as_deref()
        .is_some_and(|contact| contact.chars().count() > 200)
    {
        return Err(StoreError::validation(
            "emergency_contact must be at most 200 characters",
        ));
    }
    Ok(())
}
