use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use super::{Page, Store, StoreError, clamp_page_size, decode_document, stored_timestamp};
use crate::backend::{Document, FileUpload, Permission, Query};
use crate::health::{classify_blood_pressure, validate_reading};
use crate::models::{
    CreateReadingRequest, Reading, ReadingKind, ReadingValues, UploadedFileResponse,
};

const MAX_NOTES_CHARS: usize = 1_000;

impl Store {
    pub async fn create_reading(
        &self,
        user_id: &str,
        mut request: CreateReadingRequest,
        now: DateTime<Utc>,
    ) -> Result<Reading, StoreError> {
        // Reports are only attached through the upload path.
        if let ReadingValues::Bloodwork(values) = &mut request.values {
            values.report_file_id = None;
        }
        validate_reading(&request.values).map_err(|err| StoreError::validation(err.to_string()))?;
        let notes = request
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty());
        if notes.is_some_and(|notes| notes.chars().count() > MAX_NOTES_CHARS) {
            return Err(StoreError::validation("notes must be at most 1000 characters"));
        }
        let recorded_at = request.recorded_at.unwrap_or(now);
        if recorded_at > now + Duration::minutes(5) {
            return Err(StoreError::validation("recorded_at cannot be in the future"));
        }

        let kind = request.values.kind();
        let mut data = match serde_json::to_value(&request.values) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(StoreError::InvalidData(
                    "reading values did not serialize to an object".to_string(),
                ));
            }
        };
        // The collection already identifies the kind.
        data.remove("kind");
        data.insert("user_id".to_string(), Value::from(user_id));
        data.insert(
            "recorded_at".to_string(),
            Value::from(stored_timestamp(recorded_at)),
        );
        data.insert("notes".to_string(), notes.map_or(Value::Null, Value::from));

        let document = self
            .documents
            .create_document(
                self.reading_collection(kind),
                None,
                data,
                &Permission::owner(user_id),
            )
            .await?;
        self.reading_from_document(kind, &document)
    }

    /// Newest first, `limit` defaulting to 50 and capped at 100.
    pub async fn list_readings(
        &self,
        user_id: &str,
        kind: ReadingKind,
        limit: Option<usize>,
        cursor: Option<&str>,
    ) -> Result<Page<Reading>, StoreError> {
        let limit = clamp_page_size(limit);
        let queries = vec![
            Query::equal("user_id", user_id),
            Query::order_desc("recorded_at"),
            Query::limit(limit),
        ];
        let page = self
            .list_after_cursor(self.reading_collection(kind), queries, cursor)
            .await?;
        let items = page
            .documents
            .iter()
            .map(|document| self.reading_from_document(kind, document))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::from_documents(&page.documents, limit, items))
    }

    pub async fn latest_reading(
        &self,
        user_id: &str,
        kind: ReadingKind,
    ) -> Result<Option<Reading>, StoreError> {
        let page = self.list_readings(user_id, kind, Some(1), None).await?;
        Ok(page.items.into_iter().next())
    }

    pub async fn delete_reading(
        &self,
        user_id: &str,
        kind: ReadingKind,
        reading_id: &str,
    ) -> Result<(), StoreError> {
        let collection = self.reading_collection(kind);
        let document = self.get_owned(collection, reading_id, user_id).await?;
        self.documents.delete_document(collection, reading_id).await?;

        if let Some(file_id) = report_file_id(&document) {
            self.discard_file(&self.buckets.bloodwork_files, &file_id)
                .await;
        }
        Ok(())
    }

    /// Attaches a lab report to a bloodwork reading, replacing any earlier one.
    pub async fn attach_bloodwork_report(
        &self,
        user_id: &str,
        reading_id: &str,
        upload: FileUpload,
    ) -> Result<UploadedFileResponse, StoreError> {
        let collection = &self.collections.bloodwork;
        let document = self.get_owned(collection, reading_id, user_id).await?;
        let previous = report_file_id(&document);

        let bucket = &self.buckets.bloodwork_files;
        let stored = self.store_file(bucket, user_id, upload).await?;
        let mut data = serde_json::Map::new();
        data.insert("report_file_id".to_string(), Value::from(stored.id.clone()));
        if let Err(err) = self
            .documents
            .update_document(collection, reading_id, data)
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

    fn reading_from_document(
        &self,
        kind: ReadingKind,
        document: &Document,
    ) -> Result<Reading, StoreError> {
        let mut tagged = document.clone();
        tagged
            .data
            .insert("kind".to_string(), Value::from(kind.as_str()));
        let mut reading: Reading = decode_document(&tagged)?;

        match &reading.values {
            ReadingValues::BloodPressure(values) => {
                reading.category = Some(classify_blood_pressure(values));
            }
            ReadingValues::Bloodwork(values) => {
                reading.report_url = values
                    .report_file_id
                    .as_deref()
                    .map(|file_id| self.file_url(&self.buckets.bloodwork_files, file_id));
            }
            ReadingValues::BloodSugar(_) | ReadingValues::Weight(_) => {}
        }
        Ok(reading)
    }
}

fn report_file_id(document: &Document) -> Option<String> {
    document
        .data
        .get("report_file_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::backend::{FileUpload, MemoryBackend};
    use crate::models::{
        BloodPressureCategory, BloodPressureValues, BloodworkValues, CreateReadingRequest,
        ReadingKind, ReadingValues, WeightValues,
    };
    use crate::repos::{Store, StoreError};

    fn blood_pressure(systolic: u16, diastolic: u16) -> CreateReadingRequest {
        CreateReadingRequest {
            recorded_at: None,
            notes: Some("after walk".to_string()),
            values: ReadingValues::BloodPressure(BloodPressureValues {
                systolic,
                diastolic,
                pulse: Some(80),
            }),
        }
    }

    #[tokio::test]
    async fn blood_pressure_readings_carry_a_category() {
        let store = Store::in_memory(MemoryBackend::new());
        let reading = store
            .create_reading("u1", blood_pressure(142, 88), Utc::now())
            .await
            .expect("create reading");
        assert_eq!(reading.category, Some(BloodPressureCategory::HighStage2));
        assert_eq!(reading.values.kind(), ReadingKind::BloodPressure);
    }

    #[tokio::test]
    async fn lists_newest_first_with_cursor() {
        let store = Store::in_memory(MemoryBackend::new());
        let base = Utc.with_ymd_and_hms(2026, 9, 1, 8, 0, 0).unwrap();
        for day in 0..5 {
            let request = CreateReadingRequest {
                recorded_at: Some(base + Duration::days(day)),
                notes: None,
                values: ReadingValues::Weight(WeightValues {
                    weight_kg: 64.0 + day as f64,
                }),
            };
            store
                .create_reading("u1", request, base + Duration::days(10))
                .await
                .expect("create reading");
        }

        let first = store
            .list_readings("u1", ReadingKind::Weight, Some(3), None)
            .await
            .expect("first page");
        assert_eq!(first.items.len(), 3);
        assert_eq!(first.items[0].recorded_at, base + Duration::days(4));
        let cursor = first.next_cursor.expect("full page has a cursor");

        let second = store
            .list_readings("u1", ReadingKind::Weight, Some(3), Some(&cursor))
            .await
            .expect("second page");
        assert_eq!(second.items.len(), 2);
        assert!(second.next_cursor.is_none());
        assert_eq!(second.items[1].recorded_at, base);
    }

    #[tokio::test]
    async fn foreign_cursor_is_invalid_input() {
        let store = Store::in_memory(MemoryBackend::new());
        let theirs = store
            .create_reading("u2", blood_pressure(121, 79), Utc::now())
            .await
            .expect("create reading");

        assert!(matches!(
            store
                .list_readings("u1", ReadingKind::BloodPressure, None, Some(&theirs.id))
                .await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn other_users_cannot_delete_readings() {
        let store = Store::in_memory(MemoryBackend::new());
        let reading = store
            .create_reading("u1", blood_pressure(118, 76), Utc::now())
            .await
            .expect("create reading");

        assert!(matches!(
            store
                .delete_reading("u2", ReadingKind::BloodPressure, &reading.id)
                .await,
            Err(StoreError::NotFound)
        ));
        store
            .delete_reading("u1", ReadingKind::BloodPressure, &reading.id)
            .await
            .expect("owner delete");
        assert!(
            store
                .latest_reading("u1", ReadingKind::BloodPressure)
                .await
                .expect("latest")
                .is_none()
        );
    }

    #[tokio::test]
    async fn invalid_values_are_rejected() {
        let store = Store::in_memory(MemoryBackend::new());
        let err = store
            .create_reading("u1", blood_pressure(70, 95), Utc::now())
            .await
            .expect_err("inverted pressure should fail");
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn bloodwork_report_attaches_and_is_cleaned_up() {
        let backend = MemoryBackend::new();
        let store = Store::in_memory(backend.clone());
        let reading = store
            .create_reading(
                "u1",
                CreateReadingRequest {
                    recorded_at: None,
                    notes: None,
                    values: ReadingValues::Bloodwork(BloodworkValues {
                        test_name: "Ferritin".to_string(),
                        value: Some(18.0),
                        unit: Some("ng/mL".to_string()),
                        report_file_id: None,
                    }),
                },
                Utc::now(),
            )
            .await
            .expect("create bloodwork");

        let uploaded = store
            .attach_bloodwork_report(
                "u1",
                &reading.id,
                FileUpload {
                    file_name: "ferritin.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    bytes: b"%PDF-1.7".to_vec(),
                },
            )
            .await
            .expect("attach report");
        assert_eq!(backend.file_count("bloodwork_files"), 1);

        let latest = store
            .latest_reading("u1", ReadingKind::Bloodwork)
            .await
            .expect("latest")
            .expect("reading exists");
        assert_eq!(latest.report_url.as_deref(), Some(uploaded.url.as_str()));

        store
            .delete_reading("u1", ReadingKind::Bloodwork, &reading.id)
            .await
            .expect("delete bloodwork");
        assert_eq!(backend.file_count("bloodwork_files"), 0);
    }
}
