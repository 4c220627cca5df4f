mod support;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use serial_test::serial;

use support::{OTHER_PATIENT, PATIENT, TestApp, error_code, request, upload_request};

#[tokio::test]
#[serial]
async fn profile_is_created_on_first_write_and_derives_pregnancy_stage() {
    let app = TestApp::new();

    let missing = app
        .send(request(Method::GET, "/v1/profile", Some(PATIENT), None))
        .await;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);

    let due_date = (Utc::now().date_naive() + Duration::weeks(20)).to_string();
    let saved = app
        .send(request(
            Method::PUT,
            "/v1/profile",
            Some(PATIENT),
            Some(json!({
                "name": " Mia Santos ",
                "due_date": due_date,
                "height_cm": 165.0,
                "conditions": ["gestational diabetes", "  "],
                "blood_type": "O+"
            })),
        ))
        .await;
    assert_eq!(saved.status, StatusCode::OK);
    assert_eq!(saved.body["name"], "Mia Santos");
    assert_eq!(saved.body["email"], "mia@example.com");
    assert_eq!(saved.body["gestational_week"], 20);
    assert_eq!(saved.body["trimester"], 2);
    assert_eq!(saved.body["conditions"], json!(["gestational diabetes"]));

    let fetched = app
        .send(request(Method::GET, "/v1/profile", Some(PATIENT), None))
        .await;
    assert_eq!(fetched.status, StatusCode::OK);
    assert_eq!(fetched.body["blood_type"], "O+");

    let invalid = app
        .send(request(
            Method::PUT,
            "/v1/profile",
            Some(PATIENT),
            Some(json!({ "name": "Mia", "height_cm": 20.0 })),
        ))
        .await;
    assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn profile_photo_replacement_removes_the_previous_file() {
    let app = TestApp::new();
    app.send(request(
        Method::PUT,
        "/v1/profile",
        Some(PATIENT),
        Some(json!({ "name": "Mia Santos" })),
    ))
    .await;

    let first = app
        .send(upload_request(
            Method::PUT,
            "/v1/profile/photo",
            PATIENT,
            "image/png",
            b"\x89PNG first",
        ))
        .await;
    assert_eq!(first.status, StatusCode::OK);
    let first_id = first.body["file_id"].as_str().expect("file id").to_string();
    assert!(
        first.body["url"]
            .as_str()
            .is_some_and(|url| url.contains(&first_id))
    );

    let second = app
        .send(upload_request(
            Method::PUT,
            "/v1/profile/photo",
            PATIENT,
            "image/jpeg",
            b"\xff\xd8 second",
        ))
        .await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(app.backend.file_count("profile_photos"), 1);

    let profile = app
        .send(request(Method::GET, "/v1/profile", Some(PATIENT), None))
        .await;
    assert_eq!(profile.body["photo_file_id"], second.body["file_id"]);

    let removed = app
        .send(request(
            Method::DELETE,
            "/v1/profile/photo",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(removed.status, StatusCode::OK);
    assert_eq!(app.backend.file_count("profile_photos"), 0);
}

#[tokio::test]
#[serial]
async fn uploads_must_be_images_or_pdfs() {
    let app = TestApp::new();
    app.send(request(
        Method::PUT,
        "/v1/profile",
        Some(PATIENT),
        Some(json!({ "name": "Mia Santos" })),
    ))
    .await;

    let rejected = app
        .send(upload_request(
            Method::PUT,
            "/v1/profile/photo",
            PATIENT,
            "application/zip",
            b"PK\x03\x04",
        ))
        .await;
    assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&rejected.body), Some("invalid_request"));
    assert_eq!(app.backend.file_count("profile_photos"), 0);
}

#[tokio::test]
#[serial]
async fn blood_pressure_readings_are_classified_and_listed_newest_first() {
    let app = TestApp::new();
    let now = Utc::now();
    for (systolic, diastolic, hours_ago) in [(118, 76, 48), (142, 92, 24), (126, 78, 1)] {
        let created = app
            .send(request(
                Method::POST,
                "/v1/readings/blood-pressure",
                Some(PATIENT),
                Some(json!({
                    "systolic": systolic,
                    "diastolic": diastolic,
                    "recorded_at": (now - Duration::hours(hours_ago)).to_rfc3339(),
                })),
            ))
            .await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.body["kind"], "blood_pressure");
    }

    let listed = app
        .send(request(
            Method::GET,
            "/v1/readings/blood-pressure?limit=2",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    let items = listed.body["items"].as_array().expect("items array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["systolic"], 126);
    assert_eq!(items[0]["category"], "elevated");
    assert_eq!(items[1]["category"], "high_stage2");
    let cursor = listed.body["next_cursor"].as_str().expect("cursor");

    let rest = app
        .send(request(
            Method::GET,
            &format!("/v1/readings/blood-pressure?limit=2&cursor={cursor}"),
            Some(PATIENT),
            None,
        ))
        .await;
    let items = rest.body["items"].as_array().expect("items array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["category"], "normal");
    assert_eq!(rest.body["next_cursor"], Value::Null);

    let others = app
        .send(request(
            Method::GET,
            "/v1/readings/blood-pressure",
            Some(OTHER_PATIENT),
            None,
        ))
        .await;
    assert_eq!(others.body["items"], json!([]));
}

#[tokio::test]
#[serial]
async fn stale_cursors_are_rejected_as_bad_input() {
    let app = TestApp::new();
    let mut ids = Vec::new();
    for weight in [66.0, 66.4] {
        let created = app
            .send(request(
                Method::POST,
                "/v1/readings/weight",
                Some(PATIENT),
                Some(json!({ "weight_kg": weight })),
            ))
            .await;
        ids.push(created.body["id"].as_str().expect("reading id").to_string());
    }
    let removed = app
        .send(request(
            Method::DELETE,
            &format!("/v1/readings/weight/{}", ids[0]),
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(removed.status, StatusCode::OK);

    let stale = app
        .send(request(
            Method::GET,
            &format!("/v1/readings/weight?cursor={}", ids[0]),
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(stale.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&stale.body), Some("invalid_request"));

    let made_up = app
        .send(request(
            Method::GET,
            "/v1/forum/topics?cursor=no-such-topic",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(made_up.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn readings_are_validated_against_their_kind() {
    let app = TestApp::new();

    let inverted = app
        .send(request(
            Method::POST,
            "/v1/readings/blood-pressure",
            Some(PATIENT),
            Some(json!({ "systolic": 70, "diastolic": 90 })),
        ))
        .await;
    assert_eq!(inverted.status, StatusCode::BAD_REQUEST);

    let mismatched = app
        .send(request(
            Method::POST,
            "/v1/readings/weight",
            Some(PATIENT),
            Some(json!({ "kind": "blood_sugar", "level_mg_dl": 95.0, "context": "fasting" })),
        ))
        .await;
    assert_eq!(mismatched.status, StatusCode::BAD_REQUEST);

    let unknown = app
        .send(request(
            Method::GET,
            "/v1/readings/cholesterol",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let sugar = app
        .send(request(
            Method::POST,
            "/v1/readings/blood-sugar",
            Some(PATIENT),
            Some(json!({ "level_mg_dl": 92.5, "context": "fasting", "notes": "before breakfast" })),
        ))
        .await;
    assert_eq!(sugar.status, StatusCode::CREATED);
    assert_eq!(sugar.body["context"], "fasting");
}

#[tokio::test]
#[serial]
async fn bloodwork_reports_attach_to_the_owners_reading() {
    let app = TestApp::new();
    let reading = app
        .send(request(
            Method::POST,
            "/v1/readings/bloodwork",
            Some(PATIENT),
            Some(json!({ "test_name": "Ferritin", "value": 18.0, "unit": "ng/mL" })),
        ))
        .await;
    assert_eq!(reading.status, StatusCode::CREATED);
    let reading_id = reading.body["id"].as_str().expect("reading id");

    let attached = app
        .send(upload_request(
            Method::POST,
            &format!("/v1/readings/bloodwork/{reading_id}/report"),
            PATIENT,
            "application/pdf",
            b"%PDF-1.7 lab results",
        ))
        .await;
    assert_eq!(attached.status, StatusCode::OK);
    assert_eq!(app.backend.file_count("bloodwork_files"), 1);

    let stranger = app
        .send(upload_request(
            Method::POST,
            &format!("/v1/readings/bloodwork/{reading_id}/report"),
            OTHER_PATIENT,
            "application/pdf",
            b"%PDF-1.7 not mine",
        ))
        .await;
    assert_eq!(stranger.status, StatusCode::NOT_FOUND);

    let wrong_kind = app
        .send(upload_request(
            Method::POST,
            &format!("/v1/readings/weight/{reading_id}/report"),
            PATIENT,
            "application/pdf",
            b"%PDF-1.7",
        ))
        .await;
    assert_eq!(wrong_kind.status, StatusCode::NOT_FOUND);

    let listed = app
        .send(request(
            Method::GET,
            "/v1/readings/bloodwork",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(
        listed.body["items"][0]["report_file_id"],
        attached.body["file_id"]
    );

    let deleted = app
        .send(request(
            Method::DELETE,
            &format!("/v1/readings/bloodwork/{reading_id}"),
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(app.backend.document_count("bloodwork"), 0);
}

#[tokio::test]
#[serial]
async fn appointments_split_into_upcoming_and_past() {
    let app = TestApp::new();
    let now = Utc::now();
    let mut ids = Vec::new();
    for (title, offset) in [
        ("Glucose screening", Duration::days(7)),
        ("Anatomy scan", Duration::days(-14)),
        ("Midwife check-in", Duration::days(2)),
    ] {
        let created = app
            .send(request(
                Method::POST,
                "/v1/appointments",
                Some(PATIENT),
                Some(json!({
                    "title": title,
                    "scheduled_at": (now + offset).to_rfc3339(),
                    "location": "Riverside Clinic"
                })),
            ))
            .await;
        assert_eq!(created.status, StatusCode::CREATED);
        assert_eq!(created.body["status"], "scheduled");
        ids.push(created.body["id"].as_str().expect("id").to_string());
    }

    let cancelled = app
        .send(request(
            Method::PUT,
            &format!("/v1/appointments/{}", ids[0]),
            Some(PATIENT),
            Some(json!({ "status": "cancelled" })),
        ))
        .await;
    assert_eq!(cancelled.status, StatusCode::OK);
    assert_eq!(cancelled.body["title"], "Glucose screening");

    let listed = app
        .send(request(Method::GET, "/v1/appointments", Some(PATIENT), None))
        .await;
    let upcoming = listed.body["upcoming"].as_array().expect("upcoming");
    let past = listed.body["past"].as_array().expect("past");
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0]["title"], "Midwife check-in");
    assert_eq!(past.len(), 2);
    assert_eq!(past[0]["title"], "Glucose screening");

    let foreign = app
        .send(request(
            Method::DELETE,
            &format!("/v1/appointments/{}", ids[2]),
            Some(OTHER_PATIENT),
            None,
        ))
        .await;
    assert_eq!(foreign.status, StatusCode::NOT_FOUND);

    let deleted = app
        .send(request(
            Method::DELETE,
            &format!("/v1/appointments/{}", ids[2]),
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(deleted.status, StatusCode::OK);
    assert_eq!(deleted.body, json!({ "ok": true }));
}
