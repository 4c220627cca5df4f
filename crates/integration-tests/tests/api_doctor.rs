mod support;

use axum::http::{Method, StatusCode};
use chrono::{Duration, Utc};
use serde_json::json;
use serial_test::serial;

use support::{DOCTOR, OTHER_PATIENT, PATIENT, TestApp, error_code, request};

async fn assign_patient(app: &TestApp, user_id: &str, name: &str, doctor_id: &str) {
    let saved = app
        .send(request(
            Method::PUT,
            "/v1/profile",
            Some(user_id),
            Some(json!({
                "name": name,
                "due_date": (Utc::now().date_naive() + Duration::weeks(12)).to_string(),
                "doctor_id": doctor_id
            })),
        ))
        .await;
    assert_eq!(saved.status, StatusCode::OK);
}

#[tokio::test]
#[serial]
async fn patients_cannot_open_the_dashboard() {
    let app = TestApp::new();
    let denied = app
        .send(request(
            Method::GET,
            "/v1/doctor/patients",
            Some(PATIENT),
            None,
        ))
        .await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&denied.body), Some("forbidden"));
}

#[tokio::test]
#[serial]
async fn doctor_sees_only_assigned_patients_with_latest_pressure() {
    let app = TestApp::new();
    assign_patient(&app, PATIENT, "Mia Santos", DOCTOR).await;
    assign_patient(&app, OTHER_PATIENT, "Ana Ruiz", "dr-someone-else").await;

    let now = Utc::now();
    for (systolic, hours_ago) in [(150, 30), (124, 2)] {
        app.send(request(
            Method::POST,
            "/v1/readings/blood-pressure",
            Some(PATIENT),
            Some(json!({
                "systolic": systolic,
                "diastolic": 78,
                "recorded_at": (now - Duration::hours(hours_ago)).to_rfc3339()
            })),
        ))
        .await;
    }

    let listed = app
        .send(request(Method::GET, "/v1/doctor/patients", Some(DOCTOR), None))
        .await;
    assert_eq!(listed.status, StatusCode::OK);
    let items = listed.body["items"].as_array().expect("items array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["user_id"], PATIENT);
    assert_eq!(items[0]["gestational_week"], 28);
    assert_eq!(items[0]["latest_blood_pressure"]["systolic"], 124);
}

#[tokio::test]
#[serial]
async fn overview_collects_readings_and_upcoming_appointments() {
    let app = TestApp::new();
    assign_patient(&app, PATIENT, "Mia Santos", DOCTOR).await;
    assign_patient(&app, OTHER_PATIENT, "Ana Ruiz", "dr-someone-else").await;

    app.send(request(
        Method::POST,
        "/v1/readings/weight",
        Some(PATIENT),
        Some(json!({ "weight_kg": 68.4 })),
    ))
    .await;
    app.send(request(
        Method::POST,
        "/v1/readings/blood-pressure",
        Some(PATIENT),
        Some(json!({ "systolic": 132, "diastolic": 84 })),
    ))
    .await;
    app.send(request(
        Method::POST,
        "/v1/appointments",
        Some(PATIENT),
        Some(json!({
            "title": "Growth scan",
            "scheduled_at": (Utc::now() + Duration::days(5)).to_rfc3339()
        })),
    ))
    .await;

    let overview = app
        .send(request(
            Method::GET,
            &format!("/v1/doctor/patients/{PATIENT}"),
            Some(DOCTOR),
            None,
        ))
        .await;
    assert_eq!(overview.status, StatusCode::OK);
    assert_eq!(overview.body["profile"]["name"], "Mia Santos");
    assert_eq!(
        overview.body["latest_readings"]
            .as_array()
            .expect("latest readings")
            .len(),
        2
    );
    assert_eq!(
        overview.body["recent_blood_pressure"][0]["category"],
        "high_stage1"
    );
    assert_eq!(
        overview.body["upcoming_appointments"][0]["title"],
        "Growth scan"
    );

    let unassigned = app
        .send(request(
            Method::GET,
            &format!("/v1/doctor/patients/{OTHER_PATIENT}"),
            Some(DOCTOR),
            None,
        ))
        .await;
    assert_eq!(unassigned.status, StatusCode::NOT_FOUND);
}
