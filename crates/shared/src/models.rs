use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat turn; immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    /// RFC 3339 as stored; may be unparsable for legacy rows.
    pub timestamp: String,
}

/// Derived view of one conversation, recomputed on every list call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub preview: String,
    pub last_active: String,
    pub message_count: usize,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload, no data-URL prefix.
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendChatMessageRequest {
    pub text: String,
    #[serde(default)]
    pub image: Option<InlineImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendChatMessageResponse {
    pub session_id: String,
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChatSessionsResponse {
    pub items: Vec<SessionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSessionMessagesResponse {
    pub session_id: String,
    pub items: Vec<ChatMessage>,
}

/// Outcome of a best-effort multi-document deletion.
///
/// `incomplete` is set when the run stopped before every matching document
/// was visited, so more may remain beyond the counted ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDeleteSummary {
    pub deleted: usize,
    pub failed: usize,
    #[serde(default)]
    pub incomplete: bool,
}

impl BulkDeleteSummary {
    pub fn attempted(&self) -> usize {
        self.deleted + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0 && !self.incomplete
    }

    pub fn merge(&mut self, other: BulkDeleteSummary) {
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.incomplete |= other.incomplete;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub gestational_week: Option<u32>,
    pub trimester: Option<u8>,
    pub pre_pregnancy_weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub blood_type: Option<String>,
    pub conditions: Vec<String>,
    pub emergency_contact: Option<String>,
    pub doctor_id: Option<String>,
    pub photo_file_id: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertProfileRequest {
    pub name: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub pre_pregnancy_weight_kg: Option<f64>,
    #[serde(default)]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub blood_type: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
    #[serde(default)]
    pub doctor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFileResponse {
    pub file_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingKind {
    BloodPressure,
    BloodSugar,
    Weight,
    Bloodwork,
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 4] = [
        ReadingKind::BloodPressure,
        ReadingKind::BloodSugar,
        ReadingKind::Weight,
        ReadingKind::Bloodwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BloodPressure => "blood_pressure",
            Self::BloodSugar => "blood_sugar",
            Self::Weight => "weight",
            Self::Bloodwork => "bloodwork",
        }
    }

    /// Parses the URL path form (`blood-pressure`) or the wire form.
    pub fn from_path(value: &str) -> Option<Self> {
        match value {
            "blood-pressure" | "blood_pressure" => Some(Self::BloodPressure),
            "blood-sugar" | "blood_sugar" => Some(Self::BloodSugar),
            "weight" => Some(Self::Weight),
            "bloodwork" => Some(Self::Bloodwork),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SugarContext {
    Fasting,
    BeforeMeal,
    AfterMeal,
    Bedtime,
    Random,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BloodPressureCategory {
    Normal,
    Elevated,
    HighStage1,
    HighStage2,
    Crisis,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodPressureValues {
    pub systolic: u16,
    pub diastolic: u16,
    #[serde(default)]
    pub pulse: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodSugarValues {
    pub level_mg_dl: f64,
    pub context: SugarContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightValues {
    pub weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloodworkValues {
    pub test_name: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub report_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadingValues {
    BloodPressure(BloodPressureValues),
    BloodSugar(BloodSugarValues),
    Weight(WeightValues),
    Bloodwork(BloodworkValues),
}

impl ReadingValues {
    pub fn kind(&self) -> ReadingKind {
        match self {
            Self::BloodPressure(_) => ReadingKind::BloodPressure,
            Self::BloodSugar(_) => ReadingKind::BloodSugar,
            Self::Weight(_) => ReadingKind::Weight,
            Self::Bloodwork(_) => ReadingKind::Bloodwork,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reading {
    pub id: String,
    pub user_id: String,
    pub recorded_at: DateTime<Utc>,
    pub notes: Option<String>,
    #[serde(flatten)]
    pub values: ReadingValues,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<BloodPressureCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReadingRequest {
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub values: ReadingValues,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReadingsResponse {
    pub items: Vec<Reading>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub doctor_name: Option<String>,
    pub location: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub doctor_name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Option<AppointmentStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListAppointmentsResponse {
    pub upcoming: Vec<Appointment>,
    pub past: Vec<Appointment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteTargetKind {
    Topic,
    Post,
}

impl VoteTargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Post => "post",
        }
    }

    pub fn from_path(value: &str) -> Option<Self> {
        match value {
            "topics" | "topic" => Some(Self::Topic),
            "posts" | "post" => Some(Self::Post),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicSort {
    #[default]
    Newest,
    Top,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub title: String,
    pub body: String,
    pub category: Option<String>,
    pub score: i64,
    pub post_count: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub topic_id: String,
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub score: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTopicRequest {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePostRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    /// `None` removes the caller's vote.
    #[serde(default)]
    pub direction: Option<VoteDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub target_id: String,
    pub target_kind: VoteTargetKind,
    pub score: i64,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListTopicsResponse {
    pub items: Vec<Topic>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDetailResponse {
    pub topic: Topic,
    pub user_vote: Option<VoteDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPostsResponse {
    pub items: Vec<Post>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSummary {
    pub user_id: String,
    pub name: String,
    pub due_date: Option<NaiveDate>,
    pub gestational_week: Option<u32>,
    pub latest_blood_pressure: Option<Reading>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPatientsResponse {
    pub items: Vec<PatientSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientOverviewResponse {
    pub profile: Profile,
    pub latest_readings: Vec<Reading>,
    pub recent_blood_pressure: Vec<Reading>,
    pub upcoming_appointments: Vec<Appointment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
