use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Credentials;
use crate::error::Result;

pub mod http;
pub mod memory;
pub mod retry;
pub mod session;

pub const SESSION_TOKEN_HEADER: &str = "X-Tidepool-Session-Token";

/// Authenticated context returned by login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    /// Account id of the logged-in user, when the login body carries it.
    pub user_id: Option<String>,
}

/// Body of a create-patient request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub password: String,
    pub birth_date: String,
    pub full_name: String,
    pub tags: Vec<String>,
    pub connect_dexcom: bool,
}

impl NewPatient {
    pub fn placeholder(full_name: String, password: &str) -> Self {
        Self {
            password: password.to_string(),
            birth_date: "2000-01-01".to_string(),
            full_name,
            tags: Vec::new(),
            connect_dexcom: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Remote operations of the clinical data platform.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn login(&self, creds: &Credentials) -> Result<Session>;

    async fn create_patient(&self, session: &Session, clinic_id: &str, patient: &NewPatient) -> Result<PatientRecord>;

    async fn assign_tag(&self, session: &Session, clinic_id: &str, tag_id: &str, patient_ids: &[String]) -> Result<u16>;

    /// Whether the clinic already lists the patient.
    async fn patient_visible(&self, session: &Session, clinic_id: &str, patient_id: &str) -> Result<bool>;

    /// Opens a dataset for `user_id` and returns its id.
    async fn create_dataset(&self, session: &Session, user_id: &str, metadata: &Value) -> Result<String>;

    async fn upload_data(&self, session: &Session, dataset_id: &str, payload: &Value) -> Result<u16>;

    async fn close_dataset(&self, session: &Session, dataset_id: &str) -> Result<u16>;

    async fn delete_user(&self, session: &Session, user_id: &str, password: &str) -> Result<u16>;

    /// Removes a claimed patient from a clinic; `password` is the account's.
    async fn delete_clinic_patient(&self, session: &Session, clinic_id: &str, patient_id: &str, password: &str) -> Result<u16>;
}
