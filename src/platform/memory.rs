//! In-memory platform used for dry runs and tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Credentials;
use crate::error::{Result, SeedError};
use crate::platform::{NewPatient, PatientRecord, PlatformApi, Session};

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Login,
    CreatePatient { clinic_id: String, full_name: String },
    AssignTag { tag_id: String, patient_ids: Vec<String> },
    PatientVisible { patient_id: String },
    CreateDataset { user_id: String, metadata: Value },
    UploadData { dataset_id: String, points: usize },
    CloseDataset { dataset_id: String },
    DeleteUser { user_id: String },
    DeleteClinicPatient { clinic_id: String, patient_id: String },
}

#[derive(Debug, Default)]
struct FailurePlan {
    login: bool,
    /// 1-based ordinals of upload calls that answer 500.
    uploads: HashSet<usize>,
    /// 1-based ordinals of create-patient calls that answer 500.
    creates: HashSet<usize>,
    /// Visibility polls answering "not yet" before patients show up.
    hidden_polls: usize,
    /// 1-based ordinals of clinic-patient deletes that answer 404.
    clinic_deletes: HashSet<usize>,
}

/// Records every call and answers like a healthy server unless told to fail.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    plan: Mutex<FailurePlan>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_login(self) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            plan.login = true;
        }
        self
    }

    pub fn fail_upload(self, ordinal: usize) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            plan.uploads.insert(ordinal);
        }
        self
    }

    pub fn fail_create_patient(self, ordinal: usize) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            plan.creates.insert(ordinal);
        }
        self
    }

    pub fn fail_clinic_delete(self, ordinal: usize) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            plan.clinic_deletes.insert(ordinal);
        }
        self
    }

    pub fn hide_patients_for(self, polls: usize) -> Self {
        if let Ok(mut plan) = self.plan.lock() {
            plan.hidden_polls = polls;
        }
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: Call) -> usize {
        let mut calls = match self.calls.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        let discriminant = std::mem::discriminant(&call);
        calls.push(call);
        calls
            .iter()
            .filter(|c| std::mem::discriminant(*c) == discriminant)
            .count()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn with_plan<T>(&self, f: impl FnOnce(&mut FailurePlan) -> T) -> T {
        let mut plan = match self.plan.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut plan)
    }
}

#[async_trait]
impl PlatformApi for MemoryPlatform {
    async fn login(&self, _creds: &Credentials) -> Result<Session> {
        self.record(Call::Login);
        if self.with_plan(|p| p.login) {
            return Err(SeedError::transport("login", Some(401), "401 Unauthorized"));
        }
        Ok(Session {
            token: "memory-token".to_string(),
            user_id: Some("memory-account".to_string()),
        })
    }

    async fn create_patient(&self, _session: &Session, clinic_id: &str, patient: &NewPatient) -> Result<PatientRecord> {
        let n = self.record(Call::CreatePatient {
            clinic_id: clinic_id.to_string(),
            full_name: patient.full_name.clone(),
        });
        if self.with_plan(|p| p.creates.contains(&n)) {
            return Err(SeedError::transport("create_patient", Some(500), "500 Internal Server Error"));
        }
        Ok(PatientRecord {
            id: self.next_id("patient"),
            full_name: patient.full_name.clone(),
            tags: patient.tags.clone(),
        })
    }

    async fn assign_tag(&self, _session: &Session, _clinic_id: &str, tag_id: &str, patient_ids: &[String]) -> Result<u16> {
        self.record(Call::AssignTag {
            tag_id: tag_id.to_string(),
            patient_ids: patient_ids.to_vec(),
        });
        Ok(200)
    }

    async fn patient_visible(&self, _session: &Session, _clinic_id: &str, patient_id: &str) -> Result<bool> {
        self.record(Call::PatientVisible { patient_id: patient_id.to_string() });
        Ok(self.with_plan(|p| {
            if p.hidden_polls > 0 {
                p.hidden_polls -= 1;
                false
            } else {
                true
            }
        }))
    }

    async fn create_dataset(&self, _session: &Session, user_id: &str, metadata: &Value) -> Result<String> {
        self.record(Call::CreateDataset {
            user_id: user_id.to_string(),
            metadata: metadata.clone(),
        });
        Ok(self.next_id("dataset"))
    }

    async fn upload_data(&self, _session: &Session, dataset_id: &str, payload: &Value) -> Result<u16> {
        let points = payload.as_array().map(Vec::len).unwrap_or(1);
        let n = self.record(Call::UploadData {
            dataset_id: dataset_id.to_string(),
            points,
        });
        if self.with_plan(|p| p.uploads.contains(&n)) {
            return Err(SeedError::transport("upload_data", Some(500), "500 Internal Server Error"));
        }
        Ok(200)
    }

    async fn close_dataset(&self, _session: &Session, dataset_id: &str) -> Result<u16> {
        self.record(Call::CloseDataset { dataset_id: dataset_id.to_string() });
        Ok(200)
    }

    async fn delete_user(&self, _session: &Session, user_id: &str, _password: &str) -> Result<u16> {
        self.record(Call::DeleteUser { user_id: user_id.to_string() });
        Ok(200)
    }

    async fn delete_clinic_patient(&self, _session: &Session, clinic_id: &str, patient_id: &str, _password: &str) -> Result<u16> {
        let n = self.record(Call::DeleteClinicPatient {
            clinic_id: clinic_id.to_string(),
            patient_id: patient_id.to_string(),
        });
        if self.with_plan(|p| p.clinic_deletes.contains(&n)) {
            return Err(SeedError::transport("delete_clinic_patient", Some(404), "404 Not Found"));
        }
        Ok(200)
    }
}
