//! One upload session: authenticate, open a dataset, upload, close.

use chrono::{Local, Utc};
use serde_json::{json, Value};

use crate::config::Credentials;
use crate::error::{Result, SeedError};
use crate::logging::{log, log_failure, log_session_step, obj, payload_digest, v_str, Domain, Level, ProfileScope};
use crate::platform::{PlatformApi, Session};
use crate::templates::DatasetTemplate;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Open { dataset_id: String },
    Closed,
    Failed { step: &'static str },
}

/// Whose account receives the dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadTarget {
    /// A custodial patient, by user id.
    User(String),
    /// The logged-in account itself.
    OwnAccount,
}

pub fn new_blob_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

pub struct UploadSession<'a, A: PlatformApi + ?Sized> {
    api: &'a A,
    creds: &'a Credentials,
    state: SessionState,
    session: Option<Session>,
    close_failed_datasets: bool,
}

impl<'a, A: PlatformApi + ?Sized> UploadSession<'a, A> {
    pub fn new(api: &'a A, creds: &'a Credentials) -> Self {
        Self {
            api,
            creds,
            state: SessionState::Unauthenticated,
            session: None,
            close_failed_datasets: true,
        }
    }

    /// Whether a failed Upload step closes its dataset before returning.
    pub fn close_failed_datasets(mut self, enabled: bool) -> Self {
        self.close_failed_datasets = enabled;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn fail<T>(&mut self, step: &'static str, err: SeedError) -> Result<T> {
        self.state = SessionState::Failed { step };
        Err(err)
    }

    fn expect_state(&self, step: &'static str, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(SeedError::protocol(step, format!("invalid session state {:?}", self.state)))
        }
    }

    fn session(&self) -> Result<&Session> {
        self.session
            .as_ref()
            .ok_or_else(|| SeedError::protocol("session", "not authenticated"))
    }

    pub async fn authenticate(&mut self) -> Result<()> {
        self.expect_state("login", self.state == SessionState::Unauthenticated)?;
        match self.api.login(self.creds).await {
            Ok(session) => {
                log_session_step("login", None, &[]);
                self.session = Some(session);
                self.state = SessionState::Authenticated;
                Ok(())
            }
            Err(e) => self.fail("login", e),
        }
    }

    /// Stamp the metadata and open a dataset. Returns the dataset id.
    pub async fn open(&mut self, target: &UploadTarget, template: &DatasetTemplate) -> Result<String> {
        self.expect_state("create_dataset", self.state == SessionState::Authenticated)?;
        let session = self.session()?.clone();
        let user_id = match target {
            UploadTarget::User(id) => id.clone(),
            UploadTarget::OwnAccount => match session.user_id.clone() {
                Some(id) => id,
                None => {
                    let err = SeedError::protocol("create_dataset", "login response carried no user id");
                    return self.fail("create_dataset", err);
                }
            },
        };
        let blob_id = new_blob_id();
        let metadata = template.stamp(&blob_id, Local::now().naive_local(), Utc::now());
        match self.api.create_dataset(&session, &user_id, &metadata).await {
            Ok(dataset_id) => {
                log_session_step(
                    "create_dataset",
                    None,
                    &[("dataset_id", v_str(&dataset_id)), ("blob_id", v_str(&blob_id))],
                );
                self.state = SessionState::Open { dataset_id: dataset_id.clone() };
                Ok(dataset_id)
            }
            Err(e) => self.fail("create_dataset", e),
        }
    }

    pub async fn upload(&mut self, payload: &Value) -> Result<u16> {
        let dataset_id = match &self.state {
            SessionState::Open { dataset_id } => dataset_id.clone(),
            _ => return Err(SeedError::protocol("upload_data", format!("invalid session state {:?}", self.state))),
        };
        let session = self.session()?.clone();
        let body = serde_json::to_vec(payload).unwrap_or_default();
        let digest = payload_digest(&body);
        match self.api.upload_data(&session, &dataset_id, payload).await {
            Ok(status) => {
                log_session_step(
                    "upload_data",
                    Some(status),
                    &[
                        ("dataset_id", v_str(&dataset_id)),
                        ("bytes", json!(body.len())),
                        ("payload_sha256", v_str(&digest)),
                    ],
                );
                Ok(status)
            }
            Err(e) => {
                if self.close_failed_datasets {
                    // best effort; the upload error is what the caller sees
                    match self.api.close_dataset(&session, &dataset_id).await {
                        Ok(status) => log_session_step("close_after_failure", Some(status), &[("dataset_id", v_str(&dataset_id))]),
                        Err(close_err) => log_failure(
                            Domain::Session,
                            "close_after_failure",
                            &close_err,
                            &[("dataset_id", v_str(&dataset_id))],
                        ),
                    }
                }
                self.fail("upload_data", e)
            }
        }
    }

    pub async fn close(&mut self) -> Result<u16> {
        let dataset_id = match &self.state {
            SessionState::Open { dataset_id } => dataset_id.clone(),
            _ => return Err(SeedError::protocol("close_dataset", format!("invalid session state {:?}", self.state))),
        };
        let session = self.session()?.clone();
        match self.api.close_dataset(&session, &dataset_id).await {
            Ok(status) => {
                log_session_step("close_dataset", Some(status), &[("dataset_id", v_str(&dataset_id))]);
                self.state = SessionState::Closed;
                Ok(status)
            }
            Err(e) => self.fail("close_dataset", e),
        }
    }
}

/// Run a full session and return the Upload step's HTTP status.
pub async fn upload_dataset<A: PlatformApi + ?Sized>(
    api: &A,
    creds: &Credentials,
    target: &UploadTarget,
    template: &DatasetTemplate,
    payload: &Value,
    close_failed_datasets: bool,
) -> Result<u16> {
    let _scope = ProfileScope::new("upload_dataset");
    let mut session = UploadSession::new(api, creds).close_failed_datasets(close_failed_datasets);
    session.authenticate().await?;
    session.open(target, template).await?;
    let status = session.upload(payload).await?;
    session.close().await?;
    Ok(status)
}

/// [`upload_dataset`] that logs any failure and reports it as `None`.
pub async fn upload_or_log<A: PlatformApi + ?Sized>(
    api: &A,
    creds: &Credentials,
    target: &UploadTarget,
    template: &DatasetTemplate,
    payload: &Value,
    close_failed_datasets: bool,
) -> Option<u16> {
    let target_id = match target {
        UploadTarget::User(id) => id.as_str(),
        UploadTarget::OwnAccount => "self",
    };
    match upload_dataset(api, creds, target, template, payload, close_failed_datasets).await {
        Ok(status) => {
            log(
                Level::Info,
                Domain::Session,
                "upload_complete",
                obj(&[("patient_id", v_str(target_id)), ("status", json!(status))]),
            );
            Some(status)
        }
        Err(e) => {
            log_failure(Domain::Session, "upload_failed", &e, &[("patient_id", v_str(target_id))]);
            None
        }
    }
}
