//! Dashboard seeding: provision patients, tag them, wait for the clinic to
//! list them, then upload a previous and a recent window of readings each.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};
use tokio::time::sleep;

use crate::config::{Credentials, SeederConfig, SettleStrategy};
use crate::error::{Result, SeedError};
use crate::logging::{log, log_failure, obj, v_str, Domain, Level, ProfileScope};
use crate::payload::{cgm_payload, smbg_low_high_payload, smbg_payload};
use crate::platform::retry::{is_retryable, retry_async, RetryConfig};
use crate::platform::session::{upload_dataset, UploadTarget};
use crate::platform::{NewPatient, PlatformApi, Session};
use crate::scenario::{ScenarioCatalog, ScenarioParams};
use crate::templates::{DatasetTemplate, TemplateSet};
use crate::timeshift::shift_json_times;

/// The two history windows every patient receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryWindows {
    pub previous: (DateTime<Utc>, DateTime<Utc>),
    pub recent: (DateTime<Utc>, DateTime<Utc>),
}

impl HistoryWindows {
    pub fn get(&self, window: Window) -> (DateTime<Utc>, DateTime<Utc>) {
        match window {
            Window::Previous => self.previous,
            Window::Recent => self.recent,
        }
    }
}

/// Windows ending at `now - offset_minutes`: previous `[end-2p, end-p)`,
/// recent `[end-p, end)`.
pub fn compute_windows(now: DateTime<Utc>, period_days: u32, offset_minutes: i64) -> HistoryWindows {
    let end = now - ChronoDuration::minutes(offset_minutes);
    let period = ChronoDuration::days(period_days as i64);
    HistoryWindows {
        previous: (end - period - period, end - period),
        recent: (end - period, end),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Previous,
    Recent,
}

impl Window {
    pub const ORDER: [Window; 2] = [Window::Previous, Window::Recent];

    fn index(self) -> usize {
        match self {
            Window::Previous => 0,
            Window::Recent => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Window::Previous => "previous",
            Window::Recent => "recent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedPatient {
    pub id: String,
    pub label: String,
    pub full_name: String,
}

/// Result of one window upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub patient_id: String,
    pub label: String,
    pub window: Option<Window>,
    pub status: Option<u16>,
    pub error: Option<String>,
}

impl UploadOutcome {
    pub fn succeeded(&self) -> bool {
        self.status.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardReport {
    pub patients: Vec<ProvisionedPatient>,
    pub failed_creations: usize,
    pub skipped_labels: Vec<String>,
    pub tag_status: Option<u16>,
    pub uploads: Vec<UploadOutcome>,
}

impl DashboardReport {
    pub fn successful_uploads(&self) -> usize {
        self.uploads.iter().filter(|u| u.succeeded()).count()
    }

    pub fn failed_uploads(&self) -> usize {
        self.uploads.len() - self.successful_uploads()
    }

    fn log_summary(&self, dashboard: &str) {
        log(
            Level::Info,
            Domain::Dashboard,
            "dashboard_complete",
            obj(&[
                ("dashboard", v_str(dashboard)),
                ("patients", json!(self.patients.len())),
                ("failed_creations", json!(self.failed_creations)),
                ("skipped_labels", json!(self.skipped_labels)),
                ("uploads_ok", json!(self.successful_uploads())),
                ("uploads_failed", json!(self.failed_uploads())),
            ]),
        );
    }
}

pub struct DashboardOrchestrator<A: PlatformApi> {
    api: A,
    creds: Credentials,
    config: SeederConfig,
    templates: TemplateSet,
    seed: Option<u64>,
}

impl<A: PlatformApi> DashboardOrchestrator<A> {
    pub fn new(api: A, creds: Credentials, config: SeederConfig, templates: TemplateSet) -> Self {
        Self { api, creds, config, templates, seed: None }
    }

    /// Fix the sampling seed; patient `i` draws from `seed + i`.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn config(&self) -> &SeederConfig {
        &self.config
    }

    fn rng_for(&self, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }

    fn display_name(&self, label: &str, counter: usize) -> String {
        match &self.config.patient_name {
            Some(prefix) => format!("{} {} {}", prefix, label, counter),
            None => format!("{} {}", label, counter),
        }
    }

    /// CGM dashboard.
    pub async fn create_dashboard(&self, catalog: &ScenarioCatalog, counts: &[(String, u32)]) -> Result<DashboardReport> {
        self.run_dashboard("cgm", catalog, counts, None).await
    }

    pub async fn create_smbg_dashboard(&self, catalog: &ScenarioCatalog, counts: &[(String, u32)]) -> Result<DashboardReport> {
        self.run_dashboard("smbg", catalog, counts, None).await
    }

    pub async fn create_low_high_dashboard(
        &self,
        catalog: &ScenarioCatalog,
        counts: &[(String, u32)],
    ) -> Result<DashboardReport> {
        self.run_dashboard("low_high", catalog, counts, None).await
    }

    /// Provision `count` patients and give each a copy of a recorded
    /// payload re-anchored so its newest reading lands at now.
    pub async fn create_recorded_dashboard(
        &self,
        count: u32,
        recorded: &Value,
        tz_offset_hours: f64,
    ) -> Result<DashboardReport> {
        let shifted = shift_json_times(recorded, tz_offset_hours, Utc::now());
        let catalog = ScenarioCatalog::new(Vec::new())?;
        let counts = [(RECORDED_LABEL.to_string(), count)];
        self.run_dashboard("recorded", &catalog, &counts, Some(&shifted)).await
    }

    /// Both CGM windows of `label` uploaded to the logged-in account.
    pub async fn upload_personal(&self, catalog: &ScenarioCatalog, label: &str) -> Result<Vec<UploadOutcome>> {
        let scenario = catalog
            .get(label)
            .ok_or_else(|| SeedError::InvalidInput(format!("unknown scenario {:?}", label)))?;
        let windows = compute_windows(Utc::now(), self.config.period_length_days, self.config.offset_minutes);
        let mut rng = self.rng_for(0);
        let mut outcomes = Vec::with_capacity(2);
        for window in Window::ORDER {
            let outcome = match self.build_window(&scenario.params, window, &windows, &mut rng) {
                Ok(payload) => {
                    let dataset = &self.templates.dataset;
                    self.upload_one(UploadTarget::OwnAccount, "self", label, Some(window), dataset, &payload)
                        .await
                }
                Err(e) => generation_failure("self", label, Some(window), e),
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Delete each user, continuing past failures. Returns the per-id
    /// status, `None` where the delete failed.
    pub async fn delete_patients(&self, ids: &[String]) -> Result<Vec<(String, Option<u16>)>> {
        let _scope = ProfileScope::with_context("delete_patients", &[("count", json!(ids.len()))]);
        let session = self.api.login(&self.creds).await?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            match self.api.delete_user(&session, id, &self.config.patient_password).await {
                Ok(status) => {
                    log(
                        Level::Info,
                        Domain::Provision,
                        "patient_deleted",
                        obj(&[("patient_id", v_str(id)), ("status", json!(status))]),
                    );
                    results.push((id.clone(), Some(status)));
                }
                Err(e) => {
                    log_failure(Domain::Provision, "delete_failed", &e, &[("patient_id", v_str(id))]);
                    results.push((id.clone(), None));
                }
            }
        }
        Ok(results)
    }

    /// Remove claimed patients from the clinic roster, continuing past
    /// failures. The account password confirms each removal.
    pub async fn delete_claimed_patients(&self, ids: &[String]) -> Result<Vec<(String, Option<u16>)>> {
        if self.config.clinic_id.is_empty() {
            return Err(SeedError::Config("CLINIC_ID is required".into()));
        }
        let _scope = ProfileScope::with_context("delete_claimed_patients", &[("count", json!(ids.len()))]);
        let session = self.api.login(&self.creds).await?;
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let deleted = self
                .api
                .delete_clinic_patient(&session, &self.config.clinic_id, id, &self.creds.password)
                .await;
            match deleted {
                Ok(status) => {
                    log(
                        Level::Info,
                        Domain::Provision,
                        "claimed_patient_deleted",
                        obj(&[
                            ("patient_id", v_str(id)),
                            ("clinic_id", v_str(&self.config.clinic_id)),
                            ("status", json!(status)),
                        ]),
                    );
                    results.push((id.clone(), Some(status)));
                }
                Err(e) => {
                    log_failure(Domain::Provision, "delete_claimed_failed", &e, &[("patient_id", v_str(id))]);
                    results.push((id.clone(), None));
                }
            }
        }
        Ok(results)
    }

    async fn run_dashboard(
        &self,
        dashboard: &str,
        catalog: &ScenarioCatalog,
        counts: &[(String, u32)],
        recorded: Option<&Value>,
    ) -> Result<DashboardReport> {
        self.config.validate_for_dashboard()?;
        let _scope = ProfileScope::with_context("dashboard", &[("dashboard", v_str(dashboard))]);
        log(
            Level::Info,
            Domain::Dashboard,
            "dashboard_start",
            obj(&[
                ("dashboard", v_str(dashboard)),
                ("scenarios", json!(counts.len())),
                ("period_days", json!(self.config.period_length_days)),
                ("offset_minutes", json!(self.config.offset_minutes)),
            ]),
        );

        let session = self.api.login(&self.creds).await?;
        let mut report = DashboardReport::default();

        let accepted: Vec<(String, u32)> = counts
            .iter()
            .filter(|(label, _)| {
                let known = recorded.is_some() || catalog.get(label).is_some();
                if !known {
                    log(
                        Level::Warn,
                        Domain::Dashboard,
                        "unknown_scenario",
                        obj(&[("label", v_str(label)), ("msg", v_str("label not in catalog; skipped"))]),
                    );
                    report.skipped_labels.push(label.clone());
                }
                known
            })
            .cloned()
            .collect();

        self.provision(&session, &accepted, &mut report).await;
        if report.patients.is_empty() {
            report.log_summary(dashboard);
            return Ok(report);
        }
        report.tag_status = self.assign_tag(&session, &report.patients).await;
        self.settle(&session, &report.patients).await;

        let windows = compute_windows(Utc::now(), self.config.period_length_days, self.config.offset_minutes);
        let concurrency = self.config.upload_concurrency.max(1);
        let per_patient: Vec<Vec<UploadOutcome>> = stream::iter(report.patients.iter().enumerate())
            .map(|(i, patient)| self.seed_patient(i, patient, catalog, &windows, recorded))
            .buffered(concurrency)
            .collect()
            .await;
        report.uploads = per_patient.into_iter().flatten().collect();

        report.log_summary(dashboard);
        Ok(report)
    }

    async fn provision(&self, session: &Session, counts: &[(String, u32)], report: &mut DashboardReport) {
        let _scope = ProfileScope::new("provision");
        let mut counter = 0;
        for (label, count) in counts {
            for _ in 0..*count {
                let full_name = self.display_name(label, counter);
                counter += 1;
                let patient = NewPatient::placeholder(full_name.clone(), &self.config.patient_password);
                match self.api.create_patient(session, &self.config.clinic_id, &patient).await {
                    Ok(record) => {
                        log(
                            Level::Info,
                            Domain::Provision,
                            "patient_created",
                            obj(&[("patient_id", v_str(&record.id)), ("label", v_str(label))]),
                        );
                        report.patients.push(ProvisionedPatient {
                            id: record.id,
                            label: label.clone(),
                            full_name,
                        });
                    }
                    Err(e) => {
                        log_failure(Domain::Provision, "create_patient_failed", &e, &[("label", v_str(label))]);
                        report.failed_creations += 1;
                    }
                }
            }
        }
    }

    async fn assign_tag(&self, session: &Session, patients: &[ProvisionedPatient]) -> Option<u16> {
        let ids: Vec<String> = patients.iter().map(|p| p.id.clone()).collect();
        match self
            .api
            .assign_tag(session, &self.config.clinic_id, &self.config.tag_id, &ids)
            .await
        {
            Ok(status) => {
                log(
                    Level::Info,
                    Domain::Provision,
                    "tag_assigned",
                    obj(&[("tag_id", v_str(&self.config.tag_id)), ("patients", json!(ids.len()))]),
                );
                Some(status)
            }
            Err(e) => {
                log_failure(Domain::Provision, "assign_tag_failed", &e, &[("tag_id", v_str(&self.config.tag_id))]);
                None
            }
        }
    }

    async fn settle(&self, session: &Session, patients: &[ProvisionedPatient]) {
        match &self.config.settle {
            SettleStrategy::FixedDelay(delay) => {
                log(
                    Level::Info,
                    Domain::Provision,
                    "settle",
                    obj(&[("mode", v_str("fixed")), ("delay_ms", json!(delay.as_millis() as u64))]),
                );
                sleep(*delay).await;
            }
            SettleStrategy::PollUntilVisible { interval, timeout, fallback } => {
                let retry = RetryConfig::polling(*interval, *timeout);
                let api = &self.api;
                let clinic_id = self.config.clinic_id.as_str();
                for patient in patients {
                    let patient_id = patient.id.as_str();
                    let polled = retry_async(
                        &retry,
                        "patient_visible",
                        move || async move {
                            match api.patient_visible(session, clinic_id, patient_id).await {
                                Ok(true) => Ok(()),
                                Ok(false) => Err(SeedError::protocol("patient_visible", "not yet listed")),
                                Err(e) => Err(e),
                            }
                        },
                        is_retryable,
                    )
                    .await;
                    if let Err(e) = polled {
                        log_failure(
                            Domain::Provision,
                            "settle_poll_failed",
                            &e,
                            &[("patient_id", v_str(&patient.id)), ("fallback_ms", json!(fallback.as_millis() as u64))],
                        );
                        sleep(*fallback).await;
                        return;
                    }
                }
                log(
                    Level::Info,
                    Domain::Provision,
                    "settle",
                    obj(&[("mode", v_str("poll")), ("patients", json!(patients.len()))]),
                );
            }
        }
    }

    /// Both windows for one patient, previous first.
    async fn seed_patient(
        &self,
        index: usize,
        patient: &ProvisionedPatient,
        catalog: &ScenarioCatalog,
        windows: &HistoryWindows,
        recorded: Option<&Value>,
    ) -> Vec<UploadOutcome> {
        let target = UploadTarget::User(patient.id.clone());
        if let Some(payload) = recorded {
            let dataset = &self.templates.recorded_dataset;
            return vec![self.upload_one(target, &patient.id, &patient.label, None, dataset, payload).await];
        }
        let Some(scenario) = catalog.get(&patient.label) else {
            return Vec::new();
        };
        let mut rng = self.rng_for(index);
        let mut outcomes = Vec::with_capacity(2);
        for window in Window::ORDER {
            let outcome = match self.build_window(&scenario.params, window, windows, &mut rng) {
                Ok(payload) => {
                    let dataset = &self.templates.dataset;
                    self.upload_one(target.clone(), &patient.id, &patient.label, Some(window), dataset, &payload)
                        .await
                }
                Err(e) => generation_failure(&patient.id, &patient.label, Some(window), e),
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn build_window(
        &self,
        params: &ScenarioParams,
        window: Window,
        windows: &HistoryWindows,
        rng: &mut StdRng,
    ) -> Result<Value> {
        let (start, end) = windows.get(window);
        let i = window.index();
        let points = match params {
            ScenarioParams::Cgm(ws) => cgm_payload(start, end, &ws[i], &self.templates.cbg)?,
            ScenarioParams::Smbg(ws) => {
                smbg_payload(start, end, &ws[i], self.config.smbg_bounds, &self.templates.smbg, rng)?
            }
            ScenarioParams::LowHigh(ws) => smbg_low_high_payload(start, end, &ws[i], &self.templates.smbg, rng)?,
        };
        Ok(Value::Array(points))
    }

    async fn upload_one(
        &self,
        target: UploadTarget,
        patient_id: &str,
        label: &str,
        window: Option<Window>,
        dataset: &DatasetTemplate,
        payload: &Value,
    ) -> UploadOutcome {
        let result = upload_dataset(
            &self.api,
            &self.creds,
            &target,
            dataset,
            payload,
            self.config.close_failed_datasets,
        )
        .await;
        let window_name = window.map(Window::as_str).unwrap_or("recorded");
        match result {
            Ok(status) => {
                log(
                    Level::Info,
                    Domain::Dashboard,
                    "window_uploaded",
                    obj(&[
                        ("patient_id", v_str(patient_id)),
                        ("label", v_str(label)),
                        ("window", v_str(window_name)),
                        ("status", json!(status)),
                    ]),
                );
                UploadOutcome {
                    patient_id: patient_id.to_string(),
                    label: label.to_string(),
                    window,
                    status: Some(status),
                    error: None,
                }
            }
            Err(e) => {
                log_failure(
                    Domain::Dashboard,
                    "window_upload_failed",
                    &e,
                    &[
                        ("patient_id", v_str(patient_id)),
                        ("label", v_str(label)),
                        ("window", v_str(window_name)),
                    ],
                );
                UploadOutcome {
                    patient_id: patient_id.to_string(),
                    label: label.to_string(),
                    window,
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

const RECORDED_LABEL: &str = "Recorded";

fn generation_failure(patient_id: &str, label: &str, window: Option<Window>, err: SeedError) -> UploadOutcome {
    log_failure(
        Domain::Generate,
        "window_generation_failed",
        &err,
        &[("patient_id", v_str(patient_id)), ("label", v_str(label))],
    );
    UploadOutcome {
        patient_id: patient_id.to_string(),
        label: label.to_string(),
        window,
        status: None,
        error: Some(err.to_string()),
    }
}
