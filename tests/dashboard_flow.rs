use std::time::Duration;

use serde_json::{json, Value};

use cgm_seeder::config::{Credentials, SeederConfig, SettleStrategy};
use cgm_seeder::orchestrator::{DashboardOrchestrator, Window};
use cgm_seeder::platform::memory::{Call, MemoryPlatform};
use cgm_seeder::sampler::Bounds;
use cgm_seeder::scenario::ScenarioCatalog;
use cgm_seeder::templates::TemplateSet;

fn creds() -> Credentials {
    Credentials::new("qa@example.com", "pw", "https://int-api.example.org").unwrap()
}

fn config() -> SeederConfig {
    SeederConfig {
        clinic_id: "clinic-1".into(),
        tag_id: "tag-1".into(),
        settle: SettleStrategy::FixedDelay(Duration::ZERO),
        ..SeederConfig::default()
    }
}

fn orchestrator(api: MemoryPlatform, config: SeederConfig) -> DashboardOrchestrator<MemoryPlatform> {
    DashboardOrchestrator::new(api, creds(), config, TemplateSet::embedded().unwrap()).with_seed(7)
}

fn counts(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
    pairs.iter().map(|(l, c)| (l.to_string(), *c)).collect()
}

fn manufacturers(api: &MemoryPlatform) -> Vec<Value> {
    api.calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CreateDataset { metadata, .. } => Some(metadata["deviceManufacturers"].clone()),
            _ => None,
        })
        .collect()
}

fn upload_sizes(api: &MemoryPlatform) -> Vec<usize> {
    api.calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::UploadData { points, .. } => Some(points),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn second_window_failure_is_recorded_and_run_continues() {
    let orch = orchestrator(MemoryPlatform::new().fail_upload(2), config());
    let report = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap();

    let api = orch.api();
    assert_eq!(api.count(|c| matches!(c, Call::CreatePatient { .. })), 1);
    assert_eq!(api.count(|c| matches!(c, Call::AssignTag { .. })), 1);
    assert_eq!(api.count(|c| matches!(c, Call::UploadData { .. })), 2);
    // the failed upload's dataset is still closed
    assert_eq!(api.count(|c| matches!(c, Call::CloseDataset { .. })), 2);

    assert_eq!(report.patients.len(), 1);
    assert_eq!(report.successful_uploads(), 1);
    assert_eq!(report.failed_uploads(), 1);
    assert_eq!(report.uploads[0].window, Some(Window::Previous));
    assert_eq!(report.uploads[1].window, Some(Window::Recent));
    assert!(!report.uploads[1].succeeded());
}

#[tokio::test]
async fn cgm_windows_carry_daily_quota() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    orch.create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap();
    // 75% usage of 288 slots, 14 days per window
    assert_eq!(upload_sizes(orch.api()), vec![216 * 14, 216 * 14]);
}

#[tokio::test]
async fn patients_are_tagged_once_with_every_id() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    let report = orch
        .create_dashboard(
            &ScenarioCatalog::cgm_default(),
            &counts(&[("Meeting Targets", 2), ("Time in Range < 70%", 1)]),
        )
        .await
        .unwrap();

    let tags: Vec<_> = orch
        .api()
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::AssignTag { tag_id, patient_ids } => Some((tag_id, patient_ids)),
            _ => None,
        })
        .collect();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].0, "tag-1");
    let ids: Vec<String> = report.patients.iter().map(|p| p.id.clone()).collect();
    assert_eq!(tags[0].1, ids);
    assert_eq!(report.tag_status, Some(200));

    let names: Vec<&str> = report.patients.iter().map(|p| p.full_name.as_str()).collect();
    assert_eq!(names, vec!["Meeting Targets 0", "Meeting Targets 1", "Time in Range < 70% 2"]);
}

#[tokio::test]
async fn unknown_labels_are_skipped() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    let report = orch
        .create_dashboard(
            &ScenarioCatalog::cgm_default(),
            &counts(&[("No Such Scenario", 3), ("Meeting Targets", 1)]),
        )
        .await
        .unwrap();
    assert_eq!(report.skipped_labels, vec!["No Such Scenario".to_string()]);
    assert_eq!(report.patients.len(), 1);
    assert_eq!(report.patients[0].label, "Meeting Targets");
    assert_eq!(report.uploads.len(), 2);
}

#[tokio::test]
async fn failed_creations_do_not_shift_later_patients() {
    let orch = orchestrator(MemoryPlatform::new().fail_create_patient(1), config());
    let report = orch
        .create_dashboard(
            &ScenarioCatalog::cgm_default(),
            &counts(&[("Time in Range < 70%", 1), ("Meeting Targets", 1)]),
        )
        .await
        .unwrap();
    assert_eq!(report.failed_creations, 1);
    assert_eq!(report.patients.len(), 1);
    assert_eq!(report.patients[0].label, "Meeting Targets");
    assert!(report.uploads.iter().all(|u| u.label == "Meeting Targets"));
}

#[tokio::test]
async fn nothing_is_tagged_when_no_patient_was_created() {
    let orch = orchestrator(MemoryPlatform::new().fail_create_patient(1), config());
    let report = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap();
    assert!(report.patients.is_empty());
    assert_eq!(orch.api().count(|c| matches!(c, Call::AssignTag { .. })), 0);
    assert!(report.uploads.is_empty());
}

#[tokio::test]
async fn concurrent_uploads_keep_window_order_per_patient() {
    let cfg = SeederConfig { upload_concurrency: 3, ..config() };
    let orch = orchestrator(MemoryPlatform::new(), cfg);
    let report = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 3)]))
        .await
        .unwrap();
    assert_eq!(report.uploads.len(), 6);
    for (patient, pair) in report.patients.iter().zip(report.uploads.chunks(2)) {
        assert_eq!(pair[0].patient_id, patient.id);
        assert_eq!(pair[0].window, Some(Window::Previous));
        assert_eq!(pair[1].patient_id, patient.id);
        assert_eq!(pair[1].window, Some(Window::Recent));
    }
}

#[tokio::test]
async fn poll_settle_waits_for_visibility() {
    let cfg = SeederConfig {
        settle: SettleStrategy::PollUntilVisible {
            interval: Duration::from_millis(1),
            timeout: Duration::from_secs(1),
            fallback: Duration::ZERO,
        },
        ..config()
    };
    let orch = orchestrator(MemoryPlatform::new().hide_patients_for(2), cfg);
    let report = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 2)]))
        .await
        .unwrap();
    // first patient answers "not yet" twice, second is visible at once
    assert_eq!(orch.api().count(|c| matches!(c, Call::PatientVisible { .. })), 4);
    assert_eq!(report.successful_uploads(), 4);
}

#[tokio::test]
async fn poll_timeout_falls_back_and_still_uploads() {
    let cfg = SeederConfig {
        settle: SettleStrategy::PollUntilVisible {
            interval: Duration::from_millis(1),
            timeout: Duration::from_millis(5),
            fallback: Duration::ZERO,
        },
        ..config()
    };
    let orch = orchestrator(MemoryPlatform::new().hide_patients_for(1_000), cfg);
    let report = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap();
    assert_eq!(orch.api().count(|c| matches!(c, Call::PatientVisible { .. })), 6);
    assert_eq!(report.successful_uploads(), 2);
}

#[tokio::test]
async fn smbg_dashboard_spaces_readings_through_the_day() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    let report = orch
        .create_smbg_dashboard(
            &ScenarioCatalog::smbg_default(),
            &counts(&[("5 readings per day, average 3.8 mmol/l", 1)]),
        )
        .await
        .unwrap();
    assert_eq!(report.successful_uploads(), 2);
    assert_eq!(upload_sizes(orch.api()), vec![5 * 14, 5 * 14]);
}

#[tokio::test]
async fn low_high_dashboard_adds_events_to_daily_readings() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    orch.create_low_high_dashboard(&ScenarioCatalog::low_high_default(), &counts(&[("1 low, 1 high", 1)]))
        .await
        .unwrap();
    assert_eq!(upload_sizes(orch.api()), vec![14 + 2, 14 + 2]);
}

#[tokio::test]
async fn recorded_payload_goes_to_every_patient() {
    let recorded = json!([
        {"type": "cbg", "units": "mmol/L", "value": 5.2, "time": "2021-05-01T10:00:00.000Z"},
        {"type": "cbg", "units": "mmol/L", "value": 5.4, "time": "2021-05-01T10:05:00.000Z"},
    ]);
    let orch = orchestrator(MemoryPlatform::new(), config());
    let report = orch.create_recorded_dashboard(2, &recorded, -5.0).await.unwrap();
    assert_eq!(report.patients.len(), 2);
    assert_eq!(report.patients[0].label, "Recorded");
    assert_eq!(report.uploads.len(), 2);
    assert!(report.uploads.iter().all(|u| u.window.is_none() && u.succeeded()));
    assert_eq!(upload_sizes(orch.api()), vec![2, 2]);
    assert_eq!(manufacturers(orch.api()), vec![json!(["Medtronic"]), json!(["Medtronic"])]);
}

#[tokio::test]
async fn generated_dashboards_keep_the_dexcom_dataset() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    orch.create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap();
    assert_eq!(manufacturers(orch.api()), vec![json!(["Dexcom"]), json!(["Dexcom"])]);
}

#[tokio::test]
async fn unsatisfiable_scenario_is_reported_and_others_still_upload() {
    // 3.8 mmol/l cannot average out under a 3.0 ceiling
    let cfg = SeederConfig { smbg_bounds: Bounds { min_val: 0.0, max_val: 3.0 }, ..config() };
    let orch = orchestrator(MemoryPlatform::new(), cfg);
    let report = orch
        .create_smbg_dashboard(
            &ScenarioCatalog::smbg_default(),
            &counts(&[
                ("5 readings per day, average 3.8 mmol/l", 1),
                ("1 reading per day, average 2.9 mmol/l", 1),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(report.patients.len(), 2);
    assert_eq!(report.uploads.len(), 4);
    let (failed, ok) = report.uploads.split_at(2);
    for outcome in failed {
        assert_eq!(outcome.label, "5 readings per day, average 3.8 mmol/l");
        assert_eq!(outcome.status, None);
        assert!(outcome.error.is_some());
    }
    assert_eq!(failed[0].window, Some(Window::Previous));
    assert_eq!(failed[1].window, Some(Window::Recent));
    assert!(ok.iter().all(|u| u.succeeded() && u.patient_id == report.patients[1].id));
    assert_eq!(report.failed_uploads(), 2);
    // no dataset is opened for the patient whose windows never generated
    assert_eq!(upload_sizes(orch.api()), vec![14, 14]);
    assert_eq!(orch.api().count(|c| matches!(c, Call::CreateDataset { .. })), 2);
}

#[tokio::test]
async fn personal_upload_targets_own_account() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    let outcomes = orch
        .upload_personal(&ScenarioCatalog::cgm_default(), "Meeting Targets")
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    let users: Vec<String> = orch
        .api()
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CreateDataset { user_id, .. } => Some(user_id),
            _ => None,
        })
        .collect();
    assert_eq!(users, vec!["memory-account", "memory-account"]);
    assert_eq!(orch.api().count(|c| matches!(c, Call::CreatePatient { .. })), 0);

    let err = orch
        .upload_personal(&ScenarioCatalog::cgm_default(), "Nope")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_input");
}

#[tokio::test]
async fn delete_reports_each_user() {
    let orch = orchestrator(MemoryPlatform::new(), config());
    let ids = vec!["patient-1".to_string(), "patient-2".to_string()];
    let results = orch.delete_patients(&ids).await.unwrap();
    assert_eq!(results, vec![("patient-1".to_string(), Some(200)), ("patient-2".to_string(), Some(200))]);
    assert_eq!(orch.api().count(|c| matches!(c, Call::DeleteUser { .. })), 2);
}

#[tokio::test]
async fn delete_claimed_removes_patients_from_clinic() {
    let orch = orchestrator(MemoryPlatform::new().fail_clinic_delete(2), config());
    let ids: Vec<String> = ["patient-1", "patient-2", "patient-3"].iter().map(|s| s.to_string()).collect();
    let results = orch.delete_claimed_patients(&ids).await.unwrap();
    assert_eq!(
        results,
        vec![
            ("patient-1".to_string(), Some(200)),
            ("patient-2".to_string(), None),
            ("patient-3".to_string(), Some(200)),
        ]
    );
    let deleted: Vec<(String, String)> = orch
        .api()
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::DeleteClinicPatient { clinic_id, patient_id } => Some((clinic_id, patient_id)),
            _ => None,
        })
        .collect();
    assert_eq!(deleted.len(), 3);
    assert!(deleted.iter().all(|(clinic, _)| clinic == "clinic-1"));
    assert_eq!(deleted[2].1, "patient-3");
    assert_eq!(orch.api().count(|c| matches!(c, Call::DeleteUser { .. })), 0);
    assert_eq!(orch.api().count(|c| matches!(c, Call::Login)), 1);
}

#[tokio::test]
async fn delete_claimed_needs_a_clinic() {
    let cfg = SeederConfig { clinic_id: String::new(), ..config() };
    let orch = orchestrator(MemoryPlatform::new(), cfg);
    let err = orch.delete_claimed_patients(&["patient-1".to_string()]).await.unwrap_err();
    assert_eq!(err.code(), "config");
    assert!(orch.api().calls().is_empty());
}

#[tokio::test]
async fn missing_clinic_fails_before_any_call() {
    let cfg = SeederConfig { clinic_id: String::new(), ..config() };
    let orch = orchestrator(MemoryPlatform::new(), cfg);
    let err = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "config");
    assert!(orch.api().calls().is_empty());
}

#[tokio::test]
async fn login_failure_aborts_dashboard() {
    let orch = orchestrator(MemoryPlatform::new().fail_login(), config());
    let err = orch
        .create_dashboard(&ScenarioCatalog::cgm_default(), &counts(&[("Meeting Targets", 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(orch.api().calls(), vec![Call::Login]);
}
