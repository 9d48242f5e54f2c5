use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use serde_json::json;

use cgm_seeder::config::{Credentials, SeederConfig};
use cgm_seeder::logging::{json_log, obj, v_str};
use cgm_seeder::orchestrator::{DashboardOrchestrator, DashboardReport};
use cgm_seeder::platform::http::HttpPlatform;
use cgm_seeder::platform::memory::MemoryPlatform;
use cgm_seeder::platform::PlatformApi;
use cgm_seeder::scenario::ScenarioCatalog;
use cgm_seeder::templates::TemplateSet;
use cgm_seeder::timeshift::{load_recorded, parse_offset, shift_json_file};

const USAGE: &str = "usage: cgm-seeder <command> [args]
  cgm      [label=count ...]         CGM dashboard
  smbg     [label=count ...]         SMBG dashboard by readings per day
  lowhigh  [label=count ...]         SMBG dashboard by low/high events
  personal <label>                   CGM windows for the logged-in account
  recorded <file> <count> [tz]       recorded payload shifted to now
  shift    <file> <tz> [output]      shift a recorded payload file in place
  delete   <user_id ...>             delete users
  delete-claimed <patient_id ...>    remove claimed patients from the clinic
  labels                             list scenario labels";

/// `label=count` pairs; no pairs means one patient per catalog label.
fn parse_counts(args: &[String], catalog: &ScenarioCatalog) -> Result<Vec<(String, u32)>> {
    if args.is_empty() {
        return Ok(catalog.labels().map(|l| (l.to_string(), 1)).collect());
    }
    args.iter()
        .map(|arg| {
            let (label, count) = arg
                .rsplit_once('=')
                .ok_or_else(|| anyhow!("expected label=count, got {:?}", arg))?;
            let count = count
                .trim()
                .parse::<u32>()
                .with_context(|| format!("bad count in {:?}", arg))?;
            Ok((label.trim().to_string(), count))
        })
        .collect()
}

fn print_report(report: &DashboardReport) {
    json_log(
        "report",
        obj(&[
            ("patients", json!(report.patients.iter().map(|p| &p.id).collect::<Vec<_>>())),
            ("failed_creations", json!(report.failed_creations)),
            ("skipped_labels", json!(report.skipped_labels)),
            ("uploads_ok", json!(report.successful_uploads())),
            ("uploads_failed", json!(report.failed_uploads())),
        ]),
    );
}

async fn run<A: PlatformApi>(orch: DashboardOrchestrator<A>, command: &str, args: &[String]) -> Result<()> {
    match command {
        "cgm" => {
            let catalog = ScenarioCatalog::cgm_default();
            let counts = parse_counts(args, &catalog)?;
            print_report(&orch.create_dashboard(&catalog, &counts).await?);
        }
        "smbg" => {
            let catalog = ScenarioCatalog::smbg_default();
            let counts = parse_counts(args, &catalog)?;
            print_report(&orch.create_smbg_dashboard(&catalog, &counts).await?);
        }
        "lowhigh" => {
            let catalog = ScenarioCatalog::low_high_default();
            let counts = parse_counts(args, &catalog)?;
            print_report(&orch.create_low_high_dashboard(&catalog, &counts).await?);
        }
        "personal" => {
            let label = args.first().ok_or_else(|| anyhow!("personal needs a scenario label"))?;
            let outcomes = orch.upload_personal(&ScenarioCatalog::cgm_default(), label).await?;
            let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
            if failed > 0 {
                bail!("{} of {} personal uploads failed", failed, outcomes.len());
            }
        }
        "recorded" => {
            let path = args.first().ok_or_else(|| anyhow!("recorded needs a payload file"))?;
            let count: u32 = args
                .get(1)
                .ok_or_else(|| anyhow!("recorded needs a patient count"))?
                .parse()
                .context("bad patient count")?;
            let offset = match args.get(2) {
                Some(raw) => parse_offset(raw)?,
                None => 0.0,
            };
            let recorded = load_recorded(Path::new(path))?;
            print_report(&orch.create_recorded_dashboard(count, &recorded, offset).await?);
        }
        "delete" => {
            if args.is_empty() {
                bail!("delete needs at least one user id");
            }
            let results = orch.delete_patients(args).await?;
            let failed = results.iter().filter(|(_, status)| status.is_none()).count();
            if failed > 0 {
                bail!("{} of {} deletes failed", failed, results.len());
            }
        }
        "delete-claimed" => {
            if args.is_empty() {
                bail!("delete-claimed needs at least one patient id");
            }
            let results = orch.delete_claimed_patients(args).await?;
            let failed = results.iter().filter(|(_, status)| status.is_none()).count();
            if failed > 0 {
                bail!("{} of {} clinic deletes failed", failed, results.len());
            }
        }
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    let rest = &args[1..];

    match command {
        "labels" => {
            for (name, catalog) in [
                ("cgm", ScenarioCatalog::cgm_default()),
                ("smbg", ScenarioCatalog::smbg_default()),
                ("lowhigh", ScenarioCatalog::low_high_default()),
            ] {
                for label in catalog.labels() {
                    println!("{}\t{}", name, label);
                }
            }
            return Ok(());
        }
        "shift" => {
            let input = rest.first().ok_or_else(|| anyhow!("shift needs an input file"))?;
            let offset = parse_offset(rest.get(1).map(String::as_str).unwrap_or("0"))?;
            let output = rest.get(2).map(Path::new);
            shift_json_file(Path::new(input), offset, output, Utc::now())?;
            return Ok(());
        }
        _ => {}
    }

    let config = SeederConfig::from_env();
    let templates = TemplateSet::embedded()?;
    let dry_run = std::env::var("DRY_RUN").as_deref() == Ok("1");
    json_log(
        "startup",
        obj(&[
            ("command", v_str(command)),
            ("dry_run", json!(dry_run)),
            ("template_version", json!(templates.version)),
            ("clinic_id", v_str(&config.clinic_id)),
        ]),
    );

    if dry_run {
        let creds = Credentials::new("dry-run", "dry-run", "http://localhost")?;
        let orch = DashboardOrchestrator::new(MemoryPlatform::new(), creds, config, templates);
        run(orch, command, rest).await
    } else {
        let creds = Credentials::from_env()?;
        let api = HttpPlatform::from_credentials(&creds)?;
        let orch = DashboardOrchestrator::new(api, creds, config, templates);
        run(orch, command, rest).await
    }
}
