//! Structured logging for seeding runs.
//!
//! Every record is one JSON line:
//! `{ts, run_id, seq, lvl, component, event, msg, patient_id?, label?, data}`.
//! Records go to stdout, and also to `LOG_DIR/<run_id>/events.jsonl` when
//! `LOG_DIR` is set. Credentials and session tokens never leave this module
//! unredacted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Generate,  // Grids, quotas, samples, payload assembly
    Session,   // Login, dataset open/upload/close
    Provision, // Patient creation, tagging, deletion
    Dashboard, // Scenario orchestration
    System,    // Startup, config, shutdown
    Profile,   // Timing
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Generate => "generate",
            Domain::Session => "session",
            Domain::Provision => "provision",
            Domain::Dashboard => "dashboard",
            Domain::System => "system",
            Domain::Profile => "profile",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    events: Option<Mutex<BufWriter<File>>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("seed-{}-{}", ts_epoch_ms(), process::id()));
        let events = std::env::var("LOG_DIR").ok().and_then(|base| {
            let mut run_dir = PathBuf::from(base);
            run_dir.push(&run_id);
            if let Err(err) = create_dir_all(&run_dir) {
                eprintln!("[log] failed to create run dir: {}", err);
                return None;
            }
            match File::create(run_dir.join("events.jsonl")) {
                Ok(f) => Some(Mutex::new(BufWriter::new(f))),
                Err(err) => {
                    eprintln!("[log] failed to create events log: {}", err);
                    None
                }
            }
        });
        RunContext { run_id, events }
    })
}

const REDACTED_KEYS: [&str; 6] = [
    "password",
    "authorization",
    "Authorization",
    "token",
    "session_token",
    "X-Tidepool-Session-Token",
];

fn sanitize_fields(mut fields: Map<String, Value>) -> Map<String, Value> {
    let redacted = Value::String("[REDACTED]".to_string());
    for key in REDACTED_KEYS {
        if fields.contains_key(key) {
            fields.insert(key.to_string(), redacted.clone());
        }
    }
    fields
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["patient_id", "label", "dataset_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain.as_str(), event, fields);
}

/// Info-level record keyed by module name.
pub fn json_log(module: &str, fields: Map<String, Value>) {
    emit_record(Level::Info, module, module, fields);
}

fn emit_record(level: Level, component: &str, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let fields = sanitize_fields(fields);
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("component".to_string(), json!(component));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(events) = &ctx.events {
        if let Ok(mut w) = events.lock() {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
    }
    println!("{}", line);
}

// =============================================================================
// Domain-specific helpers
// =============================================================================

pub fn log_session_step(step: &str, status: Option<u16>, fields: &[(&str, Value)]) {
    let mut map = obj(fields);
    map.insert("step".to_string(), v_str(step));
    map.insert("status".to_string(), status.map(|s| json!(s)).unwrap_or(Value::Null));
    log(Level::Debug, Domain::Session, "session_step", map);
}

pub fn log_failure(domain: Domain, event: &str, err: &crate::error::SeedError, fields: &[(&str, Value)]) {
    let mut map = obj(fields);
    map.insert("error_code".to_string(), v_str(err.code()));
    map.insert("msg".to_string(), v_str(&err.to_string()));
    if let Some(status) = err.status() {
        map.insert("http_status".to_string(), json!(status));
    }
    log(Level::Error, domain, event, map);
}

// =============================================================================
// Utility Functions
// =============================================================================

/// SHA-256 hex digest of a serialized body, logged for upload provenance.
pub fn payload_digest(body: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(body);
    hex::encode(h.finalize())
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Profiling Scope
// =============================================================================

/// Emits elapsed time for a labelled scope when dropped.
pub struct ProfileScope {
    label: &'static str,
    context: Map<String, Value>,
    started: Instant,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        Self {
            label,
            context: obj(fields),
            started: Instant::now(),
        }
    }
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let mut fields = std::mem::take(&mut self.context);
        fields.insert("label".to_string(), v_str(self.label));
        fields.insert("elapsed_ms".to_string(), v_num(elapsed_ms));
        log(Level::Trace, Domain::Profile, "profile", fields);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
    }

    #[test]
    fn test_payload_digest_deterministic() {
        let a = payload_digest(b"[{\"value\":3.9}]");
        let b = payload_digest(b"[{\"value\":3.9}]");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, payload_digest(b"[]"));
    }

    #[test]
    fn test_obj_helper() {
        let m = obj(&[("key", v_str("value")), ("num", v_num(42.0))]);
        assert_eq!(m.get("key").unwrap(), "value");
        assert_eq!(m.get("num").unwrap(), 42.0);
    }

    #[test]
    fn test_sensitive_fields_redacted() {
        let m = sanitize_fields(obj(&[
            ("password", v_str("tidepool")),
            ("X-Tidepool-Session-Token", v_str("abc")),
            ("clinic_id", v_str("c1")),
        ]));
        assert_eq!(m.get("password").unwrap(), "[REDACTED]");
        assert_eq!(m.get("X-Tidepool-Session-Token").unwrap(), "[REDACTED]");
        assert_eq!(m.get("clinic_id").unwrap(), "c1");
    }

    #[test]
    fn test_split_lifts_correlation_keys() {
        let (top, data) = split_fields(obj(&[
            ("patient_id", v_str("p1")),
            ("rows", v_num(14.0)),
        ]));
        assert_eq!(top.get("patient_id").unwrap(), "p1");
        assert!(data.contains_key("rows"));
        assert!(!data.contains_key("patient_id"));
    }

    #[test]
    fn test_seq_increments() {
        let s1 = next_seq();
        let s2 = next_seq();
        assert!(s2 > s1);
    }
}
