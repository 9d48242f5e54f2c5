use std::time::Duration;

use crate::error::{Result, SeedError};
use crate::sampler::Bounds;

pub const ENV_USERNAME: &str = "TIDEPOOL_USERNAME";
pub const ENV_PASSWORD: &str = "TIDEPOOL_PASSWORD";
pub const ENV_BASE_URL: &str = "TIDEPOOL_BASE_URL";

/// Account used for every remote call.
#[derive(Clone)]
pub struct Credentials {
    pub user_name: String,
    pub password: String,
    pub base_url: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user_name", &self.user_name)
            .field("password", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Credentials {
    pub fn new(user_name: &str, password: &str, base_url: &str) -> Result<Self> {
        let creds = Self {
            user_name: user_name.to_string(),
            password: password.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        creds.validate()?;
        Ok(creds)
    }

    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        match (var(ENV_USERNAME), var(ENV_PASSWORD), var(ENV_BASE_URL)) {
            (Some(u), Some(p), Some(b)) => Self::new(&u, &p, &b),
            _ => Err(SeedError::Config(format!(
                "credentials not found; set {}, {} and {}",
                ENV_USERNAME, ENV_PASSWORD, ENV_BASE_URL
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_name.is_empty() || self.password.is_empty() {
            return Err(SeedError::Config("user name and password are required".into()));
        }
        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| SeedError::Config(format!("invalid base url {:?}: {}", self.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SeedError::Config(format!("unsupported scheme {:?}", parsed.scheme())));
        }
        Ok(())
    }
}

/// How the orchestrator waits for freshly created patients to become
/// visible before uploading.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleStrategy {
    FixedDelay(Duration),
    /// Poll patient visibility; on timeout or an unsupported check, fall
    /// back to `fallback`.
    PollUntilVisible {
        interval: Duration,
        timeout: Duration,
        fallback: Duration,
    },
}

impl Default for SettleStrategy {
    fn default() -> Self {
        SettleStrategy::FixedDelay(Duration::from_secs(20))
    }
}

/// Run parameters for dashboard seeding.
#[derive(Debug, Clone)]
pub struct SeederConfig {
    pub clinic_id: String,
    pub tag_id: String,
    pub period_length_days: u32,
    pub offset_minutes: i64,
    pub settle: SettleStrategy,
    pub patient_password: String,
    pub patient_name: Option<String>,
    pub upload_concurrency: usize,
    pub close_failed_datasets: bool,
    pub smbg_bounds: Bounds,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            clinic_id: String::new(),
            tag_id: String::new(),
            period_length_days: 14,
            offset_minutes: 0,
            settle: SettleStrategy::default(),
            patient_password: "tidepool".to_string(),
            patient_name: None,
            upload_concurrency: 1,
            close_failed_datasets: true,
            smbg_bounds: Bounds::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

impl SeederConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let settle_secs: u64 = env_parse("SETTLE_SECS", 20);
        let fixed = Duration::from_secs(settle_secs);
        let settle = match std::env::var("SETTLE_MODE").as_deref() {
            Ok("poll") => SettleStrategy::PollUntilVisible {
                interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 2000)),
                timeout: Duration::from_secs(env_parse("POLL_TIMEOUT_SECS", 60)),
                fallback: fixed,
            },
            _ => SettleStrategy::FixedDelay(fixed),
        };
        Self {
            clinic_id: std::env::var("CLINIC_ID").unwrap_or_default(),
            tag_id: std::env::var("TAG_ID").unwrap_or_default(),
            period_length_days: env_parse("PERIOD_DAYS", d.period_length_days),
            offset_minutes: env_parse("OFFSET_MINUTES", d.offset_minutes),
            settle,
            patient_password: std::env::var("PATIENT_PASSWORD").unwrap_or(d.patient_password),
            patient_name: std::env::var("PATIENT_NAME").ok().filter(|v| !v.is_empty()),
            upload_concurrency: env_parse("UPLOAD_CONCURRENCY", d.upload_concurrency).max(1),
            close_failed_datasets: env_flag("CLOSE_FAILED_DATASETS", d.close_failed_datasets),
            smbg_bounds: Bounds {
                min_val: env_parse("SMBG_MIN", d.smbg_bounds.min_val),
                max_val: env_parse("SMBG_MAX", d.smbg_bounds.max_val),
            },
        }
    }

    /// Checks needed before any patient is provisioned.
    pub fn validate_for_dashboard(&self) -> Result<()> {
        if self.clinic_id.is_empty() {
            return Err(SeedError::Config("CLINIC_ID is required".into()));
        }
        if self.tag_id.is_empty() {
            return Err(SeedError::Config("TAG_ID is required".into()));
        }
        if self.period_length_days == 0 {
            return Err(SeedError::Config("PERIOD_DAYS must be positive".into()));
        }
        if self.smbg_bounds.min_val > self.smbg_bounds.max_val {
            return Err(SeedError::Config("SMBG_MIN exceeds SMBG_MAX".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_trim_and_validate() {
        let c = Credentials::new("qa@example.com", "pw", "https://int-api.example.org/").unwrap();
        assert_eq!(c.base_url, "https://int-api.example.org");
        assert!(Credentials::new("qa", "pw", "not a url").is_err());
        assert!(Credentials::new("qa", "pw", "ftp://host").is_err());
        assert!(Credentials::new("", "pw", "https://host").is_err());
    }

    #[test]
    fn test_debug_hides_password() {
        let c = Credentials::new("qa", "s3cret", "https://host").unwrap();
        assert!(!format!("{:?}", c).contains("s3cret"));
    }

    #[test]
    fn test_defaults() {
        let cfg = SeederConfig::default();
        assert_eq!(cfg.period_length_days, 14);
        assert_eq!(cfg.settle, SettleStrategy::FixedDelay(Duration::from_secs(20)));
        assert_eq!(cfg.upload_concurrency, 1);
        assert!(cfg.close_failed_datasets);
    }

    #[test]
    fn test_dashboard_validation() {
        let mut cfg = SeederConfig::default();
        assert!(cfg.validate_for_dashboard().is_err());
        cfg.clinic_id = "clinic".into();
        cfg.tag_id = "tag".into();
        assert!(cfg.validate_for_dashboard().is_ok());
        cfg.period_length_days = 0;
        assert!(cfg.validate_for_dashboard().is_err());
    }
}
