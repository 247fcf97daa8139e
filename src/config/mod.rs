use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

/// System-wide defaults, loaded once at startup from the environment
/// (mirroring the shape of `AppDefaults` the original CLI scaffold used).
#[derive(Debug, Clone)]
pub struct SystemConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub max_concurrent_users: usize,
    pub summarizer_base_url: Option<String>,
    pub summarizer_api_key: Option<String>,
    pub summarizer_model: String,
    pub summarizer_max_length: usize,
    pub summarizer_temperature: f32,
    pub cache_ttl_seconds: u64,
}

impl SystemConfig {
    pub fn load() -> Result<Self> {
        let data_dir = default_data_dir();
        let db_path = env::var("MAILKEEPER_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("mailkeeper.sqlite3"));

        let max_concurrent_users = env_parsed("MAILKEEPER_MAX_CONCURRENT_USERS").unwrap_or(3);
        let summarizer_base_url = env::var("MAILKEEPER_SUMMARIZER_BASE_URL").ok();
        let summarizer_api_key = env::var("MAILKEEPER_SUMMARIZER_API_KEY").ok();
        let summarizer_model = env::var("MAILKEEPER_SUMMARIZER_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let summarizer_max_length = env_parsed("MAILKEEPER_SUMMARIZER_MAX_LENGTH").unwrap_or(200);
        let summarizer_temperature: f32 =
            env_parsed("MAILKEEPER_SUMMARIZER_TEMPERATURE").unwrap_or(0.3);
        let cache_ttl_seconds = env_parsed("MAILKEEPER_CACHE_TTL_SECONDS").unwrap_or(300);

        Ok(Self {
            data_dir,
            db_path,
            max_concurrent_users,
            summarizer_base_url,
            summarizer_api_key,
            summarizer_model,
            summarizer_max_length,
            summarizer_temperature,
            cache_ttl_seconds,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("MAILKEEPER_DATA_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".mailkeeper");
    }
    PathBuf::from(".")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScheduleType {
    Interval,
    Cron,
    Custom,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CustomRule {
    Hourly,
    EvenHours,
    OddHours,
    EveryNHours,
}

/// The schedule portion of a user's config (§6 Schedule keys), already
/// coerced out of the raw string map.
#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    pub schedule_type: ScheduleType,
    pub cron_hours: Vec<u32>,
    pub cron_minutes: Vec<u32>,
    pub custom_rule: CustomRule,
    pub custom_minute: u32,
    pub n_hours: u32,
    pub interval_minutes: u32,
}

/// The full set of user configuration keys recognized by the pipeline (§6),
/// coerced from the raw string map the Store returns. Per Design Notes,
/// string-typed config is validated and coerced once here; the rest of the
/// pipeline only ever sees typed values.
#[derive(Clone, Debug)]
pub struct UserPipelineConfig {
    pub check_interval_minutes: u32,
    pub max_emails_per_account: Option<u32>,
    pub check_days_back: u32,
    pub duplicate_check_days: u32,
    pub email_body_max_length: usize,
    pub email_subject_max_length: usize,
    pub schedule: ScheduleConfig,
}

/// `BODY_MAX` default referenced throughout §4.1/§8 when a user hasn't
/// overridden `email_body_max_length`.
pub const DEFAULT_BODY_MAX: usize = 50_000;
const DEFAULT_SUBJECT_MAX: usize = 500;

impl UserPipelineConfig {
    /// Coerce a raw `UserConfig` string map into typed values. A bad value
    /// for one key falls back to its default and is logged, rather than
    /// failing the whole run (§4.9).
    pub fn from_rows(user_id: i64, rows: &HashMap<String, String>) -> Self {
        let parse_or_default = |key: &str, default: u32| -> u32 {
            rows.get(key)
                .map(|v| {
                    v.parse::<u32>().unwrap_or_else(|_| {
                        warn!(user_id, key, value = %v, "invalid config value, using default");
                        default
                    })
                })
                .unwrap_or(default)
        };

        let max_emails_per_account = match rows.get("max_emails_per_account").map(|s| s.as_str())
        {
            Some("null") | Some("") => None,
            Some(v) => match v.parse::<u32>() {
                Ok(n) => Some(n),
                Err(_) => {
                    warn!(user_id, value = %v, "invalid max_emails_per_account, using default");
                    Some(20)
                }
            },
            None => Some(20),
        };

        let schedule_type = match rows.get("schedule_type").map(|s| s.as_str()) {
            Some("cron") => ScheduleType::Cron,
            Some("custom") => ScheduleType::Custom,
            _ => ScheduleType::Interval,
        };

        let int_list = |key: &str| -> Vec<u32> {
            rows.get(key)
                .map(|v| {
                    v.split(',')
                        .filter_map(|p| p.trim().parse::<u32>().ok())
                        .collect()
                })
                .unwrap_or_default()
        };

        let custom_rule = match rows.get("custom_rule").map(|s| s.as_str()) {
            Some("even_hours") => CustomRule::EvenHours,
            Some("odd_hours") => CustomRule::OddHours,
            Some("every_n_hours") => CustomRule::EveryNHours,
            _ => CustomRule::Hourly,
        };

        Self {
            check_interval_minutes: parse_or_default("check_interval_minutes", 30),
            max_emails_per_account,
            check_days_back: parse_or_default("check_days_back", 1),
            duplicate_check_days: parse_or_default("duplicate_check_days", 30),
            email_body_max_length: parse_or_default(
                "email_body_max_length",
                DEFAULT_BODY_MAX as u32,
            ) as usize,
            email_subject_max_length: parse_or_default(
                "email_subject_max_length",
                DEFAULT_SUBJECT_MAX as u32,
            ) as usize,
            schedule: ScheduleConfig {
                schedule_type,
                cron_hours: int_list("cron_hours"),
                cron_minutes: int_list("cron_minutes"),
                custom_rule,
                custom_minute: parse_or_default("custom_minute", 0),
                n_hours: parse_or_default("n_hours", 2),
                interval_minutes: parse_or_default("check_interval_minutes", 30),
            },
        }
    }
}
