use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::domain::models::SyncOptions;

/// Optional YAML config file. Environment variables override anything set
/// here; built-in defaults fill the rest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<String>,
    database_url: Option<String>,
    bind_addr: Option<String>,
    sync_interval: Option<String>,
    shutdown_deadline_seconds: Option<u64>,
    hardcover_rate_limit_ms: Option<u64>,
    mismatch_output_dir: Option<String>,
    sync: Option<SyncOptions>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    /// Explicit connection string; absent means SQLite under `data_dir`.
    pub database_url: Option<String>,
    pub bind_addr: String,
    /// Zero disables the periodic ticker.
    pub sync_interval: Duration,
    pub shutdown_deadline: Duration,
    pub hardcover_rate_limit_ms: u64,
    pub mismatch_output_dir: PathBuf,
    pub force_full_sync: bool,
    /// Global defaults; each profile's stored options are merged on top.
    pub defaults: SyncOptions,
    // Legacy single-profile environment; used to seed a "default" profile
    // when the store is empty.
    pub legacy_abs_url: Option<String>,
    pub legacy_abs_token: Option<String>,
    pub legacy_hc_token: Option<String>,
}

impl AppConfig {
    pub fn load() -> Self {
        let file = std::env::var("CONFIG_FILE")
            .ok()
            .and_then(|path| match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_yml::from_str::<ConfigFile>(&raw) {
                    Ok(parsed) => Some(parsed),
                    Err(e) => {
                        tracing::warn!(%path, error = %e, "ignoring unparseable config file");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(%path, error = %e, "ignoring unreadable config file");
                    None
                }
            })
            .unwrap_or_default();

        let data_dir = env_str("DATA_DIR")
            .or(file.data_dir)
            .unwrap_or_else(|| "./data".to_string());
        let data_dir = PathBuf::from(data_dir);

        let mut defaults = file.sync.unwrap_or_default();
        apply_sync_env(&mut defaults);

        let sync_interval = env_str("SYNC_INTERVAL")
            .or(file.sync_interval)
            .map(|s| parse_duration_str(&s).unwrap_or(Duration::ZERO))
            .unwrap_or(Duration::ZERO);

        let mismatch_output_dir = env_str("MISMATCH_OUTPUT_DIR")
            .or(file.mismatch_output_dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("mismatches"));

        AppConfig {
            database_url: env_str("DATABASE_URL").or(file.database_url),
            bind_addr: env_str("BIND_ADDR")
                .or(file.bind_addr)
                .unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            sync_interval,
            shutdown_deadline: Duration::from_secs(
                env_parse::<u64>("SHUTDOWN_DEADLINE_SECONDS")
                    .or(file.shutdown_deadline_seconds)
                    .unwrap_or(30),
            ),
            hardcover_rate_limit_ms: env_parse::<u64>("HARDCOVER_RATE_LIMIT")
                .or(file.hardcover_rate_limit_ms)
                .unwrap_or(1500),
            mismatch_output_dir,
            force_full_sync: env_bool("FORCE_FULL_SYNC").unwrap_or(false),
            defaults,
            legacy_abs_url: env_str("AUDIOBOOKSHELF_URL"),
            legacy_abs_token: env_str("AUDIOBOOKSHELF_TOKEN"),
            legacy_hc_token: env_str("HARDCOVER_TOKEN"),
            data_dir,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("BIND_ADDR is not a socket address: {}", self.bind_addr));
        }
        if self.hardcover_rate_limit_ms == 0 {
            return Err("HARDCOVER_RATE_LIMIT must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.defaults.minimum_progress) {
            return Err(format!(
                "MINIMUM_PROGRESS_THRESHOLD out of range [0,1]: {}",
                self.defaults.minimum_progress
            ));
        }
        let legacy = [
            self.legacy_abs_url.is_some(),
            self.legacy_abs_token.is_some(),
            self.legacy_hc_token.is_some(),
        ];
        if legacy.iter().any(|p| *p) && !legacy.iter().all(|p| *p) {
            return Err(
                "legacy mode needs AUDIOBOOKSHELF_URL, AUDIOBOOKSHELF_TOKEN and HARDCOVER_TOKEN together"
                    .into(),
            );
        }
        Ok(())
    }

    pub fn legacy_profile(&self) -> Option<(String, String, String)> {
        match (
            &self.legacy_abs_url,
            &self.legacy_abs_token,
            &self.legacy_hc_token,
        ) {
            (Some(url), Some(abs), Some(hc)) => Some((url.clone(), abs.clone(), hc.clone())),
            _ => None,
        }
    }

    pub fn database_url_or_default(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}?mode=rwc",
                self.data_dir.join("audiobookshelf-sync.db").display()
            )
        })
    }
}

fn apply_sync_env(opts: &mut SyncOptions) {
    if let Some(v) = env_bool("INCREMENTAL_SYNC_MODE") {
        opts.incremental = v;
    }
    if let Some(v) = env_str("SYNC_STATE_FILE") {
        opts.state_file_override = v;
    }
    if let Some(v) = env_parse::<f64>("MINIMUM_PROGRESS_THRESHOLD") {
        opts.minimum_progress = v;
    }
    if let Some(v) = env_bool("SYNC_WANT_TO_READ") {
        opts.sync_want_to_read = v;
    }
    if let Some(v) = env_bool("SYNC_OWNED") {
        opts.sync_owned = v;
    }
    if let Some(v) = env_bool("DRY_RUN") {
        opts.dry_run = v;
    }
    if let Some(v) = env_str("TEST_BOOK_FILTER") {
        opts.test_book_filter = v;
    }
    if let Some(v) = env_parse::<usize>("TEST_BOOK_LIMIT") {
        opts.test_book_limit = v;
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
    env_str(name).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_str(name).and_then(|v| v.parse().ok())
}

/// Parse "90s" / "15m" / "1h" / "2d" style durations. A bare number is
/// seconds. "0" disables whatever the value drives.
pub fn parse_duration_str(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (value, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(split) => raw.split_at(split),
        None => (raw, "s"),
    };
    let value: u64 = value.parse().ok()?;
    let secs = match unit.trim() {
        "s" | "sec" | "secs" => value,
        "m" | "min" | "mins" => value * 60,
        "h" | "hr" | "hrs" => value * 3600,
        "d" => value * 86_400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_strings_parse() {
        assert_eq!(parse_duration_str("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration_str("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration_str("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration_str("42"), Some(Duration::from_secs(42)));
        assert_eq!(parse_duration_str("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration_str("1 fortnight"), None);
        assert_eq!(parse_duration_str(""), None);
    }

    #[test]
    fn config_file_yaml_parses() {
        let raw = r#"
data_dir: /var/lib/sync
sync_interval: 1h
sync:
  minimum_progress: 0.05
  sync_owned: false
"#;
        let file: ConfigFile = serde_yml::from_str(raw).unwrap();
        assert_eq!(file.data_dir.as_deref(), Some("/var/lib/sync"));
        assert_eq!(file.sync_interval.as_deref(), Some("1h"));
        let sync = file.sync.unwrap();
        assert_eq!(sync.minimum_progress, 0.05);
        assert!(!sync.sync_owned);
    }
}
