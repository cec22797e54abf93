use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    dedup::DedupConfig,
    domain::DestinationId,
    errors::Error,
    filter::{FilterConfig, DEFAULT_INCLUDE_PATTERN},
    Result,
};

/// Typed configuration, read from the environment (and `.env`) once at startup.
#[derive(Clone)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub destination: DestinationId,
    pub poll_timeout: Duration,

    // Filtering
    pub include_pattern: String,
    pub exclude_keywords: Vec<String>,

    // State files and dedup
    pub state: StateConfig,

    // Reconnect
    pub max_retries: u32,
    pub retry_delay: Duration,

    // Logging
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

/// The subset of configuration that names on-disk state.
///
/// Loadable without credentials so `status` and `unlock` work on a host that
/// only has the state files.
#[derive(Clone, Debug)]
pub struct StateConfig {
    pub hash_db_file: PathBuf,
    pub lock_file: PathBuf,
    pub lock_stale_after: Duration,
    pub dedup: DedupConfig,
}

impl StateConfig {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let hash_db_file = PathBuf::from(
            get("HASH_DB_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "forwarded_hashes.json".to_string()),
        );
        let lock_file = PathBuf::from(
            get("LOCK_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "monitor.lock".to_string()),
        );
        let lock_stale_after = Duration::from_secs(parse_num(&get, "LOCK_STALE_SECS")?.unwrap_or(300));

        let retention_hours: u64 = parse_num(&get, "RETENTION_HOURS")?.unwrap_or(24);
        if retention_hours == 0 {
            return Err(Error::Config("RETENTION_HOURS must be at least 1".to_string()));
        }
        let retention_secs = retention_hours
            .checked_mul(60 * 60)
            .ok_or_else(|| Error::Config(format!("RETENTION_HOURS is too large: {retention_hours}")))?;
        let high_water: usize = parse_num(&get, "DEDUP_HIGH_WATER")?.unwrap_or(10_000);
        let low_water: usize = parse_num(&get, "DEDUP_LOW_WATER")?.unwrap_or(5_000);
        if low_water >= high_water {
            return Err(Error::Config(format!(
                "DEDUP_LOW_WATER ({low_water}) must be below DEDUP_HIGH_WATER ({high_water})"
            )));
        }

        Ok(Self {
            hash_db_file,
            lock_file,
            lock_stale_after,
            dedup: DedupConfig {
                retention: Duration::from_secs(retention_secs),
                high_water,
                low_water,
            },
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").and_then(non_empty).ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;

        let raw_target = get("TARGET_CHANNEL").and_then(non_empty).ok_or_else(|| {
            Error::Config("TARGET_CHANNEL environment variable is required".to_string())
        })?;
        let destination = DestinationId::parse(&raw_target).ok_or_else(|| {
            Error::Config(format!("TARGET_CHANNEL is not a chat id or username: {raw_target:?}"))
        })?;

        let include_pattern = get("KEYWORD_PATTERN")
            .and_then(non_empty)
            .unwrap_or_else(|| DEFAULT_INCLUDE_PATTERN.to_string());
        let exclude_keywords = parse_csv(get("EXCLUDE_KEYWORDS"));

        // Fail at startup rather than on the first message.
        FilterConfig::new(&include_pattern, &exclude_keywords)?;

        let state = StateConfig::from_lookup(&get)?;

        let max_retries = parse_num(&get, "MAX_RETRIES")?.unwrap_or(5);
        let retry_delay = Duration::from_secs(parse_num(&get, "RETRY_DELAY_SECS")?.unwrap_or(30));
        let poll_timeout = Duration::from_secs(parse_num(&get, "POLL_TIMEOUT_SECS")?.unwrap_or(30));

        let log_level = get("LOG_LEVEL")
            .and_then(non_empty)
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "info".to_string());
        let log_file = get("LOG_FILE").and_then(non_empty).map(PathBuf::from);

        Ok(Self {
            telegram_bot_token,
            destination,
            poll_timeout,
            include_pattern,
            exclude_keywords,
            state,
            max_retries,
            retry_delay,
            log_level,
            log_file,
        })
    }

    pub fn filter_config(&self) -> Result<FilterConfig> {
        FilterConfig::new(&self.include_pattern, &self.exclude_keywords)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("telegram_bot_token", &"<redacted>")
            .field("destination", &self.destination)
            .field("poll_timeout", &self.poll_timeout)
            .field("include_pattern", &self.include_pattern)
            .field("exclude_keywords", &self.exclude_keywords)
            .field("state", &self.state)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .finish()
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key).and_then(non_empty) {
        None => Ok(None),
        Some(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got {s:?}"))),
    }
}

fn parse_csv(v: Option<String>) -> Vec<String> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
