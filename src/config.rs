use std::env;
use std::path::PathBuf;
use std::time::Duration;

// Defaults
const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_DATA_DIR: &str = "database";
const DEFAULT_SESSION_HOURS: u64 = 24;
const MAX_SESSION_HOURS: u64 = 24 * 365;
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// SMTP relay used to send password reset codes
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Runtime configuration of the server
///
/// Every field can be overridden with a `LEARNLAB_*` environment variable.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on (`LEARNLAB_BIND`)
    pub bind: String,

    /// Directory holding the snapshot and uploaded media (`LEARNLAB_DATA_DIR`)
    pub data_dir: PathBuf,

    /// Persist the database to `<data_dir>/learnlab.bin.gz` (`LEARNLAB_PERSIST`)
    pub persist: bool,

    /// Prebuilt frontend served for non-API paths (`LEARNLAB_STATIC_DIR`)
    pub static_dir: Option<PathBuf>,

    /// Lifetime of a login session (`LEARNLAB_SESSION_HOURS`)
    pub session_ttl: Duration,

    /// Allowed CORS origin for the frontend dev server (`LEARNLAB_CORS_ORIGIN`)
    pub cors_origin: Option<String>,

    /// `LEARNLAB_SMTP_HOST`, `_PORT`, `_USER`, `_PASSWORD`, `_FROM`
    pub smtp: Option<SmtpConfig>,

    /// `LEARNLAB_GEMINI_KEY`, `LEARNLAB_GEMINI_MODEL`
    pub gemini_key: Option<String>,
    pub gemini_model: String,

    /// `LEARNLAB_SEARCH_KEY`, `LEARNLAB_SEARCH_ENGINE`
    pub search_key: Option<String>,
    pub search_engine: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: DEFAULT_BIND.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            persist: true,
            static_dir: None,
            session_ttl: session_ttl(DEFAULT_SESSION_HOURS),
            cors_origin: None,
            smtp: None,
            gemini_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            search_key: None,
            search_engine: None,
        }
    }
}

/// Session lifetime for a number of hours, capped at one year
fn session_ttl(hours: u64) -> Duration {
    Duration::from_secs(hours.min(MAX_SESSION_HOURS) * 60 * 60)
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Build the configuration from the process environment
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let session_hours = var("LEARNLAB_SESSION_HOURS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_SESSION_HOURS)
            .min(MAX_SESSION_HOURS);

        let smtp = match (var("LEARNLAB_SMTP_HOST"), var("LEARNLAB_SMTP_USER")) {
            (Some(host), Some(username)) => Some(SmtpConfig {
                port: var("LEARNLAB_SMTP_PORT")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(465),
                password: var("LEARNLAB_SMTP_PASSWORD").unwrap_or_default(),
                from: var("LEARNLAB_SMTP_FROM").unwrap_or_else(|| username.clone()),
                host,
                username,
            }),
            _ => None,
        };

        Config {
            bind: var("LEARNLAB_BIND").unwrap_or(defaults.bind),
            data_dir: var("LEARNLAB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            persist: var("LEARNLAB_PERSIST")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(defaults.persist),
            static_dir: var("LEARNLAB_STATIC_DIR").map(PathBuf::from),
            session_ttl: session_ttl(session_hours),
            cors_origin: var("LEARNLAB_CORS_ORIGIN"),
            smtp,
            gemini_key: var("LEARNLAB_GEMINI_KEY"),
            gemini_model: var("LEARNLAB_GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            search_key: var("LEARNLAB_SEARCH_KEY"),
            search_engine: var("LEARNLAB_SEARCH_ENGINE"),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("learnlab.bin.gz")
    }

    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_lifetime_is_capped() {
        assert_eq!(session_ttl(24), Duration::from_secs(24 * 3600));
        assert_eq!(session_ttl(u64::MAX), Duration::from_secs(MAX_SESSION_HOURS * 3600));
    }
}
