use secrecy::SecretString;
use std::fmt;
use std::time::Duration;

const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

// Both loops poll every six seconds unless told otherwise.
const DEFAULT_INTERVAL: Duration = Duration::from_secs(6);
const DEFAULT_ASSIGN_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Process configuration, read from the environment.
#[derive(Debug)]
pub struct Config {
    pub telegram_bot_token: SecretString,
    pub telegram_api_url: String,
    pub gitlab_private_token: SecretString,
    pub gitlab_api_url: String,
    pub database_url: String,
    /// Delay between two runs of the Telegram ingestion job.
    pub update_users_interval: Duration,
    /// Delay between two runs of the merge request assignment job.
    pub assign_merge_requests_interval: Duration,
    /// Delay before the first run of the assignment job.
    pub assign_merge_requests_initial_delay: Duration,
    /// Fixed seed for reviewer selection. Random when unset.
    pub reviewer_seed: Option<u64>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let url = |var: &'static str, default: &str| -> String {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
                .trim_end_matches('/')
                .to_string()
        };
        let seconds = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(value) => match value.trim().parse::<u64>() {
                    Ok(0) => Err(ConfigError::Invalid {
                        var,
                        value,
                        reason: "must be at least one second".to_string(),
                    }),
                    Ok(secs) => Ok(Duration::from_secs(secs)),
                    Err(e) => Err(ConfigError::Invalid {
                        var,
                        value,
                        reason: e.to_string(),
                    }),
                },
            }
        };

        let reviewer_seed = match lookup("REVIEWER_SEED") {
            None => None,
            Some(value) => Some(value.trim().parse::<u64>().map_err(|e| {
                ConfigError::Invalid {
                    var: "REVIEWER_SEED",
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?),
        };

        Ok(Config {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN")?.into(),
            telegram_api_url: url("TELEGRAM_API_URL", DEFAULT_TELEGRAM_API_URL),
            gitlab_private_token: required("GITLAB_PRIVATE_TOKEN")?.into(),
            gitlab_api_url: url("GITLAB_API_URL", DEFAULT_GITLAB_API_URL),
            database_url: required("DATABASE_URL")?,
            update_users_interval: seconds("UPDATE_USERS_INTERVAL_SECS", DEFAULT_INTERVAL)?,
            assign_merge_requests_interval: seconds(
                "ASSIGN_MERGE_REQUESTS_INTERVAL_SECS",
                DEFAULT_INTERVAL,
            )?,
            assign_merge_requests_initial_delay: seconds(
                "ASSIGN_MERGE_REQUESTS_INITIAL_DELAY_SECS",
                DEFAULT_ASSIGN_INITIAL_DELAY,
            )?,
            reviewer_seed,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl std::error::Error for ConfigError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "`{var}` must be set"),
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid value `{value}` for `{var}`: {reason}")
            }
        }
    }
}
