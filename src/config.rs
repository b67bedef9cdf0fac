use std::env;
use std::time::Duration;

pub const DEFAULT_REPLICATE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_MODEL_VERSION: &str =
    "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
pub const DEFAULT_TABLE: &str = "emojis";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct ReplicateConfig {
    pub api_token: Option<String>,
    pub base_url: String,
    pub model_version: String,
    pub poll: PollConfig,
}

/// Polling schedule for a prediction.
///
/// The defaults reproduce a fixed one-second interval with no deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub backoff: f64,
    pub max_interval: Option<Duration>,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    pub table: String,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: Option<u16>,
    pub use_psql: bool,
    pub use_memory: bool,
    pub replicate: ReplicateConfig,
    pub supabase: Option<SupabaseConfig>,
    pub postgres: Option<PostgresConfig>,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_secs(1),
            backoff: 1.0,
            max_interval: None,
            deadline: None,
        }
    }
}

impl PollConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let defaults = Self::default();
        let interval = env_parse::<u64>("REPLICATE_POLL_INTERVAL_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval);
        let backoff = env_parse::<f64>("REPLICATE_POLL_BACKOFF").unwrap_or(defaults.backoff);
        let max_interval =
            env_parse::<u64>("REPLICATE_MAX_POLL_INTERVAL_MS").map(Duration::from_millis);
        let deadline = env_parse::<u64>("REPLICATE_TIMEOUT_SECS").map(Duration::from_secs);

        PollConfig {
            interval,
            backoff,
            max_interval,
            deadline,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = factor;
        self.max_interval = Some(max_interval);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Delay before poll number `attempt` (0-based, counted after the first fetch).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = if self.backoff.is_finite() && self.backoff > 1.0 {
            self.backoff.powi(attempt.min(32) as i32)
        } else {
            1.0
        };
        let nanos = (self.interval.as_nanos() as f64 * factor.min(1.0e6)).round();
        let delay = Duration::from_nanos(nanos.min(u64::MAX as f64) as u64);
        match self.max_interval {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for ReplicateConfig {
    fn default() -> Self {
        ReplicateConfig {
            api_token: None,
            base_url: DEFAULT_REPLICATE_URL.to_string(),
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            poll: PollConfig::default(),
        }
    }
}

impl ReplicateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let api_token = env::var("REPLICATE_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let base_url =
            env::var("REPLICATE_BASE_URL").unwrap_or_else(|_| DEFAULT_REPLICATE_URL.to_string());
        let model_version = env::var("REPLICATE_MODEL_VERSION")
            .unwrap_or_else(|_| DEFAULT_MODEL_VERSION.to_string());

        ReplicateConfig {
            api_token,
            base_url,
            model_version,
            poll: PollConfig::from_env(),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        SupabaseConfig {
            url: None,
            key: None,
            table: DEFAULT_TABLE.to_string(),
        }
    }
}

impl SupabaseConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        SupabaseConfig {
            url: env::var("SUPABASE_URL").ok(),
            key: env::var("SUPABASE_KEY").ok(),
            table: env::var("SUPABASE_TABLE").unwrap_or_else(|_| DEFAULT_TABLE.to_string()),
        }
    }

    pub fn with_credentials(mut self, url: impl Into<String>, key: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self.key = Some(key.into());
        self
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() && self.key.is_some()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
        }
    }
}

impl PostgresConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        PostgresConfig {
            host: env::var("POSTGRES_HOST").ok(),
            port: env_parse("POSTGRES_PORT"),
            username: env::var("POSTGRES_USERNAME").ok(),
            password: env::var("POSTGRES_PASSWORD").ok(),
            database: env::var("POSTGRES_DATABASE").ok(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_connection_info(
        mut self,
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
    ) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self.database = Some(database.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: None,
            use_psql: false,
            use_memory: false,
            replicate: ReplicateConfig::default(),
            supabase: None,
            postgres: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let port = env_parse("PORT");
        let use_psql = env_flag("USE_PSQL");
        let use_memory = env_flag("USE_MEMORY_STORE");
        let supabase = Some(SupabaseConfig::from_env()).filter(SupabaseConfig::is_configured);
        let postgres = if use_psql {
            Some(PostgresConfig::from_env())
        } else {
            None
        };

        Config {
            port,
            use_psql,
            use_memory,
            replicate: ReplicateConfig::from_env(),
            supabase,
            postgres,
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_replicate(mut self, config: ReplicateConfig) -> Self {
        self.replicate = config;
        self
    }

    pub fn with_supabase(mut self, config: SupabaseConfig) -> Self {
        self.supabase = Some(config);
        self
    }

    pub fn with_postgres(mut self, config: PostgresConfig) -> Self {
        self.postgres = Some(config);
        self.use_psql = true;
        self
    }

    pub fn with_memory_store(mut self) -> Self {
        self.use_memory = true;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> bool {
    env::var(key).ok().map_or(false, |val| val == "true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_is_fixed_one_second() {
        let poll = PollConfig::default();
        assert_eq!(poll.delay_for(0), Duration::from_secs(1));
        assert_eq!(poll.delay_for(10), Duration::from_secs(1));
        assert!(poll.deadline.is_none());
    }

    #[test]
    fn test_backoff_is_capped() {
        let poll = PollConfig::new()
            .with_interval(Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_millis(500));
        assert_eq!(poll.delay_for(0), Duration::from_millis(100));
        assert_eq!(poll.delay_for(1), Duration::from_millis(200));
        assert_eq!(poll.delay_for(2), Duration::from_millis(400));
        assert_eq!(poll.delay_for(3), Duration::from_millis(500));
        assert_eq!(poll.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_builders() {
        let config = Config::new()
            .with_port(8080)
            .with_replicate(ReplicateConfig::new().with_token("r8_test"))
            .with_supabase(SupabaseConfig::new().with_credentials("https://x.supabase.co", "k"));
        assert_eq!(config.port(), 8080);
        assert_eq!(config.replicate.api_token.as_deref(), Some("r8_test"));
        assert_eq!(config.replicate.base_url, DEFAULT_REPLICATE_URL);
        assert!(config.supabase.as_ref().map_or(false, |s| s.is_configured()));
        assert_eq!(Config::new().port(), DEFAULT_PORT);
    }
}
