//! Agent configuration.
//!
//! Defaults can be overridden programmatically through [`ConfigBuilder`] or
//! from `TRACELINE_*` environment variables. Unparseable values fall back
//! to the default rather than failing startup.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process credential presented to the accounts endpoint.
pub(crate) const TRACELINE_AUTHENTICATION: &str = "TRACELINE_AUTHENTICATION";
/// Host of the report endpoint.
pub(crate) const TRACELINE_REPORT_HOST: &str = "TRACELINE_REPORT_HOST";
/// Port of the report endpoint.
pub(crate) const TRACELINE_REPORT_PORT: &str = "TRACELINE_REPORT_PORT";
/// Whether report requests use TLS.
pub(crate) const TRACELINE_REPORT_SSL: &str = "TRACELINE_REPORT_SSL";
/// Whether report payloads are deflate-compressed.
pub(crate) const TRACELINE_REPORT_DEFLATE: &str = "TRACELINE_REPORT_DEFLATE";
/// Host of the accounts (authentication) endpoint.
pub(crate) const TRACELINE_ACCOUNTS_HOST: &str = "TRACELINE_ACCOUNTS_HOST";
/// Port of the accounts endpoint.
pub(crate) const TRACELINE_ACCOUNTS_PORT: &str = "TRACELINE_ACCOUNTS_PORT";
/// Whether accounts requests use TLS.
pub(crate) const TRACELINE_ACCOUNTS_SSL: &str = "TRACELINE_ACCOUNTS_SSL";
/// Delay in milliseconds between two consecutive flush cycles.
pub(crate) const TRACELINE_FLUSH_INTERVAL: &str = "TRACELINE_FLUSH_INTERVAL";
/// Flush on every submitted trace instead of on the timer.
pub(crate) const TRACELINE_CONSTANT_FLUSH: &str = "TRACELINE_CONSTANT_FLUSH";
/// Maximum number of queued completed traces awaiting the worker.
pub(crate) const TRACELINE_MAX_QUEUE_SIZE: &str = "TRACELINE_MAX_QUEUE_SIZE";
/// Maximum time in milliseconds for one delivery attempt.
pub(crate) const TRACELINE_EXPORT_TIMEOUT: &str = "TRACELINE_EXPORT_TIMEOUT";
/// Maximum number of delivery retries per batch.
pub(crate) const TRACELINE_MAX_RETRIES: &str = "TRACELINE_MAX_RETRIES";
/// Hostname reported in the batch envelope.
pub(crate) const TRACELINE_HOSTNAME: &str = "TRACELINE_HOSTNAME";

const DEFAULT_REPORT_HOST: &str = "agent.traceline.io";
const DEFAULT_ACCOUNTS_HOST: &str = "accounts.traceline.io";
const DEFAULT_PORT: u16 = 443;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;
const DEFAULT_MAX_QUEUE_SIZE: usize = 2_048;
const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: usize = 3;

/// Runtime configuration shared by the instrumenter, reporter, and
/// collector client.
#[derive(Clone, Debug)]
pub struct Config {
    /// Process-level credential exchanged for a session token.
    pub authentication: Option<String>,
    /// Host of the report endpoint.
    pub report_host: String,
    /// Port of the report endpoint.
    pub report_port: u16,
    /// Use TLS for report requests.
    pub report_ssl: bool,
    /// Deflate-compress report payloads.
    pub report_deflate: bool,
    /// Host of the accounts endpoint.
    pub accounts_host: String,
    /// Port of the accounts endpoint.
    pub accounts_port: u16,
    /// Use TLS for accounts requests.
    pub accounts_ssl: bool,
    /// Delay between two consecutive flush cycles.
    pub flush_interval: Duration,
    /// Flush immediately on every submitted trace, bypassing the timer.
    /// Intended for deterministic tests.
    pub constant_flush: bool,
    /// Maximum number of queued completed traces; submissions beyond this
    /// are dropped.
    pub max_queue_size: usize,
    /// Upper bound on a single delivery attempt.
    pub export_timeout: Duration,
    /// Maximum number of delivery retries per batch before it is dropped.
    pub max_retries: usize,
    /// Hostname included in the report envelope, if any.
    pub hostname: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

impl Config {
    /// Returns a builder initialized from defaults and the environment.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub(crate) fn report_url(&self, path: &str) -> String {
        base_url(&self.report_host, self.report_port, self.report_ssl) + path
    }

    pub(crate) fn accounts_url(&self, path: &str) -> String {
        base_url(&self.accounts_host, self.accounts_port, self.accounts_ssl) + path
    }
}

fn base_url(host: &str, port: u16, ssl: bool) -> String {
    let scheme = if ssl { "https" } else { "http" };
    format!("{scheme}://{host}:{port}")
}

/// A builder for [`Config`] instances.
#[derive(Clone, Debug)]
pub struct ConfigBuilder {
    authentication: Option<String>,
    report_host: String,
    report_port: u16,
    report_ssl: bool,
    report_deflate: bool,
    accounts_host: String,
    accounts_port: u16,
    accounts_ssl: bool,
    flush_interval: Duration,
    constant_flush: bool,
    max_queue_size: usize,
    export_timeout: Duration,
    max_retries: usize,
    hostname: Option<String>,
}

impl Default for ConfigBuilder {
    /// Create a new [`ConfigBuilder`] initialized with default values,
    /// overridden by any `TRACELINE_*` environment variables that are set.
    fn default() -> Self {
        ConfigBuilder {
            authentication: None,
            report_host: DEFAULT_REPORT_HOST.to_string(),
            report_port: DEFAULT_PORT,
            report_ssl: true,
            report_deflate: true,
            accounts_host: DEFAULT_ACCOUNTS_HOST.to_string(),
            accounts_port: DEFAULT_PORT,
            accounts_ssl: true,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            constant_flush: false,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            export_timeout: Duration::from_millis(DEFAULT_EXPORT_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            hostname: None,
        }
        .init_from_env_vars()
    }
}

impl ConfigBuilder {
    /// Set the process credential.
    pub fn with_authentication(mut self, token: impl Into<String>) -> Self {
        self.authentication = Some(token.into());
        self
    }

    /// Set the report endpoint.
    pub fn with_report_endpoint(mut self, host: impl Into<String>, port: u16, ssl: bool) -> Self {
        self.report_host = host.into();
        self.report_port = port;
        self.report_ssl = ssl;
        self
    }

    /// Enable or disable deflate compression of report payloads.
    pub fn with_report_deflate(mut self, deflate: bool) -> Self {
        self.report_deflate = deflate;
        self
    }

    /// Set the accounts endpoint.
    pub fn with_accounts_endpoint(mut self, host: impl Into<String>, port: u16, ssl: bool) -> Self {
        self.accounts_host = host.into();
        self.accounts_port = port;
        self.accounts_ssl = ssl;
        self
    }

    /// Set the delay between two consecutive flush cycles.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Flush on every submitted trace instead of on the timer.
    pub fn with_constant_flush(mut self, constant_flush: bool) -> Self {
        self.constant_flush = constant_flush;
        self
    }

    /// Set the maximum number of queued completed traces.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set the upper bound on a single delivery attempt.
    pub fn with_export_timeout(mut self, timeout: Duration) -> Self {
        self.export_timeout = timeout;
        self
    }

    /// Set the maximum number of delivery retries per batch.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the hostname reported in the batch envelope.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Build the [`Config`].
    pub fn build(self) -> Config {
        Config {
            authentication: self.authentication,
            report_host: self.report_host,
            report_port: self.report_port,
            report_ssl: self.report_ssl,
            report_deflate: self.report_deflate,
            accounts_host: self.accounts_host,
            accounts_port: self.accounts_port,
            accounts_ssl: self.accounts_ssl,
            flush_interval: self.flush_interval,
            constant_flush: self.constant_flush,
            max_queue_size: self.max_queue_size,
            export_timeout: self.export_timeout,
            max_retries: self.max_retries,
            hostname: self.hostname,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Ok(token) = env::var(TRACELINE_AUTHENTICATION) {
            if !token.is_empty() {
                self.authentication = Some(token);
            }
        }
        if let Ok(host) = env::var(TRACELINE_REPORT_HOST) {
            self.report_host = host;
        }
        if let Some(port) = env_parse::<u16>(TRACELINE_REPORT_PORT) {
            self.report_port = port;
        }
        if let Some(ssl) = env_bool(TRACELINE_REPORT_SSL) {
            self.report_ssl = ssl;
        }
        if let Some(deflate) = env_bool(TRACELINE_REPORT_DEFLATE) {
            self.report_deflate = deflate;
        }
        if let Ok(host) = env::var(TRACELINE_ACCOUNTS_HOST) {
            self.accounts_host = host;
        }
        if let Some(port) = env_parse::<u16>(TRACELINE_ACCOUNTS_PORT) {
            self.accounts_port = port;
        }
        if let Some(ssl) = env_bool(TRACELINE_ACCOUNTS_SSL) {
            self.accounts_ssl = ssl;
        }
        if let Some(interval) = env_parse::<u64>(TRACELINE_FLUSH_INTERVAL) {
            self.flush_interval = Duration::from_millis(interval);
        }
        if let Some(constant_flush) = env_bool(TRACELINE_CONSTANT_FLUSH) {
            self.constant_flush = constant_flush;
        }
        if let Some(max_queue_size) = env_parse::<usize>(TRACELINE_MAX_QUEUE_SIZE) {
            self.max_queue_size = max_queue_size;
        }
        if let Some(timeout) = env_parse::<u64>(TRACELINE_EXPORT_TIMEOUT) {
            self.export_timeout = Duration::from_millis(timeout);
        }
        if let Some(max_retries) = env_parse::<usize>(TRACELINE_MAX_RETRIES) {
            self.max_retries = max_retries;
        }
        if let Ok(hostname) = env::var(TRACELINE_HOSTNAME) {
            if !hostname.is_empty() {
                self.hostname = Some(hostname);
            }
        }
        self
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|value| T::from_str(&value).ok())
}

fn env_bool(name: &str) -> Option<bool> {
    let value = env::var(name).ok()?;
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: [&str; 14] = [
        TRACELINE_AUTHENTICATION,
        TRACELINE_REPORT_HOST,
        TRACELINE_REPORT_PORT,
        TRACELINE_REPORT_SSL,
        TRACELINE_REPORT_DEFLATE,
        TRACELINE_ACCOUNTS_HOST,
        TRACELINE_ACCOUNTS_PORT,
        TRACELINE_ACCOUNTS_SSL,
        TRACELINE_FLUSH_INTERVAL,
        TRACELINE_CONSTANT_FLUSH,
        TRACELINE_MAX_QUEUE_SIZE,
        TRACELINE_EXPORT_TIMEOUT,
        TRACELINE_MAX_RETRIES,
        TRACELINE_HOSTNAME,
    ];

    #[test]
    fn default_config_adheres_to_defaults() {
        let config = temp_env::with_vars_unset(ALL_VARS, Config::default);

        assert_eq!(config.authentication, None);
        assert_eq!(config.report_host, DEFAULT_REPORT_HOST);
        assert_eq!(config.report_port, DEFAULT_PORT);
        assert!(config.report_ssl);
        assert!(config.report_deflate);
        assert_eq!(config.accounts_host, DEFAULT_ACCOUNTS_HOST);
        assert_eq!(
            config.flush_interval,
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)
        );
        assert!(!config.constant_flush);
        assert_eq!(config.max_queue_size, DEFAULT_MAX_QUEUE_SIZE);
        assert_eq!(
            config.export_timeout,
            Duration::from_millis(DEFAULT_EXPORT_TIMEOUT_MS)
        );
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.hostname, None);
    }

    #[test]
    fn config_configurable_by_env_vars() {
        let env_vars = vec![
            (TRACELINE_AUTHENTICATION, Some("secret")),
            (TRACELINE_REPORT_HOST, Some("localhost")),
            (TRACELINE_REPORT_PORT, Some("8080")),
            (TRACELINE_REPORT_SSL, Some("false")),
            (TRACELINE_REPORT_DEFLATE, Some("false")),
            (TRACELINE_FLUSH_INTERVAL, Some("1000")),
            (TRACELINE_CONSTANT_FLUSH, Some("true")),
            (TRACELINE_MAX_RETRIES, Some("7")),
        ];

        let config = temp_env::with_vars(env_vars, Config::default);

        assert_eq!(config.authentication.as_deref(), Some("secret"));
        assert_eq!(config.report_host, "localhost");
        assert_eq!(config.report_port, 8080);
        assert!(!config.report_ssl);
        assert!(!config.report_deflate);
        assert_eq!(config.flush_interval, Duration::from_millis(1000));
        assert!(config.constant_flush);
        assert_eq!(config.max_retries, 7);
    }

    #[test]
    fn invalid_env_values_fall_back_to_defaults() {
        let env_vars = vec![
            (TRACELINE_REPORT_PORT, Some("not-a-port")),
            (TRACELINE_REPORT_SSL, Some("maybe")),
            (TRACELINE_FLUSH_INTERVAL, Some("soon")),
        ];

        let config = temp_env::with_vars(env_vars, Config::default);

        assert_eq!(config.report_port, DEFAULT_PORT);
        assert!(config.report_ssl);
        assert_eq!(
            config.flush_interval,
            Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS)
        );
    }

    #[test]
    fn endpoint_urls_respect_ssl_flag() {
        let config = temp_env::with_vars_unset(ALL_VARS, || {
            Config::builder()
                .with_report_endpoint("localhost", 8080, false)
                .with_accounts_endpoint("localhost", 8081, true)
                .build()
        });

        assert_eq!(config.report_url("/report"), "http://localhost:8080/report");
        assert_eq!(
            config.accounts_url("/agent/authenticate"),
            "https://localhost:8081/agent/authenticate"
        );
    }
}
