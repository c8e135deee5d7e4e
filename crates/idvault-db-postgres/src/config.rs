//! Configuration types for the PostgreSQL storage backend.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx_postgres::{PgConnectOptions, PgSslMode};

use idvault_storage::{BackendSetup, SetupError};

/// Environment variable naming the database host. Its absence means the
/// PostgreSQL battery is skipped.
pub const ENV_HOST: &str = "IDVAULT_POSTGRES_HOST";
pub const ENV_DATABASE: &str = "IDVAULT_POSTGRES_DATABASE";
pub const ENV_USER: &str = "IDVAULT_POSTGRES_USER";
pub const ENV_PASSWORD: &str = "IDVAULT_POSTGRES_PASSWORD";
pub const ENV_SSL_MODE: &str = "IDVAULT_POSTGRES_SSL_MODE";
pub const ENV_CONNECTION_TIMEOUT: &str = "IDVAULT_POSTGRES_CONNECTION_TIMEOUT";

const DEFAULT_PORT: u16 = 5432;

/// TLS mode used when connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Require,
    VerifyCa,
    #[default]
    VerifyFull,
}

impl SslMode {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Require => "require",
            Self::VerifyCa => "verify-ca",
            Self::VerifyFull => "verify-full",
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SslMode {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(SetupError::config(format!(
                "unsupported SSL mode '{other}' (expected disable, require, verify-ca or verify-full)"
            ))),
        }
    }
}

impl From<SslMode> for PgSslMode {
    fn from(mode: SslMode) -> Self {
        match mode {
            SslMode::Disable => PgSslMode::Disable,
            SslMode::Require => PgSslMode::Require,
            SslMode::VerifyCa => PgSslMode::VerifyCa,
            SslMode::VerifyFull => PgSslMode::VerifyFull,
        }
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresSsl {
    pub mode: SslMode,
    /// CA certificate used to verify the server.
    pub ca_file: Option<PathBuf>,
    /// Client certificate for mutual TLS.
    pub cert_file: Option<PathBuf>,
    /// Key for `cert_file`.
    pub key_file: Option<PathBuf>,
}

/// Configuration for the PostgreSQL storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub ssl: PostgresSsl,

    /// Bound on establishing a connection, in seconds.
    pub connection_timeout_secs: u64,

    /// Connection pool size (maximum number of connections).
    pub pool_size: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PORT,
            database: "postgres".into(),
            user: "postgres".into(),
            password: "postgres".into(),
            ssl: PostgresSsl::default(),
            connection_timeout_secs: 5,
            pool_size: 10,
        }
    }
}

impl PostgresConfig {
    /// Creates a configuration for the given host.
    ///
    /// A `host:port` (or `[v6addr]:port`) string sets the port too.
    #[must_use]
    pub fn new(host: &str) -> Self {
        let (host, port) = split_host_port(host);
        Self {
            host,
            port: port.unwrap_or(DEFAULT_PORT),
            ..Default::default()
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Config` if a variable is present but invalid.
    pub fn from_env() -> Result<BackendSetup<Self>, SetupError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through an arbitrary variable lookup.
    ///
    /// Empty values count as unset. Returns `BackendSetup::Unconfigured` when
    /// no host is given.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Config` if a variable is present but invalid.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<BackendSetup<Self>, SetupError> {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let Some(host) = get(ENV_HOST) else {
            return Ok(BackendSetup::unconfigured(format!(
                "environment variable {ENV_HOST} not set"
            )));
        };

        let mut config = Self::new(&host);
        if let Some(database) = get(ENV_DATABASE) {
            config.database = database;
        }
        if let Some(user) = get(ENV_USER) {
            config.user = user;
        }
        if let Some(password) = get(ENV_PASSWORD) {
            config.password = password;
        }
        if let Some(mode) = get(ENV_SSL_MODE) {
            config.ssl.mode = mode.parse()?;
        }
        if let Some(timeout) = get(ENV_CONNECTION_TIMEOUT) {
            config.connection_timeout_secs = timeout.trim().parse().map_err(|_| {
                SetupError::config(format!(
                    "{ENV_CONNECTION_TIMEOUT} must be a number of seconds, got '{timeout}'"
                ))
            })?;
        }

        Ok(BackendSetup::Ready(config))
    }

    /// Sets the database name.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Sets the TLS mode.
    #[must_use]
    pub fn with_ssl_mode(mut self, mode: SslMode) -> Self {
        self.ssl.mode = mode;
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn with_connection_timeout_secs(mut self, secs: u64) -> Self {
        self.connection_timeout_secs = secs;
        self
    }

    /// Sets the pool size.
    #[must_use]
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Connection timeout as a `Duration`; zero is raised to one second.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs.max(1))
    }

    /// Checks invariants that the driver would otherwise report late.
    ///
    /// # Errors
    ///
    /// Returns `SetupError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.host.is_empty() {
            return Err(SetupError::config("host must not be empty"));
        }
        if self.database.is_empty() {
            return Err(SetupError::config("database must not be empty"));
        }
        if self.pool_size == 0 {
            return Err(SetupError::config("pool size must be at least 1"));
        }
        if self.ssl.cert_file.is_some() != self.ssl.key_file.is_some() {
            return Err(SetupError::config(
                "SSL cert_file and key_file must be given together",
            ));
        }
        Ok(())
    }

    /// Driver connection options.
    #[must_use]
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
            .ssl_mode(self.ssl.mode.into());

        if let Some(ca_file) = &self.ssl.ca_file {
            options = options.ssl_root_cert(ca_file);
        }
        if let Some(cert_file) = &self.ssl.cert_file {
            options = options.ssl_client_cert(cert_file);
        }
        if let Some(key_file) = &self.ssl.key_file {
            options = options.ssl_client_key(key_file);
        }
        options
    }

    /// Connection URL with the password masked, for logging.
    #[must_use]
    pub fn display_url(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        format!(
            "postgres://{}:****@{}:{}/{}?sslmode={}",
            self.user, host, self.port, self.database, self.ssl.mode
        )
    }
}

/// Splits `host:port` and `[v6addr]:port`; a bare IPv6 address is left whole.
fn split_host_port(input: &str) -> (String, Option<u16>) {
    if let Some(rest) = input.strip_prefix('[')
        && let Some((host, tail)) = rest.split_once(']')
    {
        let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
        return (host.to_string(), port);
    }

    match input.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host.to_string(), Some(port)),
            Err(_) => (input.to_string(), None),
        },
        _ => (input.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = PostgresConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "postgres");
        assert_eq!(config.user, "postgres");
        assert_eq!(config.connection_timeout_secs, 5);
        assert_eq!(config.ssl.mode, SslMode::VerifyFull);
    }

    #[test]
    fn test_missing_host_is_unconfigured() {
        let setup = PostgresConfig::from_lookup(lookup(&[(ENV_USER, "dex")])).unwrap();
        match setup {
            BackendSetup::Unconfigured { reason } => assert!(reason.contains(ENV_HOST)),
            BackendSetup::Ready(_) => panic!("expected unconfigured"),
        }

        let setup = PostgresConfig::from_lookup(lookup(&[(ENV_HOST, "")])).unwrap();
        assert!(!setup.is_ready());
    }

    #[test]
    fn test_from_lookup_reads_every_option() {
        let setup = PostgresConfig::from_lookup(lookup(&[
            (ENV_HOST, "db.internal:6543"),
            (ENV_DATABASE, "idvault"),
            (ENV_USER, "svc"),
            (ENV_PASSWORD, "hunter2"),
            (ENV_SSL_MODE, "disable"),
            (ENV_CONNECTION_TIMEOUT, "7"),
        ]))
        .unwrap();

        let BackendSetup::Ready(config) = setup else {
            panic!("expected ready");
        };
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 6543);
        assert_eq!(config.database, "idvault");
        assert_eq!(config.user, "svc");
        assert_eq!(config.password, "hunter2");
        assert_eq!(config.ssl.mode, SslMode::Disable);
        assert_eq!(config.connection_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = PostgresConfig::from_lookup(lookup(&[
            (ENV_HOST, "localhost"),
            (ENV_SSL_MODE, "prefer"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SetupError::Config { .. }));

        let err = PostgresConfig::from_lookup(lookup(&[
            (ENV_HOST, "localhost"),
            (ENV_CONNECTION_TIMEOUT, "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(ENV_CONNECTION_TIMEOUT));
    }

    #[test]
    fn test_ssl_mode_round_trip() {
        for mode in [
            SslMode::Disable,
            SslMode::Require,
            SslMode::VerifyCa,
            SslMode::VerifyFull,
        ] {
            assert_eq!(mode.as_str().parse::<SslMode>().unwrap(), mode);
        }
        assert_eq!("VERIFY-CA".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("localhost"), ("localhost".into(), None));
        assert_eq!(split_host_port("db:5433"), ("db".into(), Some(5433)));
        assert_eq!(split_host_port("[::1]:5434"), ("::1".into(), Some(5434)));
        assert_eq!(split_host_port("[::1]"), ("::1".into(), None));
        assert_eq!(split_host_port("::1"), ("::1".into(), None));
    }

    #[test]
    fn test_validate() {
        assert!(PostgresConfig::default().validate().is_ok());
        assert!(PostgresConfig::default().with_pool_size(0).validate().is_err());

        let mut config = PostgresConfig::default();
        config.ssl.cert_file = Some("client.crt".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_url_masks_password() {
        let config = PostgresConfig::new("db:5433")
            .with_credentials("svc", "secret")
            .with_ssl_mode(SslMode::Disable);
        let url = config.display_url();
        assert_eq!(url, "postgres://svc:****@db:5433/postgres?sslmode=disable");
        assert!(!url.contains("secret"));
    }
}
