//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The
//! configuration file path defaults to `config.yaml` but can be specified via `-f` flag
//! or the `DEEPGUARD_CONFIG` environment variable.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override
//! earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `DEEPGUARD_` override YAML values
//! 3. **DATABASE_URL** - Special case: overrides `database.url` if set
//!
//! For nested config values, use double underscores in environment variables. For
//! example, `DEEPGUARD_AUTH__PASSWORD__MIN_LENGTH=8` sets `auth.password.min_length`.
//!
//! ## Usage
//!
//! ```no_run
//! use clap::Parser;
//! use deepguard::config::{Args, Config};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let args = Args::parse();
//! let config = Config::load(&args)?;
//!
//! println!("Server will bind to {}:{}", config.host, config.port);
//! # Ok(())
//! # }
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use url::Url;

use crate::errors::Error;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DEEPGUARD_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines to catch config errors before deployment.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
///
/// This is the root configuration structure loaded from YAML and environment variables.
/// All fields have sensible defaults defined in the `Default` implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Base URL where the frontend is reachable. Used to build password reset links.
    pub frontend_url: String,
    /// Runtime environment. In development mode, the forgot-password response may carry
    /// the reset token as a fallback when email delivery fails.
    pub environment: Environment,
    /// Convenience override: `DATABASE_URL` takes precedence over `database.url`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// PostgreSQL connection settings
    pub database: DatabaseConfig,
    /// Secret key for JWT signing (required)
    pub secret_key: Option<String>,
    /// Authentication configuration (passwords, sessions, reset tokens)
    pub auth: AuthConfig,
    /// Email configuration for password resets and notifications
    pub email: EmailConfig,
    /// Optional S3-compatible object storage for uploaded images.
    /// When absent, images stay on the local filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    /// External deepfake-classifier invocation settings
    pub detector: DetectorConfig,
    /// CORS configuration for browser clients
    pub cors: CorsConfig,
}

/// Runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// PostgreSQL connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Connection string for the database
    pub url: String,
    /// Connection pool settings
    pub pool: PoolSettings,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/deepguard".to_string(),
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings with the SQLx parameters we tune.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum time to wait for a connection (seconds)
    pub acquire_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_secs: 30,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Password validation rules
    pub password: PasswordConfig,
    /// Session token/cookie configuration
    pub session: SessionConfig,
    /// How long password reset tokens are valid
    #[serde(with = "humantime_serde")]
    pub reset_token_duration: Duration,
}

/// Password validation rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PasswordConfig {
    /// Minimum password length
    pub min_length: usize,
    /// Maximum password length
    pub max_length: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_length: 128,
        }
    }
}

/// Session token and cookie configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Session token expiry duration
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name for the session token
    pub cookie_name: String,
    /// Set Secure flag on cookies (HTTPS only)
    pub cookie_secure: bool,
    /// SameSite cookie attribute ("strict", "lax", or "none")
    pub cookie_same_site: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            cookie_name: "deepguard_token".to_string(),
            cookie_secure: true,
            cookie_same_site: "strict".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            password: PasswordConfig::default(),
            session: SessionConfig::default(),
            reset_token_duration: Duration::from_secs(10 * 60), // 10 minutes
        }
    }
}

/// Email configuration for password resets and notifications.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
// Note: Cannot use deny_unknown_fields here due to #[serde(flatten)] on transport
pub struct EmailConfig {
    /// Email transport method
    #[serde(flatten)]
    pub transport: EmailTransportConfig,
    /// Sender email address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            transport: EmailTransportConfig::default(),
            from_email: "noreply@deepguard.local".to_string(),
            from_name: "DeepGuard".to_string(),
        }
    }
}

/// Email transport configuration - either SMTP or file-based for testing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EmailTransportConfig {
    /// Send emails via SMTP server
    Smtp {
        /// SMTP server hostname
        host: String,
        /// SMTP server port
        port: u16,
        /// SMTP authentication username
        username: String,
        /// SMTP authentication password
        password: String,
        /// Use TLS encryption
        use_tls: bool,
    },
    /// Write emails to files (for development/testing)
    File {
        /// Directory path where email files will be written
        path: String,
    },
}

impl Default for EmailTransportConfig {
    fn default() -> Self {
        Self::File {
            path: "./emails".to_string(),
        }
    }
}

/// S3-compatible object storage configuration (Cloudflare R2, MinIO, AWS S3).
///
/// All fields are required; the section as a whole is optional. An absent section is a
/// valid, permanent steady state in which uploads stay on the local filesystem.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// S3-compatible endpoint URL (e.g., "https://<account>.r2.cloudflarestorage.com")
    pub endpoint: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket: String,
    /// Public base URL for serving stored objects (bucket public URL or custom domain)
    pub public_url: String,
}

/// External classifier invocation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Interpreter used to run the detection script
    pub interpreter: String,
    /// Path to the detection script
    pub script: PathBuf,
    /// Path to the model weights file, passed to the script via `--model`
    pub model: PathBuf,
    /// Directory for transient and locally stored uploads
    pub uploads_dir: PathBuf,
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            script: PathBuf::from("python/detect.py"),
            model: PathBuf::from("models/deepfake_detector.pt"),
            uploads_dir: PathBuf::from("uploads"),
            max_upload_bytes: 10 * 1024 * 1024, // 10 MiB
        }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<Url>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                Url::parse("http://localhost:5173").unwrap(), // Development frontend (Vite)
                Url::parse("http://localhost:3000").unwrap(),
            ],
            allow_credentials: true,
            max_age: Some(3600), // Cache preflight for 1 hour
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            frontend_url: "http://localhost:5173".to_string(),
            environment: Environment::Development,
            database_url: None,
            database: DatabaseConfig::default(),
            secret_key: None,
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            storage: None,
            detector: DetectorConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        // if DATABASE_URL is set, it wins over database.url
        if let Some(url) = config.database_url.take() {
            config.database.url = url;
        }

        config.validate().map_err(|e| figment::Error::from(e.to_string()))?;
        Ok(config)
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("DEEPGUARD_").split("__"))
            // Common DATABASE_URL pattern
            .merge(Env::raw().only(&["DATABASE_URL"]))
    }

    /// Validate the configuration for consistency and required fields
    pub fn validate(&self) -> Result<(), Error> {
        match &self.secret_key {
            None => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key is not configured. \
                     Please set DEEPGUARD_SECRET_KEY environment variable or add secret_key to config file."
                        .to_string(),
                });
            }
            Some(key) if key.len() < 16 => {
                return Err(Error::Internal {
                    operation: "Config validation: secret_key must be at least 16 characters".to_string(),
                });
            }
            Some(_) => {}
        }

        if self.auth.password.min_length > self.auth.password.max_length {
            return Err(Error::Internal {
                operation: format!(
                    "Config validation: Invalid password configuration: min_length ({}) cannot be greater than max_length ({})",
                    self.auth.password.min_length, self.auth.password.max_length
                ),
            });
        }

        if self.auth.password.min_length < 1 {
            return Err(Error::Internal {
                operation: "Config validation: Invalid password configuration: min_length must be at least 1".to_string(),
            });
        }

        // Session expiry bounds (5 minutes to 30 days)
        if self.auth.session.timeout.as_secs() < 300 {
            return Err(Error::Internal {
                operation: "Config validation: session timeout is too short (minimum 5 minutes)".to_string(),
            });
        }
        if self.auth.session.timeout.as_secs() > 86400 * 30 {
            return Err(Error::Internal {
                operation: "Config validation: session timeout is too long (maximum 30 days)".to_string(),
            });
        }

        if self.auth.reset_token_duration.as_secs() < 60 {
            return Err(Error::Internal {
                operation: "Config validation: reset_token_duration is too short (minimum 1 minute)".to_string(),
            });
        }

        if self.detector.max_upload_bytes == 0 {
            return Err(Error::Internal {
                operation: "Config validation: detector.max_upload_bytes cannot be 0".to_string(),
            });
        }

        if self.cors.allowed_origins.is_empty() {
            return Err(Error::Internal {
                operation: "Config validation: CORS allowed_origins cannot be empty. Add at least one allowed origin.".to_string(),
            });
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn args_for(path: &str) -> Args {
        Args {
            config: path.to_string(),
            validate: false,
        }
    }

    #[test]
    fn test_minimal_config_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-secret-key-long-enough
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.host, "0.0.0.0");
            assert_eq!(config.port, 5000);
            assert_eq!(config.environment, Environment::Development);
            assert_eq!(config.auth.password.min_length, 6);
            assert_eq!(config.auth.reset_token_duration, Duration::from_secs(600));
            assert_eq!(config.auth.session.timeout, Duration::from_secs(7 * 24 * 60 * 60));
            assert!(config.storage.is_none());
            assert_eq!(config.detector.interpreter, "python3");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_and_database_url() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-secret-key-long-enough
port: 5000
"#,
            )?;
            jail.set_env("DEEPGUARD_PORT", "8080");
            jail.set_env("DEEPGUARD_AUTH__PASSWORD__MIN_LENGTH", "8");
            jail.set_env("DATABASE_URL", "postgres://db.internal:5432/deepguard_prod");

            let config = Config::load(&args_for("test.yaml"))?;

            assert_eq!(config.port, 8080);
            assert_eq!(config.auth.password.min_length, 8);
            assert_eq!(config.database.url, "postgres://db.internal:5432/deepguard_prod");
            Ok(())
        });
    }

    #[test]
    fn test_storage_section() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-secret-key-long-enough
storage:
  endpoint: https://account.r2.cloudflarestorage.com
  access_key_id: key-id
  secret_access_key: key-secret
  bucket: deepguard-images
  public_url: https://images.example.com
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            let storage = config.storage.expect("storage section should parse");
            assert_eq!(storage.bucket, "deepguard-images");
            assert_eq!(storage.public_url, "https://images.example.com");
            Ok(())
        });
    }

    #[test]
    fn test_email_transport_variants() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-secret-key-long-enough
email:
  type: smtp
  host: smtp.example.com
  port: 587
  username: mailer
  password: hunter2
  use_tls: true
  from_email: noreply@example.com
  from_name: DeepGuard
"#,
            )?;

            let config = Config::load(&args_for("test.yaml"))?;

            assert!(matches!(
                config.email.transport,
                EmailTransportConfig::Smtp { ref host, port: 587, .. } if host == "smtp.example.com"
            ));
            assert_eq!(config.email.from_email, "noreply@example.com");
            Ok(())
        });
    }

    #[test]
    fn test_missing_secret_key_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("test.yaml", "port: 5000\n")?;

            let result = Config::load(&args_for("test.yaml"));
            assert!(result.is_err());
            Ok(())
        });
    }

    #[test]
    fn test_invalid_password_bounds_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "test.yaml",
                r#"
secret_key: a-secret-key-long-enough
auth:
  password:
    min_length: 20
    max_length: 10
"#,
            )?;

            let result = Config::load(&args_for("test.yaml"));
            assert!(result.is_err());
            Ok(())
        });
    }
}
