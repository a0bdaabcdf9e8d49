//! Vault configuration, read once at startup from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `PHIVAULT_ENV` | `production` |
//! | `PHIVAULT_KEY_VAULT` | `development` |
//! | `PHIVAULT_KEY_CACHE_TTL_SECS` | 3600 |
//! | `PHIVAULT_KEY_ROTATION_INTERVAL_SECS` | 2592000 (30 days) |
//! | `PHIVAULT_VAULT_TIMEOUT_SECS` | 10 |
//! | `PHIVAULT_AZURE_VAULT_URL`, `PHIVAULT_AZURE_TOKEN` | |
//! | `PHIVAULT_AWS_REGION`, `PHIVAULT_AWS_ENDPOINT` | `us-east-1` |
//! | `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` | |

use crate::error::KeyVaultError;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 86400);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_AWS_REGION: &str = "us-east-1";

// ---------------------------------------------------------------------------
// Runtime mode
// ---------------------------------------------------------------------------

/// Whether development-only facilities (the deterministic provider) may run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuntimeMode {
    Development,
    #[default]
    Production,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        self == RuntimeMode::Development
    }
}

impl FromStr for RuntimeMode {
    type Err = KeyVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "debug" => Ok(RuntimeMode::Development),
            "production" | "prod" => Ok(RuntimeMode::Production),
            other => Err(KeyVaultError::Misconfigured(format!(
                "unknown runtime mode: {}",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Provider selection
// ---------------------------------------------------------------------------

/// Which backend serves keys. Resolved once into a concrete provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyProviderKind {
    /// Deterministic development keys.
    LocalDev,
    /// Azure Key Vault secrets.
    VendorA,
    /// AWS Secrets Manager.
    VendorB,
}

impl FromStr for KeyProviderKind {
    type Err = KeyVaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(KeyProviderKind::LocalDev),
            "azure" => Ok(KeyProviderKind::VendorA),
            "aws" => Ok(KeyProviderKind::VendorB),
            other => Err(KeyVaultError::Misconfigured(format!(
                "unsupported key vault type: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for KeyProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyProviderKind::LocalDev => write!(f, "development"),
            KeyProviderKind::VendorA => write!(f, "azure"),
            KeyProviderKind::VendorB => write!(f, "aws"),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend settings
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AzureSettings {
    pub vault_url: String,
    /// Bearer token for the vault resource. Acquiring it is the caller's job.
    pub token: String,
}

impl fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSettings")
            .field("vault_url", &self.vault_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct AwsSettings {
    pub region: String,
    /// Override for the service endpoint (tests, VPC endpoints, localstack).
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsSettings {
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://secretsmanager.{}.amazonaws.com", self.region),
        }
    }
}

impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// TTL and rotation schedule for the key cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub rotation_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            rotation_interval: DEFAULT_ROTATION_INTERVAL,
        }
    }
}

// ---------------------------------------------------------------------------
// Vault configuration
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct VaultConfig {
    pub mode: RuntimeMode,
    pub provider: KeyProviderKind,
    pub cache: CacheSettings,
    pub request_timeout: Duration,
    pub azure: Option<AzureSettings>,
    pub aws: Option<AwsSettings>,
}

impl VaultConfig {
    /// Local development setup: deterministic keys, default cache settings.
    pub fn development() -> Self {
        Self {
            mode: RuntimeMode::Development,
            provider: KeyProviderKind::LocalDev,
            cache: CacheSettings::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            azure: None,
            aws: None,
        }
    }

    pub fn from_env() -> Result<Self, KeyVaultError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Backend settings are collected when
    /// present and checked when the provider is built.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, KeyVaultError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("PHIVAULT_ENV") {
            Some(v) => v.parse()?,
            None => RuntimeMode::default(),
        };
        let provider = match lookup("PHIVAULT_KEY_VAULT") {
            Some(v) => v.parse()?,
            None => KeyProviderKind::LocalDev,
        };

        let cache = CacheSettings {
            ttl: secs(&lookup, "PHIVAULT_KEY_CACHE_TTL_SECS", DEFAULT_CACHE_TTL)?,
            rotation_interval: secs(
                &lookup,
                "PHIVAULT_KEY_ROTATION_INTERVAL_SECS",
                DEFAULT_ROTATION_INTERVAL,
            )?,
        };
        let request_timeout =
            secs(&lookup, "PHIVAULT_VAULT_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?;

        let azure = lookup("PHIVAULT_AZURE_VAULT_URL").map(|vault_url| AzureSettings {
            vault_url,
            token: lookup("PHIVAULT_AZURE_TOKEN").unwrap_or_default(),
        });

        let aws = match (lookup("AWS_ACCESS_KEY_ID"), lookup("AWS_SECRET_ACCESS_KEY")) {
            (Some(access_key_id), Some(secret_access_key)) => Some(AwsSettings {
                region: lookup("PHIVAULT_AWS_REGION")
                    .unwrap_or_else(|| DEFAULT_AWS_REGION.to_string()),
                endpoint: lookup("PHIVAULT_AWS_ENDPOINT"),
                access_key_id,
                secret_access_key,
                session_token: lookup("AWS_SESSION_TOKEN"),
            }),
            _ => None,
        };

        Ok(Self {
            mode,
            provider,
            cache,
            request_timeout,
            azure,
            aws,
        })
    }
}

fn secs<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, KeyVaultError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                KeyVaultError::Misconfigured(format!(
                    "{} must be whole seconds, got {:?}",
                    name, raw
                ))
            }),
    }
}
