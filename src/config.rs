use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Optional override file read from the working directory.
const CONFIG_FILE: &str = ".sentry-autofix.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration values: {0}")]
    Missing(String),
}

/// Fully resolved configuration; every client gets its section by value.
///
/// Values come from the environment, with `.sentry-autofix.toml` in the
/// working directory able to pre-set any of them (a file value takes
/// precedence over the variable). Everything still missing after the merge
/// is reported in a single error before any client is built.
#[derive(Debug, Clone)]
pub struct Config {
    pub sentry: SentryConfig,
    pub github: GithubConfig,
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone)]
pub struct SentryConfig {
    /// API token with project read scope. `SENTRY_TOKEN`.
    pub token: String,
    /// Organization slug. `SENTRY_ORG`.
    pub org: String,
    /// Project slug. `SENTRY_PROJECT`.
    pub project: String,
    /// API root override, for self-hosted instances and test stubs.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// Token with contents and pull-request write scope. `GITHUB_TOKEN`.
    pub token: String,
    /// Target repository as `owner/name`. `GITHUB_REPO`.
    pub repo: String,
    /// API root override, for test stubs.
    pub api_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// `GEMINI_API_KEY`.
    pub api_key: String,
    /// Model name; a current Gemini Pro is used when unset.
    pub model: Option<String>,
    /// API root override, for test stubs.
    pub base_url: Option<String>,
}

/// File-side view of the configuration: every field optional.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    sentry: RawSentry,

    #[serde(default)]
    github: RawGithub,

    #[serde(default)]
    gemini: RawGemini,
}

#[derive(Debug, Default, Deserialize)]
struct RawSentry {
    token: Option<String>,
    org: Option<String>,
    project: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGithub {
    token: Option<String>,
    repo: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGemini {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
}

impl Config {
    /// Load `.sentry-autofix.toml` if it exists, fill the gaps from the
    /// environment, and verify every required value is present.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            Self::load_from(path)
        } else {
            Self::resolve(RawConfig::default())
        }
    }

    /// Load from a specific path (useful for testing).
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let raw: RawConfig = toml::from_str(&contents)?;
        Self::resolve(raw)
    }

    fn resolve(raw: RawConfig) -> Result<Config, ConfigError> {
        let mut missing: Vec<&str> = Vec::new();
        let mut require = |value: Option<String>, var: &'static str| {
            value.or_else(|| std::env::var(var).ok()).unwrap_or_else(|| {
                missing.push(var);
                String::new()
            })
        };

        let config = Config {
            sentry: SentryConfig {
                token: require(raw.sentry.token, "SENTRY_TOKEN"),
                org: require(raw.sentry.org, "SENTRY_ORG"),
                project: require(raw.sentry.project, "SENTRY_PROJECT"),
                base_url: raw.sentry.base_url,
            },
            github: GithubConfig {
                token: require(raw.github.token, "GITHUB_TOKEN"),
                repo: require(raw.github.repo, "GITHUB_REPO"),
                api_url: raw.github.api_url,
            },
            gemini: GeminiConfig {
                api_key: require(raw.gemini.api_key, "GEMINI_API_KEY"),
                model: raw.gemini.model,
                base_url: raw.gemini.base_url,
            },
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Missing(missing.join(", ")))
        }
    }
}
