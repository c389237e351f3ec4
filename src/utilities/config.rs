//! Process configuration loaded from the environment.
//!
//! Everything the service needs is read once at startup into [`OracleConfig`]
//! and handed to the components that need it. Missing credentials are a
//! [`OracleError::Configuration`] so the process refuses to serve.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::quota::QuotaPlans;
use crate::utilities::errors::{OracleError, OracleResult};

/// Path under which the server mounts `image_dir`.
pub const IMAGE_ROUTE: &str = "/images";

/// Which backend holds quota records, readings and reference texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Hosted Supabase project (PostgREST + Storage + Auth).
    Supabase,
    /// Self-hosted SQLite file.
    Sqlite,
}

impl FromStr for StoreKind {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "supabase" => Ok(Self::Supabase),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(OracleError::configuration(format!(
                "Unknown ORACLE_STORE '{}' (expected 'supabase' or 'sqlite')",
                other
            ))),
        }
    }
}

/// Supabase project coordinates.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub api_key: String,
}

/// OpenAI connection settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    /// Timeout for a single completion request.
    pub timeout: Duration,
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreKind,
    /// Present whenever the Supabase backend or auth is in use.
    pub supabase: Option<SupabaseConfig>,
    pub sqlite_path: PathBuf,
    /// Base URL for hexagram images served alongside the SQLite backend.
    pub image_base_url: String,
    /// Directory served at `/images`. Defaults to `images` for the SQLite
    /// store when no external `ORACLE_IMAGE_BASE_URL` is configured.
    pub image_dir: Option<PathBuf>,
    /// When set, reference texts are read from this directory instead of the store.
    pub data_dir: Option<PathBuf>,
    pub llm: LlmConfig,
    pub plans: QuotaPlans,
    pub system_prompt_file: Option<PathBuf>,
    pub follow_up_prompt_file: Option<PathBuf>,
}

impl OracleConfig {
    /// Load configuration from `.env` in the working directory and the
    /// process environment. Process variables take precedence.
    pub fn from_env() -> OracleResult<Self> {
        let mut vars = read_env_file(Path::new(".env"))?;
        vars.extend(std::env::vars());
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> OracleResult<Self> {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let store: StoreKind = get("ORACLE_STORE")
            .as_deref()
            .unwrap_or("supabase")
            .parse()?;

        let supabase = match (get("SUPABASE_URL"), get("SUPABASE_API_KEY")) {
            (Some(url), Some(api_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key,
            }),
            _ => None,
        };
        if store == StoreKind::Supabase && supabase.is_none() {
            return Err(OracleError::configuration(
                "Supabase URL and API key must be set in environment variables",
            ));
        }

        let api_key = get("OPENAI_API_KEY").ok_or_else(|| {
            OracleError::configuration("OpenAI API key not found. Set OPENAI_API_KEY.")
        })?;

        let llm = LlmConfig {
            api_key,
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            base_url: get("OPENAI_BASE_URL"),
            timeout: Duration::from_secs(parse_or(vars, "LLM_TIMEOUT_SECS", 60)?),
        };

        let plans = QuotaPlans {
            free: parse_or(vars, "FREE_PLAN_QUOTA", 10)?,
            premium: parse_or(vars, "PREMIUM_PLAN_QUOTA", 50)?,
            low_threshold: parse_or(vars, "LOW_QUOTA_THRESHOLD", 3)?,
        };

        let port = parse_or(vars, "PORT", 8000)?;

        let external_images = get("ORACLE_IMAGE_BASE_URL");
        let image_dir = get("ORACLE_IMAGE_DIR").map(PathBuf::from).or_else(|| {
            (store == StoreKind::Sqlite && external_images.is_none()).then(|| PathBuf::from("images"))
        });

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            store,
            supabase,
            sqlite_path: get("ORACLE_SQLITE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("oracle.db")),
            image_base_url: external_images
                .unwrap_or_else(|| format!("http://localhost:{}{}", port, IMAGE_ROUTE)),
            image_dir,
            data_dir: get("ORACLE_DATA_DIR").map(PathBuf::from),
            llm,
            plans,
            system_prompt_file: get("SYSTEM_PROMPT_FILE").map(PathBuf::from),
            follow_up_prompt_file: get("FOLLOW_UP_PROMPT_FILE").map(PathBuf::from),
        })
    }

    /// `host:port` the server binds to.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Variables declared in a dotenv file. A missing file yields none.
fn read_env_file(path: &Path) -> OracleResult<HashMap<String, String>> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.collect::<Result<HashMap<_, _>, _>>().map_err(|e| {
            OracleError::configuration(format!("Invalid {}: {}", path.display(), e))
        }),
        Err(e) if e.not_found() => {
            log::debug!("No {} file found, using process environment only", path.display());
            Ok(HashMap::new())
        }
        Err(e) => Err(OracleError::configuration(format!(
            "Cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> OracleResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|e| OracleError::configuration(format!("Invalid {} value '{}': {}", key, raw, e))),
    }
}
