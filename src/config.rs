//! Storage settings.
//!
//! Settings live in a YAML document with one section per environment. The
//! document is rendered as a template first, so values can be pulled from the
//! process environment with `{{ env("S3_BUCKET") }}` or
//! `{{ env("S3_REGION", "us-east-1") }}`.

use crate::errors::{StorageError, StorageResult};
use minijinja::{Environment, context};
use serde::Deserialize;
use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

pub const DEFAULT_FOLDER: &str = "";
pub const DEFAULT_THUMB_FOLDER: &str = "tmp/";
pub const DEFAULT_IMPORT_FOLDER: &str = "tmp/";

/// Which object-storage protocol the process talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum ServiceKind {
    #[default]
    S3,
    Gcs,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::S3 => "s3",
            ServiceKind::Gcs => "gcs",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "s3" => Ok(ServiceKind::S3),
            "gcs" => Ok(ServiceKind::Gcs),
            other => Err(StorageError::configuration(format!(
                "unknown service_type `{other}` (expected `s3` or `gcs`)"
            ))),
        }
    }
}

impl TryFrom<String> for ServiceKind {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Connection settings for one environment.
///
/// Folder fields hold the raw configured values; use the accessor methods to
/// get normalized prefixes.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub bucket: String,
    pub folder: Option<String>,
    pub endpoint: Option<String>,
    pub thumb_folder: Option<String>,
    pub import_folder: Option<String>,
    pub region: Option<String>,
    pub service_type: ServiceKind,
    /// Service-account JSON file for GCS. Falls back to ambient Google
    /// credentials when unset.
    pub credential_path: Option<String>,
}

impl StorageConfig {
    pub fn new(bucket: impl Into<String>, service_type: ServiceKind) -> Self {
        Self {
            bucket: bucket.into(),
            service_type,
            ..Self::default()
        }
    }

    /// Primary object folder. Empty means the bucket root.
    pub fn folder(&self) -> String {
        normalize_folder(self.folder.as_deref(), DEFAULT_FOLDER)
    }

    pub fn thumb_folder(&self) -> String {
        normalize_folder(self.thumb_folder.as_deref(), DEFAULT_THUMB_FOLDER)
    }

    pub fn import_folder(&self) -> String {
        normalize_folder(self.import_folder.as_deref(), DEFAULT_IMPORT_FOLDER)
    }

    /// Non-blank endpoint, if any.
    pub fn endpoint(&self) -> Option<&str> {
        present(self.endpoint.as_deref())
    }

    /// Non-blank region, if any.
    pub fn region(&self) -> Option<&str> {
        present(self.region.as_deref())
    }

    pub fn validate(&self) -> StorageResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(StorageError::configuration("bucket must be set"));
        }
        Ok(())
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |value: &Option<String>| value.as_ref().map(|_| "<redacted>");
        f.debug_struct("StorageConfig")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &redact(&self.secret_access_key))
            .field("bucket", &self.bucket)
            .field("folder", &self.folder)
            .field("endpoint", &self.endpoint)
            .field("thumb_folder", &self.thumb_folder)
            .field("import_folder", &self.import_folder)
            .field("region", &self.region)
            .field("service_type", &self.service_type)
            .field("credential_path", &self.credential_path)
            .finish()
    }
}

/// Normalize a folder so it is either `default` (for blank input) or ends
/// with exactly one `/`.
pub fn normalize_folder(raw: Option<&str>, default: &str) -> String {
    let Some(value) = present(raw) else {
        return default.to_string();
    };
    let trimmed = value.trim_end_matches('/');
    if trimmed.is_empty() {
        default.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A settings document plus the environment section to read from it.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    pub path: PathBuf,
    pub environment: String,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
        }
    }

    /// Read, render and parse the document, returning the section for
    /// `self.environment`.
    pub fn load(&self) -> StorageResult<StorageConfig> {
        let source = fs::read_to_string(&self.path).map_err(|err| {
            StorageError::configuration(format!(
                "reading settings file {}: {}",
                self.path.display(),
                err
            ))
        })?;
        let rendered = render_template(&source, &self.path)?;
        let config = parse_section(&rendered, &self.environment)?;
        config.validate()?;
        tracing::debug!(
            "loaded storage settings from {} [{}]",
            self.path.display(),
            self.environment
        );
        Ok(config)
    }

    /// [`load`](Self::load) on the blocking pool, for callers already inside
    /// the runtime.
    pub async fn load_async(self) -> StorageResult<StorageConfig> {
        tokio::task::spawn_blocking(move || self.load())
            .await
            .map_err(|err| StorageError::configuration(format!("settings loader stopped: {err}")))?
    }
}

/// Expand template expressions in a settings document.
fn render_template(source: &str, origin: &Path) -> StorageResult<String> {
    let mut env = Environment::new();
    env.add_function("env", |name: String, default: Option<String>| -> String {
        std::env::var(&name)
            .ok()
            .or(default)
            .unwrap_or_default()
    });
    env.render_str(source, context! {}).map_err(|err| {
        StorageError::configuration(format!(
            "rendering settings template {}: {}",
            origin.display(),
            err
        ))
    })
}

fn parse_section(document: &str, environment: &str) -> StorageResult<StorageConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::from_str(document, config::FileFormat::Yaml))
        .build()
        .map_err(|err| StorageError::configuration(format!("parsing settings: {err}")))?;

    settings.get::<StorageConfig>(environment).map_err(|err| {
        StorageError::configuration(format!(
            "reading `{environment}` section of settings: {err}"
        ))
    })
}
