use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use lc_common::odm::OdmTarget;
use lc_common::records::{CoercionFallback, InferencePolicy};
use lc_common::soap::Credentials;
use lc_common::sparql::{read_query_file, BasicAuth};
use serde::Deserialize;

use crate::error::ConfigError;

/// Process environment. Endpoints and credentials come from here, everything describing the
/// study comes from the upload config file.
#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "LC_ENDPOINT")]
    pub lc_endpoint: NonEmptyString,

    #[envconfig(from = "LC_USER")]
    pub lc_user: String,

    // Already hashed, LibreClinica compares it verbatim.
    #[envconfig(from = "LC_PASSWORD")]
    pub lc_password: String,

    #[envconfig(from = "SPARQL_QUERY_ENDPOINT")]
    pub sparql_query_endpoint: NonEmptyString,

    #[envconfig(from = "SPARQL_USER")]
    pub sparql_user: Option<String>,

    #[envconfig(from = "SPARQL_PASSWORD")]
    pub sparql_password: Option<String>,

    #[envconfig(
        from = "UPLOAD_CONFIG_PATH",
        default = "/libre_clinica/upload_config.yaml"
    )]
    pub upload_config_path: String,

    #[envconfig(from = "REQUEST_TIMEOUT", default = "60000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(from = "MAX_RECHECKS", default = "1")]
    pub max_rechecks: u32,

    #[envconfig(from = "RECHECK_INTERVAL", default = "0")]
    pub recheck_interval: EnvMsDuration,

    #[envconfig(from = "INFERENCE_SAMPLE_SIZE", default = "1")]
    pub inference_sample_size: usize,

    #[envconfig(from = "INFERENCE_FALLBACK", default = "missing")]
    pub inference_fallback: CoercionFallback,
}

impl Config {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.lc_user.to_owned(),
            password: self.lc_password.to_owned(),
        }
    }

    /// Basic auth for the SPARQL endpoint, only when a user is configured.
    pub fn sparql_auth(&self) -> Option<BasicAuth> {
        self.sparql_user.as_ref().map(|username| BasicAuth {
            username: username.to_owned(),
            password: self.sparql_password.clone().unwrap_or_default(),
        })
    }

    pub fn inference_policy(&self) -> InferencePolicy {
        InferencePolicy {
            sample_size: self.inference_sample_size,
            fallback: self.inference_fallback,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_event_start_date() -> String {
    "2000-01-01".to_owned()
}

fn default_event_location() -> String {
    "NL".to_owned()
}

/// The `generic_list` section of the upload config file.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub study_oid: String,
    pub study_identifier: String,
    pub event_oid: String,
    pub form_oid: String,
    pub item_group_oid: String,
    pub identifier_colname: String,
    pub gender_colname: String,
    #[serde(default)]
    pub item_prefix: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub query_file: Option<String>,
    /// Source column name to item name. May be left empty or null in the file.
    #[serde(default)]
    pub alternative_item_oids: Option<HashMap<String, String>>,
    #[serde(default = "default_true")]
    pub perform_query: bool,
    #[serde(default = "default_event_start_date")]
    pub event_start_date: String,
    #[serde(default = "default_event_location")]
    pub event_location: String,
}

#[derive(Debug, Deserialize)]
struct UploadConfigFile {
    generic_list: UploadConfig,
}

impl UploadConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let file: UploadConfigFile = serde_yaml::from_str(yaml)?;
        Ok(file.generic_list)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|error| ConfigError::ReadError {
            path: path.display().to_string(),
            error,
        })?;

        Self::from_yaml(&yaml)
    }

    /// The inline query wins over `query_file`. A relative `query_file` is resolved against
    /// `base_dir`, normally the directory holding the upload config.
    fn resolve_query(&self, base_dir: &Path) -> Result<String, ConfigError> {
        if let Some(query) = &self.query {
            return Ok(query.to_owned());
        }

        let Some(query_file) = &self.query_file else {
            return Err(ConfigError::MissingQuery);
        };

        let mut path = PathBuf::from(query_file);
        if path.is_relative() {
            path = base_dir.join(path);
        }

        read_query_file(&path).map_err(ConfigError::QueryFileError)
    }
}

/// Everything a sync run needs, assembled once at startup and passed around by reference.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub lc_endpoint: String,
    pub credentials: Credentials,
    pub sparql_endpoint: String,
    pub sparql_auth: Option<BasicAuth>,
    pub request_timeout: time::Duration,
    pub query: String,
    pub perform_query: bool,
    pub target: OdmTarget,
    pub study_identifier: String,
    pub identifier_column: String,
    pub gender_column: String,
    pub item_prefix: String,
    pub item_oid_mapping: HashMap<String, String>,
    pub event_start_date: String,
    pub event_location: String,
    pub max_rechecks: u32,
    pub recheck_interval: time::Duration,
    pub inference: InferencePolicy,
}

impl SyncConfig {
    /// Read the upload config named by the environment and combine both.
    pub fn load(env: &Config) -> Result<Self, ConfigError> {
        let path = Path::new(&env.upload_config_path);
        let upload = UploadConfig::from_file(path)?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

        Self::new(env, upload, base_dir)
    }

    pub fn new(env: &Config, upload: UploadConfig, base_dir: &Path) -> Result<Self, ConfigError> {
        let query = upload.resolve_query(base_dir)?;

        Ok(Self {
            lc_endpoint: env.lc_endpoint.as_str().to_owned(),
            credentials: env.credentials(),
            sparql_endpoint: env.sparql_query_endpoint.as_str().to_owned(),
            sparql_auth: env.sparql_auth(),
            request_timeout: env.request_timeout.0,
            query,
            perform_query: upload.perform_query,
            target: OdmTarget {
                study_oid: upload.study_oid,
                event_oid: upload.event_oid,
                form_oid: upload.form_oid,
                item_group_oid: upload.item_group_oid,
            },
            study_identifier: upload.study_identifier,
            identifier_column: upload.identifier_colname,
            gender_column: upload.gender_colname,
            item_prefix: upload.item_prefix,
            item_oid_mapping: upload.alternative_item_oids.unwrap_or_default(),
            event_start_date: upload.event_start_date,
            event_location: upload.event_location,
            max_rechecks: env.max_rechecks,
            recheck_interval: env.recheck_interval.0,
            inference: env.inference_policy(),
        })
    }
}
