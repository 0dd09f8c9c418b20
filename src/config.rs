use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    pub database_path: String,
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub collection: CollectionConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub address: String,
    pub deploy_type: DeploymentClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentClass {
    Vcf,
    Vvf,
}

impl DeploymentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentClass::Vcf => "VCF",
            DeploymentClass::Vvf => "VVF",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "VCF" => Some(DeploymentClass::Vcf),
            "VVF" => Some(DeploymentClass::Vvf),
            _ => None,
        }
    }
}

impl fmt::Display for DeploymentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_daily_at")]
    pub daily_at: String,
    #[serde(default)]
    pub run_on_start: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectionConfig {
    #[serde(default = "default_request_timeout", with = "human_duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_endpoint_deadline", with = "human_duration")]
    pub endpoint_deadline: Duration,
    #[serde(default = "default_accept_invalid_certs")]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_inventory_path")]
    pub inventory_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(flatten)]
    pub source: CredentialSource,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CredentialSource {
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_refresh_interval", with = "human_duration")]
        refresh_interval: Duration,
    },
    Env {
        username_var: String,
        password_var: String,
    },
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            daily_at: default_daily_at(),
            run_on_start: false,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            endpoint_deadline: default_endpoint_deadline(),
            accept_invalid_certs: default_accept_invalid_certs(),
            inventory_path: default_inventory_path(),
        }
    }
}

impl ScheduleConfig {
    /// Seconds after UTC midnight at which the daily cycle fires.
    pub fn daily_offset_secs(&self) -> Result<i64, ConfigError> {
        parse_time_of_day(&self.daily_at).ok_or_else(|| {
            ConfigError::Validation(format!(
                "schedule.daily_at '{}' должно быть в формате HH:MM",
                self.daily_at
            ))
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.database_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле database_path обязательно".to_string(),
            ));
        }

        validate_endpoints(&self.endpoints)?;
        self.schedule.daily_offset_secs()?;
        validate_collection(&self.collection)?;
        validate_credentials(&self.credentials)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_endpoints(endpoints: &[EndpointConfig]) -> Result<(), ConfigError> {
    if endpoints.is_empty() {
        return Err(ConfigError::Validation(
            "endpoints должен содержать хотя бы один адрес".to_string(),
        ));
    }
    let mut addresses = HashSet::new();
    for endpoint in endpoints {
        let address = endpoint.address.trim();
        if address.is_empty() {
            return Err(ConfigError::Validation(
                "endpoints[*].address не должен быть пустым".to_string(),
            ));
        }
        if !addresses.insert(address.to_lowercase()) {
            return Err(ConfigError::Validation(format!(
                "адрес '{}' должен быть уникальным",
                endpoint.address
            )));
        }
    }
    Ok(())
}

fn validate_collection(cfg: &CollectionConfig) -> Result<(), ConfigError> {
    if cfg.request_timeout.is_zero() {
        return Err(ConfigError::Validation(
            "collection.request_timeout должен быть > 0".to_string(),
        ));
    }
    if cfg.endpoint_deadline < cfg.request_timeout {
        return Err(ConfigError::Validation(
            "collection.endpoint_deadline должен быть >= request_timeout".to_string(),
        ));
    }
    if !cfg.inventory_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "collection.inventory_path должен начинаться с '/'".to_string(),
        ));
    }
    Ok(())
}

fn validate_credentials(cfg: &CredentialsConfig) -> Result<(), ConfigError> {
    if cfg.role.trim().is_empty() {
        return Err(ConfigError::Validation(
            "credentials.role не должен быть пустым".to_string(),
        ));
    }
    match &cfg.source {
        CredentialSource::Command {
            program,
            refresh_interval,
            ..
        } => {
            if program.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "credentials.program не должен быть пустым".to_string(),
                ));
            }
            if refresh_interval.is_zero() {
                return Err(ConfigError::Validation(
                    "credentials.refresh_interval должен быть > 0".to_string(),
                ));
            }
        }
        CredentialSource::Env {
            username_var,
            password_var,
        } => {
            if username_var.trim().is_empty() || password_var.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "credentials.username_var и password_var обязательны".to_string(),
                ));
            }
        }
    }
    Ok(())
}

fn parse_time_of_day(text: &str) -> Option<i64> {
    let (hours, minutes) = text.trim().split_once(':')?;
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 3600 + minutes * 60)
}

mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

fn default_daily_at() -> String {
    "07:00".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_endpoint_deadline() -> Duration {
    Duration::from_secs(15 * 60)
}

const fn default_accept_invalid_certs() -> bool {
    true
}

fn default_inventory_path() -> String {
    "/api/inventory".to_string()
}

fn default_role() -> String {
    "vcenter".to_string()
}

const fn default_refresh_interval() -> Duration {
    Duration::from_secs(3600)
}
