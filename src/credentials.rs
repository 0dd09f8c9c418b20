use crate::config::{CredentialSource, CredentialsConfig};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Clone, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

pub type Credentials = HashMap<String, Credential>;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("credentials unavailable: {0}")]
    Unavailable(String),
    #[error("failed to start credential program {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("credential program exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("credential program output is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid credentials for role '{role}': {reason}")]
    Invalid { role: String, reason: String },
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(&self, force_refresh: bool) -> Result<Credentials, CredentialsError>;
}

pub fn from_config(cfg: &CredentialsConfig) -> Arc<dyn CredentialsProvider> {
    match &cfg.source {
        CredentialSource::Command {
            program,
            args,
            refresh_interval,
        } => Arc::new(CommandCredentials::new(
            program.clone(),
            args.clone(),
            *refresh_interval,
            cfg.role.clone(),
        )),
        CredentialSource::Env {
            username_var,
            password_var,
        } => Arc::new(EnvCredentials {
            role: cfg.role.clone(),
            username_var: username_var.clone(),
            password_var: password_var.clone(),
        }),
    }
}

/// Runs an external secret-fetch program that prints `{role: {username, password}}`
/// somewhere in its stdout, and caches the result for `refresh_interval`.
pub struct CommandCredentials {
    program: String,
    args: Vec<String>,
    refresh_interval: Duration,
    role: String,
    cache: Mutex<Option<(Credentials, Instant)>>,
}

impl CommandCredentials {
    pub fn new(program: String, args: Vec<String>, refresh_interval: Duration, role: String) -> Self {
        Self {
            program,
            args,
            refresh_interval,
            role,
            cache: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<Credentials, CredentialsError> {
        debug!(program = %self.program, "running credential program");
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| CredentialsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(CredentialsError::Exit {
                status: output.status.to_string(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!(program = %self.program, stderr = %stderr, "credential program wrote to stderr");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let json = extract_json_object(&stdout)
            .ok_or_else(|| CredentialsError::Parse("no JSON object in output".to_string()))?;
        let credentials: Credentials =
            serde_json::from_str(json).map_err(|err| CredentialsError::Parse(err.to_string()))?;
        validate_role(&credentials, &self.role)?;
        Ok(credentials)
    }
}

#[async_trait]
impl CredentialsProvider for CommandCredentials {
    async fn get_credentials(&self, force_refresh: bool) -> Result<Credentials, CredentialsError> {
        let mut cache = self.cache.lock().await;
        if !force_refresh {
            if let Some((credentials, fetched_at)) = cache.as_ref() {
                if fetched_at.elapsed() < self.refresh_interval {
                    return Ok(credentials.clone());
                }
            }
        }

        let credentials = self.fetch().await?;
        info!(role = %self.role, "credentials refreshed");
        *cache = Some((credentials.clone(), Instant::now()));
        Ok(credentials)
    }
}

pub struct EnvCredentials {
    role: String,
    username_var: String,
    password_var: String,
}

#[async_trait]
impl CredentialsProvider for EnvCredentials {
    async fn get_credentials(&self, _force_refresh: bool) -> Result<Credentials, CredentialsError> {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| CredentialsError::Unavailable(format!("environment variable {name} is not set")))
        };
        let credential = Credential {
            username: read(&self.username_var)?,
            password: read(&self.password_var)?,
        };
        Ok(HashMap::from([(self.role.clone(), credential)]))
    }
}

pub fn validate_role(credentials: &Credentials, role: &str) -> Result<(), CredentialsError> {
    let invalid = |reason: &str| CredentialsError::Invalid {
        role: role.to_string(),
        reason: reason.to_string(),
    };
    let credential = credentials.get(role).ok_or_else(|| invalid("role missing"))?;
    if credential.username.trim().is_empty() {
        return Err(invalid("empty username"));
    }
    if credential.password.is_empty() {
        return Err(invalid("empty password"));
    }
    Ok(())
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
