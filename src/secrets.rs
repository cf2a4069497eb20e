use crate::config::Config;
use crate::error::Error;
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;

#[async_trait::async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Returns the current value of a secret.
    async fn get(&self, secret_id: &str) -> Result<String, Error>;

    /// Stores a new value for a secret, replacing the current one.
    async fn put(&self, secret_id: &str, value: &str) -> Result<(), Error>;
}

/// Secrets kept in a JSON object file keyed by secret id.
#[derive(Clone)]
pub struct FileSecretStore {
    path: PathBuf,
}

impl FileSecretStore {
    pub fn new(config: &Config) -> Self {
        FileSecretStore {
            path: PathBuf::from(&config.secrets_file),
        }
    }

    #[cfg(test)]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        FileSecretStore { path: path.into() }
    }

    fn read_all(&self) -> Result<Map<String, Value>, Error> {
        let content = fs::read_to_string(&self.path)?;
        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::credential(format!(
                "secrets file {} is not a JSON object",
                self.path.display()
            ))),
        }
    }
}

#[async_trait::async_trait]
impl SecretStore for FileSecretStore {
    async fn get(&self, secret_id: &str) -> Result<String, Error> {
        let secrets = self.read_all().map_err(|e| {
            Error::credential(format!(
                "cannot read secrets file {}: {}",
                self.path.display(),
                e
            ))
        })?;

        secrets
            .get(secret_id)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::credential(format!("secret '{}' not found", secret_id)))
    }

    async fn put(&self, secret_id: &str, value: &str) -> Result<(), Error> {
        let mut secrets = if self.path.exists() {
            self.read_all()?
        } else {
            Map::new()
        };
        secrets.insert(secret_id.to_string(), Value::String(value.to_string()));

        let staged = self.path.with_extension("tmp");
        fs::write(&staged, serde_json::to_string_pretty(&secrets)?)?;
        fs::rename(&staged, &self.path)?;

        Ok(())
    }
}
