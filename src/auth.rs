use crate::config::Config;
use crate::error::Error;
use crate::secrets::SecretStore;
use log::{info, warn};
use reqwest::{header::ACCEPT, Client};
use serde::Deserialize;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync + 'static {
    /// Returns a bearer token for the accounting API, valid for the rest of the run.
    async fn access_token(&self) -> Result<String, Error>;
}

/// A pre-issued token used as-is.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait::async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, Error> {
        Ok(self.0.clone())
    }
}

/// Exchanges the stored refresh token for an access token, writing a rotated
/// refresh token back to the secret store.
pub struct OAuthRefresher<S> {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    secret_id: String,
    store: S,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

impl<S: SecretStore> OAuthRefresher<S> {
    pub fn new(config: &Config, store: S) -> Result<Self, Error> {
        let (Some(client_id), Some(client_secret)) = (&config.client_id, &config.client_secret)
        else {
            return Err(Error::credential(
                "client id and client secret are required to refresh tokens",
            ));
        };

        Ok(OAuthRefresher {
            client: Client::new(),
            token_url: config.token_url.clone(),
            client_id: client_id.clone(),
            client_secret: client_secret.clone(),
            secret_id: config.secret_name.clone(),
            store,
        })
    }
}

#[async_trait::async_trait]
impl<S: SecretStore> TokenProvider for OAuthRefresher<S> {
    async fn access_token(&self) -> Result<String, Error> {
        let refresh_token = self.store.get(&self.secret_id).await?;

        let resp = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(ACCEPT, "application/json")
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::credential(format!("token refresh request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::credential(format!(
                "token refresh failed ({}): {}",
                status.as_u16(),
                body
            )));
        }

        let tokens: TokenResponse = resp
            .json()
            .await
            .map_err(|e| Error::credential(format!("token refresh response invalid: {}", e)))?;

        if let Some(rotated) = tokens.refresh_token.filter(|t| *t != refresh_token) {
            match self.store.put(&self.secret_id, &rotated).await {
                Ok(()) => info!("Saved rotated refresh token to '{}'", self.secret_id),
                Err(e) => warn!("Failed to save rotated refresh token: {}", e),
            }
        }

        Ok(tokens.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::secrets::FileSecretStore;
    use httpmock::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    fn refresher(server: &MockServer, temp_dir: &TempDir) -> OAuthRefresher<FileSecretStore> {
        let path = temp_dir.path().join("secrets.json");
        fs::write(&path, r#"{"qbo-refresh-token": "rt-1"}"#).unwrap();

        let mut config = test_config("./warehouse");
        config.token_url = server.url("/token");
        config.client_id = Some(String::from("client"));
        config.client_secret = Some(String::from("secret"));
        OAuthRefresher::new(&config, FileSecretStore::at(path)).unwrap()
    }

    #[test]
    fn test_missing_client_credentials() {
        let config = test_config("./warehouse");
        let result = OAuthRefresher::new(&config, FileSecretStore::at("unused.json"));
        assert!(matches!(result, Err(Error::Credential { .. })));
    }

    #[tokio::test]
    async fn test_static_token() {
        assert_eq!(StaticToken::new("abc").access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_refresh_saves_rotated_token() {
        let server = MockServer::start_async().await;
        let temp_dir = TempDir::new().unwrap();
        let refresher = refresher(&server, &temp_dir);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/token")
                    .header_exists("authorization")
                    .body_includes("refresh_token=rt-1");
                then.status(200).json_body(serde_json::json!({
                    "access_token": "at-new",
                    "refresh_token": "rt-2",
                    "expires_in": 3600
                }));
            })
            .await;

        assert_eq!(refresher.access_token().await.unwrap(), "at-new");
        mock.assert_async().await;

        let store = FileSecretStore::at(temp_dir.path().join("secrets.json"));
        assert_eq!(store.get("qbo-refresh-token").await.unwrap(), "rt-2");
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let server = MockServer::start_async().await;
        let temp_dir = TempDir::new().unwrap();
        let refresher = refresher(&server, &temp_dir);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/token");
                then.status(400)
                    .json_body(serde_json::json!({"error": "invalid_grant"}));
            })
            .await;

        let err = refresher.access_token().await.unwrap_err();
        assert!(matches!(err, Error::Credential { ref message } if message.contains("400")));
    }
}
