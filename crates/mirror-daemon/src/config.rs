use crate::client::Credentials;
use mirror_core::Settings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Atlassian OAuth token endpoint used for the refresh-token grant
pub const DEFAULT_TOKEN_URL: &str = "https://auth.atlassian.com/oauth/token";

/// Confluence site and the credentials used to reach it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TenantConfig {
    /// Site root, e.g. `https://example.atlassian.net`
    pub url: String,
    pub email: Option<String>,
    pub api_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_url: Option<String>,
}

impl TenantConfig {
    /// Basic auth when an API token is set, otherwise OAuth.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        if let (Some(email), Some(api_token)) = (&self.email, &self.api_token) {
            return Ok(Credentials::Basic {
                email: email.clone(),
                api_token: api_token.clone(),
            });
        }

        match (
            &self.client_id,
            &self.client_secret,
            &self.access_token,
            &self.refresh_token,
        ) {
            (Some(client_id), Some(client_secret), Some(access_token), Some(refresh_token)) => {
                Ok(Credentials::OAuth {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    access_token: access_token.clone(),
                    refresh_token: refresh_token.clone(),
                    token_url: self
                        .token_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
                })
            }
            _ => Err(ConfigError::MissingCredentials),
        }
    }
}

/// Daemon configuration: sync settings plus the tenant, in one JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub settings: Settings,
    #[serde(default)]
    pub tenant: TenantConfig,
}

impl Config {
    /// Load configuration from a JSON file (supports ~ for home directory)
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let path = expand_tilde(path);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        if config.tenant.url.trim().is_empty() {
            return Err(ConfigError::MissingTenantUrl);
        }
        Ok(config)
    }

    /// Default config location under the vault
    pub fn default_path(vault: &Path) -> PathBuf {
        vault.join(".obsidian/plugins/confluence-sync/config.json")
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("tenant.url is not set")]
    MissingTenantUrl,

    #[error("tenant needs email + apiToken, or clientId + clientSecret + accessToken + refreshToken")]
    MissingCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_and_tenant_in_one_file() {
        let config = Config::from_json(
            r#"{
                "syncPath": "wiki/",
                "downloadAttachments": true,
                "filters": {"enabled": true, "spaceKeys": ["ENG"]},
                "tenant": {"url": "https://example.atlassian.net", "email": "a@b.c", "apiToken": "t"}
            }"#,
        )
        .unwrap();

        assert_eq!(config.settings.sync_path, "wiki/");
        assert!(config.settings.download_attachments);
        assert_eq!(config.settings.attachments_path, "attachments/");
        assert_eq!(config.tenant.url, "https://example.atlassian.net");
        assert_eq!(
            config.tenant.credentials().unwrap(),
            Credentials::Basic {
                email: "a@b.c".into(),
                api_token: "t".into()
            }
        );
    }

    #[test]
    fn test_oauth_credentials_default_token_url() {
        let tenant = TenantConfig {
            url: "https://example.atlassian.net".into(),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            access_token: Some("access".into()),
            refresh_token: Some("refresh".into()),
            ..Default::default()
        };

        match tenant.credentials().unwrap() {
            Credentials::OAuth { token_url, .. } => assert_eq!(token_url, DEFAULT_TOKEN_URL),
            other => panic!("unexpected credentials: {other:?}"),
        }
    }

    #[test]
    fn test_incomplete_credentials_rejected() {
        let tenant = TenantConfig {
            url: "https://example.atlassian.net".into(),
            email: Some("a@b.c".into()),
            ..Default::default()
        };
        assert!(matches!(
            tenant.credentials(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_missing_tenant_url() {
        assert!(matches!(
            Config::from_json(r#"{"syncPath": "wiki/"}"#),
            Err(ConfigError::MissingTenantUrl)
        ));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/vault"), home.join("vault"));
        }
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"tenant": {"url": "https://x.atlassian.net"}}"#).unwrap();

        let config = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.settings, Settings::default());
        assert!(matches!(
            Config::load("/nonexistent/config.json"),
            Err(ConfigError::Read { .. })
        ));
    }
}
