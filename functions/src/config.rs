// functions/src/config.rs

use std::env;

pub const PROJECT_ID: &str = "PROJECT_ID";
pub const SUBSCRIPTION_NAME: &str = "SUBSCRIPTION_NAME";
pub const DESTINATION_BUCKET: &str = "DESTINATION_BUCKET";
pub const PORT: &str = "PORT";
pub const AZURE_POLICY_NAME: &str = "AZURE_POLICY_NAME";
pub const AZURE_POLICY_KEY: &str = "AZURE_POLICY_KEY";
pub const AZURE_STORAGE_ACCOUNT: &str = "AZURE_STORAGE_ACCOUNT";
pub const AZURE_STORAGE_ACCESS_KEY: &str = "AZURE_STORAGE_ACCESS_KEY";

const DEFAULT_HTTP_PORT: u16 = 8080;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Shared-access policy for the Service Bus namespace.
#[derive(Clone)]
pub struct QueueCredentials {
    pub policy_name: String,
    pub policy_key: String,
}

/// Storage account access key for Blob Storage.
#[derive(Clone)]
pub struct StoreCredentials {
    pub account: String,
    pub access_key: String,
}

/// Process settings, read once at startup.
///
/// Values are kept as given. Presence of the required ones is checked by
/// [`Config::validate`], which the binary calls before anything else.
#[derive(Clone)]
pub struct Config {
    pub project_id: Option<String>,
    pub subscription_id: Option<String>,
    pub destination_bucket: Option<String>,
    pub http_port: Option<String>,
    pub policy_name: Option<String>,
    pub policy_key: Option<String>,
    pub storage_account: Option<String>,
    pub storage_access_key: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        // an empty variable counts as unset
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());

        Self {
            project_id: get(PROJECT_ID),
            subscription_id: get(SUBSCRIPTION_NAME),
            destination_bucket: get(DESTINATION_BUCKET),
            http_port: get(PORT),
            policy_name: get(AZURE_POLICY_NAME),
            policy_key: get(AZURE_POLICY_KEY),
            storage_account: get(AZURE_STORAGE_ACCOUNT),
            storage_access_key: get(AZURE_STORAGE_ACCESS_KEY),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project_id.is_none() {
            return Err(ConfigError::Missing(PROJECT_ID));
        }
        if self.subscription_id.is_none() {
            return Err(ConfigError::Missing(SUBSCRIPTION_NAME));
        }
        self.http_port()?;
        Ok(())
    }

    pub fn project_id(&self) -> Result<&str, ConfigError> {
        self.project_id.as_deref().ok_or(ConfigError::Missing(PROJECT_ID))
    }

    pub fn subscription_id(&self) -> Result<&str, ConfigError> {
        self.subscription_id
            .as_deref()
            .ok_or(ConfigError::Missing(SUBSCRIPTION_NAME))
    }

    /// Destination container, or an empty string when unset. Uploads to an
    /// empty container are rejected per message by the store.
    pub fn destination_bucket(&self) -> &str {
        self.destination_bucket.as_deref().unwrap_or_default()
    }

    pub fn http_port(&self) -> Result<u16, ConfigError> {
        match &self.http_port {
            None => Ok(DEFAULT_HTTP_PORT),
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: PORT,
                value: value.clone(),
            }),
        }
    }

    pub fn queue_credentials(&self) -> Result<QueueCredentials, ConfigError> {
        Ok(QueueCredentials {
            policy_name: required(&self.policy_name, AZURE_POLICY_NAME)?,
            policy_key: required(&self.policy_key, AZURE_POLICY_KEY)?,
        })
    }

    pub fn store_credentials(&self) -> Result<StoreCredentials, ConfigError> {
        Ok(StoreCredentials {
            account: required(&self.storage_account, AZURE_STORAGE_ACCOUNT)?,
            access_key: required(&self.storage_access_key, AZURE_STORAGE_ACCESS_KEY)?,
        })
    }
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value.clone().ok_or(ConfigError::Missing(name))
}

impl std::fmt::Debug for Config {
    // keys stay out of the logs
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("project_id", &self.project_id)
            .field("subscription_id", &self.subscription_id)
            .field("destination_bucket", &self.destination_bucket)
            .field("http_port", &self.http_port)
            .field("policy_name", &self.policy_name)
            .field("policy_key", &self.policy_key.is_some())
            .field("storage_account", &self.storage_account)
            .field("storage_access_key", &self.storage_access_key.is_some())
            .finish()
    }
}
