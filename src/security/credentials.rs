//! Credential providers with masking helpers
//!
//! Registry credentials are read from the environment only when a
//! destination is about to authenticate, and are held in
//! [`SecretString`]s so they never end up in logs.

use crate::core::error::PublishError;
use crate::core::traits::{Credential, CredentialProvider, RegistryDestination};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;

/// Resolves credentials from environment variables named in the destination
///
/// # Examples
///
/// ```
/// use image_publisher::security::EnvCredentialProvider;
/// use std::collections::HashMap;
///
/// let mut env = HashMap::new();
/// env.insert("GHCR_TOKEN".to_string(), "ghp_example".to_string());
/// let provider = EnvCredentialProvider::with_env(env);
/// assert!(provider.lookup("GHCR_TOKEN").is_some());
/// ```
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialProvider {
    /// Snapshot used instead of the process environment when set
    env: Option<HashMap<String, String>>,
}

impl EnvCredentialProvider {
    /// Read from the process environment
    pub fn new() -> Self {
        Self { env: None }
    }

    /// Read from a fixed map
    pub fn with_env(env: HashMap<String, String>) -> Self {
        Self { env: Some(env) }
    }

    /// Value of `variable`, treating empty values as unset
    pub fn lookup(&self, variable: &str) -> Option<SecretString> {
        let value = match &self.env {
            Some(env) => env.get(variable).cloned(),
            None => env::var(variable).ok(),
        }?;

        if value.trim().is_empty() {
            return None;
        }

        Some(SecretString::new(value.into()))
    }

    /// Presence report for `check`, never exposing the values
    pub fn describe(&self, destination: &RegistryDestination) -> Vec<(String, Option<String>)> {
        [
            &destination.credential.username_env,
            &destination.credential.password_env,
        ]
        .iter()
        .map(|variable| {
            let masked = self
                .lookup(variable)
                .map(|value| mask_token(value.expose_secret()));
            (variable.to_string(), masked)
        })
        .collect()
    }
}

impl CredentialProvider for EnvCredentialProvider {
    fn credential(&self, destination: &RegistryDestination) -> Result<Credential, PublishError> {
        let missing = |variable: &str| PublishError::CredentialMissing {
            destination: destination.name.clone(),
            variable: variable.to_string(),
        };

        let username = self
            .lookup(&destination.credential.username_env)
            .ok_or_else(|| missing(&destination.credential.username_env))?;
        let password = self
            .lookup(&destination.credential.password_env)
            .ok_or_else(|| missing(&destination.credential.password_env))?;

        Ok(Credential {
            username: username.expose_secret().to_string(),
            password,
        })
    }
}

/// Fixed credentials keyed by destination name
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<String, (String, SecretString)>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential for `destination`
    pub fn with_credential(
        mut self,
        destination: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let password: String = password.into();
        self.credentials.insert(
            destination.into(),
            (username.into(), SecretString::new(password.into())),
        );
        self
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn credential(&self, destination: &RegistryDestination) -> Result<Credential, PublishError> {
        let (username, password) = self.credentials.get(&destination.name).ok_or_else(|| {
            PublishError::CredentialMissing {
                destination: destination.name.clone(),
                variable: destination.credential.password_env.clone(),
            }
        })?;

        Ok(Credential::new(username.clone(), password.expose_secret()))
    }
}

/// Masks a token for safe display
///
/// Shows only the first 3 and last 3 characters. Tokens shorter than 10
/// characters are fully masked as "****".
///
/// # Examples
///
/// ```
/// use image_publisher::security::mask_token;
///
/// assert_eq!(mask_token("abcdef123456"), "abc...456");
/// assert_eq!(mask_token("short"), "****");
/// ```
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 10 {
        return "****".to_string();
    }

    let prefix: String = chars[..3].iter().collect();
    let suffix: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

/// Replace every occurrence of `secrets` in `text` with its mask
pub fn mask_secrets(text: &str, secrets: &[&SecretString]) -> String {
    secrets.iter().fold(text.to_string(), |masked, secret| {
        let value = secret.expose_secret();
        if value.is_empty() {
            masked
        } else {
            masked.replace(value, &mask_token(value))
        }
    })
}
