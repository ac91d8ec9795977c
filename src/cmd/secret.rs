//! # Secret module
//!
//! This module provides the command line interface to generate the secret
//! holding the credentials a provider config references

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use clap::Subcommand;
use k8s_openapi::{api::core::v1, ByteString};

use crate::{
    cmd::Executor,
    svc::{
        cfg::Configuration,
        gitea::setup::{BASE_URL, PASSWORD, TOKEN, USERNAME},
    },
};

// -----------------------------------------------------------------------------
// Constants

pub const DEFAULT_NAME: &str = "gitea-credentials";
pub const DEFAULT_NAMESPACE: &str = "crossplane-system";
pub const DEFAULT_KEY: &str = "credentials";

// -----------------------------------------------------------------------------
// SecretError enum

#[derive(thiserror::Error, Debug)]
pub enum SecretError {
    #[error("failed to serialize secret, {0}")]
    Serialize(serde_yaml::Error),
    #[error("failed to encode credentials, {0}")]
    Encode(serde_json::Error),
    #[error("failed to generate secret, a token or both username and password are required")]
    MissingCredentials,
}

// -----------------------------------------------------------------------------
// Credentials structure

#[derive(clap::Args, Clone, Debug)]
pub struct Credentials {
    /// Url of the gitea instance
    #[clap(short = 'u', long = "base-url")]
    pub base_url: String,
    /// Access token, takes precedence over username and password
    #[clap(long = "token")]
    pub token: Option<String>,
    /// Username used with basic authentication
    #[clap(long = "username")]
    pub username: Option<String>,
    /// Password used with basic authentication
    #[clap(long = "password")]
    pub password: Option<String>,
}

impl Credentials {
    /// returns the credentials payload stored in the secret
    pub fn payload(&self) -> Result<BTreeMap<&'static str, String>, SecretError> {
        let mut payload = BTreeMap::from([(BASE_URL, self.base_url.to_owned())]);

        match (&self.token, &self.username, &self.password) {
            (Some(token), _, _) if !token.is_empty() => {
                payload.insert(TOKEN, token.to_owned());
            }
            (_, Some(username), Some(password)) => {
                payload.insert(USERNAME, username.to_owned());
                payload.insert(PASSWORD, password.to_owned());
            }
            _ => return Err(SecretError::MissingCredentials),
        }

        Ok(payload)
    }
}

// -----------------------------------------------------------------------------
// Secret enum

#[derive(Subcommand, Clone, Debug)]
pub enum Secret {
    #[clap(name = "generate", aliases = &["g"], about = "Generate the credentials secret of a provider config")]
    Generate {
        #[clap(short = 'n', long = "name", help = "Name of the secret", default_value = DEFAULT_NAME)]
        name: String,
        #[clap(short = 'N', long = "namespace", help = "Namespace of the secret", default_value = DEFAULT_NAMESPACE)]
        namespace: String,
        #[clap(short = 'K', long = "key", help = "Key holding the credentials", default_value = DEFAULT_KEY)]
        key: String,
        #[clap(flatten)]
        credentials: Credentials,
    },
}

#[async_trait]
impl Executor for Secret {
    type Error = SecretError;

    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    async fn execute(&self, _config: Arc<Configuration>) -> Result<(), Self::Error> {
        match self {
            Self::Generate {
                name,
                namespace,
                key,
                credentials,
            } => {
                let secret = generate(namespace, name, key, credentials)?;

                print!(
                    "{}",
                    serde_yaml::to_string(&secret).map_err(SecretError::Serialize)?
                );
                Ok(())
            }
        }
    }
}

// -----------------------------------------------------------------------------
// generate function

/// returns the secret holding the given credentials as a json document under
/// `key`
pub fn generate(
    namespace: &str,
    name: &str,
    key: &str,
    credentials: &Credentials,
) -> Result<v1::Secret, SecretError> {
    let payload = serde_json::to_vec(&credentials.payload()?).map_err(SecretError::Encode)?;
    let mut secret = v1::Secret::default();

    secret.metadata.name = Some(name.to_string());
    secret.metadata.namespace = Some(namespace.to_string());
    secret.type_ = Some("Opaque".to_string());
    secret.data = Some(BTreeMap::from([(key.to_string(), ByteString(payload))]));

    Ok(secret)
}

#[cfg(test)]
mod tests {
    use crate::svc::gitea::setup::parse;

    use super::*;

    fn credentials(token: Option<&str>, username: Option<&str>, password: Option<&str>) -> Credentials {
        Credentials {
            base_url: "https://gitea.example.com".to_string(),
            token: token.map(String::from),
            username: username.map(String::from),
            password: password.map(String::from),
        }
    }

    #[test]
    fn token_takes_precedence() {
        let payload = credentials(Some("t0k3n"), Some("gitea"), Some("secret"))
            .payload()
            .expect("payload to be built");

        assert_eq!(Some(&"t0k3n".to_string()), payload.get(TOKEN));
        assert!(!payload.contains_key(USERNAME));
        assert!(!payload.contains_key(PASSWORD));
    }

    #[test]
    fn credentials_are_required() {
        assert!(credentials(None, Some("gitea"), None).payload().is_err());
        assert!(credentials(Some(""), None, None).payload().is_err());
    }

    #[test]
    fn generated_secret_is_readable_by_the_setup() {
        let secret = generate(
            DEFAULT_NAMESPACE,
            DEFAULT_NAME,
            DEFAULT_KEY,
            &credentials(None, Some("gitea"), Some("secret")),
        )
        .expect("secret to be generated");

        let buf = secret
            .data
            .as_ref()
            .and_then(|data| data.get(DEFAULT_KEY))
            .expect("credentials to be stored");
        let payload = parse(&buf.0).expect("credentials to be parsed");

        assert_eq!(Some(&"gitea".to_string()), payload.get(USERNAME));
        assert_eq!(
            Some(&"https://gitea.example.com".to_string()),
            payload.get(BASE_URL)
        );
    }
}
