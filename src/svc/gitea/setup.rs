//! # Setup module
//!
//! This module builds the terraform provider configuration of a managed
//! resource from the credentials secret referenced by its provider config.

use std::{
    collections::BTreeMap,
    fmt::{self, Debug, Formatter},
};

use tracing::debug;

use crate::svc::{
    cfg::Configuration,
    gitea::{managed::Managed, resolve, Error},
    k8s::{resource, store},
};

// -----------------------------------------------------------------------------
// Constants

pub const BASE_URL: &str = "base_url";
pub const TOKEN: &str = "token";
pub const USERNAME: &str = "username";
pub const PASSWORD: &str = "password";

// -----------------------------------------------------------------------------
// PayloadError enumeration

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("failed to deserialize flat json object of strings, {0}")]
    Deserialize(serde_json::Error),
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

// -----------------------------------------------------------------------------
// ProviderRequirement structure

#[derive(PartialEq, Eq, Clone, Debug)]
pub struct ProviderRequirement {
    pub source: String,
    pub version: String,
}

// -----------------------------------------------------------------------------
// Setup structure

/// configuration handed to the terraform provider runtime
#[derive(PartialEq, Eq, Clone)]
pub struct Setup {
    pub version: String,
    pub requirement: ProviderRequirement,
    pub configuration: BTreeMap<String, String>,
}

impl Debug for Setup {
    // configuration holds credentials, only print the keys
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setup")
            .field("version", &self.version)
            .field("requirement", &self.requirement)
            .field("configuration", &self.configuration.keys().collect::<Vec<_>>())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Helpers functions

/// deserialize the credentials payload stored in the secret
pub fn parse(buf: &[u8]) -> Result<BTreeMap<String, String>, PayloadError> {
    let payload: BTreeMap<String, String> =
        serde_json::from_slice(buf).map_err(PayloadError::Deserialize)?;

    if !payload.contains_key(BASE_URL) {
        return Err(PayloadError::MissingField(BASE_URL));
    }

    Ok(payload)
}

/// returns the terraform provider configuration of the given payload. A
/// non-empty token wins over the username and password pair which are then
/// left out.
pub fn configuration(payload: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut configuration = BTreeMap::new();

    if let Some(base_url) = payload.get(BASE_URL) {
        configuration.insert(BASE_URL.to_string(), base_url.to_owned());
    }

    match payload.get(TOKEN) {
        Some(token) if !token.is_empty() => {
            configuration.insert(TOKEN.to_string(), token.to_owned());
        }
        _ => {
            for key in [USERNAME, PASSWORD] {
                if let Some(value) = payload.get(key) {
                    configuration.insert(key.to_string(), value.to_owned());
                }
            }
        }
    }

    configuration
}

// -----------------------------------------------------------------------------
// SetupBuilder structure

/// builds [`Setup`] for managed resources, the terraform version and provider
/// requirement are fixed for the whole process
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SetupBuilder {
    pub version: String,
    pub provider_source: String,
    pub provider_version: String,
}

impl From<&Configuration> for SetupBuilder {
    fn from(config: &Configuration) -> Self {
        terraform_setup_builder(
            &config.terraform.version,
            &config.provider.source,
            &config.provider.version,
        )
    }
}

/// returns a [`SetupBuilder`] bound to the given terraform version and provider
/// requirement
pub fn terraform_setup_builder(
    version: &str,
    provider_source: &str,
    provider_version: &str,
) -> SetupBuilder {
    SetupBuilder {
        version: version.to_string(),
        provider_source: provider_source.to_string(),
        provider_version: provider_version.to_string(),
    }
}

impl SetupBuilder {
    /// resolve the provider config of the managed resource, read the secret it
    /// references and returns the terraform setup
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn setup<S, M>(&self, store: &S, mg: &M) -> Result<Setup, Error>
    where
        S: store::Store + ?Sized,
        M: Managed + ?Sized,
    {
        let credentials = resolve(store, mg).await?;
        let secret_ref = &credentials.secret_ref;
        let namespace = credentials.secret_namespace();
        let display = resource::display(&namespace, &secret_ref.name);

        let namespace = namespace.ok_or_else(|| {
            Error::SecretNotFound(
                display.to_owned(),
                store::Error::NotFound("Secret", None, secret_ref.name.to_owned()),
            )
        })?;

        debug!(
            namespace = &namespace,
            name = &secret_ref.name,
            key = &secret_ref.key,
            "Retrieve credentials secret of provider config",
        );

        let secret = store
            .secret(&namespace, &secret_ref.name)
            .await
            .map_err(|err| Error::SecretNotFound(display.to_owned(), err))?;

        let buf = secret
            .data
            .as_ref()
            .and_then(|data| data.get(&secret_ref.key))
            .ok_or_else(|| Error::SecretKeyMissing(display.to_owned(), secret_ref.key.to_owned()))?;

        let payload = parse(&buf.0).map_err(|err| {
            Error::CredentialsUnparsable(display.to_owned(), secret_ref.key.to_owned(), err)
        })?;

        Ok(Setup {
            version: self.version.to_owned(),
            requirement: ProviderRequirement {
                source: self.provider_source.to_owned(),
                version: self.provider_version.to_owned(),
            },
            configuration: configuration(&payload),
        })
    }
}
