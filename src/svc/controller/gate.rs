//! # Gate module
//!
//! This module provide a way to wait for a custom resource definition to be
//! installed before starting the controller of its kind.

use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use tracing::{debug, info, warn};

/// returns whether the custom resource definition is installed and has its
/// names accepted by the api server
pub fn established(crd: &CustomResourceDefinition) -> bool {
    crd.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Established" && condition.status == "True")
        })
        .unwrap_or(false)
}

/// block until the custom resource definition named `name` is established,
/// checking every `interval`
#[cfg_attr(feature = "trace", tracing::instrument(skip(client)))]
pub async fn wait(client: Client, name: &str, interval: Duration) {
    let api: Api<CustomResourceDefinition> = Api::all(client);

    loop {
        match api.get_opt(name).await {
            Ok(Some(crd)) if established(&crd) => {
                info!(name = name, "Custom resource definition is established");
                return;
            }
            Ok(_) => {
                debug!(
                    name = name,
                    interval = interval.as_secs(),
                    "Custom resource definition is not established yet",
                );
            }
            Err(err) => {
                warn!(
                    name = name,
                    error = err.to_string(),
                    "Could not retrieve custom resource definition",
                );
            }
        }

        tokio::time::sleep(interval).await;
    }
}
