//! # Event module
//!
//! This module provide helpers to interact with the kubernetes core/v1/event
//! api

use std::fmt::Debug;

use chrono::Utc;
use k8s_openapi::{
    api::core::v1::{Event, EventSource},
    apimachinery::pkg::apis::meta::v1::{MicroTime, Time},
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::svc::k8s::recorder::{Level, DEFAULT_NAMESPACE};

// -----------------------------------------------------------------------------
// constants

pub const REPORTING_COMPONENT: &str = "provider-gitea";

// -----------------------------------------------------------------------------
// Helper functions

/// create a new event from the given parameters
pub fn new<T, U>(obj: &T, dt: &T::DynamicType, kind: &Level, action: &U, message: &str) -> Event
where
    T: Resource + ResourceExt,
    U: ToString + Debug,
{
    let now = Utc::now();

    Event {
        metadata: ObjectMeta {
            namespace: Some(
                obj.namespace()
                    .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            ),
            name: Some(format!(
                "{}-{}-{}",
                obj.name_any(),
                action.to_string().to_lowercase(),
                now.timestamp_millis()
            )),
            ..Default::default()
        },
        type_: Some(kind.to_string()),
        action: Some(action.to_string()),
        count: Some(1),
        event_time: Some(MicroTime(now)),
        first_timestamp: Some(Time(now)),
        involved_object: obj.object_ref(dt),
        last_timestamp: Some(Time(now)),
        message: Some(message.to_string()),
        reason: Some(action.to_string()),
        reporting_component: Some(REPORTING_COMPONENT.to_string()),
        reporting_instance: Some(format!(
            "{}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )),
        series: None,
        source: Some(source()),
        ..Default::default()
    }
}

/// returns the source of this provider
pub fn source() -> EventSource {
    let host = hostname::get()
        .ok()
        .map(|host| host.to_string_lossy().to_string());

    EventSource {
        component: Some(REPORTING_COMPONENT.to_string()),
        host,
    }
}

#[cfg(test)]
mod tests {
    use crate::svc::crd::cluster::{ClusterProviderConfig, Spec};

    use super::*;

    #[test]
    fn events_of_cluster_scoped_resources_land_in_default_namespace() {
        let pc = ClusterProviderConfig::new("cluster-pc", Spec::default());

        let event = new(&pc, &(), &Level::Warning, &"InUse", "still used");

        assert_eq!(Some(DEFAULT_NAMESPACE.to_string()), event.metadata.namespace);
        assert_eq!(Some("Warning".to_string()), event.type_);
        assert_eq!(Some("ClusterProviderConfig".to_string()), event.involved_object.kind);
        assert_eq!(Some("cluster-pc".to_string()), event.involved_object.name);
    }
}
