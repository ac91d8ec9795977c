//! # Event recorder module
//!
//! This module provide an alternative to the golang EventRecorder structure
//!
//! See following links for more details:
//! - <https://book-v1.book.kubebuilder.io/beyond_basics/creating_events.html>
//! - <https://github.com/kubernetes/client-go/blob/master/tools/record/event.go#L56>

use std::{
    convert::TryFrom,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use k8s_openapi::api::core::v1::Event;
use kube::{api::PostParams, Api, Client, Resource, ResourceExt};
use tracing::debug;

pub mod event;

// -----------------------------------------------------------------------------
// Constants

/// namespace that receives events of cluster-scoped resources
pub const DEFAULT_NAMESPACE: &str = "default";

// -----------------------------------------------------------------------------
// Error enumeration

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to parse '{0}', available options are 'normal' or 'warning'")]
    Parse(String),
}

// -----------------------------------------------------------------------------
// Level enumeration

#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Debug)]
pub enum Level {
    Warning,
    Normal,
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "warning" => Self::Warning,
            "normal" => Self::Normal,
            _ => {
                return Err(Error::Parse(s.to_string()));
            }
        })
    }
}

impl TryFrom<String> for Level {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "Warning"),
            Self::Normal => write!(f, "Normal"),
        }
    }
}

// -----------------------------------------------------------------------------
// Helper methods

/// record an event for the given object
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub async fn record<T, U>(
    client: Client,
    obj: &T,
    dt: &T::DynamicType,
    kind: &Level,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource + ResourceExt,
    U: ToString + Debug,
{
    let event = event::new(obj, dt, kind, action, message);
    let namespace = event
        .metadata
        .namespace
        .to_owned()
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

    debug!(
        action = action.to_string(),
        namespace = &namespace,
        name = obj.name_any(),
        message = message,
        "Create event for resource",
    );

    Api::<Event>::namespaced(client, &namespace)
        .create(&PostParams::default(), &event)
        .await
}

/// shortcut for the [`record`] method with the 'Normal' [`Level`]
pub async fn normal<T, U>(
    client: Client,
    obj: &T,
    dt: &T::DynamicType,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource + ResourceExt,
    U: ToString + Debug,
{
    record(client, obj, dt, &Level::Normal, action, message).await
}

/// shortcut for the [`record`] method with the 'Warning' [`Level`]
pub async fn warning<T, U>(
    client: Client,
    obj: &T,
    dt: &T::DynamicType,
    action: &U,
    message: &str,
) -> Result<Event, kube::Error>
where
    T: Resource + ResourceExt,
    U: ToString + Debug,
{
    record(client, obj, dt, &Level::Warning, action, message).await
}
