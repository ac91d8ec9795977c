//! # Kubernetes module
//!
//! This module provide kubernetes helpers, the shared reconciliation context
//! and the traits used to build and run controllers

use std::{error::Error, fmt::Debug, hash::Hash, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    runtime::{
        controller::{self, Action},
        Controller,
    },
    Resource, ResourceExt,
};
#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use prometheus::{opts, register_counter_vec, CounterVec};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};
#[cfg(feature = "trace")]
use tracing::Instrument;

use crate::svc::{cfg::Configuration, gitea::setup::SetupBuilder};

pub mod client;
pub mod finalizer;
pub mod recorder;
pub mod resource;
pub mod store;

// -----------------------------------------------------------------------------
// constants

pub const RECONCILIATION_UPSERT_EVENT: &str = "upsert";
pub const RECONCILIATION_DELETE_EVENT: &str = "delete";

// -----------------------------------------------------------------------------
// Telemetry

#[cfg(feature = "metrics")]
static RECONCILIATION_SUCCESS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_reconciliation_success",
            "number of successful reconciliation"
        ),
        &["kind"]
    )
    .expect("metrics 'kubernetes_provider_reconciliation_success' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_FAILED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_reconciliation_failed",
            "number of failed reconciliation"
        ),
        &["kind"]
    )
    .expect("metrics 'kubernetes_provider_reconciliation_failed' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_EVENT: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_reconciliation_event",
            "number of reconciliation event",
        ),
        &["kind", "namespace", "event"]
    )
    .expect("metrics 'kubernetes_provider_reconciliation_event' to not be already registered")
});

#[cfg(feature = "metrics")]
static RECONCILIATION_DURATION: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        opts!(
            "kubernetes_provider_reconciliation_duration",
            "duration of reconciliation",
        ),
        &["kind", "unit"]
    )
    .expect("metrics 'kubernetes_provider_reconciliation_duration' to not be already registered")
});

// -----------------------------------------------------------------------------
// Context structure

/// contains the kubernetes client, the configuration and the terraform setup
/// builder given to each reconciler.
#[derive(Clone)]
pub struct Context {
    pub kube: kube::Client,
    pub config: Arc<Configuration>,
    pub setup: SetupBuilder,
}

impl From<(kube::Client, Arc<Configuration>)> for Context {
    fn from((kube, config): (kube::Client, Arc<Configuration>)) -> Self {
        let setup = SetupBuilder::from(config.as_ref());

        Self {
            kube,
            config,
            setup,
        }
    }
}

impl Context {
    pub fn new(kube: kube::Client, config: Arc<Configuration>) -> Self {
        Self::from((kube, config))
    }

    /// returns a context on the default configuration whose client targets
    /// an api server that is never reached, it must be built in a runtime
    #[cfg(test)]
    pub fn offline() -> Self {
        let config: Configuration = crate::svc::cfg::defaults()
            .expect("defaults to be set")
            .build()
            .expect("configuration to build")
            .try_deserialize()
            .expect("configuration to deserialize");

        let kubeconfig =
            kube::Config::new("http://127.0.0.1:6443".parse().expect("url to be valid"));
        let kube = kube::Client::try_from(kubeconfig).expect("client to be created");

        Self::new(kube, Arc::new(config))
    }
}

// -----------------------------------------------------------------------------
// Binding structure

/// pairs a reconciler with the shared context, it is the context given to the
/// kubernetes [`Controller<T>`]
pub struct Binding<R> {
    pub reconciler: R,
    pub ctx: Arc<Context>,
}

// -----------------------------------------------------------------------------
// ControllerBuilder trait

/// provides a common way to create a kubernetes
/// controller [`Controller<T>`]
pub trait ControllerBuilder<T>
where
    T: Resource + Clone + Debug,
    <T as Resource>::DynamicType: Eq + Hash,
{
    /// returns a new created kubernetes controller
    fn build(&self, ctx: Arc<Context>) -> Controller<T>;
}

// -----------------------------------------------------------------------------
// Reconciler trait

/// provides the methods called by a kubernetes controller [`Controller<T>`]
#[async_trait]
pub trait Reconciler<T>: Clone + Send + Sync + 'static
where
    T: ResourceExt + Debug + Clone + Send + Sync + 'static,
{
    type Error: Error + Send + Sync + 'static;

    /// returns the kind of the reconciled resource, used in logs and metrics
    fn kind(&self) -> String;

    /// create or update the object, this is part of the the reconcile function
    async fn upsert(&self, ctx: Arc<Context>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// release the object
    async fn delete(&self, ctx: Arc<Context>, obj: Arc<T>) -> Result<(), Self::Error>;

    /// returns the [`Action`] to perform after a successful reconciliation
    fn requeue(&self, _ctx: &Context) -> Action {
        Action::await_change()
    }

    /// returns a [`Action`] to perform following the given error
    fn retry(&self, err: &Self::Error, _ctx: &Context) -> Action {
        trace!(
            kind = self.kind(),
            duration = 500,
            error = err.to_string(),
            "Requeue failed reconciliation",
        );

        Action::requeue(Duration::from_millis(500))
    }
}

/// process the object and dispatch it to the upsert or delete method of the
/// reconciler
pub async fn reconcile<T, R>(obj: Arc<T>, binding: Arc<Binding<R>>) -> Result<Action, R::Error>
where
    T: ResourceExt + Debug + Clone + Send + Sync + 'static,
    R: Reconciler<T>,
{
    let Binding { reconciler, ctx } = binding.as_ref();
    let kind = reconciler.kind();
    let (namespace, name) = resource::namespaced_name(&*obj);

    if resource::deleted(&*obj) {
        info!(
            kind = &kind,
            uid = ?obj.meta().uid,
            name = &name,
            namespace = ?namespace,
            "Received deletion event for resource",
        );

        #[cfg(feature = "metrics")]
        RECONCILIATION_EVENT
            .with_label_values(&[
                &kind,
                namespace.as_deref().unwrap_or_default(),
                RECONCILIATION_DELETE_EVENT,
            ])
            .inc();

        #[cfg(not(feature = "trace"))]
        let result = reconciler.delete(ctx.to_owned(), obj.to_owned()).await;
        #[cfg(feature = "trace")]
        let result = reconciler
            .delete(ctx.to_owned(), obj.to_owned())
            .instrument(tracing::info_span!("Reconciler::delete"))
            .await;

        if let Err(err) = result {
            error!(
                kind = &kind,
                name = &name,
                namespace = ?namespace,
                error = err.to_string(),
                "Failed to delete resource",
            );
            return Err(err);
        }

        return Ok(Action::await_change());
    }

    info!(
        kind = &kind,
        uid = ?obj.meta().uid,
        name = &name,
        namespace = ?namespace,
        "Received upsertion event for resource",
    );

    #[cfg(feature = "metrics")]
    RECONCILIATION_EVENT
        .with_label_values(&[
            &kind,
            namespace.as_deref().unwrap_or_default(),
            RECONCILIATION_UPSERT_EVENT,
        ])
        .inc();

    #[cfg(not(feature = "trace"))]
    let result = reconciler.upsert(ctx.to_owned(), obj.to_owned()).await;
    #[cfg(feature = "trace")]
    let result = reconciler
        .upsert(ctx.to_owned(), obj.to_owned())
        .instrument(tracing::info_span!("Reconciler::upsert"))
        .await;

    if let Err(err) = result {
        error!(
            kind = &kind,
            name = &name,
            namespace = ?namespace,
            error = err.to_string(),
            "Failed to upsert resource",
        );
        return Err(err);
    }

    Ok(reconciler.requeue(ctx))
}

/// error policy given to the kubernetes controller, delegates to
/// [`Reconciler::retry`]
pub fn retry<T, R>(_obj: Arc<T>, err: &R::Error, binding: Arc<Binding<R>>) -> Action
where
    T: ResourceExt + Debug + Clone + Send + Sync + 'static,
    R: Reconciler<T>,
{
    binding.reconciler.retry(err, &binding.ctx)
}

// -----------------------------------------------------------------------------
// Watcher trait

/// provides a watch method that listen to events of
/// kubernetes resource using a [`Controller<T>`]
#[async_trait]
pub trait Watcher<T>: ControllerBuilder<T> + Reconciler<T>
where
    T: DeserializeOwned + ResourceExt + Clone + Debug + Send + Sync + 'static,
    <T as Resource>::DynamicType: Unpin + Eq + Hash + Clone + Debug + Send + Sync,
{
    /// listen for events of the resource as generic parameter until the
    /// controller stream ends
    async fn watch(&self, ctx: Arc<Context>) {
        let kind = self.kind();
        let binding = Arc::new(Binding {
            reconciler: self.to_owned(),
            ctx: ctx.to_owned(),
        });

        let mut stream = self
            .build(ctx)
            .run(reconcile::<T, Self>, retry::<T, Self>, binding)
            .boxed();

        let mut instant = Instant::now();
        while let Some(result) = stream.next().await {
            match result {
                Ok((obj, _action)) => {
                    info!(
                        kind = &kind,
                        name = &obj.name,
                        namespace = ?obj.namespace,
                        "Successfully reconcile resource",
                    );

                    #[cfg(feature = "metrics")]
                    RECONCILIATION_SUCCESS.with_label_values(&[&kind]).inc();
                }
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(
                        kind = &kind,
                        name = &obj_ref.name,
                        namespace = ?obj_ref.namespace,
                        "Received an event about an already deleted resource",
                    );

                    #[cfg(feature = "metrics")]
                    RECONCILIATION_SUCCESS.with_label_values(&[&kind]).inc();
                }
                Err(err) => {
                    error!(
                        kind = &kind,
                        error = err.to_string(),
                        "Failed to reconcile resource",
                    );

                    #[cfg(feature = "metrics")]
                    RECONCILIATION_FAILED.with_label_values(&[&kind]).inc();
                }
            }

            #[cfg(feature = "metrics")]
            RECONCILIATION_DURATION
                .with_label_values(&[&kind, "us"])
                .inc_by(instant.elapsed().as_micros() as f64);

            instant = Instant::now();
        }

        debug!(kind = &kind, "We have reached the end of the watch stream");
    }
}

/// Blanklet implementation for [`Watcher<T>`]
impl<T, U> Watcher<T> for U
where
    T: DeserializeOwned + ResourceExt + Clone + Debug + Send + Sync + 'static,
    <T as Resource>::DynamicType: Unpin + Eq + Hash + Clone + Debug + Send + Sync,
    U: Reconciler<T> + ControllerBuilder<T>,
{
}
