//! # Finalizer module
//!
//! This module provide helpers methods to interact with kubernetes' resource
//! finalizer

use kube::Resource;

// -----------------------------------------------------------------------------
// Constants

/// finalizer kept on provider configs as long as managed resources use them
pub const IN_USE: &str = "in-use.crossplane.io";

// -----------------------------------------------------------------------------
// Helpers functions

/// returns if there is the given finalizer on the resource
pub fn contains<T>(obj: &T, finalizer: &str) -> bool
where
    T: Resource,
{
    obj.meta()
        .finalizers
        .as_ref()
        .map(|finalizers| finalizers.iter().any(|f| finalizer == f))
        .unwrap_or(false)
}

/// add finalizer to the resource, it is a no-op if already present
pub fn add<T>(mut obj: T, finalizer: &str) -> T
where
    T: Resource,
{
    if !contains(&obj, finalizer) {
        obj.meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.into());
    }

    obj
}

/// remove finalizer from the resource
pub fn remove<T>(mut obj: T, finalizer: &str) -> T
where
    T: Resource,
{
    if let Some(finalizers) = obj.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }

    obj
}

#[cfg(test)]
mod tests {
    use crate::svc::crd::cluster::{ClusterProviderConfig, Spec};

    use super::*;

    #[test]
    fn add_is_idempotent() {
        let pc = ClusterProviderConfig::new("cluster-pc", Spec::default());

        let pc = add(add(pc, IN_USE), IN_USE);

        assert!(contains(&pc, IN_USE));
        assert_eq!(Some(1), pc.metadata.finalizers.map(|f| f.len()));
    }

    #[test]
    fn remove_keeps_other_finalizers() {
        let pc = ClusterProviderConfig::new("cluster-pc", Spec::default());
        let pc = add(add(pc, "other.example.com"), IN_USE);

        let pc = remove(pc, IN_USE);

        assert!(!contains(&pc, IN_USE));
        assert!(contains(&pc, "other.example.com"));
    }
}
