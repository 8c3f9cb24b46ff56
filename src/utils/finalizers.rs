//! Finalizer bookkeeping on in-memory objects. Persisting the result is up to the caller.

use std::collections::BTreeSet;

use kube::{Resource, ResourceExt};

/// Returns true if the object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Adds the finalizer, leaving the list untouched if it is already there
pub fn add_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    let mut finalizers = finalizer_set(obj);
    finalizers.insert(finalizer.to_owned());
    *obj.finalizers_mut() = finalizers.into_iter().collect();
}

/// Removes the finalizer, if present
pub fn delete_finalizer<K: Resource>(obj: &mut K, finalizer: &str) {
    let mut finalizers = finalizer_set(obj);
    finalizers.remove(finalizer);
    *obj.finalizers_mut() = finalizers.into_iter().collect();
}

// finalizers are a set; the stored list comes out sorted and deduplicated
fn finalizer_set<K: Resource>(obj: &K) -> BTreeSet<String> {
    obj.finalizers().iter().cloned().collect()
}
