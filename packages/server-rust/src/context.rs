use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use svckit_core::ConfigStore;

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Shared handle given to startup tasks, schedule jobs and requests.
///
/// Cloning is cheap; every clone sees the same configuration and resources.
/// Resources are keyed by their concrete type, so each type holds at most one
/// value.
#[derive(Clone)]
pub struct ServiceContext {
    config: Arc<ConfigStore>,
    resources: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ServiceContext {
    #[must_use]
    pub fn new(config: ConfigStore) -> Self {
        Self {
            config: Arc::new(config),
            resources: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    /// Replaces the configuration, keeping the registered resources.
    #[must_use]
    pub fn with_config(&self, config: ConfigStore) -> Self {
        Self {
            config: Arc::new(config),
            resources: Arc::clone(&self.resources),
        }
    }

    /// Registers a resource, replacing any previous value of the same type.
    pub fn provide<T: Send + Sync + 'static>(&self, value: T) {
        self.resources.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Retrieves a resource by its concrete type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.resources
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }
}

impl Default for ServiceContext {
    fn default() -> Self {
        Self::new(ConfigStore::empty())
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("resources", &self.resources.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    struct Counter(AtomicU32);

    #[test]
    fn resources_are_shared_between_clones() {
        let ctx = ServiceContext::default();
        let clone = ctx.clone();
        ctx.provide(Counter(AtomicU32::new(0)));

        clone.get::<Counter>().unwrap().0.fetch_add(1, Ordering::SeqCst);
        assert_eq!(ctx.get::<Counter>().unwrap().0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lookup_is_by_type() {
        let ctx = ServiceContext::default();
        ctx.provide(String::from("db://primary"));
        ctx.provide(7u32);

        assert_eq!(ctx.get::<String>().unwrap().as_str(), "db://primary");
        assert_eq!(*ctx.get::<u32>().unwrap(), 7);
        assert!(ctx.get::<u64>().is_none());
        assert!(!ctx.contains::<Counter>());
    }

    #[test]
    fn provide_replaces_previous_value() {
        let ctx = ServiceContext::default();
        ctx.provide(1u8);
        ctx.provide(2u8);
        assert_eq!(*ctx.get::<u8>().unwrap(), 2);
    }

    #[test]
    fn with_config_keeps_resources() {
        let ctx = ServiceContext::default();
        ctx.provide(5i32);
        let config = ConfigStore::from_json(r#"{"name": "svc"}"#, None).unwrap();

        let swapped = ctx.with_config(config);
        assert_eq!(swapped.config().get::<String>("name").unwrap(), "svc");
        assert_eq!(*swapped.get::<i32>().unwrap(), 5);
        assert!(!ctx.config().has("name"));
    }
}
