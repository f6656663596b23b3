//! The opaque services bag passed to every `invoke` call: a typed,
//! name-keyed registry of injectable dependencies with optional lifecycle
//! hooks.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A named, injectable dependency made available to invocations. Services
/// may optionally participate in the invoker façade's start/stop lifecycle;
/// the default bodies make both hooks opt-in.
#[async_trait]
pub trait Service: Send + Sync {
    async fn start(&self) {}
    async fn stop(&self) {}
}

/// An opaque bag of named services, keyed by name and downcast by type at
/// lookup time. Unlike a `serde_json::Value`-keyed context, this allows
/// hosts to inject runtime objects (API clients, database handles, worker
/// pools) that cannot themselves be serialized.
#[derive(Default, Clone)]
pub struct ServicesRegistry {
    inner: HashMap<String, Arc<dyn Any + Send + Sync>>,
    lifecycle: Vec<Arc<dyn Service>>,
}

impl ServicesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named, typed service. If it also implements [`Service`]'s
    /// lifecycle hooks, pass it again to [`ServicesRegistry::register_lifecycle`]
    /// so the façade can fan `start`/`stop` out to it.
    pub fn set<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: Arc<T>) {
        self.inner.insert(name.into(), value);
    }

    pub fn get<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.inner.get(name).and_then(|v| v.clone().downcast::<T>().ok())
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Registers a service for the façade's lifecycle fan-out, independent of
    /// whether it's also addressable by name via `set`.
    pub fn register_lifecycle(&mut self, service: Arc<dyn Service>) {
        self.lifecycle.push(service);
    }

    pub(crate) fn lifecycle_services(&self) -> &[Arc<dyn Service>] {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn set_and_get_round_trips_by_type() {
        let mut services = ServicesRegistry::new();
        services.set("greeting", Arc::new("hello".to_string()));
        assert_eq!(services.get::<String>("greeting").as_deref().map(|s| s.as_str()), Some("hello"));
        assert!(services.get::<u32>("greeting").is_none());
    }

    struct CountingService {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl Service for CountingService {
        async fn start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        async fn stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn lifecycle_services_are_registered_for_fan_out() {
        let mut services = ServicesRegistry::new();
        let svc = Arc::new(CountingService {
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        services.register_lifecycle(svc.clone());
        assert_eq!(services.lifecycle_services().len(), 1);
        services.lifecycle_services()[0].start().await;
        assert_eq!(svc.starts.load(Ordering::SeqCst), 1);
    }
}
