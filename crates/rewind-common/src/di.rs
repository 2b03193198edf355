//! Service registration through link-time discovery
//!
//! Crates submit a [`ServiceFactory`] with `inventory::submit!`. A host calls
//! [`collect_all_services`] once at startup and places the returned
//! [`ServiceEntry`] values into whatever container it uses.
//!
//! ```rust,ignore
//! use rewind_common::di::{ServiceEntry, ServiceFactory};
//! use std::sync::Arc;
//!
//! inventory::submit! {
//!     ServiceFactory::new("undo-redo", create_undo_redo_services)
//! }
//!
//! fn create_undo_redo_services() -> Vec<ServiceEntry> {
//!     vec![ServiceEntry::new::<UndoConfig>(Arc::new(UndoConfig::default()))]
//! }
//! ```

use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::{debug, info};

/// A type-erased service instance keyed by its concrete type.
pub struct ServiceEntry {
    /// The TypeId of the service (used as registration key)
    pub type_id: TypeId,

    /// Human-readable type name for debugging
    pub type_name: &'static str,

    /// The service instance (type-erased)
    pub instance: Arc<dyn Any + Send + Sync>,
}

impl ServiceEntry {
    /// Create a new service entry for a concrete type
    pub fn new<T: Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance: instance as Arc<dyn Any + Send + Sync>,
        }
    }

    /// Recover the concrete service, if this entry holds a `T`
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

impl std::fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("type_id", &self.type_id)
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Factory submitted by a crate; called once when services are collected.
pub struct ServiceFactory {
    /// Name of the service group (e.g. "undo-redo")
    pub name: &'static str,

    /// Factory function that creates and returns services
    pub factory_fn: fn() -> Vec<ServiceEntry>,

    /// Registration order (lower = earlier, default = 100)
    pub priority: u32,
}

impl ServiceFactory {
    /// Create a new service factory with default priority
    pub const fn new(name: &'static str, factory_fn: fn() -> Vec<ServiceEntry>) -> Self {
        Self {
            name,
            factory_fn,
            priority: 100,
        }
    }

    /// Create a new service factory with custom priority
    pub const fn with_priority(
        name: &'static str,
        factory_fn: fn() -> Vec<ServiceEntry>,
        priority: u32,
    ) -> Self {
        Self {
            name,
            factory_fn,
            priority,
        }
    }
}

inventory::collect!(ServiceFactory);

/// Run every discovered factory in priority order and gather their services.
pub fn collect_all_services() -> Vec<ServiceEntry> {
    let mut factories: Vec<&ServiceFactory> = inventory::iter::<ServiceFactory>().collect();
    factories.sort_by_key(|f| f.priority);

    info!(count = factories.len(), "discovered service factories");

    let mut all_services = Vec::new();
    for factory in factories {
        let services = (factory.factory_fn)();
        debug!(
            factory = factory.name,
            priority = factory.priority,
            services = services.len(),
            "created services"
        );
        all_services.extend(services);
    }
    all_services
}

/// List all discovered service factory names.
pub fn list_discovered_factories() -> Vec<&'static str> {
    inventory::iter::<ServiceFactory>().map(|f| f.name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    fn create_widget_services() -> Vec<ServiceEntry> {
        vec![ServiceEntry::new::<Widget>(Arc::new(Widget(7)))]
    }

    inventory::submit! {
        ServiceFactory::with_priority("widget", create_widget_services, 1)
    }

    #[test]
    fn test_factory_is_discovered() {
        assert!(list_discovered_factories().contains(&"widget"));
    }

    #[test]
    fn test_collected_entry_downcasts() {
        let services = collect_all_services();
        let widget = services
            .iter()
            .find_map(|entry| entry.downcast::<Widget>())
            .expect("widget service collected");
        assert_eq!(widget.0, 7);
    }

    #[test]
    fn test_downcast_to_wrong_type_is_none() {
        let entry = ServiceEntry::new::<Widget>(Arc::new(Widget(1)));
        assert!(entry.downcast::<String>().is_none());
        assert!(entry.type_name.contains("Widget"));
    }
}
