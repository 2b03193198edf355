//! Service registration for rewind-undo-redo

use std::sync::Arc;

use rewind_common::di::{ServiceEntry, ServiceFactory};

use crate::config::UndoConfig;

inventory::submit! {
    ServiceFactory::new("undo-redo", create_undo_redo_services)
}

/// Hosts build their own log and store; only the default config is shared
fn create_undo_redo_services() -> Vec<ServiceEntry> {
    vec![ServiceEntry::new::<UndoConfig>(Arc::new(UndoConfig::default()))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rewind_common::di::{collect_all_services, list_discovered_factories};

    #[test]
    fn test_undo_redo_factory_registered() {
        let factories = list_discovered_factories();
        assert!(factories.contains(&"undo-redo"), "Factory should be registered");
    }

    #[test]
    fn test_factory_provides_default_config() {
        let config = collect_all_services()
            .iter()
            .find_map(|entry| entry.downcast::<UndoConfig>())
            .expect("config service");
        assert_eq!(*config, UndoConfig::default());
    }

    #[test]
    fn test_factory_provides_only_config() {
        let services = create_undo_redo_services();
        assert_eq!(services.len(), 1);
        assert!(services[0].downcast::<UndoConfig>().is_some());
    }
}
