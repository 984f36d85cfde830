//! Cross-extension API namespaces.
//!
//! An extension can publish an arbitrary object under a namespace so that
//! other extensions can look it up. The first claim on a namespace wins
//! until its owner releases it or is deactivated.

use std::any::Any;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::error::{ExtensionError, ExtensionResult};

/// Opaque API object published by an extension.
pub type PluginApi = Rc<dyn Any>;

struct ApiRecord {
    owner: String,
    api: PluginApi,
}

#[derive(Default)]
pub struct ApiRegistry {
    entries: BTreeMap<String, ApiRecord>,
}

impl ApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `namespace` for `extension_id`.
    ///
    /// Re-registering from the owner replaces the object. A claim on a
    /// namespace held by another extension is refused and the existing
    /// entry is left untouched.
    pub fn register(
        &mut self,
        extension_id: &str,
        namespace: &str,
        api: PluginApi,
    ) -> ExtensionResult<()> {
        let namespace = namespace.trim();
        if namespace.is_empty() {
            tracing::warn!(extension = %extension_id, "register_api called with empty namespace");
            return Err(ExtensionError::Validation(
                "API namespace must not be empty".into(),
            ));
        }

        if let Some(existing) = self.entries.get(namespace) {
            if existing.owner != extension_id {
                tracing::warn!(
                    extension = %extension_id,
                    namespace = %namespace,
                    owner = %existing.owner,
                    "API namespace already claimed"
                );
                return Err(ExtensionError::CapabilityConflict {
                    namespace: namespace.to_string(),
                    owner: existing.owner.clone(),
                });
            }
        }

        self.entries.insert(
            namespace.to_string(),
            ApiRecord {
                owner: extension_id.to_string(),
                api,
            },
        );
        tracing::info!(extension = %extension_id, namespace = %namespace, "API registered");
        Ok(())
    }

    pub fn get(&self, namespace: &str) -> Option<PluginApi> {
        self.entries.get(namespace.trim()).map(|r| r.api.clone())
    }

    /// Look up and downcast an API object.
    pub fn get_typed<T: 'static>(&self, namespace: &str) -> Option<Rc<T>> {
        self.get(namespace)?.downcast::<T>().ok()
    }

    pub fn owner(&self, namespace: &str) -> Option<&str> {
        self.entries.get(namespace.trim()).map(|r| r.owner.as_str())
    }

    /// Release a namespace if, and only if, `extension_id` owns it.
    pub fn release(&mut self, extension_id: &str, namespace: &str) -> bool {
        match self.entries.get(namespace) {
            Some(record) if record.owner == extension_id => {
                self.entries.remove(namespace);
                true
            }
            _ => false,
        }
    }

    /// Release every namespace owned by an extension.
    pub fn remove_extension(&mut self, extension_id: &str) -> Vec<String> {
        let owned = self.namespaces_owned_by(extension_id);
        for namespace in &owned {
            self.entries.remove(namespace);
        }
        owned
    }

    pub fn namespaces_owned_by(&self, extension_id: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, r)| r.owner == extension_id)
            .map(|(ns, _)| ns.clone())
            .collect()
    }

    /// `(namespace, owner)` pairs in namespace order.
    pub fn namespaces(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(ns, r)| (ns.clone(), r.owner.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_claim_wins() {
        let mut apis = ApiRegistry::new();
        apis.register("a", "ns", Rc::new(1_u32)).unwrap();

        let err = apis.register("b", "ns", Rc::new(2_u32)).unwrap_err();
        assert!(matches!(
            err,
            ExtensionError::CapabilityConflict { ref owner, .. } if owner == "a"
        ));
        assert_eq!(apis.owner("ns"), Some("a"));
        assert_eq!(*apis.get_typed::<u32>("ns").unwrap(), 1);
    }

    #[test]
    fn test_owner_can_replace() {
        let mut apis = ApiRegistry::new();
        apis.register("a", "ns", Rc::new(1_u32)).unwrap();
        apis.register("a", "ns", Rc::new(5_u32)).unwrap();
        assert_eq!(*apis.get_typed::<u32>("ns").unwrap(), 5);
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut apis = ApiRegistry::new();
        assert!(matches!(
            apis.register("a", "  ", Rc::new(())),
            Err(ExtensionError::Validation(_))
        ));
        assert!(apis.namespaces().is_empty());
    }

    #[test]
    fn test_release_requires_ownership() {
        let mut apis = ApiRegistry::new();
        apis.register("a", "one", Rc::new(())).unwrap();
        apis.register("a", "two", Rc::new(())).unwrap();
        apis.register("b", "three", Rc::new(())).unwrap();

        assert!(!apis.release("b", "one"));
        assert_eq!(apis.remove_extension("a"), vec!["one", "two"]);
        assert!(apis.get("one").is_none());
        assert!(apis.get_typed::<String>("three").is_none());
        assert!(apis.get("three").is_some());
    }
}
