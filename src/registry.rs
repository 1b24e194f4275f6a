//! Fixed hook registry
//!
//! The single source of truth the lifecycle controller walks. Assembled once
//! from registration records; no insertion or removal afterwards.

use std::sync::Arc;

use crate::descriptor::{HookDescriptor, HookHandle, HookRegistration};

/// fixed, startup-assembled collection of hook descriptors
pub struct HookRegistry {
    descriptors: Vec<Arc<HookDescriptor>>,
}

impl HookRegistry {
    /// build the registry from declarative registration records
    pub fn from_registrations(registrations: &[HookRegistration]) -> Self {
        Self {
            descriptors: registrations
                .iter()
                .map(|r| Arc::new(HookDescriptor::new(*r)))
                .collect(),
        }
    }

    /// iterate descriptors in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<HookDescriptor>> {
        self.descriptors.iter()
    }

    /// look a descriptor up by symbol name
    pub fn get(&self, name: &str) -> Option<&Arc<HookDescriptor>> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    /// handle for use inside a handler body
    pub fn handle(&self, name: &str) -> Option<HookHandle> {
        self.get(name).map(|d| HookHandle::new(Arc::clone(d)))
    }

    /// number of registered hooks
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_preserves_order_and_names() {
        let regs = [
            HookRegistration::new("alpha", 0x1),
            HookRegistration::new("beta", 0x2),
        ];
        let registry = HookRegistry::from_registrations(&regs);

        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.iter().map(|d| d.name()).collect();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[test]
    fn test_lookup_by_name() {
        let regs = [HookRegistration::new("alpha", 0x1)];
        let registry = HookRegistry::from_registrations(&regs);

        assert!(registry.get("alpha").is_some());
        assert!(registry.get("gamma").is_none());
        assert_eq!(registry.handle("alpha").unwrap().name(), "alpha");
    }
}
