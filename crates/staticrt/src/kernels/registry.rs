//! Operator registry mapping operator names to kernel definitions.
//!
//! Kernel crates contribute operators through the [`KERNEL_REGISTRARS`] distributed slice, so a
//! kernel library only needs to be linked to become visible in [`KernelRegistry::global`].
//! Explicit registries can be built with [`KernelRegistry::new`] and passed to
//! [`crate::StaticModule::with_registry`].

use std::collections::HashMap;

use once_cell::sync::Lazy;

use super::OperatorDef;

/// Registration hook contributed by kernel crates.
#[linkme::distributed_slice]
pub static KERNEL_REGISTRARS: [fn(&mut KernelRegistry)] = [..];

static GLOBAL_REGISTRY: Lazy<KernelRegistry> = Lazy::new(|| {
    let mut registry = KernelRegistry::new();
    for registrar in KERNEL_REGISTRARS {
        registrar(&mut registry);
    }
    tracing::debug!(operators = registry.len(), "built global kernel registry");
    registry
});

#[derive(Debug, Clone, Default)]
pub struct KernelRegistry {
    ops: HashMap<String, OperatorDef>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry assembled from every linked registrar. Built on first access.
    pub fn global() -> &'static KernelRegistry {
        &GLOBAL_REGISTRY
    }

    /// Adds or replaces an operator definition.
    pub fn register(&mut self, def: OperatorDef) {
        self.ops.insert(def.name.to_string(), def);
    }

    pub fn register_all(&mut self, defs: &[OperatorDef]) {
        for def in defs {
            self.register(*def);
        }
    }

    pub fn get(&self, name: &str) -> Option<&OperatorDef> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    /// Registered operator names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
