//! Type registry for native type lookup
//!
//! The registry maps type names to descriptors. It is built once at startup
//! and is read-only afterwards, so it can be shared across contexts without
//! locking.

use super::descriptor::{Primitive, TypeDescriptor};
use crate::value::Value;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::sync::Arc;

static STANDARD_REGISTRY: Lazy<Arc<TypeRegistry>> =
    Lazy::new(|| Arc::new(create_standard_registry()));

/// Registry of native type descriptors
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: Arc<FxHashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry builder
    pub fn builder() -> TypeRegistryBuilder {
        TypeRegistryBuilder {
            types: FxHashMap::default(),
        }
    }

    /// Get a descriptor by name
    pub fn get(&self, name: &str) -> Option<&Arc<TypeDescriptor>> {
        self.types.get(name)
    }

    /// Get a descriptor as a script type object
    pub fn type_value(&self, name: &str) -> Option<Value> {
        self.get(name).cloned().map(Value::Type)
    }

    /// Check if a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Resolve a script value to a descriptor
    ///
    /// Succeeds only for type objects. Failure is not an error: callers use
    /// it to tell typed construction from untyped placeholders.
    pub fn try_resolve(&self, value: &Value) -> Option<Arc<TypeDescriptor>> {
        match value {
            Value::Type(ty) => Some(ty.clone()),
            _ => None,
        }
    }

    /// Get the number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Builder for TypeRegistry
pub struct TypeRegistryBuilder {
    types: FxHashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistryBuilder {
    /// Register a descriptor under its own name
    pub fn register(self, descriptor: TypeDescriptor) -> Self {
        self.register_shared(Arc::new(descriptor))
    }

    /// Register an already shared descriptor
    pub fn register_shared(mut self, descriptor: Arc<TypeDescriptor>) -> Self {
        self.types.insert(descriptor.name().to_string(), descriptor);
        self
    }

    /// Register a descriptor under an alias
    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        if let Some(descriptor) = self.types.get(target).cloned() {
            self.types.insert(alias.to_string(), descriptor);
        }
        self
    }

    /// Build the registry
    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            types: Arc::new(self.types),
        }
    }
}

/// Create a registry holding the built-in primitives
pub fn create_standard_registry() -> TypeRegistry {
    Primitive::ALL
        .iter()
        .fold(TypeRegistry::builder(), |builder, &p| {
            builder.register(TypeDescriptor::primitive(p))
        })
        .alias("float32", "float")
        .alias("float64", "double")
        .build()
}

/// Process-wide standard registry
pub fn standard_registry() -> Arc<TypeRegistry> {
    STANDARD_REGISTRY.clone()
}
