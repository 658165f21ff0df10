//! Named-implementation registry for pluggable extension points.
//!
//! An extension point is any (usually `dyn Trait`) type. Implementations are
//! registered under a name with a factory and a [`Scope`]; callers resolve them
//! by name at run time, typically from a Url option such as `loadbalance=random`.
//!
//! ```
//! use std::sync::Arc;
//! use orbit_common::extension::{ExtensionRegistry, Scope};
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//! struct Hello;
//! impl Greeter for Hello {
//!     fn greet(&self) -> String { "hello".into() }
//! }
//!
//! let registry = ExtensionRegistry::new();
//! registry
//!     .register::<dyn Greeter, _>("hello", Scope::Singleton, || Arc::new(Hello))
//!     .unwrap();
//! let greeter = registry.resolve::<dyn Greeter>("hello").unwrap();
//! assert_eq!(greeter.greet(), "hello");
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};

use crate::protocol::error::{OrbitError, Result};

/// Instance lifetime of a registered implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// One shared instance, created on first resolve.
    Singleton,
    /// A fresh instance per resolve.
    Prototype,
}

type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Registration<T: ?Sized> {
    factory: Factory<T>,
    scope: Scope,
    instance: OnceLock<Arc<T>>,
}

impl<T: ?Sized> Registration<T> {
    fn get(&self) -> Arc<T> {
        match self.scope {
            Scope::Prototype => (self.factory)(),
            Scope::Singleton => Arc::clone(self.instance.get_or_init(|| (self.factory)())),
        }
    }
}

/// Registry keyed by (extension point, name).
#[derive(Default)]
pub struct ExtensionRegistry {
    entries: DashMap<(TypeId, String), Arc<dyn Any + Send + Sync>>,
}

fn point_name<T: ?Sized>() -> String {
    std::any::type_name::<T>().to_string()
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as implementation `name` of extension point `T`.
    ///
    /// Fails with [`OrbitError::DuplicateExtension`] if the name is taken.
    pub fn register<T, F>(&self, name: &str, scope: Scope, factory: F) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn() -> Arc<T> + Send + Sync + 'static,
    {
        let key = (TypeId::of::<T>(), name.to_string());
        match self.entries.entry(key) {
            Entry::Occupied(_) => Err(OrbitError::DuplicateExtension {
                point: point_name::<T>(),
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                let registration: Registration<T> = Registration {
                    factory: Arc::new(factory),
                    scope,
                    instance: OnceLock::new(),
                };
                slot.insert(Arc::new(registration));
                tracing::debug!(point = %point_name::<T>(), name, ?scope, "Registered extension");
                Ok(())
            }
        }
    }

    /// Resolves implementation `name` of `T`.
    pub fn resolve<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        // Clone the entry out so the factory never runs under a shard lock;
        // factories are free to resolve other extensions.
        let entry = self
            .entries
            .get(&(TypeId::of::<T>(), name.to_string()))
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| OrbitError::ExtensionNotFound {
                point: point_name::<T>(),
                name: name.to_string(),
            })?;

        let registration = entry
            .downcast_ref::<Registration<T>>()
            .ok_or_else(|| OrbitError::Config(format!("extension '{}' has a mismatched type", name)))?;
        Ok(registration.get())
    }

    pub fn contains<T>(&self, name: &str) -> bool
    where
        T: ?Sized + 'static,
    {
        self.entries.contains_key(&(TypeId::of::<T>(), name.to_string()))
    }

    /// Names registered for `T`, sorted.
    pub fn names<T>(&self) -> Vec<String>
    where
        T: ?Sized + 'static,
    {
        let point = TypeId::of::<T>();
        let mut names: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == point)
            .map(|e| e.key().1.clone())
            .collect();
        names.sort();
        names
    }

    /// Resolves every implementation of `T`, in name order.
    pub fn resolve_all<T>(&self) -> Result<Vec<(String, Arc<T>)>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.names::<T>()
            .into_iter()
            .map(|name| {
                let ext = self.resolve::<T>(&name)?;
                Ok((name, ext))
            })
            .collect()
    }
}

impl std::fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("entries", &self.entries.len())
            .finish()
    }
}
