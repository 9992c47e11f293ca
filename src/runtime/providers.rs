//! Provider Registry and Capabilities
//!
//! Collaborators (compiler, stack introspector) are supplied up front as an
//! ordered list of [`ProviderDescriptor`]s. The runtime selects the one with
//! the highest priority; among equal priorities the first registered wins.
//!
//! Optional services are looked up by type in [`Capabilities`]; a missing
//! capability is `None`, never an error.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One candidate implementation of a collaborator.
pub struct ProviderDescriptor<P: ?Sized> {
    pub name: &'static str,
    pub priority: i32,
    pub provider: Arc<P>,
}

impl<P: ?Sized> ProviderDescriptor<P> {
    pub fn new(name: &'static str, priority: i32, provider: Arc<P>) -> Self {
        Self {
            name,
            priority,
            provider,
        }
    }
}

impl<P: ?Sized> Clone for ProviderDescriptor<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            priority: self.priority,
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<P: ?Sized> fmt::Debug for ProviderDescriptor<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Ordered list of providers for one collaborator.
pub struct ProviderRegistry<P: ?Sized> {
    descriptors: Vec<ProviderDescriptor<P>>,
}

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }
}

impl<P: ?Sized> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ProviderDescriptor<P>) {
        self.descriptors.push(descriptor);
    }

    /// Highest-priority provider; ties go to the earliest registration.
    pub fn select(&self) -> Option<&ProviderDescriptor<P>> {
        self.descriptors
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.priority.cmp(&b.priority).then(ib.cmp(ia)))
            .map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor<P>> {
        self.descriptors.iter()
    }
}

/// Type-indexed map of optional services.
#[derive(Default)]
pub struct Capabilities {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, capability: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), capability);
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|c| Arc::clone(c).downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("count", &self.entries.len())
            .finish()
    }
}
