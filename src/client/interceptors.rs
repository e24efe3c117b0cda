//! Request, response and error interceptors.
//!
//! Interceptors are stored in insertion order inside an [`Interceptors`]
//! registry. Removing one leaves a tombstone so that every
//! [`InterceptorId`] handed out keeps pointing at the same slot.

use crate::client::config::ResolvedOptions;
use crate::client::response::{RequestSnapshot, ResponseSnapshot};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Hook run on every outgoing request before it is sent.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    /// Inspect or replace the outgoing request.
    async fn on_request(
        &self,
        request: reqwest::Request,
        options: &ResolvedOptions,
    ) -> Result<reqwest::Request>;
}

/// Hook run on every response before its body is read.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    /// Inspect or replace the response.
    async fn on_response(
        &self,
        response: reqwest::Response,
        request: &RequestSnapshot,
        options: &ResolvedOptions,
    ) -> Result<reqwest::Response>;
}

/// Hook run when a request fails, either with a non-2xx status or before any
/// response was obtained.
#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    /// Transform the error. Returning `None` suppresses it, in which case the
    /// caller receives [`Error::Unspecified`].
    async fn on_error(
        &self,
        error: Error,
        response: Option<&ResponseSnapshot>,
        request: &RequestSnapshot,
        options: &ResolvedOptions,
    ) -> Option<Error>;
}

/// Stable handle to a registered interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(usize);

/// Reference to a registered interceptor, either by handle or by the
/// registered `Arc` itself.
#[derive(Debug)]
pub enum InterceptorRef<'a, T: ?Sized> {
    /// Handle returned by [`Interceptors::add`]
    Id(InterceptorId),
    /// The registered interceptor, compared by pointer
    Fn(&'a Arc<T>),
}

impl<T: ?Sized> From<InterceptorId> for InterceptorRef<'_, T> {
    fn from(id: InterceptorId) -> Self {
        Self::Id(id)
    }
}

impl<'a, T: ?Sized> From<&'a Arc<T>> for InterceptorRef<'a, T> {
    fn from(f: &'a Arc<T>) -> Self {
        Self::Fn(f)
    }
}

/// Ordered interceptor registry.
pub struct Interceptors<T: ?Sized> {
    fns: Vec<Option<Arc<T>>>,
}

impl<T: ?Sized> Interceptors<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { fns: Vec::new() }
    }

    /// Register an interceptor at the end of the chain.
    pub fn add(&mut self, f: Arc<T>) -> InterceptorId {
        self.fns.push(Some(f));
        InterceptorId(self.fns.len() - 1)
    }

    fn index_of(&self, target: InterceptorRef<'_, T>) -> Option<usize> {
        match target {
            InterceptorRef::Id(id) => self
                .fns
                .get(id.0)
                .and_then(|slot| slot.as_ref())
                .map(|_| id.0),
            InterceptorRef::Fn(f) => self
                .fns
                .iter()
                .position(|slot| slot.as_ref().is_some_and(|g| Arc::ptr_eq(g, f))),
        }
    }

    /// Whether the referenced interceptor is still registered.
    pub fn exists<'a>(&self, target: impl Into<InterceptorRef<'a, T>>) -> bool
    where
        T: 'a,
    {
        self.index_of(target.into()).is_some()
    }

    /// Remove an interceptor. Unknown references are ignored.
    pub fn eject<'a>(&mut self, target: impl Into<InterceptorRef<'a, T>>)
    where
        T: 'a,
    {
        if let Some(index) = self.index_of(target.into()) {
            self.fns[index] = None;
        }
    }

    /// Replace an interceptor in place, keeping its position in the chain.
    ///
    /// Returns the slot handle, or `None` if the reference is unknown.
    pub fn update<'a>(
        &mut self,
        target: impl Into<InterceptorRef<'a, T>>,
        f: Arc<T>,
    ) -> Option<InterceptorId>
    where
        T: 'a,
    {
        let index = self.index_of(target.into())?;
        self.fns[index] = Some(f);
        Some(InterceptorId(index))
    }

    /// Remove every interceptor. Previously issued handles stay dead.
    pub fn clear(&mut self) {
        for slot in &mut self.fns {
            *slot = None;
        }
    }

    /// Live interceptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.fns.iter().flatten()
    }

    /// Number of live interceptors.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no interceptor is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.iter().cloned().collect()
    }
}

impl<T: ?Sized> Default for Interceptors<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Interceptors<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("slots", &self.fns.len())
            .field("live", &self.len())
            .finish()
    }
}

/// The three interceptor chains of a client.
#[derive(Debug, Default)]
pub struct ClientInterceptors {
    /// Run before each request is sent
    pub request: Interceptors<dyn RequestInterceptor>,
    /// Run on each response before its body is read
    pub response: Interceptors<dyn ResponseInterceptor>,
    /// Run on each failure
    pub error: Interceptors<dyn ErrorInterceptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct A;
    struct B;

    impl Named for A {
        fn name(&self) -> &'static str {
            "a"
        }
    }

    impl Named for B {
        fn name(&self) -> &'static str {
            "b"
        }
    }

    fn names(registry: &Interceptors<dyn Named>) -> Vec<&'static str> {
        registry.iter().map(|f| f.name()).collect()
    }

    #[test]
    fn handles_stay_stable_after_eject() {
        let mut registry: Interceptors<dyn Named> = Interceptors::new();
        let first = registry.add(Arc::new(A));
        let second = registry.add(Arc::new(B));

        registry.eject(first);
        assert!(!registry.exists(first));
        assert!(registry.exists(second));
        assert_eq!(names(&registry), vec!["b"]);

        let third = registry.add(Arc::new(A));
        assert_ne!(third, first);
        assert_eq!(names(&registry), vec!["b", "a"]);
    }

    #[test]
    fn lookup_by_arc() {
        let mut registry: Interceptors<dyn Named> = Interceptors::new();
        let a: Arc<dyn Named> = Arc::new(A);
        let other: Arc<dyn Named> = Arc::new(A);
        registry.add(a.clone());

        assert!(registry.exists(&a));
        assert!(!registry.exists(&other));
        registry.eject(&other);
        assert_eq!(registry.len(), 1);
        registry.eject(&a);
        assert!(registry.is_empty());
    }

    #[test]
    fn update_keeps_position() {
        let mut registry: Interceptors<dyn Named> = Interceptors::new();
        let first = registry.add(Arc::new(A));
        registry.add(Arc::new(A));

        assert_eq!(registry.update(first, Arc::new(B)), Some(first));
        assert_eq!(names(&registry), vec!["b", "a"]);

        registry.eject(first);
        assert_eq!(registry.update(first, Arc::new(B)), None);
    }

    #[test]
    fn clear_invalidates_every_handle() {
        let mut registry: Interceptors<dyn Named> = Interceptors::new();
        let first = registry.add(Arc::new(A));
        registry.clear();
        assert!(!registry.exists(first));

        let next = registry.add(Arc::new(B));
        assert_ne!(next, first);
        assert!(!registry.exists(first));
    }
}
