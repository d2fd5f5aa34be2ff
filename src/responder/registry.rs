//! Handler registry for dispatching requests by method name.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = HandlerRegistry::new();
//!
//! registry.register("post_swipe", |swipe: Swipe, ctx| async move {
//!     ctx.respond(&SwipeOutcome { match_created: false }).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{HandlerResult, RequestContext};
use crate::error::HandlerError;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its untyped payload.
    fn call(&self, payload: Value, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the payload before calling the handler.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, payload: Value, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(payload) {
            Ok(v) => v,
            Err(e) => {
                let err = HandlerError::BadPayload(e.to_string());
                return Box::pin(async move { Err(err) });
            }
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// Registry mapping method names to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    methods: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register<F, T, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.methods
            .insert(name.to_string(), Box::new(TypedHandler::new(handler)));
    }

    /// Handler for `name`.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.methods.get(name).map(|h| h.as_ref())
    }

    /// Whether `name` has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }

    /// Run the handler for `name`.
    pub async fn dispatch(&self, name: &str, payload: Value, ctx: RequestContext) -> HandlerResult {
        let handler = self
            .get(name)
            .ok_or_else(|| HandlerError::UnknownMethod(name.to_string()))?;
        handler.call(payload, ctx).await
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register("post_swipe", |_: Value, _ctx| async { Ok(()) });
        registry.register("get_json", |_: Value, _ctx| async { Ok(()) });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("get_json"));
        assert!(registry.get("get_all_json").is_none());
        assert_eq!(registry.method_names(), vec!["get_json", "post_swipe"]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register("m", |_: Value, _ctx| async { Ok(()) });
        registry.register("m", |_: String, _ctx| async { Ok(()) });
        assert_eq!(registry.len(), 1);
    }
}
