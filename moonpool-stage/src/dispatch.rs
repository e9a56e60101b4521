//! Dispatch table: `(concrete target type, method id) → handler`.
//!
//! Handlers are registered when a type is registered and looked up by the
//! target's `TypeId` at call time. No reflection happens on the call path;
//! any type with a registered handler set can be invoked.
//!
//! # Usage
//!
//! ```rust,ignore
//! const GREET: MethodId = MethodId(1);
//!
//! fn greet<'a>(this: &'a mut Greeter, _ctx: &'a InvocationContext, _params: Vec<Value>) -> MethodFuture<'a> {
//!     Box::pin(async move { Ok(Value::from(format!("hi from {}", this.name))) })
//! }
//!
//! #[async_trait]
//! impl Actor for Greeter {
//!     fn actor_type() -> ActorType { GREETER }
//!     async fn activate(reference: &RemoteReference) -> Result<Self, InvocationError> {
//!         Ok(Greeter { name: reference.key().to_string() })
//!     }
//!     fn methods(methods: &mut Methods<Self>) {
//!         methods.add(GREET, greet);
//!     }
//! }
//!
//! let mut table = DispatchTable::new();
//! table.register_actor::<Greeter>();
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;

use crate::context::InvocationContext;
use crate::error::InvocationError;
use crate::invocation::InvocationResult;
use crate::types::{ActorType, MethodId, RemoteReference};

/// A live target instance owned by a local entry.
pub type Target = Box<dyn Any + Send>;

/// Future returned by a method handler.
pub type MethodFuture<'a> = Pin<Box<dyn Future<Output = InvocationResult> + Send + 'a>>;

/// A method handler on target type `T`.
pub type Method<T> =
    for<'a> fn(&'a mut T, &'a InvocationContext, Vec<Value>) -> MethodFuture<'a>;

type ActivationFuture<'a> = Pin<Box<dyn Future<Output = Result<Target, InvocationError>> + Send + 'a>>;
type DeactivationFuture<'a> = Pin<Box<dyn Future<Output = Result<(), InvocationError>> + Send + 'a>>;

/// Handler set collected for one type at registration time.
pub struct Methods<T> {
    entries: Vec<(MethodId, Method<T>)>,
}

impl<T> Methods<T> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register `method` under `id`. A later registration for the same id wins.
    pub fn add(&mut self, id: MethodId, method: Method<T>) -> &mut Self {
        self.entries.push((id, method));
        self
    }
}

/// A virtual actor type.
///
/// `activate` constructs the instance the first time a reference is
/// executed on this node; `deactivate` runs before the instance is dropped.
#[async_trait]
pub trait Actor: Sized + Send + 'static {
    /// The actor type ID this implementation serves.
    fn actor_type() -> ActorType;

    /// Construct and initialize the instance for `reference`.
    async fn activate(reference: &RemoteReference) -> Result<Self, InvocationError>;

    /// Called once before the instance is discarded.
    async fn deactivate(&mut self) -> Result<(), InvocationError> {
        Ok(())
    }

    /// Register this type's method handlers.
    fn methods(methods: &mut Methods<Self>);
}

/// Type-erased method handler.
trait ErasedMethod: Send + Sync {
    fn call<'a>(
        &self,
        target: &'a mut (dyn Any + Send),
        ctx: &'a InvocationContext,
        params: Vec<Value>,
    ) -> MethodFuture<'a>;
}

struct TypedMethod<T> {
    method: Method<T>,
}

impl<T: Any + Send> ErasedMethod for TypedMethod<T> {
    fn call<'a>(
        &self,
        target: &'a mut (dyn Any + Send),
        ctx: &'a InvocationContext,
        params: Vec<Value>,
    ) -> MethodFuture<'a> {
        match target.downcast_mut::<T>() {
            Some(target) => (self.method)(target, ctx, params),
            None => Box::pin(async {
                Err(InvocationError::Application(format!(
                    "target is not a {}",
                    std::any::type_name::<T>()
                )))
            }),
        }
    }
}

/// Type-erased activation hooks for one actor type.
trait ErasedFactory: Send + Sync {
    fn activate<'a>(&self, reference: &'a RemoteReference) -> ActivationFuture<'a>;

    fn deactivate<'a>(&self, target: &'a mut (dyn Any + Send)) -> DeactivationFuture<'a>;
}

struct TypedFactory<A> {
    _marker: PhantomData<fn() -> A>,
}

impl<A: Actor> ErasedFactory for TypedFactory<A> {
    fn activate<'a>(&self, reference: &'a RemoteReference) -> ActivationFuture<'a> {
        Box::pin(async move {
            let actor = A::activate(reference).await?;
            Ok(Box::new(actor) as Target)
        })
    }

    fn deactivate<'a>(&self, target: &'a mut (dyn Any + Send)) -> DeactivationFuture<'a> {
        Box::pin(async move {
            match target.downcast_mut::<A>() {
                Some(actor) => actor.deactivate().await,
                None => Ok(()),
            }
        })
    }
}

/// Registry of factories and method handlers, shared by the execution layer.
#[derive(Default)]
pub struct DispatchTable {
    factories: HashMap<ActorType, Arc<dyn ErasedFactory>>,
    methods: HashMap<(TypeId, MethodId), Arc<dyn ErasedMethod>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor type: its factory and all its methods.
    pub fn register_actor<A: Actor>(&mut self) -> &mut Self {
        self.factories.insert(
            A::actor_type(),
            Arc::new(TypedFactory::<A> {
                _marker: PhantomData,
            }),
        );
        let mut methods = Methods::<A>::new();
        A::methods(&mut methods);
        self.insert_methods(methods);
        self
    }

    /// Register one handler for a non-actor addressable type `T`.
    pub fn register_method<T: Any + Send>(&mut self, id: MethodId, method: Method<T>) -> &mut Self {
        let mut methods = Methods::<T>::new();
        methods.add(id, method);
        self.insert_methods(methods);
        self
    }

    fn insert_methods<T: Any + Send>(&mut self, methods: Methods<T>) {
        for (id, method) in methods.entries {
            self.methods
                .insert((TypeId::of::<T>(), id), Arc::new(TypedMethod { method }));
        }
    }

    /// Construct the instance for `reference` through its type's factory.
    pub async fn activate(&self, reference: &RemoteReference) -> Result<Target, InvocationError> {
        let factory = self
            .factories
            .get(&reference.actor_type())
            .ok_or(InvocationError::UnknownActorType(reference.actor_type()))?;
        catch_panic(factory.activate(reference))
            .await
            .map_err(|err| match err {
                failed @ InvocationError::ActivationFailed(_) => failed,
                other => InvocationError::ActivationFailed(other.to_string()),
            })
    }

    /// Run the deactivate hook of `target`, if its type has one.
    pub async fn deactivate(
        &self,
        reference: &RemoteReference,
        target: &mut (dyn Any + Send),
    ) -> Result<(), InvocationError> {
        match self.factories.get(&reference.actor_type()) {
            Some(factory) => catch_panic(factory.deactivate(target)).await,
            None => Ok(()),
        }
    }

    /// Resolve and invoke `method` on `target`.
    ///
    /// Unknown methods and handler panics are reported as errors.
    pub async fn invoke(
        &self,
        target: &mut (dyn Any + Send),
        ctx: &InvocationContext,
        method: MethodId,
        params: Vec<Value>,
    ) -> InvocationResult {
        let key = ((*target).type_id(), method);
        let Some(handler) = self.methods.get(&key).cloned() else {
            return Err(InvocationError::UnknownMethod {
                actor_type: ctx.reference().actor_type(),
                method,
            });
        };
        catch_panic(handler.call(target, ctx, params)).await
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("actor_types", &self.factories.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Turns a panic while polling a handler into [`InvocationError::Panicked`].
async fn catch_panic<T>(
    future: impl Future<Output = Result<T, InvocationError>>,
) -> Result<T, InvocationError> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(InvocationError::Panicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
