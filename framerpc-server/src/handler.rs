//! Turning ordinary Rust functions into method entries
//!
//! Any `Fn` whose arguments implement [`Arg`](crate::params::Arg) and whose
//! return value implements [`Reply`] is a handler. Registration monomorphizes
//! one entry per handler: the argument tuple type is fixed at compile time,
//! so a call does no type inspection beyond deserializing each argument.
//!
//! - [`from_sync_fn`] / [`from_async_fn`]: positional params only
//! - [`MethodSpec`]: named params or whole-params binding
//!
//! # Examples
//!
//! ```rust
//! use framerpc_core::Result;
//! use framerpc_server::{from_async_fn, from_sync_fn, MethodSpec, RequestId};
//!
//! fn add(a: i64, b: i64) -> Result<i64> {
//!     Ok(a + b)
//! }
//!
//! async fn whoami(id: RequestId) -> Result<String> {
//!     Ok(format!("{:?}", id.0))
//! }
//!
//! let add = from_sync_fn(add);
//! let whoami = from_async_fn(whoami);
//! let named = MethodSpec::new().named(["a", "b"]).sync(|a: i64, b: i64| -> Result<i64> {
//!     Ok(a - b)
//! });
//! assert!(named.is_ok());
//! ```

use crate::entry::{panicked, CallScope, Invocation, MethodEntry, Reply};
use crate::params::{bind, ArgList, ParamSignature};
use framerpc_core::Result;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A synchronous handler taking the argument tuple `Args`
pub trait SyncHandler<Args>: Send + Sync + 'static {
    type Output: Reply;

    fn call(&self, args: Args) -> Self::Output;
}

/// An asynchronous handler taking the argument tuple `Args`
pub trait AsyncHandler<Args>: Send + Sync + 'static {
    type Output: Reply;
    type Future: Future<Output = Self::Output> + Send + 'static;

    fn call(&self, args: Args) -> Self::Future;
}

macro_rules! impl_handlers {
    ($($A:ident),*) => {
        impl<F, R, $($A),*> SyncHandler<($($A,)*)> for F
        where
            F: Fn($($A),*) -> R + Send + Sync + 'static,
            R: Reply,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn call(&self, ($($A,)*): ($($A,)*)) -> R {
                (self)($($A),*)
            }
        }

        impl<F, Fut, $($A),*> AsyncHandler<($($A,)*)> for F
        where
            F: Fn($($A),*) -> Fut + Send + Sync + 'static,
            Fut: Future + Send + 'static,
            Fut::Output: Reply,
        {
            type Output = Fut::Output;
            type Future = Fut;

            #[allow(non_snake_case)]
            fn call(&self, ($($A,)*): ($($A,)*)) -> Fut {
                (self)($($A),*)
            }
        }
    };
}

impl_handlers!();
impl_handlers!(A1);
impl_handlers!(A1, A2);
impl_handlers!(A1, A2, A3);
impl_handlers!(A1, A2, A3, A4);
impl_handlers!(A1, A2, A3, A4, A5);
impl_handlers!(A1, A2, A3, A4, A5, A6);
impl_handlers!(A1, A2, A3, A4, A5, A6, A7);
impl_handlers!(A1, A2, A3, A4, A5, A6, A7, A8);

struct SyncEntry<H, A> {
    handler: H,
    signature: ParamSignature,
    _args: PhantomData<fn() -> A>,
}

impl<H, A> MethodEntry for SyncEntry<H, A>
where
    H: SyncHandler<A>,
    A: ArgList,
{
    fn invoke(&self, params: Option<&[u8]>, scope: CallScope) -> Invocation {
        let id = scope.id.as_ref();
        let args = match bind::<A>(&self.signature, params, &scope) {
            Ok(args) => args,
            Err(err) => return Invocation::Ready(crate::entry::failure(id, &err)),
        };
        let outcome = match catch_unwind(AssertUnwindSafe(|| self.handler.call(args))) {
            Ok(reply) => reply.into_outcome(id),
            Err(panic) => panicked(id, panic),
        };
        Invocation::Ready(outcome)
    }

    fn signature(&self) -> &ParamSignature {
        &self.signature
    }
}

struct AsyncEntry<H, A> {
    handler: H,
    signature: ParamSignature,
    _args: PhantomData<fn() -> A>,
}

impl<H, A> MethodEntry for AsyncEntry<H, A>
where
    H: AsyncHandler<A>,
    A: ArgList,
{
    fn invoke(&self, params: Option<&[u8]>, scope: CallScope) -> Invocation {
        let args = match bind::<A>(&self.signature, params, &scope) {
            Ok(args) => args,
            Err(err) => return Invocation::Ready(crate::entry::failure(scope.id.as_ref(), &err)),
        };
        let future = match catch_unwind(AssertUnwindSafe(|| self.handler.call(args))) {
            Ok(future) => future,
            Err(panic) => return Invocation::Ready(panicked(scope.id.as_ref(), panic)),
        };
        let id = scope.id;
        Invocation::Pending(Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(reply) => reply.into_outcome(id.as_ref()),
                Err(panic) => panicked(id.as_ref(), panic),
            }
        }))
    }

    fn signature(&self) -> &ParamSignature {
        &self.signature
    }
}

/// Registration options for one method
///
/// # Examples
///
/// ```rust
/// use framerpc_core::Result;
/// use framerpc_server::{Cancellation, MethodSpec};
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Range { start: u32, end: u32 }
///
/// async fn sum(range: Range, cancel: Cancellation) -> Result<u64> {
///     let mut total = 0;
///     for n in range.start..range.end {
///         if cancel.is_cancelled() {
///             break;
///         }
///         total += n as u64;
///     }
///     Ok(total)
/// }
///
/// let entry = MethodSpec::new().whole_params().future(sum).unwrap();
/// assert!(entry.signature().binds_whole());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MethodSpec {
    names: Option<Vec<String>>,
    whole: bool,
}

impl MethodSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept named params, one name per deserialized argument in order
    pub fn named<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Bind the entire `params` value to the single deserialized argument
    pub fn whole_params(mut self) -> Self {
        self.whole = true;
        self
    }

    fn signature<A: ArgList>(&self) -> Result<ParamSignature> {
        let mut signature = ParamSignature::new(A::modifiers());
        if let Some(names) = &self.names {
            signature = signature.with_names(names)?;
        }
        if self.whole {
            signature = signature.whole_params()?;
        }
        Ok(signature)
    }

    /// Build an entry for a synchronous handler
    pub fn sync<H, A>(self, handler: H) -> Result<Arc<dyn MethodEntry>>
    where
        H: SyncHandler<A>,
        A: ArgList,
    {
        Ok(Arc::new(SyncEntry {
            handler,
            signature: self.signature::<A>()?,
            _args: PhantomData,
        }))
    }

    /// Build an entry for an asynchronous handler
    pub fn future<H, A>(self, handler: H) -> Result<Arc<dyn MethodEntry>>
    where
        H: AsyncHandler<A>,
        A: ArgList,
    {
        Ok(Arc::new(AsyncEntry {
            handler,
            signature: self.signature::<A>()?,
            _args: PhantomData,
        }))
    }
}

/// Entry for a synchronous handler with positional params
pub fn from_sync_fn<H, A>(handler: H) -> Arc<dyn MethodEntry>
where
    H: SyncHandler<A>,
    A: ArgList,
{
    Arc::new(SyncEntry {
        handler,
        signature: ParamSignature::new(A::modifiers()),
        _args: PhantomData,
    })
}

/// Entry for an asynchronous handler with positional params
pub fn from_async_fn<H, A>(handler: H) -> Arc<dyn MethodEntry>
where
    H: AsyncHandler<A>,
    A: ArgList,
{
    Arc::new(AsyncEntry {
        handler,
        signature: ParamSignature::new(A::modifiers()),
        _args: PhantomData,
    })
}
