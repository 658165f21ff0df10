use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

use orbit_common::protocol::{canonical_signature, RemoteException, RpcArgs};

/// A provider-side service implementation.
///
/// `parameter_types` is the canonical signature string the consumer sent;
/// implementations use it to pick between overloads. Returning a business
/// [`RemoteException`] ships it to the caller as is.
#[async_trait]
pub trait Service: Send + Sync {
    async fn invoke(
        &self,
        method: &str,
        parameter_types: &str,
        args: RpcArgs,
    ) -> Result<Value, RemoteException>;
}

type Handler = Box<dyn Fn(RpcArgs) -> BoxFuture<'static, Result<Value, RemoteException>> + Send + Sync>;

/// A [`Service`] built from closures, one per method signature.
///
/// ```
/// use orbit_provider::service::{arg, MethodTable};
/// use serde_json::json;
///
/// let table = MethodTable::new()
///     .sync_method("add", &["i64", "i64"], |args| {
///         let a: i64 = arg(&args, 0)?;
///         let b: i64 = arg(&args, 1)?;
///         Ok(json!(a + b))
///     });
/// assert!(table.has_method("add", "i64,i64"));
/// ```
#[derive(Default)]
pub struct MethodTable {
    methods: HashMap<(String, String), Handler>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method<S, F, Fut>(mut self, name: &str, parameter_types: &[S], handler: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(RpcArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RemoteException>> + Send + 'static,
    {
        let key = (name.to_string(), canonical_signature(parameter_types));
        self.methods
            .insert(key, Box::new(move |args| handler(args).boxed()));
        self
    }

    pub fn sync_method<S, F>(self, name: &str, parameter_types: &[S], handler: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(RpcArgs) -> Result<Value, RemoteException> + Send + Sync + 'static,
    {
        self.method(name, parameter_types, move |args| {
            std::future::ready(handler(args))
        })
    }

    pub fn has_method(&self, name: &str, parameter_types: &str) -> bool {
        self.methods
            .contains_key(&(name.to_string(), parameter_types.to_string()))
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[async_trait]
impl Service for MethodTable {
    async fn invoke(
        &self,
        method: &str,
        parameter_types: &str,
        args: RpcArgs,
    ) -> Result<Value, RemoteException> {
        let key = (method.to_string(), parameter_types.to_string());
        match self.methods.get(&key) {
            Some(handler) => handler(args).await,
            None => Err(RemoteException::framework(format!(
                "no method {}({})",
                method, parameter_types
            ))),
        }
    }
}

/// Deserializes argument `index`, failing with an `IllegalArgument` business
/// exception when it is missing or has the wrong shape.
pub fn arg<T: DeserializeOwned>(args: &RpcArgs, index: usize) -> Result<T, RemoteException> {
    let value = args.get(index).ok_or_else(|| {
        RemoteException::business("IllegalArgument", format!("missing argument {}", index))
    })?;
    serde_json::from_value(value.clone()).map_err(|e| {
        RemoteException::business("IllegalArgument", format!("argument {}: {}", index, e))
    })
}
