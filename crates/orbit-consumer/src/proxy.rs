//! Invocation entry points for callers of a remote interface.
//!
//! A [`ServiceProxy`] turns a method name, its declared parameter types and
//! argument values into a [`Request`], sends it through the interface's
//! [`ServiceInvoker`] and maps the outcome back: business exceptions surface
//! unchanged, every other failure is wrapped in [`OrbitError::Invocation`]
//! naming the reference Url.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use orbit_common::protocol::error::{OrbitError, Result};
use orbit_common::protocol::{Request, Response, RpcArgs};
use orbit_common::{RpcFuture, Url};

use crate::invoker::ServiceInvoker;

/// Static description of one interface method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: String,
    pub parameter_types: Vec<String>,
    /// The method hands back a pending result instead of a value.
    pub returns_future: bool,
}

impl MethodDescriptor {
    pub fn new<S: AsRef<str>>(name: impl Into<String>, parameter_types: &[S]) -> Self {
        Self {
            name: name.into(),
            parameter_types: parameter_types.iter().map(|t| t.as_ref().to_string()).collect(),
            returns_future: false,
        }
    }

    pub fn returning_future(mut self) -> Self {
        self.returns_future = true;
        self
    }
}

/// What an intercepted call produces.
#[derive(Debug)]
pub enum Invocation {
    Value(Value),
    Pending(PendingCall),
}

impl Invocation {
    /// The value, waiting for it if the call is still pending.
    pub async fn value(self) -> Result<Value> {
        match self {
            Invocation::Value(value) => Ok(value),
            Invocation::Pending(pending) => pending.wait().await,
        }
    }
}

/// A call whose response has not necessarily arrived yet.
#[derive(Debug)]
pub struct PendingCall {
    future: RpcFuture,
    target: String,
}

impl PendingCall {
    pub fn id(&self) -> u64 {
        self.future.id()
    }

    pub fn is_done(&self) -> bool {
        self.future.is_done()
    }

    /// Local cancellation only; the provider still runs the call.
    pub fn cancel(&self) -> bool {
        self.future.cancel()
    }

    /// Registers a completion callback. It runs on the task that completes
    /// the call, or right away if the call is already done, and must not
    /// block.
    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(&Result<Response>) + Send + 'static,
    {
        self.future.add_listener(listener);
    }

    pub async fn wait(self) -> Result<Value> {
        let outcome = self.future.wait().await;
        finish(outcome, &self.target)
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Result<Value> {
        let outcome = self.future.wait_timeout(timeout).await;
        finish(outcome, &self.target)
    }

    pub async fn wait_as<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.wait().await?;
        Ok(serde_json::from_value(value)?)
    }
}

fn finish(outcome: Result<Response>, target: &str) -> Result<Value> {
    outcome
        .and_then(Response::into_result)
        .map_err(|e| wrap(e, target))
}

/// Business exceptions pass through; anything else names the target.
fn wrap(error: OrbitError, target: &str) -> OrbitError {
    match error {
        OrbitError::Business(_) | OrbitError::Invocation { .. } => error,
        other => OrbitError::Invocation {
            url: target.to_string(),
            source: Box::new(other),
        },
    }
}

/// Generic string-keyed client for one remote interface.
#[derive(Clone)]
pub struct ServiceProxy {
    invoker: Arc<ServiceInvoker>,
}

impl ServiceProxy {
    pub fn new(invoker: Arc<ServiceInvoker>) -> Self {
        Self { invoker }
    }

    pub fn invoker(&self) -> &Arc<ServiceInvoker> {
        &self.invoker
    }

    pub fn url(&self) -> &Url {
        self.invoker.consumer_url()
    }

    fn target(&self) -> String {
        self.url().to_string()
    }

    /// Builds the request: fresh id, canonical signature, and the reference's
    /// group, version, timeout and retries as attachments.
    fn request<S: AsRef<str>>(&self, method: &str, arg_types: &[S], args: RpcArgs) -> Request {
        let url = self.url();
        let mut request = Request::new(self.invoker.interface(), method)
            .with_parameter_types(arg_types)
            .with_args(args)
            .with_group(url.group())
            .with_version(url.version());
        if let Some(timeout) = url.parameter_as::<u64>(orbit_common::url::keys::TIMEOUT) {
            request = request.with_timeout(timeout);
        }
        if let Some(retries) = url.parameter_as::<u32>(orbit_common::url::keys::RETRIES) {
            request = request.with_retries(retries);
        }
        request
    }

    /// Synchronous call: waits for the provider and returns the result value.
    pub async fn invoke<S: AsRef<str>>(
        &self,
        method: &str,
        arg_types: &[S],
        args: RpcArgs,
    ) -> Result<Value> {
        let target = self.target();
        let request = self.request(method, arg_types, args);
        tracing::debug!(id = request.id, method, "Invoking");

        let reply = self
            .invoker
            .invoke(request)
            .await
            .map_err(|e| wrap(e, &target))?;
        finish(reply.into_response().await, &target)
    }

    /// Asynchronous call: returns as soon as the request is written.
    pub async fn invoke_async<S: AsRef<str>>(
        &self,
        method: &str,
        arg_types: &[S],
        args: RpcArgs,
    ) -> Result<PendingCall> {
        let target = self.target();
        let request = self.request(method, arg_types, args).asynchronous();
        let id = request.id;
        tracing::debug!(id, method, "Invoking asynchronously");

        let reply = self
            .invoker
            .invoke(request)
            .await
            .map_err(|e| wrap(e, &target))?;
        let future = match reply {
            orbit_cluster::Reply::Pending(future) => future,
            orbit_cluster::Reply::Ready(response) => RpcFuture::ready(id, Ok(response)),
        };
        Ok(PendingCall { future, target })
    }

    /// Dispatches on the descriptor: a future-returning method yields
    /// [`Invocation::Pending`], any other method [`Invocation::Value`].
    pub async fn invoke_method(&self, method: &MethodDescriptor, args: RpcArgs) -> Result<Invocation> {
        if method.returns_future {
            self.invoke_async(&method.name, &method.parameter_types, args)
                .await
                .map(Invocation::Pending)
        } else {
            self.invoke(&method.name, &method.parameter_types, args)
                .await
                .map(Invocation::Value)
        }
    }

    /// Synchronous call with the result deserialized into `T`.
    pub async fn call<T: DeserializeOwned, S: AsRef<str>>(
        &self,
        method: &str,
        arg_types: &[S],
        args: RpcArgs,
    ) -> Result<T> {
        let value = self.invoke(method, arg_types, args).await?;
        serde_json::from_value(value).map_err(|e| wrap(e.into(), &self.target()))
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("interface", &self.invoker.interface())
            .field("active", &self.invoker.is_active())
            .finish()
    }
}
