//! Function registry.
//!
//! Every function the platform can reach by name (scheduled jobs, direct
//! commands, event-source targets, authorizers, async tasks) is registered
//! here under a `module.function` path together with its declared
//! [`Signature`]. The signature drives arity adaptation when a function is
//! invoked with an `(event, context)` pair:
//!
//! | Declared                 | Receives            |
//! |--------------------------|---------------------|
//! | 0 params                 | nothing             |
//! | 0 params, variadic       | `(event, context)`  |
//! | 1 param                  | `(event)`           |
//! | 1 param, variadic        | `(event, context)`  |
//! | 2 params                 | `(event, context)`  |
//! | 3+ params                | signature error     |

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};

use crate::error::{BoxError, Error, Result};

/// Future returned by a registered function.
pub type FunctionFuture = BoxFuture<'static, std::result::Result<Value, BoxError>>;

type Callable = Arc<dyn Fn(Vec<Value>, Map<String, Value>) -> FunctionFuture + Send + Sync>;

/// Declared parameter list of a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Number of fixed positional parameters.
    pub params: usize,
    /// Whether the function also accepts extra positional arguments.
    pub variadic: bool,
}

impl Signature {
    /// A function with `params` fixed parameters.
    pub const fn fixed(params: usize) -> Self {
        Self {
            params,
            variadic: false,
        }
    }

    /// A function with `params` fixed parameters followed by a variadic tail.
    pub const fn variadic(params: usize) -> Self {
        Self {
            params,
            variadic: true,
        }
    }

    /// Binds `(event, context)` to this signature.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSignature`] for three or more fixed parameters.
    pub fn bind(&self, path: &str, event: Value, context: Value) -> Result<Vec<Value>> {
        match (self.params, self.variadic) {
            (0, false) => Ok(Vec::new()),
            (1, false) => Ok(vec![event]),
            (0 | 1, true) | (2, _) => Ok(vec![event, context]),
            (params, _) => Err(Error::InvalidSignature {
                path: path.to_string(),
                params,
            }),
        }
    }
}

/// Splits `module.function` on the last dot.
///
/// # Errors
///
/// [`Error::InvalidTaskPath`] when either half would be empty.
pub fn split_task_path(path: &str) -> Result<(&str, &str)> {
    match path.rsplit_once('.') {
        Some((module, function)) if !module.is_empty() && !function.is_empty() => {
            Ok((module, function))
        },
        _ => Err(Error::InvalidTaskPath(path.to_string())),
    }
}

/// A function registered under a path.
#[derive(Clone)]
pub struct RegisteredFunction {
    path: String,
    signature: Signature,
    callable: Callable,
}

impl fmt::Debug for RegisteredFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredFunction")
            .field("path", &self.path)
            .field("signature", &self.signature)
            .finish()
    }
}

impl RegisteredFunction {
    /// Path the function is registered under.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Declared signature.
    pub fn signature(&self) -> Signature {
        self.signature
    }

    /// Calls the function with explicit positional and keyword arguments.
    pub async fn call(&self, args: Vec<Value>, kwargs: Map<String, Value>) -> Result<Value> {
        (self.callable)(args, kwargs)
            .await
            .map_err(|source| Error::Function {
                path: self.path.clone(),
                source,
            })
    }

    /// Calls the function with `(event, context)` adapted to its signature.
    pub async fn call_with_event(&self, event: Value, context: Value) -> Result<Value> {
        let args = self.signature.bind(&self.path, event, context)?;
        self.call(args, Map::new()).await
    }
}

/// Path-addressed functions reachable from events and task messages.
///
/// # Examples
///
/// ```
/// use hapline::registry::{FunctionRegistry, Signature};
/// use serde_json::json;
///
/// let mut registry = FunctionRegistry::new();
/// registry
///     .register("billing.jobs.close_day", Signature::fixed(0), |_args, _kwargs| async {
///         Ok(json!("closed"))
///     })
///     .unwrap();
/// assert!(registry.contains("billing.jobs.close_day"));
/// ```
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, RegisteredFunction>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<&String> = self.functions.keys().collect();
        paths.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &paths)
            .finish()
    }
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` under `path`, replacing any previous entry.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskPath`] when `path` is not `module.function`.
    pub fn register<F, Fut>(&mut self, path: &str, signature: Signature, function: F) -> Result<()>
    where
        F: Fn(Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
    {
        split_task_path(path)?;
        let callable: Callable = Arc::new(move |args, kwargs| function(args, kwargs).boxed());
        self.functions.insert(
            path.to_string(),
            RegisteredFunction {
                path: path.to_string(),
                signature,
                callable,
            },
        );
        Ok(())
    }

    /// Looks up a function by path.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTaskPath`] for a malformed path,
    /// [`Error::FunctionNotFound`] when nothing is registered under it.
    pub fn resolve(&self, path: &str) -> Result<&RegisteredFunction> {
        split_task_path(path)?;
        self.functions
            .get(path)
            .ok_or_else(|| Error::FunctionNotFound(path.to_string()))
    }

    /// `true` when a function is registered under `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.functions.contains_key(path)
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// `true` when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Resolves `path` and invokes it with `(event, context)` per its arity.
    pub async fn run_function(&self, path: &str, event: Value, context: Value) -> Result<Value> {
        self.resolve(path)?.call_with_event(event, context).await
    }

    /// Resolves `path` and invokes it with a task's `args` and `kwargs`.
    pub async fn run_task(
        &self,
        path: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        self.resolve(path)?.call(args, kwargs).await
    }

    /// Hands `error` to the exception handler registered under `path`.
    ///
    /// The handler always receives `(error, event, context)`, with the error
    /// as `{"message": ..., "chain": [...]}`. Returns `true` when it
    /// answered with a truthy value; a handler that fails itself is logged
    /// and counts as not handled.
    pub async fn handle_exception(
        &self,
        path: &str,
        error: &Error,
        event: &Value,
        context: &Value,
    ) -> bool {
        let report = serde_json::json!({
            "message": error.to_string(),
            "chain": error.chain(),
        });
        let args = vec![report, event.clone(), context.clone()];
        match self.run_task(path, args, Map::new()).await {
            Ok(answer) => is_truthy(&answer),
            Err(e) => {
                tracing::error!(handler = path, error = %e, "exception handler failed");
                false
            },
        }
    }
}

/// Truthiness of a function result: `null`, `false`, zero and empty
/// strings, arrays and objects are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
