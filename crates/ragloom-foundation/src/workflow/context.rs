//! 工作流运行上下文
//! Per-run workflow context
//!
//! A cheap-to-clone handle shared by every handler of one run: a key/value
//! store behind a read-write lock, the run's cancellation token and its
//! run-scoped callback manager.

use crate::callbacks::CallbackManager;
use parking_lot::RwLock;
use ragloom_kernel::error::{KernelError, KernelResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct ContextInner {
    run_id: String,
    store: RwLock<HashMap<String, Value>>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
    callback_manager: CallbackManager,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("run_id", &self.inner.run_id)
            .field("keys", &self.inner.store.read().len())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl Context {
    pub fn new(run_id: impl Into<String>, cancel: CancellationToken, callback_manager: CallbackManager) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id: run_id.into(),
                store: RwLock::new(HashMap::new()),
                cancel,
            }),
            callback_manager,
        }
    }

    /// A detached context, mainly for calling handlers directly.
    pub fn standalone() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            CancellationToken::new(),
            CallbackManager::new(),
        )
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Token tripped when the run is cancelled or times out. Long-running
    /// handlers should select on it.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Callback manager for the current step; events recorded here join the
    /// run's trace under the step that is running.
    pub fn callback_manager(&self) -> &CallbackManager {
        &self.callback_manager
    }

    /// Same store and token, different callback scope.
    pub(crate) fn with_callback_manager(&self, callback_manager: CallbackManager) -> Self {
        Self {
            inner: self.inner.clone(),
            callback_manager,
        }
    }

    // ---- store -------------------------------------------------------------

    /// Store any serialisable value.
    pub fn set(&self, key: impl Into<String>, value: impl Serialize) -> KernelResult<()> {
        let value = serde_json::to_value(value)?;
        self.inner.store.write().insert(key.into(), value);
        Ok(())
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        self.inner.store.write().insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.store.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.store.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.store.write().remove(key)
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.store.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Read-modify-write under one write lock.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(Option<&mut Value>) -> R) -> R {
        let mut store = self.inner.store.write();
        f(store.get_mut(key))
    }

    fn require(&self, key: &str) -> KernelResult<Value> {
        self.get(key)
            .ok_or_else(|| KernelError::NotFound(format!("context key '{key}'")))
    }

    /// Deserialize the stored value into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> KernelResult<T> {
        let value = self.require(key)?;
        serde_json::from_value(value)
            .map_err(|_| KernelError::type_mismatch(key, std::any::type_name::<T>()))
    }

    /// Strings as-is; numbers and booleans rendered.
    pub fn get_string(&self, key: &str) -> KernelResult<String> {
        match self.require(key)? {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            _ => Err(KernelError::type_mismatch(key, "string")),
        }
    }

    /// Integers, integral floats and numeric strings.
    pub fn get_i64(&self, key: &str) -> KernelResult<i64> {
        let mismatch = || KernelError::type_mismatch(key, "int");
        match self.require(key)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.is_finite()).map(|f| f as i64))
                .ok_or_else(mismatch),
            Value::String(s) => s.trim().parse().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    pub fn get_f64(&self, key: &str) -> KernelResult<f64> {
        let mismatch = || KernelError::type_mismatch(key, "float");
        match self.require(key)? {
            Value::Number(n) => n.as_f64().ok_or_else(mismatch),
            Value::String(s) => s.trim().parse().map_err(|_| mismatch()),
            _ => Err(mismatch()),
        }
    }

    /// Booleans, `0`/`1`, and the strings `true`/`false`/`1`/`0`.
    pub fn get_bool(&self, key: &str) -> KernelResult<bool> {
        let mismatch = || KernelError::type_mismatch(key, "bool");
        match self.require(key)? {
            Value::Bool(b) => Ok(b),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(mismatch()),
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragloom_kernel::error::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Hits {
        count: usize,
    }

    #[test]
    fn typed_getters_coerce() {
        let ctx = Context::standalone();
        ctx.set("n", 42).unwrap();
        ctx.set("f", 2.0).unwrap();
        ctx.set("s", "7").unwrap();
        ctx.set("flag", "TRUE").unwrap();
        ctx.set("obj", Hits { count: 3 }).unwrap();

        assert_eq!(ctx.get_i64("n").unwrap(), 42);
        assert_eq!(ctx.get_i64("f").unwrap(), 2);
        assert_eq!(ctx.get_i64("s").unwrap(), 7);
        assert_eq!(ctx.get_f64("n").unwrap(), 42.0);
        assert_eq!(ctx.get_string("n").unwrap(), "42");
        assert!(ctx.get_bool("flag").unwrap());
        assert_eq!(ctx.get_as::<Hits>("obj").unwrap(), Hits { count: 3 });
    }

    #[test]
    fn coercion_failures_are_type_mismatch() {
        let ctx = Context::standalone();
        ctx.set("word", "seven").unwrap();
        ctx.set("obj", Hits { count: 3 }).unwrap();
        ctx.set("frac", 1.5).unwrap();

        assert_eq!(ctx.get_i64("word").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(ctx.get_i64("frac").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(ctx.get_bool("word").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(ctx.get_string("obj").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(ctx.get_as::<Vec<u8>>("obj").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(ctx.get_string("missing").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn clones_share_the_store() {
        let ctx = Context::standalone();
        let other = ctx.clone();
        other.set_value("k", Value::from(1));
        assert!(ctx.contains("k"));
        ctx.update("k", |v| {
            if let Some(v) = v {
                *v = Value::from(2);
            }
        });
        assert_eq!(other.get_i64("k").unwrap(), 2);
        assert_eq!(ctx.remove("k"), Some(Value::from(2)));
        assert!(ctx.keys().is_empty());
    }
}
