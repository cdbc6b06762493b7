//! Per-extension sandbox threads.
//!
//! Each extension runs on its own OS thread that exclusively owns the
//! language engine. Host calls are messages on a channel and replies come
//! back on a oneshot, so calls into one extension are serialised while
//! different extensions run in parallel. The thread exits, dropping the
//! engine, once the last [`Sandbox`] handle is gone and the queue drains.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::backend::{Backend, EngineContext};
use crate::contract::ExportTable;
use crate::error::{InvocationError, LoadError};
use crate::manifest::Language;

/// Extra time the host waits past a call's deadline before giving up on
/// the sandbox thread.
pub const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Deadlines further out than this are capped.
const MAX_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Stack size for sandbox threads. Must exceed the engine stack limit.
const THREAD_STACK_SIZE: usize = 8 * 1024 * 1024;

// ─── Configuration ──────────────────────────────────────────────────────

/// Resource limits applied to every sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Engine heap limit in bytes (default: 64 MB).
    pub memory_limit: usize,
    /// Rhai operations per call; 0 disables the limit (default: 5_000_000).
    pub max_operations: u64,
    /// Default deadline for one call (default: 10 s).
    pub call_timeout: Duration,
    /// Engine stack limit in bytes (default: 1 MB).
    pub max_stack: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            max_operations: 5_000_000,
            call_timeout: Duration::from_millis(10_000),
            max_stack: 1024 * 1024,
        }
    }
}

impl SandboxConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            memory_limit: env_scaled("EXTENSION_MEMORY_LIMIT_MB", 64, 1024 * 1024),
            max_operations: std::env::var("EXTENSION_MAX_OPERATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000_000),
            call_timeout: Duration::from_millis(
                std::env::var("EXTENSION_CALL_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10_000),
            ),
            max_stack: env_scaled("EXTENSION_MAX_STACK_KB", 1024, 1024),
        }
    }
}

/// Read a size in `unit`s from the environment, saturating at `usize::MAX`.
fn env_scaled(var: &str, default: usize, unit: usize) -> usize {
    let value = std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default);
    value.checked_mul(unit).unwrap_or_else(|| {
        tracing::warn!(var, value, "limit too large, clamping");
        usize::MAX
    })
}

/// Deadline for a call starting now, capped at [`MAX_DEADLINE`].
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout.min(MAX_DEADLINE)).unwrap_or(now)
}

// ─── Liveness ───────────────────────────────────────────────────────────

/// Counts live sandbox threads.
#[derive(Debug, Clone, Default)]
pub struct SandboxTracker {
    live: Arc<AtomicUsize>,
}

impl SandboxTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn enter(&self) -> LiveGuard {
        self.live.fetch_add(1, Ordering::AcqRel);
        LiveGuard(self.live.clone())
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// ─── Sandbox ────────────────────────────────────────────────────────────

struct Call {
    function: String,
    args: Vec<Value>,
    deadline: Instant,
    reply: oneshot::Sender<Result<Value, InvocationError>>,
}

/// Handle to one extension's sandbox thread.
pub struct Sandbox {
    id: Arc<str>,
    language: Language,
    exports: ExportTable,
    calls: mpsc::UnboundedSender<Call>,
    poisoned: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sandbox")
            .field("id", &self.id)
            .field("language", &self.language)
            .field("exports", &self.exports)
            .field("poisoned", &self.is_poisoned())
            .finish_non_exhaustive()
    }
}

impl Sandbox {
    /// Start a sandbox thread, evaluate `source` in it and wait for the
    /// export table.
    pub async fn spawn(
        id: &str,
        backend: Arc<dyn Backend>,
        source: String,
        config: SandboxConfig,
        tracker: &SandboxTracker,
    ) -> Result<Arc<Self>, LoadError> {
        let id: Arc<str> = Arc::from(id);
        let language = backend.language();
        let call_timeout = config.call_timeout;
        let ctx = EngineContext {
            extension_id: id.clone(),
            config,
        };
        let poisoned = Arc::new(AtomicBool::new(false));
        let (calls, mut queue) = mpsc::unbounded_channel::<Call>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<ExportTable, LoadError>>();

        let thread_poisoned = poisoned.clone();
        let tracker = tracker.clone();
        std::thread::Builder::new()
            .name(format!("ext-{id}"))
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || {
                let _live = tracker.enter();
                let extension = ctx.extension_id.clone();

                let created = catch_unwind(AssertUnwindSafe(|| backend.create(&source, &ctx)));
                let mut engine = match created {
                    Ok(Ok(engine)) => engine,
                    Ok(Err(e)) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                    Err(_) => {
                        let _ = ready_tx.send(Err(LoadError::CompileError(
                            "engine panicked during evaluation".into(),
                        )));
                        return;
                    }
                };
                if ready_tx.send(Ok(engine.exports().clone())).is_err() {
                    return;
                }
                tracing::debug!(extension = %extension, "sandbox thread started");

                while let Some(call) = queue.blocking_recv() {
                    if thread_poisoned.load(Ordering::Acquire) {
                        let _ = call
                            .reply
                            .send(Err(InvocationError::Poisoned(extension.to_string())));
                        continue;
                    }
                    let outcome = catch_unwind(AssertUnwindSafe(|| {
                        engine.call(&call.function, &call.args, call.deadline)
                    }));
                    let result = outcome.unwrap_or_else(|_| {
                        tracing::error!(
                            extension = %extension,
                            function = %call.function,
                            "extension call panicked, poisoning sandbox"
                        );
                        thread_poisoned.store(true, Ordering::Release);
                        Err(InvocationError::Panicked(call.function.clone()))
                    });
                    let _ = call.reply.send(result);
                }

                tracing::debug!(extension = %extension, "sandbox thread stopped");
            })?;

        let exports = ready_rx.await.map_err(|_| {
            LoadError::CompileError("sandbox thread exited during evaluation".into())
        })??;

        Ok(Arc::new(Self {
            id,
            language,
            exports,
            calls,
            poisoned,
            call_timeout,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn exports(&self) -> &ExportTable {
        &self.exports
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Call an exported function with the default deadline.
    pub async fn invoke(&self, function: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
        self.invoke_with_timeout(function, args, self.call_timeout)
            .await
    }

    /// Call an exported function. The engine aborts the call at the
    /// deadline; if the thread has not answered `DEADLINE_GRACE` later the
    /// sandbox is poisoned and refuses every later call.
    pub async fn invoke_with_timeout(
        &self,
        function: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, InvocationError> {
        if self.is_poisoned() {
            return Err(InvocationError::Poisoned(self.id.to_string()));
        }
        if !self.exports.contains_key(function) {
            return Err(InvocationError::UnknownFunction(function.to_owned()));
        }

        let (reply, response) = oneshot::channel();
        self.calls
            .send(Call {
                function: function.to_owned(),
                args,
                deadline: deadline_after(timeout),
                reply,
            })
            .map_err(|_| InvocationError::Closed(self.id.to_string()))?;

        match tokio::time::timeout(timeout.min(MAX_DEADLINE) + DEADLINE_GRACE, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(InvocationError::Closed(self.id.to_string())),
            Err(_) => {
                tracing::warn!(
                    extension = %self.id,
                    function = %function,
                    "sandbox missed its deadline, poisoning"
                );
                self.poisoned.store(true, Ordering::Release);
                Err(InvocationError::Timeout(function.to_owned()))
            }
        }
    }

    /// Call an exported function and deserialize its result.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        function: &str,
        args: Vec<Value>,
    ) -> Result<T, InvocationError> {
        let value = self.invoke(function, args).await?;
        serde_json::from_value(value).map_err(|e| InvocationError::ReturnType {
            function: function.to_owned(),
            message: e.to_string(),
        })
    }
}

/// Serialize one host argument.
pub fn arg<T: Serialize>(value: &T) -> Result<Value, InvocationError> {
    serde_json::to_value(value).map_err(|e| InvocationError::Marshal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::rhai::RhaiBackend;
    use serde_json::json;

    async fn spawn(source: &str, tracker: &SandboxTracker) -> Result<Arc<Sandbox>, LoadError> {
        Sandbox::spawn(
            "test",
            Arc::new(RhaiBackend),
            source.to_owned(),
            SandboxConfig::default(),
            tracker,
        )
        .await
    }

    async fn wait_for_live(tracker: &SandboxTracker, expected: usize) {
        for _ in 0..200 {
            if tracker.live() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(tracker.live(), expected);
    }

    #[test]
    fn test_sandbox_config_defaults() {
        let config = SandboxConfig::default();
        assert_eq!(config.memory_limit, 64 * 1024 * 1024);
        assert_eq!(config.max_operations, 5_000_000);
        assert_eq!(config.call_timeout, Duration::from_secs(10));
        assert_eq!(config.max_stack, 1024 * 1024);
    }

    #[tokio::test]
    async fn test_invoke_round_trip() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn("fn double(x) { x * 2 }", &tracker).await.unwrap();
        assert_eq!(sandbox.invoke("double", vec![json!(21)]).await.unwrap(), json!(42));
        let n: i64 = sandbox.invoke_as("double", vec![json!(4)]).await.unwrap();
        assert_eq!(n, 8);
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn("fn a() { 1 }", &tracker).await.unwrap();
        let err = sandbox.invoke("b", vec![]).await.unwrap_err();
        assert_eq!(err, InvocationError::UnknownFunction("b".into()));
    }

    #[tokio::test]
    async fn test_return_type_mismatch() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn(r#"fn name() { "x" }"#, &tracker).await.unwrap();
        let err = sandbox.invoke_as::<i64>("name", vec![]).await.unwrap_err();
        assert!(matches!(err, InvocationError::ReturnType { .. }));
    }

    #[tokio::test]
    async fn test_compile_error_stops_thread() {
        let tracker = SandboxTracker::new();
        let err = spawn("fn (", &tracker).await.unwrap_err();
        assert!(matches!(err, LoadError::CompileError(_)));
        wait_for_live(&tracker, 0).await;
    }

    #[tokio::test]
    async fn test_thread_exits_when_handle_dropped() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn("fn a() { 1 }", &tracker).await.unwrap();
        assert_eq!(tracker.live(), 1);
        drop(sandbox);
        wait_for_live(&tracker, 0).await;
    }

    #[tokio::test]
    async fn test_in_flight_call_survives_drop_of_other_handle() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn("fn a() { 1 }", &tracker).await.unwrap();
        let held = sandbox.clone();
        drop(sandbox);
        assert_eq!(held.invoke("a", vec![]).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn test_timeout_keeps_sandbox_usable() {
        let tracker = SandboxTracker::new();
        let config = SandboxConfig {
            max_operations: 0,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::spawn(
            "test",
            Arc::new(RhaiBackend),
            "fn spin() { let x = 0; loop { x += 1; } } fn ok() { true }".into(),
            config,
            &tracker,
        )
        .await
        .unwrap();

        let err = sandbox
            .invoke_with_timeout("spin", vec![], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, InvocationError::Timeout("spin".into()));
        assert!(!sandbox.is_poisoned());
        assert_eq!(sandbox.invoke("ok", vec![]).await.unwrap(), json!(true));
    }

    /// Engine whose `panic` export panics and whose `stall` export ignores
    /// its deadline.
    struct Misbehaving;

    struct MisbehavingEngine {
        exports: ExportTable,
    }

    impl Backend for Misbehaving {
        fn language(&self) -> Language {
            Language::Rhai
        }

        fn create(
            &self,
            _source: &str,
            _ctx: &EngineContext,
        ) -> Result<Box<dyn crate::backend::Engine>, LoadError> {
            let exports = ["ok", "panic", "stall"]
                .into_iter()
                .map(|name| (name.to_owned(), crate::contract::Arity::Exact(0)))
                .collect();
            Ok(Box::new(MisbehavingEngine { exports }))
        }
    }

    impl crate::backend::Engine for MisbehavingEngine {
        fn exports(&self) -> &ExportTable {
            &self.exports
        }

        fn call(
            &mut self,
            function: &str,
            _args: &[Value],
            deadline: Instant,
        ) -> Result<Value, InvocationError> {
            match function {
                "panic" => panic!("binding blew up"),
                "stall" => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    std::thread::sleep(left + DEADLINE_GRACE * 2);
                    Ok(Value::Null)
                }
                _ => Ok(Value::Bool(true)),
            }
        }
    }

    async fn spawn_misbehaving(tracker: &SandboxTracker) -> Arc<Sandbox> {
        Sandbox::spawn(
            "bad",
            Arc::new(Misbehaving),
            String::new(),
            SandboxConfig::default(),
            tracker,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_panic_poisons_sandbox() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn_misbehaving(&tracker).await;
        assert_eq!(sandbox.invoke("ok", vec![]).await.unwrap(), json!(true));

        let err = sandbox.invoke("panic", vec![]).await.unwrap_err();
        assert_eq!(err, InvocationError::Panicked("panic".into()));
        assert!(sandbox.is_poisoned());
        assert_eq!(
            sandbox.invoke("ok", vec![]).await.unwrap_err(),
            InvocationError::Poisoned("bad".into())
        );
    }

    #[tokio::test]
    async fn test_missed_deadline_poisons_sandbox() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn_misbehaving(&tracker).await;

        let err = sandbox
            .invoke_with_timeout("stall", vec![], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, InvocationError::Timeout("stall".into()));
        assert!(sandbox.is_poisoned());
        assert_eq!(
            sandbox.invoke("ok", vec![]).await.unwrap_err(),
            InvocationError::Poisoned("bad".into())
        );
    }

    #[tokio::test]
    async fn test_unbounded_timeout_is_capped() {
        let tracker = SandboxTracker::new();
        let sandbox = spawn("fn a() { 1 }", &tracker).await.unwrap();
        let value = sandbox
            .invoke_with_timeout("a", vec![], Duration::MAX)
            .await
            .unwrap();
        assert_eq!(value, json!(1));
        assert!(deadline_after(Duration::MAX) <= Instant::now() + MAX_DEADLINE);
    }

    #[test]
    fn test_env_limits_saturate() {
        std::env::set_var("REEL_TEST_HUGE_LIMIT", usize::MAX.to_string());
        assert_eq!(env_scaled("REEL_TEST_HUGE_LIMIT", 1, 1024), usize::MAX);
        assert_eq!(env_scaled("REEL_TEST_UNSET_LIMIT", 64, 1024), 64 * 1024);
    }

    #[test]
    fn test_arg_serializes() {
        assert_eq!(arg(&("a", 1)).unwrap(), json!(["a", 1]));
    }
}
