//! ECMAScript backend (QuickJS).
//!
//! The context has the standard intrinsics only; no module loader is set,
//! so there is no `std`/`os` and no file or network access. Host access
//! goes through two native functions that the prelude captures and hides:
//! a JSON request channel to the [`DocumentTable`] and a log sink.
//!
//! If the source declares a `Provider` class it is instantiated once and
//! its methods are the exports; otherwise new top-level functions are.
//! Calls go through the prelude's `__invoke`, which settles the result as a
//! promise, so async functions work; pending jobs are run to completion
//! before the result is collected.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use rquickjs::{CatchResultExt, Context, Ctx, Function, Runtime};
use serde::Deserialize;
use serde_json::Value;

use super::{is_resource_error, Backend, Engine, EngineContext};
use crate::console::{self, Level};
use crate::contract::{Arity, ExportTable};
use crate::document::DocumentTable;
use crate::error::{InvocationError, LoadError};
use crate::manifest::Language;

const PRELUDE: &str = include_str!("prelude.js");

#[derive(Debug, Clone, Copy, Default)]
pub struct QuickJsBackend;

impl Backend for QuickJsBackend {
    fn language(&self) -> Language {
        Language::Javascript
    }

    fn create(&self, source: &str, ctx: &EngineContext) -> Result<Box<dyn Engine>, LoadError> {
        Ok(Box::new(QuickJsEngine::new(source, ctx)?))
    }
}

/// A settled call as reported by the prelude's `__collect`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Outcome {
    Ok(Value),
    Err(String),
    /// The result could not be serialised.
    Bad(String),
}

pub(crate) struct QuickJsEngine {
    runtime: Runtime,
    context: Context,
    documents: Rc<RefCell<DocumentTable>>,
    exports: ExportTable,
    deadline: Rc<Cell<Option<Instant>>>,
    interrupted: Rc<Cell<bool>>,
}

impl QuickJsEngine {
    pub(crate) fn new(source: &str, ctx: &EngineContext) -> Result<Self, LoadError> {
        let engine_error = |e: rquickjs::Error| LoadError::CompileError(e.to_string());

        let runtime = Runtime::new().map_err(engine_error)?;
        runtime.set_memory_limit(ctx.config.memory_limit);
        runtime.set_max_stack_size(ctx.config.max_stack);

        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));
        let interrupted = Rc::new(Cell::new(false));
        {
            let deadline = deadline.clone();
            let interrupted = interrupted.clone();
            runtime.set_interrupt_handler(Some(Box::new(move || {
                let expired = deadline.get().is_some_and(|d| Instant::now() >= d);
                if expired {
                    interrupted.set(true);
                }
                expired
            })));
        }

        let context = Context::full(&runtime).map_err(engine_error)?;
        let documents = Rc::new(RefCell::new(DocumentTable::new()));

        deadline.set(Some(crate::sandbox::deadline_after(ctx.config.call_timeout)));
        let evaluated = context.with(|js| -> Result<String, String> {
            install_bindings(&js, documents.clone(), ctx.extension_id.clone())
                .map_err(|e| e.to_string())?;
            js.eval::<(), _>(PRELUDE)
                .catch(&js)
                .map_err(|e| format!("prelude: {e}"))?;
            js.eval::<(), _>(source).catch(&js).map_err(|e| e.to_string())?;
            let collect: Function = js
                .globals()
                .get("__collectExports")
                .catch(&js)
                .map_err(|e| e.to_string())?;
            collect.call::<_, String>(()).catch(&js).map_err(|e| e.to_string())
        });
        deadline.set(None);
        documents.borrow_mut().clear();

        let exports = match evaluated {
            Ok(json) => serde_json::from_str::<BTreeMap<String, usize>>(&json)?
                .into_iter()
                .map(|(name, declared)| (name, Arity::Variadic(declared)))
                .collect(),
            Err(_) if interrupted.get() => {
                return Err(LoadError::CompileError(
                    "evaluation exceeded its deadline".into(),
                ))
            }
            Err(message) => return Err(LoadError::CompileError(message)),
        };

        Ok(Self {
            runtime,
            context,
            documents,
            exports,
            deadline,
            interrupted,
        })
    }

    fn fault(&self, function: &str, message: String) -> InvocationError {
        if self.interrupted.get() {
            InvocationError::Timeout(function.to_owned())
        } else if is_resource_error(&message) {
            InvocationError::ResourceLimit {
                function: function.to_owned(),
                message,
            }
        } else {
            InvocationError::Exception {
                function: function.to_owned(),
                message,
            }
        }
    }

    fn run(&self, function: &str, args_json: &str) -> Result<Value, InvocationError> {
        let started = self.context.with(|js| -> Result<(), String> {
            let invoke: Function = js
                .globals()
                .get("__invoke")
                .catch(&js)
                .map_err(|e| e.to_string())?;
            invoke
                .call::<_, ()>((function, args_json))
                .catch(&js)
                .map_err(|e| e.to_string())
        });
        started.map_err(|message| self.fault(function, message))?;

        while self.runtime.is_job_pending() {
            if self.runtime.execute_pending_job().is_err() {
                return Err(self.fault(function, "uncaught error in pending job".into()));
            }
        }

        let collected = self
            .context
            .with(|js| -> Result<Option<String>, String> {
                let collect: Function = js
                    .globals()
                    .get("__collect")
                    .catch(&js)
                    .map_err(|e| e.to_string())?;
                collect
                    .call::<_, Option<String>>(())
                    .catch(&js)
                    .map_err(|e| e.to_string())
            })
            .map_err(|message| self.fault(function, message))?;

        let Some(json) = collected else {
            return Err(InvocationError::Exception {
                function: function.to_owned(),
                message: "returned promise never settled".into(),
            });
        };

        let outcome: Outcome =
            serde_json::from_str(&json).map_err(|e| InvocationError::ReturnType {
                function: function.to_owned(),
                message: e.to_string(),
            })?;
        match outcome {
            Outcome::Ok(value) => Ok(value),
            Outcome::Err(message) => Err(self.fault(function, message)),
            Outcome::Bad(message) => Err(InvocationError::ReturnType {
                function: function.to_owned(),
                message,
            }),
        }
    }
}

impl Engine for QuickJsEngine {
    fn exports(&self) -> &ExportTable {
        &self.exports
    }

    fn call(
        &mut self,
        function: &str,
        args: &[Value],
        deadline: Instant,
    ) -> Result<Value, InvocationError> {
        let args_json =
            serde_json::to_string(args).map_err(|e| InvocationError::Marshal(e.to_string()))?;

        self.interrupted.set(false);
        self.deadline.set(Some(deadline));
        let result = self.run(function, &args_json);
        self.deadline.set(None);

        // documents never outlive the call that created them
        self.documents.borrow_mut().clear();
        self.runtime.run_gc();
        result
    }
}

fn install_bindings(
    js: &Ctx<'_>,
    documents: Rc<RefCell<DocumentTable>>,
    extension: Arc<str>,
) -> rquickjs::Result<()> {
    let globals = js.globals();

    let document = Function::new(js.clone(), move |request: String| {
        documents.borrow_mut().handle(&request)
    })?;
    globals.set("__reelDocument", document)?;

    let log = Function::new(js.clone(), move |level: String, message: String| {
        console::log(&extension, Level::from_method(&level), &message);
    })?;
    globals.set("__reelLog", log)?;

    Ok(())
}
