//! Restricted interpreter backend (Rhai).
//!
//! Scripts see the document binding and `print`/`debug`, nothing else: no
//! module resolver, `eval` disabled, operation and size limits applied.
//! Script-defined functions are the exports. A per-sandbox object map is
//! bound as `this` on every call so an extension can keep state.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use ::rhai::module_resolvers::DummyModuleResolver;
use ::rhai::{
    Array, CallFnOptions, Dynamic, EvalAltResult, FnAccess, FnPtr, ImmutableString, Map,
    NativeCallContext, Scope, AST, INT,
};
use serde_json::Value;

use super::{Backend, Engine, EngineContext};
use crate::console::{self, Level};
use crate::contract::{Arity, ExportTable};
use crate::document::{Method, Selection};
use crate::error::{CapabilityError, InvocationError, LoadError};
use crate::manifest::Language;

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_COLLECTION_LEN: usize = 100_000;
/// Operations between deadline checks.
const PROGRESS_CHECK_INTERVAL: u64 = 1024;

#[derive(Debug, Clone, Copy, Default)]
pub struct RhaiBackend;

impl Backend for RhaiBackend {
    fn language(&self) -> Language {
        Language::Rhai
    }

    fn create(&self, source: &str, ctx: &EngineContext) -> Result<Box<dyn Engine>, LoadError> {
        Ok(Box::new(RhaiEngine::new(source, ctx)?))
    }
}

struct RhaiEngine {
    engine: ::rhai::Engine,
    ast: AST,
    scope: Scope<'static>,
    this: Dynamic,
    exports: ExportTable,
    deadline: Rc<Cell<Option<Instant>>>,
}

impl RhaiEngine {
    fn new(source: &str, ctx: &EngineContext) -> Result<Self, LoadError> {
        let deadline = Rc::new(Cell::new(None));
        let engine = build_engine(ctx, deadline.clone());

        let ast = engine
            .compile(source)
            .map_err(|e| LoadError::CompileError(e.to_string()))?;

        let mut scope = Scope::new();
        deadline.set(Some(crate::sandbox::deadline_after(ctx.config.call_timeout)));
        let evaluated = engine.run_ast_with_scope(&mut scope, &ast);
        deadline.set(None);
        evaluated.map_err(|e| LoadError::CompileError(e.to_string()))?;

        let exports = ast
            .iter_functions()
            .filter(|f| matches!(f.access, FnAccess::Public))
            .map(|f| (f.name.to_owned(), Arity::Exact(f.params.len())))
            .collect();

        Ok(Self {
            engine,
            ast,
            scope,
            this: Map::new().into(),
            exports,
            deadline,
        })
    }
}

impl Engine for RhaiEngine {
    fn exports(&self) -> &ExportTable {
        &self.exports
    }

    fn call(
        &mut self,
        function: &str,
        args: &[Value],
        deadline: Instant,
    ) -> Result<Value, InvocationError> {
        let args = args
            .iter()
            .map(|arg| ::rhai::serde::to_dynamic(arg).map_err(|e| InvocationError::Marshal(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        self.deadline.set(Some(deadline));
        let options = CallFnOptions::new()
            .eval_ast(false)
            .bind_this_ptr(&mut self.this);
        let result =
            self.engine
                .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, function, args);
        self.deadline.set(None);

        let value = result.map_err(|e| classify(function, &e))?;
        ::rhai::serde::from_dynamic::<Value>(&value).map_err(|e| InvocationError::ReturnType {
            function: function.to_owned(),
            message: e.to_string(),
        })
    }
}

fn build_engine(ctx: &EngineContext, deadline: Rc<Cell<Option<Instant>>>) -> ::rhai::Engine {
    let mut engine = ::rhai::Engine::new();
    engine.set_module_resolver(DummyModuleResolver::new());
    engine.disable_symbol("eval");
    engine.set_max_operations(ctx.config.max_operations);
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
    engine.set_max_string_size(ctx.config.memory_limit);
    engine.set_max_array_size(MAX_COLLECTION_LEN);
    engine.set_max_map_size(MAX_COLLECTION_LEN);

    engine.on_progress(move |operations| {
        if operations % PROGRESS_CHECK_INTERVAL != 0 {
            return None;
        }
        match deadline.get() {
            Some(deadline) if Instant::now() >= deadline => Some("deadline exceeded".into()),
            _ => None,
        }
    });

    let id = ctx.extension_id.clone();
    engine.on_print(move |line| console::log(&id, Level::Info, line));
    let id = ctx.extension_id.clone();
    engine.on_debug(move |line, _source, _pos| console::log(&id, Level::Debug, line));

    register_document(&mut engine);
    engine
}

/// Walk through call-site wrappers to the error that actually stopped the script.
fn root_cause(err: &EvalAltResult) -> &EvalAltResult {
    match err {
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => root_cause(inner),
        EvalAltResult::ErrorInModule(_, inner, _) => root_cause(inner),
        other => other,
    }
}

fn classify(function: &str, err: &EvalAltResult) -> InvocationError {
    match root_cause(err) {
        EvalAltResult::ErrorTerminated(..) => InvocationError::Timeout(function.to_owned()),
        EvalAltResult::ErrorTooManyOperations(_)
        | EvalAltResult::ErrorStackOverflow(_)
        | EvalAltResult::ErrorDataTooLarge(..) => InvocationError::ResourceLimit {
            function: function.to_owned(),
            message: err.to_string(),
        },
        _ => InvocationError::Exception {
            function: function.to_owned(),
            message: err.to_string(),
        },
    }
}

// ─── Document binding ───────────────────────────────────────────────

impl From<CapabilityError> for Box<EvalAltResult> {
    fn from(err: CapabilityError) -> Self {
        err.to_string().into()
    }
}

fn fault(err: CapabilityError) -> Box<EvalAltResult> {
    err.into()
}

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

fn predicate(ctx: &NativeCallContext, f: &FnPtr, index: usize, single: Selection) -> ScriptResult<bool> {
    let result = f.call_within_context::<Dynamic>(ctx, (index as INT, single))?;
    result.as_bool().map_err(|actual| {
        fault(CapabilityError::TypeMismatch(format!(
            "predicate must return a boolean, got {actual}"
        )))
    })
}

fn filter_by(ctx: NativeCallContext, s: &mut Selection, f: FnPtr) -> ScriptResult<Selection> {
    s.filter_with(|i, single| predicate(&ctx, &f, i, single))
}

fn not_by(ctx: NativeCallContext, s: &mut Selection, f: FnPtr) -> ScriptResult<Selection> {
    s.not_with(|i, single| predicate(&ctx, &f, i, single))
}

fn matches_by(ctx: NativeCallContext, s: &mut Selection, f: FnPtr) -> ScriptResult<bool> {
    s.is_with(|i, single| predicate(&ctx, &f, i, single))
}

fn each(ctx: NativeCallContext, s: &mut Selection, f: FnPtr) -> ScriptResult<Selection> {
    s.each(|i, single| {
        f.call_within_context::<Dynamic>(&ctx, (i as INT, single))
            .map(|_| ())
    })?;
    Ok(s.clone())
}

fn map(ctx: NativeCallContext, s: &mut Selection, f: FnPtr) -> ScriptResult<Array> {
    s.map(|i, single| f.call_within_context::<Dynamic>(&ctx, (i as INT, single)))
}

fn register_document(engine: &mut ::rhai::Engine) {
    engine.register_type_with_name::<Selection>("Selection");

    engine.register_fn("Doc", |html: ImmutableString| Selection::parse(&html));
    engine.register_fn("Doc", |_: Dynamic| Selection::default());
    engine.register_fn("Doc", Selection::default);

    engine.register_fn("find", |s: &mut Selection, sel: ImmutableString| {
        s.find(&sel).map_err(fault)
    });

    for method in Method::OPTIONAL_FILTER {
        let name = method.snake_name();
        engine.register_fn(name, move |s: &mut Selection| {
            method.apply(s, None, None, None).map_err(fault)
        });
        engine.register_fn(name, move |s: &mut Selection, sel: ImmutableString| {
            method.apply(s, Some(&sel), None, None).map_err(fault)
        });
    }

    for method in [Method::ParentsUntil, Method::NextUntil, Method::PrevUntil] {
        let name = method.snake_name();
        engine.register_fn(name, move |s: &mut Selection, until: ImmutableString| {
            method.apply(s, None, Some(&until), None).map_err(fault)
        });
        engine.register_fn(
            name,
            move |s: &mut Selection, sel: ImmutableString, until: ImmutableString| {
                method.apply(s, Some(&sel), Some(&until), None).map_err(fault)
            },
        );
    }

    engine.register_fn("contents", |s: &mut Selection| s.contents().map_err(fault));
    engine.register_fn("contents_filtered", |s: &mut Selection, sel: ImmutableString| {
        s.contents_filtered(&sel).map_err(fault)
    });

    engine.register_fn("filter", |s: &mut Selection, sel: ImmutableString| {
        s.filter(&sel).map_err(fault)
    });
    engine.register_fn("filter", filter_by);
    engine.register_fn("not", |s: &mut Selection, sel: ImmutableString| {
        s.not(&sel).map_err(fault)
    });
    engine.register_fn("not", not_by);
    // `is` is reserved in Rhai
    engine.register_fn("matches", |s: &mut Selection, sel: ImmutableString| {
        s.is(&sel).map_err(fault)
    });
    engine.register_fn("matches", matches_by);
    engine.register_fn("has", |s: &mut Selection, sel: ImmutableString| {
        s.has(&sel).map_err(fault)
    });

    engine.register_fn("each", each);
    engine.register_fn("map", map);

    engine.register_fn("first", |s: &mut Selection| s.first().map_err(fault));
    engine.register_fn("last", |s: &mut Selection| s.last().map_err(fault));
    engine.register_fn("eq", |s: &mut Selection, index: INT| s.eq(index).map_err(fault));
    engine.register_fn("end", |s: &mut Selection| s.end().map_err(fault));

    engine.register_get("length", |s: &mut Selection| s.len() as INT);
    engine.register_get("is_nil", |s: &mut Selection| !s.is_valid());
    engine.register_fn("len", |s: &mut Selection| s.len() as INT);

    engine.register_fn("html", |s: &mut Selection| {
        s.html().map_or(Dynamic::UNIT, Dynamic::from)
    });
    engine.register_fn("text", |s: &mut Selection| s.text());
    engine.register_fn("attr", |s: &mut Selection, name: ImmutableString| -> ScriptResult<Dynamic> {
        Ok(s.attr(&name)?.map_or(Dynamic::UNIT, Dynamic::from))
    });
}
