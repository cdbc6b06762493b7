//! TypeScript backend: strip types with oxc, then run on QuickJS.

use std::path::Path;

use oxc::allocator::Allocator;
use oxc::codegen::CodeGenerator;
use oxc::parser::Parser;
use oxc::semantic::SemanticBuilder;
use oxc::span::SourceType;
use oxc::transformer::{TransformOptions, Transformer};

use super::quickjs::QuickJsEngine;
use super::{Backend, Engine, EngineContext};
use crate::error::LoadError;
use crate::manifest::Language;

#[derive(Debug, Clone, Copy, Default)]
pub struct TypeScriptBackend;

impl Backend for TypeScriptBackend {
    fn language(&self) -> Language {
        Language::Typescript
    }

    fn create(&self, source: &str, ctx: &EngineContext) -> Result<Box<dyn Engine>, LoadError> {
        let javascript = transpile(source)?;
        Ok(Box::new(QuickJsEngine::new(&javascript, ctx)?))
    }
}

fn diagnostics<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Transpile TypeScript source to ECMAScript.
pub fn transpile(source: &str) -> Result<String, LoadError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::ts()).parse();
    if !parsed.errors.is_empty() {
        return Err(LoadError::CompileError(diagnostics(&parsed.errors)));
    }
    let mut program = parsed.program;

    let semantic = SemanticBuilder::new().build(&program);
    if !semantic.errors.is_empty() {
        return Err(LoadError::CompileError(diagnostics(&semantic.errors)));
    }
    let (symbols, scopes) = semantic.semantic.into_symbol_table_and_scope_tree();

    let options = TransformOptions::default();
    let transformed = Transformer::new(&allocator, Path::new("extension.ts"), &options)
        .build_with_symbols_and_scopes(symbols, scopes, &mut program);
    if !transformed.errors.is_empty() {
        return Err(LoadError::CompileError(diagnostics(&transformed.errors)));
    }

    Ok(CodeGenerator::new().build(&program).code)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use crate::sandbox::SandboxConfig;

    #[test]
    fn test_transpile_strips_types() {
        let js = transpile("function add(a: number, b: number): number { return a + b; }").unwrap();
        assert!(!js.contains(": number"));
        assert!(js.contains("function add(a, b)"));
    }

    #[test]
    fn test_transpile_reports_syntax_errors() {
        let err = transpile("function (: {").unwrap_err();
        assert!(matches!(err, LoadError::CompileError(_)));
    }

    #[test]
    fn test_typescript_provider_runs() {
        let ctx = EngineContext {
            extension_id: "ts-test".into(),
            config: SandboxConfig::default(),
        };
        let mut engine = TypeScriptBackend
            .create(
                r#"
                interface Options { query: string }
                class Provider {
                    async search(opts: Options): Promise<string[]> { return [opts.query]; }
                }
                "#,
                &ctx,
            )
            .unwrap();
        let result = engine
            .call("search", &[json!({ "query": "q" })], Instant::now() + Duration::from_secs(5))
            .unwrap();
        assert_eq!(result, json!(["q"]));
    }
}
