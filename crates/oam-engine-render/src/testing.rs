//! A minimal structural evaluator for exercising the render pipeline without a
//! real constraint-language runtime (spec §1 Non-goals: "it depends on an
//! evaluator that accepts a template string plus a value map and returns a
//! structured tree" — this is the simplest such evaluator).
//!
//! Templates here are plain JSON documents of the shape
//! `{"output": <value>, "outputs": {name: <value>}}`, with `"$parameter.path"`
//! string leaves substituted from the parameter map and `"$context.path"`
//! leaves substituted from the base context. This is not the production
//! constraint language; it exists only so this crate's own tests (and a
//! downstream crate's tests) have something concrete to evaluate against.

use async_trait::async_trait;
use oam_engine_core::error::CoreError;
use serde_json::Value;

use crate::evaluator::{EvalOutput, TemplateEvaluator};

#[derive(Debug, Default)]
pub struct StructuralEvaluator;

impl StructuralEvaluator {
    fn parse(template_str: &str) -> Result<Value, CoreError> {
        serde_json::from_str(template_str)
            .map_err(|e| CoreError::render("structural template parse", e.to_string()))
    }

    fn substitute(value: &Value, params: &Value, base_context: &Value) -> Value {
        match value {
            Value::String(s) => {
                if let Some(path) = s.strip_prefix("$parameter.") {
                    lookup_path(params, path).unwrap_or(Value::Null)
                } else if let Some(path) = s.strip_prefix("$context.") {
                    lookup_path(base_context, path).unwrap_or(Value::Null)
                } else {
                    value.clone()
                }
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| Self::substitute(v, params, base_context))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::substitute(v, params, base_context)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[async_trait]
impl TemplateEvaluator for StructuralEvaluator {
    async fn complete(
        &self,
        template_str: &str,
        params: &Value,
        base_context: &Value,
    ) -> Result<EvalOutput, CoreError> {
        let doc = Self::parse(template_str)?;
        let base = doc
            .get("output")
            .map(|v| Self::substitute(v, params, base_context));
        let auxiliaries = doc
            .get("outputs")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::substitute(v, params, base_context)))
                    .collect()
            })
            .unwrap_or_default();
        Ok(EvalOutput { base, auxiliaries })
    }

    async fn compile(
        &self,
        template_str: &str,
        params: &Value,
        base_context: &Value,
    ) -> Result<Value, CoreError> {
        let eval = self.complete(template_str, params, base_context).await?;
        Ok(serde_json::json!({
            "output": eval.base,
            "parameter": params,
        }))
    }

    async fn status(
        &self,
        template_ctx: &Value,
        custom_status_expr: &str,
        _params: &Value,
    ) -> Result<String, CoreError> {
        Ok(lookup_path(template_ctx, custom_status_expr)
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_default())
    }

    async fn health_check(
        &self,
        template_ctx: &Value,
        health_expr: &str,
        _params: &Value,
    ) -> Result<bool, CoreError> {
        Ok(lookup_path(template_ctx, health_expr)
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    /// Reads an optional top-level `"requiredParameters"` array of dotted paths
    /// from the template document; real constraint-language implementations
    /// derive this from optional/default annotations instead of a sidecar field.
    fn required_parameter_paths(&self, template_str: &str) -> Result<Vec<String>, CoreError> {
        let doc = Self::parse(template_str)?;
        Ok(doc
            .get("requiredParameters")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}
