//! The constraint-language boundary (spec §1 Non-goals, §4.3): the core depends on
//! an evaluator that accepts a template string plus a value map and returns a
//! structured tree. It does not implement the language itself.

use async_trait::async_trait;
use oam_engine_core::error::CoreError;
use serde_json::Value;

/// Result of evaluating one template: the main `output:` field plus any named
/// `outputs:` sub-fields (spec §3 `ProcessContext`, §4.3 `Complete`).
#[derive(Debug, Clone, Default)]
pub struct EvalOutput {
    pub base: Option<Value>,
    pub auxiliaries: Vec<(String, Value)>,
}

/// Compiles and evaluates a template string against a parameter/context value map.
///
/// Implementations wrap whatever constraint-language runtime is deployed; this
/// crate only specifies the contract and ships a minimal structural evaluator in
/// [`crate::testing`] for exercising the render pipeline without one.
#[async_trait]
pub trait TemplateEvaluator: Send + Sync {
    /// Evaluates `template_str` with `params` merged under a `parameter` key and
    /// `base_context` merged under a `context` key, returning the `output`/`outputs`
    /// split described by [`EvalOutput`].
    async fn complete(
        &self,
        template_str: &str,
        params: &Value,
        base_context: &Value,
    ) -> Result<EvalOutput, CoreError>;

    /// Compiles `template_str` + `params` + `base_context` without requiring an
    /// `output:` field, for the validator's constraint-violation pass (spec §4.4
    /// step 7). Returns the compiled value tree.
    async fn compile(
        &self,
        template_str: &str,
        params: &Value,
        base_context: &Value,
    ) -> Result<Value, CoreError>;

    /// Evaluates a custom-status expression against a resolved template context.
    async fn status(
        &self,
        template_ctx: &Value,
        custom_status_expr: &str,
        params: &Value,
    ) -> Result<String, CoreError>;

    /// Evaluates a health-check expression against a resolved template context.
    async fn health_check(
        &self,
        template_ctx: &Value,
        health_expr: &str,
        params: &Value,
    ) -> Result<bool, CoreError>;

    /// Returns the dotted leaf paths, under the template's `parameter` block, that
    /// are neither optional nor defaulted (spec §4.4 step 3). This is the one
    /// piece of schema introspection the validator needs from the constraint
    /// language; everything else in §4.4 is plain set algebra the validator does
    /// itself.
    fn required_parameter_paths(&self, template_str: &str) -> Result<Vec<String>, CoreError>;
}
