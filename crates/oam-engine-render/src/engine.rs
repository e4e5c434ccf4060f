//! Abstract Engine (spec §4.3): evaluates one template against a process context.
//! Uniform across workload and trait capability kinds.

use oam_engine_core::error::CoreError;
use oam_engine_core::process::ProcessContext;
use oam_engine_core::registry::ClusterGateway;
use serde_json::Value;
use tracing::instrument;

use crate::evaluator::TemplateEvaluator;

/// Evaluates templates via an injected [`TemplateEvaluator`].
pub struct AbstractEngine<'a> {
    evaluator: &'a dyn TemplateEvaluator,
}

impl<'a> AbstractEngine<'a> {
    pub fn new(evaluator: &'a dyn TemplateEvaluator) -> Self {
        Self { evaluator }
    }

    /// `Complete(ctx, templateStr, params)` (spec §4.3): evaluates the template and
    /// folds its `output:` into `ctx`'s base and its `outputs:` sub-fields into
    /// named auxiliaries.
    #[instrument(skip(self, ctx, template_str, params))]
    pub async fn complete(
        &self,
        ctx: &mut ProcessContext,
        template_str: &str,
        params: &Value,
    ) -> Result<(), CoreError> {
        let base_context = ctx.base_context_file();
        let eval = self
            .evaluator
            .complete(template_str, params, &base_context)
            .await
            .map_err(|e| CoreError::render("base template", e.to_string()))?;

        if let Some(base) = eval.base {
            ctx.set_base(base);
        }
        for (name, value) in eval.auxiliaries {
            ctx.push_auxiliary(name, value);
        }
        Ok(())
    }

    /// Evaluates a trait's template against the current context without mutating
    /// it — a trait's own `output:`/`outputs:` become auxiliary outputs on the
    /// owning component, never a replacement for the workload's base (spec §4.3
    /// tie-break rules: traits are evaluated after the workload and may read
    /// `context.output`, but must not overwrite it).
    ///
    /// Returns one entry per produced object: `(None, value)` for the trait's own
    /// `output:` field, `(Some(name), value)` for each `outputs:` sub-field.
    #[instrument(skip(self, ctx, template_str, params))]
    pub async fn complete_trait(
        &self,
        ctx: &ProcessContext,
        template_str: &str,
        params: &Value,
    ) -> Result<Vec<(Option<String>, Value)>, CoreError> {
        let base_context = ctx.base_context_file();
        let eval = self
            .evaluator
            .complete(template_str, params, &base_context)
            .await
            .map_err(|e| CoreError::render("trait", e.to_string()))?;

        let mut results = Vec::new();
        if let Some(base) = eval.base {
            results.push((None, base));
        }
        for (name, value) in eval.auxiliaries {
            results.push((Some(name), value));
        }
        Ok(results)
    }

    /// `GetTemplateContext(ctx, client, nsAccessor)` (spec §4.3): a fully resolved
    /// view usable by Status/Health, injecting the current parameters under a
    /// `parameter` key. The cluster gateway is accepted for parity with the
    /// contract but unused by the structural view built here — cross-referencing
    /// live cluster objects from inside a status/health expression is handled by
    /// the evaluator itself, not this layer.
    pub fn get_template_context(
        &self,
        ctx: &ProcessContext,
        _gateway: &dyn ClusterGateway,
    ) -> Value {
        let (base, auxiliaries) = ctx.output();
        let mut outputs = serde_json::Map::new();
        for (name, value) in auxiliaries {
            outputs.insert(name, value);
        }
        serde_json::json!({
            "output": base,
            "outputs": outputs,
            "parameter": ctx.parameters,
            "context": ctx.base_context_file()["context"],
        })
    }

    /// `Status(templateCtx, customStatusExpr, params)` (spec §4.3).
    pub async fn status(
        &self,
        template_ctx: &Value,
        custom_status_expr: &str,
        params: &Value,
    ) -> Result<String, CoreError> {
        self.evaluator.status(template_ctx, custom_status_expr, params).await
    }

    /// `HealthCheck(templateCtx, healthExpr, params)` (spec §4.3).
    pub async fn health_check(
        &self,
        template_ctx: &Value,
        health_expr: &str,
        params: &Value,
    ) -> Result<bool, CoreError> {
        self.evaluator.health_check(template_ctx, health_expr, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StructuralEvaluator;
    use oam_engine_core::process::{AppMeta, ProcessContext};
    use std::collections::HashMap;

    fn app_meta() -> AppMeta {
        AppMeta {
            app_name: "web".into(),
            namespace: "default".into(),
            revision: "web-v1".into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            workflow_name: None,
            publish_version: None,
            component_type: "webservice".into(),
        }
    }

    #[tokio::test]
    async fn complete_folds_output_and_outputs_into_context() {
        let evaluator = StructuralEvaluator::default();
        let engine = AbstractEngine::new(&evaluator);
        let mut ctx = ProcessContext::new(app_meta(), serde_json::json!({"image": "nginx"}));
        let template = serde_json::json!({
            "output": {"kind": "Deployment"},
            "outputs": {"service": {"kind": "Service"}},
        })
        .to_string();
        engine.complete(&mut ctx, &template, &ctx.parameters.clone()).await.unwrap();
        let (base, auxes) = ctx.output();
        assert_eq!(base["kind"], "Deployment");
        assert_eq!(auxes[0].0, "service");
    }
}
