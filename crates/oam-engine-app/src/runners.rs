//! Step-type → `TaskRunner` mapping (spec §4.10, §6). The canned `success`/
//! `failed`/`suspend`/`terminate` scenario runners are reused directly or
//! adapted from `oam-engine-workflow::testing`; `apply-component` is the one
//! production step type this binary drives through the real render/assemble
//! pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use oam_engine_core::config::EngineConfig;
use oam_engine_core::error::CoreError;
use oam_engine_core::models::{Component, ComponentManifest, ParsedAppfile, StepPhase, WorkflowStepSpec};
use oam_engine_core::process::AppMeta;
use oam_engine_render::document::{
    ANNOTATION_FILTER_ANNOTATION_KEYS, ANNOTATION_FILTER_LABEL_KEYS, ANNOTATION_PUBLISH_VERSION,
    ANNOTATION_WORKFLOW_NAME,
};
use oam_engine_render::prelude::{Assembler, AssemblyContext, ComponentRenderer, TemplateEvaluator};
use oam_engine_workflow::prelude::{Operation, RunOptions, RunResult, TaskRunner, WorkflowContext};
use oam_engine_workflow::testing::{FailingRunner, SucceedingRunner};
use serde_json::Value;

/// Builds the `AppMeta` a component render pass needs from its owning appfile
/// (spec §4.5, §6).
fn app_meta_for(component: &Component, appfile: &ParsedAppfile) -> AppMeta {
    AppMeta {
        app_name: appfile.name.clone(),
        namespace: appfile.namespace.clone(),
        revision: appfile.revision_name.clone(),
        labels: appfile.labels.clone(),
        annotations: appfile.annotations.clone(),
        workflow_name: appfile.annotations.get(ANNOTATION_WORKFLOW_NAME).cloned(),
        publish_version: appfile.annotations.get(ANNOTATION_PUBLISH_VERSION).cloned(),
        component_type: component.component_type.clone(),
    }
}

/// Runs one component through the Component Renderer and Assembler, borrowing
/// straight from a `ParsedAppfile` (used by the `render`/`validate` CLI
/// commands, which render every component up front rather than through the
/// workflow).
pub async fn render_and_assemble(
    component: &Component,
    appfile: &ParsedAppfile,
    evaluator: &dyn TemplateEvaluator,
    config: &EngineConfig,
) -> Result<ComponentManifest, CoreError> {
    let app_meta = app_meta_for(component, appfile);
    let trait_ref_paths: HashMap<String, String> =
        component.traits.iter().map(|t| (t.name.clone(), t.workload_ref_path.clone())).collect();
    let filter_label_keys = split_csv_annotation(&appfile.annotations, ANNOTATION_FILTER_LABEL_KEYS);
    let mut filter_annotation_keys = split_csv_annotation(&appfile.annotations, ANNOTATION_FILTER_ANNOTATION_KEYS);
    filter_annotation_keys.extend(config.default_filtered_annotation_keys.iter().cloned());

    let renderer = ComponentRenderer::new(evaluator);
    let mut manifest = renderer.render(component, &app_meta).await?;
    let assembly = AssemblyContext {
        app_name: &app_meta.app_name,
        app_namespace: &app_meta.namespace,
        app_revision: &appfile.revision_hash,
        component_name: &component.name,
        app_labels: &appfile.labels,
        app_annotations: &appfile.annotations,
        filter_label_keys: &filter_label_keys,
        filter_annotation_keys: &filter_annotation_keys,
        trait_ref_paths: &trait_ref_paths,
    };
    Assembler::set_oam_contract(&mut manifest, &assembly)?;
    Ok(manifest)
}

/// Builds the runner for one parsed workflow step. Unknown step types fall
/// back to [`NoopRunner`] rather than failing the whole tick — a step the
/// engine cannot interpret should not block steps it can.
pub fn build_runner(
    step: &WorkflowStepSpec,
    appfile: &ParsedAppfile,
    evaluator: Arc<dyn TemplateEvaluator>,
    config: &EngineConfig,
) -> Box<dyn TaskRunner> {
    match step.step_type.as_str() {
        "success" => Box::new(SucceedingRunner(step.name.clone())),
        "failed" => Box::new(FailingRunner(step.name.clone())),
        "suspend" => Box::new(SuspendRunner::new(step.name.clone(), &step.properties)),
        "terminate" => Box::new(TerminateRunner(step.name.clone())),
        "apply-component" => build_apply_component_runner(step, appfile, evaluator, config),
        _ => Box::new(NoopRunner(step.name.clone())),
    }
}

fn build_apply_component_runner(
    step: &WorkflowStepSpec,
    appfile: &ParsedAppfile,
    evaluator: Arc<dyn TemplateEvaluator>,
    config: &EngineConfig,
) -> Box<dyn TaskRunner> {
    let Some(component_name) = step.properties.get("component").and_then(Value::as_str) else {
        return Box::new(MisconfiguredRunner {
            name: step.name.clone(),
            reason: "apply-component step is missing a \"component\" property".into(),
        });
    };
    let Some(component) = appfile.components.iter().find(|c| c.name == component_name) else {
        return Box::new(MisconfiguredRunner {
            name: step.name.clone(),
            reason: format!("no component named \"{component_name}\" in this application"),
        });
    };

    let app_meta = app_meta_for(component, appfile);

    let filter_label_keys = split_csv_annotation(&appfile.annotations, ANNOTATION_FILTER_LABEL_KEYS);
    let mut filter_annotation_keys = split_csv_annotation(&appfile.annotations, ANNOTATION_FILTER_ANNOTATION_KEYS);
    filter_annotation_keys.extend(config.default_filtered_annotation_keys.iter().cloned());

    Box::new(ApplyComponentRunner::new(
        &step.name,
        component.clone(),
        app_meta,
        evaluator,
        appfile.revision_hash.clone(),
        appfile.labels.clone(),
        appfile.annotations.clone(),
        filter_label_keys,
        filter_annotation_keys,
        step.depends_on.clone(),
    ))
}

fn split_csv_annotation(annotations: &HashMap<String, String>, key: &str) -> Vec<String> {
    annotations
        .get(key)
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Renders one component through the Component Renderer and Assembler, then
/// publishes the result into the workflow context (spec §4.5, §4.7, §6).
pub struct ApplyComponentRunner {
    name: String,
    component: Component,
    app_meta: AppMeta,
    evaluator: Arc<dyn TemplateEvaluator>,
    app_revision_hash: String,
    app_labels: HashMap<String, String>,
    app_annotations: HashMap<String, String>,
    filter_label_keys: Vec<String>,
    filter_annotation_keys: Vec<String>,
    trait_ref_paths: HashMap<String, String>,
    depends_on: Vec<String>,
}

impl ApplyComponentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        component: Component,
        app_meta: AppMeta,
        evaluator: Arc<dyn TemplateEvaluator>,
        app_revision_hash: String,
        app_labels: HashMap<String, String>,
        app_annotations: HashMap<String, String>,
        filter_label_keys: Vec<String>,
        filter_annotation_keys: Vec<String>,
        depends_on: Vec<String>,
    ) -> Self {
        let trait_ref_paths =
            component.traits.iter().map(|t| (t.name.clone(), t.workload_ref_path.clone())).collect();
        Self {
            name: name.to_string(),
            component,
            app_meta,
            evaluator,
            app_revision_hash,
            app_labels,
            app_annotations,
            filter_label_keys,
            filter_annotation_keys,
            trait_ref_paths,
            depends_on,
        }
    }
}

#[async_trait]
impl TaskRunner for ApplyComponentRunner {
    fn name(&self) -> &str {
        &self.name
    }

    /// Waits until every dependency component has a rendered manifest in the
    /// workflow context (spec §4.10 DAG mode).
    async fn pending(&self, ctx: &WorkflowContext) -> bool {
        self.depends_on.iter().any(|dep| ctx.get_component(dep).is_none())
    }

    async fn run(&self, ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        let renderer = ComponentRenderer::new(self.evaluator.as_ref());
        let mut manifest = renderer.render(&self.component, &self.app_meta).await?;

        let assembly = AssemblyContext {
            app_name: &self.app_meta.app_name,
            app_namespace: &self.app_meta.namespace,
            app_revision: &self.app_revision_hash,
            component_name: &self.component.name,
            app_labels: &self.app_labels,
            app_annotations: &self.app_annotations,
            filter_label_keys: &self.filter_label_keys,
            filter_annotation_keys: &self.filter_annotation_keys,
            trait_ref_paths: &self.trait_ref_paths,
        };
        Assembler::set_oam_contract(&mut manifest, &assembly)?;

        let mut rendered = vec![manifest.primary.clone()];
        rendered.extend(manifest.auxiliaries.iter().map(|a| a.object.clone()));
        ctx.set_component(&self.component.name, rendered);

        Ok(RunResult::succeeded().with_produced(serde_json::json!({ "workload": manifest.primary })))
    }
}

const SUSPEND_MEMORY_PREFIX: &str = "suspend-first-seen";

/// The `suspend` step type (spec §4.10, §7 boundary behaviors): indefinite
/// without a declared duration, timed otherwise.
pub struct SuspendRunner {
    name: String,
    duration: Option<chrono::Duration>,
}

impl SuspendRunner {
    pub fn new(name: String, properties: &Value) -> Self {
        let duration = properties.get("duration").and_then(parse_duration);
        Self { name, duration }
    }
}

fn parse_duration(raw: &Value) -> Option<chrono::Duration> {
    match raw {
        Value::Number(n) => n.as_i64().map(chrono::Duration::seconds),
        Value::String(s) => parse_duration_str(s),
        _ => None,
    }
}

fn parse_duration_str(s: &str) -> Option<chrono::Duration> {
    let s = s.trim();
    if let Ok(seconds) = s.parse::<i64>() {
        return Some(chrono::Duration::seconds(seconds));
    }
    let (digits, unit) = s.split_at(s.len().saturating_sub(1));
    let amount: i64 = digits.parse().ok()?;
    match unit {
        "s" => Some(chrono::Duration::seconds(amount)),
        "m" => Some(chrono::Duration::minutes(amount)),
        "h" => Some(chrono::Duration::hours(amount)),
        _ => None,
    }
}

#[async_trait]
impl TaskRunner for SuspendRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }

    async fn run(&self, ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        let Some(duration) = self.duration else {
            return Ok(RunResult {
                phase: StepPhase::Succeeded,
                reason: String::new(),
                operation: Operation { suspend: true, ..Default::default() },
                produced: Value::Null,
            });
        };

        let now = Utc::now().timestamp();
        let first_seen = match ctx.get_value_in_memory(SUSPEND_MEMORY_PREFIX, &self.name).and_then(Value::as_i64) {
            Some(ts) => ts,
            None => {
                ctx.set_value_in_memory(Value::from(now), SUSPEND_MEMORY_PREFIX, &self.name);
                now
            }
        };

        if now - first_seen >= duration.num_seconds() {
            ctx.delete_value_in_memory(SUSPEND_MEMORY_PREFIX, &self.name);
            return Ok(RunResult::succeeded());
        }

        Ok(RunResult {
            phase: StepPhase::Running,
            reason: format!("waiting {}s more", duration.num_seconds() - (now - first_seen)),
            operation: Operation { suspend: true, waiting: true, ..Default::default() },
            produced: Value::Null,
        })
    }
}

/// The `terminate` step type: matches `TerminatingRunner`'s convention of a
/// failed phase carrying the `terminated` operation flag.
pub struct TerminateRunner(pub String);

#[async_trait]
impl TaskRunner for TerminateRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult {
            phase: StepPhase::Failed,
            reason: "terminate step".into(),
            operation: Operation { terminated: true, ..Default::default() },
            produced: Value::Null,
        })
    }
}

/// Fallback for a step type this binary has no builtin for: always succeeds
/// so it never blocks its siblings.
pub struct NoopRunner(pub String);

#[async_trait]
impl TaskRunner for NoopRunner {
    fn name(&self) -> &str {
        &self.0
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult::succeeded())
    }
}

/// A step that can never run because the application document referenced it
/// incorrectly (missing/unknown component).
struct MisconfiguredRunner {
    name: String,
    reason: String,
}

#[async_trait]
impl TaskRunner for MisconfiguredRunner {
    fn name(&self) -> &str {
        &self.name
    }
    async fn pending(&self, _ctx: &WorkflowContext) -> bool {
        false
    }
    async fn run(&self, _ctx: &mut WorkflowContext, _options: &RunOptions) -> Result<RunResult, CoreError> {
        Ok(RunResult {
            phase: StepPhase::Failed,
            reason: self.reason.clone(),
            operation: Operation::default(),
            produced: Value::Null,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oam_engine_core::models::{CapabilityKind, Template, TemplateCategory};
    use oam_engine_render::testing::StructuralEvaluator;

    fn appfile_with_one_component() -> ParsedAppfile {
        let mut template = Template::new("webservice", CapabilityKind::Component);
        template.category = TemplateCategory::TemplateLanguage;
        template.template_str =
            Some(serde_json::json!({"output": {"kind": "Deployment", "spec": {}}}).to_string());

        let mut appfile = ParsedAppfile::new("web", "default");
        appfile.revision_name = "web-v1".into();
        appfile.revision_hash = "web-v1:abc".into();
        appfile.components.push(Component {
            name: "frontend".into(),
            component_type: "webservice".into(),
            category: TemplateCategory::TemplateLanguage,
            user_params: Default::default(),
            template,
            traits: vec![],
            scopes: vec![],
            patch: None,
        });
        appfile
    }

    fn evaluator() -> Arc<dyn TemplateEvaluator> {
        Arc::new(StructuralEvaluator)
    }

    #[tokio::test]
    async fn build_runner_dispatches_canned_scenario_types() {
        let appfile = appfile_with_one_component();
        let config = EngineConfig::default();
        let success = build_runner(
            &WorkflowStepSpec {
                name: "s1".into(),
                step_type: "success".into(),
                properties: Value::Null,
                depends_on: vec![],
                inputs: vec![],
                outputs: vec![],
                timeout: None,
            },
            &appfile,
            evaluator(),
            &config,
        );
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = success.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Succeeded);
    }

    #[tokio::test]
    async fn suspend_runner_without_duration_requests_indefinite_suspend() {
        let runner = SuspendRunner::new("pause".into(), &Value::Null);
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Succeeded);
        assert!(result.operation.suspend);
        assert!(!result.operation.waiting);
    }

    #[tokio::test]
    async fn suspend_runner_with_zero_duration_succeeds_immediately() {
        let runner = SuspendRunner::new("pause".into(), &serde_json::json!({"duration": 0}));
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Succeeded);
    }

    #[tokio::test]
    async fn suspend_runner_with_future_duration_stays_running() {
        let runner = SuspendRunner::new("pause".into(), &serde_json::json!({"duration": "60s"}));
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Running);
        assert!(result.operation.waiting);
    }

    #[tokio::test]
    async fn terminate_runner_reports_failed_phase_with_terminated_flag() {
        let runner = TerminateRunner("stop".into());
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Failed);
        assert!(result.operation.terminated);
    }

    #[tokio::test]
    async fn apply_component_runner_pending_until_dependency_rendered() {
        let appfile = appfile_with_one_component();
        let component = appfile.components[0].clone();
        let runner = ApplyComponentRunner::new(
            "apply-frontend",
            component,
            AppMeta {
                app_name: "web".into(),
                namespace: "default".into(),
                revision: "web-v1".into(),
                labels: Default::default(),
                annotations: Default::default(),
                workflow_name: None,
                publish_version: None,
                component_type: "webservice".into(),
            },
            evaluator(),
            "web-v1:abc".into(),
            Default::default(),
            Default::default(),
            vec![],
            vec![],
            vec!["backend".into()],
        );
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        assert!(runner.pending(&ctx).await);
        ctx.set_component("backend", vec![serde_json::json!({"kind": "Deployment"})]);
        assert!(!runner.pending(&ctx).await);
    }

    #[tokio::test]
    async fn apply_component_runner_renders_and_publishes_manifest() {
        let appfile = appfile_with_one_component();
        let config = EngineConfig::default();
        let step = WorkflowStepSpec {
            name: "apply-frontend".into(),
            step_type: "apply-component".into(),
            properties: serde_json::json!({"component": "frontend"}),
            depends_on: vec![],
            inputs: vec![],
            outputs: vec![],
            timeout: None,
        };
        let runner = build_runner(&step, &appfile, evaluator(), &config);
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Succeeded);
        let rendered = ctx.get_component("frontend").unwrap();
        assert_eq!(rendered[0]["kind"], "Deployment");
        assert_eq!(rendered[0]["metadata"]["namespace"], "default");
    }

    #[tokio::test]
    async fn apply_component_runner_with_unknown_component_fails() {
        let appfile = appfile_with_one_component();
        let config = EngineConfig::default();
        let step = WorkflowStepSpec {
            name: "apply-ghost".into(),
            step_type: "apply-component".into(),
            properties: serde_json::json!({"component": "ghost"}),
            depends_on: vec![],
            inputs: vec![],
            outputs: vec![],
            timeout: None,
        };
        let runner = build_runner(&step, &appfile, evaluator(), &config);
        let mut ctx = WorkflowContext::new_context("default", "web", "uid-1");
        let result = runner.run(&mut ctx, &RunOptions::default()).await.unwrap();
        assert_eq!(result.phase, StepPhase::Failed);
    }
}
