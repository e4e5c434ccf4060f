//! The reconciliation loop: parse → validate → render → assemble →
//! workflow-tick against a file-backed application document (spec §1, §6).
//! Everything here is orchestration of the lower crates; no algorithm lives
//! in this module.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use oam_engine_core::config::EngineConfig;
use oam_engine_core::models::{ParsedAppfile, StepStatus, WorkflowMode, WorkflowStatus};
use oam_engine_render::document::ApplicationDocument;
use oam_engine_render::prelude::{Parser, ParameterValidator, TemplateEvaluator};
use oam_engine_render::testing::StructuralEvaluator;
use oam_engine_workflow::prelude::{WorkflowContext, WorkflowEngine, WorkflowState};
use oam_engine_workflow::testing::InMemoryWorkflowContextBackend;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::AppResult;
use crate::io;
use crate::runners::{build_runner, render_and_assemble};
use crate::store::FileDefinitionStore;

/// Loads the application document and parses it against the definitions
/// fixture, returning both the resolved appfile and the store it was
/// resolved from (the same store drives the workflow-engine's runner factory).
async fn parse_app(app_path: &Path, definitions_path: &Path) -> AppResult<(ParsedAppfile, FileDefinitionStore)> {
    let doc: ApplicationDocument = io::load(app_path)?;
    let store = FileDefinitionStore::load(definitions_path)?;
    let revision_name = format!("{}-v1", doc.metadata.name);
    let appfile = Parser::new(&store).parse(&doc, &revision_name).await?;
    Ok((appfile, store))
}

/// `oam-engine validate`: resolves every component and checks that every
/// required template parameter is supplied, without rendering anything
/// (spec §4.2, §4.4).
#[instrument(skip_all)]
pub async fn validate_command(app_path: &Path, definitions_path: &Path) -> AppResult<()> {
    let (appfile, _store) = parse_app(app_path, definitions_path).await?;
    let evaluator = StructuralEvaluator;
    let validator = ParameterValidator::new(&evaluator);
    for component in &appfile.components {
        let template_str = component.template.template_str.as_deref().unwrap_or_default();
        let params = Value::Object(component.user_params.clone().into_iter().collect());
        validator.validate(&component.name, template_str, &params, &Value::Null, &appfile).await?;
    }
    info!(app = %appfile.name, components = appfile.components.len(), "application document is valid");
    Ok(())
}

/// `oam-engine render`: renders and assembles every component, printing the
/// resulting manifests to stdout or, if `out_dir` is given, one JSON file per
/// component (spec §4.5, §4.7).
#[instrument(skip_all)]
pub async fn render_command(app_path: &Path, definitions_path: &Path, out_dir: Option<&Path>) -> AppResult<()> {
    let (appfile, _store) = parse_app(app_path, definitions_path).await?;
    let evaluator = StructuralEvaluator;
    let config = EngineConfig::from_env()?;

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir)
            .map_err(|source| crate::error::AppError::Io { path: dir.display().to_string(), source })?;
    }

    for component in &appfile.components {
        let manifest = render_and_assemble(component, &appfile, &evaluator, &config).await?;
        let rendered = serde_json::to_string_pretty(&manifest)
            .map_err(|source| crate::error::AppError::Decode {
                path: component.name.clone(),
                format: "json",
                source,
            })?;
        match out_dir {
            Some(dir) => {
                let path = dir.join(format!("{}.json", component.name));
                std::fs::write(&path, &rendered)
                    .map_err(|source| crate::error::AppError::Io { path: path.display().to_string(), source })?;
                info!(component = %component.name, path = %path.display(), "wrote rendered manifest");
            }
            None => println!("{rendered}"),
        }
    }
    Ok(())
}

/// `oam-engine run`: drives the workflow engine to completion, ticking until
/// the workflow settles or `max_ticks` is exhausted (spec §4.10).
#[instrument(skip_all)]
pub async fn run_command(app_path: &Path, definitions_path: &Path, max_ticks: u32) -> AppResult<()> {
    let (appfile, _store) = parse_app(app_path, definitions_path).await?;
    let config = EngineConfig::from_env()?;
    let evaluator: Arc<dyn TemplateEvaluator> = Arc::new(StructuralEvaluator);
    let mode = appfile.workflow_mode.unwrap_or(WorkflowMode::Sequential);

    let runners: Vec<Box<dyn oam_engine_workflow::prelude::TaskRunner>> = appfile
        .workflow_steps
        .iter()
        .map(|step| build_runner(step, &appfile, evaluator.clone(), &config))
        .collect();

    let backend = InMemoryWorkflowContextBackend::default();
    let mut ctx = WorkflowContext::new_context(&appfile.namespace, &appfile.name, &appfile.revision_name);
    let mut status = WorkflowStatus::new("", mode);
    let mut status_by_name: HashMap<String, StepStatus> = HashMap::new();
    let engine = WorkflowEngine::new(config);

    for tick in 0..max_ticks {
        let state = engine
            .tick(&runners, &appfile.workflow_steps, mode, &appfile.revision_hash, &mut status, &mut ctx, &backend, &mut status_by_name)
            .await?;

        info!(tick, ?state, finished = status.finished, "workflow tick complete");

        match state {
            WorkflowState::Finished | WorkflowState::Skipping => return Ok(()),
            WorkflowState::Terminated => {
                warn!(message = %status.message, "workflow terminated");
                return Ok(());
            }
            WorkflowState::Suspended | WorkflowState::SuspendedWaiting => {
                let wait = engine_backoff_or_wait(&engine, &ctx, &status, state);
                tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
            }
            WorkflowState::Executing => {
                let wait = engine.next_backoff_secs(&ctx, &status);
                tokio::time::sleep(std::time::Duration::from_secs_f64(wait)).await;
            }
            WorkflowState::Succeeded | WorkflowState::Initializing | WorkflowState::Skipping => {}
        }
    }

    warn!(max_ticks, "workflow did not settle within the tick budget");
    Ok(())
}

/// `suspend`'s timed variant still wants the normal backoff pacing between
/// ticks; an indefinite suspend has nothing left to schedule against, but a
/// short poll keeps the CLI responsive to an externally cleared `Suspend` flag.
fn engine_backoff_or_wait(engine: &WorkflowEngine, ctx: &WorkflowContext, status: &WorkflowStatus, state: WorkflowState) -> f64 {
    match state {
        WorkflowState::SuspendedWaiting => engine.next_backoff_secs(ctx, status),
        _ => 5.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEFINITIONS_FIXTURE: &str = r#"{
        "definitions": [
            {
                "name": "webservice",
                "kind": "component",
                "schematic": {"TemplateLanguage": "{\"output\": {\"kind\": \"Deployment\", \"metadata\": {\"name\": \"placeholder\"}, \"spec\": {\"image\": \"$parameter.image\"}}}"},
                "health_policy": null,
                "custom_status": null,
                "workload": {"api_version": "apps/v1", "kind": "Deployment"},
                "workload_ref_path": null,
                "parameter_schema": {}
            },
            {
                "name": "success",
                "kind": "workflow-step",
                "schematic": {"TemplateLanguage": "{}"},
                "health_policy": null,
                "custom_status": null,
                "workload": null,
                "workload_ref_path": null,
                "parameter_schema": {}
            }
        ]
    }"#;

    const APP_FIXTURE: &str = r#"{
        "metadata": {"name": "demo-app", "namespace": "default"},
        "spec": {
            "components": [
                {"name": "web", "type": "webservice", "properties": {"image": "nginx:1.25"}}
            ],
            "workflow": {
                "steps": [
                    {"name": "finish-up", "type": "success"}
                ],
                "mode": "sequential"
            }
        }
    }"#;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file
    }

    #[tokio::test]
    async fn validate_command_accepts_a_well_formed_application() {
        let definitions = write_fixture(DEFINITIONS_FIXTURE);
        let app = write_fixture(APP_FIXTURE);

        validate_command(app.path(), definitions.path()).await.unwrap();
    }

    #[tokio::test]
    async fn render_command_prints_to_stdout_without_an_out_dir() {
        let definitions = write_fixture(DEFINITIONS_FIXTURE);
        let app = write_fixture(APP_FIXTURE);

        render_command(app.path(), definitions.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn render_command_writes_one_manifest_file_per_component() {
        let definitions = write_fixture(DEFINITIONS_FIXTURE);
        let app = write_fixture(APP_FIXTURE);
        let out_dir = tempfile::tempdir().unwrap();

        render_command(app.path(), definitions.path(), Some(out_dir.path())).await.unwrap();

        let rendered_path = out_dir.path().join("web.json");
        let rendered = std::fs::read_to_string(&rendered_path).unwrap();
        let manifest: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(manifest["primary"]["kind"], "Deployment");
    }

    #[tokio::test]
    async fn run_command_finishes_a_single_step_sequential_workflow() {
        let definitions = write_fixture(DEFINITIONS_FIXTURE);
        let app = write_fixture(APP_FIXTURE);

        run_command(app.path(), definitions.path(), 10).await.unwrap();
    }

    #[tokio::test]
    async fn run_command_finishes_immediately_with_no_workflow_section() {
        let definitions = write_fixture(DEFINITIONS_FIXTURE);
        let app = write_fixture(
            r#"{
                "metadata": {"name": "no-workflow-app", "namespace": "default"},
                "spec": {
                    "components": [
                        {"name": "web", "type": "webservice", "properties": {"image": "nginx:1.25"}}
                    ]
                }
            }"#,
        );

        run_command(app.path(), definitions.path(), 5).await.unwrap();
    }
}
