//! Parameter Validator (spec §4.4): enforces that every non-optional,
//! non-defaulted template parameter is supplied by direct params, a workflow
//! step input, or an override policy.

use std::collections::HashSet;

use oam_engine_core::error::CoreError;
use oam_engine_core::models::{flatten_keys, ParsedAppfile};
use serde_json::Value;
use tracing::instrument;

use crate::evaluator::TemplateEvaluator;

pub struct ParameterValidator<'a> {
    evaluator: &'a dyn TemplateEvaluator,
}

impl<'a> ParameterValidator<'a> {
    pub fn new(evaluator: &'a dyn TemplateEvaluator) -> Self {
        Self { evaluator }
    }

    /// Runs the full algorithm (spec §4.4 steps 1-7) for one component.
    #[instrument(skip(self, template_str, params, base_context, appfile), fields(component))]
    pub async fn validate(
        &self,
        component: &str,
        template_str: &str,
        params: &Value,
        base_context: &Value,
        appfile: &ParsedAppfile,
    ) -> Result<(), CoreError> {
        // Steps 1-2: compile the synthetic document; propagate errors with the
        // component name prefix.
        self.evaluator
            .compile(template_str, params, base_context)
            .await
            .map_err(|e| CoreError::validation(component, e.to_string()))?;

        // Step 3: required leaf paths under `parameter`.
        let required = self
            .evaluator
            .required_parameter_paths(template_str)
            .map_err(|e| CoreError::validation(component, e.to_string()))?;
        if required.is_empty() {
            return Ok(());
        }

        // Step 4: subtract keys present in the flattened user params.
        let mut supplied: HashSet<String> = flatten_keys(params).into_iter().collect();

        // Step 5: subtract keys from workflow-step inputs and override-policy
        // properties across the same application.
        supplied.extend(workflow_input_keys(appfile));
        supplied.extend(override_policy_keys(appfile));

        // Step 6.
        let missing: Vec<String> = required
            .into_iter()
            .filter(|k| !supplied.contains(k))
            .collect();
        if !missing.is_empty() {
            return Err(CoreError::missing_parameters(component, missing));
        }

        // Step 7: the compile call above already ran the compiler's concrete-value
        // validation; a distinct constraint-violation error would have surfaced
        // there rather than from a separate pass.
        Ok(())
    }
}

fn workflow_input_keys(appfile: &ParsedAppfile) -> Vec<String> {
    appfile
        .workflow_steps
        .iter()
        .flat_map(|step| step.inputs.iter())
        .filter_map(|input| input.parameter_key.clone())
        .collect()
}

fn override_policy_keys(appfile: &ParsedAppfile) -> Vec<String> {
    appfile
        .policies
        .iter()
        .filter(|p| p.policy_type == "override")
        .flat_map(|p| flatten_keys(&p.properties))
        .collect()
}
