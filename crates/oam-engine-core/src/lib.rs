//! Core data model, error taxonomy, process context, configuration, and the
//! external-collaborator boundary traits shared by the rendering and workflow
//! crates.

pub mod config;
pub mod error;
pub mod models;
pub mod process;
pub mod registry;
pub mod testing;

/// Commonly used types, re-exported for `use oam_engine_core::prelude::*;`.
pub mod prelude {
    pub use crate::config::{BackoffConfig, EngineConfig, RunnerConfig};
    pub use crate::error::{CoreError, ErrorKind, Result};
    pub use crate::models::{
        AuxiliaryOutput, CapabilityKind, Component, ComponentManifest, InfraTemplateType,
        ParsedAppfile, PolicySpec, StepInput, StepOutput, StepPhase, StepStatus, Template,
        TemplateCategory, Trait, WorkflowMode, WorkflowStatus, WorkflowStepSpec, WorkloadGvk,
    };
    pub use crate::process::{AppMeta, ProcessContext};
    pub use crate::registry::{ClusterGateway, DefinitionRecord, DefinitionStore, ObjectKey};
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
