//! Concrete error type. See module docs on [`crate::error`] for the taxonomy.

use thiserror::Error;

/// Coarse-grained classification used for retry/propagation policy (spec §7).
///
/// Replaces the legacy pattern of detecting failure modes by matching
/// substrings in an error message ("not found in app revision"); callers
/// switch on `ErrorKind` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Definition missing from revision or live store. Recoverable by user action.
    NotFound,
    /// Decoder failure, missing required parameter, constraint violation, duplicate
    /// name, invalid field path. Fatal for the current reconcile.
    Validation,
    /// Template/trait/patch evaluation failure.
    Render,
    /// Failure to commit workflow context or load a revision. Treated as transient.
    Store,
    /// Propagated from a `TaskRunner`. Captured per-step, never aborts the engine.
    Runner,
    /// Malformed or incompatible configuration.
    Configuration,
}

impl ErrorKind {
    /// Whether a caller driving a reconciliation loop should retry after backing off.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Store | ErrorKind::Runner)
    }
}

/// Primary error type for the rendering and workflow execution core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// `LoadFromRevision` found no definition for this capability in the frozen
    /// revision's definition maps.
    #[error("capability \"{capability_name}\" (kind={capability_kind}) not found in app revision")]
    NotFoundInRevision {
        capability_name: String,
        capability_kind: String,
    },

    /// `Load` found no definition for this capability in live state.
    #[error("capability \"{capability_name}\" (kind={capability_kind}) not found")]
    NotFound {
        capability_name: String,
        capability_kind: String,
    },

    /// The capability kind requested has no loader support.
    #[error("unsupported capability kind: {kind}")]
    UnsupportedKind { kind: String },

    /// The definition's schematic union did not match any known category.
    #[error("invalid definition schema: {message}")]
    InvalidSchema { message: String },

    /// A decode, duplicate-name, missing-parameter, or constraint failure.
    #[error("component \"{component}\": {message}")]
    Validation { component: String, message: String },

    /// Required template parameters were not supplied by any source (§4.4).
    #[error("component \"{component}\": missing parameters: {}", keys.join(","))]
    MissingParameters { component: String, keys: Vec<String> },

    /// Template, trait, or patch evaluation failure (§4.3, §7).
    #[error("evaluate {stage}: {message}")]
    Render { stage: String, message: String },

    /// Workflow context commit or revision load failure; treated as transient.
    #[error("store error: {message}")]
    Store { message: String },

    /// Propagated from `TaskRunner::run`.
    #[error("step \"{step}\" failed: {message}")]
    Runner { step: String, message: String },

    /// Duplicate component/trait/auxiliary name within one application.
    #[error("duplicate {kind} name: {name}")]
    DuplicateName { kind: String, name: String },

    /// `workloadRefPath` did not resolve to a writable location on the trait object.
    #[error("invalid field path: {path}")]
    InvalidFieldPath { path: String },

    /// Invalid or incompatible configuration.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// JSON (de)serialization failure underlying any of the above.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFoundInRevision { .. } | CoreError::NotFound { .. } => {
                ErrorKind::NotFound
            }
            CoreError::UnsupportedKind { .. }
            | CoreError::InvalidSchema { .. }
            | CoreError::Validation { .. }
            | CoreError::MissingParameters { .. }
            | CoreError::DuplicateName { .. }
            | CoreError::InvalidFieldPath { .. } => ErrorKind::Validation,
            CoreError::Render { .. } => ErrorKind::Render,
            CoreError::Store { .. } => ErrorKind::Store,
            CoreError::Runner { .. } => ErrorKind::Runner,
            CoreError::Configuration { .. } => ErrorKind::Configuration,
            CoreError::Serialization(_) => ErrorKind::Validation,
        }
    }

    pub fn not_found(capability_kind: impl Into<String>, capability_name: impl Into<String>) -> Self {
        CoreError::NotFound {
            capability_name: capability_name.into(),
            capability_kind: capability_kind.into(),
        }
    }

    pub fn not_found_in_revision(
        capability_kind: impl Into<String>,
        capability_name: impl Into<String>,
    ) -> Self {
        CoreError::NotFoundInRevision {
            capability_name: capability_name.into(),
            capability_kind: capability_kind.into(),
        }
    }

    pub fn unsupported_kind(kind: impl Into<String>) -> Self {
        CoreError::UnsupportedKind { kind: kind.into() }
    }

    pub fn invalid_schema(message: impl Into<String>) -> Self {
        CoreError::InvalidSchema { message: message.into() }
    }

    pub fn validation(component: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Validation {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn missing_parameters(component: impl Into<String>, keys: Vec<String>) -> Self {
        CoreError::MissingParameters {
            component: component.into(),
            keys,
        }
    }

    pub fn render(stage: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Render {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        CoreError::Store { message: message.into() }
    }

    pub fn runner(step: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Runner {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn duplicate(kind: impl Into<String>, name: impl Into<String>) -> Self {
        CoreError::DuplicateName {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn invalid_field_path(path: impl Into<String>) -> Self {
        CoreError::InvalidFieldPath { path: path.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        CoreError::Configuration { message: message.into() }
    }

    /// `IsNotFoundInAppRevision` equivalent — a typed check instead of a substring match.
    pub fn is_not_found_in_app_revision(&self) -> bool {
        matches!(self, CoreError::NotFoundInRevision { .. })
    }
}
