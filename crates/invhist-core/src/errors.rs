use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every error that crosses a crate boundary is classified by one of these
/// kinds. The kind decides what the reconciler does with it: transient kinds
/// are handed back to the orchestrator for retry, `MalformedInput` skips a
/// single resource, `ConsistencyViolation` aborts a single resource's
/// transaction and is logged for alerting, `StaleSweep` is only a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExErrorKind {
    // Input
    /// Raw snapshot could not be normalized
    MalformedInput,
    /// Schema descriptor failed validation
    InvalidSchema,
    /// Resource kind not registered with the engine
    UnknownKind,
    NotFound,

    // Versioning
    /// An open history row was missing (or unexpectedly present)
    ConsistencyViolation,
    /// Closing/deleting a stale resource failed
    StaleSweep,
    /// Registered DDL for a kind disagrees with the descriptor
    ChecksumMismatch,

    // Integration/IO
    Io,
    Serialization,
    Persistence,
    ExternalService,
    Timeout,
    Concurrency,
    Cancelled,

    // Configuration
    InvalidConfig,

    // Internal
    Internal,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::MalformedInput => "ERR_MALFORMED_INPUT",
            ExErrorKind::InvalidSchema => "ERR_INVALID_SCHEMA",
            ExErrorKind::UnknownKind => "ERR_UNKNOWN_KIND",
            ExErrorKind::NotFound => "ERR_NOT_FOUND",
            ExErrorKind::ConsistencyViolation => "ERR_CONSISTENCY_VIOLATION",
            ExErrorKind::StaleSweep => "ERR_STALE_SWEEP",
            ExErrorKind::ChecksumMismatch => "ERR_CHECKSUM_MISMATCH",
            ExErrorKind::Io => "ERR_IO",
            ExErrorKind::Serialization => "ERR_SERIALIZATION",
            ExErrorKind::Persistence => "ERR_PERSISTENCE",
            ExErrorKind::ExternalService => "ERR_EXTERNAL_SERVICE",
            ExErrorKind::Timeout => "ERR_TIMEOUT",
            ExErrorKind::Concurrency => "ERR_CONCURRENCY",
            ExErrorKind::Cancelled => "ERR_CANCELLED",
            ExErrorKind::InvalidConfig => "ERR_INVALID_CONFIG",
            ExErrorKind::Internal => "ERR_INTERNAL",
        }
    }

    /// Whether the orchestrator may retry the cycle that produced this error.
    ///
    /// The engine itself never retries; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExErrorKind::Io
                | ExErrorKind::Persistence
                | ExErrorKind::ExternalService
                | ExErrorKind::Timeout
                | ExErrorKind::Concurrency
        )
    }
}

/// Canonical structured error type
///
/// Carries a classification plus optional resource context so that a log
/// line for a failed upsert names the kind, scope and resource involved.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    resource_kind: Option<String>,
    resource_id: Option<String>,
    scope: Option<String>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            resource_kind: None,
            resource_id: None,
            scope: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add resource kind context (e.g. `compute_instance`)
    pub fn with_resource_kind(mut self, kind: impl Into<String>) -> Self {
        self.resource_kind = Some(kind.into());
        self
    }

    /// Add resource ID context
    pub fn with_resource_id(mut self, id: impl Into<String>) -> Self {
        self.resource_id = Some(id.into());
        self
    }

    /// Add scope context
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn resource_kind(&self) -> Option<&str> {
        self.resource_kind.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(kind) = &self.resource_kind {
            write!(f, " (resource_kind: {})", kind)?;
        }
        if let Some(id) = &self.resource_id {
            write!(f, " (resource_id: {})", id)?;
        }
        if let Some(scope) = &self.scope {
            write!(f, " (scope: {})", scope)?;
        }
        if let Some(source) = &self.source {
            write!(f, " caused by {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Failures raised while turning a raw snapshot into a canonical resource
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    /// Raw resource has no usable identity
    #[error("Resource ID is missing or empty")]
    MissingId,

    /// A declared field received a value of the wrong type
    #[error("Field '{field}' expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: String,
    },

    /// Floats must be finite to round-trip through the store
    #[error("Field '{field}' is not a finite number")]
    NonFiniteNumber { field: String },

    /// Mapper produced a field the schema does not declare
    #[error("Field '{field}' is not declared by the schema")]
    UndeclaredField { field: String },

    /// Mapper produced a child collection the schema does not declare
    #[error("Child kind '{child}' is not declared by the schema")]
    UndeclaredChild { child: String },

    /// A child record is missing part of its natural key
    #[error("Child '{child}' record is missing natural key field '{field}'")]
    MissingNaturalKey { child: String, field: String },

    /// Opaque blob could not be serialized
    #[error("Failed to serialize opaque field '{field}': {reason}")]
    Serialization { field: String, reason: String },

    /// Per-kind mapping rejected the raw payload
    #[error("Raw payload rejected: {reason}")]
    Rejected { reason: String },
}

impl From<NormalizeError> for ExError {
    fn from(err: NormalizeError) -> Self {
        let kind = match err {
            NormalizeError::Serialization { .. } => ExErrorKind::Serialization,
            _ => ExErrorKind::MalformedInput,
        };
        ExError::new(kind)
            .with_op("normalize")
            .with_message(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds_are_retryable() {
        for kind in [
            ExErrorKind::Io,
            ExErrorKind::Persistence,
            ExErrorKind::ExternalService,
            ExErrorKind::Timeout,
            ExErrorKind::Concurrency,
        ] {
            assert!(kind.is_retryable(), "{:?} should be retryable", kind);
        }
    }

    #[test]
    fn test_consistency_violation_is_not_retryable() {
        assert!(!ExErrorKind::ConsistencyViolation.is_retryable());
        assert!(!ExErrorKind::MalformedInput.is_retryable());
        assert!(!ExErrorKind::Cancelled.is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ExError::new(ExErrorKind::ConsistencyViolation)
            .with_op("upsert")
            .with_resource_kind("compute_instance")
            .with_resource_id("i-1")
            .with_message("no open history row");

        let rendered = err.to_string();
        assert!(rendered.starts_with("[ERR_CONSISTENCY_VIOLATION]"));
        assert!(rendered.contains("'upsert'"));
        assert!(rendered.contains("resource_id: i-1"));
    }

    #[test]
    fn test_normalize_error_maps_to_malformed_input() {
        let ex: ExError = NormalizeError::MissingId.into();
        assert_eq!(ex.kind(), ExErrorKind::MalformedInput);
        assert_eq!(ex.op(), Some("normalize"));

        let ex: ExError = NormalizeError::Serialization {
            field: "metadata".to_string(),
            reason: "boom".to_string(),
        }
        .into();
        assert_eq!(ex.kind(), ExErrorKind::Serialization);
    }

    #[test]
    fn test_source_chain() {
        let inner = ExError::new(ExErrorKind::Persistence).with_message("disk I/O error");
        let outer = ExError::new(ExErrorKind::StaleSweep).with_source(inner);

        assert_eq!(
            outer.source_error().map(|e| e.kind()),
            Some(ExErrorKind::Persistence)
        );
        assert!(std::error::Error::source(&outer).is_some());
    }
}
