//! Errors shared by the envelope and outbox persistence ports.

use courier_shared::EnvelopeId;

/// Errores de persistencia
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Record not found: {entity} {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Unique constraint violated on {constraint}: {value}")]
    Conflict { constraint: &'static str, value: String },

    #[error("Execution log of envelope {envelope_id} is append-only; existing entries were modified")]
    AuditTrailRewritten { envelope_id: EnvelopeId },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl RepositoryError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// True when a concurrent writer won a uniqueness race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let conflict = RepositoryError::Conflict {
            constraint: "idempotency_key",
            value: "cmd:abc".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!RepositoryError::unavailable("down").is_conflict());
    }

    #[test]
    fn test_audit_error_names_envelope() {
        let id = EnvelopeId::new();
        let err = RepositoryError::AuditTrailRewritten { envelope_id: id };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
