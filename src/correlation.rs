use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier tying one outstanding request to its single reply.
///
/// The id is opaque and caller-chosen. It is also used as the affinity of the
/// reply queue, so two exchanges with different ids never share a reply
/// destination. It should therefore not contain `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// A fresh random id, suitable as a reply-queue affinity.
    pub fn generate() -> Self {
        Uuid::new_v4().into()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<Uuid> for CorrelationId {
    fn from(id: Uuid) -> Self {
        Self(id.hyphenated().to_string())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_generated_ids_differ() {
        // ---
        let ids: std::collections::HashSet<_> =
            (0..64).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 64);
    }

    #[test]
    fn test_generated_id_is_a_single_path_segment() {
        // ---
        let id = CorrelationId::generate();
        let s = id.to_string();
        assert_eq!(s.len(), 36);
        assert!(!s.contains('/'));
    }

    #[test]
    fn test_caller_chosen_id_is_kept_verbatim() {
        // ---
        let id = CorrelationId::from("corr1");
        assert_eq!(id.as_str(), "corr1");
        assert_eq!(id, CorrelationId::from("corr1".to_string()));
    }
}
