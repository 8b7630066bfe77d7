// 🔑 Identifier Deriver - name in, stable id out
//
// Identity is a pure function of (kind, trimmed name). Re-deriving on any run,
// on any machine, yields the same id, which is what lets reconciliation find
// the stored version without a separate name → id index.

use crate::entities::EntityKind;
use crate::error::RowError;
use uuid::Uuid;

/// Verb used for every relationship this tool produces
pub const USES: &str = "uses";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierDeriver {
    namespace: Uuid,
}

impl IdentifierDeriver {
    pub fn new(namespace: Uuid) -> Self {
        IdentifierDeriver { namespace }
    }

    pub fn namespace(&self) -> Uuid {
        self.namespace
    }

    /// `<type>--<uuidv5(namespace, trimmed seed)>`
    pub fn derive(&self, kind: EntityKind, seed: &str) -> Result<String, RowError> {
        let trimmed = seed.trim();
        if trimmed.is_empty() {
            return Err(RowError::InvalidSeed {
                kind: kind.type_name().to_string(),
                seed: seed.to_string(),
            });
        }

        let uuid = Uuid::new_v5(&self.namespace, trimmed.as_bytes());
        Ok(format!("{}--{}", kind.type_name(), uuid))
    }

    /// Relationship ids hash `verb + source name + target key`, in that order.
    /// Reordering the concatenation re-keys every stored relationship.
    pub fn derive_relationship(
        &self,
        verb: &str,
        source_name: &str,
        target_key: &str,
    ) -> Result<String, RowError> {
        if source_name.trim().is_empty() || target_key.trim().is_empty() {
            return Err(RowError::InvalidSeed {
                kind: EntityKind::Relationship.type_name().to_string(),
                seed: format!("{}{}{}", verb, source_name, target_key),
            });
        }

        let seed = format!("{}{}{}", verb, source_name.trim(), target_key.trim());
        self.derive(EntityKind::Relationship, &seed)
    }
}
