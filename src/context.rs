//! Per-invocation state threaded through every stage.

use std::collections::BTreeMap;

use crate::registry::RegistryTable;
use crate::slug::SlugGenerator;

/// Mutable state of one pipeline invocation.
///
/// Accumulators are mutated only between batches.
#[derive(Debug, Default)]
pub struct RunContext {
    /// Registry bit positions.
    pub registries: RegistryTable,
    /// Slugs issued so far.
    pub slugs: SlugGenerator,
    /// Registry resource id to display name.
    pub registry_directory: BTreeMap<String, String>,
    /// Whether publishing restrictions are bypassed.
    pub include_private: bool,
}

impl RunContext {
    /// Fresh context.
    pub fn new(include_private: bool) -> Self {
        Self {
            include_private,
            ..Self::default()
        }
    }

    /// Fresh context replaying a persisted registry table.
    pub fn with_registries(registries: RegistryTable, include_private: bool) -> Self {
        Self {
            registries,
            include_private,
            ..Self::default()
        }
    }

    /// Resolve a registry reference given either as a resource id or a name.
    pub fn registry_name<'a>(&'a self, reference: &'a str) -> &'a str {
        self.registry_directory
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_name_lookup() {
        let mut ctx = RunContext::new(false);
        ctx.registry_directory
            .insert("r-1".into(), "Record of Monuments".into());
        assert_eq!(ctx.registry_name("r-1"), "Record of Monuments");
        assert_eq!(ctx.registry_name("Listed Buildings"), "Listed Buildings");
    }
}
