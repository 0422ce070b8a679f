//! The immutable snapshot handed to a run at start time.

use serde::{Deserialize, Serialize};

use super::candidate::Candidate;
use super::migration::StepDefinition;

/// Snapshot of a migration's step list plus one candidate, captured at
/// `Start` time. Later mutations to the Migration (re-announce) never
/// affect an in-flight run — the run only ever sees this manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationManifest {
    pub migration_id: String,
    pub steps: Vec<StepDefinition>,
    pub candidate: Candidate,
    pub migrator_url: String,
}

impl MigrationManifest {
    /// The run's instance id, `{migrationId}__{candidateId}` — the
    /// deduplication key enforcing at most one active run per candidate.
    pub fn instance_id(&self) -> String {
        instance_id(&self.migration_id, &self.candidate.id)
    }
}

/// Derives the internal run identity. Never exposed in API responses.
pub fn instance_id(migration_id: &str, candidate_id: &str) -> String {
    format!("{migration_id}__{candidate_id}")
}

/// The branch-name convention migrators are expected to follow; the server
/// only ever embeds this string in dispatch requests, it never parses it.
pub fn branch_name(migration_id: &str, step_name: &str, candidate_id: &str) -> String {
    format!("loom/{migration_id}/{step_name}--{candidate_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_joins_with_double_underscore() {
        assert_eq!(instance_id("m1", "c1"), "m1__c1");
    }

    #[test]
    fn branch_name_follows_convention() {
        assert_eq!(branch_name("m1", "update", "c1"), "loom/m1/update--c1");
    }
}
