//! Migration and step definitions.
//!
//! A Migration is announced by a migrator process and describes the ordered
//! list of steps every candidate of that migration will walk through.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::candidate::Candidate;

/// One step in a migration's step list. Order within `Migration::steps` is
/// the execution order; the server never reorders or parallelizes steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Stable name, unique within the migration.
    pub name: String,
    pub description: Option<String>,
    /// Logical routing key owned by the migrator; opaque to the server.
    pub migrator_app: String,
    /// Recognized key `type` selects the migrator's handler for this step.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

/// A required operator-supplied input, declared by the migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequiredInput {
    pub name: String,
    pub label: String,
    pub description: Option<String>,
}

/// An optional descriptive phase shown in the console overview; purely
/// informational and never consulted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewPhase {
    pub name: String,
    pub description: Option<String>,
}

/// A migration definition as announced by its owning migrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub migrator_url: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub required_inputs: Vec<RequiredInput>,
    #[serde(default)]
    pub overview: Vec<OverviewPhase>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Migration {
    /// Builds a fresh migration from an announcement, carrying a new
    /// `created_at`/`updated_at` pair. Callers re-announcing an existing
    /// migration are expected to preserve the original `created_at` when
    /// persisting (see `Store::save_migration`).
    pub fn from_announcement(a: MigrationAnnouncement, now: DateTime<Utc>) -> Self {
        Self {
            id: a.id,
            name: a.name,
            description: a.description,
            migrator_url: a.migrator_url,
            steps: a.steps,
            required_inputs: a.required_inputs,
            overview: a.overview,
            created_at: now,
            updated_at: now,
        }
    }

    /// True if `name` is a recognized required-input key for this migration.
    pub fn is_known_input(&self, name: &str) -> bool {
        self.required_inputs.iter().any(|r| r.name == name)
    }
}

/// Wire payload for `POST /registry/announce`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationAnnouncement {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub migrator_url: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub required_inputs: Vec<RequiredInput>,
    #[serde(default)]
    pub overview: Vec<OverviewPhase>,
}

/// A migration bundled with its candidates, as returned by the console API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationWithCandidates {
    #[serde(flatten)]
    pub migration: Migration,
    pub candidates: Vec<Candidate>,
}
