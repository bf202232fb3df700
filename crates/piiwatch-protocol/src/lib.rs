//! Shared data model for the piiwatch pipeline: candidate findings, verified
//! records, and the identity keys the dedup stores are keyed by.

use serde::{Deserialize, Serialize};

/// Category of a detected finding.
///
/// The first group comes from the fixed pattern set; `Person`, `Location`
/// and `Organization` are produced by the entity model. Serialized names are
/// the store's `type` column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    Card,
    Account,
    ApiKey,
    InternalIp,
    Person,
    Location,
    Organization,
}

impl PiiType {
    /// Map an entity-model category string onto the shared schema.
    ///
    /// Returns `None` for categories the pipeline does not track; callers
    /// drop those findings rather than guessing a type.
    pub fn from_model_category(category: &str) -> Option<Self> {
        match category.to_ascii_uppercase().as_str() {
            "PS" | "PER" | "PERSON" => Some(Self::Person),
            "LC" | "LOC" | "LOCATION" => Some(Self::Location),
            "OG" | "ORG" | "ORGANIZATION" => Some(Self::Organization),
            _ => None,
        }
    }
}

/// Verdict assigned to a candidate by the verification stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Label {
    Leak,
    Public,
    /// The oracle call failed; `reason` carries the error detail. Error rows
    /// are kept in Verified so the failure is visible, but never trained on.
    Error,
}

/// An unverified finding with its surrounding context.
///
/// Immutable once created; identity is `(content, source_url)` so the same
/// string leaking from two different pages is tracked per page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "type")]
    pub kind: PiiType,
    pub content: String,
    pub context: String,
    pub source_url: String,
    pub source_group: String,
}

impl Candidate {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            content: self.content.clone(),
            source_url: self.source_url.clone(),
        }
    }

    /// Attach a verification verdict, consuming the candidate.
    pub fn into_verified(self, label: Label, reason: impl Into<String>) -> VerifiedRecord {
        VerifiedRecord {
            kind: self.kind,
            content: self.content,
            context: self.context,
            source_url: self.source_url,
            source_group: self.source_group,
            label,
            reason: reason.into(),
        }
    }
}

/// A candidate plus the oracle's verdict. Append-only once written.
///
/// Fields are flat (not nested) because the Verified store is a tabular
/// file whose columns are the candidate columns plus `label` and `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedRecord {
    #[serde(rename = "type")]
    pub kind: PiiType,
    pub content: String,
    pub context: String,
    pub source_url: String,
    pub source_group: String,
    pub label: Label,
    pub reason: String,
}

impl VerifiedRecord {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            content: self.content.clone(),
            source_url: self.source_url.clone(),
        }
    }
}

/// The `(content, source_url)` pair the dedup stores are keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
    pub content: String,
    pub source_url: String,
}

impl IdentityKey {
    pub fn new(content: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source_url: source_url.into(),
        }
    }

    /// Render the ledger form used by the trained-marker store.
    ///
    /// Marker lines are compared as whole strings, never parsed back into
    /// fields, so a `|` inside `content` cannot corrupt a dedup decision.
    pub fn marker_line(&self) -> String {
        format!("{}|{}", self.content, self.source_url)
    }
}
