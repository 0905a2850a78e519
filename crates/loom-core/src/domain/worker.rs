//! Worker: an execution backend with a capability descriptor.

use std::collections::BTreeSet;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::ids::WorkerId;

/// What a worker can do, as seen by the matcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Skill tags, compared case-insensitively by the rule-based fallback.
    #[serde(default)]
    pub skills: BTreeSet<String>,

    /// Free text used for the document-side embedding.
    #[serde(default)]
    pub description: String,
}

impl CapabilityDescriptor {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            skills: BTreeSet::new(),
            description: description.into(),
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.insert(skill.into());
        self
    }

    /// Text sent to the embedding service (document side).
    pub fn embedding_text(&self) -> String {
        if self.skills.is_empty() {
            return self.description.clone();
        }
        let skills: Vec<&str> = self.skills.iter().map(String::as_str).collect();
        format!("{}\nskills: {}", self.description, skills.join(", "))
    }

    /// Changes whenever the descriptor changes; the embedding cache keys on it.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub capabilities: CapabilityDescriptor,

    /// Tasks currently assigned; lower wins ties.
    #[serde(default)]
    pub load: u32,
}

impl Worker {
    pub fn new(name: impl Into<String>, capabilities: CapabilityDescriptor) -> Self {
        Self {
            id: WorkerId::generate(),
            name: name.into(),
            capabilities,
            load: 0,
        }
    }

    pub fn with_load(mut self, load: u32) -> Self {
        self.load = load;
        self
    }
}
