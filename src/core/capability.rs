//! Capability tags for task-to-agent matching.

use serde::{Deserialize, Serialize};

/// A named skill an agent declares and a task may require.
///
/// Capabilities are matched by normalized name (trimmed, lowercase), so
/// `"Code"` and `"code"` refer to the same capability. Ordering is
/// lexicographic on the normalized name, which makes capability-derived
/// decisions (dominant capability, tie-breaks) deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability from a name, normalizing case and whitespace.
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_ascii_lowercase())
    }

    /// The normalized capability name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive keyword match against this capability's name.
    pub fn matches_keyword(&self, word: &str) -> bool {
        self.0 == word.trim().to_ascii_lowercase()
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Capability {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}
