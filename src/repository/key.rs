use std::fmt;

use sha2::{Digest, Sha256};

/// Separator placed between the parts of a derived key before hashing.
pub const DERIVED_KEY_SEPARATOR: &str = "-";

/// Identity of a cached record.
///
/// - [`Key::Explicit`] renders the caller's string verbatim.
/// - [`Key::Derived`] renders the lower-case hex SHA-256 of its parts joined with `-`,
///   in the order given.
///
/// ```rust
/// use feedgen::repository::Key;
///
/// let a = Key::derived(["A", "B", "C"]);
/// assert_eq!(a.render(), Key::derived(["A", "B", "C"]).render());
/// assert_ne!(a.render(), Key::derived(["A", "B", "D"]).render());
/// assert_eq!(Key::explicit("post-1").render(), "post-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Explicit(String),
    Derived(Vec<String>),
}

impl Key {
    pub fn explicit(id: impl Into<String>) -> Self {
        Self::Explicit(id.into())
    }

    pub fn derived<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Derived(parts.into_iter().map(Into::into).collect())
    }

    /// The string used to address the record in storage.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Explicit(id) => id.clone(),
            Self::Derived(parts) => {
                let mut hasher = Sha256::new();
                hasher.update(parts.join(DERIVED_KEY_SEPARATOR).as_bytes());
                hex::encode(hasher.finalize())
            }
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
