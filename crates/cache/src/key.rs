//! Deterministic cache keys.
//!
//! A storage key is `<class>:<scope>:<sha256(lookup)>`. The scope is
//! escaped so a prefix delete for one scope never reaches another.

use sha2::{Digest, Sha256};

use crate::DataClass;

/// A lookup within one scope, before the data class is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    scope: String,
    digest: String,
}

impl CacheKey {
    /// Hash `lookup` after canonicalizing whitespace.
    pub fn new(scope: &str, lookup: &str) -> Self {
        Self::from_parts(scope, &[lookup])
    }

    /// Composite lookup, e.g. profile + content type.
    pub fn from_parts(scope: &str, parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                hasher.update([0x1f]);
            }
            hasher.update(canonicalize(part).as_bytes());
        }
        Self {
            scope: escape_scope(scope),
            digest: hex::encode(hasher.finalize()),
        }
    }

    pub fn storage_key(&self, class: DataClass) -> String {
        format!("{}{}", scope_prefix(class, Some(&self.scope)), self.digest)
    }
}

/// Prefix covering a class, or one scope inside it.
pub(crate) fn scope_prefix(class: DataClass, escaped_scope: Option<&str>) -> String {
    match escaped_scope {
        Some(scope) => format!("{}:{}:", class.as_str(), scope),
        None => format!("{}:", class.as_str()),
    }
}

pub(crate) fn escape_scope(scope: &str) -> String {
    scope.replace('%', "%25").replace(':', "%3A")
}

fn canonicalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_does_not_change_the_key() {
        let a = CacheKey::new("acme", "welcome   email\nguidance ");
        let b = CacheKey::new("acme", "welcome email guidance");
        assert_eq!(a, b);
    }

    #[test]
    fn scope_and_class_partition_keys() {
        let key = CacheKey::new("acme", "q");
        assert!(key.storage_key(DataClass::Augmentation).starts_with("augmentation:acme:"));
        assert_ne!(
            key.storage_key(DataClass::Augmentation),
            key.storage_key(DataClass::Embedding)
        );
        assert_ne!(CacheKey::new("acme", "q"), CacheKey::new("globex", "q"));
    }

    #[test]
    fn composite_parts_are_delimited() {
        assert_ne!(
            CacheKey::from_parts("s", &["ab", "c"]),
            CacheKey::from_parts("s", &["a", "bc"])
        );
    }

    #[test]
    fn colons_in_scope_are_escaped() {
        let key = CacheKey::new("acme:eu", "q");
        assert!(key.storage_key(DataClass::ReferenceData).starts_with("reference-data:acme%3Aeu:"));
    }
}
