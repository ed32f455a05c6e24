//! Shared immutable path keys.
//!
//! Entry names and computed wholenames are used as map keys all over the
//! view: child maps, suffix buckets, dedup sets. `PathKey` makes those
//! keys cheap to clone and byte-identical to compare. Case sensitivity
//! is a per-root query concern, never a property of the key itself.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// An immutable, shared string key.
///
/// Equality and hashing are byte-exact; case-insensitive comparison is
/// an explicit separate operation used only when the owning root is
/// configured case-insensitive.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathKey(Arc<str>);

impl PathKey {
    pub fn new(value: &str) -> Self {
        Self(Arc::from(value))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenates `self` and `leaf` with a `/` separator.
    ///
    /// An empty key names the root directory, so joining onto it yields
    /// the leaf alone.
    pub fn join(&self, leaf: &str) -> PathKey {
        if self.0.is_empty() {
            PathKey::new(leaf)
        } else {
            PathKey(Arc::from(format!("{}/{}", self.0, leaf)))
        }
    }

    /// Byte-wise case-insensitive equality (ASCII fold).
    pub fn eq_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }

    /// Returns a lowercased copy of this key.
    pub fn to_lowercase_key(&self) -> PathKey {
        PathKey(Arc::from(self.0.to_ascii_lowercase()))
    }

    /// The lowercased suffix of a leaf name: the text after the final
    /// `.`, provided it is non-empty and not the whole name.
    pub fn suffix_of(name: &str) -> Option<PathKey> {
        let dot = name.rfind('.')?;
        let suffix = &name[dot + 1..];
        if dot == 0 || suffix.is_empty() {
            return None;
        }
        Some(PathKey(Arc::from(suffix.to_ascii_lowercase())))
    }
}

impl Hash for PathKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Delegate to str so `Borrow<str>` map lookups agree.
        self.0.hash(state)
    }
}

impl Borrow<str> for PathKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PathKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PathKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl PartialEq<str> for PathKey {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn join_handles_root() {
        let root = PathKey::new("");
        assert_eq!(root.join("src").as_str(), "src");
        assert_eq!(PathKey::new("src").join("main.rs").as_str(), "src/main.rs");
    }

    #[test]
    fn suffix_extraction() {
        assert_eq!(PathKey::suffix_of("a.TXT").unwrap().as_str(), "txt");
        assert_eq!(PathKey::suffix_of("archive.tar.gz").unwrap().as_str(), "gz");
        assert!(PathKey::suffix_of("Makefile").is_none());
        assert!(PathKey::suffix_of(".gitignore").is_none());
        assert!(PathKey::suffix_of("trailing.").is_none());
    }

    #[test]
    fn map_lookup_by_str() {
        let mut map: HashMap<PathKey, i32> = HashMap::new();
        map.insert(PathKey::new("main.rs"), 1);
        assert_eq!(map.get("main.rs"), Some(&1));
        assert_eq!(map.get("other.rs"), None);
    }

    #[test]
    fn case_insensitive_compare_is_explicit() {
        let key = PathKey::new("README.md");
        assert!(key.eq_ignore_case("readme.MD"));
        assert_ne!(key, *"readme.md");
    }
}
