//! Canonical resource keys.
//!
//! A key is `namespace/name` for namespaced objects and `name` for
//! cluster-scoped ones. It is stable across an object's life and reused when
//! an object is deleted and recreated under the same name.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::object::DynamicObject;

/// Canonical identity of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build a key from its parts.
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Self(format!("{ns}/{name}")),
            None => Self(name.to_string()),
        }
    }

    /// Compute the key for an object.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyComputation` if the object has no name.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        if obj.name().is_empty() {
            return Err(Error::key_computation(format!(
                "object of kind '{}' has no metadata.name",
                obj.kind().unwrap_or("<unknown>")
            )));
        }
        Ok(Self::new(obj.namespace(), obj.name()))
    }

    /// Split the key into `(namespace, name)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKey` for empty segments or more than one `/`.
    pub fn split(&self) -> Result<(Option<&str>, &str)> {
        let (namespace, name) = match self.0.split_once('/') {
            None => (None, self.0.as_str()),
            Some((ns, name)) => {
                if ns.is_empty() || name.contains('/') {
                    return Err(Error::invalid_key(&self.0, "unexpected key format"));
                }
                (Some(ns), name)
            }
        };

        if name.is_empty() {
            return Err(Error::invalid_key(&self.0, "empty name"));
        }

        Ok((namespace, name))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ResourceKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for ResourceKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ResourceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaced_key() {
        let obj = DynamicObject::new("sample-1").with_namespace("default");
        let key = ResourceKey::from_object(&obj);
        assert_eq!(key.ok().map(|k| k.to_string()), Some("default/sample-1".to_string()));
    }

    #[test]
    fn test_cluster_scoped_key() {
        let obj = DynamicObject::new("node-a");
        let key = ResourceKey::from_object(&obj);
        assert_eq!(key.ok().map(|k| k.to_string()), Some("node-a".to_string()));
    }

    #[test]
    fn test_missing_name_fails() {
        let obj = DynamicObject::new("").with_namespace("default");
        assert!(matches!(
            ResourceKey::from_object(&obj),
            Err(Error::KeyComputation { .. })
        ));
    }

    #[test]
    fn test_split_round_trips_parts() {
        let key = ResourceKey::new(Some("default"), "sample-1");
        assert_eq!(key.split().ok(), Some((Some("default"), "sample-1")));

        let key = ResourceKey::new(None, "node-a");
        assert_eq!(key.split().ok(), Some((None, "node-a")));
    }

    #[test]
    fn test_split_rejects_malformed_keys() {
        for raw in ["a/b/c", "/name", "ns/", ""] {
            let key = ResourceKey::from(raw);
            assert!(
                matches!(key.split(), Err(Error::InvalidKey { .. })),
                "expected '{raw}' to be rejected"
            );
        }
    }
}
