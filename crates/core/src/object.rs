//! Dynamically typed resource objects.
//!
//! Objects are kept schemaless: identity lives in [`ObjectMeta`], everything
//! else is carried as JSON in [`DynamicObject::data`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identity and versioning metadata shared by every resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique within its namespace.
    #[serde(default)]
    pub name: String,

    /// Namespace; `None` or empty for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Monotonic version assigned by the resource source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<u64>,

    /// Unique id of this incarnation of the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A resource of any kind as observed from the resource source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default)]
    pub metadata: ObjectMeta,

    /// All remaining top-level fields (`spec`, `status`, ...).
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl DynamicObject {
    /// Create an object with the given name and no payload.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            api_version: None,
            kind: None,
            metadata: ObjectMeta {
                name: name.into(),
                ..ObjectMeta::default()
            },
            data: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metadata.namespace = Some(namespace.into());
        self
    }

    /// Set the kind.
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Set the api version.
    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Set the resource version.
    #[must_use]
    pub const fn with_resource_version(mut self, version: u64) -> Self {
        self.metadata.resource_version = Some(version);
        self
    }

    /// Set a top-level payload field such as `spec`.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = &mut self.data {
            map.insert(field.into(), value);
        } else {
            let mut map = serde_json::Map::new();
            map.insert(field.into(), value);
            self.data = serde_json::Value::Object(map);
        }
        self
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Namespace, treating an empty string as cluster-scoped.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.metadata
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
    }

    /// Kind, if the object carries one.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Resource version, if assigned.
    #[must_use]
    pub const fn resource_version(&self) -> Option<u64> {
        self.metadata.resource_version
    }

    /// Whether `self` carries strictly newer state than `other`.
    ///
    /// Objects without a version are always treated as newer.
    #[must_use]
    pub fn is_newer_than(&self, other: &Self) -> bool {
        match (self.resource_version(), other.resource_version()) {
            (Some(mine), Some(theirs)) => mine > theirs,
            _ => true,
        }
    }

    /// Parse an object from YAML (JSON is accepted too).
    ///
    /// # Errors
    ///
    /// Returns `Error::ManifestParseFailed` if the document is not a valid object.
    pub fn from_yaml_str(source: impl Into<std::path::PathBuf>, text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| Error::manifest_parse_failed(source, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sets_identity() {
        let obj = DynamicObject::new("sample-1")
            .with_namespace("default")
            .with_kind("Sample")
            .with_resource_version(7);

        assert_eq!(obj.name(), "sample-1");
        assert_eq!(obj.namespace(), Some("default"));
        assert_eq!(obj.kind(), Some("Sample"));
        assert_eq!(obj.resource_version(), Some(7));
    }

    #[test]
    fn test_empty_namespace_is_cluster_scoped() {
        let obj = DynamicObject::new("node-a").with_namespace("");
        assert_eq!(obj.namespace(), None);
    }

    #[test]
    fn test_parse_yaml_manifest_keeps_payload() {
        let text = r"
apiVersion: myk8s.io/v1
kind: Sample
metadata:
  name: sample-1
  namespace: default
spec:
  replicas: 3
";
        let obj = DynamicObject::from_yaml_str("sample.yaml", text);
        assert!(obj.is_ok());
        let obj = obj.ok();
        assert_eq!(obj.as_ref().map(DynamicObject::name), Some("sample-1"));
        assert_eq!(
            obj.as_ref().and_then(|o| o.data.get("spec")).and_then(|s| s.get("replicas")),
            Some(&serde_json::json!(3))
        );
    }

    #[test]
    fn test_parse_rejects_non_object() {
        let result = DynamicObject::from_yaml_str("bad.yaml", "- just\n- a list\n");
        assert!(matches!(result, Err(Error::ManifestParseFailed { .. })));
    }

    #[test]
    fn test_is_newer_than() {
        let old = DynamicObject::new("a").with_resource_version(3);
        let new = DynamicObject::new("a").with_resource_version(4);
        assert!(new.is_newer_than(&old));
        assert!(!old.is_newer_than(&new));
        assert!(!old.is_newer_than(&old));
    }
}
