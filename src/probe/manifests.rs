//! Placement templates and auxiliary test-resource bundles
//!
//! Both are plain YAML. The bundle may hold several documents; each one becomes
//! a namespaced object created inside the probe run's test namespace.

use crate::crd::placement::{ClusterResourcePlacement, ClusterResourceSelector};
use kube::core::{DynamicObject, GroupVersionKind};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

const BUILTIN_TEST_RESOURCES: &str = include_str!("../../manifests/test-resources.yaml");

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid manifest: {0}")]
    Invalid(String),
}

/// One object of a bundle, with its resolved group/version/kind
#[derive(Debug, Clone)]
pub struct BundleObject {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
}

impl BundleObject {
    pub fn name(&self) -> &str {
        self.object.metadata.name.as_deref().unwrap_or_default()
    }
}

/// Namespaced test resources created for each probe run
#[derive(Debug, Clone, Default)]
pub struct ManifestBundle {
    objects: Vec<BundleObject>,
}

impl ManifestBundle {
    /// Parse a (possibly multi-document) YAML bundle
    ///
    /// Empty documents are skipped. Every object needs `apiVersion`, `kind`
    /// and `metadata.name`; any `metadata.namespace` is overridden per run.
    pub fn from_yaml(yaml: &str) -> Result<Self, ManifestError> {
        let mut objects = Vec::new();

        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }
            let object: DynamicObject = serde_yaml::from_value(value)?;
            objects.push(resolve(object)?);
        }

        Ok(Self { objects })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        Self::from_yaml(&read(path.as_ref())?)
    }

    /// ConfigMap, Secret and Role shipped with the binary
    pub fn builtin() -> Result<Self, ManifestError> {
        Self::from_yaml(BUILTIN_TEST_RESOURCES)
    }

    pub fn objects(&self) -> &[BundleObject] {
        &self.objects
    }

    /// Copies of every object placed into `namespace`
    pub fn for_namespace(&self, namespace: &str) -> Vec<BundleObject> {
        self.objects
            .iter()
            .map(|o| {
                let mut o = o.clone();
                o.object.metadata.namespace = Some(namespace.to_string());
                o.object.metadata.resource_version = None;
                o.object.metadata.uid = None;
                o
            })
            .collect()
    }
}

fn resolve(object: DynamicObject) -> Result<BundleObject, ManifestError> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| ManifestError::Invalid("object without apiVersion/kind".to_string()))?;

    if object.metadata.name.as_deref().unwrap_or_default().is_empty() {
        return Err(ManifestError::Invalid(format!(
            "{} without metadata.name",
            types.kind
        )));
    }

    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    if version.is_empty() || types.kind.is_empty() {
        return Err(ManifestError::Invalid(format!(
            "bad apiVersion/kind: {}/{}",
            types.api_version, types.kind
        )));
    }

    let gvk = GroupVersionKind::gvk(group, version, &types.kind);
    Ok(BundleObject { gvk, object })
}

fn read(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Load the placement template the prober stamps out for every run
pub fn load_placement_template(
    path: impl AsRef<Path>,
) -> Result<ClusterResourcePlacement, ManifestError> {
    parse_placement_template(&read(path.as_ref())?)
}

pub fn parse_placement_template(yaml: &str) -> Result<ClusterResourcePlacement, ManifestError> {
    let placement: ClusterResourcePlacement = serde_yaml::from_str(yaml)?;
    Ok(placement)
}

/// Stamp a run's placement out of the template
///
/// The name is replaced, server-populated metadata and status are dropped, and
/// when `test_namespace` is set a selector for that namespace is appended so
/// the run's test resources are propagated along with the template's own
/// selections.
pub fn build_placement(
    template: &ClusterResourcePlacement,
    name: &str,
    test_namespace: Option<&str>,
) -> ClusterResourcePlacement {
    let mut spec = template.spec.clone();
    if let Some(namespace) = test_namespace {
        spec.resource_selectors
            .push(ClusterResourceSelector::namespace(namespace));
    }

    let mut placement = ClusterResourcePlacement::new(name, spec);
    placement.metadata.labels = template.metadata.labels.clone();
    placement.metadata.annotations = template.metadata.annotations.clone();
    placement
}
