//! Control-plane API seam
//!
//! The prober only talks to the hub cluster through [`FleetApi`]. Production
//! uses [`KubeFleetApi`]; tests substitute an in-memory fake.

use crate::crd::placement::ClusterResourcePlacement;
use crate::crd::work::Work;
use crate::probe::manifests::{BundleObject, ManifestBundle};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::core::DynamicObject;
use kube::discovery::{pinned_kind, Scope};
use kube::Client;
use thiserror::Error;
use tracing::{debug, info};

/// Label stamped on every test namespace so leftovers can be found and swept
pub const LOAD_LABEL_KEY: &str = "workload.azure.com/load";

/// API errors the prober distinguishes
///
/// "Not found" and "already exists" are classified from the structured API
/// status code, never from message text.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl ApiError {
    /// Map a kube error for `kind`/`name`, classifying 404 and 409 responses
    pub fn classify(kind: &'static str, name: &str, error: kube::Error) -> Self {
        match error {
            kube::Error::Api(err) if err.code == 404 => ApiError::NotFound {
                kind,
                name: name.to_string(),
            },
            kube::Error::Api(err) if err.code == 409 => ApiError::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            e => ApiError::Kube(e),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// Hub-cluster operations the prober needs
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn create_placement(&self, placement: &ClusterResourcePlacement)
        -> Result<(), ApiError>;

    async fn get_placement(&self, name: &str) -> Result<ClusterResourcePlacement, ApiError>;

    async fn delete_placement(&self, name: &str) -> Result<(), ApiError>;

    /// Per-cluster Work object in the cluster's reserved namespace
    async fn get_work(&self, name: &str, namespace: &str) -> Result<Work, ApiError>;

    /// Create the run's test namespace, labelled with [`LOAD_LABEL_KEY`]
    async fn create_namespace(&self, namespace: &str) -> Result<(), ApiError>;

    /// Delete a namespace and everything left in it
    async fn delete_namespace(&self, namespace: &str) -> Result<(), ApiError>;

    /// Create every object of `bundle` in `namespace`
    async fn apply_test_resources(
        &self,
        namespace: &str,
        bundle: &ManifestBundle,
    ) -> Result<(), ApiError>;

    /// Delete every object of `bundle` from `namespace`, keeping the namespace
    async fn delete_test_resources(
        &self,
        namespace: &str,
        bundle: &ManifestBundle,
    ) -> Result<(), ApiError>;
}

/// [`FleetApi`] backed by a kube client pointed at the hub cluster
#[derive(Clone)]
pub struct KubeFleetApi {
    client: Client,
}

impl KubeFleetApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn placements(&self) -> Api<ClusterResourcePlacement> {
        Api::all(self.client.clone())
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    /// Dynamic API for a bundle object, resolved through discovery
    async fn dynamic_api(
        &self,
        object: &BundleObject,
        namespace: &str,
    ) -> Result<Api<DynamicObject>, ApiError> {
        let (resource, capabilities) = pinned_kind(&self.client, &object.gvk).await?;
        let api = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        Ok(api)
    }
}

#[async_trait]
impl FleetApi for KubeFleetApi {
    async fn create_placement(
        &self,
        placement: &ClusterResourcePlacement,
    ) -> Result<(), ApiError> {
        let name = placement.metadata.name.as_deref().unwrap_or_default();
        self.placements()
            .create(&PostParams::default(), placement)
            .await
            .map_err(|e| ApiError::classify("ClusterResourcePlacement", name, e))?;
        Ok(())
    }

    async fn get_placement(&self, name: &str) -> Result<ClusterResourcePlacement, ApiError> {
        self.placements()
            .get(name)
            .await
            .map_err(|e| ApiError::classify("ClusterResourcePlacement", name, e))
    }

    async fn delete_placement(&self, name: &str) -> Result<(), ApiError> {
        self.placements()
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| ApiError::classify("ClusterResourcePlacement", name, e))?;
        Ok(())
    }

    async fn get_work(&self, name: &str, namespace: &str) -> Result<Work, ApiError> {
        let works: Api<Work> = Api::namespaced(self.client.clone(), namespace);
        works
            .get(name)
            .await
            .map_err(|e| ApiError::classify("Work", name, e))
    }

    async fn create_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(namespace.to_string()),
                labels: Some([(LOAD_LABEL_KEY.to_string(), namespace.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        };

        self.namespaces()
            .create(&PostParams::default(), &ns)
            .await
            .map_err(|e| ApiError::classify("Namespace", namespace, e))?;
        info!(namespace = %namespace, "Created test namespace");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<(), ApiError> {
        self.namespaces()
            .delete(namespace, &DeleteParams::background())
            .await
            .map_err(|e| ApiError::classify("Namespace", namespace, e))?;
        Ok(())
    }

    async fn apply_test_resources(
        &self,
        namespace: &str,
        bundle: &ManifestBundle,
    ) -> Result<(), ApiError> {
        for object in bundle.for_namespace(namespace) {
            let api = self.dynamic_api(&object, namespace).await?;
            match api.create(&PostParams::default(), &object.object).await {
                Ok(_) => {
                    debug!(
                        namespace = %namespace,
                        kind = %object.gvk.kind,
                        name = %object.name(),
                        "Created test resource"
                    );
                }
                Err(kube::Error::Api(err)) if err.code == 409 => {
                    debug!(
                        namespace = %namespace,
                        kind = %object.gvk.kind,
                        name = %object.name(),
                        "Test resource already exists"
                    );
                }
                Err(e) => return Err(ApiError::Kube(e)),
            }
        }
        Ok(())
    }

    async fn delete_test_resources(
        &self,
        namespace: &str,
        bundle: &ManifestBundle,
    ) -> Result<(), ApiError> {
        for object in bundle.for_namespace(namespace) {
            let api = self.dynamic_api(&object, namespace).await?;
            match api.delete(object.name(), &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(err)) if err.code == 404 => {
                    debug!(
                        namespace = %namespace,
                        kind = %object.gvk.kind,
                        name = %object.name(),
                        "Test resource already gone"
                    );
                }
                Err(e) => return Err(ApiError::Kube(e)),
            }
        }
        Ok(())
    }
}
