//! The object store contract and its Kubernetes-backed implementation.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::core::ErrorResponse;
use kube::{Client, Resource};
use thiserror::Error;

/// Identity of an object in the store: name plus namespace for namespaced
/// kinds, name alone for cluster-scoped ones. Renders as `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectKey {
    /// Reads the key out of object metadata. `None` when the name is missing
    /// or empty.
    pub fn from_meta(meta: &ObjectMeta) -> Option<Self> {
        let name = meta.name.as_deref().filter(|n| !n.is_empty())?;
        Some(ObjectKey {
            name: name.to_owned(),
            namespace: meta.namespace.clone(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Failures surfaced by an object store.
///
/// Absence on fetch is not one of these; [`ObjectStore::fetch`] reports it
/// as `Ok(None)`. The named variants cover the write-side outcomes a caller
/// may need to tell apart; everything else stays in [`StoreError::Api`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists")]
    AlreadyExists,
    #[error("conflict with a newer stored version")]
    Conflict,
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error("request timed out")]
    Timeout,
    #[error("api request failed: {0}")]
    Api(#[source] kube::Error),
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        if let kube::Error::Api(ErrorResponse { reason, message, .. }) = &err {
            match reason.as_str() {
                "NotFound" => return StoreError::NotFound,
                "AlreadyExists" => return StoreError::AlreadyExists,
                "Conflict" => return StoreError::Conflict,
                "Invalid" | "BadRequest" => return StoreError::Invalid(message.clone()),
                "Timeout" | "ServerTimeout" => return StoreError::Timeout,
                _ => {}
            }
        }
        StoreError::Api(err)
    }
}

/// Capability a store must provide for reconciliation.
///
/// `fetch` reports absence structurally, so callers branch on existence
/// without inspecting error variants. `create` and `update` are single
/// atomic writes: create fails [`StoreError::AlreadyExists`] on a taken
/// key, update fails [`StoreError::NotFound`] on a missing one.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    async fn create(&self, object: &K) -> Result<(), StoreError>;

    async fn update(&self, object: &K) -> Result<(), StoreError>;
}

/// Store backed by the Kubernetes API server.
///
/// Updates go out as full replaces. The reconciler sends back a mutated
/// clone of what it fetched, so the payload carries the fetched
/// `resourceVersion` and the API server's optimistic concurrency check
/// applies; a stale version surfaces as [`StoreError::Conflict`].
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        KubeStore { client }
    }

    /// Connects using the local kubeconfig or the in-cluster environment.
    pub async fn try_default() -> kube::Result<Self> {
        Ok(KubeStore {
            client: Client::try_default().await?,
        })
    }

    fn api_for<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

fn write_key(meta: &ObjectMeta) -> Result<ObjectKey, StoreError> {
    ObjectKey::from_meta(meta)
        .ok_or_else(|| StoreError::Invalid("missing .metadata.name".to_owned()))
}

#[async_trait]
impl ObjectStore<Namespace> for KubeStore {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<Namespace>, StoreError> {
        let api = Api::<Namespace>::all(self.client.clone());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, object: &Namespace) -> Result<(), StoreError> {
        let api = Api::<Namespace>::all(self.client.clone());
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }

    async fn update(&self, object: &Namespace) -> Result<(), StoreError> {
        let key = write_key(object.meta())?;
        let api = Api::<Namespace>::all(self.client.clone());
        api.replace(&key.name, &PostParams::default(), object)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore<ServiceAccount> for KubeStore {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<ServiceAccount>, StoreError> {
        let api: Api<ServiceAccount> = self.api_for(key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, object: &ServiceAccount) -> Result<(), StoreError> {
        let key = write_key(object.meta())?;
        let api: Api<ServiceAccount> = self.api_for(key.namespace.as_deref());
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }

    async fn update(&self, object: &ServiceAccount) -> Result<(), StoreError> {
        let key = write_key(object.meta())?;
        let api: Api<ServiceAccount> = self.api_for(key.namespace.as_deref());
        api.replace(&key.name, &PostParams::default(), object)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore<ConfigMap> for KubeStore {
    async fn fetch(&self, key: &ObjectKey) -> Result<Option<ConfigMap>, StoreError> {
        let api: Api<ConfigMap> = self.api_for(key.namespace.as_deref());
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create(&self, object: &ConfigMap) -> Result<(), StoreError> {
        let key = write_key(object.meta())?;
        let api: Api<ConfigMap> = self.api_for(key.namespace.as_deref());
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }

    async fn update(&self, object: &ConfigMap) -> Result<(), StoreError> {
        let key = write_key(object.meta())?;
        let api: Api<ConfigMap> = self.api_for(key.namespace.as_deref());
        api.replace(&key.name, &PostParams::default(), object)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(reason: &str, code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("{} while testing", reason),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn maps_api_reasons() {
        assert!(matches!(
            StoreError::from(api_error("NotFound", 404)),
            StoreError::NotFound
        ));
        assert!(matches!(
            StoreError::from(api_error("AlreadyExists", 409)),
            StoreError::AlreadyExists
        ));
        assert!(matches!(
            StoreError::from(api_error("Conflict", 409)),
            StoreError::Conflict
        ));
        assert!(matches!(
            StoreError::from(api_error("Invalid", 422)),
            StoreError::Invalid(_)
        ));
        assert!(matches!(
            StoreError::from(api_error("BadRequest", 400)),
            StoreError::Invalid(_)
        ));
        assert!(matches!(
            StoreError::from(api_error("Timeout", 504)),
            StoreError::Timeout
        ));
        assert!(matches!(
            StoreError::from(api_error("ServerTimeout", 500)),
            StoreError::Timeout
        ));
    }

    #[test]
    fn keeps_unrecognized_reasons() {
        assert!(matches!(
            StoreError::from(api_error("Forbidden", 403)),
            StoreError::Api(_)
        ));
    }

    #[test]
    fn key_display() {
        let namespaced = ObjectKey {
            name: "web".to_owned(),
            namespace: Some("prod".to_owned()),
        };
        assert_eq!(namespaced.to_string(), "prod/web");

        let cluster = ObjectKey {
            name: "prod".to_owned(),
            namespace: None,
        };
        assert_eq!(cluster.to_string(), "prod");
    }

    #[test]
    fn key_from_meta() {
        let meta = ObjectMeta {
            name: Some("web".to_owned()),
            namespace: Some("prod".to_owned()),
            ..Default::default()
        };
        let expected = ObjectKey {
            name: "web".to_owned(),
            namespace: Some("prod".to_owned()),
        };
        assert_eq!(ObjectKey::from_meta(&meta), Some(expected));
        assert_eq!(ObjectKey::from_meta(&ObjectMeta::default()), None);

        let unnamed = ObjectMeta {
            name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(ObjectKey::from_meta(&unnamed), None);
    }
}
