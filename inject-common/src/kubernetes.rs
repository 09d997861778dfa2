use async_trait::async_trait;
use http::Uri;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Api, Client, Config, ResourceExt};
use log::{debug, warn};

use crate::errors::InjectError;

pub const INJECT_K8S_HOST_ENV: &str = "INJECT_K8S_HOST";
pub const INJECT_K8S_HOST_DEFAULT: &str = "kubernetes.default.svc";
pub const INJECT_K8S_NO_VERIFY_ENV: &str = "INJECT_K8S_NO_VERIFY";

pub async fn get_k8s_client() -> Result<Client, InjectError> {
    let mut k8s_host = String::from("https://");
    k8s_host.push_str(
        &std::env::var(INJECT_K8S_HOST_ENV).unwrap_or(INJECT_K8S_HOST_DEFAULT.to_string()),
    );
    let k8s_uri = k8s_host
        .parse::<Uri>()
        .map_err(InjectError::from_error("Unable to parse INJECT_K8S_HOST value"))?;
    let mut k8s_config = Config::infer()
        .await
        .map_err(InjectError::from_error("Unable to infer K8S configuration"))?;
    k8s_config.cluster_url = k8s_uri;
    k8s_config.accept_invalid_certs = std::env::var(INJECT_K8S_NO_VERIFY_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    Client::try_from(k8s_config).map_err(InjectError::from_error("Unable to create k8s client"))
}

/// Finds the top level controller of a pod as a lowercase kind and a name.
/// A pod without owners is its own owner (`pod`, name).
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    async fn owner_kind_and_name(&self, pod: &Pod) -> Result<(String, String), InjectError>;
}

fn lowercase_owner(owner: &OwnerReference) -> (String, String) {
    (owner.kind.to_lowercase(), owner.name.clone())
}

/// Resolves owners through the cluster API: a ReplicaSet is followed up to its
/// Deployment and a Job up to its CronJob.
pub struct KubeOwnerResolver {
    client: Client,
}

impl KubeOwnerResolver {
    pub fn new(client: Client) -> Self {
        KubeOwnerResolver { client }
    }

    async fn parent_owner<K>(&self, api: Api<K>, owner: &OwnerReference) -> (String, String)
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
    {
        match api.get_opt(&owner.name).await {
            Ok(Some(parent)) => parent
                .owner_references()
                .first()
                .map(lowercase_owner)
                .unwrap_or_else(|| lowercase_owner(owner)),
            Ok(None) => {
                warn!("Owner {} {} not found", owner.kind, owner.name);
                lowercase_owner(owner)
            }
            Err(e) => {
                warn!(
                    "Unable to retrieve owner {} {}: {}",
                    owner.kind, owner.name, e
                );
                lowercase_owner(owner)
            }
        }
    }
}

#[async_trait]
impl OwnerResolver for KubeOwnerResolver {
    async fn owner_kind_and_name(&self, pod: &Pod) -> Result<(String, String), InjectError> {
        let owners = pod.owner_references();
        let Some(owner) = owners.first() else {
            return Ok(("pod".to_string(), pod.name_any()));
        };
        if owners.len() > 1 {
            debug!(
                "Pod {} has {} owners, using the first one",
                pod.name_any(),
                owners.len()
            );
        }
        let ns = ResourceExt::namespace(pod).ok_or_else(|| {
            InjectError::Owner(format!("Pod {} has no namespace", pod.name_any()))
        })?;
        let owner_kind_name = match owner.kind.as_str() {
            "ReplicaSet" => {
                let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), &ns);
                self.parent_owner(api, owner).await
            }
            "Job" => {
                let api: Api<Job> = Api::namespaced(self.client.clone(), &ns);
                self.parent_owner(api, owner).await
            }
            _ => lowercase_owner(owner),
        };
        debug!(
            "Pod {} owned by {} {}",
            pod.name_any(),
            owner_kind_name.0,
            owner_kind_name.1
        );
        Ok(owner_kind_name)
    }
}
