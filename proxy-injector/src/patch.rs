use std::collections::{BTreeMap, BTreeSet};

use inject_common::annotations::{
    CLOSE_WAIT_TIMEOUT_ANNOTATION, PROXY_ENABLE_DEBUG_ANNOTATION, PROXY_TRUST_ROOT_SHA_ANNOTATION,
    PROXY_VERSION_ANNOTATION,
};
use inject_common::constants::MOUNT_PATH_SERVICE_ACCOUNT;
use inject_common::errors::InjectError;
use inject_common::parsing::{duration_seconds, parse_bool, parse_duration};
use inject_common::values::{
    Capabilities, DebugContainer, Proxy, ProxyInit, VolumeMountPath,
};
use json_patch::Patch;
use k8s_openapi::api::core::v1::{PodSpec, Probe};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use log::{debug, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::overrides::OverriddenValues;
use crate::renderer::{parse_rendered_patch, Chart, PatchRenderer, PatchTemplate};
use crate::resource_config::ResourceConfig;

/// Values handed to the renderer to produce the patch of a pod template.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodPatch {
    pub control_plane_version: String,
    pub cluster_domain: String,
    pub identity_trust_domain: String,
    #[serde(rename = "identityTrustAnchorsPEM")]
    pub identity_trust_anchors_pem: String,
    pub proxy: Option<Proxy>,
    pub proxy_init: Option<ProxyInit>,
    pub debug_container: Option<DebugContainer>,
    /// Location of the pod template inside the object
    pub path_prefix: String,
    // Whether each collection has to be created as a whole
    pub add_root_metadata: bool,
    pub add_root_annotations: bool,
    pub add_root_labels: bool,
    pub add_root_init_containers: bool,
    pub add_root_volumes: bool,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    #[serde(flatten)]
    pub additional: BTreeMap<String, serde_json::Value>,
}

impl PodPatch {
    fn new(values: &OverriddenValues, path_prefix: &str) -> Self {
        let v = &values.values;
        PodPatch {
            control_plane_version: v.control_plane_version.clone(),
            cluster_domain: v.cluster_domain.clone(),
            identity_trust_domain: v.identity_trust_domain.clone(),
            identity_trust_anchors_pem: v.identity_trust_anchors_pem.clone(),
            proxy: Some(v.proxy.clone()),
            proxy_init: Some(v.proxy_init.clone()),
            debug_container: None,
            path_prefix: path_prefix.to_string(),
            add_root_metadata: false,
            add_root_annotations: false,
            add_root_labels: false,
            add_root_init_containers: false,
            add_root_volumes: false,
            annotations: BTreeMap::new(),
            labels: BTreeMap::new(),
            additional: values.additional.clone(),
        }
    }
}

/// Ports the pod listens on, from its container ports and HTTP probes.
fn pod_inbound_ports(spec: &PodSpec) -> String {
    let probe_port = |probe: &Option<Probe>| match probe
        .as_ref()
        .and_then(|p| p.http_get.as_ref())
        .map(|h| &h.port)
    {
        Some(IntOrString::Int(port)) => Some(*port),
        _ => None,
    };
    let mut ports: BTreeSet<i32> = BTreeSet::new();
    for container in spec.containers.iter() {
        ports.extend(container.ports.iter().flatten().map(|p| p.container_port));
        ports.extend(probe_port(&container.liveness_probe));
        ports.extend(probe_port(&container.readiness_probe));
    }
    let mut ports: Vec<String> = ports.into_iter().map(|p| p.to_string()).collect();
    ports.sort();
    ports.join(",")
}

impl ResourceConfig {
    fn inject_pod_annotations(&mut self, patch: &mut PodPatch) {
        if let Some(meta) = self.pod_meta() {
            let annotations_empty = meta.annotations.as_ref().map_or(true, |a| a.is_empty());
            let rest = ObjectMeta {
                annotations: None,
                ..meta.clone()
            };
            patch.add_root_metadata = annotations_empty && rest == ObjectMeta::default();
            patch.add_root_annotations = annotations_empty;
        }
        for (k, v) in self.pod.annotations.iter() {
            patch.annotations.insert(k.clone(), v.clone());
        }
        // Keep the workload in sync with the patch
        let pod_annotations = self.pod.annotations.clone();
        if let Some((meta, _)) = self.pod_template_mut() {
            meta.annotations
                .get_or_insert_with(Default::default)
                .extend(pod_annotations);
        }
    }

    fn inject_object_meta(&self, patch: &mut PodPatch) {
        let version = patch
            .proxy
            .as_ref()
            .map(|p| p.image.version.clone())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| patch.control_plane_version.clone());
        patch
            .annotations
            .insert(PROXY_VERSION_ANNOTATION.to_string(), version);
        patch.annotations.insert(
            PROXY_TRUST_ROOT_SHA_ANNOTATION.to_string(),
            hex::encode(Sha256::digest(patch.identity_trust_anchors_pem.as_bytes())),
        );
        if !self.pod.labels.is_empty() {
            patch.add_root_labels = self
                .pod_meta()
                .and_then(|m| m.labels.as_ref())
                .map_or(true, |l| l.is_empty());
            for (k, v) in self.pod.labels.iter() {
                patch.labels.insert(k.clone(), v.clone());
            }
        }
    }

    fn inject_pod_spec(&self, patch: &mut PodPatch, debug_container: &DebugContainer) {
        let spec = match self.pod_spec() {
            Some(spec) => spec,
            None => return,
        };
        let annotations = self.pod_meta_annotations();
        if let Some(proxy) = patch.proxy.as_mut() {
            let primary = spec.containers.first();
            if let Some(caps) = primary
                .and_then(|c| c.security_context.as_ref())
                .and_then(|sc| sc.capabilities.as_ref())
            {
                proxy.capabilities = Some(Capabilities {
                    add: caps.add.clone().unwrap_or_default(),
                    drop: caps.drop.clone().unwrap_or_default(),
                });
            }
            if let Some(mount) = primary
                .and_then(|c| c.volume_mounts.as_ref())
                .and_then(|mounts| {
                    mounts
                        .iter()
                        .find(|m| m.mount_path == MOUNT_PATH_SERVICE_ACCOUNT)
                })
            {
                proxy.sa_mount_path = Some(VolumeMountPath {
                    name: mount.name.clone(),
                    mount_path: mount.mount_path.clone(),
                    read_only: mount.read_only.unwrap_or(false),
                });
            }
            if proxy.pod_inbound_ports.is_empty() {
                proxy.pod_inbound_ports = pod_inbound_ports(spec);
            }
        }

        if let Some(v) = annotations
            .get(PROXY_ENABLE_DEBUG_ANNOTATION)
            .filter(|v| !v.is_empty())
        {
            let enabled = parse_bool(v).unwrap_or_else(|e| {
                warn!(
                    "Ignoring invalid {} annotation value {}: {}",
                    PROXY_ENABLE_DEBUG_ANNOTATION, v, e
                );
                false
            });
            if enabled {
                info!("Injecting debug container");
                patch.debug_container = Some(debug_container.clone());
            }
        }

        if let (Some(proxy), Some(proxy_init)) = (patch.proxy.as_ref(), patch.proxy_init.as_mut()) {
            if let Some(caps) = &proxy.capabilities {
                proxy_init.capabilities = Some(Capabilities {
                    add: caps.add.clone(),
                    drop: caps
                        .drop
                        .iter()
                        .filter(|c| c.as_str() != "NET_ADMIN" && c.as_str() != "NET_RAW")
                        .cloned()
                        .collect(),
                });
            }
            proxy_init.sa_mount_path = proxy.sa_mount_path.clone();
            if let Some(v) = annotations
                .get(CLOSE_WAIT_TIMEOUT_ANNOTATION)
                .filter(|v| !v.is_empty())
            {
                match parse_duration(v) {
                    Ok(nanos) => proxy_init.close_wait_timeout_secs = duration_seconds(nanos) as i64,
                    Err(e) => warn!(
                        "Ignoring invalid {} annotation value {}: {}",
                        CLOSE_WAIT_TIMEOUT_ANNOTATION, v, e
                    ),
                }
            }
        }
        patch.add_root_init_containers = spec.init_containers.as_ref().map_or(true, |c| c.is_empty());
        patch.add_root_volumes = spec.volumes.as_ref().map_or(true, |v| v.is_empty());
    }
}

/// Values the patch of the pod template of `conf` is rendered from.
/// The pod annotations of `conf` are merged into its in-memory pod template.
pub fn build_pod_patch(
    conf: &mut ResourceConfig,
    inject_proxy: bool,
    values: &OverriddenValues,
    path_prefix: &str,
) -> Result<PodPatch, InjectError> {
    if !conf.has_pod_template() {
        return Err(InjectError::Unsupported(format!(
            "{} has no pod template to patch",
            conf.kind()
        )));
    }
    let mut patch = PodPatch::new(values, path_prefix);
    conf.inject_pod_annotations(&mut patch);
    if inject_proxy {
        conf.inject_object_meta(&mut patch);
        conf.inject_pod_spec(&mut patch, &values.values.debug_container);
    } else {
        patch.proxy = None;
        patch.proxy_init = None;
    }
    Ok(patch)
}

/// Patch for the pod template of `conf`, rendered with the built-in template.
pub fn get_pod_patch(
    conf: &mut ResourceConfig,
    inject_proxy: bool,
    values: &OverriddenValues,
    path_prefix: &str,
) -> Result<Patch, InjectError> {
    get_pod_patch_with(&PatchTemplate, conf, inject_proxy, values, path_prefix)
}

pub fn get_pod_patch_with(
    renderer: &dyn PatchRenderer,
    conf: &mut ResourceConfig,
    inject_proxy: bool,
    values: &OverriddenValues,
    path_prefix: &str,
) -> Result<Patch, InjectError> {
    let pod_patch = build_pod_patch(conf, inject_proxy, values, path_prefix)?;
    let chart = Chart::patch(&conf.namespace);
    let rendered = renderer.render(&chart, &pod_patch)?;
    let patch = parse_rendered_patch(&rendered)?;
    debug!("Pod patches: {:?}", patch);
    Ok(patch)
}
