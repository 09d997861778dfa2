use std::collections::BTreeMap;

use inject_common::annotations::{
    CONTROLLER_COMPONENT_LABEL, CONTROLLER_NS_LABEL, PROXY_ANNOTATIONS, PROXY_INJECT_ANNOTATION,
    PROXY_INJECT_ENABLED, WORKLOAD_NAMESPACE_LABEL,
};
use inject_common::errors::InjectError;
use inject_common::values::Values;
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use log::debug;

use crate::overrides::append_namespace_annotations;
use crate::report::Report;
use crate::workload::{WorkloadKind, WorkloadObject};

static EMPTY_ANNOTATIONS: BTreeMap<String, String> = BTreeMap::new();

/// Where the manifest comes from. Overrides accumulated on the config itself only take
/// precedence over the workload annotations when they do not come from the CLI, the CLI
/// applies them to the values up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Cli,
    Webhook,
    Unknown,
}

/// Resolves the kind and name of the controller owning a bare pod.
pub type OwnerRetriever =
    Box<dyn Fn(&Pod) -> Result<(String, String), InjectError> + Send + Sync>;

#[derive(Debug, Default)]
pub(crate) struct Workload {
    /// Kind as declared in the manifest
    pub(crate) kind: String,
    pub(crate) object: Option<WorkloadObject>,
    /// Metadata of kinds we do not inject, only used for reporting
    pub(crate) meta: ObjectMeta,
    pub(crate) owner_ref: Option<OwnerReference>,
}

#[derive(Debug, Default)]
pub(crate) struct PodInfo {
    /// Labels to add to the injected pods
    pub(crate) labels: BTreeMap<String, String>,
    /// Annotations to add to the injected pods
    pub(crate) annotations: BTreeMap<String, String>,
}

/// Everything known about one manifest being injected.
pub struct ResourceConfig {
    pub(crate) values: Values,
    pub(crate) namespace: String,
    pub(crate) ns_annotations: BTreeMap<String, String>,
    pub(crate) origin: Origin,
    owner_retriever: Option<OwnerRetriever>,
    pub(crate) workload: Workload,
    pub(crate) pod: PodInfo,
}

impl ResourceConfig {
    /// New config working on its own copy of `values`.
    /// `namespace` is the control plane namespace.
    pub fn new(values: &Values, origin: Origin, namespace: &str) -> Self {
        let mut pod = PodInfo::default();
        pod.labels
            .insert(CONTROLLER_NS_LABEL.to_string(), namespace.to_string());
        ResourceConfig {
            values: values.clone(),
            namespace: namespace.to_string(),
            ns_annotations: BTreeMap::new(),
            origin,
            owner_retriever: None,
            workload: Workload::default(),
            pod,
        }
    }

    pub fn with_kind(mut self, kind: &str) -> Self {
        self.workload.kind = kind.to_string();
        self
    }

    pub fn with_ns_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.ns_annotations = annotations;
        self
    }

    pub fn with_owner_retriever(mut self, owner_retriever: OwnerRetriever) -> Self {
        self.owner_retriever = Some(owner_retriever);
        self
    }

    /// Parses a YAML (or JSON) manifest.
    pub fn parse(&mut self, bytes: &[u8]) -> Result<Report, InjectError> {
        let value: serde_json::Value = serde_yaml::from_slice(bytes)
            .map_err(InjectError::parse_error("Unable to read manifest"))?;
        let Some(fields) = value.as_object() else {
            return Err(InjectError::Parse(
                "Manifest is not a mapping of fields".to_string(),
            ));
        };
        self.workload.kind = fields
            .get("kind")
            .and_then(|k| k.as_str())
            .unwrap_or_default()
            .to_string();
        match WorkloadKind::from_kind(&self.workload.kind) {
            Some(kind) => {
                let object = WorkloadObject::from_value(kind, value).map_err(
                    InjectError::parse_error(&format!("Unable to parse {}", kind)),
                )?;
                self.populate(object)?;
            }
            None => {
                debug!(
                    "Kind {} is not injectable, reading its metadata only",
                    self.workload.kind
                );
                if let Some(meta) = fields.get("metadata") {
                    self.workload.meta = serde_json::from_value(meta.clone())
                        .map_err(InjectError::parse_error("Unable to parse metadata"))?;
                }
            }
        }
        Ok(Report::new(self))
    }

    /// Same as [`ResourceConfig::parse`] for an object that is already typed.
    pub fn from_object(&mut self, object: WorkloadObject) -> Result<Report, InjectError> {
        if self.workload.kind.is_empty() {
            self.workload.kind = object.kind().to_string();
        }
        self.populate(object)?;
        Ok(Report::new(self))
    }

    fn populate(&mut self, mut object: WorkloadObject) -> Result<(), InjectError> {
        object.normalize();
        let kind = object.kind();
        let name = object.metadata().name.clone().unwrap_or_default();
        let namespace = object.metadata().namespace.clone().unwrap_or_default();
        match &object {
            WorkloadObject::Namespace(_) | WorkloadObject::Service(_) => {}
            WorkloadObject::Pod(pod) => {
                if let Some(owner_retriever) = &self.owner_retriever {
                    let (owner_kind, owner_name) = owner_retriever(pod)?;
                    if let Some(label) = WorkloadKind::from_kind(&owner_kind)
                        .and_then(|k| k.pod_owner_label())
                    {
                        self.pod
                            .labels
                            .insert(label.to_string(), owner_name.clone());
                    }
                    self.workload.owner_ref = Some(OwnerReference {
                        kind: owner_kind,
                        name: owner_name,
                        ..Default::default()
                    });
                }
                self.pod
                    .labels
                    .insert(WORKLOAD_NAMESPACE_LABEL.to_string(), namespace);
            }
            _ => {
                if let Some(label) = kind.owner_label() {
                    self.pod.labels.insert(label.to_string(), name);
                }
                self.pod
                    .labels
                    .insert(WORKLOAD_NAMESPACE_LABEL.to_string(), namespace);
            }
        }
        self.workload.object = Some(object);
        Ok(())
    }

    fn is_kind(&self, kind: WorkloadKind) -> bool {
        WorkloadKind::from_kind(&self.workload.kind) == Some(kind)
    }

    pub fn is_pod(&self) -> bool {
        self.is_kind(WorkloadKind::Pod)
    }

    pub fn is_service(&self) -> bool {
        self.is_kind(WorkloadKind::Service)
    }

    pub fn is_namespace(&self) -> bool {
        self.is_kind(WorkloadKind::Namespace)
    }

    pub fn has_pod_template(&self) -> bool {
        self.pod_template().is_some()
    }

    pub fn kind(&self) -> &str {
        &self.workload.kind
    }

    pub fn workload_kind(&self) -> Option<WorkloadKind> {
        self.workload.object.as_ref().map(|o| o.kind())
    }

    pub(crate) fn pod_template(&self) -> Option<(&ObjectMeta, &PodSpec)> {
        self.workload.object.as_ref().and_then(|o| o.pod_template())
    }

    pub(crate) fn pod_template_mut(&mut self) -> Option<(&mut ObjectMeta, &mut PodSpec)> {
        self.workload
            .object
            .as_mut()
            .and_then(|o| o.pod_template_mut())
    }

    pub(crate) fn pod_meta(&self) -> Option<&ObjectMeta> {
        self.pod_template().map(|(meta, _)| meta)
    }

    pub(crate) fn pod_spec(&self) -> Option<&PodSpec> {
        self.pod_template().map(|(_, spec)| spec)
    }

    pub(crate) fn pod_meta_annotations(&self) -> &BTreeMap<String, String> {
        self.pod_meta()
            .and_then(|m| m.annotations.as_ref())
            .unwrap_or(&EMPTY_ANNOTATIONS)
    }

    /// Metadata of the object itself, the controller for kinds with a pod template.
    pub fn workload_meta(&self) -> &ObjectMeta {
        self.workload
            .object
            .as_ref()
            .map(|o| o.metadata())
            .unwrap_or(&self.workload.meta)
    }

    pub fn get_owner_ref(&self) -> Option<&OwnerReference> {
        self.workload.owner_ref.as_ref()
    }

    pub fn get_values(&self) -> &Values {
        &self.values
    }

    /// Annotations accumulated on this config to be added to the pods.
    pub fn get_override_annotations(&self) -> &BTreeMap<String, String> {
        &self.pod.annotations
    }

    pub fn get_ns_annotations(&self) -> &BTreeMap<String, String> {
        &self.ns_annotations
    }

    /// Annotations of the pod for bare pods, of the object itself otherwise.
    pub fn get_workload_annotations(&self) -> &BTreeMap<String, String> {
        if self.is_pod() {
            self.pod_meta_annotations()
        } else {
            self.workload_meta()
                .annotations
                .as_ref()
                .unwrap_or(&EMPTY_ANNOTATIONS)
        }
    }

    pub fn append_pod_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        for (k, v) in annotations {
            self.pod.annotations.insert(k.clone(), v.clone());
        }
    }

    pub fn append_pod_annotation(&mut self, key: &str, value: &str) {
        self.pod
            .annotations
            .insert(key.to_string(), value.to_string());
    }

    /// Copies the inheritable namespace annotations the workload does not set itself
    /// into the annotations accumulated for the pods.
    pub fn inherit_namespace_annotations(&mut self) {
        let workload_annotations = self.get_workload_annotations().clone();
        append_namespace_annotations(
            &mut self.pod.annotations,
            &self.ns_annotations,
            &workload_annotations,
        );
    }

    /// Annotations the proxy configuration is resolved from.
    pub fn get_annotation_overrides(&self) -> BTreeMap<String, String> {
        let mut overrides = self.pod_meta_annotations().clone();
        if self.origin != Origin::Cli {
            for (k, v) in &self.pod.annotations {
                overrides.insert(k.clone(), v.clone());
            }
        }
        overrides
    }

    /// True when the annotation is set on the pod, on the object or accumulated on this config.
    pub fn has_workload_annotation(&self, annotation: &str) -> bool {
        self.pod_meta_annotations().contains_key(annotation)
            || self
                .workload_meta()
                .annotations
                .as_ref()
                .map(|a| a.contains_key(annotation))
                .unwrap_or(false)
            || self.pod.annotations.contains_key(annotation)
    }

    pub fn node_selector(&self) -> Option<&BTreeMap<String, String>> {
        self.pod_spec().and_then(|s| s.node_selector.as_ref())
    }

    pub fn is_control_plane_component(&self) -> bool {
        self.pod_meta()
            .and_then(|m| m.labels.as_ref())
            .map(|l| l.contains_key(CONTROLLER_COMPONENT_LABEL))
            .unwrap_or(false)
    }

    /// Every proxy configuration key with the value the pod sets, or empty.
    pub fn overridden_configuration(&self) -> BTreeMap<String, String> {
        let annotations = self.pod_meta_annotations();
        PROXY_ANNOTATIONS
            .iter()
            .map(|k| {
                (
                    k.to_string(),
                    annotations.get(*k).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Marks a namespace for injection and adds `annotations` to it.
    pub fn annotate_namespace(
        &mut self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<String, InjectError> {
        let Some(WorkloadObject::Namespace(ns)) = self.workload.object.as_mut() else {
            return Err(InjectError::Unsupported(
                "Unable to annotate namespace, resource is not a Namespace".to_string(),
            ));
        };
        let ns_annotations = ns.metadata.annotations.get_or_insert_with(Default::default);
        ns_annotations.insert(
            PROXY_INJECT_ANNOTATION.to_string(),
            PROXY_INJECT_ENABLED.to_string(),
        );
        for (k, v) in annotations {
            ns_annotations.insert(k.clone(), v.clone());
        }
        Ok(serde_yaml::to_string(ns)?)
    }

    pub fn annotate_service(
        &mut self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<String, InjectError> {
        let Some(WorkloadObject::Service(service)) = self.workload.object.as_mut() else {
            return Err(InjectError::Unsupported(
                "Unable to annotate service, resource is not a Service".to_string(),
            ));
        };
        let service_annotations = service
            .metadata
            .annotations
            .get_or_insert_with(Default::default);
        for (k, v) in annotations {
            service_annotations.insert(k.clone(), v.clone());
        }
        Ok(serde_yaml::to_string(service)?)
    }

    /// The parsed object, including the annotations mirrored by the patch builder.
    pub fn workload_yaml(&self) -> Result<String, InjectError> {
        let object = self.workload.object.as_ref().ok_or_else(|| {
            InjectError::Unsupported(format!(
                "Kind {} has no object to serialize",
                self.workload.kind
            ))
        })?;
        Ok(object.to_yaml()?)
    }

    /// Converts a JSON document of the same kind into YAML keeping the API field order.
    pub fn json_to_yaml(&self, bytes: &[u8]) -> Result<String, InjectError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        match WorkloadKind::from_kind(&self.workload.kind) {
            Some(kind) => Ok(WorkloadObject::from_value(kind, value)?.to_yaml()?),
            None => Ok(serde_yaml::to_string(&value)?),
        }
    }
}
