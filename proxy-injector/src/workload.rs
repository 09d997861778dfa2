//! Kinds of resources the injector understands and their typed objects.
//!
//! The set is closed: a kind that is not listed here is never injected, its metadata is
//! only read for reporting.

use std::fmt::Display;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Namespace, Pod, PodSpec, PodTemplateSpec, ReplicationController, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use inject_common::annotations::{
    PROXY_CRON_JOB_LABEL, PROXY_DAEMON_SET_LABEL, PROXY_DEPLOYMENT_LABEL, PROXY_JOB_LABEL,
    PROXY_REPLICATION_CONTROLLER_LABEL, PROXY_REPLICA_SET_LABEL, PROXY_STATEFUL_SET_LABEL,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    ReplicationController,
    ReplicaSet,
    Job,
    DaemonSet,
    StatefulSet,
    CronJob,
    Pod,
    Namespace,
    Service,
}

const WORKLOAD_KINDS: [WorkloadKind; 10] = [
    WorkloadKind::Deployment,
    WorkloadKind::ReplicationController,
    WorkloadKind::ReplicaSet,
    WorkloadKind::Job,
    WorkloadKind::DaemonSet,
    WorkloadKind::StatefulSet,
    WorkloadKind::CronJob,
    WorkloadKind::Pod,
    WorkloadKind::Namespace,
    WorkloadKind::Service,
];

impl WorkloadKind {
    /// Matches a declared kind, ignoring case.
    pub fn from_kind(kind: &str) -> Option<Self> {
        WORKLOAD_KINDS
            .iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(kind))
            .copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::ReplicationController => "ReplicationController",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::Pod => "Pod",
            WorkloadKind::Namespace => "Namespace",
            WorkloadKind::Service => "Service",
        }
    }

    /// Label naming the controller that owns the injected pods.
    pub fn owner_label(&self) -> Option<&'static str> {
        match self {
            WorkloadKind::Deployment => Some(PROXY_DEPLOYMENT_LABEL),
            WorkloadKind::ReplicationController => Some(PROXY_REPLICATION_CONTROLLER_LABEL),
            WorkloadKind::ReplicaSet => Some(PROXY_REPLICA_SET_LABEL),
            WorkloadKind::Job => Some(PROXY_JOB_LABEL),
            WorkloadKind::DaemonSet => Some(PROXY_DAEMON_SET_LABEL),
            WorkloadKind::StatefulSet => Some(PROXY_STATEFUL_SET_LABEL),
            WorkloadKind::CronJob => Some(PROXY_CRON_JOB_LABEL),
            WorkloadKind::Pod | WorkloadKind::Namespace | WorkloadKind::Service => None,
        }
    }

    /// Label for a bare pod whose owner was resolved to this kind.
    /// Owners are resolved up to the CronJob but pods only carry the Job label.
    pub fn pod_owner_label(&self) -> Option<&'static str> {
        match self {
            WorkloadKind::CronJob => None,
            _ => self.owner_label(),
        }
    }

    pub fn has_pod_template(&self) -> bool {
        !matches!(self, WorkloadKind::Namespace | WorkloadKind::Service)
    }

    /// JSON pointer of the pod template inside an object of this kind.
    pub fn patch_path_prefix(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "",
            WorkloadKind::CronJob => "/spec/jobTemplate/spec/template",
            _ => "/spec/template",
        }
    }
}

impl Display for WorkloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadObject {
    Deployment(Deployment),
    ReplicationController(ReplicationController),
    ReplicaSet(ReplicaSet),
    Job(Job),
    DaemonSet(DaemonSet),
    StatefulSet(StatefulSet),
    CronJob(CronJob),
    Pod(Pod),
    Namespace(Namespace),
    Service(Service),
}

macro_rules! with_object {
    ($obj:expr, $o:ident => $e:expr) => {
        match $obj {
            WorkloadObject::Deployment($o) => $e,
            WorkloadObject::ReplicationController($o) => $e,
            WorkloadObject::ReplicaSet($o) => $e,
            WorkloadObject::Job($o) => $e,
            WorkloadObject::DaemonSet($o) => $e,
            WorkloadObject::StatefulSet($o) => $e,
            WorkloadObject::CronJob($o) => $e,
            WorkloadObject::Pod($o) => $e,
            WorkloadObject::Namespace($o) => $e,
            WorkloadObject::Service($o) => $e,
        }
    };
}

fn template_parts(template: &PodTemplateSpec) -> Option<(&ObjectMeta, &PodSpec)> {
    match (template.metadata.as_ref(), template.spec.as_ref()) {
        (Some(meta), Some(spec)) => Some((meta, spec)),
        _ => None,
    }
}

fn template_parts_mut(template: &mut PodTemplateSpec) -> Option<(&mut ObjectMeta, &mut PodSpec)> {
    match (template.metadata.as_mut(), template.spec.as_mut()) {
        (Some(meta), Some(spec)) => Some((meta, spec)),
        _ => None,
    }
}

fn normalize_meta(meta: &mut ObjectMeta) {
    meta.annotations.get_or_insert_with(Default::default);
}

fn normalize_template(template: &mut PodTemplateSpec) {
    normalize_meta(template.metadata.get_or_insert_with(Default::default));
    template.spec.get_or_insert_with(Default::default);
}

impl WorkloadObject {
    /// Builds the typed object of `kind` from a JSON value.
    /// `apiVersion` and `kind` are dropped first, the typed object carries its own.
    pub fn from_value(
        kind: WorkloadKind,
        mut value: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        if let Some(map) = value.as_object_mut() {
            map.remove("apiVersion");
            map.remove("kind");
        }
        match kind {
            WorkloadKind::Deployment => serde_json::from_value(value).map(WorkloadObject::Deployment),
            WorkloadKind::ReplicationController => {
                serde_json::from_value(value).map(WorkloadObject::ReplicationController)
            }
            WorkloadKind::ReplicaSet => serde_json::from_value(value).map(WorkloadObject::ReplicaSet),
            WorkloadKind::Job => serde_json::from_value(value).map(WorkloadObject::Job),
            WorkloadKind::DaemonSet => serde_json::from_value(value).map(WorkloadObject::DaemonSet),
            WorkloadKind::StatefulSet => {
                serde_json::from_value(value).map(WorkloadObject::StatefulSet)
            }
            WorkloadKind::CronJob => serde_json::from_value(value).map(WorkloadObject::CronJob),
            WorkloadKind::Pod => serde_json::from_value(value).map(WorkloadObject::Pod),
            WorkloadKind::Namespace => serde_json::from_value(value).map(WorkloadObject::Namespace),
            WorkloadKind::Service => serde_json::from_value(value).map(WorkloadObject::Service),
        }
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        with_object!(self, o => serde_json::to_value(o))
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        with_object!(self, o => serde_yaml::to_string(o))
    }

    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadObject::Deployment(_) => WorkloadKind::Deployment,
            WorkloadObject::ReplicationController(_) => WorkloadKind::ReplicationController,
            WorkloadObject::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            WorkloadObject::Job(_) => WorkloadKind::Job,
            WorkloadObject::DaemonSet(_) => WorkloadKind::DaemonSet,
            WorkloadObject::StatefulSet(_) => WorkloadKind::StatefulSet,
            WorkloadObject::CronJob(_) => WorkloadKind::CronJob,
            WorkloadObject::Pod(_) => WorkloadKind::Pod,
            WorkloadObject::Namespace(_) => WorkloadKind::Namespace,
            WorkloadObject::Service(_) => WorkloadKind::Service,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        with_object!(self, o => &o.metadata)
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        with_object!(self, o => &mut o.metadata)
    }

    /// Metadata and spec of the pods this object runs. For a bare pod it is the pod itself.
    pub fn pod_template(&self) -> Option<(&ObjectMeta, &PodSpec)> {
        match self {
            WorkloadObject::Pod(p) => p.spec.as_ref().map(|s| (&p.metadata, s)),
            WorkloadObject::Deployment(d) => d.spec.as_ref().and_then(|s| template_parts(&s.template)),
            WorkloadObject::ReplicationController(rc) => rc
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(template_parts),
            WorkloadObject::ReplicaSet(rs) => rs
                .spec
                .as_ref()
                .and_then(|s| s.template.as_ref())
                .and_then(template_parts),
            WorkloadObject::Job(j) => j.spec.as_ref().and_then(|s| template_parts(&s.template)),
            WorkloadObject::DaemonSet(ds) => {
                ds.spec.as_ref().and_then(|s| template_parts(&s.template))
            }
            WorkloadObject::StatefulSet(ss) => {
                ss.spec.as_ref().and_then(|s| template_parts(&s.template))
            }
            WorkloadObject::CronJob(cj) => cj
                .spec
                .as_ref()
                .and_then(|s| s.job_template.spec.as_ref())
                .and_then(|s| template_parts(&s.template)),
            WorkloadObject::Namespace(_) | WorkloadObject::Service(_) => None,
        }
    }

    pub fn pod_template_mut(&mut self) -> Option<(&mut ObjectMeta, &mut PodSpec)> {
        match self {
            WorkloadObject::Pod(p) => p.spec.as_mut().map(|s| (&mut p.metadata, s)),
            WorkloadObject::Deployment(d) => {
                d.spec.as_mut().and_then(|s| template_parts_mut(&mut s.template))
            }
            WorkloadObject::ReplicationController(rc) => rc
                .spec
                .as_mut()
                .and_then(|s| s.template.as_mut())
                .and_then(template_parts_mut),
            WorkloadObject::ReplicaSet(rs) => rs
                .spec
                .as_mut()
                .and_then(|s| s.template.as_mut())
                .and_then(template_parts_mut),
            WorkloadObject::Job(j) => j.spec.as_mut().and_then(|s| template_parts_mut(&mut s.template)),
            WorkloadObject::DaemonSet(ds) => {
                ds.spec.as_mut().and_then(|s| template_parts_mut(&mut s.template))
            }
            WorkloadObject::StatefulSet(ss) => {
                ss.spec.as_mut().and_then(|s| template_parts_mut(&mut s.template))
            }
            WorkloadObject::CronJob(cj) => cj
                .spec
                .as_mut()
                .and_then(|s| s.job_template.spec.as_mut())
                .and_then(|s| template_parts_mut(&mut s.template)),
            WorkloadObject::Namespace(_) | WorkloadObject::Service(_) => None,
        }
    }

    /// Makes sure every kind with a pod template has one with a spec and an annotations map,
    /// and that namespaces and services have an annotations map.
    pub fn normalize(&mut self) {
        match self {
            WorkloadObject::Pod(p) => {
                normalize_meta(&mut p.metadata);
                p.spec.get_or_insert_with(Default::default);
            }
            WorkloadObject::Deployment(d) => {
                normalize_template(&mut d.spec.get_or_insert_with(Default::default).template)
            }
            WorkloadObject::ReplicationController(rc) => normalize_template(
                rc.spec
                    .get_or_insert_with(Default::default)
                    .template
                    .get_or_insert_with(Default::default),
            ),
            WorkloadObject::ReplicaSet(rs) => normalize_template(
                rs.spec
                    .get_or_insert_with(Default::default)
                    .template
                    .get_or_insert_with(Default::default),
            ),
            WorkloadObject::Job(j) => {
                normalize_template(&mut j.spec.get_or_insert_with(Default::default).template)
            }
            WorkloadObject::DaemonSet(ds) => {
                normalize_template(&mut ds.spec.get_or_insert_with(Default::default).template)
            }
            WorkloadObject::StatefulSet(ss) => {
                normalize_template(&mut ss.spec.get_or_insert_with(Default::default).template)
            }
            WorkloadObject::CronJob(cj) => normalize_template(
                &mut cj
                    .spec
                    .get_or_insert_with(Default::default)
                    .job_template
                    .spec
                    .get_or_insert_with(Default::default)
                    .template,
            ),
            WorkloadObject::Namespace(ns) => normalize_meta(&mut ns.metadata),
            WorkloadObject::Service(s) => normalize_meta(&mut s.metadata),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkloadKind, WorkloadObject};
    use serde_json::json;

    #[test]
    fn test_workload_kinds() {
        assert_eq!(WorkloadKind::from_kind("deployment"), Some(WorkloadKind::Deployment));
        assert_eq!(WorkloadKind::from_kind("CRONJOB"), Some(WorkloadKind::CronJob));
        assert_eq!(WorkloadKind::from_kind("Pod"), Some(WorkloadKind::Pod));
        assert_eq!(WorkloadKind::from_kind("ConfigMap"), None);
        assert_eq!(WorkloadKind::from_kind(""), None);
        assert_eq!(WorkloadKind::Pod.patch_path_prefix(), "");
        assert_eq!(
            WorkloadKind::CronJob.patch_path_prefix(),
            "/spec/jobTemplate/spec/template"
        );
        assert_eq!(WorkloadKind::StatefulSet.patch_path_prefix(), "/spec/template");
        assert_eq!(WorkloadKind::CronJob.pod_owner_label(), None);
        assert_eq!(
            WorkloadKind::CronJob.owner_label(),
            Some("linkerd.io/proxy-cronjob")
        );
        assert!(!WorkloadKind::Service.has_pod_template());
    }

    #[test]
    fn test_normalize_cronjob() {
        let value = json!({
            "apiVersion": "batch/v1",
            "kind": "CronJob",
            "metadata": {"name": "cron", "namespace": "ns"},
            "spec": {
                "schedule": "* * * * *",
                "jobTemplate": {
                    "spec": {
                        "template": {
                            "spec": {"containers": [{"name": "c"}], "restartPolicy": "Never"}
                        }
                    }
                }
            }
        });
        let mut obj = WorkloadObject::from_value(WorkloadKind::CronJob, value)
            .expect("Unable to parse CronJob");
        assert!(obj.pod_template().is_none());
        obj.normalize();
        let (meta, spec) = obj.pod_template().expect("CronJob without pod template");
        assert_eq!(meta.annotations.as_ref().map(|a| a.len()), Some(0));
        assert_eq!(spec.containers[0].name, "c");
        assert_eq!(obj.metadata().name.as_deref(), Some("cron"));
    }

    #[test]
    fn test_kind_mismatch_is_ignored() {
        let value = json!({
            "apiVersion": "extensions/v1beta1",
            "kind": "deployment",
            "metadata": {"name": "web"}
        });
        let obj = WorkloadObject::from_value(WorkloadKind::Deployment, value)
            .expect("Unable to parse Deployment");
        assert_eq!(obj.kind(), WorkloadKind::Deployment);
        let value = obj.to_value().expect("Unable to serialize Deployment");
        assert_eq!(value["apiVersion"], "apps/v1");
        assert_eq!(value["kind"], "Deployment");
    }
}
