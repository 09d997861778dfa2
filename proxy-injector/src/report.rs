use inject_common::annotations::{
    PROXY_INJECT_ANNOTATION, PROXY_INJECT_DISABLED, PROXY_INJECT_ENABLED, PROXY_INJECT_INGRESS,
};
use inject_common::constants::{INIT_CONTAINER_NAME, PROXY_CONTAINER_NAME};
use k8s_openapi::api::core::v1::PodSpec;

use crate::resource_config::{Origin, ResourceConfig};

pub const HOST_NETWORK_ENABLED: &str = "host_network_enabled";
pub const SIDECAR_EXISTS: &str = "sidecar_already_exists";
pub const UNSUPPORTED_RESOURCE: &str = "unsupported_resource";
pub const INJECT_ENABLE_ANNOTATION_ABSENT: &str = "injection_enable_annotation_absent";
pub const INJECT_DISABLE_ANNOTATION_PRESENT: &str = "injection_disable_annotation_present";
pub const INVALID_INJECT_ANNOTATION_WORKLOAD: &str = "invalid_inject_annotation_at_workload";
pub const INVALID_INJECT_ANNOTATION_NAMESPACE: &str = "invalid_inject_annotation_at_ns";
pub const DISABLED_AUTOMOUNT_SERVICE_ACCOUNT_TOKEN: &str =
    "disabled_automount_service_account_token_account";

pub const ANNOTATION_AT_NAMESPACE: &str = "namespace";
pub const ANNOTATION_AT_WORKLOAD: &str = "workload";

const SIDECAR_CONTAINER_NAMES: [&str; 4] = [
    PROXY_CONTAINER_NAME,
    INIT_CONTAINER_NAME,
    "istio-proxy",
    "istio-init",
];
const SIDECAR_IMAGE_PREFIXES: [&str; 2] =
    ["cr.l5d.io/linkerd/proxy:", "gcr.io/istio-release/proxyv2:"];

/// What parsing found out about a manifest regarding injection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub host_network: bool,
    pub sidecar: bool,
    pub udp: bool,
    pub unsupported_resource: bool,
    pub inject_disabled: bool,
    pub inject_disabled_reason: String,
    pub inject_annotation_at: String,
    pub automount_service_account_token: bool,
}

fn valid_inject_annotation(value: &str) -> bool {
    matches!(
        value,
        "" | PROXY_INJECT_ENABLED | PROXY_INJECT_DISABLED | PROXY_INJECT_INGRESS
    )
}

fn has_existing_sidecars(spec: &PodSpec) -> bool {
    spec.init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter())
        .any(|c| {
            SIDECAR_CONTAINER_NAMES.contains(&c.name.as_str())
                || c.image
                    .as_ref()
                    .map(|i| SIDECAR_IMAGE_PREFIXES.iter().any(|p| i.starts_with(p)))
                    .unwrap_or(false)
        })
}

fn has_udp_ports(spec: &PodSpec) -> bool {
    spec.containers
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .any(|p| p.protocol.as_deref() == Some("UDP"))
}

impl Report {
    pub fn new(conf: &ResourceConfig) -> Self {
        let meta = conf.workload_meta();
        let name = meta
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| meta.generate_name.clone())
            .unwrap_or_default();
        let mut report = Report {
            kind: conf.kind().to_lowercase(),
            name,
            namespace: meta.namespace.clone().unwrap_or_default(),
            automount_service_account_token: true,
            ..Default::default()
        };
        match conf.pod_spec() {
            Some(spec) => {
                let (disabled, reason, at) = Report::disabled_by_annotation(conf);
                report.inject_disabled = disabled;
                report.inject_disabled_reason = reason.to_string();
                report.inject_annotation_at = at.to_string();
                report.host_network = spec.host_network.unwrap_or(false);
                report.sidecar = has_existing_sidecars(spec);
                report.udp = has_udp_ports(spec);
                if let Some(automount) = spec.automount_service_account_token {
                    report.automount_service_account_token = automount;
                }
            }
            None if !conf.is_namespace() => report.unsupported_resource = true,
            None => {}
        }
        report
    }

    /// Returns (disabled, reason, where the enabling annotation was found)
    fn disabled_by_annotation(conf: &ResourceConfig) -> (bool, &'static str, &'static str) {
        let pod_annotation = conf
            .pod_meta_annotations()
            .get(PROXY_INJECT_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default();
        let ns_annotation = conf
            .get_ns_annotations()
            .get(PROXY_INJECT_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default();

        if conf.origin == Origin::Cli {
            return (pod_annotation == PROXY_INJECT_DISABLED, "", "");
        }
        if !valid_inject_annotation(ns_annotation) {
            return (true, INVALID_INJECT_ANNOTATION_NAMESPACE, "");
        }
        if !valid_inject_annotation(pod_annotation) {
            return (true, INVALID_INJECT_ANNOTATION_WORKLOAD, "");
        }
        if ns_annotation == PROXY_INJECT_ENABLED || ns_annotation == PROXY_INJECT_INGRESS {
            if pod_annotation == PROXY_INJECT_DISABLED {
                return (true, INJECT_DISABLE_ANNOTATION_PRESENT, "");
            }
            return (false, "", ANNOTATION_AT_NAMESPACE);
        }
        if pod_annotation != PROXY_INJECT_ENABLED && pod_annotation != PROXY_INJECT_INGRESS {
            return (true, INJECT_ENABLE_ANNOTATION_ABSENT, "");
        }
        (false, "", ANNOTATION_AT_WORKLOAD)
    }

    /// Whether the proxy can be injected and, if not, all the reasons why.
    pub fn injectable(&self) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();
        if self.host_network {
            reasons.push(HOST_NETWORK_ENABLED.to_string());
        }
        if self.sidecar {
            reasons.push(SIDECAR_EXISTS.to_string());
        }
        if self.unsupported_resource {
            reasons.push(UNSUPPORTED_RESOURCE.to_string());
        }
        if self.inject_disabled {
            reasons.push(self.inject_disabled_reason.clone());
        }
        if !self.automount_service_account_token {
            reasons.push(DISABLED_AUTOMOUNT_SERVICE_ACCOUNT_TOKEN.to_string());
        }
        (reasons.is_empty(), reasons)
    }

    /// The pod or its namespace enables injection.
    pub fn is_annotated(&self) -> bool {
        !self.inject_annotation_at.is_empty()
    }

    pub fn res_name(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::WorkloadObject;
    use inject_common::values::Values;
    use inject_test_macros::{deployment, pod};
    use k8s_openapi::api::core::v1::Pod;
    use std::collections::BTreeMap;

    type TestResult = (bool, String, String);

    fn assert_tests(test_results: &[TestResult]) {
        let mut test_errors: Vec<(usize, String, String)> = Vec::new();
        let ok = test_results.iter().enumerate().fold(
            true,
            |total, (c, (result, test_description, error_message))| {
                if !result {
                    test_errors.push((c, test_description.clone(), error_message.clone()));
                }
                total && *result
            },
        );
        if !ok {
            let errors: Vec<String> = test_errors
                .iter()
                .map(|x| format!("Test {} [#{}] failed, reason: {}", x.1, x.0, x.2))
                .collect();
            panic!("Report test failed:\n{}", errors.join("\n"));
        }
    }

    fn report_for(pod: Pod, origin: Origin, ns_inject: Option<&str>) -> Report {
        let mut ns_annotations = BTreeMap::new();
        if let Some(v) = ns_inject {
            ns_annotations.insert(PROXY_INJECT_ANNOTATION.to_string(), v.to_string());
        }
        let mut conf = ResourceConfig::new(&Values::default(), origin, "linkerd")
            .with_ns_annotations(ns_annotations);
        conf.from_object(WorkloadObject::Pod(pod))
            .expect("Unable to parse pod")
    }

    #[test]
    fn test_disabled_by_annotation() {
        // (pod annotation, namespace annotation, origin, disabled, reason, annotation at)
        let cases = [
            (None, None, Origin::Webhook, true, INJECT_ENABLE_ANNOTATION_ABSENT, ""),
            (Some("enabled"), None, Origin::Webhook, false, "", ANNOTATION_AT_WORKLOAD),
            (Some("ingress"), None, Origin::Webhook, false, "", ANNOTATION_AT_WORKLOAD),
            (None, Some("enabled"), Origin::Webhook, false, "", ANNOTATION_AT_NAMESPACE),
            (Some("enabled"), Some("enabled"), Origin::Webhook, false, "", ANNOTATION_AT_NAMESPACE),
            (Some("disabled"), Some("enabled"), Origin::Webhook, true, INJECT_DISABLE_ANNOTATION_PRESENT, ""),
            (Some("disabled"), None, Origin::Webhook, true, INJECT_ENABLE_ANNOTATION_ABSENT, ""),
            (Some("maybe"), None, Origin::Webhook, true, INVALID_INJECT_ANNOTATION_WORKLOAD, ""),
            (None, Some("maybe"), Origin::Webhook, true, INVALID_INJECT_ANNOTATION_NAMESPACE, ""),
            (None, None, Origin::Cli, false, "", ""),
            (Some("disabled"), None, Origin::Cli, true, "", ""),
            (Some("maybe"), None, Origin::Cli, false, "", ""),
        ];
        let mut results: Vec<TestResult> = vec![];
        for (c, (pod_inject, ns_inject, origin, disabled, reason, at)) in cases.iter().enumerate() {
            let pod = match pod_inject {
                Some(v) => pod!(c, annotations => vec![(PROXY_INJECT_ANNOTATION, v)]),
                None => pod!(c),
            };
            let report = report_for(pod, *origin, *ns_inject);
            results.push((
                report.inject_disabled == *disabled
                    && report.inject_disabled_reason == *reason
                    && report.inject_annotation_at == *at,
                format!("Inject annotation pod={:?} ns={:?} {:?}", pod_inject, ns_inject, origin),
                format!(
                    "Got ({}, {}, {})",
                    report.inject_disabled, report.inject_disabled_reason, report.inject_annotation_at
                ),
            ));
            results.push((
                report.is_annotated() == !at.is_empty(),
                format!("Annotated pod={:?} ns={:?}", pod_inject, ns_inject),
                format!("Got is_annotated {}", report.is_annotated()),
            ));
        }
        assert_tests(&results);
    }

    #[test]
    fn test_injectable_reasons() {
        let report = report_for(
            pod!(0, containers => vec!["app", PROXY_CONTAINER_NAME], host_network => true),
            Origin::Cli,
            None,
        );
        assert_eq!(report.res_name(), "pod/pod0");
        assert_eq!(report.namespace, "ns0");
        assert_eq!(
            report.injectable(),
            (
                false,
                vec![
                    HOST_NETWORK_ENABLED.to_string(),
                    SIDECAR_EXISTS.to_string()
                ]
            )
        );

        let mut pod = pod!(1, annotations => vec![(PROXY_INJECT_ANNOTATION, "disabled")]);
        if let Some(spec) = pod.spec.as_mut() {
            spec.automount_service_account_token = Some(false);
        }
        let report = report_for(pod, Origin::Webhook, None);
        assert_eq!(
            report.injectable(),
            (
                false,
                vec![
                    INJECT_ENABLE_ANNOTATION_ABSENT.to_string(),
                    DISABLED_AUTOMOUNT_SERVICE_ACCOUNT_TOKEN.to_string()
                ]
            )
        );

        let report = report_for(
            pod!(2, init_containers => vec!["istio-init"]),
            Origin::Cli,
            None,
        );
        assert!(report.sidecar);

        let report = report_for(pod!(3), Origin::Cli, None);
        assert_eq!(report.injectable(), (true, vec![]));
        assert!(!report.udp);
    }

    #[test]
    fn test_report_kinds() {
        let mut conf = ResourceConfig::new(&Values::default(), Origin::Cli, "linkerd");
        let report = conf
            .from_object(WorkloadObject::Deployment(deployment!(0)))
            .expect("Unable to parse deployment");
        assert_eq!(report.kind, "deployment");
        assert_eq!(report.name, "deployment0");
        assert!(report.injectable().0);

        let mut conf = ResourceConfig::new(&Values::default(), Origin::Cli, "linkerd");
        let report = conf
            .parse(b"kind: ConfigMap\nmetadata:\n  generateName: cm-\n")
            .expect("Unable to parse ConfigMap");
        assert_eq!(report.res_name(), "configmap/cm-");
        assert_eq!(
            report.injectable(),
            (false, vec![UNSUPPORTED_RESOURCE.to_string()])
        );

        let mut conf = ResourceConfig::new(&Values::default(), Origin::Cli, "linkerd");
        let report = conf
            .parse(b"kind: Namespace\nmetadata:\n  name: ns\n")
            .expect("Unable to parse Namespace");
        assert!(!report.unsupported_resource);
    }
}
