use std::collections::{BTreeMap, BTreeSet};

use inject_common::annotations::PROXY_OPAQUE_PORTS_ANNOTATION;
use inject_common::errors::InjectError;
use inject_common::patch_annotation;
use inject_common::ports::port_list_entries;
use json_patch::PatchOperation::Add;
use json_patch::{AddOperation, Patch};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use log::debug;

use crate::overrides::get_config_override;
use crate::resource_config::ResourceConfig;
use crate::workload::WorkloadObject;

impl ResourceConfig {
    /// Opaque ports annotation to add to a pod or a service, if any.
    ///
    /// A workload setting the annotation itself keeps it. Otherwise the namespace value is
    /// inherited verbatim, or else the default opaque ports the workload actually exposes are used.
    pub fn opaque_ports_value(&self) -> Option<String> {
        if self.has_workload_annotation(PROXY_OPAQUE_PORTS_ANNOTATION) {
            return None;
        }
        if let Some(ports) = get_config_override(
            PROXY_OPAQUE_PORTS_ANNOTATION,
            self.get_workload_annotations(),
            &self.ns_annotations,
        ) {
            return Some(ports);
        }

        let default_ports: Vec<&str> = port_list_entries(&self.values.proxy.opaque_ports).collect();
        let is_default = |port: i32| default_ports.contains(&port.to_string().as_str());
        let filtered_ports: BTreeSet<i32> = if self.is_pod() {
            self.filter_pod_opaque_ports(&default_ports)
        } else if let Some(WorkloadObject::Service(service)) = self.workload.object.as_ref() {
            service
                .spec
                .iter()
                .flat_map(|s| s.ports.iter().flatten())
                .filter(|p| match &p.target_port {
                    // A port targeting a port that is not opaque is not opaque either
                    None | Some(IntOrString::Int(0)) => is_default(p.port),
                    Some(IntOrString::Int(target)) => is_default(*target),
                    Some(IntOrString::String(_)) => false,
                })
                .map(|p| p.port)
                .collect()
        } else {
            BTreeSet::new()
        };
        if filtered_ports.is_empty() {
            return None;
        }
        Some(
            filtered_ports
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<String>>()
                .join(","),
        )
    }

    /// Default opaque ports declared as container ports by the pod.
    pub fn filter_pod_opaque_ports(&self, default_ports: &[&str]) -> BTreeSet<i32> {
        self.pod_spec()
            .into_iter()
            .flat_map(|s| s.containers.iter())
            .flat_map(|c| c.ports.iter().flatten())
            .map(|p| p.container_port)
            .filter(|p| default_ports.contains(&p.to_string().as_str()))
            .collect()
    }

    /// Patch adding the opaque ports annotation, `None` when nothing needs to be added.
    pub fn create_opaque_ports_patch(&self) -> Result<Option<Patch>, InjectError> {
        match self.opaque_ports_value() {
            Some(ports) => {
                debug!(
                    "Adding opaque ports {} to {} {}",
                    ports,
                    self.kind(),
                    self.workload_meta().name.as_deref().unwrap_or_default()
                );
                self.create_annotation_patch(&ports).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Patch adding the opaque ports annotation with `opaque_ports` as value.
    pub fn create_annotation_patch(&self, opaque_ports: &str) -> Result<Patch, InjectError> {
        let annotations = if self.is_pod() {
            self.pod_meta_annotations()
        } else {
            self.get_workload_annotations()
        };
        let patch = if annotations.is_empty() {
            let mut annotations = BTreeMap::new();
            annotations.insert(PROXY_OPAQUE_PORTS_ANNOTATION, opaque_ports);
            Add(AddOperation {
                path: "/metadata/annotations".to_string(),
                value: serde_json::to_value(annotations)?,
            })
        } else {
            Add(AddOperation {
                path: format!(
                    "/metadata/annotations/{}",
                    patch_annotation!(PROXY_OPAQUE_PORTS_ANNOTATION)
                ),
                value: serde_json::to_value(opaque_ports)?,
            })
        };
        Ok(Patch(vec![patch]))
    }
}

#[cfg(test)]
mod tests {
    use crate::resource_config::{Origin, ResourceConfig};
    use crate::workload::WorkloadObject;
    use inject_common::annotations::PROXY_OPAQUE_PORTS_ANNOTATION;
    use inject_common::values::Values;
    use inject_test_macros::{deployment, pod, service};
    use json_patch::PatchOperation::Add;
    use json_patch::{AddOperation, Patch};
    use serde_json::json;
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
            panic!("Opaque ports test failed:\n{}", errors.join("\n"));
        }
    }

    fn config(object: WorkloadObject, ns_opaque_ports: Option<&str>) -> ResourceConfig {
        let mut ns_annotations = BTreeMap::new();
        if let Some(ports) = ns_opaque_ports {
            ns_annotations.insert(PROXY_OPAQUE_PORTS_ANNOTATION.to_string(), ports.to_string());
        }
        let mut conf = ResourceConfig::new(&Values::default(), Origin::Webhook, "linkerd")
            .with_ns_annotations(ns_annotations);
        conf.from_object(object).expect("Unable to parse object");
        conf
    }

    #[test]
    fn test_opaque_ports_value() {
        let cases: Vec<(&str, WorkloadObject, Option<&str>, Option<&str>)> = vec![
            (
                "Pod exposing default opaque ports",
                WorkloadObject::Pod(pod!(0, ports => vec![("", 11211), ("mysql", 3306), ("", 8080), ("", 3306)])),
                None,
                Some("3306,11211"),
            ),
            (
                "Pod exposing no default opaque ports",
                WorkloadObject::Pod(pod!(0, ports => vec![("", 8080)])),
                None,
                None,
            ),
            (
                "Pod with its own annotation",
                WorkloadObject::Pod(pod!(0,
                    annotations => vec![(PROXY_OPAQUE_PORTS_ANNOTATION, "4000")],
                    ports => vec![("", 3306)])),
                Some("5000"),
                None,
            ),
            (
                "Pod inheriting the namespace annotation",
                WorkloadObject::Pod(pod!(0, ports => vec![("", 3306)])),
                Some("5000-5010,http"),
                Some("5000-5010,http"),
            ),
            (
                "Service port targeting a port that is not opaque",
                WorkloadObject::Service(service!(0, ports => vec![(3306, Some(80))])),
                None,
                None,
            ),
            (
                "Service port without target",
                WorkloadObject::Service(service!(0, ports => vec![(8080, None), (11211, None)])),
                None,
                Some("11211"),
            ),
            (
                "Service port targeting an opaque port",
                WorkloadObject::Service(service!(0, ports => vec![(8080, Some(3306)), (25, Some(0))])),
                None,
                Some("25,8080"),
            ),
            (
                "Deployment",
                WorkloadObject::Deployment(deployment!(0, ports => vec![("", 3306)])),
                None,
                None,
            ),
        ];
        let mut results: Vec<TestResult> = vec![];
        for (description, object, ns, expected) in cases {
            let conf = config(object, ns);
            let value = conf.opaque_ports_value();
            results.push((
                value.as_deref() == expected,
                description.to_string(),
                format!("Expected {:?}, got {:?}", expected, value),
            ));
        }
        assert_tests(&results);
    }

    #[test]
    fn test_filter_pod_opaque_ports_sorted() {
        let conf = config(
            WorkloadObject::Pod(pod!(0, ports => vec![("", 6379), ("", 25), ("", 5432)])),
            None,
        );
        assert_eq!(conf.opaque_ports_value(), Some("25,5432,6379".to_string()));
        let filtered = conf.filter_pod_opaque_ports(&["6379", "25"]);
        assert_eq!(filtered.into_iter().collect::<Vec<i32>>(), vec![25, 6379]);
    }

    #[test]
    fn test_create_opaque_ports_patch() {
        let conf = config(
            WorkloadObject::Service(service!(0, ports => vec![(3306, None)])),
            None,
        );
        let patch = conf
            .create_opaque_ports_patch()
            .expect("Unable to create patch");
        assert_eq!(
            patch,
            Some(Patch(vec![Add(AddOperation {
                path: "/metadata/annotations".to_string(),
                value: json!({"config.linkerd.io/opaque-ports": "3306"}),
            })]))
        );

        let conf = config(
            WorkloadObject::Service(service!(0,
                ports => vec![(3306, None)],
                annotations => vec![("team", "a")])),
            None,
        );
        let patch = conf
            .create_opaque_ports_patch()
            .expect("Unable to create patch");
        assert_eq!(
            patch,
            Some(Patch(vec![Add(AddOperation {
                path: "/metadata/annotations/config.linkerd.io~1opaque-ports".to_string(),
                value: json!("3306"),
            })]))
        );

        let conf = config(
            WorkloadObject::Service(service!(0, ports => vec![(80, None)])),
            None,
        );
        assert_eq!(conf.create_opaque_ports_patch().ok(), Some(None));
    }

    #[test]
    fn test_opaque_ports_patch_applies() {
        let service = service!(0,
            ports => vec![(3306, None)],
            annotations => vec![("team", "a")]);
        let mut document = serde_json::to_value(&service).expect("Unable to serialize service");
        let conf = config(WorkloadObject::Service(service), None);
        let patch = conf
            .create_opaque_ports_patch()
            .expect("Unable to create patch")
            .expect("No patch created");
        json_patch::patch(&mut document, &patch).expect("Unable to apply patch");
        assert_eq!(
            document["metadata"]["annotations"],
            json!({"team": "a", "config.linkerd.io/opaque-ports": "3306"})
        );
    }
}
