//! Builders for typed test fixtures.
//!
//! `pod!(0)` is a pod named `pod0` in namespace `ns0` with a single `app0` container,
//! `pod!(0, annotations => vec![(k, v)], ports => vec![("http", 8080)])` sets fields on it.

#[macro_export]
macro_rules! set_meta_field {
    ($meta:expr, annotations => $xs:expr) => {{
        let xs: Vec<(&str, &str)> = $xs;
        let mut bm = ::std::collections::BTreeMap::new();
        for (k, v) in xs {
            bm.insert(k.to_string(), v.to_string());
        }
        $meta.annotations = Some(bm);
    }};
    ($meta:expr, labels => $xs:expr) => {{
        let xs: Vec<(&str, &str)> = $xs;
        let mut bm = ::std::collections::BTreeMap::new();
        for (k, v) in xs {
            bm.insert(k.to_string(), v.to_string());
        }
        $meta.labels = Some(bm);
    }};
}

#[macro_export]
macro_rules! set_spec_field {
    ($spec:expr, containers => $cs:expr) => {{
        let cs: Vec<&str> = $cs;
        $spec.containers = cs
            .iter()
            .map(|x| ::k8s_openapi::api::core::v1::Container {
                name: x.to_string(),
                ..Default::default()
            })
            .collect();
    }};
    ($spec:expr, init_containers => $cs:expr) => {{
        let cs: Vec<&str> = $cs;
        let init_containers: Vec<::k8s_openapi::api::core::v1::Container> = cs
            .iter()
            .map(|x| ::k8s_openapi::api::core::v1::Container {
                name: x.to_string(),
                ..Default::default()
            })
            .collect();
        if init_containers.len() > 0 {
            $spec.init_containers = Some(init_containers);
        }
    }};
    ($spec:expr, volumes => $vs:expr) => {{
        let vs: Vec<&str> = $vs;
        let volumes: Vec<::k8s_openapi::api::core::v1::Volume> = vs
            .iter()
            .map(|x| ::k8s_openapi::api::core::v1::Volume {
                name: x.to_string(),
                ..Default::default()
            })
            .collect();
        if volumes.len() > 0 {
            $spec.volumes = Some(volumes);
        }
    }};
    // Ports of the first container, an empty name is an unnamed port
    ($spec:expr, ports => $ps:expr) => {{
        let ps: Vec<(&str, i32)> = $ps;
        let ports: Vec<::k8s_openapi::api::core::v1::ContainerPort> = ps
            .iter()
            .map(|(name, port)| ::k8s_openapi::api::core::v1::ContainerPort {
                name: (!name.is_empty()).then(|| name.to_string()),
                container_port: *port,
                ..Default::default()
            })
            .collect();
        if let Some(c) = $spec.containers.first_mut() {
            c.ports = Some(ports);
        }
    }};
    ($spec:expr, volume_mounts => $vs:expr) => {{
        let vs: Vec<(&str, &str)> = $vs;
        let mounts: Vec<::k8s_openapi::api::core::v1::VolumeMount> = vs
            .iter()
            .map(|(name, path)| ::k8s_openapi::api::core::v1::VolumeMount {
                name: name.to_string(),
                mount_path: path.to_string(),
                read_only: Some(true),
                ..Default::default()
            })
            .collect();
        if let Some(c) = $spec.containers.first_mut() {
            c.volume_mounts = Some(mounts);
        }
    }};
    // (added, dropped) capabilities of the first container
    ($spec:expr, capabilities => $caps:expr) => {{
        let (add, drop): (Vec<&str>, Vec<&str>) = $caps;
        if let Some(c) = $spec.containers.first_mut() {
            c.security_context = Some(::k8s_openapi::api::core::v1::SecurityContext {
                capabilities: Some(::k8s_openapi::api::core::v1::Capabilities {
                    add: Some(add.iter().map(|s| s.to_string()).collect()),
                    drop: Some(drop.iter().map(|s| s.to_string()).collect()),
                }),
                ..Default::default()
            });
        }
    }};
    ($spec:expr, host_network => $b:expr) => {{
        $spec.host_network = Some($b);
    }};
}

#[macro_export]
macro_rules! set_pod_field {
    ($pod:expr, annotations => $xs:expr) => {
        $crate::set_meta_field!($pod.metadata, annotations => $xs)
    };
    ($pod:expr, labels => $xs:expr) => {
        $crate::set_meta_field!($pod.metadata, labels => $xs)
    };
    ($pod:expr, $f:ident => $e:expr) => {
        if let Some(spec) = $pod.spec.as_mut() {
            $crate::set_spec_field!(spec, $f => $e);
        }
    };
}

#[macro_export]
macro_rules! pod {
    ($n:expr) => {{
        let mut pod: ::k8s_openapi::api::core::v1::Pod = Default::default();
        pod.metadata.name = Some(format!("pod{}", $n));
        pod.metadata.namespace = Some(format!("ns{}", $n));
        pod.spec = Some(::k8s_openapi::api::core::v1::PodSpec {
            containers: vec![::k8s_openapi::api::core::v1::Container {
                name: format!("app{}", $n),
                ..Default::default()
            }],
            ..Default::default()
        });
        pod
    }};
    ($n:expr, $($fs:ident => $es:expr),+) => {{
        let mut pod = $crate::pod!($n);
        $($crate::set_pod_field!(pod, $fs => $es);)+
        pod
    }};
}

#[macro_export]
macro_rules! set_deployment_field {
    ($deployment:expr, annotations => $xs:expr) => {
        $crate::set_meta_field!($deployment.metadata, annotations => $xs)
    };
    ($deployment:expr, labels => $xs:expr) => {
        $crate::set_meta_field!($deployment.metadata, labels => $xs)
    };
    ($deployment:expr, template_annotations => $xs:expr) => {
        if let Some(spec) = $deployment.spec.as_mut() {
            let meta = spec.template.metadata.get_or_insert_with(Default::default);
            $crate::set_meta_field!(meta, annotations => $xs);
        }
    };
    ($deployment:expr, template_labels => $xs:expr) => {
        if let Some(spec) = $deployment.spec.as_mut() {
            let meta = spec.template.metadata.get_or_insert_with(Default::default);
            $crate::set_meta_field!(meta, labels => $xs);
        }
    };
    ($deployment:expr, $f:ident => $e:expr) => {
        if let Some(spec) = $deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
        {
            $crate::set_spec_field!(spec, $f => $e);
        }
    };
}

#[macro_export]
macro_rules! deployment {
    ($n:expr) => {{
        let mut deployment: ::k8s_openapi::api::apps::v1::Deployment = Default::default();
        deployment.metadata.name = Some(format!("deployment{}", $n));
        deployment.metadata.namespace = Some(format!("ns{}", $n));
        deployment.spec = Some(::k8s_openapi::api::apps::v1::DeploymentSpec {
            template: ::k8s_openapi::api::core::v1::PodTemplateSpec {
                metadata: None,
                spec: Some(::k8s_openapi::api::core::v1::PodSpec {
                    containers: vec![::k8s_openapi::api::core::v1::Container {
                        name: format!("app{}", $n),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        });
        deployment
    }};
    ($n:expr, $($fs:ident => $es:expr),+) => {{
        let mut deployment = $crate::deployment!($n);
        $($crate::set_deployment_field!(deployment, $fs => $es);)+
        deployment
    }};
}

#[macro_export]
macro_rules! namespace {
    ($name:expr) => {{
        let mut ns: ::k8s_openapi::api::core::v1::Namespace = Default::default();
        ns.metadata.name = Some($name.to_string());
        ns
    }};
    ($name:expr, annotations => $xs:expr) => {{
        let mut ns = $crate::namespace!($name);
        $crate::set_meta_field!(ns.metadata, annotations => $xs);
        ns
    }};
}

/// `service!(0, ports => vec![(3306, Some(80)), (8080, None)])`
#[macro_export]
macro_rules! service {
    ($n:expr) => {{
        let mut service: ::k8s_openapi::api::core::v1::Service = Default::default();
        service.metadata.name = Some(format!("service{}", $n));
        service.metadata.namespace = Some(format!("ns{}", $n));
        service.spec = Some(Default::default());
        service
    }};
    ($n:expr, ports => $ps:expr) => {{
        let mut service = $crate::service!($n);
        let ps: Vec<(i32, Option<i32>)> = $ps;
        if let Some(spec) = service.spec.as_mut() {
            spec.ports = Some(
                ps.iter()
                    .map(|(port, target)| ::k8s_openapi::api::core::v1::ServicePort {
                        port: *port,
                        target_port: target.map(
                            ::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString::Int,
                        ),
                        ..Default::default()
                    })
                    .collect(),
            );
        }
        service
    }};
    ($n:expr, ports => $ps:expr, annotations => $xs:expr) => {{
        let mut service = $crate::service!($n, ports => $ps);
        $crate::set_meta_field!(service.metadata, annotations => $xs);
        service
    }};
}
