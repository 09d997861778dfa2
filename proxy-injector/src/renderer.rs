use std::collections::BTreeMap;

use inject_common::constants::{DEBUG_CONTAINER_NAME, INIT_CONTAINER_NAME, PROXY_CONTAINER_NAME};
use inject_common::errors::InjectError;
use inject_common::patch_annotation;
use inject_common::values::{Capabilities as CapabilitiesValues, Image, Proxy, ProxyInit, Resources};
use json_patch::PatchOperation::Add;
use json_patch::{AddOperation, Patch, PatchOperation};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EmptyDirVolumeSource, EnvVar, EnvVarSource,
    ExecAction, HTTPGetAction, Lifecycle, LifecycleHandler, ObjectFieldSelector, Probe,
    ProjectedVolumeSource, ResourceRequirements, SeccompProfile, SecurityContext,
    ServiceAccountTokenProjection, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use log::debug;
use serde::Serialize;

use crate::patch::PodPatch;

const PATCH_CHART_NAME: &str = "patch";
const XTABLES_LOCK_VOLUME: &str = "linkerd-proxy-init-xtables-lock";
const IDENTITY_END_ENTITY_VOLUME: &str = "linkerd-identity-end-entity";
const IDENTITY_END_ENTITY_PATH: &str = "/var/run/linkerd/identity/end-entity";
const IDENTITY_TOKEN_VOLUME: &str = "linkerd-identity-token";
const IDENTITY_TOKEN_PATH: &str = "/var/run/secrets/tokens";
const IDENTITY_TOKEN_AUDIENCE: &str = "identity.l5d.io";

macro_rules! env_var {
    (value :: $env_name:expr => $value:expr) => {{
        let mut env: EnvVar = Default::default();
        env.name = $env_name.to_string();
        env.value = Some($value.to_string());
        env
    }};

    (fieldRef :: $env_name:expr => $field_path:expr) => {{
        let mut env: EnvVar = Default::default();
        env.name = $env_name.to_string();
        let mut env_source: EnvVarSource = Default::default();
        env_source.field_ref = Some(ObjectFieldSelector {
            field_path: $field_path.to_string(),
            api_version: None,
        });
        env.value_from = Some(env_source);
        env
    }};
}

/// Chart the patch is rendered from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub name: String,
    pub dir: String,
    /// Control plane namespace
    pub namespace: String,
}

impl Chart {
    pub fn patch(namespace: &str) -> Self {
        Chart {
            name: PATCH_CHART_NAME.to_string(),
            dir: PATCH_CHART_NAME.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

/// Renders the JSON patch document for a pod from its patch values.
/// The output is only trusted once [`parse_rendered_patch`] accepts it.
pub trait PatchRenderer: Send + Sync {
    fn render(&self, chart: &Chart, values: &PodPatch) -> Result<String, InjectError>;
}

/// Built-in renderer, writes one operation per line followed by a comma.
pub struct PatchTemplate;

fn op<T: Serialize>(path: &str, value: &T) -> Result<String, InjectError> {
    let operation = Add(AddOperation {
        path: path.to_string(),
        value: serde_json::to_value(value)?,
    });
    Ok(serde_json::to_string(&operation)?)
}

/// The whole map when the parent is absent, one operation per key otherwise.
fn map_ops(
    lines: &mut Vec<String>,
    path: &str,
    add_root: bool,
    map: &BTreeMap<String, String>,
) -> Result<(), InjectError> {
    if map.is_empty() {
        return Ok(());
    }
    if add_root {
        lines.push(op(path, map)?);
    } else {
        for (k, v) in map {
            lines.push(op(&format!("{}/{}", path, patch_annotation!(k)), v)?);
        }
    }
    Ok(())
}

/// The whole list when the parent is absent, appended items otherwise.
fn list_ops<T: Serialize>(
    lines: &mut Vec<String>,
    path: &str,
    add_root: bool,
    items: &[T],
) -> Result<(), InjectError> {
    if add_root {
        lines.push(op(path, &items)?);
    } else {
        for item in items {
            lines.push(op(&format!("{}/-", path), item)?);
        }
    }
    Ok(())
}

fn image_ref(image: &Image, default_version: &str) -> String {
    let version = if image.version.is_empty() {
        default_version
    } else {
        image.version.as_str()
    };
    format!("{}:{}", image.name, version)
}

fn resources(resources: &Resources) -> Option<ResourceRequirements> {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    for (name, constraints) in [
        ("cpu", &resources.cpu),
        ("memory", &resources.memory),
        ("ephemeral-storage", &resources.ephemeral_storage),
    ] {
        if !constraints.request.is_empty() {
            requests.insert(name.to_string(), Quantity(constraints.request.clone()));
        }
        if !constraints.limit.is_empty() {
            limits.insert(name.to_string(), Quantity(constraints.limit.clone()));
        }
    }
    if requests.is_empty() && limits.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    })
}

fn capabilities(capabilities: &CapabilitiesValues) -> Capabilities {
    Capabilities {
        add: (!capabilities.add.is_empty()).then(|| capabilities.add.clone()),
        drop: (!capabilities.drop.is_empty()).then(|| capabilities.drop.clone()),
    }
}

fn runtime_default_seccomp() -> Option<SeccompProfile> {
    Some(SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        ..Default::default()
    })
}

fn exec_handler(command: Vec<String>) -> LifecycleHandler {
    LifecycleHandler {
        exec: Some(ExecAction {
            command: Some(command),
        }),
        ..Default::default()
    }
}

fn admin_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(10),
        ..Default::default()
    }
}

fn proxy_env(chart: &Chart, values: &PodPatch, proxy: &Proxy) -> Vec<EnvVar> {
    let ns = &chart.namespace;
    let domain = &values.cluster_domain;
    let workers = &proxy.runtime.workers;
    let mut env = vec![
        env_var!(fieldRef :: "_pod_name" => "metadata.name"),
        env_var!(fieldRef :: "_pod_ns" => "metadata.namespace"),
        env_var!(fieldRef :: "_pod_nodeName" => "spec.nodeName"),
        env_var!(fieldRef :: "_pod_sa" => "spec.serviceAccountName"),
        env_var!(value :: "_l5d_ns" => ns),
        env_var!(value :: "_l5d_trustdomain" => values.identity_trust_domain),
        env_var!(value :: "LINKERD2_PROXY_LOG" => proxy.log_level),
        env_var!(value :: "LINKERD2_PROXY_LOG_FORMAT" => proxy.log_format),
        env_var!(value :: "LINKERD2_PROXY_LOG_HTTP_HEADERS" => proxy.log_http_headers),
        env_var!(value :: "LINKERD2_PROXY_DESTINATION_SVC_ADDR" =>
            format!("linkerd-dst-headless.{}.svc.{}.:8086", ns, domain)),
        env_var!(value :: "LINKERD2_PROXY_POLICY_SVC_ADDR" =>
            format!("linkerd-policy.{}.svc.{}.:8090", ns, domain)),
        env_var!(value :: "LINKERD2_PROXY_POLICY_WORKLOAD" =>
            r#"{"ns":"$(_pod_ns)", "pod":"$(_pod_name)"}"#),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_DEFAULT_POLICY" => proxy.default_inbound_policy),
        env_var!(value :: "LINKERD2_PROXY_CONTROL_LISTEN_ADDR" =>
            format!("[::]:{}", proxy.ports.control)),
        env_var!(value :: "LINKERD2_PROXY_ADMIN_LISTEN_ADDR" =>
            format!("[::]:{}", proxy.ports.admin)),
        env_var!(value :: "LINKERD2_PROXY_OUTBOUND_LISTEN_ADDR" =>
            format!("127.0.0.1:{}", proxy.ports.outbound)),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_LISTEN_ADDR" =>
            format!("[::]:{}", proxy.ports.inbound)),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_PORTS" => proxy.pod_inbound_ports),
        env_var!(value :: "LINKERD2_PROXY_OUTBOUND_CONNECT_TIMEOUT" => proxy.outbound_connect_timeout),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_CONNECT_TIMEOUT" => proxy.inbound_connect_timeout),
        env_var!(value :: "LINKERD2_PROXY_OUTBOUND_DISCOVERY_IDLE_TIMEOUT" =>
            proxy.outbound_discovery_cache_unused_timeout),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_DISCOVERY_IDLE_TIMEOUT" =>
            proxy.inbound_discovery_cache_unused_timeout),
        env_var!(value :: "LINKERD2_PROXY_INBOUND_PORTS_DISABLE_PROTOCOL_DETECTION" =>
            proxy.opaque_ports),
        env_var!(value :: "LINKERD2_PROXY_DESTINATION_CONTEXT" =>
            r#"{"ns":"$(_pod_ns)", "nodeName":"$(_pod_nodeName)", "pod":"$(_pod_name)"}"#),
        env_var!(value :: "LINKERD2_PROXY_DESTINATION_PROFILE_SUFFIXES" =>
            if proxy.enable_external_profiles { ".".to_string() } else { format!("svc.{}.", domain) }),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_DIR" => IDENTITY_END_ENTITY_PATH),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_TRUST_ANCHORS" => values.identity_trust_anchors_pem),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_TOKEN_FILE" =>
            format!("{}/{}", IDENTITY_TOKEN_PATH, IDENTITY_TOKEN_VOLUME)),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_SVC_ADDR" =>
            format!("linkerd-identity-headless.{}.svc.{}.:8080", ns, domain)),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_LOCAL_NAME" =>
            "$(_pod_sa).$(_pod_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)"),
        env_var!(value :: "LINKERD2_PROXY_IDENTITY_SVC_NAME" =>
            "linkerd-identity.$(_l5d_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)"),
        env_var!(value :: "LINKERD2_PROXY_DESTINATION_SVC_NAME" =>
            "linkerd-destination.$(_l5d_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)"),
        env_var!(value :: "LINKERD2_PROXY_POLICY_SVC_NAME" =>
            "linkerd-destination.$(_l5d_ns).serviceaccount.identity.$(_l5d_ns).$(_l5d_trustdomain)"),
    ];
    if !proxy.require_identity_on_inbound_ports.is_empty() {
        env.push(env_var!(value :: "LINKERD2_PROXY_INBOUND_PORTS_REQUIRE_IDENTITY" =>
            proxy.require_identity_on_inbound_ports));
    }
    if proxy.enable_shutdown_endpoint {
        env.push(env_var!(value :: "LINKERD2_PROXY_SHUTDOWN_ENDPOINT_ENABLED" => "true"));
    }
    if !proxy.shutdown_grace_period.is_empty() {
        env.push(env_var!(value :: "LINKERD2_PROXY_SHUTDOWN_GRACE_PERIOD" => proxy.shutdown_grace_period));
    }
    if proxy.disable_outbound_protocol_detect_timeout {
        env.push(env_var!(value :: "LINKERD2_PROXY_OUTBOUND_DETECT_TIMEOUT" => "365d"));
    }
    if proxy.disable_inbound_protocol_detect_timeout {
        env.push(env_var!(value :: "LINKERD2_PROXY_INBOUND_DETECT_TIMEOUT" => "365d"));
    }
    if !proxy.access_log.is_empty() {
        env.push(env_var!(value :: "LINKERD2_PROXY_ACCESS_LOG" => proxy.access_log));
    }
    if proxy.metrics.hostname_labels {
        env.push(env_var!(value :: "LINKERD2_PROXY_METRICS_HOSTNAME_LABELS" => "true"));
    }
    if proxy.is_gateway {
        env.push(env_var!(value :: "LINKERD2_PROXY_INBOUND_GATEWAY_SUFFIXES" =>
            format!("svc.{}.", domain)));
    }
    if proxy.is_ingress {
        env.push(env_var!(value :: "LINKERD2_PROXY_INGRESS_MODE" => "true"));
    }
    if workers.minimum > 0 {
        env.push(env_var!(value :: "LINKERD2_PROXY_CORES_MIN" => workers.minimum));
    }
    if workers.maximum > 0 {
        env.push(env_var!(value :: "LINKERD2_PROXY_CORES_MAX" => workers.maximum));
    }
    if workers.maximum_cpu_ratio > 0.0 {
        env.push(env_var!(value :: "LINKERD2_PROXY_CORES_MAX_RATIO" => workers.maximum_cpu_ratio));
    }
    env
}

fn proxy_container(chart: &Chart, values: &PodPatch, proxy: &Proxy) -> Container {
    let mut volume_mounts = vec![
        VolumeMount {
            name: IDENTITY_END_ENTITY_VOLUME.to_string(),
            mount_path: IDENTITY_END_ENTITY_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: IDENTITY_TOKEN_VOLUME.to_string(),
            mount_path: IDENTITY_TOKEN_PATH.to_string(),
            ..Default::default()
        },
    ];
    if let Some(sa) = &proxy.sa_mount_path {
        volume_mounts.push(VolumeMount {
            name: sa.name.clone(),
            mount_path: sa.mount_path.clone(),
            read_only: Some(sa.read_only),
            ..Default::default()
        });
    }
    let post_start = proxy.await_.then(|| {
        exec_handler(vec![
            "/usr/lib/linkerd/linkerd-await".to_string(),
            "--timeout=2m".to_string(),
            format!("--port={}", proxy.ports.admin),
        ])
    });
    let pre_stop = (proxy.wait_before_exit_seconds > 0).then(|| {
        exec_handler(vec![
            "/bin/sleep".to_string(),
            proxy.wait_before_exit_seconds.to_string(),
        ])
    });
    let lifecycle = (post_start.is_some() || pre_stop.is_some()).then(|| Lifecycle {
        post_start,
        pre_stop,
        ..Default::default()
    });
    Container {
        name: PROXY_CONTAINER_NAME.to_string(),
        image: Some(image_ref(&proxy.image, &values.control_plane_version)),
        image_pull_policy: Some(proxy.image.pull_policy.clone()),
        env: Some(proxy_env(chart, values, proxy)),
        ports: Some(vec![
            ContainerPort {
                name: Some("linkerd-proxy".to_string()),
                container_port: proxy.ports.inbound,
                ..Default::default()
            },
            ContainerPort {
                name: Some("linkerd-admin".to_string()),
                container_port: proxy.ports.admin,
                ..Default::default()
            },
        ]),
        resources: resources(&proxy.resources),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            run_as_user: Some(proxy.uid),
            run_as_group: (proxy.gid >= 0).then_some(proxy.gid),
            capabilities: proxy.capabilities.as_ref().map(capabilities),
            seccomp_profile: runtime_default_seccomp(),
            ..Default::default()
        }),
        lifecycle,
        liveness_probe: Some(admin_probe("/live", proxy.ports.admin)),
        readiness_probe: Some(admin_probe("/ready", proxy.ports.admin)),
        restart_policy: proxy.native_sidecar.then(|| "Always".to_string()),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn proxy_init_container(values: &PodPatch, proxy: &Proxy, proxy_init: &ProxyInit) -> Container {
    let mut args = vec![
        "--incoming-proxy-port".to_string(),
        proxy.ports.inbound.to_string(),
        "--outgoing-proxy-port".to_string(),
        proxy.ports.outbound.to_string(),
        "--proxy-uid".to_string(),
        proxy.uid.to_string(),
    ];
    if proxy.gid >= 0 {
        args.extend(["--proxy-gid".to_string(), proxy.gid.to_string()]);
    }
    let mut inbound_ignored = format!("{},{}", proxy.ports.control, proxy.ports.admin);
    if !proxy_init.ignore_inbound_ports.is_empty() {
        inbound_ignored = format!("{},{}", inbound_ignored, proxy_init.ignore_inbound_ports);
    }
    args.extend(["--inbound-ports-to-ignore".to_string(), inbound_ignored]);
    if !proxy_init.ignore_outbound_ports.is_empty() {
        args.extend([
            "--outbound-ports-to-ignore".to_string(),
            proxy_init.ignore_outbound_ports.clone(),
        ]);
    }
    if !proxy_init.skip_subnets.is_empty() {
        args.extend([
            "--subnets-to-ignore".to_string(),
            proxy_init.skip_subnets.clone(),
        ]);
    }

    // Changing the conntrack close wait timeout needs a privileged container
    let privileged = proxy_init.close_wait_timeout_secs > 0;
    let (command, args) = if privileged {
        (
            Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
            vec![format!(
                "sysctl -w net.netfilter.nf_conntrack_tcp_timeout_close_wait={} && exec /usr/lib/linkerd/proxy-init {}",
                proxy_init.close_wait_timeout_secs,
                args.join(" ")
            )],
        )
    } else {
        (None, args)
    };

    let mut added = vec!["NET_ADMIN".to_string(), "NET_RAW".to_string()];
    let mut dropped = vec![];
    if let Some(caps) = &proxy_init.capabilities {
        for c in caps.add.iter() {
            if !added.contains(c) {
                added.push(c.clone());
            }
        }
        dropped = caps.drop.clone();
    }
    let mut volume_mounts = vec![VolumeMount {
        name: XTABLES_LOCK_VOLUME.to_string(),
        mount_path: "/run".to_string(),
        ..Default::default()
    }];
    if let Some(sa) = &proxy_init.sa_mount_path {
        volume_mounts.push(VolumeMount {
            name: sa.name.clone(),
            mount_path: sa.mount_path.clone(),
            read_only: Some(sa.read_only),
            ..Default::default()
        });
    }
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(image_ref(&proxy_init.image, &values.control_plane_version)),
        image_pull_policy: Some(proxy_init.image.pull_policy.clone()),
        command,
        args: Some(args),
        resources: resources(&proxy.resources),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(privileged),
            privileged: Some(privileged),
            capabilities: Some(capabilities(&CapabilitiesValues {
                add: added,
                drop: dropped,
            })),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(!proxy_init.run_as_root),
            run_as_user: Some(if proxy_init.run_as_root {
                0
            } else {
                proxy_init.run_as_user
            }),
            seccomp_profile: runtime_default_seccomp(),
            ..Default::default()
        }),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }
}

fn debug_container(image: &Image, default_version: &str) -> Container {
    Container {
        name: DEBUG_CONTAINER_NAME.to_string(),
        image: Some(image_ref(image, default_version)),
        image_pull_policy: Some(image.pull_policy.clone()),
        termination_message_policy: Some("FallbackToLogsOnError".to_string()),
        ..Default::default()
    }
}

fn volumes() -> Vec<Volume> {
    vec![
        Volume {
            name: XTABLES_LOCK_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Volume {
            name: IDENTITY_END_ENTITY_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: Some("Memory".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        },
        Volume {
            name: IDENTITY_TOKEN_VOLUME.to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: Some(vec![VolumeProjection {
                    service_account_token: Some(ServiceAccountTokenProjection {
                        audience: Some(IDENTITY_TOKEN_AUDIENCE.to_string()),
                        expiration_seconds: Some(86400),
                        path: IDENTITY_TOKEN_VOLUME.to_string(),
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

impl PatchRenderer for PatchTemplate {
    fn render(&self, chart: &Chart, values: &PodPatch) -> Result<String, InjectError> {
        let prefix = &values.path_prefix;
        let mut lines = vec![];
        if values.add_root_metadata && !(values.annotations.is_empty() && values.labels.is_empty()) {
            lines.push(op(
                &format!("{}/metadata", prefix),
                &BTreeMap::<String, String>::new(),
            )?);
        }
        map_ops(
            &mut lines,
            &format!("{}/metadata/annotations", prefix),
            values.add_root_annotations,
            &values.annotations,
        )?;
        map_ops(
            &mut lines,
            &format!("{}/metadata/labels", prefix),
            values.add_root_labels,
            &values.labels,
        )?;
        if let (Some(proxy), Some(proxy_init)) = (&values.proxy, &values.proxy_init) {
            let proxy_container = proxy_container(chart, values, proxy);
            let mut init_containers = vec![proxy_init_container(values, proxy, proxy_init)];
            if proxy.native_sidecar {
                init_containers.push(proxy_container.clone());
            }
            list_ops(
                &mut lines,
                &format!("{}/spec/initContainers", prefix),
                values.add_root_init_containers,
                &init_containers,
            )?;
            list_ops(
                &mut lines,
                &format!("{}/spec/volumes", prefix),
                values.add_root_volumes,
                &volumes(),
            )?;
            if !proxy.native_sidecar {
                // The proxy goes first so the other containers can wait for it
                let path = if proxy.await_ {
                    format!("{}/spec/containers/0", prefix)
                } else {
                    format!("{}/spec/containers/-", prefix)
                };
                lines.push(op(&path, &proxy_container)?);
            }
        }
        if let Some(debug_values) = &values.debug_container {
            lines.push(op(
                &format!("{}/spec/containers/-", prefix),
                &debug_container(&debug_values.image, &values.control_plane_version),
            )?);
        }

        let body: Vec<String> = lines.iter().map(|line| format!("  {}", line)).collect();
        if body.is_empty() {
            return Ok("[\n]".to_string());
        }
        Ok(format!("[\n{}\n]", body.join(",\n")))
    }
}

/// Removes the comma left after the last object of a list.
/// Commas inside JSON strings are kept.
pub fn strip_trailing_commas(rendered: &str) -> String {
    let mut stripped = String::with_capacity(rendered.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut skip_whitespace = false;
    for (i, c) in rendered.char_indices() {
        if skip_whitespace {
            if c.is_whitespace() {
                continue;
            }
            skip_whitespace = false;
        }
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == ','
            && stripped.ends_with('}')
            && rendered[i + 1..].trim_start().starts_with(']')
        {
            stripped.push('\n');
            skip_whitespace = true;
            continue;
        }
        stripped.push(c);
    }
    stripped
}

/// Turns rendered text into a patch, only add, replace and remove operations are accepted.
pub fn parse_rendered_patch(rendered: &str) -> Result<Patch, InjectError> {
    let patch: Patch = serde_json::from_str(&strip_trailing_commas(rendered))
        .map_err(InjectError::render_error("Unable to parse rendered patch"))?;
    for operation in patch.0.iter() {
        match operation {
            PatchOperation::Add(_) | PatchOperation::Replace(_) | PatchOperation::Remove(_) => {}
            operation => {
                return Err(InjectError::Render(format!(
                    "Unsupported operation in rendered patch: {}",
                    serde_json::to_string(operation)?
                )))
            }
        }
    }
    debug!("Rendered patch with {} operations", patch.0.len());
    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::{parse_rendered_patch, strip_trailing_commas, Chart};
    use inject_common::errors::InjectError;
    use json_patch::PatchOperation::{Add, Remove};
    use json_patch::{AddOperation, RemoveOperation};
    use serde_json::json;

    #[test]
    fn test_chart() {
        let chart = Chart::patch("linkerd");
        assert_eq!(chart.name, "patch");
        assert_eq!(chart.dir, "patch");
        assert_eq!(chart.namespace, "linkerd");
    }

    #[test]
    fn test_strip_trailing_commas() {
        assert_eq!(
            strip_trailing_commas("[\n  {\"a\": 1},\n  {\"b\": {}},\n]"),
            "[\n  {\"a\": 1},\n  {\"b\": {}}\n]"
        );
        assert_eq!(strip_trailing_commas("[{\"a\": 1},   ]"), "[{\"a\": 1}\n]");
        assert_eq!(strip_trailing_commas("[\n]"), "[\n]");
        assert_eq!(strip_trailing_commas("[{},{}]"), "[{},{}]");
        assert_eq!(
            strip_trailing_commas("[{\"v\": \"x=},]\"},\n]"),
            "[{\"v\": \"x=},]\"}\n]"
        );
        assert_eq!(
            strip_trailing_commas("[{\"v\": \"a\\\"},]\"},]"),
            "[{\"v\": \"a\\\"},]\"}\n]"
        );
    }

    #[test]
    fn test_parse_rendered_patch() {
        let patch = parse_rendered_patch(
            "[\n  {\"op\": \"add\", \"path\": \"/metadata/labels\", \"value\": {\"a\": \"b\"}},\n  {\"op\": \"remove\", \"path\": \"/spec/x\"},\n]",
        )
        .expect("Unable to parse patch");
        assert_eq!(
            patch.0,
            vec![
                Add(AddOperation {
                    path: "/metadata/labels".to_string(),
                    value: json!({"a": "b"}),
                }),
                Remove(RemoveOperation {
                    path: "/spec/x".to_string(),
                }),
            ]
        );
        assert_eq!(parse_rendered_patch("[\n]").map(|p| p.0.len()).ok(), Some(0));
    }

    #[test]
    fn test_parse_rendered_patch_rejects() {
        let rendered = [
            "[{\"op\": \"move\", \"from\": \"/a\", \"path\": \"/b\"},\n]",
            "[{\"op\": \"test\", \"path\": \"/a\", \"value\": 1}]",
            "[{\"op\": \"add\", \"path\": \"/a\"}]",
            "[{\"op\": \"add\", \"path\": \"/a\", \"value\": 1},,]",
            "{\"op\": \"add\", \"path\": \"/a\", \"value\": 1}",
        ];
        for r in rendered {
            match parse_rendered_patch(r) {
                Err(InjectError::Render(_)) => {}
                other => panic!("Expected render error for {}, got {:?}", r, other),
            }
        }
    }
}
