use std::collections::BTreeMap;
use std::fmt::Display;

use inject_common::annotations::*;
use inject_common::errors::InjectError;
use inject_common::parsing::{duration_as_millis, duration_as_secs, parse_bool, parse_u64};
use inject_common::ports::{named_ports, parse_container_opaque_ports};
use inject_common::quantity::parse_quantity;
use inject_common::values::Values;
use log::debug;

use crate::resource_config::ResourceConfig;

/// An annotation value that could not be applied. The value it targets keeps its prior value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub annotation: String,
    pub value: String,
    pub message: String,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}: {})",
            self.message, self.annotation, self.value
        )
    }
}

/// Values with the annotation overrides of a resource applied.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverriddenValues {
    pub values: Values,
    pub diagnostics: Vec<Diagnostic>,
    /// Extra fields handed to the renderer next to the values
    pub additional: BTreeMap<String, serde_json::Value>,
}

/// Collects the annotations applied to the values and the ones that could not be.
struct Overrides<'a> {
    annotations: &'a BTreeMap<String, String>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Overrides<'a> {
    fn get(&self, annotation: &str) -> Option<&'a str> {
        self.annotations.get(annotation).map(String::as_str)
    }

    fn warn<E: Display>(&mut self, annotation: &str, value: &str, error: E) {
        self.diagnostics.push(Diagnostic {
            annotation: annotation.to_string(),
            value: value.to_string(),
            message: error.to_string(),
        });
    }

    /// Sets `target` from one of the two tokens `enabled` and `disabled`
    fn enabled_disabled(&mut self, annotation: &str, target: &mut bool) {
        if let Some(v) = self.get(annotation) {
            match v {
                ENABLED => *target = true,
                DISABLED => *target = false,
                _ => self.warn(
                    annotation,
                    v,
                    format!("Unrecognized value, valid values are: [{}, {}]", ENABLED, DISABLED),
                ),
            }
        }
    }

    /// Booleans that are silently ignored when they do not parse
    fn bool_or_skip(&self, annotation: &str, target: &mut bool) {
        if let Some(b) = self.get(annotation).and_then(|v| parse_bool(v).ok()) {
            *target = b;
        }
    }

    fn bool_or_warn(&mut self, annotation: &str, target: &mut bool) {
        if let Some(v) = self.get(annotation) {
            match parse_bool(v) {
                Ok(b) => *target = b,
                Err(e) => self.warn(annotation, v, e),
            }
        }
    }

    fn string(&self, annotation: &str, target: &mut String) {
        if let Some(v) = self.get(annotation) {
            *target = v.to_string();
        }
    }

    fn duration<F>(&mut self, annotation: &str, target: &mut String, format: F)
    where
        F: Fn(&str) -> Result<String, String>,
    {
        if let Some(v) = self.get(annotation) {
            match format(v) {
                Ok(d) => *target = d,
                Err(e) => self.warn(annotation, v, e),
            }
        }
    }

    /// Stores the raw quantity when it is valid
    fn quantity(&mut self, annotation: &str, target: &mut String) {
        if let Some(v) = self.get(annotation) {
            match parse_quantity(v) {
                Ok(_) => *target = v.to_string(),
                Err(e) => self.warn(annotation, v, e),
            }
        }
    }

    /// Stores the raw CPU quantity and bounds the proxy workers to the whole cores it rounds up to
    fn cpu(&mut self, annotation: &str, target: &mut String, workers: &mut i64) {
        if let Some(v) = self.get(annotation) {
            match parse_quantity(v) {
                Ok(q) => {
                    *target = v.to_string();
                    match q.ceil_whole() {
                        Ok(n) => *workers = n,
                        Err(e) => self.warn(annotation, v, e),
                    }
                }
                Err(e) => self.warn(annotation, v, e),
            }
        }
    }

    fn port(&self, annotation: &str, target: &mut i32) {
        if let Some(p) = self.get(annotation).and_then(|v| v.parse::<i32>().ok()) {
            *target = p;
        }
    }

    fn id(&self, annotation: &str, target: &mut i64) {
        if let Some(id) = self.get(annotation).and_then(|v| v.parse::<i64>().ok()) {
            *target = id;
        }
    }
}

/// Applies the proxy configuration annotations to `values`.
/// Annotations that can not be applied leave their value untouched and are returned.
pub fn apply_annotation_overrides(
    values: &mut Values,
    annotations: &BTreeMap<String, String>,
    named_ports: &BTreeMap<String, i32>,
) -> Vec<Diagnostic> {
    let mut o = Overrides {
        annotations,
        diagnostics: vec![],
    };
    let proxy = &mut values.proxy;
    let proxy_init = &mut values.proxy_init;

    if o.get(PROXY_INJECT_ANNOTATION) == Some(PROXY_INJECT_INGRESS) {
        proxy.is_ingress = true;
    }

    o.string(PROXY_IMAGE_ANNOTATION, &mut proxy.image.name);
    o.string(PROXY_VERSION_OVERRIDE_ANNOTATION, &mut proxy.image.version);
    o.string(PROXY_IMAGE_PULL_POLICY_ANNOTATION, &mut proxy.image.pull_policy);
    o.string(
        PROXY_INIT_IMAGE_VERSION_ANNOTATION,
        &mut proxy_init.image.version,
    );

    o.port(PROXY_CONTROL_PORT_ANNOTATION, &mut proxy.ports.control);
    o.port(PROXY_INBOUND_PORT_ANNOTATION, &mut proxy.ports.inbound);
    o.port(PROXY_ADMIN_PORT_ANNOTATION, &mut proxy.ports.admin);
    o.port(PROXY_OUTBOUND_PORT_ANNOTATION, &mut proxy.ports.outbound);

    o.string(
        PROXY_POD_INBOUND_PORTS_ANNOTATION,
        &mut proxy.pod_inbound_ports,
    );
    o.enabled_disabled(
        PROXY_ADMIN_SHUTDOWN_ANNOTATION,
        &mut proxy.enable_shutdown_endpoint,
    );
    o.string(PROXY_LOG_LEVEL_ANNOTATION, &mut proxy.log_level);
    o.string(PROXY_LOG_HTTP_HEADERS_ANNOTATION, &mut proxy.log_http_headers);
    o.string(PROXY_LOG_FORMAT_ANNOTATION, &mut proxy.log_format);
    o.string(
        PROXY_REQUIRE_IDENTITY_ON_INBOUND_PORTS_ANNOTATION,
        &mut proxy.require_identity_on_inbound_ports,
    );
    o.bool_or_skip(
        PROXY_ENABLE_HOSTNAME_LABELS_ANNOTATION,
        &mut proxy.metrics.hostname_labels,
    );

    o.duration(
        PROXY_OUTBOUND_CONNECT_TIMEOUT_ANNOTATION,
        &mut proxy.outbound_connect_timeout,
        duration_as_millis,
    );
    o.duration(
        PROXY_INBOUND_CONNECT_TIMEOUT_ANNOTATION,
        &mut proxy.inbound_connect_timeout,
        duration_as_millis,
    );
    o.duration(
        PROXY_OUTBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION,
        &mut proxy.outbound_discovery_cache_unused_timeout,
        duration_as_secs,
    );
    o.duration(
        PROXY_INBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION,
        &mut proxy.inbound_discovery_cache_unused_timeout,
        duration_as_secs,
    );
    o.bool_or_warn(
        PROXY_DISABLE_OUTBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION,
        &mut proxy.disable_outbound_protocol_detect_timeout,
    );
    o.bool_or_warn(
        PROXY_DISABLE_INBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION,
        &mut proxy.disable_inbound_protocol_detect_timeout,
    );
    o.duration(
        PROXY_SHUTDOWN_GRACE_PERIOD_ANNOTATION,
        &mut proxy.shutdown_grace_period,
        duration_as_millis,
    );
    o.bool_or_skip(PROXY_ENABLE_GATEWAY_ANNOTATION, &mut proxy.is_gateway);

    if let Some(v) = o.get(PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION) {
        match parse_u64(v) {
            Ok(secs) => proxy.wait_before_exit_seconds = secs,
            Err(e) => o.warn(PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION, v, e),
        }
    }
    o.bool_or_skip(
        PROXY_ENABLE_NATIVE_SIDECAR_ANNOTATION,
        &mut proxy.native_sidecar,
    );

    o.cpu(
        PROXY_CPU_REQUEST_ANNOTATION,
        &mut proxy.resources.cpu.request,
        &mut proxy.runtime.workers.minimum,
    );
    o.cpu(
        PROXY_CPU_LIMIT_ANNOTATION,
        &mut proxy.resources.cpu.limit,
        &mut proxy.runtime.workers.maximum,
    );
    if let Some(v) = o.get(PROXY_CPU_RATIO_LIMIT_ANNOTATION) {
        match v.parse::<f64>() {
            Ok(ratio) if ratio > 0.0 && ratio < 1.0 => {
                proxy.runtime.workers.maximum_cpu_ratio = ratio
            }
            Ok(_) => o.warn(
                PROXY_CPU_RATIO_LIMIT_ANNOTATION,
                v,
                "Invalid value, valid values are between 0.0 and 1.0",
            ),
            Err(e) => o.warn(PROXY_CPU_RATIO_LIMIT_ANNOTATION, v, e),
        }
    }

    o.quantity(
        PROXY_MEMORY_REQUEST_ANNOTATION,
        &mut proxy.resources.memory.request,
    );
    o.quantity(
        PROXY_MEMORY_LIMIT_ANNOTATION,
        &mut proxy.resources.memory.limit,
    );
    o.quantity(
        PROXY_EPHEMERAL_STORAGE_REQUEST_ANNOTATION,
        &mut proxy.resources.ephemeral_storage.request,
    );
    o.quantity(
        PROXY_EPHEMERAL_STORAGE_LIMIT_ANNOTATION,
        &mut proxy.resources.ephemeral_storage.limit,
    );

    o.id(PROXY_UID_ANNOTATION, &mut proxy.uid);
    o.id(PROXY_GID_ANNOTATION, &mut proxy.gid);
    o.bool_or_skip(
        PROXY_ENABLE_EXTERNAL_PROFILES_ANNOTATION,
        &mut proxy.enable_external_profiles,
    );

    o.string(PROXY_INIT_IMAGE_ANNOTATION, &mut proxy_init.image.name);
    o.string(
        PROXY_IMAGE_PULL_POLICY_ANNOTATION,
        &mut proxy_init.image.pull_policy,
    );
    o.string(
        PROXY_IGNORE_INBOUND_PORTS_ANNOTATION,
        &mut proxy_init.ignore_inbound_ports,
    );
    o.string(
        PROXY_IGNORE_OUTBOUND_PORTS_ANNOTATION,
        &mut proxy_init.ignore_outbound_ports,
    );

    if let Some(v) = o.get(PROXY_OPAQUE_PORTS_ANNOTATION) {
        let (ranges, errors) = parse_container_opaque_ports(v, named_ports);
        for e in errors {
            o.warn(PROXY_OPAQUE_PORTS_ANNOTATION, v, e);
        }
        proxy.opaque_ports = ranges
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<String>>()
            .join(",");
    }

    let debug_image = &mut values.debug_container.image;
    o.string(DEBUG_IMAGE_ANNOTATION, &mut debug_image.name);
    o.string(DEBUG_IMAGE_VERSION_ANNOTATION, &mut debug_image.version);
    o.string(
        DEBUG_IMAGE_PULL_POLICY_ANNOTATION,
        &mut debug_image.pull_policy,
    );

    o.enabled_disabled(PROXY_AWAIT_ANNOTATION, &mut proxy.await_);

    if let Some(v) = o.get(PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION) {
        if DEFAULT_INBOUND_POLICIES.contains(&v) {
            proxy.default_inbound_policy = v.to_string();
        } else {
            o.warn(
                PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION,
                v,
                format!(
                    "Unrecognized value, valid values are: [{}]",
                    DEFAULT_INBOUND_POLICIES.join(", ")
                ),
            );
        }
    }

    o.string(PROXY_SKIP_SUBNETS_ANNOTATION, &mut proxy_init.skip_subnets);
    o.string(PROXY_ACCESS_LOG_ANNOTATION, &mut proxy.access_log);

    o.diagnostics
}

/// Resolves the values a resource is injected with, the resource itself is not modified.
pub fn get_overridden_values(conf: &ResourceConfig) -> Result<OverriddenValues, InjectError> {
    let mut values = conf.get_values().clone();
    let named_ports = conf
        .pod_spec()
        .map(|spec| named_ports(&spec.containers))
        .unwrap_or_default();
    let diagnostics =
        apply_annotation_overrides(&mut values, &conf.get_annotation_overrides(), &named_ports);
    Ok(OverriddenValues {
        values,
        diagnostics,
        additional: BTreeMap::new(),
    })
}

/// Copies into `base` the inheritable annotations the namespace sets and the workload does not.
pub fn append_namespace_annotations(
    base: &mut BTreeMap<String, String>,
    ns_annotations: &BTreeMap<String, String>,
    workload_annotations: &BTreeMap<String, String>,
) {
    for key in inheritable_annotations() {
        if !ns_annotations.contains_key(key) {
            continue;
        }
        if let Some(v) = get_config_override(key, workload_annotations, ns_annotations) {
            base.insert(key.to_string(), v);
        }
    }
}

/// The namespace value of `key` when the workload does not set it.
pub fn get_config_override(
    key: &str,
    workload_annotations: &BTreeMap<String, String>,
    ns_annotations: &BTreeMap<String, String>,
) -> Option<String> {
    if workload_annotations.contains_key(key) {
        debug!("Using workload {} annotation value", key);
        return None;
    }
    ns_annotations.get(key).map(|v| {
        debug!("Using namespace {} annotation value", key);
        v.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::{
        append_namespace_annotations, apply_annotation_overrides, get_config_override,
        get_overridden_values,
    };
    use crate::resource_config::{Origin, ResourceConfig};
    use crate::workload::WorkloadObject;
    use inject_common::annotations::*;
    use inject_common::values::Values;
    use inject_test_macros::{deployment, pod};
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
            panic!("Override test failed:\n{}", errors.join("\n"));
        }
    }

    fn annotations(xs: &[(&str, &str)]) -> BTreeMap<String, String> {
        xs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn overridden(xs: &[(&str, &str)]) -> (Values, usize) {
        let mut values = Values::default();
        let diagnostics = apply_annotation_overrides(&mut values, &annotations(xs), &BTreeMap::new());
        (values, diagnostics.len())
    }

    #[test]
    fn test_cpu_overrides() {
        let (values, diagnostics) = overridden(&[
            (PROXY_CPU_REQUEST_ANNOTATION, "2"),
            (PROXY_CPU_LIMIT_ANNOTATION, "4"),
        ]);
        assert_eq!(diagnostics, 0);
        assert_eq!(values.proxy.resources.cpu.request, "2");
        assert_eq!(values.proxy.resources.cpu.limit, "4");
        assert_eq!(values.proxy.runtime.workers.minimum, 2);
        assert_eq!(values.proxy.runtime.workers.maximum, 4);

        let (values, _) = overridden(&[(PROXY_CPU_LIMIT_ANNOTATION, "1500m")]);
        assert_eq!(values.proxy.resources.cpu.limit, "1500m");
        assert_eq!(values.proxy.runtime.workers.maximum, 2);

        let (values, diagnostics) = overridden(&[(PROXY_CPU_REQUEST_ANNOTATION, "two")]);
        assert_eq!(diagnostics, 1);
        assert_eq!(values.proxy.resources.cpu.request, "");
        assert_eq!(values.proxy.runtime.workers.minimum, 1);
    }

    #[test]
    fn test_overrides() {
        let defaults = Values::default();
        let cases: Vec<(Vec<(&str, &str)>, Box<dyn Fn(&Values) -> bool>, usize)> = vec![
            (
                vec![(PROXY_INJECT_ANNOTATION, "ingress")],
                Box::new(|v: &Values| v.proxy.is_ingress),
                0,
            ),
            (
                vec![(PROXY_INJECT_ANNOTATION, "enabled")],
                Box::new(|v: &Values| !v.proxy.is_ingress),
                0,
            ),
            (
                vec![
                    (PROXY_IMAGE_ANNOTATION, "my/proxy"),
                    (PROXY_VERSION_OVERRIDE_ANNOTATION, "v9"),
                    (PROXY_IMAGE_PULL_POLICY_ANNOTATION, "Always"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.image.name == "my/proxy"
                        && v.proxy.image.version == "v9"
                        && v.proxy.image.pull_policy == "Always"
                        && v.proxy_init.image.pull_policy == "Always"
                }),
                0,
            ),
            (
                vec![
                    (PROXY_CONTROL_PORT_ANNOTATION, "5190"),
                    (PROXY_ADMIN_PORT_ANNOTATION, "not-a-port"),
                    (PROXY_INBOUND_PORT_ANNOTATION, "99999999999"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.ports.control == 5190
                        && v.proxy.ports.admin == 4191
                        && v.proxy.ports.inbound == 4143
                }),
                0,
            ),
            (
                vec![(PROXY_ADMIN_SHUTDOWN_ANNOTATION, "enabled")],
                Box::new(|v: &Values| v.proxy.enable_shutdown_endpoint),
                0,
            ),
            (
                vec![(PROXY_ADMIN_SHUTDOWN_ANNOTATION, "maybe")],
                Box::new(|v: &Values| !v.proxy.enable_shutdown_endpoint),
                1,
            ),
            (
                vec![(PROXY_AWAIT_ANNOTATION, "maybe")],
                Box::new(|v: &Values| v.proxy.await_),
                1,
            ),
            (
                vec![(PROXY_AWAIT_ANNOTATION, "disabled")],
                Box::new(|v: &Values| !v.proxy.await_),
                0,
            ),
            (
                vec![
                    (PROXY_OUTBOUND_CONNECT_TIMEOUT_ANNOTATION, "1m30s"),
                    (PROXY_INBOUND_CONNECT_TIMEOUT_ANNOTATION, "forever"),
                    (PROXY_OUTBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION, "1500ms"),
                    (PROXY_SHUTDOWN_GRACE_PERIOD_ANNOTATION, "2s"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.outbound_connect_timeout == "90000ms"
                        && v.proxy.inbound_connect_timeout == "100ms"
                        && v.proxy.outbound_discovery_cache_unused_timeout == "1s"
                        && v.proxy.shutdown_grace_period == "2000ms"
                }),
                1,
            ),
            (
                vec![
                    (PROXY_DISABLE_OUTBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION, "true"),
                    (PROXY_DISABLE_INBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION, "yes"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.disable_outbound_protocol_detect_timeout
                        && !v.proxy.disable_inbound_protocol_detect_timeout
                }),
                1,
            ),
            (
                vec![
                    (PROXY_ENABLE_GATEWAY_ANNOTATION, "yes"),
                    (PROXY_ENABLE_HOSTNAME_LABELS_ANNOTATION, "T"),
                    (PROXY_ENABLE_NATIVE_SIDECAR_ANNOTATION, "1"),
                    (PROXY_ENABLE_EXTERNAL_PROFILES_ANNOTATION, "true"),
                ],
                Box::new(|v: &Values| {
                    !v.proxy.is_gateway
                        && v.proxy.metrics.hostname_labels
                        && v.proxy.native_sidecar
                        && v.proxy.enable_external_profiles
                }),
                0,
            ),
            (
                vec![(PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION, "-1")],
                Box::new(|v: &Values| v.proxy.wait_before_exit_seconds == 0),
                1,
            ),
            (
                vec![(PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION, "30")],
                Box::new(|v: &Values| v.proxy.wait_before_exit_seconds == 30),
                0,
            ),
            (
                vec![(PROXY_CPU_RATIO_LIMIT_ANNOTATION, "0.5")],
                Box::new(|v: &Values| v.proxy.runtime.workers.maximum_cpu_ratio == 0.5),
                0,
            ),
            (
                vec![(PROXY_CPU_RATIO_LIMIT_ANNOTATION, "1")],
                Box::new(|v: &Values| v.proxy.runtime.workers.maximum_cpu_ratio == 0.0),
                1,
            ),
            (
                vec![(PROXY_CPU_RATIO_LIMIT_ANNOTATION, "NaN")],
                Box::new(|v: &Values| v.proxy.runtime.workers.maximum_cpu_ratio == 0.0),
                1,
            ),
            (
                vec![
                    (PROXY_MEMORY_REQUEST_ANNOTATION, "64Mi"),
                    (PROXY_MEMORY_LIMIT_ANNOTATION, "lots"),
                    (PROXY_EPHEMERAL_STORAGE_LIMIT_ANNOTATION, "1Gi"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.resources.memory.request == "64Mi"
                        && v.proxy.resources.memory.limit.is_empty()
                        && v.proxy.resources.ephemeral_storage.limit == "1Gi"
                }),
                1,
            ),
            (
                vec![(PROXY_UID_ANNOTATION, "1000"), (PROXY_GID_ANNOTATION, "abc")],
                Box::new(|v: &Values| v.proxy.uid == 1000 && v.proxy.gid == -1),
                0,
            ),
            (
                vec![
                    (PROXY_INIT_IMAGE_ANNOTATION, "my/init"),
                    (PROXY_INIT_IMAGE_VERSION_ANNOTATION, "v1"),
                    (PROXY_IGNORE_INBOUND_PORTS_ANNOTATION, "25"),
                    (PROXY_IGNORE_OUTBOUND_PORTS_ANNOTATION, "443"),
                    (PROXY_SKIP_SUBNETS_ANNOTATION, "10.0.0.0/8"),
                ],
                Box::new(|v: &Values| {
                    v.proxy_init.image.name == "my/init"
                        && v.proxy_init.image.version == "v1"
                        && v.proxy_init.ignore_inbound_ports == "25"
                        && v.proxy_init.ignore_outbound_ports == "443"
                        && v.proxy_init.skip_subnets == "10.0.0.0/8"
                }),
                0,
            ),
            (
                vec![
                    (DEBUG_IMAGE_ANNOTATION, "my/debug"),
                    (DEBUG_IMAGE_VERSION_ANNOTATION, "v2"),
                    (DEBUG_IMAGE_PULL_POLICY_ANNOTATION, "Never"),
                ],
                Box::new(|v: &Values| {
                    v.debug_container.image.name == "my/debug"
                        && v.debug_container.image.version == "v2"
                        && v.debug_container.image.pull_policy == "Never"
                }),
                0,
            ),
            (
                vec![(PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION, "deny")],
                Box::new(|v: &Values| v.proxy.default_inbound_policy == "deny"),
                0,
            ),
            (
                vec![(PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION, "allow-all")],
                Box::new(|v: &Values| v.proxy.default_inbound_policy == "all-unauthenticated"),
                1,
            ),
            (
                vec![(PROXY_OPAQUE_PORTS_ANNOTATION, "3306, 8000-9000,abc,70000")],
                Box::new(|v: &Values| v.proxy.opaque_ports == "3306,8000-9000"),
                2,
            ),
            (
                vec![
                    (PROXY_LOG_LEVEL_ANNOTATION, "debug"),
                    (PROXY_LOG_FORMAT_ANNOTATION, "json"),
                    (PROXY_LOG_HTTP_HEADERS_ANNOTATION, "insecure"),
                    (PROXY_ACCESS_LOG_ANNOTATION, "apache"),
                    (PROXY_POD_INBOUND_PORTS_ANNOTATION, "8080"),
                    (PROXY_REQUIRE_IDENTITY_ON_INBOUND_PORTS_ANNOTATION, "8443"),
                ],
                Box::new(|v: &Values| {
                    v.proxy.log_level == "debug"
                        && v.proxy.log_format == "json"
                        && v.proxy.log_http_headers == "insecure"
                        && v.proxy.access_log == "apache"
                        && v.proxy.pod_inbound_ports == "8080"
                        && v.proxy.require_identity_on_inbound_ports == "8443"
                }),
                0,
            ),
        ];
        let mut results: Vec<TestResult> = vec![];
        for (xs, check, expected_diagnostics) in cases {
            let mut values = defaults.clone();
            let diagnostics =
                apply_annotation_overrides(&mut values, &annotations(&xs), &BTreeMap::new());
            results.push((
                check(&values),
                format!("Overrides {:?}", xs),
                format!("Unexpected values {:?}", values.proxy),
            ));
            results.push((
                diagnostics.len() == expected_diagnostics,
                format!("Diagnostics for {:?}", xs),
                format!(
                    "Expected {} diagnostics, got {:?}",
                    expected_diagnostics, diagnostics
                ),
            ));
        }
        assert_tests(&results);
    }

    #[test]
    fn test_opaque_ports_named_ports() {
        let mut values = Values::default();
        let mut named_ports = BTreeMap::new();
        named_ports.insert("mysql".to_string(), 3306);
        let diagnostics = apply_annotation_overrides(
            &mut values,
            &annotations(&[(PROXY_OPAQUE_PORTS_ANNOTATION, "mysql,11211,5000-5010")]),
            &named_ports,
        );
        assert!(diagnostics.is_empty());
        assert_eq!(values.proxy.opaque_ports, "3306,11211,5000-5010");
    }

    #[test]
    fn test_get_overridden_values() {
        let d = deployment!(0,
            template_annotations => vec![(PROXY_OPAQUE_PORTS_ANNOTATION, "http"), (PROXY_LOG_LEVEL_ANNOTATION, "info")],
            ports => vec![("http", 8080)]
        );
        let defaults = Values::default();
        let mut conf = ResourceConfig::new(&defaults, Origin::Webhook, "linkerd");
        conf.from_object(WorkloadObject::Deployment(d))
            .expect("Unable to parse deployment");
        conf.append_pod_annotation(PROXY_LOG_LEVEL_ANNOTATION, "trace");
        let overridden = get_overridden_values(&conf).expect("Unable to override values");
        assert_eq!(overridden.values.proxy.opaque_ports, "8080");
        assert_eq!(overridden.values.proxy.log_level, "trace");
        assert!(overridden.diagnostics.is_empty());
        assert_eq!(conf.get_values(), &defaults);

        let mut conf = ResourceConfig::new(&defaults, Origin::Cli, "linkerd");
        conf.from_object(WorkloadObject::Pod(
            pod!(0, annotations => vec![(PROXY_ADMIN_SHUTDOWN_ANNOTATION, "maybe")]),
        ))
        .expect("Unable to parse pod");
        conf.append_pod_annotation(PROXY_LOG_LEVEL_ANNOTATION, "trace");
        let overridden = get_overridden_values(&conf).expect("Unable to override values");
        assert_eq!(overridden.values.proxy.log_level, defaults.proxy.log_level);
        assert_eq!(overridden.diagnostics.len(), 1);
        assert_eq!(
            overridden.diagnostics[0].annotation,
            PROXY_ADMIN_SHUTDOWN_ANNOTATION
        );
    }

    #[test]
    fn test_append_namespace_annotations() {
        let ns = annotations(&[
            (PROXY_INJECT_ANNOTATION, "enabled"),
            (PROXY_CPU_LIMIT_ANNOTATION, "2"),
            (PROXY_LOG_LEVEL_ANNOTATION, "debug"),
            (PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION, "10"),
            ("example.com/team", "a"),
        ]);
        let workload = annotations(&[(PROXY_LOG_LEVEL_ANNOTATION, "info")]);
        let mut base = BTreeMap::new();
        append_namespace_annotations(&mut base, &ns, &workload);
        let once = base.clone();
        append_namespace_annotations(&mut base, &ns, &workload);
        assert_eq!(base, once);
        assert_eq!(
            base,
            annotations(&[
                (PROXY_INJECT_ANNOTATION, "enabled"),
                (PROXY_CPU_LIMIT_ANNOTATION, "2"),
                (PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION, "10"),
            ])
        );

        assert_eq!(
            get_config_override(PROXY_LOG_LEVEL_ANNOTATION, &workload, &ns),
            None
        );
        assert_eq!(
            get_config_override(PROXY_CPU_LIMIT_ANNOTATION, &workload, &ns),
            Some("2".to_string())
        );
        assert_eq!(
            get_config_override(PROXY_UID_ANNOTATION, &workload, &ns),
            None
        );
    }
}
