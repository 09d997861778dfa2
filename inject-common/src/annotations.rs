use const_format::formatcp;

const DOMAIN_ANNOTATION: &str = "linkerd.io";
const CONFIG_ANNOTATION_PREFIX: &str = formatcp!("config.{}", DOMAIN_ANNOTATION);
const CONFIG_ALPHA_ANNOTATION_PREFIX: &str = formatcp!("config.alpha.{}", DOMAIN_ANNOTATION);

macro_rules! proxy_config {
    ($annotation:literal) => {{
        formatcp!("{}/{}", CONFIG_ANNOTATION_PREFIX, $annotation)
    }};
}

macro_rules! proxy_alpha_config {
    ($annotation:literal) => {{
        formatcp!("{}/{}", CONFIG_ALPHA_ANNOTATION_PREFIX, $annotation)
    }};
}

macro_rules! mesh_annotate {
    ($annotation:literal) => {{
        formatcp!("{}/{}", DOMAIN_ANNOTATION, $annotation)
    }};
}

/// Escapes an annotation or label key so it can be used as a JSON pointer token
#[macro_export]
macro_rules! patch_annotation {
    ($annotation:expr) => {{
        $annotation.replace("~", "~0").replace("/", "~1")
    }};
}

// Injection switch and its values
pub const PROXY_INJECT_ANNOTATION: &str = mesh_annotate!("inject");
pub const PROXY_INJECT_ENABLED: &str = "enabled";
pub const PROXY_INJECT_DISABLED: &str = "disabled";
pub const PROXY_INJECT_INGRESS: &str = "ingress";

// Annotations stamped on injected pods
pub const PROXY_VERSION_ANNOTATION: &str = mesh_annotate!("proxy-version");
pub const PROXY_TRUST_ROOT_SHA_ANNOTATION: &str = mesh_annotate!("trust-root-sha256");

// Proxy configuration
pub const PROXY_ADMIN_PORT_ANNOTATION: &str = proxy_config!("admin-port");
pub const PROXY_CONTROL_PORT_ANNOTATION: &str = proxy_config!("control-port");
pub const PROXY_ENABLE_DEBUG_ANNOTATION: &str = proxy_config!("enable-debug-sidecar");
pub const PROXY_ENABLE_EXTERNAL_PROFILES_ANNOTATION: &str =
    proxy_config!("enable-external-profiles");
pub const PROXY_IMAGE_PULL_POLICY_ANNOTATION: &str = proxy_config!("image-pull-policy");
pub const PROXY_INBOUND_PORT_ANNOTATION: &str = proxy_config!("inbound-port");
pub const PROXY_INIT_IMAGE_ANNOTATION: &str = proxy_config!("init-image");
pub const PROXY_INIT_IMAGE_VERSION_ANNOTATION: &str = proxy_config!("init-image-version");
pub const PROXY_OUTBOUND_PORT_ANNOTATION: &str = proxy_config!("outbound-port");
pub const PROXY_POD_INBOUND_PORTS_ANNOTATION: &str = proxy_config!("pod-inbound-ports");
pub const PROXY_CPU_LIMIT_ANNOTATION: &str = proxy_config!("proxy-cpu-limit");
pub const PROXY_CPU_REQUEST_ANNOTATION: &str = proxy_config!("proxy-cpu-request");
pub const PROXY_CPU_RATIO_LIMIT_ANNOTATION: &str = proxy_config!("proxy-cpu-ratio-limit");
pub const PROXY_IMAGE_ANNOTATION: &str = proxy_config!("proxy-image");
pub const PROXY_ADMIN_SHUTDOWN_ANNOTATION: &str = proxy_config!("proxy-admin-shutdown");
pub const PROXY_LOG_FORMAT_ANNOTATION: &str = proxy_config!("proxy-log-format");
pub const PROXY_LOG_LEVEL_ANNOTATION: &str = proxy_config!("proxy-log-level");
pub const PROXY_LOG_HTTP_HEADERS_ANNOTATION: &str = proxy_config!("proxy-log-http-headers");
pub const PROXY_MEMORY_LIMIT_ANNOTATION: &str = proxy_config!("proxy-memory-limit");
pub const PROXY_MEMORY_REQUEST_ANNOTATION: &str = proxy_config!("proxy-memory-request");
pub const PROXY_EPHEMERAL_STORAGE_LIMIT_ANNOTATION: &str =
    proxy_config!("proxy-ephemeral-storage-limit");
pub const PROXY_EPHEMERAL_STORAGE_REQUEST_ANNOTATION: &str =
    proxy_config!("proxy-ephemeral-storage-request");
pub const PROXY_UID_ANNOTATION: &str = proxy_config!("proxy-uid");
pub const PROXY_GID_ANNOTATION: &str = proxy_config!("proxy-gid");
pub const PROXY_VERSION_OVERRIDE_ANNOTATION: &str = proxy_config!("proxy-version");
pub const PROXY_REQUIRE_IDENTITY_ON_INBOUND_PORTS_ANNOTATION: &str =
    proxy_config!("proxy-require-identity-inbound-ports");
pub const PROXY_IGNORE_INBOUND_PORTS_ANNOTATION: &str = proxy_config!("skip-inbound-ports");
pub const PROXY_OPAQUE_PORTS_ANNOTATION: &str = proxy_config!("opaque-ports");
pub const PROXY_IGNORE_OUTBOUND_PORTS_ANNOTATION: &str = proxy_config!("skip-outbound-ports");
pub const PROXY_ENABLE_HOSTNAME_LABELS_ANNOTATION: &str =
    proxy_config!("proxy-metrics-hostname-labels");
pub const PROXY_OUTBOUND_CONNECT_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-outbound-connect-timeout");
pub const PROXY_INBOUND_CONNECT_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-inbound-connect-timeout");
pub const PROXY_AWAIT_ANNOTATION: &str = proxy_config!("proxy-await");
pub const PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION: &str = proxy_config!("default-inbound-policy");
pub const PROXY_SKIP_SUBNETS_ANNOTATION: &str = proxy_config!("skip-subnets");
pub const PROXY_ACCESS_LOG_ANNOTATION: &str = proxy_config!("access-log");
pub const PROXY_SHUTDOWN_GRACE_PERIOD_ANNOTATION: &str = proxy_config!("shutdown-grace-period");
pub const PROXY_OUTBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-outbound-discovery-cache-unused-timeout");
pub const PROXY_INBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-inbound-discovery-cache-unused-timeout");
pub const PROXY_DISABLE_OUTBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-disable-outbound-protocol-detect-timeout");
pub const PROXY_DISABLE_INBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION: &str =
    proxy_config!("proxy-disable-inbound-protocol-detect-timeout");
pub const PROXY_ENABLE_GATEWAY_ANNOTATION: &str = proxy_config!("enable-gateway");
pub const CLOSE_WAIT_TIMEOUT_ANNOTATION: &str = proxy_config!("close-wait-timeout");
pub const DEBUG_IMAGE_ANNOTATION: &str = proxy_config!("debug-image");
pub const DEBUG_IMAGE_VERSION_ANNOTATION: &str = proxy_config!("debug-image-version");
pub const DEBUG_IMAGE_PULL_POLICY_ANNOTATION: &str = proxy_config!("debug-image-pull-policy");

// Alpha configuration
pub const PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION: &str =
    proxy_alpha_config!("proxy-wait-before-exit-seconds");
pub const PROXY_ENABLE_NATIVE_SIDECAR_ANNOTATION: &str =
    proxy_alpha_config!("proxy-enable-native-sidecar");

/// Annotations that can be set on a pod or on its namespace.
/// Any change here is visible to users: namespaces inherit exactly these keys.
pub const PROXY_ANNOTATIONS: [&str; 40] = [
    PROXY_ADMIN_PORT_ANNOTATION,
    PROXY_CONTROL_PORT_ANNOTATION,
    PROXY_ENABLE_DEBUG_ANNOTATION,
    PROXY_ENABLE_EXTERNAL_PROFILES_ANNOTATION,
    PROXY_IMAGE_PULL_POLICY_ANNOTATION,
    PROXY_INBOUND_PORT_ANNOTATION,
    PROXY_INIT_IMAGE_ANNOTATION,
    PROXY_INIT_IMAGE_VERSION_ANNOTATION,
    PROXY_OUTBOUND_PORT_ANNOTATION,
    PROXY_POD_INBOUND_PORTS_ANNOTATION,
    PROXY_CPU_LIMIT_ANNOTATION,
    PROXY_CPU_REQUEST_ANNOTATION,
    PROXY_IMAGE_ANNOTATION,
    PROXY_ADMIN_SHUTDOWN_ANNOTATION,
    PROXY_LOG_FORMAT_ANNOTATION,
    PROXY_LOG_LEVEL_ANNOTATION,
    PROXY_LOG_HTTP_HEADERS_ANNOTATION,
    PROXY_MEMORY_LIMIT_ANNOTATION,
    PROXY_MEMORY_REQUEST_ANNOTATION,
    PROXY_EPHEMERAL_STORAGE_LIMIT_ANNOTATION,
    PROXY_EPHEMERAL_STORAGE_REQUEST_ANNOTATION,
    PROXY_UID_ANNOTATION,
    PROXY_GID_ANNOTATION,
    PROXY_VERSION_OVERRIDE_ANNOTATION,
    PROXY_REQUIRE_IDENTITY_ON_INBOUND_PORTS_ANNOTATION,
    PROXY_IGNORE_INBOUND_PORTS_ANNOTATION,
    PROXY_OPAQUE_PORTS_ANNOTATION,
    PROXY_IGNORE_OUTBOUND_PORTS_ANNOTATION,
    PROXY_ENABLE_HOSTNAME_LABELS_ANNOTATION,
    PROXY_OUTBOUND_CONNECT_TIMEOUT_ANNOTATION,
    PROXY_INBOUND_CONNECT_TIMEOUT_ANNOTATION,
    PROXY_AWAIT_ANNOTATION,
    PROXY_DEFAULT_INBOUND_POLICY_ANNOTATION,
    PROXY_SKIP_SUBNETS_ANNOTATION,
    PROXY_ACCESS_LOG_ANNOTATION,
    PROXY_SHUTDOWN_GRACE_PERIOD_ANNOTATION,
    PROXY_OUTBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION,
    PROXY_INBOUND_DISCOVERY_CACHE_UNUSED_TIMEOUT_ANNOTATION,
    PROXY_DISABLE_OUTBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION,
    PROXY_DISABLE_INBOUND_PROTOCOL_DETECT_TIMEOUT_ANNOTATION,
];

/// Alpha configuration that can be set on a pod or on its namespace.
pub const PROXY_ALPHA_CONFIG_ANNOTATIONS: [&str; 2] = [
    PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION,
    PROXY_ENABLE_NATIVE_SIDECAR_ANNOTATION,
];

/// Every key a workload inherits from its namespace when it does not set it itself.
pub fn inheritable_annotations() -> impl Iterator<Item = &'static str> {
    PROXY_ANNOTATIONS
        .iter()
        .chain(PROXY_ALPHA_CONFIG_ANNOTATIONS.iter())
        .copied()
        .chain(std::iter::once(PROXY_INJECT_ANNOTATION))
}

// Values of the two-token annotations
pub const ENABLED: &str = "enabled";
pub const DISABLED: &str = "disabled";

// Default inbound policies
pub const ALL_UNAUTHENTICATED: &str = "all-unauthenticated";
pub const ALL_AUTHENTICATED: &str = "all-authenticated";
pub const CLUSTER_UNAUTHENTICATED: &str = "cluster-unauthenticated";
pub const CLUSTER_AUTHENTICATED: &str = "cluster-authenticated";
pub const DENY: &str = "deny";
pub const AUDIT: &str = "audit";

pub const DEFAULT_INBOUND_POLICIES: [&str; 6] = [
    ALL_UNAUTHENTICATED,
    ALL_AUTHENTICATED,
    CLUSTER_UNAUTHENTICATED,
    CLUSTER_AUTHENTICATED,
    DENY,
    AUDIT,
];

// Labels
pub const CONTROLLER_NS_LABEL: &str = mesh_annotate!("control-plane-ns");
pub const CONTROLLER_COMPONENT_LABEL: &str = mesh_annotate!("control-plane-component");
pub const WORKLOAD_NAMESPACE_LABEL: &str = mesh_annotate!("workload-ns");
pub const PROXY_DEPLOYMENT_LABEL: &str = mesh_annotate!("proxy-deployment");
pub const PROXY_REPLICATION_CONTROLLER_LABEL: &str = mesh_annotate!("proxy-replicationcontroller");
pub const PROXY_REPLICA_SET_LABEL: &str = mesh_annotate!("proxy-replicaset");
pub const PROXY_JOB_LABEL: &str = mesh_annotate!("proxy-job");
pub const PROXY_DAEMON_SET_LABEL: &str = mesh_annotate!("proxy-daemonset");
pub const PROXY_STATEFUL_SET_LABEL: &str = mesh_annotate!("proxy-statefulset");
pub const PROXY_CRON_JOB_LABEL: &str = mesh_annotate!("proxy-cronjob");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotation_prefixes() {
        assert_eq!(PROXY_INJECT_ANNOTATION, "linkerd.io/inject");
        assert_eq!(PROXY_OPAQUE_PORTS_ANNOTATION, "config.linkerd.io/opaque-ports");
        assert_eq!(
            PROXY_ENABLE_NATIVE_SIDECAR_ANNOTATION,
            "config.alpha.linkerd.io/proxy-enable-native-sidecar"
        );
        assert_eq!(CONTROLLER_NS_LABEL, "linkerd.io/control-plane-ns");
    }

    #[test]
    fn test_inheritable_annotations() {
        let keys: Vec<&str> = inheritable_annotations().collect();
        assert_eq!(keys.len(), 43);
        assert!(keys.contains(&PROXY_INJECT_ANNOTATION));
        assert!(keys.contains(&PROXY_WAIT_BEFORE_EXIT_SECONDS_ANNOTATION));
        assert!(!keys.contains(&PROXY_ENABLE_GATEWAY_ANNOTATION));
        assert!(!keys.contains(&CLOSE_WAIT_TIMEOUT_ANNOTATION));
    }

    #[test]
    fn test_patch_annotation() {
        assert_eq!(
            patch_annotation!(PROXY_OPAQUE_PORTS_ANNOTATION),
            "config.linkerd.io~1opaque-ports"
        );
        assert_eq!(patch_annotation!("a~b/c"), "a~0b~1c");
    }
}
