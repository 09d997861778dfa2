//! Proxy configuration values.
//!
//! Compiled defaults can be partially overridden by a YAML file (`INJECT_VALUES_FILE`).
//! The loaded value is frozen behind an `Arc` at process start and every resource being
//! injected works on its own clone.

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::annotations::ALL_UNAUTHENTICATED;
use crate::constants::{DEFAULT_OPAQUE_PORTS, INJECT_VALUES_FILE_ENV, PROXY_INIT_VERSION};
use crate::version::version;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Image {
    pub name: String,
    pub version: String,
    pub pull_policy: String,
}

macro_rules! image {
    ($name:expr, $version:expr) => {
        Image {
            name: $name.to_string(),
            version: $version.to_string(),
            pull_policy: "IfNotPresent".to_string(),
        }
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Ports {
    pub admin: i32,
    pub control: i32,
    pub inbound: i32,
    pub outbound: i32,
}

impl Default for Ports {
    fn default() -> Self {
        Ports {
            admin: 4191,
            control: 4190,
            inbound: 4143,
            outbound: 4140,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constraints {
    pub request: String,
    pub limit: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Resources {
    pub cpu: Constraints,
    pub memory: Constraints,
    pub ephemeral_storage: Constraints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workers {
    pub minimum: i64,
    pub maximum: i64,
    #[serde(rename = "maximumCPURatio")]
    pub maximum_cpu_ratio: f64,
}

impl Default for Workers {
    fn default() -> Self {
        Workers {
            minimum: 1,
            maximum: 0,
            maximum_cpu_ratio: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Runtime {
    pub workers: Workers,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metrics {
    pub hostname_labels: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub add: Vec<String>,
    pub drop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeMountPath {
    pub name: String,
    pub mount_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Proxy {
    pub image: Image,
    pub ports: Ports,
    pub pod_inbound_ports: String,
    pub enable_shutdown_endpoint: bool,
    pub log_level: String,
    pub log_format: String,
    #[serde(rename = "logHTTPHeaders")]
    pub log_http_headers: String,
    pub require_identity_on_inbound_ports: String,
    pub metrics: Metrics,
    pub outbound_connect_timeout: String,
    pub inbound_connect_timeout: String,
    pub outbound_discovery_cache_unused_timeout: String,
    pub inbound_discovery_cache_unused_timeout: String,
    pub disable_outbound_protocol_detect_timeout: bool,
    pub disable_inbound_protocol_detect_timeout: bool,
    pub shutdown_grace_period: String,
    pub is_gateway: bool,
    pub is_ingress: bool,
    pub wait_before_exit_seconds: u64,
    pub native_sidecar: bool,
    pub resources: Resources,
    pub runtime: Runtime,
    pub uid: i64,
    pub gid: i64,
    pub enable_external_profiles: bool,
    pub opaque_ports: String,
    #[serde(rename = "await")]
    pub await_: bool,
    pub default_inbound_policy: String,
    pub access_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa_mount_path: Option<VolumeMountPath>,
}

impl Default for Proxy {
    fn default() -> Self {
        Proxy {
            image: image!("cr.l5d.io/linkerd/proxy", ""),
            ports: Ports::default(),
            pod_inbound_ports: String::new(),
            enable_shutdown_endpoint: false,
            log_level: "warn,linkerd=info,hickory=error".to_string(),
            log_format: "plain".to_string(),
            log_http_headers: "off".to_string(),
            require_identity_on_inbound_ports: String::new(),
            metrics: Metrics::default(),
            outbound_connect_timeout: "1000ms".to_string(),
            inbound_connect_timeout: "100ms".to_string(),
            outbound_discovery_cache_unused_timeout: "5s".to_string(),
            inbound_discovery_cache_unused_timeout: "90s".to_string(),
            disable_outbound_protocol_detect_timeout: false,
            disable_inbound_protocol_detect_timeout: false,
            shutdown_grace_period: String::new(),
            is_gateway: false,
            is_ingress: false,
            wait_before_exit_seconds: 0,
            native_sidecar: false,
            resources: Resources::default(),
            runtime: Runtime::default(),
            uid: 2102,
            gid: -1,
            enable_external_profiles: false,
            opaque_ports: DEFAULT_OPAQUE_PORTS.to_string(),
            await_: true,
            default_inbound_policy: ALL_UNAUTHENTICATED.to_string(),
            access_log: String::new(),
            capabilities: None,
            sa_mount_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyInit {
    pub image: Image,
    pub ignore_inbound_ports: String,
    pub ignore_outbound_ports: String,
    pub skip_subnets: String,
    pub close_wait_timeout_secs: i64,
    pub run_as_root: bool,
    pub run_as_user: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa_mount_path: Option<VolumeMountPath>,
}

impl Default for ProxyInit {
    fn default() -> Self {
        ProxyInit {
            image: image!("cr.l5d.io/linkerd/proxy-init", PROXY_INIT_VERSION),
            ignore_inbound_ports: "4567,4568".to_string(),
            ignore_outbound_ports: "4567,4568".to_string(),
            skip_subnets: String::new(),
            close_wait_timeout_secs: 0,
            run_as_root: false,
            run_as_user: 65534,
            capabilities: None,
            sa_mount_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugContainer {
    pub image: Image,
}

impl Default for DebugContainer {
    fn default() -> Self {
        DebugContainer {
            image: image!("cr.l5d.io/linkerd/debug", ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Values {
    /// Version stamped on injected pods when the proxy image carries none
    pub control_plane_version: String,
    pub cluster_domain: String,
    pub identity_trust_domain: String,
    #[serde(rename = "identityTrustAnchorsPEM")]
    pub identity_trust_anchors_pem: String,
    pub proxy: Proxy,
    pub proxy_init: ProxyInit,
    pub debug_container: DebugContainer,
}

impl Default for Values {
    fn default() -> Self {
        Values {
            control_plane_version: version(),
            cluster_domain: "cluster.local".to_string(),
            identity_trust_domain: "cluster.local".to_string(),
            identity_trust_anchors_pem: String::new(),
            proxy: Proxy::default(),
            proxy_init: ProxyInit::default(),
            debug_container: DebugContainer::default(),
        }
    }
}

/// Loads values from `path` on top of the compiled defaults.
pub fn load_values_from(path: &Path) -> Result<Values, Box<dyn Error>> {
    let file = File::open(path)
        .map_err(|e| format!("Unable to open values file {}: {}", path.display(), e))?;
    let reader = BufReader::new(file);
    let values: Values = serde_yaml::from_reader(reader)
        .map_err(|e| format!("Unable to parse values file {}: {}", path.display(), e))?;
    debug!("Proxy values: {:?}", values);
    Ok(values)
}

/// Loads values from the file named by `INJECT_VALUES_FILE`, or the compiled defaults when unset.
pub fn load_values() -> Result<Values, Box<dyn Error>> {
    match std::env::var(INJECT_VALUES_FILE_ENV) {
        Ok(path) if !path.is_empty() => {
            info!("Loading proxy values from {}", path);
            load_values_from(PathBuf::from(path).as_path())
        }
        _ => {
            info!("Using default proxy values");
            Ok(Values::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{load_values_from, Values};
    use std::path::PathBuf;

    #[test]
    fn test_default_values() {
        let values = Values::default();
        assert_eq!(values.proxy.ports.admin, 4191);
        assert_eq!(values.proxy.ports.inbound, 4143);
        assert_eq!(values.proxy.runtime.workers.minimum, 1);
        assert!(values.proxy.await_);
        assert_eq!(values.proxy.default_inbound_policy, "all-unauthenticated");
        assert_eq!(values.proxy_init.image.version, "v2.4.3");
        assert_eq!(
            values.proxy.opaque_ports,
            "25,587,3306,4444,5432,6379,9300,11211"
        );
    }

    #[test]
    fn test_partial_values_from_yaml() {
        let values: Values = serde_yaml::from_str(
            r#"
controlPlaneVersion: stable-2.14.0
identityTrustAnchorsPEM: |
  -----BEGIN CERTIFICATE-----
proxy:
  logLevel: debug
  await: false
  ports:
    admin: 9999
  runtime:
    workers:
      maximumCPURatio: 0.5
"#,
        )
        .expect("Unable to parse values");
        assert_eq!(values.control_plane_version, "stable-2.14.0");
        assert_eq!(values.proxy.log_level, "debug");
        assert!(!values.proxy.await_);
        assert_eq!(values.proxy.ports.admin, 9999);
        assert_eq!(values.proxy.ports.control, 4190);
        assert_eq!(values.proxy.runtime.workers.maximum_cpu_ratio, 0.5);
        assert_eq!(values.proxy.uid, 2102);
        assert_eq!(values.proxy_init.ignore_inbound_ports, "4567,4568");
    }

    #[test]
    fn test_load_values_file() {
        let manifest_dir =
            std::env::var("CARGO_MANIFEST_DIR").expect("env var CARGO_MANIFEST_DIR not defined!");
        let values = load_values_from(
            PathBuf::from(format!("{}/../tests/values.yaml", manifest_dir)).as_path(),
        )
        .expect("Unable to load values file");
        assert_eq!(values.control_plane_version, "test-1.0.0");
        assert_eq!(values.proxy.image.name, "cr.l5d.io/linkerd/proxy");
        assert!(!values.identity_trust_anchors_pem.is_empty());
    }
}
