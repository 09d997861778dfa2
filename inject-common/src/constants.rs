pub const INJECT_VALUES_FILE_ENV: &str = "INJECT_VALUES_FILE";
pub const INJECT_LOG_CONFIG_FILE_ENV: &str = "INJECT_LOG_CONFIG_FILE";
pub const INJECT_LOG_CONFIG_FILE: &str = "/opt/proxy-injector/log4rs.yaml";
pub const INJECT_CONTROL_PLANE_NAMESPACE_ENV: &str = "INJECT_CONTROL_PLANE_NAMESPACE";
pub const INJECT_CONTROL_PLANE_NAMESPACE_DEFAULT: &str = "linkerd";
pub const INJECT_CONTAINER_VERSION_OVERRIDE_ENV: &str = "INJECT_CONTAINER_VERSION_OVERRIDE";

pub const MOUNT_PATH_SERVICE_ACCOUNT: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
pub const PROXY_CONTAINER_NAME: &str = "linkerd-proxy";
pub const INIT_CONTAINER_NAME: &str = "linkerd-init";
pub const DEBUG_CONTAINER_NAME: &str = "linkerd-debug";

pub const DEFAULT_OPAQUE_PORTS: &str = "25,587,3306,4444,5432,6379,9300,11211";
pub const PROXY_INIT_VERSION: &str = "v2.4.3";
