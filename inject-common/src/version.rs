use crate::constants::INJECT_CONTAINER_VERSION_OVERRIDE_ENV;

const UNDEFINED_VERSION: &str = "dev-undefined";

/// Build version of this process.
/// `INJECT_CONTAINER_VERSION_OVERRIDE` only applies when no version was set at build time.
pub fn version() -> String {
    match option_env!("INJECT_BUILD_VERSION") {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => std::env::var(INJECT_CONTAINER_VERSION_OVERRIDE_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNDEFINED_VERSION.to_string()),
    }
}
