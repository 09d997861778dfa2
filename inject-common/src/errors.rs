use std::fmt::Display;

/// Errors that abort the processing of one manifest.
/// Problems with single annotation values are never reported through this type,
/// they end up as diagnostics next to the resolved values.
#[derive(Debug)]
pub enum InjectError {
    /// The manifest could not be parsed into a known structure
    Parse(String),
    /// The owner of a bare pod could not be resolved
    Owner(String),
    /// The patch template could not be rendered or its output is not a valid patch
    Render(String),
    /// The operation is not supported for this kind of resource
    Unsupported(String),
    /// Any other failure talking to the cluster or serving requests
    Service(String),
}

impl InjectError {
    pub fn from_string(error: String) -> Self {
        InjectError::Service(error)
    }

    pub fn from_error<E: Display>(prefix: &str) -> impl Fn(E) -> Self + '_ {
        move |e: E| InjectError::from_string(format!("{}: {}", prefix, e))
    }

    pub fn parse_error<E: Display>(prefix: &str) -> impl Fn(E) -> Self + '_ {
        move |e: E| InjectError::Parse(format!("{}: {}", prefix, e))
    }

    pub fn render_error<E: Display>(prefix: &str) -> impl Fn(E) -> Self + '_ {
        move |e: E| InjectError::Render(format!("{}: {}", prefix, e))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, InjectError::Unsupported(_))
    }
}

impl Display for InjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectError::Parse(e) => write!(f, "Unable to parse resource: {}", e),
            InjectError::Owner(e) => write!(f, "Unable to retrieve owner: {}", e),
            InjectError::Render(e) => write!(f, "Unable to render patch: {}", e),
            InjectError::Unsupported(e) => write!(f, "Unsupported operation: {}", e),
            InjectError::Service(e) => write!(f, "ProxyInjector error: {}", e),
        }
    }
}

impl std::error::Error for InjectError {}

impl From<&str> for InjectError {
    fn from(error: &str) -> Self {
        InjectError::from_string(error.to_string())
    }
}

impl From<String> for InjectError {
    fn from(error: String) -> Self {
        InjectError::from_string(error)
    }
}

impl From<serde_json::error::Error> for InjectError {
    fn from(error: serde_json::error::Error) -> Self {
        InjectError::Parse(error.to_string())
    }
}

impl From<serde_yaml::Error> for InjectError {
    fn from(error: serde_yaml::Error) -> Self {
        InjectError::Parse(error.to_string())
    }
}

impl From<kube::Error> for InjectError {
    fn from(error: kube::Error) -> Self {
        InjectError::from_string(error.to_string())
    }
}
