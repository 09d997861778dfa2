use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::str::from_utf8;
use std::sync::Arc;

use async_trait::async_trait;
use http::{Method, StatusCode};
use hyper::body::Bytes;
use hyper::{Body, Request, Response};
use inject_common::errors::InjectError;
use inject_common::kubernetes::OwnerResolver;
use inject_common::traits::Annotated;
use inject_common::values::Values;
use json_patch::Patch;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::Status;
use kube::Api;
use log::{debug, error, info, warn};
use rustls::{Certificate, PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};

use crate::errors::InjectPatchError;
use crate::overrides::get_overridden_values;
use crate::patch::get_pod_patch;
use crate::resource_config::{Origin, ResourceConfig};

const INJECT_CERT_FILE_ENV: &str = "INJECT_CERT_FILE";
const INJECT_KEY_FILE_ENV: &str = "INJECT_KEY_FILE";
const INJECT_CERT_FILE: &str = "/opt/proxy-injector/k8s/proxy-injector.crt";
const INJECT_KEY_FILE: &str = "/opt/proxy-injector/k8s/proxy-injector.key";
const INJECT_FAILURE_POLICY_ENV: &str = "INJECT_FAILURE_POLICY";

macro_rules! admission_request {
    ($body:ident, $typ:tt) => {{
        let admission_review: AdmissionReview<$typ> =
            serde_json::from_str(&$body).map_err(InjectError::from_error(&format!(
                "Unable to parse AdmissionReview<{}>",
                stringify!($typ)
            )))?;
        let admission_request: AdmissionRequest<$typ> =
            admission_review
                .try_into()
                .map_err(InjectError::from_error(&format!(
                    "Unable to get AdmissionRequest<{}>",
                    stringify!($typ)
                )))?;
        admission_request
    }};
}

macro_rules! admission_response {
    ($body:ident, $response:ident => $expr:expr) => {{
        let admission_review = $response.into_review();
        let body = serde_json::to_string(&admission_review);
        let r: Result<Response<Body>, hyper::Error> = match body {
            Err(e) => Ok(Response::builder()
                .status(StatusCode::UNPROCESSABLE_ENTITY)
                .body(Body::from(e.to_string()))
                .unwrap()),
            Ok($body) => Ok($expr),
        };
        r
    }};
}

macro_rules! allow_admission_response {
    (response => $response:ident) => {{
        let mut status: Status = Default::default();
        status.code = 200;
        $response.allowed = true;
        $response.result = status;
        admission_response!(body, $response => {
            Response::new(Body::from(body))
        })
    }};
}

macro_rules! deny_admission_response {
    (response => $response:ident | error => $e:ident) => {{
        let $response = $response.deny($e.to_string());
        admission_response!(body, $response => {
            Response::new(Body::from(body))
        })
    }};
}

macro_rules! fail_admission_response {
    (error => $e:ident) => {{
        let response = AdmissionResponse::invalid($e.to_string());
        admission_response!(body, response => {
            Response::builder()
                .status(StatusCode::UNPROCESSABLE_ENTITY)
                .body(Body::from(body))
                .unwrap()
        })
    }};
}

/// What to answer when a resource can not be patched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Deny the admission
    Fail,
    /// Admit the resource without patching it
    Ignore,
}

impl FailurePolicy {
    pub fn from_env() -> Self {
        match std::env::var(INJECT_FAILURE_POLICY_ENV) {
            Ok(policy) if policy.eq_ignore_ascii_case("ignore") => FailurePolicy::Ignore,
            _ => FailurePolicy::Fail,
        }
    }
}

#[async_trait]
pub trait NamespaceAnnotations: Send + Sync {
    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, InjectError>;
}

#[async_trait]
impl NamespaceAnnotations for Api<Namespace> {
    async fn namespace_annotations(
        &self,
        namespace: &str,
    ) -> Result<BTreeMap<String, String>, InjectError> {
        let ns = self.get_opt(namespace).await.map_err(InjectError::from_error(&format!(
            "Unable to get Namespace {}",
            namespace
        )))?;
        Ok(ns
            .as_ref()
            .and_then(|ns| Annotated::annotations(ns).cloned())
            .unwrap_or_default())
    }
}

pub struct InjectorContext {
    /// Defaults every request starts from
    pub values: Arc<Values>,
    pub namespaces: Box<dyn NamespaceAnnotations>,
    pub owner_resolver: Box<dyn OwnerResolver>,
    pub control_plane_namespace: String,
    pub failure_policy: FailurePolicy,
}

/// Patch for an admitted object, `None` when it is admitted as it is.
///
/// Pods enabled for injection, by themselves or by their namespace, get the proxy.
/// Other pods and services get the opaque ports annotation, controllers get the
/// configuration their namespace sets so their pods keep it.
pub fn admission_patch(
    values: &Values,
    control_plane_namespace: &str,
    object: &serde_json::Value,
    ns_annotations: BTreeMap<String, String>,
    owner: Option<(String, String)>,
) -> Result<Option<Patch>, InjectError> {
    let mut conf = ResourceConfig::new(values, Origin::Webhook, control_plane_namespace)
        .with_ns_annotations(ns_annotations);
    if let Some(owner) = owner {
        conf = conf.with_owner_retriever(Box::new(move |_: &Pod| {
            Ok::<_, InjectError>(owner.clone())
        }));
    }
    let report = conf.parse(&serde_json::to_vec(object)?)?;
    let (injectable, reasons) = report.injectable();

    if conf.is_pod() && injectable && report.is_annotated() {
        info!("Injecting proxy into {}", report.res_name());
        conf.inherit_namespace_annotations();
        let overridden = get_overridden_values(&conf)?;
        for d in overridden.diagnostics.iter() {
            warn!("{}: {}", report.res_name(), d);
        }
        return get_pod_patch(&mut conf, true, &overridden, "").map(Some);
    }
    if conf.is_pod() || conf.is_service() {
        debug!(
            "Not injecting {} [{}], checking opaque ports",
            report.res_name(),
            reasons.join(", ")
        );
        return conf.create_opaque_ports_patch();
    }
    if conf.has_pod_template() {
        conf.inherit_namespace_annotations();
        if conf.get_override_annotations().is_empty() {
            return Ok(None);
        }
        debug!("Adding namespace configuration to {}", report.res_name());
        let overridden = get_overridden_values(&conf)?;
        let prefix = conf
            .workload_kind()
            .map(|k| k.patch_path_prefix())
            .unwrap_or_default();
        return get_pod_patch(&mut conf, false, &overridden, prefix).map(Some);
    }
    Ok(None)
}

async fn mutate(body: Bytes, context: &InjectorContext) -> Result<AdmissionResponse, InjectPatchError> {
    let body = from_utf8(&body)
        .map(|s| s.to_string())
        .map_err(InjectError::from_error("Unable to parse request body"))?;
    let admission_request = admission_request!(body, DynamicObject);
    let response = Box::new(AdmissionResponse::from(&admission_request));
    let kind = admission_request.kind.kind.clone();
    let mut object = admission_request
        .object
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(InjectError::from)
        .and_then(|o| {
            o.ok_or_else(|| InjectError::Parse("Admission request has no object".to_string()))
        })
        .map_err(InjectPatchError::from_admission_response(response.clone()))?;
    if let Some(fields) = object.as_object_mut() {
        fields
            .entry("kind")
            .or_insert_with(|| serde_json::Value::String(kind.clone()));
    }

    let namespace = admission_request.namespace.clone().unwrap_or_default();
    let ns_annotations = context
        .namespaces
        .namespace_annotations(&namespace)
        .await
        .map_err(InjectPatchError::from_admission_response(response.clone()))?;
    let owner = if kind == "Pod" {
        let pod: Pod = serde_json::from_value(object.clone())
            .map_err(InjectError::parse_error("Unable to parse Pod"))
            .map_err(InjectPatchError::from_admission_response(response.clone()))?;
        let owner = context
            .owner_resolver
            .owner_kind_and_name(&pod)
            .await
            .map_err(InjectPatchError::from_admission_response(response.clone()))?;
        Some(owner)
    } else {
        None
    };

    let patch = admission_patch(
        &context.values,
        &context.control_plane_namespace,
        &object,
        ns_annotations,
        owner,
    )
    .map_err(InjectPatchError::from_admission_response(response.clone()))?;
    match patch {
        Some(patch) if !patch.0.is_empty() => {
            let unpatched = response.clone();
            (*response)
                .with_patch(patch)
                .map_err(InjectError::from_error("Unable to serialize patch"))
                .map_err(InjectPatchError::from_admission_response(unpatched))
        }
        _ => Ok(*response),
    }
}

pub async fn injector_handler(
    req: Request<Body>,
    context: Arc<InjectorContext>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/inject") => {
            let bs = hyper::body::to_bytes(req).await?;
            match mutate(bs, &context).await {
                Ok(mut response) => {
                    info!(
                        "Resource admitted with a patch of {} bytes",
                        response.patch.as_ref().map(|xs| xs.len()).unwrap_or(0)
                    );
                    allow_admission_response!(response => response)
                }
                Err(InjectPatchError::WithResponse(response, error)) => {
                    match context.failure_policy {
                        FailurePolicy::Ignore => {
                            warn!("Patch failed, admitting resource as it is: {}", error);
                            let mut response = *response;
                            allow_admission_response!(response => response)
                        }
                        FailurePolicy::Fail => {
                            error!("Patch failed: {}", error);
                            let response = *response;
                            deny_admission_response!(response => response | error => error)
                        }
                    }
                }
                Err(InjectPatchError::WithoutResponse(error)) => {
                    error!("Patch failed: {}", error);
                    fail_admission_response!(error => error)
                }
            }
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap()),
    }
}

pub fn get_cert_path() -> String {
    std::env::var(INJECT_CERT_FILE_ENV).unwrap_or(INJECT_CERT_FILE.to_string())
}

pub fn get_key_path() -> String {
    std::env::var(INJECT_KEY_FILE_ENV).unwrap_or(INJECT_KEY_FILE.to_string())
}

pub fn load_ssl() -> Result<ServerConfig, InjectError> {
    let cert_file = get_cert_path();
    let key_file = get_key_path();

    let mut cert_reader = BufReader::new(
        File::open(cert_file).map_err(|e| format!("Unable to open cert file: {}", e))?,
    );
    let raw_certs =
        certs(&mut cert_reader).map_err(|e| format!("Unable to load certificates: {}", e))?;
    let certs: Vec<Certificate> = raw_certs.into_iter().map(Certificate).collect();

    let mut key_reader = BufReader::new(
        File::open(&key_file).map_err(|e| format!("Unable to open key file: {}", e))?,
    );
    let mut raw_keys =
        pkcs8_private_keys(&mut key_reader).map_err(|e| format!("Unable to load keys: {}", e))?;
    if raw_keys.is_empty() {
        let mut key_reader = BufReader::new(
            File::open(&key_file).map_err(|e| format!("Unable to open key file: {}", e))?,
        );
        raw_keys =
            rsa_private_keys(&mut key_reader).map_err(|e| format!("Unable to load keys: {}", e))?;
    }
    let key = raw_keys
        .into_iter()
        .map(PrivateKey)
        .next()
        .ok_or_else(|| format!("No private key found in {}", key_file))?;

    Ok(ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| format!("Unable to create ServerConfig with TLS certificate: {}", e))?)
}
