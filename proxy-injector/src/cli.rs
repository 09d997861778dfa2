//! `inject` subcommand: adds the proxy, or the annotation enabling it, to manifests.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use futures::future::join_all;
use inject_common::annotations::{
    PROXY_INJECT_ANNOTATION, PROXY_INJECT_ENABLED, PROXY_OPAQUE_PORTS_ANNOTATION,
};
use inject_common::errors::InjectError;
use inject_common::values::Values;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::overrides::{apply_annotation_overrides, get_overridden_values};
use crate::patch::get_pod_patch;
use crate::resource_config::{Origin, ResourceConfig};

const CONFIG_ANNOTATION_PREFIX: &str = "config.linkerd.io/";
const LIST_KIND: &str = "List";

pub struct InjectOptions {
    /// Configuration annotations added to every injected workload
    pub overrides: BTreeMap<String, String>,
    /// Add the proxy containers instead of the annotation enabling injection
    pub manual: bool,
    pub control_plane_namespace: String,
}

#[derive(Debug, Default)]
pub struct InjectOutput {
    pub documents: Vec<String>,
    pub failures: usize,
}

impl InjectOutput {
    pub fn yaml(&self) -> String {
        self.documents.join("---\n")
    }
}

/// Parses `KEY=VALUE` overrides, a key without a domain is a proxy configuration key.
pub fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, String>, InjectError> {
    let mut overrides = BTreeMap::new();
    for o in raw {
        let (k, v) = o.split_once('=').ok_or_else(|| {
            InjectError::Parse(format!("Override {} is not in KEY=VALUE form", o))
        })?;
        let k = if k.contains('/') {
            k.to_string()
        } else {
            format!("{}{}", CONFIG_ANNOTATION_PREFIX, k)
        };
        overrides.insert(k, v.to_string());
    }
    Ok(overrides)
}

/// Values every document is injected with: `values` with the overrides applied.
pub fn base_values(mut values: Values, overrides: &BTreeMap<String, String>) -> Values {
    for d in apply_annotation_overrides(&mut values, overrides, &BTreeMap::new()) {
        warn!("Ignoring override: {}", d);
    }
    values
}

/// Concatenates the given files, `-` is the standard input.
pub fn read_inputs(files: &[String]) -> Result<String, InjectError> {
    let mut inputs = vec![];
    for file in files {
        let input = if file == "-" {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(InjectError::from_error("Unable to read standard input"))?;
            input
        } else {
            std::fs::read_to_string(file)
                .map_err(InjectError::from_error(&format!("Unable to read {}", file)))?
        };
        inputs.push(input);
    }
    Ok(inputs.join("\n---\n"))
}

pub fn split_documents(input: &str) -> Result<Vec<serde_yaml::Value>, InjectError> {
    let mut documents = vec![];
    for document in serde_yaml::Deserializer::from_str(input) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(InjectError::parse_error("Unable to read YAML document"))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

fn inject_list(
    list: &serde_yaml::Value,
    values: &Values,
    options: &InjectOptions,
) -> Result<String, InjectError> {
    let mut list = list.clone();
    if let Some(items) = list.get_mut("items").and_then(|i| i.as_sequence_mut()) {
        for item in items.iter_mut() {
            let injected = inject_document(item, values, options)?;
            *item = serde_yaml::from_str(&injected)?;
        }
    }
    Ok(serde_yaml::to_string(&list)?)
}

/// Injects one document, returning it as YAML.
/// Documents that can not be injected are returned unchanged.
pub fn inject_document(
    document: &serde_yaml::Value,
    values: &Values,
    options: &InjectOptions,
) -> Result<String, InjectError> {
    if document.get("kind").and_then(|k| k.as_str()) == Some(LIST_KIND) {
        return inject_list(document, values, options);
    }
    let original = serde_yaml::to_string(document)?;
    let mut conf = ResourceConfig::new(values, Origin::Cli, &options.control_plane_namespace);
    let report = conf.parse(original.as_bytes())?;

    if conf.is_namespace() {
        debug!("Annotating {}", report.res_name());
        return conf.annotate_namespace(&options.overrides);
    }
    if conf.is_service() {
        return match options.overrides.get(PROXY_OPAQUE_PORTS_ANNOTATION) {
            Some(ports) => {
                let mut annotations = BTreeMap::new();
                annotations.insert(PROXY_OPAQUE_PORTS_ANNOTATION.to_string(), ports.clone());
                conf.annotate_service(&annotations)
            }
            None => Ok(original),
        };
    }

    let (injectable, reasons) = report.injectable();
    if !injectable {
        info!("Skipping {}: {}", report.res_name(), reasons.join(", "));
        return Ok(original);
    }
    if !options.manual {
        conf.append_pod_annotation(PROXY_INJECT_ANNOTATION, PROXY_INJECT_ENABLED);
    }
    conf.append_pod_annotations(&options.overrides);
    let overridden = get_overridden_values(&conf)?;
    for d in overridden.diagnostics.iter() {
        warn!("{}: {}", report.res_name(), d);
    }
    let prefix = conf
        .workload_kind()
        .map(|k| k.patch_path_prefix())
        .unwrap_or_default();
    let patch = get_pod_patch(&mut conf, options.manual, &overridden, prefix)?;

    let mut patched: serde_json::Value = serde_yaml::from_value(document.clone())?;
    json_patch::patch(&mut patched, &patch)
        .map_err(InjectError::render_error("Unable to apply patch"))?;
    info!("{} injected", report.res_name());
    conf.json_to_yaml(&serde_json::to_vec(&patched)?)
}

/// Injects every document of `input`, each one in its own blocking task.
/// The output keeps the order of the input.
pub async fn inject_documents(
    input: &str,
    values: Arc<Values>,
    options: Arc<InjectOptions>,
) -> Result<InjectOutput, InjectError> {
    let documents = split_documents(input)?;
    let tasks = documents.into_iter().map(|document| {
        let values = Arc::clone(&values);
        let options = Arc::clone(&options);
        tokio::task::spawn_blocking(move || {
            let injected = inject_document(&document, &values, &options);
            (document, injected)
        })
    });
    let mut output = InjectOutput::default();
    for task in join_all(tasks).await {
        let (document, injected) =
            task.map_err(InjectError::from_error("Unable to run injection task"))?;
        match injected {
            Ok(yaml) => output.documents.push(yaml),
            Err(e) => {
                error!("Unable to inject document: {}", e);
                output.failures += 1;
                output.documents.push(serde_yaml::to_string(&document)?);
            }
        }
    }
    Ok(output)
}
