use crate::cli::{base_values, inject_documents, parse_overrides, read_inputs, InjectOptions};
use crate::webhook::{injector_handler, load_ssl, FailurePolicy, InjectorContext};
use clap::{Parser, Subcommand};
use futures_util::stream::StreamExt;
use hyper::server::accept;
use hyper::server::conn::AddrIncoming;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use inject_common::constants::{
    INJECT_CONTROL_PLANE_NAMESPACE_DEFAULT, INJECT_CONTROL_PLANE_NAMESPACE_ENV,
    INJECT_LOG_CONFIG_FILE, INJECT_LOG_CONFIG_FILE_ENV,
};
use inject_common::kubernetes::{get_k8s_client, KubeOwnerResolver};
use inject_common::values::{load_values, Values};
use k8s_openapi::api::core::v1::Namespace;
use kube::Api;
use log::{error, info, LevelFilter};
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use std::convert::Infallible;
use std::error::Error;
use std::future::ready;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tls_listener::TlsListener;

mod cli;
mod errors;
mod opaque_ports;
mod overrides;
mod patch;
mod renderer;
mod report;
mod resource_config;
mod webhook;
mod workload;

pub type Acceptor = tokio_rustls::TlsAcceptor;

#[derive(Debug, Subcommand)]
enum ProxyInjectorCommands {
    /// Adds the proxy, or the annotation enabling it, to Kubernetes manifests
    Inject {
        /// Manifest files, `-` reads the standard input
        #[clap(default_value = "-")]
        files: Vec<String>,
        /// Proxy configuration added to every workload, as KEY=VALUE
        #[clap(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
        /// Adds the proxy containers instead of the annotation enabling injection
        #[clap(long)]
        manual: bool,
        /// Version of the proxy image
        #[clap(long)]
        proxy_version: Option<String>,
    },
    /// Runs the mutating admission webhook
    Webhook,
}

#[derive(Debug, Parser)]
#[clap(name = "proxy-injector")]
struct ProxyInjector {
    /// Namespace of the control plane
    #[clap(long, global = true)]
    control_plane_namespace: Option<String>,
    #[clap(subcommand)]
    command: ProxyInjectorCommands,
}

fn init_logger() -> Result<(), Box<dyn Error>> {
    let config_file =
        std::env::var(INJECT_LOG_CONFIG_FILE_ENV).unwrap_or(INJECT_LOG_CONFIG_FILE.to_string());
    if Path::new(&config_file).exists() {
        log4rs::init_file(&config_file, Default::default())?;
    } else {
        // Manifests are written to stdout
        let stderr = ConsoleAppender::builder().target(Target::Stderr).build();
        let config = Config::builder()
            .appender(Appender::builder().build("stderr", Box::new(stderr)))
            .build(Root::builder().appender("stderr").build(LevelFilter::Info))?;
        log4rs::init_config(config)?;
    }
    Ok(())
}

async fn inject(
    values: Values,
    files: Vec<String>,
    overrides: Vec<String>,
    manual: bool,
    control_plane_namespace: String,
) -> Result<usize, Box<dyn Error>> {
    let overrides = parse_overrides(&overrides)?;
    let values = base_values(values, &overrides);
    let input = read_inputs(&files)?;
    let options = InjectOptions {
        overrides,
        manual,
        control_plane_namespace,
    };
    let output = inject_documents(&input, Arc::new(values), Arc::new(options)).await?;
    print!("{}", output.yaml());
    Ok(output.failures)
}

async fn webhook(values: Values, control_plane_namespace: String) -> Result<(), Box<dyn Error>> {
    let k8s_client = get_k8s_client().await?;
    let injector_context = Arc::new(InjectorContext {
        values: Arc::new(values),
        namespaces: Box::new(Api::<Namespace>::all(k8s_client.clone())),
        owner_resolver: Box::new(KubeOwnerResolver::new(k8s_client)),
        control_plane_namespace,
        failure_policy: FailurePolicy::from_env(),
    });

    let ssl_config = load_ssl()?;
    let addr: SocketAddr = ([0, 0, 0, 0], 8443).into();
    let tls_acceptor: Acceptor = Arc::new(ssl_config).into();
    let make_service = {
        make_service_fn(move |_conn| {
            let injector_context = injector_context.clone();
            async move {
                let injector_context = injector_context.clone();
                Ok::<_, Infallible>(service_fn(move |req| {
                    injector_handler(req, injector_context.clone())
                }))
            }
        })
    };
    let incoming = TlsListener::new(tls_acceptor, AddrIncoming::bind(&addr)?).filter(|c| {
        if let Err(e) = c {
            error!("Error running proxy injector server: {:?}", e);
            ready(false)
        } else {
            ready(true)
        }
    });

    info!("Starting proxy injector server on {}", addr);
    let server = Server::builder(accept::from_stream(incoming)).serve(make_service);
    server.await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logger()?;
    let args = ProxyInjector::parse();
    let control_plane_namespace = args.control_plane_namespace.unwrap_or_else(|| {
        std::env::var(INJECT_CONTROL_PLANE_NAMESPACE_ENV)
            .unwrap_or(INJECT_CONTROL_PLANE_NAMESPACE_DEFAULT.to_string())
    });
    let mut values = load_values()?;
    match args.command {
        ProxyInjectorCommands::Inject {
            files,
            overrides,
            manual,
            proxy_version,
        } => {
            if let Some(version) = proxy_version {
                values.proxy.image.version = version;
            }
            let failures = inject(values, files, overrides, manual, control_plane_namespace).await?;
            if failures > 0 {
                error!("{} documents could not be injected", failures);
                std::process::exit(1);
            }
        }
        ProxyInjectorCommands::Webhook => {
            info!("Starting proxy injector ...");
            webhook(values, control_plane_namespace).await?;
        }
    }
    Ok(())
}
