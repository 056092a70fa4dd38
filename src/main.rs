//! secretsbeam webhook - mutating admission webhook for secret injection

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use secretsbeam_webhook::annotations::{
    AnnotationScheme, DEFAULT_ANNOTATION_PREFIX, DEFAULT_SECRETS_ROOT,
};
use secretsbeam_webhook::config::AgentImages;
use secretsbeam_webhook::lookup::KubeReader;
use secretsbeam_webhook::pod::PodMutator;
use secretsbeam_webhook::server::{serve, ServerConfig, DEFAULT_PORT};
use secretsbeam_webhook::service_account::ServiceAccountMutator;
use secretsbeam_webhook::webhook::WebhookState;

/// secretsbeam webhook - inject secret-fetching agents into Pods
#[derive(Parser, Debug)]
#[command(name = "secretsbeam-webhook", version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "SERVER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// TLS certificate PEM file; HTTPS is served when both cert and key are set
    #[arg(long, env = "CERT_FILE_PATH")]
    cert_path: Option<PathBuf>,

    /// TLS private key PEM file
    #[arg(long, env = "CERT_KEY_PATH")]
    key_path: Option<PathBuf>,

    /// Agent image for provider `aws`
    #[arg(long, env = "AWS_AGENT_IMAGE")]
    aws_agent_image: Option<String>,

    /// Agent image for provider `gcp`
    #[arg(long, env = "GCP_AGENT_IMAGE")]
    gcp_agent_image: Option<String>,

    /// Agent image for provider `azure`
    #[arg(long, env = "AZURE_AGENT_IMAGE")]
    azure_agent_image: Option<String>,

    /// Prefix shared by all recognised annotation keys
    #[arg(long, env = "ANNOTATION_PREFIX", default_value = DEFAULT_ANNOTATION_PREFIX)]
    annotation_prefix: String,

    /// Directory secrets are written to when no target annotation is given
    #[arg(long, env = "SECRETS_ROOT", default_value = DEFAULT_SECRETS_ROOT)]
    secrets_root: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=info,tower=warn,hyper=warn"));

    let (json_layer, text_layer) = if json {
        (Some(fmt::layer().json().with_target(true)), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider - aws-lc-rs, shared by the TLS listener and the kube client
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let reader = Arc::new(KubeReader::new(client));

    let scheme = AnnotationScheme::new(cli.annotation_prefix, cli.secrets_root);
    let images = AgentImages {
        aws: cli.aws_agent_image,
        gcp: cli.gcp_agent_image,
        azure: cli.azure_agent_image,
    };
    tracing::info!(prefix = %scheme.prefix(), ?images, "Configured secret injection");

    let state = Arc::new(WebhookState::new(
        Arc::new(PodMutator::new(reader.clone(), scheme.clone(), images)),
        Arc::new(ServiceAccountMutator::new(reader, scheme)),
    ));

    let config = ServerConfig::new(cli.port).with_tls(cli.cert_path, cli.key_path);
    serve(config, state)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))
}
