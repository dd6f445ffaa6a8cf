//! KT Cloud Operator - Cluster API infrastructure controller for KT Cloud

use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ktcloud_operator::cloud::KtCloudClient;
use ktcloud_operator::config::{CloudConfig, ControllerConfig, IdentityConfig};
use ktcloud_operator::controller::{run_controllers, Context};
use ktcloud_operator::crd::{owned_crds, KTSubjectToken, KTSubjectTokenSpec};
use ktcloud_operator::retry::{retry_with_backoff, RetryConfig};
use ktcloud_operator::store::FIELD_MANAGER;

/// KT Cloud operator - provisions KT Cloud machines for Cluster API clusters
#[derive(Parser, Debug)]
#[command(name = "ktcloud-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(flatten)]
    cloud: CloudConfig,

    #[command(flatten)]
    controller: ControllerConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Watches Cluster, KTCluster and KTMachine objects and converges KT Cloud
    /// infrastructure toward them.
    Controller,

    /// Obtain a subject token and store it for a cluster
    ///
    /// Authenticates against the KT Cloud identity API and applies a
    /// KTSubjectToken named after the cluster. Run it again before the token
    /// expires.
    Login(LoginArgs),
}

/// Login mode arguments
#[derive(Args, Debug)]
struct LoginArgs {
    /// Cluster the token is for
    #[arg(long)]
    cluster: String,

    /// Namespace of the cluster
    #[arg(long, default_value = "default")]
    namespace: String,

    #[command(flatten)]
    identity: IdentityConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over LOG_LEVEL
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if cli.crd {
        for crd in owned_crds() {
            let yaml = serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
            println!("---\n{yaml}");
        }
        return Ok(());
    }

    match cli.command {
        Some(Commands::Login(args)) => run_login(cli.cloud, args).await,
        Some(Commands::Controller) | None => run_controller(cli.cloud, cli.controller).await,
    }
}

/// Run the Cluster, KTCluster and KTMachine controllers
async fn run_controller(cloud: CloudConfig, config: ControllerConfig) -> anyhow::Result<()> {
    config.validate()?;
    let cloud = KtCloudClient::new(cloud)?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    tracing::info!("Installing CRDs...");
    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(
        Context::builder(client.clone(), Arc::new(cloud))
            .config(config)
            .build(),
    );

    run_controllers(client, ctx).await;

    tracing::info!("KT Cloud operator shutting down");
    Ok(())
}

/// Ensure all operator-owned CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply.
/// This ensures the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in owned_crds() {
        let name = crd.name_any();
        tracing::info!(crd = %name, "Installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    Ok(())
}

/// Authenticate and store the subject token for a cluster
async fn run_login(cloud: CloudConfig, args: LoginArgs) -> anyhow::Result<()> {
    let cloud = KtCloudClient::new(cloud)?;

    let issued = {
        let cloud = &cloud;
        let identity = &args.identity;
        retry_with_backoff(&RetryConfig::with_max_attempts(3), "authenticate", move || {
            cloud.authenticate(identity)
        })
        .await?
    };

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let tokens: Api<KTSubjectToken> = Api::namespaced(client, &args.namespace);

    let mut token = KTSubjectToken::new(
        &args.cluster,
        KTSubjectTokenSpec {
            subject_token: issued.token.expose().to_string(),
            expires_at: issued.expires_at,
        },
    );
    token.metadata.namespace = Some(args.namespace.clone());

    tokens
        .patch(
            &args.cluster,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&token),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to store KTSubjectToken {}: {}", args.cluster, e))?;

    tracing::info!(
        cluster = %args.cluster,
        namespace = %args.namespace,
        expires_at = ?issued.expires_at,
        "Stored subject token"
    );
    Ok(())
}
