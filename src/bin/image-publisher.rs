//! Image Publisher CLI
//!
//! Scheduled multi-registry container image publishing

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use image_publisher::core::{ConfigLoadOptions, ConfigLoader, PublishSettings, PublisherConfig};
use image_publisher::orchestration::{EXIT_FATAL, EXIT_SUCCESS};
use image_publisher::{
    ContainerCliClient, EnvCredentialProvider, PublishError, PublishOptions, Publisher,
    RegistryDestination, RetryPolicy, compose_tags, derive_build_identifier, parse_time_zone,
    retry_failed_destinations,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Scheduled multi-registry container image publisher
#[derive(Parser)]
#[command(name = "image-publisher")]
#[command(version)]
#[command(about = "Publish a container image to several registries under date/revision tags", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand
#[derive(Args)]
struct ConfigArgs {
    /// Project path (defaults to current directory)
    #[arg(value_name = "PROJECT_PATH")]
    project_path: Option<PathBuf>,

    /// Configuration file (defaults to PROJECT_PATH/.image-publisher.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tag channel; repeat for several tags per destination
    #[arg(long = "channel")]
    channels: Vec<String>,

    /// Time zone for the date part of the tag (IANA name)
    #[arg(long)]
    time_zone: Option<String>,
}

/// Options that pin the build identifier
#[derive(Args)]
struct IdentityArgs {
    /// Full revision hash (falls back to PUBLISH_REVISION, then GITHUB_SHA)
    #[arg(long)]
    revision: Option<String>,

    /// Pretend the run happens at this RFC 3339 instant
    #[arg(long)]
    now: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish the artifact to every configured destination
    Publish {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Only publish to this destination; may be repeated
        #[arg(long = "destination")]
        destinations: Vec<String>,

        /// Publish to destinations sequentially
        #[arg(long)]
        sequential: bool,

        /// Maximum concurrent destinations
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Print the plan without running any engine command
        #[arg(long)]
        dry_run: bool,

        /// Do not build; require the image to exist locally
        #[arg(long)]
        skip_build: bool,

        /// Total attempts for failed destinations
        #[arg(long, default_value = "1")]
        attempts: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the tags a publish would use
    Tags {
        #[command(flatten)]
        config: ConfigArgs,

        #[command(flatten)]
        identity: IdentityArgs,
    },

    /// Validate configuration and credentials
    Check {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("\n❌ Error");
            eprintln!("{:#}", e);

            if let Some(error) = e.downcast_ref::<PublishError>() {
                let actions = error.suggested_actions();
                if !actions.is_empty() {
                    eprintln!("\n💡 Suggested actions:");
                    for action in actions {
                        eprintln!("  - {}", action);
                    }
                }
            }

            process::exit(EXIT_FATAL);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let env: HashMap<String, String> = std::env::vars().collect();

    match cli.command {
        Commands::Publish {
            config,
            identity,
            destinations,
            sequential,
            max_concurrency,
            dry_run,
            skip_build,
            attempts,
            json,
        } => {
            let overrides = PublisherConfig {
                publish: Some(PublishSettings {
                    sequential: sequential.then_some(true),
                    max_concurrency,
                    command_timeout_secs: None,
                }),
                ..cli_overrides(&config)
            };

            let request = PublishRequest {
                identity,
                destinations,
                dry_run,
                skip_build,
                attempts,
                json,
            };

            publish_command(config, overrides, request, env).await
        }
        Commands::Tags { config, identity } => {
            let overrides = cli_overrides(&config);
            tags_command(config, overrides, identity, env).await
        }
        Commands::Check { config } => {
            let overrides = cli_overrides(&config);
            check_command(config, overrides, env).await
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Configuration layer built from command-line flags
fn cli_overrides(args: &ConfigArgs) -> PublisherConfig {
    PublisherConfig {
        channels: (!args.channels.is_empty()).then(|| args.channels.clone()),
        time_zone: args.time_zone.clone(),
        ..PublisherConfig::overlay()
    }
}

/// Load the layered configuration
async fn load_config(
    args: &ConfigArgs,
    overrides: PublisherConfig,
    env: &HashMap<String, String>,
) -> Result<(PathBuf, PublisherConfig)> {
    let project_path = args.project_path.clone().unwrap_or_else(|| PathBuf::from("."));

    let config = ConfigLoader::load(ConfigLoadOptions {
        project_path: project_path.clone(),
        config_path: args.config.clone(),
        cli_args: Some(overrides),
        env: env.clone(),
    })
    .await?;

    debug!(config = ?config, "Configuration loaded");
    Ok((project_path, config))
}

fn resolve_now(now: Option<&str>) -> Result<DateTime<Utc>> {
    match now {
        Some(value) => {
            let parsed = DateTime::parse_from_rfc3339(value).map_err(|e| {
                PublishError::ConfigError(format!("invalid --now '{}': {}", value, e))
            })?;
            Ok(parsed.with_timezone(&Utc))
        }
        None => Ok(Utc::now()),
    }
}

/// Keep only the destinations named on the command line
fn select_destinations(
    configured: &[RegistryDestination],
    filter: &[String],
) -> Result<Vec<RegistryDestination>, PublishError> {
    if filter.is_empty() {
        return Ok(configured.to_vec());
    }

    for name in filter {
        if !configured.iter().any(|d| &d.name == name) {
            return Err(PublishError::InvalidDestination {
                destination: name.clone(),
                reason: "not present in the configuration".to_string(),
            });
        }
    }

    Ok(configured
        .iter()
        .filter(|d| filter.contains(&d.name))
        .cloned()
        .collect())
}

struct PublishRequest {
    identity: IdentityArgs,
    destinations: Vec<String>,
    dry_run: bool,
    skip_build: bool,
    attempts: u32,
    json: bool,
}

async fn publish_command(
    args: ConfigArgs,
    overrides: PublisherConfig,
    request: PublishRequest,
    env: HashMap<String, String>,
) -> Result<i32> {
    if !request.json {
        println!("\n📦 image-publisher\n");
    }

    let (project_path, config) = load_config(&args, overrides, &env).await?;

    let validation = ConfigLoader::validate(&config);
    if !validation.valid {
        eprintln!("{}", ConfigLoader::format_validation_result(&validation));
        return Ok(EXIT_FATAL);
    }

    let revision = ConfigLoader::resolve_revision(request.identity.revision.clone(), &env)?;
    let now = resolve_now(request.identity.now.as_deref())?;
    let destinations = select_destinations(config.destinations(), &request.destinations)?;
    let mut artifact = config
        .artifact
        .clone()
        .ok_or_else(|| PublishError::ConfigError("artifact image is required".to_string()))?;
    if request.skip_build {
        artifact.build = None;
    }

    let client = ContainerCliClient::new(
        config.engine(),
        &project_path,
        Duration::from_secs(config.command_timeout_secs()),
    )?;
    let credentials = EnvCredentialProvider::with_env(env);

    let options = PublishOptions {
        channels: config.channels(),
        time_zone: parse_time_zone(config.time_zone())?,
        revision,
        sequential: config.sequential(),
        max_concurrency: config.max_concurrency(),
    };
    let publisher = Publisher::new(Arc::new(client), Arc::new(credentials.clone()), options);

    let plan = publisher.plan(&destinations, &artifact, now)?;

    if request.dry_run {
        if request.json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
        } else {
            println!("{}", plan.summary());
            print_credentials(&credentials, &destinations);
        }
        return Ok(EXIT_SUCCESS);
    }

    publisher
        .prepare_artifact(&artifact)
        .await
        .with_context(|| format!("artifact {} is not ready", artifact.image))?;

    info!(engine = %config.engine(), build_id = %plan.build_id, "Artifact ready");

    let policy = RetryPolicy::with_attempts(request.attempts);
    let report =
        retry_failed_destinations(&publisher, &destinations, &artifact, now, &policy).await?;

    if request.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
    }

    Ok(report.exit_code())
}

async fn tags_command(
    args: ConfigArgs,
    overrides: PublisherConfig,
    identity: IdentityArgs,
    env: HashMap<String, String>,
) -> Result<i32> {
    let (_, config) = load_config(&args, overrides, &env).await?;

    let revision = ConfigLoader::resolve_revision(identity.revision, &env)?;
    let now = resolve_now(identity.now.as_deref())?;
    let time_zone = parse_time_zone(config.time_zone())?;

    let build_id = derive_build_identifier(now, time_zone, &revision)?;
    for tag in compose_tags(&config.channels(), &build_id)? {
        println!("{}", tag);
    }

    Ok(EXIT_SUCCESS)
}

async fn check_command(
    args: ConfigArgs,
    overrides: PublisherConfig,
    env: HashMap<String, String>,
) -> Result<i32> {
    println!("\n🔍 Configuration Check\n");

    let (_, config) = load_config(&args, overrides, &env).await?;

    let validation = ConfigLoader::validate(&config);
    println!("{}", ConfigLoader::format_validation_result(&validation));

    print_credentials(&EnvCredentialProvider::with_env(env), config.destinations());

    println!();
    Ok(if validation.valid { EXIT_SUCCESS } else { EXIT_FATAL })
}

fn print_credentials(credentials: &EnvCredentialProvider, destinations: &[RegistryDestination]) {
    for destination in destinations {
        println!("\n🔑 {} ({}):", destination.name, destination.repository());
        for (variable, value) in credentials.describe(destination) {
            match value {
                Some(masked) => println!("  ✅ {} = {}", variable, masked),
                None => println!("  ⚠️  {} is not set", variable),
            }
        }
    }
}
