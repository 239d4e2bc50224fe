//! swarmctl - declarative Docker Swarm membership
//!
//! This is the CLI entry point. It reads a resource manifest, runs one
//! lifecycle verb against the declared daemon and keeps the state file in
//! step with what the daemon reports.

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use swarmctl::connection;
use swarmctl::error::{Result, SwarmError};
use swarmctl::lifecycle::{
    ClusterMember, ClusterOwner, LifecycleController, Observation, OperationContext,
    SwarmResource, Verb,
};
use swarmctl::manifest::{Manifest, StateFile};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// swarmctl - manage Docker Swarm membership from declarative manifests
#[derive(Parser)]
#[command(name = "swarmctl")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Initialize, join, observe and leave Docker swarms", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Daemon host used when a manifest leaves node.host empty
    #[arg(short = 'H', long, global = true, env = "DOCKER_HOST")]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize or join a swarm and record the result
    Create(ResourceArgs),
    /// Refresh recorded state from the daemon
    Read(ResourceArgs),
    /// Change a resource in place (always refused)
    Update(ResourceArgs),
    /// Leave the swarm and forget the recorded state
    Delete(ResourceArgs),
    /// Check a manifest without contacting the daemon
    Validate {
        /// Resource manifest (YAML or JSON)
        #[arg(short, long)]
        manifest: PathBuf,
    },
}

#[derive(Args)]
struct ResourceArgs {
    /// Resource manifest (YAML or JSON)
    #[arg(short, long)]
    manifest: PathBuf,
    /// State file holding the observed state
    #[arg(short, long)]
    state: PathBuf,
    /// Abort the operation after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,
}

impl ResourceArgs {
    fn context(&self) -> OperationContext {
        match self.timeout {
            Some(secs) => OperationContext::with_timeout(Duration::from_secs(secs)),
            None => OperationContext::new(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (verb, args) = match cli.command {
        Commands::Create(args) => (Verb::Create, args),
        Commands::Read(args) => (Verb::Read, args),
        Commands::Update(args) => (Verb::Update, args),
        Commands::Delete(args) => (Verb::Delete, args),
        Commands::Validate { manifest } => {
            return validate(&manifest, cli.host.as_deref());
        }
    };

    let mut manifest = Manifest::load(&args.manifest)?;
    manifest.apply_default_host(cli.host.as_deref());

    let controller = LifecycleController::default();
    let ctx = args.context();

    match &manifest {
        Manifest::Owner(config) => {
            run(&controller, &ctx, &ClusterOwner, config, verb, &args.state).await
        }
        Manifest::Member(config) => {
            run(&controller, &ctx, &ClusterMember, config, verb, &args.state).await
        }
    }
}

fn validate(path: &Path, host: Option<&str>) -> Result<()> {
    let mut manifest = Manifest::load(path)?;
    manifest.apply_default_host(host);

    let spec = connection::resolve(manifest.node())?;
    if let Manifest::Member(config) = &manifest {
        config.validate()?;
    }

    println!(
        "{}: {} resource on {}",
        path.display(),
        manifest.kind(),
        spec.host
    );
    Ok(())
}

async fn run<R>(
    controller: &LifecycleController,
    ctx: &OperationContext,
    resource: &R,
    desired: &R::Desired,
    verb: Verb,
    state_path: &Path,
) -> Result<()>
where
    R: SwarmResource,
    R::Observed: Serialize + DeserializeOwned,
{
    let recorded = StateFile::load(state_path)?;

    match verb {
        Verb::Create => {
            if recorded.is_some() {
                return Err(SwarmError::InvalidResourceConfig(format!(
                    "{} already records a {} resource; delete it first",
                    state_path.display(),
                    R::KIND
                )));
            }

            let state = controller.create(ctx, resource, desired).await?;
            StateFile::new(R::KIND, &state)?.save(state_path)?;
            println!("Created {} resource, state written to {}", R::KIND, state_path.display());
        }

        Verb::Read => {
            let Some(recorded) = recorded else {
                println!("No recorded {} resource", R::KIND);
                return Ok(());
            };
            let observed: R::Observed = recorded.decode(R::KIND)?;

            match controller.read(ctx, resource, desired, &observed).await? {
                Observation::Present(state) => {
                    StateFile::new(R::KIND, &state)?.save(state_path)?;
                    println!("{} resource is present", R::KIND);
                }
                Observation::Removed => {
                    StateFile::remove(state_path)?;
                    info!("{} resource disappeared, state cleared", R::KIND);
                    println!("{} resource is gone", R::KIND);
                }
                Observation::Drifted(warning) => {
                    StateFile::remove(state_path)?;
                    warn!("{}", warning);
                    eprintln!("Warning: {}", warning);
                }
            }
        }

        Verb::Update => {
            let Some(recorded) = recorded else {
                return Err(SwarmError::UnsupportedOperation {
                    kind: R::KIND.as_str(),
                });
            };
            let observed: R::Observed = recorded.decode(R::KIND)?;
            controller.update(ctx, resource, desired, &observed).await?;
        }

        Verb::Delete => {
            let recorded = recorded.ok_or_else(|| not_recorded::<R>(state_path))?;
            let observed: R::Observed = recorded.decode(R::KIND)?;

            controller.delete(ctx, resource, desired, &observed).await?;
            StateFile::remove(state_path)?;
            println!("Deleted {} resource", R::KIND);
        }
    }

    Ok(())
}

fn not_recorded<R: SwarmResource>(state_path: &Path) -> SwarmError {
    SwarmError::InvalidResourceConfig(format!(
        "{} records no {} resource",
        state_path.display(),
        R::KIND
    ))
}
