//! pgrole operator
//!
//! Reconciles `Role` and `Grant` resources against PostgreSQL servers.
//!
//! ## Usage
//!
//! ```bash
//! pgrole-operator crdgen | kubectl apply -f -
//! pgrole-operator run --max-concurrent-reconciles 4
//! ```
//!
//! Every flag of `run` can also be set through a `PGROLE_*` environment variable.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use kube::api::Api;
use kube::Client;
use pgrole_db::{PgConnector, PoolConfig};
use pgrole_engine::{Controller, ControllerConfig, RetryStrategy, WorkQueue};
use pgrole_operator::{Grant, KubeStore, Role, crd, watch};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgrole-operator")]
#[command(about = "Declarative PostgreSQL role and grant management", long_about = None)]
#[command(version)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Print the custom resource definitions as YAML
	Crdgen,

	/// Watch resources and reconcile them
	Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
	/// Register the custom resource definitions before starting
	#[arg(long, env = "PGROLE_INSTALL_CRDS")]
	install_crds: bool,

	/// Only watch this namespace
	#[arg(long, env = "PGROLE_NAMESPACE")]
	namespace: Option<String>,

	/// Upper bound of one reconciliation pass, in seconds
	#[arg(long, env = "PGROLE_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
	reconcile_timeout_secs: u64,

	/// Delay before a healthy resource is looked at again, in seconds
	#[arg(long, env = "PGROLE_RESYNC_INTERVAL_SECS", default_value_t = 300)]
	resync_interval_secs: u64,

	/// First retry delay after a failure, in seconds
	#[arg(long, env = "PGROLE_RETRY_INITIAL_SECS", default_value_t = 5)]
	retry_initial_secs: u64,

	/// Largest retry delay, in seconds
	#[arg(long, env = "PGROLE_RETRY_MAX_SECS", default_value_t = 300)]
	retry_max_secs: u64,

	/// Passes running at the same time
	#[arg(long, env = "PGROLE_MAX_CONCURRENT_RECONCILES", default_value_t = 8)]
	max_concurrent_reconciles: usize,

	/// Connections per PostgreSQL server
	#[arg(long, env = "PGROLE_MAX_CONNECTIONS", default_value_t = 4)]
	max_connections: u32,

	/// Server-side statement timeout, in seconds
	#[arg(long, env = "PGROLE_STATEMENT_TIMEOUT_SECS", default_value_t = 30)]
	statement_timeout_secs: u64,
}

impl RunArgs {
	fn controller_config(&self) -> ControllerConfig {
		ControllerConfig::new()
			.with_reconcile_timeout(Duration::from_secs(self.reconcile_timeout_secs))
			.with_resync_interval(Duration::from_secs(self.resync_interval_secs))
			.with_retry_strategy(RetryStrategy::ExponentialBackoff {
				initial_delay: Duration::from_secs(self.retry_initial_secs),
				max_delay: Duration::from_secs(self.retry_max_secs),
			})
			.with_max_concurrent_reconciles(self.max_concurrent_reconciles)
	}

	fn pool_config(&self) -> PoolConfig {
		PoolConfig::new()
			.with_max_connections(self.max_connections)
			.with_statement_timeout(Duration::from_secs(self.statement_timeout_secs))
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = Cli::parse();
	match cli.command {
		Commands::Crdgen => {
			print!("{}", crd::crd_yaml().context("failed to render CRDs")?);
			Ok(())
		}
		Commands::Run(args) => {
			init_tracing();
			run(args).await
		}
	}
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
	tracing::info!(?args, "operator starting");
	let client = Client::try_default()
		.await
		.context("failed to create kubernetes client")?;

	if args.install_crds {
		crd::install(client.clone())
			.await
			.context("failed to install CRDs")?;
	}

	let config = args.controller_config();
	let connector = Arc::new(PgConnector::new(args.pool_config())?);
	let store = Arc::new(KubeStore::new(client.clone()));
	let controller = Controller::new(
		config.clone(),
		store.clone(),
		store.clone(),
		store,
		connector.clone(),
	)?;
	let queue = WorkQueue::new(Arc::new(controller), config.max_concurrent_reconciles);

	let (roles, grants): (Api<Role>, Api<Grant>) = match &args.namespace {
		Some(namespace) => (
			Api::namespaced(client.clone(), namespace),
			Api::namespaced(client, namespace),
		),
		None => (Api::all(client.clone()), Api::all(client)),
	};

	let mut tasks = JoinSet::new();
	tasks.spawn(watch::run(roles, queue.clone()));
	tasks.spawn(watch::run(grants, queue.clone()));

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("shutdown signal received");
		}
		Some(result) = tasks.join_next() => {
			if let Err(e) = result {
				tracing::error!(error = %e, "watch task failed");
			}
		}
	}

	tasks.abort_all();
	while tasks.join_next().await.is_some() {}
	queue.shutdown().await;
	connector.close_all().await;
	tracing::info!("operator stopped");
	Ok(())
}

fn init_tracing() {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	tracing_subscriber::fmt()
		.json()
		.with_env_filter(filter)
		.with_current_span(false)
		.with_span_list(false)
		.init();
}
