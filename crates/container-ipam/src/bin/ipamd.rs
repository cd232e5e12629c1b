//! ipamd - container IPAM daemon and admin tool
//!
//! Usage:
//!   ipamd serve                          # reconcile, then enforce flow limits until Ctrl-C
//!   ipamd init-range 10.0.2.1 10.0.2.200 # create or extend a subnet pool
//!   ipamd allocate 10.0.2.0              # take the next free address
//!   ipamd release 10.0.2.0 10.0.2.7
//!   ipamd config 10.0.2.0
//!   ipamd lookup <container>
//!   ipamd reconcile
//!   ipamd delete-subnet 10.0.2.0

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use container_ipam::{AddressRange, IpamConfig, IpamService};
use std::net::Ipv4Addr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ipamd")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "IPAMD_CONFIG")]
    config: Option<String>,

    /// Comma-separated etcd endpoints, overriding the config file
    #[arg(long, global = true, env = "IPAMD_ETCD_ENDPOINTS")]
    etcd: Option<String>,

    /// Host name to register assignments under, overriding the config file
    #[arg(long, global = true, env = "IPAMD_HOSTNAME")]
    hostname: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile, then run the flow-control pipeline until interrupted
    Serve,

    /// Add an inclusive address range to its subnet's pool
    InitRange {
        start: Ipv4Addr,
        end: Ipv4Addr,
        /// Prefix length of the subnet (defaults to allocation.default_prefix_len)
        #[arg(long)]
        prefix: Option<u8>,
    },

    /// Allocate an address from a subnet
    Allocate {
        subnet: String,
        /// Request a specific address
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },

    /// Return an address held by this host to the pool
    Release { subnet: String, ip: Ipv4Addr },

    /// Show a subnet's configuration and pool state
    Config { subnet: String },

    /// Show the address bound to a container
    Lookup { container: String },

    /// Release assignments with no live container and check for leaks
    Reconcile,

    /// Remove a subnet and all of its state
    DeleteSubnet { subnet: String },

    /// Print an example configuration file
    ExampleConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Commands::ExampleConfig = cli.command {
        print!("{}", container_ipam::config::example_config());
        return Ok(());
    }

    let mut config = match cli.config {
        Some(ref path) => IpamConfig::load_from(path)?,
        None => IpamConfig::load()?,
    };
    if let Some(endpoints) = cli.etcd {
        config.store.endpoints = endpoints
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
    }
    if let Some(hostname) = cli.hostname {
        config.hostname = hostname;
    }

    let service = IpamService::from_config(config).context("Failed to start IPAM service")?;

    match cli.command {
        Commands::Serve => {
            let pipeline = service.start().await;
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            pipeline.abort();
            tracing::info!("Shutting down");
        }
        Commands::InitRange { start, end, prefix } => {
            let range = AddressRange::new(start, end)?;
            let prefix = prefix.unwrap_or(service.config().allocation.default_prefix_len);
            let init = service
                .pool()
                .initialize_range_with_prefix(range, prefix)
                .await
                .with_context(|| format!("Failed to initialize {}", range))?;
            println!(
                "subnet {}: added {}, skipped {} already assigned",
                init.subnet,
                init.added.len(),
                init.skipped.len()
            );
        }
        Commands::Allocate { subnet, ip } => {
            let allocation = service
                .allocate(&subnet, ip)
                .await
                .with_context(|| format!("Failed to allocate from {}", subnet))?;
            println!("{}", allocation);
        }
        Commands::Release { subnet, ip } => {
            service
                .release(&subnet, ip)
                .await
                .with_context(|| format!("Failed to release {} in {}", ip, subnet))?;
            println!("released {}", ip);
        }
        Commands::Config { subnet } => {
            let config = service.subnet_config(&subnet).await?;
            let free = service.pool().pool_addresses(&subnet).await?;
            let held = service.pool().all_assigned(&subnet).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("free: {}", free.len());
            for assignment in held {
                println!("assigned: {} {}", assignment.host, assignment.address);
            }
        }
        Commands::Lookup { container } => {
            let address = service.lookup_endpoint(&container).await?;
            println!("{}", address);
        }
        Commands::Reconcile => {
            let report = service.reconcile().await.context("Reconciliation failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::DeleteSubnet { subnet } => {
            service.delete_subnet(&subnet).await?;
            println!("deleted {}", subnet);
        }
        Commands::ExampleConfig => {}
    }

    Ok(())
}
