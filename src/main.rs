use clap::{Parser, Subcommand};
use estore::application::Backend;
use estore::config::AppConfig;
use estore::domain::ports::{Ports, SharedCheckoutGateway};
use estore::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryCheckoutGateway, InMemoryDeadLetterStore, InMemoryOrderStore,
    InMemoryPaymentStore,
};
use estore::infrastructure::stripe::StripeGateway;
use estore::interfaces::csv::product_reader::ProductReader;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (optional). Secrets may come from the environment.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load products from a CSV file (id,title,price,number_in_stock) into the catalog
    ImportCatalog { input: PathBuf },
    /// Feed one signed webhook delivery through the processor and wait for reconciliation
    Webhook {
        /// Value of the Stripe-Signature header
        #[arg(long)]
        signature: String,
        /// File holding the raw request body
        payload: PathBuf,
    },
    /// Re-derive order statuses from payments and repair divergence
    Sweep,
    /// Print dead-lettered reconciliation jobs as JSON lines
    DeadLetters,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Arc::new(AppConfig::load(cli.config.as_deref()).into_diagnostic()?);
    init_tracing(&config.log_level);

    let ports = build_ports(&config, cli.db_path)?;
    let backend = Backend::start(Arc::clone(&config), ports);

    let outcome = run(&backend, cli.command).await;
    backend.shutdown().await;
    outcome
}

async fn run(backend: &Backend, command: Command) -> Result<()> {
    match command {
        Command::ImportCatalog { input } => {
            let file = File::open(input).into_diagnostic()?;
            let reader = ProductReader::new(file);
            let mut imported = 0usize;
            for product_result in reader.products() {
                match product_result {
                    Ok(product) => {
                        backend
                            .ports
                            .catalog
                            .put_product(product)
                            .await
                            .into_diagnostic()?;
                        imported += 1;
                    }
                    Err(e) => {
                        eprintln!("Error reading product: {}", e);
                    }
                }
            }
            println!("Imported {imported} products");
        }
        Command::Webhook { signature, payload } => {
            let body = std::fs::read(payload).into_diagnostic()?;
            let ack = backend
                .webhooks
                .process(&body, &signature)
                .into_diagnostic()?;
            println!("{}", serde_json::to_string(&ack).into_diagnostic()?);
        }
        Command::Sweep => {
            let report = backend.engine.sweep().await.into_diagnostic()?;
            println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        }
        Command::DeadLetters => {
            for letter in backend.ports.dead_letters.all().await.into_diagnostic()? {
                println!("{}", serde_json::to_string(&letter).into_diagnostic()?);
            }
        }
    }
    Ok(())
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_gateway(config: &AppConfig) -> SharedCheckoutGateway {
    match &config.stripe.secret_key {
        Some(key) => Arc::new(StripeGateway::new(key.clone(), &config.stripe)),
        None => {
            tracing::warn!("No Stripe secret key configured, using the in-memory checkout gateway");
            Arc::new(InMemoryCheckoutGateway::new())
        }
    }
}

fn in_memory_ports(config: &AppConfig) -> Ports {
    Ports {
        orders: Arc::new(InMemoryOrderStore::new()),
        payments: Arc::new(InMemoryPaymentStore::new()),
        catalog: Arc::new(InMemoryCatalog::new()),
        dead_letters: Arc::new(InMemoryDeadLetterStore::new()),
        gateway: build_gateway(config),
    }
}

fn build_ports(config: &AppConfig, db_path: Option<PathBuf>) -> Result<Ports> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(db_path) => {
            let store = estore::infrastructure::rocksdb::RocksDBStore::open(db_path)
                .into_diagnostic()?;
            Ok(Ports {
                orders: Arc::new(store.clone()),
                payments: Arc::new(store.clone()),
                catalog: Arc::new(store.clone()),
                dead_letters: Arc::new(store),
                gateway: build_gateway(config),
            })
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(in_memory_ports(config))
        }
        None => Ok(in_memory_ports(config)),
    }
}
