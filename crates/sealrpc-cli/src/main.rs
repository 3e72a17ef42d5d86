//! # SealRPC CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Create the server certificate and a client certificate
//! sealrpc keygen -d certificates -n server
//! sealrpc keygen -d certificates -n client
//! mkdir -p certificates/authorized && cp certificates/client.key certificates/authorized/
//!
//! # Serve the demo module
//! sealrpc serve -b 127.0.0.1:5555 \
//!   --server-key certificates/server.key_secret \
//!   --authorized-keys certificates/authorized
//!
//! # Call a function (prints raw JSON)
//! sealrpc call 127.0.0.1:5555 add -a '[2, 3]' \
//!   --server-public-key certificates/server.key \
//!   --client-key certificates/client.key_secret
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use argh::FromArgs;
use sealrpc_client::{Client, ClientConfig};
use sealrpc_server::{Server, ServerConfig};

#[derive(FromArgs)]
/// SealRPC - RPC with server-side secret objects
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Keygen(KeygenArgs),
    Serve(ServeArgs),
    Call(CallArgs),
}

/// Arguments for generating a certificate.
///
/// Writes `<name>.key` (public key only, safe to share) and
/// `<name>.key_secret` (both keys) into the directory.
#[derive(FromArgs)]
#[argh(subcommand, name = "keygen")]
/// generate a key pair certificate
struct KeygenArgs {
    /// directory to write the certificate files to
    #[argh(option, short = 'd', default = "PathBuf::from(\"certificates\")")]
    dir: PathBuf,

    /// base name of the certificate files
    #[argh(option, short = 'n')]
    name: String,
}

/// Arguments for running a server.
///
/// Settings come from the config file when given, then from flags.
/// A flag always wins over the file.
#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo module
struct ServeArgs {
    /// TOML config file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// address to accept clients on (default 127.0.0.1:5555)
    #[argh(option, short = 'b')]
    bind: Option<String>,

    /// certificate holding the server's secret key
    #[argh(option, long = "server-key")]
    server_key: Option<PathBuf>,

    /// directory of client public keys allowed to connect
    #[argh(option, long = "authorized-keys")]
    authorized_keys: Option<PathBuf>,

    /// number of worker threads (default: one per CPU)
    #[argh(option, short = 'w')]
    workers: Option<usize>,
}

/// Arguments for making a single call.
///
/// Prints the result as raw JSON on stdout. Faults and connection errors
/// go to stderr with a non-zero exit code.
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// call a function on a server
struct CallArgs {
    /// server address, host:port
    #[argh(positional)]
    server_address: String,

    /// name of the function to call
    #[argh(positional)]
    function: String,

    /// JSON array of positional arguments
    #[argh(option, short = 'a', long = "args", default = "\"[]\".into()")]
    args: String,

    /// the server's public certificate
    #[argh(option, long = "server-public-key")]
    server_public_key: PathBuf,

    /// this client's secret certificate
    #[argh(option, long = "client-key")]
    client_key: PathBuf,

    /// reply timeout in milliseconds
    #[argh(option, short = 't', default = "2000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    match cli.command {
        Commands::Keygen(args) => {
            init_tracing("info");
            run_keygen(args)
        }
        Commands::Serve(args) => run_serve(args).await,
        // No subscriber: stdout carries only the result.
        Commands::Call(args) => tokio::task::spawn_blocking(move || run_call(args)).await?,
    }
}

fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_keygen(args: KeygenArgs) -> Result<()> {
    let (public, secret) = sealrpc_common::auth::generate_certificates(&args.dir, &args.name)
        .with_context(|| format!("Failed to write certificate '{}'", args.name))?;
    tracing::info!("Wrote {} and {}", public.display(), secret.display());
    Ok(())
}

fn serve_config(args: ServeArgs) -> Result<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::new(),
    };
    if let Some(bind) = args.bind {
        config = config.with_bind(bind);
    }
    if let Some(path) = args.server_key {
        config = config.with_server_key(path);
    }
    if let Some(dir) = args.authorized_keys {
        config = config.with_authorized_keys(dir);
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = serve_config(args)?;
    init_tracing(&config.log_level);

    tracing::info!("Starting SealRPC server on {}", config.bind);
    let routes = sealrpc_cli::demo::routes()?;
    let server = Server::new(config, routes).context("Failed to load key material")?;
    server.run().await?;
    Ok(())
}

fn run_call(args: CallArgs) -> Result<()> {
    let call_args = sealrpc_cli::json::parse_args(&args.args)?;
    let config = ClientConfig::from_files(&args.server_address, &args.server_public_key, &args.client_key)
        .context("Failed to load certificates")?
        .with_timeout(Duration::from_millis(args.timeout_ms));

    let client = Client::new(config);
    let reply = client.call(&args.function, call_args)?;
    println!("{}", sealrpc_cli::json::reply_to_json(&reply));
    Ok(())
}
