//! EPP command-line tool.
//!
//! # Commands
//!
//! - `serve` - Run an EPP server from configuration
//! - `check` - Connect, log in, check domain availability, log out

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use epp::{
    client::EppClient,
    config::Config,
    objects::{DomainCheck, DomainCheckData, DomainCheckHandler, DOMAIN_NS},
    protocol::{Command, CommandType, TransIdGenerator, Verb},
    server::{Server, ServerContext},
    session::Dispatcher,
    transport::TransportKind,
    VERSION,
};

#[derive(Parser)]
#[command(name = "epp")]
#[command(version = VERSION)]
#[command(about = "EPP protocol engine - registry provisioning server and client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an EPP server
    Serve {
        /// Config file (default: <config dir>/epp/config.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen port
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind to all interfaces
        #[arg(long)]
        bind_all: bool,

        /// Transport (tcp, tls)
        #[arg(short, long)]
        transport: Option<String>,

        /// PEM certificate chain for TLS
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,

        /// PEM private key for TLS
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Emit logs as JSON lines
        #[arg(long)]
        json_logs: bool,
    },

    /// Check domain availability against a server
    Check {
        /// Domain names to check
        #[arg(required = true)]
        names: Vec<String>,

        /// Config file (default: <config dir>/epp/config.toml if present)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Transport (tcp, tls)
        #[arg(short, long)]
        transport: Option<String>,

        /// CA bundle for TLS
        #[arg(long)]
        ca: Option<PathBuf>,

        /// Proxy chain, host:port[,host:port...]
        #[arg(long)]
        proxy: Option<String>,

        /// Client id
        #[arg(long)]
        client_id: Option<String>,

        /// Password (or EPP_PASSWORD)
        #[arg(long, env = "EPP_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            bind_all,
            transport,
            cert,
            key,
            verbose,
            json_logs,
        } => {
            init_logging(verbose, json_logs);
            let mut config = load_config(config)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if bind_all {
                config.server.host = "0.0.0.0".to_string();
            }
            if let Some(transport) = transport {
                config.server.transport = parse_transport(&transport)?;
            }
            if cert.is_some() {
                config.server.transport = TransportKind::Tls;
                config.server.cert_path = cert;
                config.server.key_path = key;
            }
            cmd_serve(&config)
        },

        Commands::Check {
            names,
            config,
            host,
            port,
            transport,
            ca,
            proxy,
            client_id,
            password,
            verbose,
        } => {
            init_logging(verbose, false);
            let mut config = load_config(config)?;
            if let Some(host) = host {
                config.client.host = host;
            }
            if let Some(port) = port {
                config.client.port = port;
            }
            if let Some(transport) = transport {
                config.client.transport = parse_transport(&transport)?;
            }
            if ca.is_some() {
                config.client.ca_path = ca;
            }
            if proxy.is_some() {
                config.client.proxy = proxy;
            }
            if let Some(client_id) = client_id {
                config.client.client_id = client_id;
            }
            if let Some(password) = password {
                config.client.password = password;
            }
            cmd_check(&config, names)
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    let path = path.or_else(|| Config::default_path().filter(|p| p.exists()));
    let base = match path {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            Config::from_file(path)?
        },
        None => Config::default(),
    };
    Ok(base.merge(Config::from_env()))
}

fn parse_transport(value: &str) -> anyhow::Result<TransportKind> {
    TransportKind::from_str(value)
        .map_err(|_| anyhow::anyhow!("Invalid transport: {}. Use: tcp, tls", value))
}

fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let server_config = config.server_config()?;
    let registry = config.registry()?;

    let mut dispatcher = Dispatcher::new(
        Arc::new(config.authenticator()),
        TransIdGenerator::new("SRV"),
    );
    if registry.has_service(DOMAIN_NS) {
        dispatcher.register(
            CommandType::Check,
            Some(DOMAIN_NS),
            DomainCheckHandler::new(&config.server.provisioned_domains),
        );
    }
    if config.accounts.is_empty() {
        tracing::warn!("No accounts configured; every login will fail");
    }

    tracing::info!(
        "Starting EPP server on {} ({})",
        server_config.addr,
        server_config.transport
    );
    let server = Server::new(ServerContext::new(server_config, registry, dispatcher));

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        server.run().await?;
        Ok::<_, anyhow::Error>(())
    })
}

fn cmd_check(config: &Config, names: Vec<String>) -> anyhow::Result<()> {
    let descriptor = config.connection_descriptor()?;
    let registry = Arc::new(config.registry()?);
    let login = config.client_login();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut client = EppClient::connect(descriptor, registry).await?;
        println!("Connected to {}", client.greeting().server_id);

        let login = login.with_services_from(client.greeting());
        client.login(login).await?;

        let response = client
            .send(Command::object(Verb::Check, DomainCheck::new(&names)))
            .await?;
        match response.res_data::<DomainCheckData>() {
            Some(data) => {
                for result in &data.results {
                    match (result.available, &result.reason) {
                        (true, _) => println!("{:<40} available", result.name),
                        (false, Some(reason)) => println!("{:<40} unavailable ({})", result.name, reason),
                        (false, None) => println!("{:<40} unavailable", result.name),
                    }
                }
            },
            None => println!("Server returned no check data ({})", response.result()),
        }

        client.logout().await?;
        Ok::<_, anyhow::Error>(())
    })
}
