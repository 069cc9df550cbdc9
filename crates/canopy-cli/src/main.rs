//! Compartment and policy explorer
//!
//! `canopy serve` (the default) runs the HTTP boundary in front of the identity
//! service; `canopy browse` walks the compartment tree of a running server from
//! the terminal.

use anyhow::Result;
use canopy_client::DEFAULT_SERVER_URL;
use canopy_server::{
    shutdown_signal, AuthMode, ConfigStore, ExplorerServer, MetadataClient, OciIdentityClient,
    RootResolver, ServerConfig,
};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;
use std::sync::Arc;

mod browse;

#[derive(Parser, Debug)]
#[clap(name = "canopy", author, version, about = "Browse compartments and their policies")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    serve: ServeArgs,

    #[clap(long, short, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the explorer server (default command)
    Serve(ServeArgs),
    /// Browse compartments through a running server
    Browse {
        #[clap(long, env = "CANOPY_SERVER_URL", default_value = DEFAULT_SERVER_URL)]
        server_url: String,
    },
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    #[clap(
        long,
        env = "CANOPY_INSTANCE_PRINCIPAL",
        help = "Authenticate with this machine's identity instead of stored profiles"
    )]
    instance_principal: bool,

    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    #[clap(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    #[clap(long, env = "OCI_CONFIG_FILE", help = "Credentials file (default: ~/.oci/config)")]
    config_file: Option<PathBuf>,

    #[clap(long, help = "Override the regional identity endpoint")]
    identity_endpoint: Option<String>,

    #[clap(long, help = "Disable CORS headers")]
    no_cors: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    match cli.command {
        Some(Commands::Serve(args)) => run_server(args).await,
        Some(Commands::Browse { server_url }) => browse::run(&server_url).await,
        None => run_server(cli.serve).await,
    }
}

fn auth_mode(args: &ServeArgs) -> AuthMode {
    if args.instance_principal {
        log::info!("Using instance principal authentication");
        return AuthMode::InstancePrincipal(Arc::new(RootResolver::new(Arc::new(
            MetadataClient::new(),
        ))));
    }

    let store = match &args.config_file {
        Some(path) => ConfigStore::new(path),
        None => ConfigStore::default_location(),
    };
    log::info!("Using profiles from {}", store.path().display());
    AuthMode::Profile(store)
}

async fn run_server(args: ServeArgs) -> Result<()> {
    let auth = auth_mode(&args);

    let mut identity = OciIdentityClient::new();
    if let Some(endpoint) = &args.identity_endpoint {
        log::info!("Identity endpoint overridden: {}", endpoint);
        identity = identity.with_endpoint(endpoint);
    }

    let server_config = ServerConfig::default()
        .with_bind_addr_str(&format!("{}:{}", args.host, args.port))?
        .with_cors(!args.no_cors)
        .with_logging(true);

    let server = ExplorerServer::with_config(auth, Arc::new(identity), server_config);

    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_serve() {
        let cli = Cli::try_parse_from(["canopy", "--port", "8080", "--instance-principal"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, 8080);
        assert!(cli.serve.instance_principal);
    }

    #[test]
    fn test_browse_subcommand() {
        let cli = Cli::try_parse_from([
            "canopy",
            "browse",
            "--server-url",
            "http://10.0.0.5:3001",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Browse { server_url }) => assert_eq!(server_url, "http://10.0.0.5:3001"),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_profile_mode_uses_config_file() {
        let cli = Cli::try_parse_from(["canopy", "serve", "--config-file", "/tmp/oci-config"]).unwrap();
        let Some(Commands::Serve(args)) = cli.command else {
            panic!("expected serve");
        };
        match auth_mode(&args) {
            AuthMode::Profile(store) => assert_eq!(store.path(), std::path::Path::new("/tmp/oci-config")),
            AuthMode::InstancePrincipal(_) => panic!("expected profile mode"),
        }
    }
}
