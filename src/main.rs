use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use navigator_sso::{
    AppState,
    auth::{TrustConfiguration, saml::RequestGenerator},
    build_app,
    config::AppConfig,
    db::DbPool,
    jobs, observability,
};

/// CLI arguments for the Navigator SSO service
#[derive(Parser, Debug)]
#[command(version, about = "Navigator SAML single sign-on service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file
    #[arg(short, long, global = true, default_value = "navigator.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the SSO server (default)
    Serve,
    /// Print the service provider metadata XML
    Metadata {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load and validate the configuration, including the SAML trust material
    CheckConfig,
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Metadata { output }) => run_metadata(&args.config, output),
        Some(Command::CheckConfig) => run_check_config(&args.config),
        Some(Command::Migrate) => run_migrate(&args.config).await,
        Some(Command::Serve) | None => run_server(&args.config).await,
    }
}

fn load_config(path: &Path) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn load_trust(config: &AppConfig) -> Arc<TrustConfiguration> {
    match TrustConfiguration::from_config(config) {
        Ok(trust) => Arc::new(trust),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run_metadata(config_path: &Path, output: Option<PathBuf>) {
    let config = load_config(config_path);
    let generator = match RequestGenerator::new(load_trust(&config)) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let xml = generator.service_provider_metadata();

    match output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, xml) {
                eprintln!("Failed to write {}: {}", path.display(), e);
                std::process::exit(1);
            }
            println!("SP metadata written to {}", path.display());
        }
        None => println!("{}", xml),
    }
}

fn run_check_config(config_path: &Path) {
    let config = load_config(config_path);
    let trust = load_trust(&config);

    println!("Configuration OK: {}", config_path.display());
    println!("  SP entity ID:  {}", trust.sp_entity_id());
    println!("  IdP entity ID: {}", trust.idp_entity_id());
    println!("  Callback URL:  {}", trust.callback_url());
    println!("  Frontend URL:  {}", trust.frontend_url());
}

async fn run_migrate(config_path: &Path) {
    let config = load_config(config_path);
    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    tracing::info!(config_file = %config_path.display(), "Running database migrations");

    match DbPool::from_config(&config.database).await {
        Ok(pool) => match pool.run_migrations().await {
            Ok(()) => tracing::info!("Database migrations completed successfully"),
            Err(e) => {
                tracing::error!(error = %e, "Database migrations failed");
                eprintln!("Error: Database migrations failed: {}", e);
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to database");
            eprintln!("Error: Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_server(config_path: &Path) {
    let config = load_config(config_path);

    if let Err(e) = observability::init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    tracing::info!(config_file = %config_path.display(), "Starting Navigator SSO");

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let jobs_config = config.jobs.clone();

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application state");
            std::process::exit(1);
        }
    };

    let cleanup = if jobs_config.cleanup_enabled {
        let targets = state.cleanup_targets();
        Some(tokio::spawn(jobs::start_token_cleanup_worker(
            targets,
            jobs_config,
        )))
    } else {
        tracing::info!("Token cleanup worker disabled");
        None
    };

    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, address = %bind_addr, "Failed to bind to address");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    if let Some(handle) = cleanup {
        handle.abort();
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
