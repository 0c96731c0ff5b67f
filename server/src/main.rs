// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Lavra Emission Server
//!
//! Entry point for the `lavra-server` binary. Parses CLI arguments,
//! initializes logging and metrics, loads the signing credentials, and
//! serves the emission pipeline over HTTP.
//!
//! The binary supports four subcommands:
//!
//! - `run`              — start the emission server
//! - `init-credentials` — generate and store a signing keypair + certificate
//! - `status`           — query a running server's status endpoint
//! - `version`          — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use lavra_pipeline::config::{EmitterConfig, Environment};
use lavra_pipeline::emission::EmissionPipeline;
use lavra_pipeline::sign::SigningCredentials;
use lavra_pipeline::transport::HttpAuthorityEndpoint;

use cli::{Commands, LavraServerCli};
use logging::LogFormat;
use metrics::EmitterMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = LavraServerCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::InitCredentials(args) => init_credentials(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Parses the environment flag. Unknown values are a hard error; silently
/// falling back could point a production invoice at the wrong world.
fn parse_environment(value: &str) -> Result<Environment> {
    match value.to_lowercase().as_str() {
        "production" | "prod" => Ok(Environment::Production),
        "homologation" | "homolog" | "staging" => Ok(Environment::Homologation),
        other => anyhow::bail!(
            "unknown environment {:?} (expected \"homologation\" or \"production\")",
            other
        ),
    }
}

/// Starts the full emission server: API endpoints and the metrics endpoint.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "lavra_server=info,lavra_pipeline=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    let environment = parse_environment(&args.environment)?;

    tracing::info!(
        environment = %environment,
        region_code = args.region_code,
        issuer_tax_id = %args.issuer_tax_id,
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        "starting lavra-server"
    );

    // --- Emitter configuration ---
    let mut config = EmitterConfig::new(
        environment,
        args.region_code,
        args.issuer_tax_id,
        args.key_path,
        args.certificate_path,
        args.passphrase,
    );
    config.tls_identity_path = args.tls_identity;
    if let Some(url) = args.submit_url {
        config.submit_url = Some(url);
    }
    if let Some(url) = args.query_url {
        config.query_url = Some(url);
    }
    tracing::info!(
        submit_endpoint = %config.submit_endpoint(),
        query_endpoint = %config.query_endpoint(),
        "authority endpoints resolved"
    );

    // --- Signing credentials ---
    let credentials = SigningCredentials::load(&config).with_context(|| {
        format!(
            "failed to load signing credentials from {} / {}",
            config.key_path.display(),
            config.certificate_path.display()
        )
    })?;
    tracing::info!(
        certificate_serial = %credentials.certificate.serial,
        valid_until = %credentials.certificate.not_after,
        "signing credentials loaded"
    );

    // --- Authority transport ---
    let endpoint = HttpAuthorityEndpoint::from_config(&config)
        .context("failed to build the authority HTTP client")?;

    // --- Metrics ---
    let server_metrics = Arc::new(EmitterMetrics::new());

    // --- Emission pipeline ---
    let pipeline = Arc::new(EmissionPipeline::new(config, credentials, endpoint));

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (schema {})",
            env!("CARGO_PKG_VERSION"),
            lavra_pipeline::config::SCHEMA_VERSION,
        ),
        environment: environment.to_string(),
        pipeline,
        metrics: Arc::clone(&server_metrics),
        started_at: chrono::Utc::now(),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&server_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("lavra-server stopped");
    Ok(())
}

/// Generates a fresh signing keypair and certificate and stores them at the
/// given paths, sealed under the passphrase.
fn init_credentials(args: cli::InitCredentialsArgs) -> Result<()> {
    logging::init_logging("lavra_server=info", LogFormat::Pretty);

    if !args.force && (args.key_path.exists() || args.certificate_path.exists()) {
        anyhow::bail!(
            "credential files already exist at {} / {} (pass --force to overwrite)",
            args.key_path.display(),
            args.certificate_path.display()
        );
    }

    tracing::info!(
        issuer_tax_id = %args.issuer_tax_id,
        valid_days = args.valid_days,
        "provisioning signing credentials"
    );

    let credentials = SigningCredentials::provision(&args.issuer_tax_id, args.valid_days);
    credentials
        .store(&args.key_path, &args.certificate_path, &args.passphrase)
        .with_context(|| {
            format!(
                "failed to store credentials at {} / {}",
                args.key_path.display(),
                args.certificate_path.display()
            )
        })?;

    println!("Credentials initialized successfully.");
    println!("  Issuer tax id : {}", args.issuer_tax_id);
    println!("  Signing key   : {}", args.key_path.display());
    println!("  Certificate   : {}", args.certificate_path.display());
    println!("  Serial        : {}", credentials.certificate.serial);
    println!("  Public key    : {}", credentials.certificate.public_key_hex);
    println!("  Valid until   : {}", credentials.certificate.not_after);

    Ok(())
}

/// Queries a running server's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.url.trim_end_matches('/'));
    let body: String = http_get_once(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal one-shot HTTP GET over a raw TCP stream. The status subcommand
/// talks to localhost; a full HTTP client dependency in the binary just for
/// this would be excessive.
async fn http_get_once(url: &str) -> Result<String> {
    let parsed: url::Url = url
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid URL: {}", e))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("missing host in URL"))?;
    let port = parsed.port().unwrap_or(80);
    let path = parsed.path();

    let addr = format!("{}:{}", host, port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, host,
    );

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Prints version information to stdout.
fn print_version() {
    println!("lavra-server {}", env!("CARGO_PKG_VERSION"));
    println!("schema       {}", lavra_pipeline::config::SCHEMA_VERSION);
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Minimal URL parser, just enough to extract host, port, and path for
/// the status subcommand.
mod url {
    pub struct Url {
        host: String,
        port: Option<u16>,
        path: String,
    }

    impl Url {
        pub fn host_str(&self) -> Option<&str> {
            Some(&self.host)
        }

        pub fn port(&self) -> Option<u16> {
            self.port
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl std::str::FromStr for Url {
        type Err = String;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            let rest = s
                .strip_prefix("http://")
                .or_else(|| s.strip_prefix("https://"))
                .unwrap_or(s);

            let (authority, path) = match rest.find('/') {
                Some(i) => (&rest[..i], &rest[i..]),
                None => (rest, "/"),
            };

            let (host, port) = match authority.rfind(':') {
                Some(i) => {
                    let p = authority[i + 1..]
                        .parse::<u16>()
                        .map_err(|e| format!("bad port: {}", e))?;
                    (authority[..i].to_string(), Some(p))
                }
                None => (authority.to_string(), None),
            };

            Ok(Url {
                host,
                port,
                path: path.to_string(),
            })
        }
    }
}
