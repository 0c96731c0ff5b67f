//! # CLI Interface
//!
//! Defines the command-line argument structure for `lavra-server` using
//! `clap` derive. Supports four subcommands: `run`, `init-credentials`,
//! `status`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lavra fiscal document emission server.
///
/// Runs the full emission pipeline as an HTTP service: validates invoice
/// payloads into schema-exact drafts, signs them, submits them to the tax
/// authority, polls for the authorization protocol, and serves the merged
/// artifacts and their rendered sheets.
#[derive(Parser, Debug)]
#[command(
    name = "lavra-server",
    about = "Fiscal document emission service",
    version,
    propagate_version = true
)]
pub struct LavraServerCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the server binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the emission service.
    Run(RunArgs),
    /// Generate a fresh signing key and certificate for an issuer and
    /// write both to disk.
    InitCredentials(InitCredentialsArgs),
    /// Query the status endpoint of a running server.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Authority environment to emit against: "homologation" or "production".
    ///
    /// Homologation documents carry no fiscal value. Switching to
    /// production changes the default endpoints and the environment code
    /// stamped into every document.
    #[arg(long, short = 'e', env = "LAVRA_ENVIRONMENT", default_value = "homologation")]
    pub environment: String,

    /// Two-digit region code of the issuing establishment.
    #[arg(long, env = "LAVRA_REGION_CODE", default_value_t = 35)]
    pub region_code: u8,

    /// Issuer tax id, 14 digits, no punctuation.
    #[arg(long, env = "LAVRA_ISSUER_TAX_ID")]
    pub issuer_tax_id: String,

    /// Path to the sealed signing key file.
    #[arg(long, short = 'k', env = "LAVRA_KEY_PATH", default_value = "lavra-emitter.key")]
    pub key_path: PathBuf,

    /// Path to the certificate issued for the signing key.
    #[arg(long, env = "LAVRA_CERTIFICATE_PATH", default_value = "lavra-certificate.json")]
    pub certificate_path: PathBuf,

    /// Passphrase unsealing the signing key.
    ///
    /// **Never pass this flag in production** — it lands in the process
    /// table and the shell history. Use the environment variable.
    #[arg(long, env = "LAVRA_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,

    /// PEM bundle presented as the mutual-TLS client identity.
    ///
    /// When omitted the transport connects without a client certificate,
    /// which the production authority will refuse.
    #[arg(long, env = "LAVRA_TLS_IDENTITY")]
    pub tls_identity: Option<PathBuf>,

    /// Override the authority submission endpoint URL.
    #[arg(long, env = "LAVRA_SUBMIT_URL")]
    pub submit_url: Option<String>,

    /// Override the authority status-query endpoint URL.
    #[arg(long, env = "LAVRA_QUERY_URL")]
    pub query_url: Option<String>,

    /// Port for the emission API.
    #[arg(long, short = 'p', env = "LAVRA_API_PORT", default_value_t = 8650)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "LAVRA_METRICS_PORT", default_value_t = 8651)]
    pub metrics_port: u16,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "LAVRA_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init-credentials` subcommand.
#[derive(Parser, Debug)]
pub struct InitCredentialsArgs {
    /// Issuer tax id the certificate is issued for.
    #[arg(long, env = "LAVRA_ISSUER_TAX_ID")]
    pub issuer_tax_id: String,

    /// Where to write the sealed signing key.
    #[arg(long, short = 'k', env = "LAVRA_KEY_PATH", default_value = "lavra-emitter.key")]
    pub key_path: PathBuf,

    /// Where to write the certificate.
    #[arg(long, env = "LAVRA_CERTIFICATE_PATH", default_value = "lavra-certificate.json")]
    pub certificate_path: PathBuf,

    /// Passphrase sealing the signing key.
    ///
    /// **Never pass this flag in production** — use the environment
    /// variable.
    #[arg(long, env = "LAVRA_PASSPHRASE", hide_env_values = true)]
    pub passphrase: String,

    /// Certificate validity in days.
    #[arg(long, default_value_t = 365)]
    pub valid_days: i64,

    /// Overwrite credential files that already exist.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Base URL of the running server's API.
    #[arg(long, default_value = "http://127.0.0.1:8650")]
    pub url: String,
}
