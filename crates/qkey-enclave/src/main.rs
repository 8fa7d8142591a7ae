//! qkey-enclave - host one quorum key instance
//!
//! usage:
//!   qkey-enclave --port 4300 --config enclave.json
//!   qkey-enclave --port 4301 --attestor-key <hex>   # stable attestor identity
//!
//! state lives in process memory only; a restarted instance boots again
//! through /boot/standard or /manifest.

mod api;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use qkey::{Enclave, EnclaveConfig, SoftwareAttestor};
use std::sync::Arc;
use tracing::{info, warn};

/// qkey-enclave - host one quorum key instance
#[derive(Parser)]
#[command(name = "qkey-enclave")]
#[command(about = "quorum key enclave - genesis, share injection and key forwarding")]
#[command(version)]
struct Args {
    /// port to listen on
    #[arg(short, long, default_value = "4300")]
    port: u16,

    /// bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// metrics port (prometheus endpoint, default: api_port + 1000)
    #[arg(long)]
    metrics_port: Option<u16>,

    /// json file with measurements and trusted attestors
    #[arg(short, long)]
    config: Option<String>,

    /// hex ed25519 seed for the software attestor (default: random)
    #[arg(long)]
    attestor_key: Option<String>,
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn load_config(path: Option<&str>) -> Result<EnclaveConfig, BoxError> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&raw)?)
        }
        None => Ok(EnclaveConfig::default()),
    }
}

fn load_attestor(key: Option<&str>) -> Result<SoftwareAttestor, BoxError> {
    match key {
        Some(key) => {
            let bytes: [u8; 32] = hex::decode(key.trim())?
                .try_into()
                .map_err(|_| "attestor key must be 32 bytes")?;
            Ok(SoftwareAttestor::from_bytes(&bytes))
        }
        None => Ok(SoftwareAttestor::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qkey=info".parse()?)
                .add_directive("qkey_enclave=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let metrics_port = args.metrics_port.unwrap_or(args.port.saturating_add(1000));
    let metrics_addr: std::net::SocketAddr = format!("{}:{}", args.bind, metrics_port).parse()?;
    PrometheusBuilder::new().with_http_listener(metrics_addr).install()?;

    let config = load_config(args.config.as_deref())?;
    if config.trusted_attestors.is_empty() {
        warn!("no trusted attestors configured, key export is disabled");
    }
    let attestor = load_attestor(args.attestor_key.as_deref())?;

    let enclave = Enclave::new(attestor, config);
    let status = enclave.status()?;
    api::record_phase(status.phase);

    info!("qkey-enclave v{}", env!("CARGO_PKG_VERSION"));
    info!("  attestor: {}", hex::encode(qkey::Attestor::identity(enclave.attestor())));
    info!("  measurements: {}", enclave.measurements().len());
    info!("  bind: {}:{}", args.bind, args.port);
    info!("  metrics: {}:{}", args.bind, metrics_port);
    warn!("software attestor has no hardware backing - use only for testing");

    let app = api::router(Arc::new(api::AppState { enclave }));

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
