use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use trellis_core::ChannelSource;
use trellis_pool::ConnectorPool;
use trellis_router::ResourceManager;
use trellis_server::resources::{AccountSessionResource, KeepAliveResource, ProxyResource};
use trellis_server::{start_coap, start_http_bridge, start_ws_bridge, CoapServerConfig, TlsConfig};
use trellis_session::{start_keepalive_sweeper, SessionRegistry};

#[derive(Parser, Debug)]
#[command(name = "trellis", about = "Cloud-side CoAP message-routing stack")]
struct Args {
    /// CoAP-over-TCP listen address.
    #[arg(long, default_value = "0.0.0.0:5683")]
    coap_addr: String,

    /// HTTP-to-CoAP bridge listen address.
    #[arg(long, default_value = "0.0.0.0:8080")]
    http_addr: String,

    /// WebSocket bridge listen address.
    #[arg(long, default_value = "0.0.0.0:8081")]
    ws_addr: String,

    /// TLS certificate chain in PEM format. Requires --tls-key.
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// TLS private key in PEM format.
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Sibling service address, repeatable: name=host:port
    /// (falls back to the TRELLIS_SIBLINGS environment variable,
    /// comma-separated).
    #[arg(long = "sibling", value_name = "NAME=HOST:PORT")]
    siblings: Vec<String>,

    /// Keepalive sweep period in seconds.
    #[arg(long, default_value_t = 30)]
    keepalive_sweep_secs: u64,
}

fn parse_sibling(spec: &str) -> anyhow::Result<(String, String)> {
    spec.split_once('=')
        .map(|(name, addr)| (name.trim().to_string(), addr.trim().to_string()))
        .filter(|(name, addr)| !name.is_empty() && !addr.is_empty())
        .ok_or_else(|| anyhow::anyhow!("invalid sibling spec {spec:?}, expected name=host:port"))
}

fn sibling_specs(args: &Args) -> anyhow::Result<Vec<(String, String)>> {
    let mut specs = Vec::new();
    for spec in &args.siblings {
        specs.push(parse_sibling(spec)?);
    }
    if specs.is_empty() {
        if let Ok(env) = std::env::var("TRELLIS_SIBLINGS") {
            for spec in env.split(',').filter(|s| !s.trim().is_empty()) {
                specs.push(parse_sibling(spec)?);
            }
        }
    }
    Ok(specs)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    tracing::info!("Starting trellis");

    let siblings = sibling_specs(&args)?;
    let pool = Arc::new(ConnectorPool::new());
    for (name, addr) in &siblings {
        pool.request_connection(name, addr.clone());
        tracing::info!(name = %name, addr = %addr, "Sibling connection requested");
    }
    let configured = |name: &str| siblings.iter().any(|(n, _)| n == name);
    let source: Arc<dyn ChannelSource> = Arc::clone(&pool) as Arc<dyn ChannelSource>;

    let registry = Arc::new(SessionRegistry::new());

    let mut manager = ResourceManager::new();
    manager.register(Arc::new(KeepAliveResource));
    if configured("account") {
        manager.register(Arc::new(AccountSessionResource::new(
            "account",
            Arc::clone(&source),
        )));
        // Account creation happens before sign-in; everything else under the
        // account tree (ACLs included) requires an identity.
        manager.register(Arc::new(
            ProxyResource::new(&["oic", "account"], "account", Arc::clone(&source))
                .allow_unauthenticated(),
        ));
        manager.register(Arc::new(ProxyResource::new(
            &["oic", "acl"],
            "account",
            Arc::clone(&source),
        )));
    }
    if configured("rd") {
        manager.register(Arc::new(ProxyResource::new(
            &["oic", "rd"],
            "rd",
            Arc::clone(&source),
        )));
        manager.register(Arc::new(ProxyResource::new(
            &["oic", "res"],
            "rd",
            Arc::clone(&source),
        )));
    }
    if configured("mq") {
        manager.register(Arc::new(ProxyResource::new(
            &["oic", "mq"],
            "mq",
            Arc::clone(&source),
        )));
    }
    let manager = Arc::new(manager);
    tracing::info!(resources = manager.resource_count(), "Resources registered");

    let tls = match (args.tls_cert, args.tls_key) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        (None, None) => None,
        _ => anyhow::bail!("--tls-cert and --tls-key must be provided together"),
    };

    let coap = start_coap(
        CoapServerConfig {
            addr: args.coap_addr,
            tls,
        },
        Arc::clone(&manager),
        Arc::clone(&registry),
    )
    .await?;
    let http = start_http_bridge(&args.http_addr, Arc::clone(&manager)).await?;
    let ws = start_ws_bridge(&args.ws_addr, Arc::clone(&manager), Arc::clone(&registry)).await?;
    let _sweeper = start_keepalive_sweeper(
        Arc::clone(&registry),
        Duration::from_secs(args.keepalive_sweep_secs),
    );

    tracing::info!(coap = %coap.addr, http = %http.addr, ws = %ws.addr, "trellis ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}
