//! Burrow CLI - expose TCP apps through an authenticated reverse tunnel
//!
//! `burrow listen` runs the server side: peers connect over WebSocket and
//! every app they announce gets a local TCP port. `burrow join` runs the
//! client side: it connects to a server and serves the apps given with
//! `--expose`.

use anyhow::{bail, Context, Result};
use burrow_auth::{
    connect_authenticated, AcceptAll, Acceptor, AuthenticatedTransportFactory,
    FingerprintAllowlist, HandshakeConfig, StoredKeyPairProvider,
};
use burrow_client::{parse_app_definition, ClientConfig, Exposer, StaticAppStateManager};
use burrow_peer::{
    AutoCloseStreams, DefaultPeerFactory, Peer, PeerConfig, PeerConnection, UniquePeerFactory,
};
use burrow_proto::DATA_EXCHANGE_PATH;
use burrow_server::{
    DefaultAppExposer, PortAllocator, RandomPortAllocator, RangePortAllocator, Server,
    ServerConfig,
};
use burrow_transport::Transport;
use burrow_transport_websocket::{
    WebSocketConfig, WebSocketConnector, WebSocketListener, WebSocketTransportFactory,
};
use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Burrow - expose local TCP apps through a reverse tunnel
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Burrow - expose local TCP apps through a reverse tunnel")]
#[command(version)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "BURROW_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept peers and open a local port for every app they expose
    #[command(long_about = r#"
Accept peers over WebSocket and open a local TCP port for every app they
expose. Connections to that port are tunneled to the peer.

EXAMPLES:
  # Accept any peer, ports picked by the OS
  burrow listen --port 8080 --trust-all

  # Only accept known keys, app ports in a fixed range
  burrow listen --port 8080 \
    --trusted 12::34::56::78::90::12::34::56 \
    --port-range-min 30000 --port-range-max 30499

ENVIRONMENT VARIABLES:
  BURROW_HOST            Address to accept peers on
  BURROW_PORT            Port to accept peers on
  BURROW_APP_HOST        Address app ports are bound on
  BURROW_TRUSTED         Comma separated trusted key fingerprints
    "#)]
    Listen {
        /// Address to accept peers on
        #[arg(long, env = "BURROW_HOST", default_value = "0.0.0.0")]
        host: String,

        /// Port to accept peers on
        #[arg(long, env = "BURROW_PORT", default_value = "8080")]
        port: u16,

        /// WebSocket upgrade path
        #[arg(long, env = "BURROW_PATH", default_value = DATA_EXCHANGE_PATH)]
        path: String,

        /// Name this server introduces itself with
        #[arg(long, env = "BURROW_NAME", default_value = "burrow")]
        name: String,

        /// Lowest port handed to exposed apps (random OS port if unset)
        #[arg(long, env = "BURROW_PORT_RANGE_MIN", requires = "port_range_max")]
        port_range_min: Option<u16>,

        /// Highest port handed to exposed apps
        #[arg(long, env = "BURROW_PORT_RANGE_MAX", requires = "port_range_min")]
        port_range_max: Option<u16>,

        /// Address app ports are bound on
        #[arg(long, env = "BURROW_APP_HOST", default_value = "127.0.0.1")]
        app_host: String,

        /// Accept every peer key (traffic is still encrypted)
        #[arg(long, env = "BURROW_TRUST_ALL", conflicts_with = "trusted")]
        trust_all: bool,

        /// Fingerprint of a trusted peer key (repeatable)
        #[arg(long, env = "BURROW_TRUSTED", value_delimiter = ',')]
        trusted: Vec<String>,

        /// Seconds between keepalive pings
        #[arg(long, env = "BURROW_PING_INTERVAL", default_value = "30")]
        ping_interval: u64,
    },

    /// Connect to a server and expose local apps through it
    #[command(long_about = r#"
Connect to a burrow server and expose local apps through it. The server
opens one port per app; connections to it are dialed to the app's address
from this host. Runs until the tunnel closes.

EXAMPLES:
  burrow join --server ws://tunnel.example.com:8080 --name laptop \
    --expose web=127.0.0.1:3000 \
    --expose name=db,address=127.0.0.1:5432

ENVIRONMENT VARIABLES:
  BURROW_SERVER          Server URL (ws:// or wss://)
  BURROW_NAME            Peer name announced to the server
  BURROW_KEY_DIR         Directory holding private.pem
  BURROW_EXPOSE          Semicolon separated app definitions
    "#)]
    Join {
        /// Server URL (ws:// or wss://)
        #[arg(long, env = "BURROW_SERVER")]
        server: String,

        /// Peer name announced to the server
        #[arg(long, env = "BURROW_NAME")]
        name: String,

        /// Directory holding the key pair, created on first use
        #[arg(long, env = "BURROW_KEY_DIR", default_value = ".burrow")]
        key_dir: PathBuf,

        /// App to expose: name=address, name=<name>,address=<address> or a bare address
        #[arg(long, env = "BURROW_EXPOSE", value_delimiter = ';', required = true)]
        expose: Vec<String>,

        /// WebSocket upgrade path
        #[arg(long, env = "BURROW_PATH", default_value = DATA_EXCHANGE_PATH)]
        path: String,

        /// Seconds between keepalive pings
        #[arg(long, env = "BURROW_PING_INTERVAL", default_value = "30")]
        ping_interval: u64,

        /// Seconds allowed for connecting to a local app
        #[arg(long, env = "BURROW_DIAL_TIMEOUT", default_value = "10")]
        dial_timeout: u64,
    },

    /// Print the fingerprint of the local key pair
    Fingerprint {
        /// Directory holding the key pair, created on first use
        #[arg(long, env = "BURROW_KEY_DIR", default_value = ".burrow")]
        key_dir: PathBuf,
    },
}

/// Setup logging; RUST_LOG wins over `--log-level`
fn setup_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

#[allow(clippy::too_many_arguments)]
async fn listen(
    host: String,
    port: u16,
    path: String,
    name: String,
    port_range: Option<(u16, u16)>,
    app_host: String,
    acceptor: Arc<dyn Acceptor>,
    ping_interval: Duration,
) -> Result<()> {
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("Invalid listen address {}", host))?;
    let ws_config = WebSocketConfig::default().with_path(path.clone());
    let listener = WebSocketListener::bind(SocketAddr::new(ip, port), Arc::new(ws_config))
        .await
        .context("Failed to start WebSocket listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read listener address")?;
    info!("Accepting peers on ws://{}{}", local_addr, path);

    let allocator: Arc<dyn PortAllocator> = match port_range {
        Some((min, max)) => {
            info!("App ports are drawn from {}-{}", min, max);
            Arc::new(RangePortAllocator::new(min, max).context("Invalid app port range")?)
        }
        None => Arc::new(RandomPortAllocator),
    };

    let transports = Arc::new(WebSocketTransportFactory::new(listener));
    let authenticated = Arc::new(AuthenticatedTransportFactory::new(transports, acceptor));
    let peers = DefaultPeerFactory::new(name, authenticated)
        .with_config(PeerConfig::default().with_ping_interval(ping_interval));
    let peers = Arc::new(AutoCloseStreams::new(Arc::new(UniquePeerFactory::new(
        Arc::new(peers),
    ))));
    let exposer = Arc::new(DefaultAppExposer::new(
        allocator,
        ServerConfig::default().with_bind_host(app_host),
    ));
    let server = Server::new(peers, exposer);

    tokio::select! {
        result = server.run() => result.context("Server stopped")?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn join(
    server: String,
    name: String,
    key_dir: PathBuf,
    expose: Vec<String>,
    path: String,
    ping_interval: Duration,
    dial_timeout: Duration,
) -> Result<()> {
    let apps = expose
        .iter()
        .map(|definition| parse_app_definition(definition))
        .collect::<Result<Vec<_>, _>>()?;

    let keys = StoredKeyPairProvider::open(&key_dir)
        .with_context(|| format!("Failed to load key pair from {}", key_dir.display()))?;
    info!("Using key {}", keys.fingerprint());

    let connector = WebSocketConnector::new(Arc::new(WebSocketConfig::default().with_path(path)))
        .context("Invalid WebSocket configuration")?;
    let transport: Arc<dyn Transport> = Arc::new(
        connector
            .connect(&server)
            .await
            .with_context(|| format!("Failed to connect to {}", server))?,
    );
    let transport: Arc<dyn Transport> = Arc::new(
        connect_authenticated(transport, &keys, &HandshakeConfig::default())
            .await
            .context("Handshake with server failed")?,
    );
    let peer = PeerConnection::connect(
        &name,
        transport,
        PeerConfig::default().with_ping_interval(ping_interval),
    )
    .await
    .context("Introduction to server failed")?;
    info!("Joined `{}` as `{}`", peer.name(), name);

    let exposer = Exposer::new(
        peer.clone(),
        ClientConfig::default().with_dial_timeout(dial_timeout),
    );
    let manager = StaticAppStateManager::new(apps);

    tokio::select! {
        result = exposer.expose(&manager) => {
            result.context("Exposer stopped")?;
            warn!("Tunnel to {} closed", server);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            if let Err(e) = peer.close().await {
                warn!("Failed to close peer: {}", e);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_level);

    // wss:// connections need a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        Commands::Listen {
            host,
            port,
            path,
            name,
            port_range_min,
            port_range_max,
            app_host,
            trust_all,
            trusted,
            ping_interval,
        } => {
            let acceptor: Arc<dyn Acceptor> = if trust_all {
                warn!("Accepting every peer key (--trust-all)");
                Arc::new(AcceptAll)
            } else if trusted.is_empty() {
                bail!("Refusing to start without --trust-all or at least one --trusted fingerprint");
            } else {
                info!("Trusting {} peer key(s)", trusted.len());
                Arc::new(FingerprintAllowlist::new(trusted))
            };
            let port_range = port_range_min.zip(port_range_max);

            listen(
                host,
                port,
                path,
                name,
                port_range,
                app_host,
                acceptor,
                Duration::from_secs(ping_interval),
            )
            .await
        }
        Commands::Join {
            server,
            name,
            key_dir,
            expose,
            path,
            ping_interval,
            dial_timeout,
        } => {
            join(
                server,
                name,
                key_dir,
                expose,
                path,
                Duration::from_secs(ping_interval),
                Duration::from_secs(dial_timeout),
            )
            .await
        }
        Commands::Fingerprint { key_dir } => {
            let keys = StoredKeyPairProvider::open(&key_dir)
                .with_context(|| format!("Failed to load key pair from {}", key_dir.display()))?;
            println!("{}", keys.fingerprint());
            Ok(())
        }
    }
}
