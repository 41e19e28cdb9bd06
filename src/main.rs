use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use unruggable_relay::bridge::protocol::{ClientFrame, ContextRole, ServerFrame, SurfaceView};
use unruggable_relay::bridge::surface::reject;
use unruggable_relay::bridge::{Approver, BridgeServer, Broker, BrokerServices, SocketTransport, SurfaceNotification};
use unruggable_relay::bridge::transport::Transport;
use unruggable_relay::config::{RelayConfig, TrustedOrigins};
use unruggable_relay::signing::SoftwareSigner;
use unruggable_relay::storage::{load_active_wallet, save_wallet, FileStore};
use unruggable_relay::token_lookup::JupiterLookup;
use unruggable_relay::wallet::{ActiveWallet, Wallet};

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "unruggable-relay")]
#[command(about = "Local relay between web pages and the Unruggable wallet")]
struct Cli {
    /// Directory holding store.json and blocklist.json
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the request broker and its WebSocket bridge
    Serve {
        #[arg(long, short)]
        port: Option<u16>,

        /// Origin whose popups close automatically (repeatable or comma separated)
        #[arg(long = "trusted-origin", value_delimiter = ',')]
        trusted_origins: Vec<String>,

        /// JSON array of blocked mint addresses and symbols
        #[arg(long)]
        blocklist: Option<PathBuf>,

        /// Reject requests left unanswered this long (0 disables)
        #[arg(long)]
        pending_timeout_secs: Option<u64>,
    },

    /// Approve or reject requests from this terminal
    Surface {
        /// Relay socket, defaults to the configured port on localhost
        #[arg(long)]
        url: Option<String>,
    },

    /// Store a base58 keypair as the active wallet
    ImportKey {
        key: String,

        #[arg(long, default_value = "Imported Wallet")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> CliResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = RelayConfig::from_env()?;
    if let Some(dir) = cli.storage_dir {
        config.storage_dir = dir;
    }

    match cli.command {
        Commands::Serve { port, trusted_origins, blocklist, pending_timeout_secs } => {
            if let Some(port) = port {
                config.port = port;
            }
            if !trusted_origins.is_empty() {
                config.trusted_origins = TrustedOrigins::new(trusted_origins);
            }
            if blocklist.is_some() {
                config.blocklist_path = blocklist;
            }
            if let Some(secs) = pending_timeout_secs {
                config.pending_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            serve(config).await
        }
        Commands::Surface { url } => {
            let url = url.unwrap_or_else(|| config.socket_url());
            run_surface(&config, &url).await
        }
        Commands::ImportKey { key, name } => import_key(&config, &key, name).await,
    }
}

async fn serve(config: RelayConfig) -> CliResult {
    let store = Arc::new(FileStore::new(&config.storage_dir));
    log::info!("💾 Relay: state in {}", store.path().display());
    let wallet = load_active_wallet(store.as_ref()).await?;
    match &wallet {
        Some(wallet) => log::info!("👛 Relay: active wallet {} ({})", wallet.name, wallet.get_public_key()),
        None => log::warn!("⚠️  Relay: no wallet imported, public key requests will come back empty"),
    }

    let blocklist = config.load_blocklist()?;
    let transport = Arc::new(SocketTransport::new());
    let broker = Broker::new(BrokerServices {
        transport: transport.clone(),
        presenter: transport.clone(),
        wallet: Arc::new(ActiveWallet::new(wallet)),
        lookup: Arc::new(JupiterLookup::new(&config.token_search_url)),
        store,
    })
    .with_blocklist(blocklist)
    .with_trusted_origins(config.trusted_origins.clone())
    .with_pending_timeout(config.pending_timeout);

    // Subscribe before the socket accepts anything so no early frame is missed
    let subscription = transport.subscribe();
    tokio::spawn(Arc::new(broker).run(subscription));

    let server = Arc::new(BridgeServer::new(config.port, transport));
    tokio::select! {
        result = server.start() => result,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            log::info!("👋 Relay: shutting down");
            Ok(())
        }
    }
}

async fn import_key(config: &RelayConfig, key: &str, name: String) -> CliResult {
    let wallet = Wallet::from_base58(key, name)?;
    let store = FileStore::new(&config.storage_dir);
    save_wallet(&store, &wallet.to_wallet_info()).await?;
    println!("✅ Imported {} as the active wallet", wallet.get_public_key());
    Ok(())
}

fn frame_text(frame: &ClientFrame) -> Result<Message, serde_json::Error> {
    Ok(Message::Text(serde_json::to_string(frame)?))
}

fn describe(notification: &SurfaceNotification) {
    let label = match notification.view {
        SurfaceView::ShowConnect => "Connect",
        SurfaceView::ShowSignTransaction => "Sign transaction",
        SurfaceView::ShowSignAllTransactions => "Sign all transactions",
        SurfaceView::ShowSignMessage => "Sign message",
        SurfaceView::ShowSwap => "Swap",
        SurfaceView::ShowTokenCreate => "Create token",
    };
    println!();
    println!("━━ {} ━━", label);
    if let Some(id) = &notification.request_id {
        println!("request: {}", id);
    }
    println!("context: {:?}{}", notification.presentation_context, if notification.auto_close { " (trusted)" } else { "" });
    println!("{}", serde_json::to_string_pretty(&notification.payload).unwrap_or_default());
}

async fn run_surface(config: &RelayConfig, url: &str) -> CliResult {
    let store = FileStore::new(&config.storage_dir);
    let wallet = load_active_wallet(&store)
        .await?
        .ok_or("no wallet imported, run import-key first")?;
    let approver = Approver::new(SoftwareSigner::new(wallet));

    let (ws_stream, _) = connect_async(url).await?;
    let (mut write, mut read) = ws_stream.split();
    write
        .send(frame_text(&ClientFrame::Hello { role: ContextRole::Surface, tab_id: None })?)
        .await?;
    log::info!("🖥️  Surface: attached to {}", url);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    while let Some(msg) = read.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let notification = match serde_json::from_str::<ServerFrame>(&text) {
            Ok(ServerFrame::Notification { notification }) => notification,
            Ok(ServerFrame::Error { message }) => {
                log::warn!("⚠️  Surface: relay reported {}", message);
                continue;
            }
            Ok(ServerFrame::Reply { .. }) => continue,
            Err(e) => {
                log::warn!("⚠️  Surface: unreadable frame: {}", e);
                continue;
            }
        };

        describe(&notification);
        let resolution = match notification.view {
            SurfaceView::ShowSwap => None,
            SurfaceView::ShowTokenCreate => {
                log::warn!("⚠️  Surface: token creation needs the wallet app, rejecting");
                reject(&notification)
            }
            _ => {
                print!("Approve? [y/N] ");
                std::io::stdout().flush()?;
                let answer = stdin.next_line().await?.unwrap_or_default();
                if matches!(answer.trim(), "y" | "Y" | "yes") {
                    match approver.approve(&notification).await {
                        Ok(resolution) => Some(resolution),
                        Err(e) => {
                            log::error!("❌ Surface: signing failed: {}", e);
                            reject(&notification)
                        }
                    }
                } else {
                    reject(&notification)
                }
            }
        };

        if let Some(resolution) = resolution {
            write.send(frame_text(&ClientFrame::Resolution { resolution })?).await?;
        }
    }

    log::info!("🖥️  Surface: relay closed the connection");
    Ok(())
}
