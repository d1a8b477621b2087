use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::classify;
use crate::clipboard::{create_provider, ClipboardContent, ClipboardProvider};
use crate::config::Config;
use crate::pairing::{PairingInfo, PeerAddress};
use crate::sync::{SyncEngine, SyncEvent};

#[derive(Parser)]
#[command(name = "clipwire")]
#[command(about = "Clipboard sync between two paired devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Sync the system clipboard until interrupted")]
    Run {
        /// Peer to connect to (ws://host:port)
        #[arg(short, long)]
        peer: Option<String>,

        /// Pairing payload naming the peer
        #[arg(long, conflicts_with = "peer")]
        pairing: Option<String>,

        /// Address to accept peers on
        #[arg(short, long)]
        listen: Option<String>,

        /// Do not accept inbound peers
        #[arg(long, conflicts_with = "listen")]
        no_listen: bool,
    },

    #[command(about = "Decode a pairing payload")]
    Pair { payload: String },

    #[command(about = "Classify text or a file and print the result as JSON")]
    Classify {
        #[arg(required_unless_present = "file")]
        text: Option<String>,

        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

pub struct CliHandler {
    config_path: Option<PathBuf>,
    config: Option<Config>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self {
            config_path,
            config: None,
        }
    }

    /// Lazily load the configuration when needed
    fn ensure_config(&mut self) -> Result<&Config> {
        if self.config.is_none() {
            let config = Config::load_config(self.config_path.as_deref())
                .context("Failed to load configuration")?;
            self.config = Some(config);
        }
        self.config
            .as_ref()
            .context("Configuration was not loaded")
    }

    /// Log level from the configuration, or `info` when it cannot be loaded
    pub fn preferred_log_level(&mut self) -> String {
        self.ensure_config()
            .map(|config| config.log_level.to_lowercase())
            .unwrap_or_else(|_| "info".to_string())
    }

    pub async fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Run {
                peer,
                pairing,
                listen,
                no_listen,
            } => self.run(peer, pairing, listen, no_listen).await,
            Commands::Pair { payload } => self.pair(&payload),
            Commands::Classify { text, file } => self.classify(text, file),
            Commands::Config { action } => self.handle_config_action(action),
        }
    }

    async fn run(
        &mut self,
        peer: Option<String>,
        pairing: Option<String>,
        listen: Option<String>,
        no_listen: bool,
    ) -> Result<()> {
        let config = self.ensure_config()?.clone();

        let peer = resolve_peer(peer, pairing, &config)?;
        let clipboard = open_clipboard().context("Failed to open the system clipboard")?;
        let engine = Arc::new(SyncEngine::from_config(&config, clipboard));
        let mut events = engine.subscribe();

        engine.start().await;

        if !no_listen {
            let addr = listen.unwrap_or_else(|| config.listen_addr.clone());
            let bound = engine
                .listen(&addr)
                .await
                .with_context(|| format!("Failed to listen on {}", addr))?;
            println!("Listening for peers on ws://{}", bound);
        }

        if let Some(peer) = &peer {
            match engine.connect(peer).await {
                Ok(()) => println!("Connected to {}", peer),
                Err(e) if no_listen => {
                    engine.stop().await;
                    return Err(e).with_context(|| format!("Failed to connect to {}", peer));
                }
                Err(e) => error!("Failed to connect to {}: {}", peer, e),
            }
        } else if no_listen {
            engine.stop().await;
            bail!("Nothing to do: no peer given and listening is disabled");
        }

        info!("clipwire running as '{}', press Ctrl-C to stop", engine.identity().device_name);

        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            tokio::select! {
                _ = &mut interrupted => {
                    info!("Interrupted, shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        warn!("Event log lagged by {} events", count);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        engine.stop().await;
        engine.transport().shutdown().await;
        Ok(())
    }

    fn pair(&self, payload: &str) -> Result<()> {
        let (info, address) = decode_pairing(payload)?;

        println!("Peer: {}", info.device_name);
        println!("Connection string: {}", address);
        Ok(())
    }

    fn classify(&self, text: Option<String>, file: Option<PathBuf>) -> Result<()> {
        let content = match (text, file) {
            (_, Some(path)) => ClipboardContent::reference(path.to_string_lossy()),
            (Some(text), None) => ClipboardContent::text(text),
            (None, None) => bail!("Nothing to classify"),
        };

        let classification = classify::classify(&content);
        println!("{}", serde_json::to_string_pretty(&classification)?);
        Ok(())
    }

    fn handle_config_action(&mut self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let config = self.ensure_config()?;
                println!("{}", toml::to_string_pretty(config)?);
            }
            ConfigAction::Init { force } => {
                let path = Config::init(self.config_path.as_deref(), force)?;
                println!("Example configuration written to {}", path.display());
            }
            ConfigAction::Validate => {
                self.ensure_config()?;
                println!("Configuration is valid");
            }
        }
        Ok(())
    }
}

/// Peer to dial: `--peer`, else the `--pairing` payload, else the config
fn resolve_peer(
    peer: Option<String>,
    pairing: Option<String>,
    config: &Config,
) -> crate::Result<Option<String>> {
    match (peer, pairing) {
        (Some(peer), _) => Ok(Some(peer)),
        (None, Some(payload)) => {
            let (_, address) = decode_pairing(&payload)?;
            Ok(Some(address.to_string()))
        }
        (None, None) => Ok(config.peer.clone()),
    }
}

fn decode_pairing(payload: &str) -> crate::Result<(PairingInfo, PeerAddress)> {
    let info = PairingInfo::decode(payload)?;
    let address = info.peer_address()?;
    Ok((info, address))
}

fn open_clipboard() -> crate::Result<Arc<dyn ClipboardProvider>> {
    Ok(Arc::from(create_provider()?))
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::LocalChange(item) => {
            info!("Local {} copied ({} bytes)", item.content_type, item.size)
        }
        SyncEvent::RemoteApplied(item) => info!(
            "Applied {} from {} ({} bytes)",
            item.content_type, item.source_device, item.size
        ),
        SyncEvent::PeerInfo(peer) => info!(
            "Paired with '{}' ({})",
            peer.device_name, peer.device_type
        ),
        SyncEvent::Connected { peer } => info!("Peer connected: {}", peer),
        SyncEvent::Disconnected { peer, reason } => {
            warn!("Peer {} disconnected: {}", peer, reason)
        }
        SyncEvent::Error(message) => debug!("Sync error: {}", message),
    }
}
