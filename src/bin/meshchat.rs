use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use meshchat::{
    ChatConfig, ChatRoom, CompositeSink, ConsoleSink, Node, NodeConfig, NodeError, WriterSink,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(about = "Peer-to-peer chat over libp2p", author, version)]
struct Cli {
    /// Name shown to other peers
    #[arg(short = 'n', long = "nickname", default_value = "anonymous")]
    nickname: String,

    /// Chat room to join
    #[arg(short = 'r', long = "room", default_value = "general")]
    room: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short = 'l', long = "log", default_value = "info")]
    log: String,

    /// Also append node events to this file
    #[arg(long = "log-file", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Multiaddresses to listen on (repeat flag for multiple)
    #[arg(
        long = "listen",
        default_values_t = [String::from("/ip4/0.0.0.0/tcp/0")]
    )]
    listen: Vec<String>,

    /// DHT bootstrap peers; the public libp2p set is used when omitted
    #[arg(long = "bootstrap")]
    bootstrap: Vec<String>,

    /// Disable mDNS peer discovery (useful in sandboxed environments)
    #[arg(long = "disable-mdns", default_value_t = false)]
    disable_mdns: bool,

    /// Disable DHT peer discovery
    #[arg(long = "disable-dht", default_value_t = false)]
    disable_dht: bool,
}

impl Cli {
    fn node_config(&self) -> NodeConfig {
        let mut config = NodeConfig {
            listen_addresses: self.listen.clone(),
            enable_mdns: !self.disable_mdns,
            enable_dht: !self.disable_dht,
            ..NodeConfig::default()
        };
        if !self.bootstrap.is_empty() {
            config.bootstrap_nodes = self.bootstrap.clone();
        }
        config
    }

    fn chat_config(&self) -> ChatConfig {
        ChatConfig::new(&self.nickname, &self.room).with_log_level(&self.log)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let chat = cli.chat_config();
    init_tracing(&chat.log_level);

    let root = CancellationToken::new();
    let ctrl_c = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        ctrl_c.cancel();
    });

    if let Err(e) = run(&cli, &chat, &root).await {
        eprintln!("meshchat failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli, chat: &ChatConfig, root: &CancellationToken) -> Result<(), NodeError> {
    let mut sink = CompositeSink::new().with(Arc::new(ConsoleSink));
    if let Some(path) = &cli.log_file {
        let file = WriterSink::file(path)
            .map_err(|e| NodeError::Config(format!("log file {}: {e}", path.display())))?;
        sink = sink.with(Arc::new(file));
    }

    let node = Node::new(&cli.node_config(), root, Arc::new(sink)).await?;
    let room = node.join_room(chat).await?;
    node.start().await?;
    info!(
        "joined {} as {} (peer id {})",
        room.topic_name(),
        chat.nickname,
        node.peer_id()
    );
    println!("type a message and press enter; /peers lists the room, /quit exits");

    console(&room, root).await;

    root.cancel();
    room.close().await;
    node.shutdown().await;
    Ok(())
}

/// Line-oriented front end: stdin lines are published, room messages printed.
async fn console(room: &ChatRoom, root: &CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = root.cancelled() => break,
            msg = room.next_message() => match msg {
                Some(msg) => println!("{}: {}", msg.sender_nick, msg.message),
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    match line {
                        "" => {}
                        "/quit" => break,
                        "/peers" => {
                            let peers = room.list_peers();
                            println!("{} peer(s) in {}", peers.len(), room.room());
                            for peer in peers {
                                println!("  {peer}");
                            }
                        }
                        text => {
                            if let Err(e) = room.publish(text).await {
                                warn!("failed to send message: {e}");
                                break;
                            }
                            println!("{}: {}", room.nick(), text);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read stdin: {e}");
                    break;
                }
            },
        }
    }
}

fn init_tracing(level: &str) {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| level.into()),
            )
            .with_writer(std::io::stderr)
            .try_init();
    });
}
