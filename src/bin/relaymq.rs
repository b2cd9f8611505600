//! relaymq – the broker daemon, with an optional interactive admin shell.
//
//  $ relaymq start --config relaymq.toml --shell
//  > list
//  > delete orders
//  > stats
//
//  $ relaymq admin 127.0.0.1:7878
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{info, warn};

use relaymq::broker::{engine, Broker, RpcClient};
use relaymq::core::protocol::MAX_FRAME_LEN;
use relaymq::logging::init_logging;
use relaymq::{load_config, metrics, Config};

#[derive(Debug, Parser)]
#[command(name = "relaymq", version, about = "RelayMQ broker")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the broker daemon.
    Start {
        /// Path to config TOML (env RELAYMQ_CONFIG overrides)
        #[arg(short, long, default_value = "relaymq.toml")]
        config: String,
        /// Listen address, overriding `server.bind_addr`
        #[arg(short, long)]
        bind: Option<String>,
        /// Run the admin shell on stdin alongside the broker
        #[arg(long)]
        shell: bool,
    },
    /// Open the admin shell against a running broker.
    Admin {
        /// Broker address (host:port)
        addr: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start {
            config,
            bind,
            shell,
        } => {
            let cfg_path = std::env::var("RELAYMQ_CONFIG").unwrap_or(config);
            let mut cfg = read_config(&cfg_path)?;
            if let Some(bind) = bind {
                cfg.server.bind_addr = bind;
            }
            if shell {
                start_with_shell(cfg).await?;
            } else {
                engine::serve(cfg).await?;
            }
        }
        Command::Admin { addr } => {
            let client = RpcClient::connect(addr.as_str(), MAX_FRAME_LEN)
                .await
                .with_context(|| format!("failed to connect to {addr}"))?;
            admin_shell(client, false).await?;
        }
    }
    Ok(())
}

fn read_config(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        return load_config(path).with_context(|| format!("failed to load config {path}"));
    }
    warn!("config file {path} not found; using defaults");
    Ok(Config::default())
}

async fn start_with_shell(cfg: Config) -> anyhow::Result<()> {
    // Recovery must complete before the listener accepts anything.
    let (broker, report) = Broker::open(&cfg)
        .await
        .context("failed to recover durable queues")?;
    info!(
        queues = report.queues,
        messages = report.messages,
        "recovered durable state"
    );

    let listener = TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.server.bind_addr))?;
    let local = listener.local_addr()?;
    println!("RelayMQ broker listening on {local}");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(engine::run(listener, broker, async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
            _ = stop_rx => info!("admin shell closed, shutting down"),
        }
    }));

    let client = RpcClient::connect(local, cfg.server.max_frame_bytes).await?;
    admin_shell(client, true).await?;
    let _ = stop_tx.send(());

    server.await??;
    Ok(())
}

// ───────────────────────────────────────────────────────────
// Interactive admin shell
// ───────────────────────────────────────────────────────────
async fn admin_shell(client: RpcClient, in_process: bool) -> anyhow::Result<()> {
    // readline blocks, so the whole shell lives on a blocking thread and
    // drives the client through the runtime handle.
    let handle = Handle::current();
    tokio::task::spawn_blocking(move || shell_loop(client, in_process, handle)).await?
}

fn shell_loop(mut client: RpcClient, in_process: bool, handle: Handle) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("Type `help` for commands.");

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => {}
            ["help"] => println!("list | delete <queue> | stats | exit"),
            ["exit" | "quit"] => break,
            ["list"] => match handle.block_on(client.list_queues()) {
                Ok(queues) if queues.is_empty() => println!("no queues"),
                Ok(mut queues) => {
                    queues.sort();
                    for q in queues {
                        println!("{q}");
                    }
                }
                Err(e) => println!("error: {e}"),
            },
            ["delete", queue] => match handle.block_on(client.delete_queue(queue)) {
                Ok(()) => println!("deleted {queue}"),
                Err(e) => println!("error: {e}"),
            },
            ["stats"] if in_process => print!("{}", metrics::snapshot()),
            ["stats"] => println!("stats are only available in the broker's own shell"),
            _ => println!("Unknown cmd. Type `help`."),
        }
    }
    Ok(())
}
