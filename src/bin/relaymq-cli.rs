//! Producer / consumer client for a RelayMQ broker.
//!
//!   $ relaymq-cli produce                       # interactive prompts
//!   $ relaymq-cli produce -q orders --durable "hello"
//!   $ relaymq-cli consume orders --listen 127.0.0.1:9001

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rustyline::DefaultEditor;
use tokio::runtime::Handle;
use tracing::info;

use relaymq::broker::{CallbackServer, RpcClient};
use relaymq::core::protocol::MAX_FRAME_LEN;
use relaymq::logging::init_logging;

/// Command-line interface for RelayMQ.
#[derive(Debug, Parser)]
#[command(name = "relaymq-cli", version, about = "RelayMQ producer and consumer")]
pub struct Cli {
    /// Address of the RelayMQ broker (e.g. 127.0.0.1:7878)
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    pub broker: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Publish messages. Without a message, prompts for queue, message and durability.
    Produce {
        /// Queue name
        #[arg(short, long)]
        queue: Option<String>,
        /// Declare the queue durable if this call creates it
        #[arg(short, long)]
        durable: bool,
        /// Message payload (enclose in quotes for spaces)
        message: Option<String>,
    },

    /// Receive messages from a queue through a local callback endpoint.
    Consume {
        /// Queue name
        queue: String,
        /// Address the callback endpoint listens on; must be reachable by the broker
        #[arg(short, long, default_value = "127.0.0.1:0")]
        listen: String,
        /// Declare the queue durable if this call creates it
        #[arg(short, long)]
        durable: bool,
        /// Reject the first N deliveries (to exercise redelivery)
        #[arg(long, default_value_t = 0)]
        reject_first: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    let client = RpcClient::connect(cli.broker.as_str(), MAX_FRAME_LEN)
        .await
        .with_context(|| format!("Failed to connect to {}", cli.broker))?;

    match cli.command {
        Command::Produce {
            queue: Some(queue),
            durable,
            message: Some(message),
        } => {
            let mut client = client;
            client.declare_queue(&queue, durable).await?;
            client.publish(&queue, message).await?;
            println!("> published to {queue}");
        }
        Command::Produce { .. } => {
            let handle = Handle::current();
            tokio::task::spawn_blocking(move || prompt_loop(client, handle)).await??;
        }
        Command::Consume {
            queue,
            listen,
            durable,
            reject_first,
        } => consume(client, &queue, &listen, durable, reject_first).await?,
    }
    Ok(())
}

fn prompt_loop(mut client: RpcClient, handle: Handle) -> anyhow::Result<()> {
    let mut rl = DefaultEditor::new()?;
    loop {
        let Ok(queue) = rl.readline("queue> ") else { break };
        let Ok(message) = rl.readline("message> ") else { break };
        let Ok(durable) = rl.readline("durable if new queue? (true/false)> ") else { break };

        let durable = match durable.trim().parse::<bool>() {
            Ok(d) => d,
            Err(e) => {
                eprintln!("> not a boolean: {e}");
                continue;
            }
        };
        let queue = queue.trim().to_string();

        let result = handle.block_on(async {
            client.declare_queue(&queue, durable).await?;
            client.publish(&queue, message).await
        });
        match result {
            Ok(()) => println!("> published to {queue}"),
            Err(e) => eprintln!("> publish failed: {e}"),
        }
    }
    Ok(())
}

async fn consume(
    mut client: RpcClient,
    queue: &str,
    listen: &str,
    durable: bool,
    reject_first: u32,
) -> anyhow::Result<()> {
    let server = CallbackServer::bind(listen, MAX_FRAME_LEN).await?;
    let callback_addr = server.local_addr()?.to_string();

    let remaining_rejects = Arc::new(AtomicU32::new(reject_first));
    let _endpoint = server.spawn(move |queue: String, payload: String| {
        let remaining_rejects = Arc::clone(&remaining_rejects);
        async move {
            let reject = remaining_rejects
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if reject {
                println!("[{queue}] {payload} (rejected)");
                return Err("rejected by consumer".to_string());
            }
            println!("[{queue}] {payload}");
            Ok(())
        }
    });

    client.declare_queue(queue, durable).await?;
    client.consume(queue, &callback_addr).await?;
    info!("Consuming {queue} via callback endpoint {callback_addr}");
    println!("> consuming {queue}; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    Ok(())
}
