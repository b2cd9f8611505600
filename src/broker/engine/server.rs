//! Server engine for the RelayMQ broker.
//!
//! Uses length-prefixed protobuf frames for every request and response.

use std::future::Future;

use anyhow::Context;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::task;
use tracing::{error, info, warn};

use crate::broker::facade::Broker;
use crate::config::Config;
use crate::core::error::BrokerError;
use crate::core::protocol::{read_frame, write_frame, Call, Request, Response, Status};
use crate::core::queue::Declared;
use crate::metrics;

/// Starts the broker with `config`: recovery first, then the listener,
/// serving until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let (broker, report) = Broker::open(&config)
        .await
        .context("failed to recover durable queues")?;
    info!(
        queues = report.queues,
        messages = report.messages,
        "recovered durable state"
    );

    let listener = TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_addr))?;

    run(listener, broker, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    })
    .await
}

/// Accept loop over an already bound listener. Returns when `shutdown` resolves.
pub async fn run<F>(listener: TcpListener, broker: Broker, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    info!("Starting RelayMQ broker on {}", listener.local_addr()?);
    metrics::set_ready(true);
    tokio::pin!(shutdown);

    loop {
        let (socket, peer_addr) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("accept error: {e}");
                    continue;
                }
            },
        };
        socket.set_nodelay(true)?;
        let broker = broker.clone();
        info!("Client connected: {}", peer_addr);

        task::spawn(async move {
            if let Err(e) = handle_client(socket, broker).await {
                warn!("Error handling {}: {}", peer_addr, e);
            }
        });
    }

    metrics::set_ready(false);
    Ok(())
}

async fn handle_client(stream: TcpStream, broker: Broker) -> Result<(), BrokerError> {
    let (reader_half, writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let mut writer = BufWriter::new(writer_half);
    let max = broker.max_frame_bytes();

    while let Some(request) = read_frame::<_, Request>(&mut reader, max).await? {
        let response = dispatch(&broker, request).await;
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}

async fn dispatch(broker: &Broker, request: Request) -> Response {
    let Some(call) = request.call else {
        return Response::failure(Status::BadRequest, "empty request");
    };

    let result = match call {
        Call::DeclareQueue(req) => {
            let declared = broker.declare_queue(&req.name, req.durable);
            return Response {
                created: declared == Declared::Created,
                ..Response::ok()
            };
        }
        Call::Publish(req) => broker.publish(&req.queue, req.payload).await,
        Call::Consume(req) => broker
            .consume_remote(&req.queue, &req.callback_addr)
            .await
            .map(|_| ()),
        Call::ListQueues(_) => {
            return Response {
                queues: broker.list_queues(),
                ..Response::ok()
            };
        }
        Call::DeleteQueue(req) => broker.delete_queue(&req.name).await,
        Call::Deliver(_) => {
            return Response::failure(Status::BadRequest, "Deliver is a consumer-side call");
        }
    };

    match result {
        Ok(()) => Response::ok(),
        Err(e) => {
            warn!("request failed: {e}");
            Response::from(&e)
        }
    }
}
