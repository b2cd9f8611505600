//! Consumer-side callback endpoint.
//!
//! A consumer binds a [`CallbackServer`] before calling `Consume`; the broker
//! dials it and sends one `Deliver` call per message. The handler's answer
//! becomes the delivery outcome: `Ok` acknowledges, `Err` rejects.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::core::error::BrokerError;
use crate::core::protocol::{read_frame, write_frame, Call, Request, Response, Status};

/// Handles a pushed message. Returning `Err(reason)` rejects the delivery.
pub trait DeliveryHandler: Send + Sync + 'static {
    fn on_deliver(&self, queue: String, payload: String) -> BoxFuture<'static, Result<(), String>>;
}

impl<F, Fut> DeliveryHandler for F
where
    F: Fn(String, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    fn on_deliver(&self, queue: String, payload: String) -> BoxFuture<'static, Result<(), String>> {
        Box::pin(self(queue, payload))
    }
}

pub struct CallbackServer {
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl CallbackServer {
    pub async fn bind<A: ToSocketAddrs>(addr: A, max_frame_bytes: usize) -> Result<Self, BrokerError> {
        let listener = TcpListener::bind(addr).await.map_err(BrokerError::Transport)?;
        Ok(Self {
            listener,
            max_frame_bytes,
        })
    }

    /// The address to hand to the broker in `Consume`.
    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        self.listener.local_addr().map_err(BrokerError::Transport)
    }

    /// Accepts broker connections until the task is aborted.
    pub fn spawn<H: DeliveryHandler>(self, handler: H) -> JoinHandle<()> {
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            loop {
                let (socket, peer) = match self.listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("callback accept failed: {e}");
                        continue;
                    }
                };
                info!("broker connected to callback endpoint from {peer}");
                let handler = Arc::clone(&handler);
                let max = self.max_frame_bytes;
                tokio::spawn(async move {
                    if let Err(e) = serve_deliveries(socket, handler, max).await {
                        debug!("callback connection from {peer} closed: {e}");
                    }
                });
            }
        })
    }
}

async fn serve_deliveries<H: DeliveryHandler>(
    stream: TcpStream,
    handler: Arc<H>,
    max_frame_bytes: usize,
) -> Result<(), BrokerError> {
    let (r, w) = stream.into_split();
    let mut reader = BufReader::new(r);
    let mut writer = BufWriter::new(w);

    while let Some(request) = read_frame::<_, Request>(&mut reader, max_frame_bytes).await? {
        let response = match request.call {
            Some(Call::Deliver(deliver)) => {
                match handler.on_deliver(deliver.queue, deliver.payload).await {
                    Ok(()) => Response::ok(),
                    Err(reason) => Response::failure(Status::Rejected, reason),
                }
            }
            _ => Response::failure(Status::BadRequest, "callback endpoint only accepts Deliver"),
        };
        write_frame(&mut writer, &response).await?;
    }
    Ok(())
}
