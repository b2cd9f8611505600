//! Client side of the RelayMQ protocol.
//!
//! [`RpcClient`] speaks one request/response at a time over a TCP stream.
//! Producers and consumers use it against the broker; the broker itself uses
//! it against a consumer's callback endpoint, which is why it also implements
//! [`Subscriber`].

use futures::future::BoxFuture;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::core::error::BrokerError;
use crate::core::protocol::{
    read_frame, write_frame, Call, Consume, DeclareQueue, DeleteQueue, Deliver, ListQueues,
    Publish, Request, Response,
};
use crate::core::subscriber::Subscriber;

#[derive(Debug)]
pub struct RpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    max_frame_bytes: usize,
}

impl RpcClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A, max_frame_bytes: usize) -> Result<Self, BrokerError> {
        let stream = TcpStream::connect(addr).await.map_err(BrokerError::Transport)?;
        stream.set_nodelay(true).map_err(BrokerError::Transport)?;
        let (r, w) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(r),
            writer: BufWriter::new(w),
            max_frame_bytes,
        })
    }

    /// Sends one call and waits for its response. Non-`Ok` statuses come back
    /// as the matching [`BrokerError`].
    pub async fn call(&mut self, call: Call) -> Result<Response, BrokerError> {
        write_frame(&mut self.writer, &Request::from(call)).await?;
        let response: Response = read_frame(&mut self.reader, self.max_frame_bytes)
            .await?
            .ok_or_else(|| {
                BrokerError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed the connection before responding",
                ))
            })?;
        response.into_result()
    }

    /// Returns `true` when this call created the queue.
    pub async fn declare_queue(&mut self, name: &str, durable: bool) -> Result<bool, BrokerError> {
        let response = self
            .call(Call::DeclareQueue(DeclareQueue {
                name: name.to_string(),
                durable,
            }))
            .await?;
        Ok(response.created)
    }

    pub async fn publish(&mut self, queue: &str, payload: impl Into<String>) -> Result<(), BrokerError> {
        self.call(Call::Publish(Publish {
            queue: queue.to_string(),
            payload: payload.into(),
        }))
        .await
        .map(|_| ())
    }

    /// Subscribes the callback endpoint at `callback_addr` to `queue`.
    pub async fn consume(&mut self, queue: &str, callback_addr: &str) -> Result<(), BrokerError> {
        self.call(Call::Consume(Consume {
            queue: queue.to_string(),
            callback_addr: callback_addr.to_string(),
        }))
        .await
        .map(|_| ())
    }

    pub async fn list_queues(&mut self) -> Result<Vec<String>, BrokerError> {
        let response = self.call(Call::ListQueues(ListQueues {})).await?;
        Ok(response.queues)
    }

    pub async fn delete_queue(&mut self, name: &str) -> Result<(), BrokerError> {
        self.call(Call::DeleteQueue(DeleteQueue {
            name: name.to_string(),
        }))
        .await
        .map(|_| ())
    }

    /// Pushes one message to a consumer callback endpoint.
    pub async fn deliver(&mut self, queue: &str, payload: &str) -> Result<(), BrokerError> {
        self.call(Call::Deliver(Deliver {
            queue: queue.to_string(),
            payload: payload.to_string(),
        }))
        .await
        .map(|_| ())
    }
}

impl Subscriber for RpcClient {
    fn deliver<'a>(
        &'a mut self,
        queue: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        Box::pin(RpcClient::deliver(self, queue, payload))
    }
}
