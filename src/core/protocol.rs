//! Wire protocol shared by the broker, producers and consumer callbacks.
//!
//! Every frame is a 4-byte big-endian length followed by a protobuf body.
//! A connection carries strictly alternating request/response frames.

use bytes::{BufMut, BytesMut};
use prost::Message as ProstMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::error::BrokerError;

/// Default cap on a single frame body.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeclareQueue {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(bool, tag = "2")]
    pub durable: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Publish {
    #[prost(string, tag = "1")]
    pub queue: String,
    #[prost(string, tag = "2")]
    pub payload: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Consume {
    #[prost(string, tag = "1")]
    pub queue: String,
    /// `host:port` where the consumer serves `Deliver` calls.
    #[prost(string, tag = "2")]
    pub callback_addr: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ListQueues {}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DeleteQueue {
    #[prost(string, tag = "1")]
    pub name: String,
}

/// Broker → consumer callback.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Deliver {
    #[prost(string, tag = "1")]
    pub queue: String,
    #[prost(string, tag = "2")]
    pub payload: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Request {
    #[prost(oneof = "Call", tags = "1, 2, 3, 4, 5, 6")]
    pub call: Option<Call>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum Call {
    #[prost(message, tag = "1")]
    DeclareQueue(DeclareQueue),
    #[prost(message, tag = "2")]
    Publish(Publish),
    #[prost(message, tag = "3")]
    Consume(Consume),
    #[prost(message, tag = "4")]
    ListQueues(ListQueues),
    #[prost(message, tag = "5")]
    DeleteQueue(DeleteQueue),
    #[prost(message, tag = "6")]
    Deliver(Deliver),
}

impl From<Call> for Request {
    fn from(call: Call) -> Self {
        Request { call: Some(call) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    UnknownQueue = 1,
    PersistenceFailure = 2,
    TransportFailure = 3,
    Rejected = 4,
    BadRequest = 5,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Response {
    #[prost(enumeration = "Status", tag = "1")]
    pub status: i32,
    /// Human-readable reason; the queue name for `UnknownQueue`.
    #[prost(string, tag = "2")]
    pub error: String,
    /// Set by `DeclareQueue` when this call created the queue.
    #[prost(bool, tag = "3")]
    pub created: bool,
    #[prost(string, repeated, tag = "4")]
    pub queues: Vec<String>,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            status: Status::Ok as i32,
            ..Default::default()
        }
    }

    pub fn failure(status: Status, error: impl Into<String>) -> Self {
        Response {
            status: status as i32,
            error: error.into(),
            ..Default::default()
        }
    }

    /// Turns a non-`Ok` status back into the matching error.
    pub fn into_result(self) -> Result<Response, BrokerError> {
        match self.status() {
            Status::Ok => Ok(self),
            Status::UnknownQueue => Err(BrokerError::UnknownQueue(self.error)),
            Status::PersistenceFailure => {
                Err(BrokerError::Persistence(std::io::Error::other(self.error)))
            }
            Status::TransportFailure => {
                Err(BrokerError::Transport(std::io::Error::other(self.error)))
            }
            Status::Rejected => Err(BrokerError::DeliveryRejected(self.error)),
            Status::BadRequest => Err(BrokerError::Protocol(self.error)),
        }
    }
}

impl From<&BrokerError> for Response {
    fn from(err: &BrokerError) -> Self {
        match err {
            BrokerError::UnknownQueue(name) => Response::failure(Status::UnknownQueue, name.clone()),
            BrokerError::Persistence(e) => {
                Response::failure(Status::PersistenceFailure, e.to_string())
            }
            BrokerError::Transport(e) => Response::failure(Status::TransportFailure, e.to_string()),
            BrokerError::DeliveryRejected(reason) => {
                Response::failure(Status::Rejected, reason.clone())
            }
            BrokerError::Protocol(_) => {
                Response::failure(Status::BadRequest, err.to_string())
            }
        }
    }
}

/// Writes one length-prefixed frame and flushes.
pub async fn write_frame<W, M>(writer: &mut W, msg: &M) -> Result<(), BrokerError>
where
    W: AsyncWrite + Unpin,
    M: ProstMessage,
{
    let len = msg.encoded_len();
    let mut buf = BytesMut::with_capacity(4 + len);
    buf.put_u32(len as u32);
    msg.encode(&mut buf)
        .map_err(|e| BrokerError::Protocol(e.to_string()))?;
    writer.write_all(&buf).await.map_err(BrokerError::Transport)?;
    writer.flush().await.map_err(BrokerError::Transport)
}

/// Reads one length-prefixed frame. `Ok(None)` means the peer closed the
/// connection cleanly between frames.
pub async fn read_frame<R, M>(reader: &mut R, max_len: usize) -> Result<Option<M>, BrokerError>
where
    R: AsyncRead + Unpin,
    M: ProstMessage + Default,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(BrokerError::Transport(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_len {
        return Err(BrokerError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {max_len}"
        )));
    }

    let mut body = BytesMut::zeroed(len);
    reader
        .read_exact(&mut body)
        .await
        .map_err(BrokerError::Transport)?;
    Ok(Some(M::decode(body.freeze())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_duplex_pipe() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let req: Request = Call::Publish(Publish {
            queue: "orders".into(),
            payload: "line one\nline two".into(),
        })
        .into();
        write_frame(&mut client, &req).await.unwrap();
        drop(client);

        let got: Request = read_frame(&mut server, MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(got, req);
        let eof: Option<Request> = read_frame(&mut server, MAX_FRAME_LEN).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let resp = Response::failure(Status::Rejected, "x".repeat(64));
        write_frame(&mut client, &resp).await.unwrap();

        let err = read_frame::<_, Response>(&mut server, 16).await.unwrap_err();
        assert!(matches!(err, BrokerError::Protocol(_)));
    }

    #[test]
    fn unknown_queue_status_round_trips_to_error() {
        let resp = Response::from(&BrokerError::UnknownQueue("ghost".into()));
        match resp.into_result() {
            Err(BrokerError::UnknownQueue(name)) => assert_eq!(name, "ghost"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
