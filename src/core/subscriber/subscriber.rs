use futures::future::BoxFuture;
use std::fmt;
use std::ops::Deref;
use uuid::Uuid;

use crate::core::error::BrokerError;

/// Unique identifier for one consume subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn new() -> Self {
        SubscriptionId(Uuid::new_v4().to_string())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriptionId {
    fn from(s: &str) -> Self {
        SubscriptionId(s.to_owned())
    }
}

impl AsRef<str> for SubscriptionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Deref for SubscriptionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The consumer end of a subscription.
///
/// `deliver` resolves once the consumer has answered. Any error (transport or
/// an explicit rejection) ends the subscription and leaves the message held
/// for redelivery. The broker's implementation is the RPC client dialed to
/// the consumer's callback address; dropping it closes that connection.
pub trait Subscriber: Send {
    fn deliver<'a>(
        &'a mut self,
        queue: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>>;
}

impl<S: Subscriber + ?Sized> Subscriber for Box<S> {
    fn deliver<'a>(
        &'a mut self,
        queue: &'a str,
        payload: &'a str,
    ) -> BoxFuture<'a, Result<(), BrokerError>> {
        (**self).deliver(queue, payload)
    }
}
