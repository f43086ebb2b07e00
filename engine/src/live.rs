//! Live queries: registered statements re-executed whenever the replica
//! they read from may have changed.
//!
//! The engine is an explicit registry. It holds no reference to a replica;
//! callers pass the active one in, which is how a replica swap rebinds every
//! subscription at once.

use crate::{
    error::Result,
    replica::{OptimisticReplica, ReplicaId},
    rows::RowSet,
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;

/// Identifier of a subscription; increases in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A result delivered to a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveUpdate {
    pub subscription: SubscriptionId,
    /// Replica the query ran against
    pub replica: ReplicaId,
    /// 0 for the initial result, then +1 per delivery
    pub sequence: u64,
    /// Whether the result differs from the previous successful one
    pub changed: bool,
    pub result: Result<RowSet>,
}

/// Whether a subscriber wants further updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Continue,
    /// The receiving side is gone; the subscription is removed.
    Closed,
}

/// Receives live query results.
pub trait Subscriber: Send {
    fn deliver(&mut self, update: &LiveUpdate) -> Delivery;
}

/// Subscriber backed by a closure.
pub struct FnSubscriber<F>(pub F);

impl<F> Subscriber for FnSubscriber<F>
where
    F: FnMut(&LiveUpdate) + Send,
{
    fn deliver(&mut self, update: &LiveUpdate) -> Delivery {
        (self.0)(update);
        Delivery::Continue
    }
}

/// Subscriber forwarding into an unbounded channel.
pub struct ChannelSubscriber(pub mpsc::UnboundedSender<LiveUpdate>);

impl Subscriber for ChannelSubscriber {
    fn deliver(&mut self, update: &LiveUpdate) -> Delivery {
        match self.0.send(update.clone()) {
            Ok(()) => Delivery::Continue,
            Err(_) => Delivery::Closed,
        }
    }
}

struct Subscription {
    sql: String,
    params: Vec<Value>,
    sequence: u64,
    last: Option<RowSet>,
    sink: Box<dyn Subscriber>,
}

impl Subscription {
    fn publish(
        &mut self,
        id: SubscriptionId,
        replica: ReplicaId,
        result: Result<RowSet>,
    ) -> Delivery {
        let changed = match (&result, &self.last) {
            (Ok(rows), Some(previous)) => rows != previous,
            _ => true,
        };
        if let Ok(rows) = &result {
            self.last = Some(rows.clone());
        }

        let update = LiveUpdate {
            subscription: id,
            replica,
            sequence: self.sequence,
            changed,
            result,
        };
        self.sequence += 1;
        self.sink.deliver(&update)
    }
}

/// Registry of live queries.
#[derive(Default)]
pub struct LiveQueryEngine {
    next_id: u64,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
}

impl fmt::Debug for LiveQueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveQueryEngine")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl LiveQueryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the query now and, if it succeeds, register it.
    ///
    /// The subscriber receives the initial result before this returns. On
    /// error nothing is registered.
    pub fn register(
        &mut self,
        replica: &OptimisticReplica,
        sql: &str,
        params: &[Value],
        sink: Box<dyn Subscriber>,
    ) -> Result<SubscriptionId> {
        let initial = replica.query(sql, params)?;

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let mut subscription = Subscription {
            sql: sql.to_string(),
            params: params.to_vec(),
            sequence: 0,
            last: None,
            sink,
        };
        if subscription.publish(id, replica.id(), Ok(initial)) == Delivery::Continue {
            self.subscriptions.insert(id, subscription);
            tracing::debug!(subscription = %id, sql, "Live query registered");
        }
        Ok(id)
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription = %id, "Live query unregistered");
        }
        removed
    }

    /// Re-execute every subscription against `replica`, in registration
    /// order, and deliver the results.
    ///
    /// Returns the number of subscriptions evaluated.
    pub fn invalidate(&mut self, replica: &OptimisticReplica) -> usize {
        let mut closed = Vec::new();
        let evaluated = self.subscriptions.len();

        for (id, subscription) in self.subscriptions.iter_mut() {
            let result = replica.query(&subscription.sql, &subscription.params);
            if let Err(err) = &result {
                tracing::warn!(subscription = %id, error = %err, "Live query re-execution failed");
            }
            if subscription.publish(*id, replica.id(), result) == Delivery::Closed {
                closed.push(*id);
            }
        }

        for id in closed {
            self.subscriptions.remove(&id);
            tracing::debug!(subscription = %id, "Pruned closed live query");
        }

        evaluated
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// A stream of [`LiveUpdate`]s. Dropping it ends the subscription.
#[derive(Debug)]
pub struct LiveQuery {
    id: SubscriptionId,
    receiver: mpsc::UnboundedReceiver<LiveUpdate>,
}

impl LiveQuery {
    pub(crate) fn new(id: SubscriptionId, receiver: mpsc::UnboundedReceiver<LiveUpdate>) -> Self {
        Self { id, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next update; `None` once the subscription is gone.
    pub async fn next(&mut self) -> Option<LiveUpdate> {
        self.receiver.recv().await
    }

    /// Take an update that is already waiting, if any.
    pub fn try_next(&mut self) -> Option<LiveUpdate> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for LiveQuery {
    type Item = LiveUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
