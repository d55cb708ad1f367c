//! One joined chat room and its session loop.

use libp2p::PeerId;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::message::ChatMessage;
use super::topic_name;
use crate::config::CHAT_ROOM_BUF_SIZE;
use crate::error::{ChatError, TransportError};
use crate::p2p::transport::{Delivery, PubSub, Subscription, Topic};
use crate::sink::{Observation, SharedSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Joining,
    Active,
    Closed,
}

#[derive(Clone)]
struct StateCell(Arc<RwLock<SessionState>>);

impl StateCell {
    fn get(&self) -> SessionState {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, state: SessionState) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// A subscription to a single room.
///
/// Messages handed to [`publish`](Self::publish) are queued and sent by the
/// session loop; messages from other peers are queued for
/// [`next_message`](Self::next_message). Both queues are bounded. The session
/// ends when its token (a child of the one passed to `join`) is cancelled or
/// the room is dropped.
pub struct ChatRoom {
    room: String,
    topic: String,
    self_id: PeerId,
    nick: String,
    pubsub: Arc<dyn PubSub>,
    outbound_tx: mpsc::Sender<ChatMessage>,
    inbound_rx: Mutex<mpsc::Receiver<ChatMessage>>,
    state: StateCell,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ChatRoom {
    pub async fn join(
        pubsub: Arc<dyn PubSub>,
        self_id: PeerId,
        nick: &str,
        room: &str,
        parent: &CancellationToken,
        sink: SharedSink,
    ) -> Result<Self, ChatError> {
        Self::join_with_capacity(pubsub, self_id, nick, room, parent, sink, CHAT_ROOM_BUF_SIZE)
            .await
    }

    pub async fn join_with_capacity(
        pubsub: Arc<dyn PubSub>,
        self_id: PeerId,
        nick: &str,
        room: &str,
        parent: &CancellationToken,
        sink: SharedSink,
        capacity: usize,
    ) -> Result<Self, ChatError> {
        let state = StateCell(Arc::new(RwLock::new(SessionState::Joining)));
        let topic_name = topic_name(room);
        let join_error = |source: TransportError| ChatError::Join {
            room: room.to_string(),
            source,
        };

        let topic = pubsub.join_topic(&topic_name).await.map_err(join_error)?;
        let subscription = topic.subscribe().await.map_err(join_error)?;

        let capacity = capacity.max(1);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (handoff_tx, handoff_rx) = mpsc::unbounded_channel();
        let token = parent.child_token();
        let tracker = TaskTracker::new();

        state.set(SessionState::Active);
        tracker.spawn(receive_loop(subscription, handoff_tx, token.clone()));
        let session = SessionLoop {
            room: room.to_string(),
            self_id,
            topic,
            outbound_rx,
            handoff_rx,
            inbound_tx,
            sink,
            token: token.clone(),
            state: state.clone(),
        };
        tracker.spawn(session.run());
        debug!("joined chat room {room} as {nick}");

        Ok(Self {
            room: room.to_string(),
            topic: topic_name,
            self_id,
            nick: nick.to_string(),
            pubsub,
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            state,
            token,
            tracker,
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn topic_name(&self) -> &str {
        &self.topic
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Queues `text` for sending. Waits while the outbound queue is full and
    /// fails with [`ChatError::SessionClosed`] once the session is cancelled.
    pub async fn publish(&self, text: &str) -> Result<(), ChatError> {
        let msg = ChatMessage::new(text, self.self_id.to_string(), self.nick.clone());
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!("context done");
                Err(ChatError::SessionClosed)
            }
            sent = self.outbound_tx.send(msg) => sent.map_err(|_| ChatError::SessionClosed),
        }
    }

    /// Next message from another peer, or `None` once the session is closed
    /// and the inbound queue is drained.
    pub async fn next_message(&self) -> Option<ChatMessage> {
        let mut inbound = self.inbound_rx.lock().await;
        tokio::select! {
            biased;
            msg = inbound.recv() => msg,
            _ = self.token.cancelled() => inbound.try_recv().ok(),
        }
    }

    pub fn try_next_message(&self) -> Option<ChatMessage> {
        self.inbound_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Members of the room's topic as currently seen by the transport.
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.pubsub.list_peers(&self.topic)
    }

    /// Cancels the session and waits for both of its tasks to exit.
    pub async fn close(&self) {
        self.token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.state.set(SessionState::Closed);
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Pulls deliveries off the subscription so a slow receive never stalls the
/// session loop.
async fn receive_loop(
    mut subscription: Box<dyn Subscription>,
    handoff: mpsc::UnboundedSender<Delivery>,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = subscription.next() => next,
        };
        match next {
            Ok(delivery) => {
                if handoff.send(delivery).is_err() {
                    break;
                }
            }
            Err(e) if e.is_closed() => {
                debug!("subscription closed");
                break;
            }
            Err(e) => warn!("error receiving message: {e}"),
        }
    }
}

struct SessionLoop {
    room: String,
    self_id: PeerId,
    topic: Arc<dyn Topic>,
    outbound_rx: mpsc::Receiver<ChatMessage>,
    handoff_rx: mpsc::UnboundedReceiver<Delivery>,
    inbound_tx: mpsc::Sender<ChatMessage>,
    sink: SharedSink,
    token: CancellationToken,
    state: StateCell,
}

impl SessionLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.token.cancelled() => break,
                Some(msg) = self.outbound_rx.recv() => self.send(msg).await,
                Some(delivery) = self.handoff_rx.recv() => {
                    if !self.deliver(delivery).await {
                        break;
                    }
                }
            }
        }
        self.state.set(SessionState::Closed);
        debug!("chat room {} closed", self.room);
    }

    async fn send(&self, msg: ChatMessage) {
        debug!("sending message to chat room");
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("error marshalling message: {e}");
                return;
            }
        };
        tokio::select! {
            _ = self.token.cancelled() => {}
            published = self.topic.publish(bytes) => {
                if let Err(e) = published {
                    warn!("error publishing message: {e}");
                }
            }
        }
    }

    /// Returns false when the session is shutting down.
    async fn deliver(&self, delivery: Delivery) -> bool {
        if delivery.received_from == self.self_id {
            return true;
        }
        let msg = match ChatMessage::decode(&delivery.data) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("error unmarshalling message: {e}");
                return true;
            }
        };
        if msg.sender_id == self.self_id.to_string() {
            debug!("dropping own message relayed by {}", delivery.received_from);
            return true;
        }

        let nick = msg.sender_nick.clone();
        tokio::select! {
            _ = self.token.cancelled() => false,
            sent = self.inbound_tx.send(msg) => {
                if sent.is_err() {
                    return false;
                }
                self.sink.emit(&Observation::MessageReceived {
                    room: self.room.clone(),
                    nick,
                });
                true
            }
        }
    }
}
