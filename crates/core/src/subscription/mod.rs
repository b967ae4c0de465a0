//! Live mirror of a server-side collection over a reconnecting DDP websocket.
//!
//! A [`Subscription`] owns one background task. The task holds at most one
//! websocket at a time, performs the DDP handshake, answers heartbeats, applies
//! data messages to the mirrored [`Collection`], and reconnects with
//! [`Backoff`] whenever the socket closes. The render loop reads the mirror
//! through [`Subscription::state`], which hands out a cheap snapshot.

mod backoff;
mod call;
mod collection;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Instant,
};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub use backoff::Backoff;
pub use call::PendingCall;
pub use collection::Collection;

use crate::{
    config::ReconnectPolicy,
    ddp::{ClientMessage, ServerMessage},
    Result, StarsError,
};
use call::CallRegistry;

/// What to subscribe to and where.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Full websocket URL, e.g. `ws://host:3000/websocket`.
    pub url: String,
    /// Publication (and collection) name.
    pub name: String,
    pub params: Option<Vec<Value>>,
    /// Controller token, kept here for the methods that require it.
    pub token: Option<String>,
}

impl SubscriptionConfig {
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            params: None,
            token: None,
        }
    }
}

/// Handle to one subscribed collection.
pub struct Subscription {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    config: SubscriptionConfig,
    policy: ReconnectPolicy,
    state: watch::Sender<Arc<Collection>>,
    ready: watch::Sender<bool>,
    stop: watch::Sender<bool>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    calls: CallRegistry,
    next_id: AtomicU64,
}

enum Flow {
    Continue,
    Close,
}

impl Subscription {
    pub fn new(config: SubscriptionConfig, policy: ReconnectPolicy) -> Self {
        let (state, _) = watch::channel(Arc::new(Collection::new()));
        let (ready, _) = watch::channel(false);
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                state,
                ready,
                stop,
                outgoing: Mutex::new(None),
                calls: CallRegistry::default(),
                next_id: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn token(&self) -> Option<&str> {
        self.inner.config.token.as_deref()
    }

    /// Spawns the background connection task. Calling it while the task is
    /// running does nothing.
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            error!(name = %self.name(), "subscription task slot has been poisoned");
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        self.inner.stop.send_replace(false);
        *task = Some(tokio::spawn(Inner::supervise(self.inner.clone())));
    }

    /// Asks the background task to close its socket and exit. Idempotent.
    pub fn stop(&self) {
        self.inner.stop.send_replace(true);
        self.inner.ready.send_replace(false);
    }

    /// Waits for the background task to exit after [`Subscription::stop`].
    pub async fn join(&self) {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Latest snapshot of the mirrored collection.
    pub fn state(&self) -> Arc<Collection> {
        self.inner.state.borrow().clone()
    }

    /// True once the server acknowledged the handshake and the `sub` was sent
    /// on the current connection.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub async fn wait_ready(&self) -> Result<()> {
        let mut ready = self.inner.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| StarsError::NotConnected)?;
        Ok(())
    }

    /// Invokes a server method and returns a handle to its eventual result.
    pub fn call(&self, method: &str, params: Vec<Value>) -> Result<PendingCall> {
        let id = self.inner.next_id();
        let pending = self.inner.calls.register(&id, method)?;
        let sent = self.inner.send(ClientMessage::Method {
            id: id.clone(),
            method: method.to_string(),
            params,
        });
        if let Err(e) = sent {
            self.inner.calls.cancel(&id);
            return Err(e);
        }
        Ok(pending)
    }

    /// Invokes a server method without tracking its result.
    pub fn cast(&self, method: &str, params: Vec<Value>) -> Result<()> {
        self.inner.send(ClientMessage::Method {
            id: self.inner.next_id(),
            method: method.to_string(),
            params,
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.inner.config.name)
            .field("url", &self.inner.config.url)
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl Inner {
    fn next_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn lock_outgoing(&self) -> Result<MutexGuard<'_, Option<mpsc::UnboundedSender<ClientMessage>>>> {
        self.outgoing
            .lock()
            .map_err(|_| StarsError::msg("subscription sender has been poisoned"))
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        let outgoing = self.lock_outgoing()?;
        let sender = outgoing.as_ref().ok_or(StarsError::NotConnected)?;
        sender.send(message).map_err(|_| StarsError::NotConnected)
    }

    fn disconnected(&self) {
        if let Ok(mut outgoing) = self.lock_outgoing() {
            *outgoing = None;
        }
        self.ready.send_replace(false);
    }

    async fn supervise(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let mut backoff = Backoff::new(self.policy.clone());
        let name = self.config.name.clone();

        while !stop_requested(&stop) {
            let opened = Instant::now();
            match self.run_connection(&mut stop).await {
                Ok(()) => warn!(%name, "websocket closed"),
                Err(e) => error!(%name, error = %e, "subscription error"),
            }
            self.disconnected();
            if stop_requested(&stop) {
                break;
            }

            let delay = backoff.on_close(opened.elapsed());
            if !delay.is_zero() {
                warn!(%name, delay_secs = delay.as_secs_f64(), "waiting before restarting websocket");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => {}
                }
                if stop_requested(&stop) {
                    break;
                }
            }
            warn!(%name, "restarting websocket");
        }
        debug!(%name, "subscription task stopped");
    }

    async fn run_connection(&self, stop: &mut watch::Receiver<bool>) -> Result<()> {
        info!(url = %self.config.url, name = %self.config.name, "connecting subscription");
        let connect = tokio::time::timeout(
            self.policy.connect_timeout(),
            connect_async(self.config.url.as_str()),
        );
        let ws = tokio::select! {
            connected = connect => match connected {
                Ok(result) => result?.0,
                Err(_) => return Err(StarsError::msg("websocket connect timed out")),
            },
            _ = stop.changed() => return Ok(()),
        };

        let (mut write, mut read) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.lock_outgoing()? = Some(tx.clone());
        let _ = tx.send(ClientMessage::connect());

        loop {
            tokio::select! {
                _ = stop.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(outgoing) = rx.recv() => {
                    let text = outgoing.to_json()?;
                    write.send(Message::Text(text.into())).await?;
                }
                incoming = read.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Flow::Close = self.handle_text(text.as_str(), &tx)? {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        info!(name = %self.config.name, ?frame, "server closed subscription socket");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
            }
        }
    }

    fn handle_text(&self, text: &str, tx: &mpsc::UnboundedSender<ClientMessage>) -> Result<Flow> {
        let name = &self.config.name;
        match ServerMessage::from_json(text)? {
            ServerMessage::Connected { session } => {
                tx.send(ClientMessage::Sub {
                    id: self.next_id(),
                    name: name.clone(),
                    params: self.config.params.clone(),
                })
                .map_err(|_| StarsError::NotConnected)?;
                self.ready.send_replace(true);
                info!(%name, ?session, "subscribed");
            }
            ServerMessage::Failed { version } => {
                error!(%name, ?version, "server refused protocol version");
            }
            ServerMessage::Ping { id } => {
                tx.send(ClientMessage::Pong { id })
                    .map_err(|_| StarsError::NotConnected)?;
            }
            ServerMessage::Nosub { id, error } => {
                error!(%name, %id, ?error, "subscription rejected");
                return Ok(Flow::Close);
            }
            ServerMessage::Added {
                collection,
                id,
                fields,
            } if collection == *name => {
                self.state
                    .send_modify(|state| Arc::make_mut(state).added(id, fields));
            }
            ServerMessage::Changed {
                collection,
                id,
                fields,
                cleared,
            } if collection == *name => {
                self.state
                    .send_modify(|state| Arc::make_mut(state).changed(&id, fields, &cleared));
            }
            ServerMessage::Removed { collection, id } if collection == *name => {
                self.state
                    .send_modify(|state| Arc::make_mut(state).removed(&id));
            }
            ServerMessage::Added { collection, .. }
            | ServerMessage::Changed { collection, .. }
            | ServerMessage::Removed { collection, .. } => {
                warn!(%name, %collection, "ignoring data for unexpected collection");
            }
            ServerMessage::Result { id, result, error } => {
                self.calls.resolve(&id, result, error);
            }
            ServerMessage::Unknown => {}
        }
        Ok(Flow::Continue)
    }
}

fn stop_requested(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow()
}
