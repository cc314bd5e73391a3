//! Session coordinator actor.
//!
//! One tokio task owns [`SessionState`] and is its only mutator. Transport
//! lifecycle events, inbound replies, gateway completions and user commands
//! all arrive on a single unbounded channel and are handled to completion in
//! arrival order. Snapshots are published through a `watch` channel after
//! every event.
//!
//! Internal producers (listeners, gateway tasks) hold weak senders, so the
//! actor stops once every [`SessionHandle`] is gone.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use herald_core::{
    BotReply, ClientError, ConnectionStatus, GatewayError, SessionId, SessionSnapshot,
    ValidationError,
};
use herald_gateway::SessionGateway;
use herald_settings::ChatSettings;
use herald_transport::{Subscription, Transport, TransportEvent};

use crate::protocol::ProtocolClient;
use crate::state::{Effect, SessionState};

#[derive(Clone, Debug, Default)]
pub struct CoordinatorConfig {
    pub chat: ChatSettings,
}

enum CoordinatorEvent {
    Transport(TransportEvent),
    BotReply(BotReply),
    Typing(bool),
    SessionCreated {
        epoch: u64,
        result: Result<SessionId, GatewayError>,
    },
    Send {
        text: String,
        reply: oneshot::Sender<Result<(), ValidationError>>,
    },
    Reset {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

type WeakEvents = mpsc::WeakUnboundedSender<CoordinatorEvent>;

fn post(events: &WeakEvents, event: CoordinatorEvent) {
    if let Some(events) = events.upgrade() {
        let _ = events.send(event);
    }
}

/// Entry point for starting a coordinator.
pub struct SessionCoordinator;

impl SessionCoordinator {
    /// Start the actor on the current runtime. It opens the transport and
    /// requests a session immediately.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        gateway: Arc<dyn SessionGateway>,
        protocol: ProtocolClient,
        config: CoordinatorConfig,
    ) -> SessionHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let weak = events_tx.downgrade();
        let state = SessionState::new(config.chat);
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());

        let lifecycle = {
            let weak = weak.clone();
            transport.listen(Arc::new(move |event: &TransportEvent| {
                if !matches!(event, TransportEvent::Message { .. }) {
                    post(&weak, CoordinatorEvent::Transport(event.clone()));
                }
            }))
        };

        let actor = Coordinator {
            state,
            transport,
            gateway,
            protocol,
            events: weak,
            snapshots: snapshot_tx,
            _lifecycle: Some(lifecycle),
            reply_listeners: Vec::new(),
            reset_waiters: Vec::new(),
            tasks: Vec::new(),
        };
        let _ = tokio::spawn(actor.run(events_rx));

        SessionHandle {
            events: events_tx,
            snapshots: snapshot_rx,
        }
    }
}

struct Coordinator {
    state: SessionState,
    transport: Arc<dyn Transport>,
    gateway: Arc<dyn SessionGateway>,
    protocol: ProtocolClient,
    events: WeakEvents,
    snapshots: watch::Sender<SessionSnapshot>,
    _lifecycle: Option<Subscription>,
    /// Reply and typing listeners, bound at the first join. They stay bound
    /// across resets so late replies for a superseded session are still seen.
    reply_listeners: Vec<Subscription>,
    reset_waiters: Vec<(u64, oneshot::Sender<()>)>,
    tasks: Vec<JoinHandle<()>>,
}

impl Coordinator {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<CoordinatorEvent>) {
        info!("session coordinator started");
        let effects = self.state.start();
        self.apply(effects);
        self.publish();

        while let Some(event) = events.recv().await {
            if let CoordinatorEvent::Shutdown { done } = event {
                self.teardown();
                let _ = done.send(());
                return;
            }
            self.handle(event);
            self.publish();
        }

        debug!("all session handles dropped");
        self.teardown();
    }

    fn handle(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Transport(TransportEvent::Open) => {
                let effects = self.state.on_open();
                self.apply(effects);
            }
            CoordinatorEvent::Transport(TransportEvent::Close { reason }) => {
                self.state.on_close(&reason);
            }
            CoordinatorEvent::Transport(TransportEvent::Error { error }) => {
                self.state.on_transport_error(&error);
            }
            CoordinatorEvent::Transport(TransportEvent::Message { .. }) => {}
            CoordinatorEvent::BotReply(reply) => {
                let _ = self.state.on_bot_reply(reply);
            }
            CoordinatorEvent::Typing(typing) => {
                let _ = self.state.on_typing(typing);
            }
            CoordinatorEvent::SessionCreated { epoch, result } => {
                let effects = self.state.on_session_created(epoch, result);
                self.apply(effects);
                // Waiters must observe the installed session.
                self.publish();
                self.resolve_reset_waiters(epoch);
            }
            CoordinatorEvent::Send { text, reply } => {
                let result = self.state.send(&text).map(|effects| self.apply(effects));
                if let Err(error) = &result {
                    debug!(error = %error, "send rejected");
                }
                self.publish();
                let _ = reply.send(result);
            }
            CoordinatorEvent::Reset { done } => {
                let (epoch, effects) = self.state.reset();
                self.reset_waiters.push((epoch, done));
                self.apply(effects);
            }
            // Handled by the run loop.
            CoordinatorEvent::Shutdown { .. } => {}
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Connect => self.transport.connect(),
                Effect::Renew { discard, epoch } => self.spawn_renew(discard, epoch),
                Effect::Discard(id) => self.spawn_discard(id),
                Effect::Join(id) => self.join(id),
                Effect::SendMessage { session_id, text } => {
                    if !self.protocol.send_message(&session_id, &text) {
                        self.state.on_send_failed(&session_id);
                    }
                }
            }
        }
    }

    fn join(&mut self, id: SessionId) {
        if self.reply_listeners.is_empty() {
            let replies = {
                let events = self.events.clone();
                self.protocol
                    .on_bot_reply(move |reply| post(&events, CoordinatorEvent::BotReply(reply)))
            };
            let typing = {
                let events = self.events.clone();
                self.protocol
                    .on_typing(move |typing| post(&events, CoordinatorEvent::Typing(typing)))
            };
            self.reply_listeners.push(replies);
            self.reply_listeners.push(typing);
        }

        if self.protocol.join_session(&id) {
            info!(session_id = %id, "joined session");
        }
    }

    fn spawn_renew(&mut self, discard: Option<SessionId>, epoch: u64) {
        let gateway = Arc::clone(&self.gateway);
        let events = self.events.clone();
        self.track(tokio::spawn(async move {
            if let Some(old) = discard {
                discard_best_effort(gateway.as_ref(), &old).await;
            }
            let result = gateway.create_session().await;
            post(&events, CoordinatorEvent::SessionCreated { epoch, result });
        }));
    }

    fn spawn_discard(&mut self, id: SessionId) {
        let gateway = Arc::clone(&self.gateway);
        self.track(tokio::spawn(async move {
            discard_best_effort(gateway.as_ref(), &id).await;
        }));
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn resolve_reset_waiters(&mut self, epoch: u64) {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reset_waiters)
            .into_iter()
            .partition(|(waiting_for, _)| *waiting_for <= epoch);
        self.reset_waiters = pending;
        for (_, done) in ready {
            let _ = done.send(());
        }
    }

    fn publish(&self) {
        let next = self.state.snapshot();
        let _ = self.snapshots.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown(&mut self) {
        info!("session coordinator stopping");
        self.reply_listeners.clear();
        self._lifecycle = None;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.reset_waiters.clear();
        self.transport.disconnect();
    }
}

async fn discard_best_effort(gateway: &dyn SessionGateway, id: &SessionId) {
    match gateway.discard_session(id).await {
        Ok(()) => debug!(session_id = %id, "session discarded"),
        Err(e) => warn!(
            session_id = %id,
            error_kind = e.error_kind(),
            error = %e,
            "failed to discard session"
        ),
    }
}

/// Cloneable handle to a running coordinator.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Submit a user message. Rejected messages leave the log untouched.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(CoordinatorEvent::Send {
                text: text.into(),
                reply,
            })
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)?.map_err(ClientError::from)
    }

    /// Discard the current session and start a new one. Resolves once the
    /// new session is installed or its creation failed.
    pub async fn reset(&self) -> Result<(), ClientError> {
        let (done, rx) = oneshot::channel();
        self.events
            .send(CoordinatorEvent::Reset { done })
            .map_err(|_| ClientError::Stopped)?;
        rx.await.map_err(|_| ClientError::Stopped)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshots.borrow().connection_status
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    /// Stop the coordinator: listeners are dropped and the transport closed.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.events.send(CoordinatorEvent::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("status", &self.status())
            .finish()
    }
}
