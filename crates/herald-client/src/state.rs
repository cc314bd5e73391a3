//! Session state machine.
//!
//! `SessionState` is plain synchronous data: every input (transport
//! lifecycle, gateway completion, inbound event, user command) mutates it and
//! returns the [`Effect`]s the coordinator must carry out. Nothing here
//! touches the network, which keeps every transition testable in isolation.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use herald_core::{
    BotReply, ConnectionStatus, ConversationLog, GatewayError, Message, SessionId,
    SessionSnapshot, TransportError, ValidationError,
};
use herald_settings::ChatSettings;

/// Side effects requested by a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Open the transport.
    Connect,
    /// Discard `discard` (best-effort) then create a new session; report
    /// back tagged with `epoch`.
    Renew {
        discard: Option<SessionId>,
        epoch: u64,
    },
    /// Best-effort discard of a session nobody will use.
    Discard(SessionId),
    /// Join the room of this session.
    Join(SessionId),
    SendMessage { session_id: SessionId, text: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    /// Never opened.
    Idle,
    Open,
    /// Was open, currently down; the transport is retrying.
    Lost,
    /// The transport gave up.
    Failed,
}

/// Synthetic message owed at the next join.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Notice {
    Welcome,
    ResetConfirmation,
}

pub struct SessionState {
    texts: ChatSettings,
    session_id: Option<SessionId>,
    log: ConversationLog,
    typing: bool,
    link: Link,
    joined: bool,
    session_failed: bool,
    epoch: u64,
    pending_notice: Option<Notice>,
    /// Session of the send still waiting for its reply.
    awaiting: Option<SessionId>,
    /// Replies still owed to sends made on superseded sessions, oldest first.
    owed: VecDeque<SessionId>,
}

impl SessionState {
    pub fn new(texts: ChatSettings) -> Self {
        Self {
            texts,
            session_id: None,
            log: ConversationLog::new(),
            typing: false,
            link: Link::Idle,
            joined: false,
            session_failed: false,
            epoch: 0,
            pending_notice: None,
            awaiting: None,
            owed: VecDeque::new(),
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.session_failed {
            return ConnectionStatus::Error;
        }
        match self.link {
            Link::Failed => ConnectionStatus::Error,
            Link::Lost => ConnectionStatus::Disconnected,
            Link::Idle => ConnectionStatus::Connecting,
            Link::Open if self.joined && self.session_id.is_some() => ConnectionStatus::Connected,
            Link::Open => ConnectionStatus::Connecting,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            messages: self.log.to_vec(),
            typing: self.typing,
            connection_status: self.status(),
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Initial transition: open the transport and request a session.
    pub fn start(&mut self) -> Vec<Effect> {
        self.pending_notice = Some(Notice::Welcome);
        vec![
            Effect::Connect,
            Effect::Renew {
                discard: None,
                epoch: self.epoch,
            },
        ]
    }

    pub fn on_open(&mut self) -> Vec<Effect> {
        self.link = Link::Open;
        self.joined = false;
        self.try_join().into_iter().collect()
    }

    pub fn on_close(&mut self, reason: &str) {
        info!(reason, "transport closed");
        self.link = Link::Lost;
        self.joined = false;
    }

    pub fn on_transport_error(&mut self, error: &TransportError) {
        if error.is_terminal() {
            warn!(error = %error, "transport gave up");
            self.link = Link::Failed;
            self.joined = false;
        } else if self.link == Link::Open {
            self.link = Link::Lost;
            self.joined = false;
        } else {
            debug!(error = %error, "connect attempt failed");
        }
    }

    /// A create request finished. Completions from a superseded request are
    /// ignored and their session discarded.
    pub fn on_session_created(
        &mut self,
        epoch: u64,
        result: Result<SessionId, GatewayError>,
    ) -> Vec<Effect> {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "ignoring stale session result");
            return match result {
                Ok(id) => vec![Effect::Discard(id)],
                Err(_) => Vec::new(),
            };
        }

        match result {
            Ok(id) => {
                info!(session_id = %id, epoch, "session installed");
                self.session_id = Some(id);
                self.session_failed = false;
                self.joined = false;
                self.try_join().into_iter().collect()
            }
            Err(error) => {
                warn!(error_kind = error.error_kind(), error = %error, epoch, "session request failed");
                self.session_failed = true;
                let text = match self.pending_notice.take() {
                    Some(Notice::ResetConfirmation) => self.texts.reset_failure_message.clone(),
                    _ => self.texts.init_failure_message.clone(),
                };
                self.log.push(Message::error(text));
                Vec::new()
            }
        }
    }

    /// Clear the conversation and request a new session.
    ///
    /// Returns the epoch of the new request.
    pub fn reset(&mut self) -> (u64, Vec<Effect>) {
        let old = self.session_id.take();
        self.log.clear();
        self.typing = false;
        if let Some(superseded) = self.awaiting.take() {
            self.owed.push_back(superseded);
        }
        self.joined = false;
        self.session_failed = false;
        self.epoch += 1;
        self.pending_notice = Some(Notice::ResetConfirmation);
        info!(old_session = ?old.as_ref().map(SessionId::short), epoch = self.epoch, owed = self.owed.len(), "resetting session");

        let mut effects = Vec::new();
        if self.link == Link::Failed {
            self.link = Link::Lost;
            effects.push(Effect::Connect);
        }
        effects.push(Effect::Renew {
            discard: old,
            epoch: self.epoch,
        });
        (self.epoch, effects)
    }

    fn try_join(&mut self) -> Option<Effect> {
        if self.link != Link::Open || self.joined {
            return None;
        }
        let id = self.session_id.clone()?;
        self.joined = true;
        match self.pending_notice.take() {
            Some(Notice::Welcome) => {
                self.log.push(Message::bot(self.texts.welcome_message.clone(), Vec::new()));
            }
            Some(Notice::ResetConfirmation) => {
                self.log.push(Message::bot(self.texts.reset_message.clone(), Vec::new()));
            }
            None => debug!(session_id = %id, "re-joining after reconnect"),
        }
        Some(Effect::Join(id))
    }

    // ── Conversation ────────────────────────────────────────────────────

    /// Validate and accept a user message.
    pub fn send(&mut self, text: &str) -> Result<Vec<Effect>, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        let status = self.status();
        if status != ConnectionStatus::Connected {
            return Err(ValidationError::NotConnected(status));
        }
        let session_id = self.session_id.clone().ok_or(ValidationError::NoSession)?;
        if self.typing {
            return Err(ValidationError::AwaitingReply);
        }

        self.log.push(Message::user(text));
        self.typing = true;
        self.awaiting = Some(session_id.clone());
        Ok(vec![Effect::SendMessage {
            session_id,
            text: text.to_string(),
        }])
    }

    /// The accepted message never reached the transport.
    pub fn on_send_failed(&mut self, session_id: &SessionId) {
        if self.session_id.as_ref() != Some(session_id) {
            return;
        }
        self.typing = false;
        self.awaiting = None;
        self.log.push(Message::error(self.texts.send_failure_message.clone()));
    }

    /// Find the superseded session an inbound reply answers, if any.
    ///
    /// A reply naming a session is matched against that name. An anonymous
    /// reply answers the oldest send still owed by a superseded session, since
    /// the socket stays in the old room after a reset.
    fn superseded_origin(&mut self, claimed: Option<&SessionId>) -> Option<SessionId> {
        match claimed {
            Some(id) if self.session_id.as_ref() == Some(id) => None,
            Some(id) => {
                if let Some(pos) = self.owed.iter().position(|owed| owed == id) {
                    let _ = self.owed.remove(pos);
                }
                Some(id.clone())
            }
            None => self.owed.pop_front(),
        }
    }

    /// Apply an inbound reply. Returns `false` when it was dropped.
    pub fn on_bot_reply(&mut self, reply: BotReply) -> bool {
        if let Some(origin) = self.superseded_origin(reply.session_id.as_ref()) {
            debug!(session_id = %origin, "dropping reply for superseded session");
            return false;
        }
        let Some(current) = self.session_id.clone() else {
            debug!("dropping reply, no session installed");
            return false;
        };
        self.typing = false;
        self.awaiting = None;

        let message = match reply.failure() {
            Some(failure) => {
                warn!(session_id = %current, error = %failure, "assistant reported an error");
                Message::error(failure.0)
            }
            None => {
                let references = reply.references();
                Message::bot(reply.message.unwrap_or_default(), references)
            }
        };
        self.log.push(message.with_remote_timestamp(reply.timestamp));
        true
    }

    /// Apply a typing signal. Signals arriving while a superseded session
    /// still owes a reply belong to that session and are dropped.
    pub fn on_typing(&mut self, typing: bool) -> bool {
        if !self.owed.is_empty() {
            debug!(owed = self.owed.len(), typing, "dropping typing signal for superseded session");
            return false;
        }
        if self.session_id.is_none() {
            return false;
        }
        self.typing = typing;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{Reference, Role};
    use std::time::Duration;

    fn id(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    /// Started, session `abc123` installed, transport open and joined.
    fn connected() -> SessionState {
        let mut state = SessionState::new(ChatSettings::default());
        let _ = state.start();
        let _ = state.on_session_created(0, Ok(id("abc123")));
        let _ = state.on_open();
        state
    }

    fn bodies(state: &SessionState) -> Vec<(Role, String)> {
        state.log().iter().map(|m| (m.role, m.body.clone())).collect()
    }

    // ── Scenarios ───────────────────────────────────────────────────

    #[test]
    fn init_join_appends_single_welcome() {
        let mut state = SessionState::new(ChatSettings::default());
        let effects = state.start();
        assert_eq!(
            effects,
            vec![Effect::Connect, Effect::Renew { discard: None, epoch: 0 }]
        );
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        // Session arrives before the transport: nothing to join yet.
        assert!(state.on_session_created(0, Ok(id("abc123"))).is_empty());
        assert_eq!(state.status(), ConnectionStatus::Connecting);
        assert!(state.log().is_empty());

        assert_eq!(state.on_open(), vec![Effect::Join(id("abc123"))]);
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(
            bodies(&state),
            vec![(Role::Bot, ChatSettings::default().welcome_message)]
        );
    }

    #[test]
    fn transport_first_then_session_also_joins() {
        let mut state = SessionState::new(ChatSettings::default());
        let _ = state.start();
        assert!(state.on_open().is_empty());
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        assert_eq!(
            state.on_session_created(0, Ok(id("abc123"))),
            vec![Effect::Join(id("abc123"))]
        );
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.log().len(), 1);
    }

    #[test]
    fn accepted_send_logs_and_emits() {
        let mut state = connected();
        let effects = state.send("latest on markets").unwrap();

        assert_eq!(
            effects,
            vec![Effect::SendMessage {
                session_id: id("abc123"),
                text: "latest on markets".into()
            }]
        );
        assert!(state.typing());
        assert_eq!(state.awaiting.as_ref(), Some(&id("abc123")));
        assert_eq!(
            state.log().last().map(|m| (m.role, m.body.as_str())),
            Some((Role::User, "latest on markets"))
        );
    }

    #[test]
    fn reply_with_reference_clears_typing() {
        let mut state = connected();
        let _ = state.send("latest on markets").unwrap();

        let reply = BotReply::text("Markets rose 2%")
            .with_articles(vec![Reference::new("X", "http://x")]);
        assert!(state.on_bot_reply(reply));

        assert!(!state.typing());
        assert_eq!(state.awaiting.as_ref(), None);
        let last = state.log().last().unwrap();
        assert_eq!(last.role, Role::Bot);
        assert_eq!(last.body, "Markets rose 2%");
        assert_eq!(last.references, vec![Reference::new("X", "http://x")]);
    }

    #[test]
    fn close_rejects_sends_and_keeps_log() {
        let mut state = connected();
        let before = state.log().to_vec();

        state.on_close("transport error");
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            state.send("anyone there?"),
            Err(ValidationError::NotConnected(ConnectionStatus::Disconnected))
        );
        assert_eq!(state.log().to_vec(), before);
    }

    #[test]
    fn reset_installs_new_session_with_confirmation() {
        let mut state = connected();
        let _ = state.send("latest on markets").unwrap();
        let _ = state.on_bot_reply(BotReply::text("Markets rose 2%"));

        let (epoch, effects) = state.reset();
        assert_eq!(epoch, 1);
        assert_eq!(
            effects,
            vec![Effect::Renew {
                discard: Some(id("abc123")),
                epoch: 1
            }]
        );
        assert!(state.log().is_empty());
        assert_eq!(state.session_id(), None);
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        assert_eq!(
            state.on_session_created(1, Ok(id("def456"))),
            vec![Effect::Join(id("def456"))]
        );
        assert_eq!(state.session_id(), Some(&id("def456")));
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(
            bodies(&state),
            vec![(Role::Bot, ChatSettings::default().reset_message)]
        );
    }

    // ── Send validation ─────────────────────────────────────────────

    #[test]
    fn send_trims_and_rejects_blank() {
        let mut state = connected();
        assert_eq!(state.send("   \n\t"), Err(ValidationError::EmptyMessage));
        let _ = state.send("  hi there  ").unwrap();
        assert_eq!(state.log().last().unwrap().body, "hi there");
    }

    #[test]
    fn send_while_typing_is_rejected() {
        let mut state = connected();
        let _ = state.send("first").unwrap();
        let len = state.log().len();

        assert_eq!(state.send("second"), Err(ValidationError::AwaitingReply));
        assert_eq!(state.log().len(), len);
    }

    #[test]
    fn typing_signal_blocks_send_until_cleared() {
        let mut state = connected();
        assert!(state.on_typing(true));
        assert_eq!(state.send("hello"), Err(ValidationError::AwaitingReply));
        assert!(state.on_typing(false));
        assert!(state.send("hello").is_ok());
    }

    #[test]
    fn send_before_connected_is_rejected() {
        let mut state = SessionState::new(ChatSettings::default());
        let _ = state.start();
        assert_eq!(
            state.send("hello"),
            Err(ValidationError::NotConnected(ConnectionStatus::Connecting))
        );
        assert!(state.log().is_empty());
    }

    #[test]
    fn each_accepted_send_appends_exactly_one_message() {
        let mut state = connected();
        for n in 0..5 {
            let before = state.log().len();
            let _ = state.send(&format!("question {n}")).unwrap();
            assert_eq!(state.log().len(), before + 1);
            assert!(state.typing());
            assert!(state.on_bot_reply(BotReply::text(format!("answer {n}"))));
            assert!(!state.typing());
        }
        assert_eq!(state.log().len(), 11);
    }

    #[test]
    fn failed_delivery_unblocks_input() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        state.on_send_failed(&id("abc123"));

        assert!(!state.typing());
        assert_eq!(state.log().last().unwrap().role, Role::Error);
        assert!(state.send("again").is_ok());
    }

    // ── Replies ─────────────────────────────────────────────────────

    #[test]
    fn error_reply_appends_error_message() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        let reply = BotReply {
            timestamp: Some("2024-05-01T10:00:00.000Z".into()),
            ..BotReply::failed("Sorry, I couldn't process that.")
        };
        assert!(state.on_bot_reply(reply));

        let last = state.log().last().unwrap();
        assert_eq!(last.role, Role::Error);
        assert_eq!(last.body, "Sorry, I couldn't process that.");
        assert_eq!(last.remote_timestamp.as_deref(), Some("2024-05-01T10:00:00.000Z"));
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert!(!state.typing());
    }

    #[test]
    fn any_current_reply_clears_typing_even_unsolicited() {
        let mut state = connected();
        assert!(state.on_typing(true));
        assert!(state.on_bot_reply(BotReply::text("breaking news")));
        assert!(!state.typing());
    }

    #[test]
    fn reply_naming_another_session_is_dropped() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        let before = state.log().to_vec();

        let reply = BotReply {
            session_id: Some(id("zzz999")),
            ..BotReply::text("leak")
        };
        assert!(!state.on_bot_reply(reply));

        assert_eq!(state.log().to_vec(), before);
        assert!(state.typing());
    }

    /// Sent on `abc123`, then reset onto `def456` before the answer came back.
    fn reset_while_awaiting() -> SessionState {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        let (epoch, _) = state.reset();
        let _ = state.on_session_created(epoch, Ok(id("def456")));
        assert_eq!(state.status(), ConnectionStatus::Connected);
        state
    }

    #[test]
    fn late_anonymous_reply_after_reset_is_dropped() {
        let mut state = reset_while_awaiting();

        assert!(!state.on_bot_reply(BotReply::text("answer meant for abc123")));
        assert_eq!(
            bodies(&state),
            vec![(Role::Bot, ChatSettings::default().reset_message)]
        );
        assert!(!state.typing());
    }

    #[test]
    fn late_typing_after_reset_does_not_block_input() {
        let mut state = reset_while_awaiting();

        assert!(!state.on_typing(true));
        assert!(!state.typing());
        assert!(state.send("new question").is_ok());
    }

    #[test]
    fn replies_resume_once_superseded_answer_arrived() {
        let mut state = reset_while_awaiting();
        assert!(!state.on_bot_reply(BotReply::text("old answer")));

        let _ = state.send("new question").unwrap();
        assert!(state.on_typing(true));
        assert!(state.on_bot_reply(BotReply::text("new answer")));
        assert_eq!(state.log().last().unwrap().body, "new answer");
        assert!(!state.typing());
    }

    #[test]
    fn named_reply_settles_only_its_own_debt() {
        let mut state = reset_while_awaiting();
        let _ = state.send("new question").unwrap();

        let current = BotReply {
            session_id: Some(id("def456")),
            ..BotReply::text("new answer")
        };
        assert!(state.on_bot_reply(current));
        assert!(!state.typing());

        let stale = BotReply {
            session_id: Some(id("abc123")),
            ..BotReply::text("old answer")
        };
        assert!(!state.on_bot_reply(stale));
        assert!(state.owed.is_empty());
        assert!(state.on_typing(true));
    }

    #[test]
    fn reset_without_pending_send_owes_nothing() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        assert!(state.on_bot_reply(BotReply::text("answer")));
        let (epoch, _) = state.reset();
        let _ = state.on_session_created(epoch, Ok(id("def456")));

        assert!(state.owed.is_empty());
        assert!(state.on_bot_reply(BotReply::text("unsolicited")));
        assert_eq!(state.log().len(), 2);
    }

    #[test]
    fn close_keeps_typing_flag() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        state.on_close("ping timeout");
        assert!(state.typing());
    }

    // ── Reconnect ───────────────────────────────────────────────────

    #[test]
    fn reconnect_rejoins_silently() {
        let mut state = connected();
        let len = state.log().len();

        state.on_close("transport close");
        assert_eq!(state.on_open(), vec![Effect::Join(id("abc123"))]);
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.log().len(), len);
    }

    #[test]
    fn connect_errors_before_first_open_keep_connecting() {
        let mut state = SessionState::new(ChatSettings::default());
        let _ = state.start();
        state.on_transport_error(&TransportError::ConnectFailed("refused".into()));
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        state.on_transport_error(&TransportError::RetriesExhausted { attempts: 6 });
        assert_eq!(state.status(), ConnectionStatus::Error);
    }

    #[test]
    fn reset_after_transport_gave_up_reconnects() {
        let mut state = connected();
        state.on_close("transport close");
        state.on_transport_error(&TransportError::RetriesExhausted { attempts: 6 });
        assert_eq!(state.status(), ConnectionStatus::Error);

        let (_, effects) = state.reset();
        assert!(effects.contains(&Effect::Connect));
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
    }

    // ── Gateway failures ────────────────────────────────────────────

    #[test]
    fn init_failure_sets_error_with_message() {
        let mut state = SessionState::new(ChatSettings::default());
        let _ = state.start();
        let _ = state.on_open();
        let effects =
            state.on_session_created(0, Err(GatewayError::Timeout(Duration::from_secs(10))));

        assert!(effects.is_empty());
        assert_eq!(state.status(), ConnectionStatus::Error);
        assert_eq!(
            bodies(&state),
            vec![(Role::Error, ChatSettings::default().init_failure_message)]
        );
        assert!(matches!(
            state.send("hello"),
            Err(ValidationError::NotConnected(ConnectionStatus::Error))
        ));
    }

    #[test]
    fn reset_failure_uses_reset_text_and_reset_recovers() {
        let mut state = connected();
        let _ = state.reset();
        let _ = state.on_session_created(1, Err(GatewayError::Network("refused".into())));
        assert_eq!(state.status(), ConnectionStatus::Error);
        assert_eq!(
            bodies(&state),
            vec![(Role::Error, ChatSettings::default().reset_failure_message)]
        );

        let _ = state.reset();
        let _ = state.on_session_created(2, Ok(id("ghi789")));
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.log().len(), 1);
    }

    #[test]
    fn stale_session_result_is_discarded() {
        let mut state = connected();
        let _ = state.reset();
        let _ = state.reset();

        assert_eq!(
            state.on_session_created(1, Ok(id("stale"))),
            vec![Effect::Discard(id("stale"))]
        );
        assert_eq!(state.session_id(), None);
        assert!(state
            .on_session_created(1, Err(GatewayError::Network("late".into())))
            .is_empty());
        assert_eq!(state.status(), ConnectionStatus::Connecting);

        let _ = state.on_session_created(2, Ok(id("fresh")));
        assert_eq!(state.session_id(), Some(&id("fresh")));
        assert_eq!(state.log().len(), 1);
    }

    #[test]
    fn reset_always_leaves_single_confirmation() {
        for prior in [0usize, 1, 7] {
            let mut state = connected();
            for n in 0..prior {
                let _ = state.send(&format!("q{n}")).unwrap();
                let _ = state.on_bot_reply(BotReply::text("a"));
            }
            let (epoch, _) = state.reset();
            let _ = state.on_session_created(epoch, Ok(id("def456")));
            assert_eq!(state.log().len(), 1);
        }
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut state = connected();
        let _ = state.send("hello").unwrap();
        let snap = state.snapshot();
        assert_eq!(snap.session_id, Some(id("abc123")));
        assert_eq!(snap.messages.len(), 2);
        assert!(snap.typing);
        assert_eq!(snap.connection_status, ConnectionStatus::Connected);
        assert!(!snap.can_send());
    }
}
