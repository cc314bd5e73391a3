//! Terminal rendering of session snapshots and parsing of input lines.

use herald_core::{ConnectionStatus, Message, MessageId, Role, SessionSnapshot};

/// A line typed by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Blank,
    Quit,
    Reset,
    Status,
    Help,
    Unknown(String),
    Message(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }
        if let Some(command) = trimmed.strip_prefix('/') {
            return match command {
                "quit" | "exit" => Self::Quit,
                "reset" => Self::Reset,
                "status" => Self::Status,
                "help" => Self::Help,
                other => Self::Unknown(other.to_string()),
            };
        }
        Self::Message(trimmed.to_string())
    }
}

pub const HELP: &str = "commands: /reset  /status  /quit  (anything else is sent)";

/// Turns successive snapshots into the lines that are new since the last one.
#[derive(Debug, Default)]
pub struct Printer {
    last_printed: Option<MessageId>,
    status: Option<ConnectionStatus>,
    typing: bool,
}

impl Printer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.status != Some(snapshot.connection_status) {
            self.status = Some(snapshot.connection_status);
            lines.push(status_line(snapshot));
        }

        let start = match &self.last_printed {
            Some(last) => match snapshot.messages.iter().position(|m| &m.id == last) {
                Some(index) => index + 1,
                None => {
                    // Log was cleared by a reset.
                    lines.push("── new session ──".to_string());
                    0
                }
            },
            None => 0,
        };
        for message in &snapshot.messages[start..] {
            lines.extend(format_message(message));
        }
        if let Some(last) = snapshot.messages.last() {
            self.last_printed = Some(last.id.clone());
        }

        if snapshot.typing && !self.typing {
            lines.push("… assistant is typing".to_string());
        }
        self.typing = snapshot.typing;

        lines
    }
}

pub fn status_line(snapshot: &SessionSnapshot) -> String {
    match &snapshot.session_id {
        Some(id) => format!("[status: {} | session: {}…]", snapshot.connection_status, id.short()),
        None => format!("[status: {} | session: none]", snapshot.connection_status),
    }
}

pub fn format_message(message: &Message) -> Vec<String> {
    let time = message.timestamp.format("%H:%M:%S");
    let who = match message.role {
        Role::User => "you",
        Role::Bot => "assistant",
        Role::Error => "error",
    };
    let mut lines = vec![format!("[{time}] {who}: {}", message.body)];
    for reference in &message.references {
        lines.push(format!("    ↳ {} <{}>", reference.title, reference.url));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::{Reference, SessionId};

    fn snapshot(messages: Vec<Message>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(SessionId::from_raw("abc12345-6789")),
            messages,
            typing: false,
            connection_status: ConnectionStatus::Connected,
        }
    }

    #[test]
    fn parse_commands_and_messages() {
        assert_eq!(Input::parse("   "), Input::Blank);
        assert_eq!(Input::parse("/quit"), Input::Quit);
        assert_eq!(Input::parse(" /reset "), Input::Reset);
        assert_eq!(Input::parse("/status"), Input::Status);
        assert_eq!(Input::parse("/frobnicate"), Input::Unknown("frobnicate".into()));
        assert_eq!(
            Input::parse("  what happened today? "),
            Input::Message("what happened today?".into())
        );
    }

    #[test]
    fn bot_message_lists_references() {
        let message = Message::bot(
            "Markets rose 2%",
            vec![Reference::new("Stocks rally", "http://x")],
        );
        let lines = format_message(&message);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("assistant: Markets rose 2%"));
        assert_eq!(lines[1], "    ↳ Stocks rally <http://x>");
    }

    #[test]
    fn status_line_shortens_session() {
        assert_eq!(
            status_line(&snapshot(Vec::new())),
            "[status: connected | session: abc12345…]"
        );
    }

    #[test]
    fn printer_emits_only_new_messages() {
        let mut printer = Printer::new();
        let welcome = Message::bot("hello", Vec::new());
        let first = printer.render(&snapshot(vec![welcome.clone()]));
        assert_eq!(first.len(), 2);

        let question = Message::user("news?");
        let mut next = snapshot(vec![welcome, question]);
        next.typing = true;
        let second = printer.render(&next);
        assert_eq!(second.len(), 2);
        assert!(second[0].ends_with("you: news?"));
        assert_eq!(second[1], "… assistant is typing");

        assert!(printer.render(&next).is_empty());
    }

    #[test]
    fn printer_marks_cleared_log() {
        let mut printer = Printer::new();
        let _ = printer.render(&snapshot(vec![Message::bot("hello", Vec::new())]));
        let lines = printer.render(&snapshot(vec![Message::bot("reset!", Vec::new())]));
        assert_eq!(lines[0], "── new session ──");
        assert!(lines[1].ends_with("assistant: reset!"));
    }
}
