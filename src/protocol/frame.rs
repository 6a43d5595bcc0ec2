use bytes::Bytes;
use std::fmt;

/// Well-known STOMP header names used by the broker core.
pub mod headers {
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const LOGIN: &str = "login";
    pub const PASSCODE: &str = "passcode";
    pub const SESSION: &str = "session";
    pub const ACK: &str = "ack";
    pub const ID: &str = "id";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const EXPIRES: &str = "expires";
    /// Extension: client-supplied identity hint, kept for diagnostics only.
    pub const CLIENT_ID: &str = "client-id";
    /// Extension: when `true` on DISCONNECT, the session survives for reconnection.
    pub const KEEP_SESSION: &str = "keep-session";
}

/// STOMP frame commands recognized by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Error,
    Receipt,
}

impl Command {
    /// Map a command line to a known command. Unknown commands stay as raw
    /// strings on the frame so the session layer can report them.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "CONNECT" => Some(Self::Connect),
            "STOMP" => Some(Self::Stomp),
            "CONNECTED" => Some(Self::Connected),
            "SEND" => Some(Self::Send),
            "SUBSCRIBE" => Some(Self::Subscribe),
            "UNSUBSCRIBE" => Some(Self::Unsubscribe),
            "ACK" => Some(Self::Ack),
            "NACK" => Some(Self::Nack),
            "BEGIN" => Some(Self::Begin),
            "COMMIT" => Some(Self::Commit),
            "ABORT" => Some(Self::Abort),
            "DISCONNECT" => Some(Self::Disconnect),
            "MESSAGE" => Some(Self::Message),
            "ERROR" => Some(Self::Error),
            "RECEIPT" => Some(Self::Receipt),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Error => "ERROR",
            Self::Receipt => "RECEIPT",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered header collection. Duplicate keys are allowed; lookups return the
/// first match, per STOMP 1.1 semantics.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header, keeping any existing entries with the same key.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Replace the first entry with this key, or append if absent.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.into(),
            None => self.entries.push((key.to_string(), value.into())),
        }
    }

    /// First-match-wins lookup; keys are case-sensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One protocol message unit: command, ordered headers, and an opaque body.
///
/// The body is a [`Bytes`] handle, so cloning a frame produces a fresh header
/// collection over a shared body buffer; forwarding paths can rewrite headers
/// without copying payloads or mutating the caller's original.
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command: command.name().to_string(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// A frame decoded off the wire, possibly carrying an unknown command.
    pub fn raw(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Heartbeat frames have no command; the codec serializes them as a bare
    /// newline and never produces them on decode.
    pub fn heartbeat() -> Self {
        Self {
            command: String::new(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.is_empty()
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Known command for this frame, or `None` for unrecognized commands.
    pub fn command(&self) -> Option<Command> {
        Command::parse(&self.command)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.set(key, value);
    }

    /// Build an ERROR frame answering `in_reply_to`. The triggering frame's
    /// `receipt` header is copied into `receipt-id` so clients can correlate
    /// the failure with a pending request.
    pub fn error(message: &str, in_reply_to: Option<&Frame>) -> Self {
        let mut frame = Frame::new(Command::Error)
            .with_header(headers::MESSAGE, message)
            .with_header(headers::CONTENT_TYPE, "text/plain")
            .with_body(Bytes::from(format!("{message}\n")));
        if let Some(receipt) = in_reply_to.and_then(|f| f.header(headers::RECEIPT)) {
            frame.set_header(headers::RECEIPT_ID, receipt);
        }
        frame
    }

    /// Build a RECEIPT frame acknowledging `receipt_id`.
    pub fn receipt(receipt_id: &str) -> Self {
        Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, receipt_id)
    }
}
