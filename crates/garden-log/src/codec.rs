//! Message codec: the canonical textual form of a log entry.
//!
//! A message is encoded as one JSON object with a fixed field order:
//!
//! ```text
//! {"kind":"msg","channel":"#garden","author":"u1","time":1000,"body":"hi"}
//! ```
//!
//! Encoding is deterministic, and decoding always re-encodes into the same
//! canonical form, so equality of encodings is equality of messages. JSON
//! escapes line breaks inside text, which keeps every encoded message on a
//! single line of the persisted blob.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DecodeError, Result};

/// A 32-byte message id (BLAKE3 hash of the canonical encoding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    /// Hash a canonical encoding into its id.
    pub fn of(encoded: &str) -> Self {
        Self(*blake3::hash(encoded.as_bytes()).as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// First 8 hex chars, for display.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// What a message is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind<'a> {
    /// A post on a channel wall (`msg`).
    Post,
    /// A nickname change (`nick`).
    Nick,
    /// Channel membership added (`join`).
    Join,
    /// Channel membership removed (`part`).
    Part,
    /// A kind this version does not understand. Kept in the log, not projected.
    Unknown(&'a str),
}

impl<'a> Kind<'a> {
    pub const POST: &'static str = "msg";
    pub const NICK: &'static str = "nick";
    pub const JOIN: &'static str = "join";
    pub const PART: &'static str = "part";

    /// Classify a kind tag.
    pub fn parse(tag: &'a str) -> Self {
        match tag {
            Self::POST => Self::Post,
            Self::NICK => Self::Nick,
            Self::JOIN => Self::Join,
            Self::PART => Self::Part,
            other => Self::Unknown(other),
        }
    }

    /// The wire tag.
    pub fn as_str(&self) -> &'a str {
        match *self {
            Self::Post => Self::POST,
            Self::Nick => Self::NICK,
            Self::Join => Self::JOIN,
            Self::Part => Self::PART,
            Self::Unknown(tag) => tag,
        }
    }

    /// Whether messages of this kind must name a channel.
    pub fn is_channel_scoped(&self) -> bool {
        matches!(self, Self::Post | Self::Join | Self::Part)
    }
}

impl fmt::Display for Kind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body.
///
/// Decoding reads the body as a JSON value first: a string is text, an object
/// that is exactly `{parent, text}` is a reply, and anything else stays
/// [`Body::Other`]. Numbers keep their original digits, so an unknown body
/// re-encodes to exactly what its author sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Body {
    /// Plain text.
    Text(String),
    /// Text posted as a reply to another message.
    Reply(ReplyTo),
    /// Any other structured value (future kinds).
    Other(serde_json::Value),
}

/// Body of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplyTo {
    pub parent: MessageId,
    pub text: String,
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Body::from_value)
    }
}

impl Body {
    fn from_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Object(_) => match ReplyTo::deserialize(&value) {
                Ok(reply) => Self::Reply(reply),
                Err(_) => Self::Other(value),
            },
            other => Self::Other(other),
        }
    }

    /// The text carried by this body, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(text) | Self::Reply(ReplyTo { text, .. }) => Some(text),
            Self::Other(_) => None,
        }
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Field layout on the wire. Order here is the canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fields {
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    author: String,
    time: u64,
    body: Body,
}

/// An immutable, validated log entry together with its canonical encoding.
#[derive(Debug, Clone)]
pub struct Message {
    fields: Fields,
    /// Canonical encoding of the body alone (total-order tiebreak).
    payload: String,
    /// Canonical encoding of the whole message.
    line: String,
    id: MessageId,
}

impl Message {
    /// Build a message from its fields.
    pub fn new(
        kind: &str,
        channel: Option<&str>,
        author: &str,
        time: u64,
        body: impl Into<Body>,
    ) -> Result<Self> {
        Self::from_fields(Fields {
            kind: kind.to_string(),
            channel: channel.map(str::to_string),
            author: author.to_string(),
            time,
            body: body.into(),
        })
    }

    /// A post on a channel wall.
    pub fn post(channel: &str, author: &str, time: u64, text: &str) -> Result<Self> {
        Self::new(Kind::POST, Some(channel), author, time, text)
    }

    /// A post nested under `parent`.
    pub fn reply(
        channel: &str,
        author: &str,
        time: u64,
        parent: MessageId,
        text: &str,
    ) -> Result<Self> {
        let body = Body::Reply(ReplyTo {
            parent,
            text: text.to_string(),
        });
        Self::new(Kind::POST, Some(channel), author, time, body)
    }

    /// Set the author's display name.
    pub fn nick(author: &str, time: u64, nick: &str) -> Result<Self> {
        Self::new(Kind::NICK, None, author, time, nick)
    }

    /// Join a channel.
    pub fn join(channel: &str, author: &str, time: u64) -> Result<Self> {
        Self::new(Kind::JOIN, Some(channel), author, time, "")
    }

    /// Leave a channel.
    pub fn part(channel: &str, author: &str, time: u64) -> Result<Self> {
        Self::new(Kind::PART, Some(channel), author, time, "")
    }

    fn from_fields(fields: Fields) -> Result<Self> {
        validate(&fields)?;
        let payload = serde_json::to_string(&fields.body)?;
        let line = serde_json::to_string(&fields)?;
        let id = MessageId::of(&line);
        Ok(Self {
            fields,
            payload,
            line,
            id,
        })
    }

    pub fn kind(&self) -> Kind<'_> {
        Kind::parse(&self.fields.kind)
    }

    pub fn channel(&self) -> Option<&str> {
        self.fields.channel.as_deref()
    }

    pub fn author(&self) -> &str {
        &self.fields.author
    }

    pub fn time(&self) -> u64 {
        self.fields.time
    }

    pub fn body(&self) -> &Body {
        &self.fields.body
    }

    /// Text of a text or reply body.
    pub fn text(&self) -> Option<&str> {
        self.fields.body.text()
    }

    /// The post this message replies to, if any.
    pub fn parent(&self) -> Option<MessageId> {
        match &self.fields.body {
            Body::Reply(reply) => Some(reply.parent),
            _ => None,
        }
    }

    /// Canonical encoding of the body.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Canonical encoding of the message.
    pub fn encoded(&self) -> &str {
        &self.line
    }

    /// Consume the message, keeping only its encoding.
    pub fn into_encoded(self) -> String {
        self.line
    }

    pub fn id(&self) -> MessageId {
        self.id
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line
    }
}

impl Eq for Message {}

impl Hash for Message {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Total order shared by every peer: time, then author, then payload, then
/// the full encoding so that distinct messages never compare equal.
impl Ord for Message {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fields
            .time
            .cmp(&other.fields.time)
            .then_with(|| self.fields.author.cmp(&other.fields.author))
            .then_with(|| self.payload.cmp(&other.payload))
            .then_with(|| self.line.cmp(&other.line))
    }
}

impl PartialOrd for Message {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

impl FromStr for Message {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

/// Encode message fields into their canonical string.
pub fn encode(
    kind: &str,
    channel: Option<&str>,
    author: &str,
    time: u64,
    body: impl Into<Body>,
) -> Result<String> {
    Message::new(kind, channel, author, time, body).map(Message::into_encoded)
}

/// Decode a message from its string form.
///
/// Rejects malformed JSON, unknown fields, trailing garbage and messages
/// that fail validation for their kind.
pub fn decode(text: &str) -> Result<Message> {
    let fields: Fields = serde_json::from_str(text)?;
    Message::from_fields(fields)
}

fn validate(fields: &Fields) -> Result<()> {
    if fields.kind.is_empty() {
        return Err(DecodeError::EmptyField("kind"));
    }
    if fields.author.is_empty() {
        return Err(DecodeError::EmptyField("author"));
    }

    let kind = Kind::parse(&fields.kind);
    if kind.is_channel_scoped() {
        match fields.channel.as_deref() {
            None => {
                return Err(DecodeError::MissingField {
                    kind: fields.kind.clone(),
                    field: "channel",
                })
            }
            Some("") => return Err(DecodeError::EmptyField("channel")),
            Some(_) => {}
        }
    }

    match (kind, &fields.body) {
        (Kind::Post, Body::Text(_) | Body::Reply(_)) => Ok(()),
        (Kind::Post, Body::Other(_)) => Err(DecodeError::InvalidBody {
            kind: fields.kind.clone(),
            expected: "text or reply",
        }),
        (Kind::Nick, Body::Text(nick)) if nick.trim().is_empty() => {
            Err(DecodeError::EmptyField("nick"))
        }
        (Kind::Nick, Body::Text(_)) => Ok(()),
        (Kind::Nick, _) => Err(DecodeError::InvalidBody {
            kind: fields.kind.clone(),
            expected: "text",
        }),
        _ => Ok(()),
    }
}
