//! Fabric message definitions
//!
//! A `Message` is built by the sending component immediately before it is
//! handed to the fabric, or by the fabric's receive path when an inbound
//! message arrives. There are no setters: the `with_*` builders consume the
//! message, so once a message has been shared it can no longer change.
//!
//! Kind-specific fields live in [`MessageBody`]. Accessors for fields that
//! are not meaningful for the current kind return `None`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::id::generate_id;

/// Protocol version stamped on outbound messages.
pub const PROTOCOL_VERSION: u32 = 2;

/// Discriminant of a message, matching the fabric's numeric type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Request,
    Response,
    Event,
    Error,
}

impl MessageType {
    /// Numeric type code used on the fabric.
    pub fn code(self) -> u8 {
        match self {
            MessageType::Request => 0,
            MessageType::Response => 1,
            MessageType::Event => 2,
            MessageType::Error => 3,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0 => Ok(MessageType::Request),
            1 => Ok(MessageType::Response),
            2 => Ok(MessageType::Event),
            3 => Ok(MessageType::Error),
            other => Err(other),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Event => "event",
            MessageType::Error => "error",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Kind-specific part of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBody {
    Request {
        reply_topic: String,
        service_id: Option<String>,
    },
    Response {
        request_id: String,
        service_id: Option<String>,
    },
    Event,
    Error {
        request_id: String,
        service_id: Option<String>,
        error_code: String,
        error_text: String,
    },
}

impl MessageBody {
    pub fn kind(&self) -> MessageType {
        match self {
            MessageBody::Request { .. } => MessageType::Request,
            MessageBody::Response { .. } => MessageType::Response,
            MessageBody::Event => MessageType::Event,
            MessageBody::Error { .. } => MessageType::Error,
        }
    }
}

/// A message travelling over the fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    topic: String,
    version: u32,
    id: String,
    sender_id: Option<String>,
    #[serde(default)]
    sender_trail: Vec<String>,
    origin_id: Option<String>,
    #[serde(default)]
    origin_trail: Vec<String>,
    payload: Vec<u8>,
    body: MessageBody,
}

impl Message {
    fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, body: MessageBody) -> Self {
        Self {
            topic: topic.into(),
            version: PROTOCOL_VERSION,
            id: generate_id(),
            sender_id: None,
            sender_trail: Vec::new(),
            origin_id: None,
            origin_trail: Vec::new(),
            payload: payload.into(),
            body,
        }
    }

    /// A one-way event on `topic`.
    pub fn event(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(topic, payload, MessageBody::Event)
    }

    /// A request on `topic`; the responder publishes its answer to `reply_topic`.
    pub fn request(
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        reply_topic: impl Into<String>,
    ) -> Self {
        Self::new(
            topic,
            payload,
            MessageBody::Request {
                reply_topic: reply_topic.into(),
                service_id: None,
            },
        )
    }

    /// A response answering `request`, addressed to the request's reply topic.
    ///
    /// Returns `None` if `request` is not a request.
    pub fn response_to(request: &Message, payload: impl Into<Vec<u8>>) -> Option<Self> {
        let MessageBody::Request {
            reply_topic,
            service_id,
        } = &request.body
        else {
            return None;
        };
        Some(Self::new(
            reply_topic.clone(),
            payload,
            MessageBody::Response {
                request_id: request.id.clone(),
                service_id: service_id.clone(),
            },
        ))
    }

    /// An error answering `request`, addressed to the request's reply topic.
    ///
    /// Returns `None` if `request` is not a request.
    pub fn error_for(
        request: &Message,
        error_code: impl Into<String>,
        error_text: impl Into<String>,
    ) -> Option<Self> {
        let MessageBody::Request {
            reply_topic,
            service_id,
        } = &request.body
        else {
            return None;
        };
        Some(Self::new(
            reply_topic.clone(),
            Vec::new(),
            MessageBody::Error {
                request_id: request.id.clone(),
                service_id: service_id.clone(),
                error_code: error_code.into(),
                error_text: error_text.into(),
            },
        ))
    }

    /// Assemble a message from its parts, as a fabric receive path does.
    pub fn from_parts(
        topic: impl Into<String>,
        version: u32,
        id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        body: MessageBody,
    ) -> Self {
        Self {
            topic: topic.into(),
            version,
            id: id.into(),
            sender_id: None,
            sender_trail: Vec::new(),
            origin_id: None,
            origin_trail: Vec::new(),
            payload: payload.into(),
            body,
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_sender_trail(mut self, trail: Vec<String>) -> Self {
        self.sender_trail = trail;
        self
    }

    pub fn with_origin(mut self, origin_id: impl Into<String>) -> Self {
        self.origin_id = Some(origin_id.into());
        self
    }

    pub fn with_origin_trail(mut self, trail: Vec<String>) -> Self {
        self.origin_trail = trail;
        self
    }

    /// Set the target service on a request, or the answering service on a
    /// response or error. No effect on events.
    pub fn with_service_id(mut self, id: impl Into<String>) -> Self {
        match &mut self.body {
            MessageBody::Request { service_id, .. }
            | MessageBody::Response { service_id, .. }
            | MessageBody::Error { service_id, .. } => *service_id = Some(id.into()),
            MessageBody::Event => {}
        }
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn kind(&self) -> MessageType {
        self.body.kind()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    pub fn sender_trail(&self) -> &[String] {
        &self.sender_trail
    }

    pub fn origin_id(&self) -> Option<&str> {
        self.origin_id.as_deref()
    }

    pub fn origin_trail(&self) -> &[String] {
        &self.origin_trail
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn reply_topic(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Request { reply_topic, .. } => Some(reply_topic),
            _ => None,
        }
    }

    pub fn service_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Request { service_id, .. }
            | MessageBody::Response { service_id, .. }
            | MessageBody::Error { service_id, .. } => service_id.as_deref(),
            MessageBody::Event => None,
        }
    }

    /// Id of the request a response or error answers.
    pub fn request_id(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Response { request_id, .. } | MessageBody::Error { request_id, .. } => {
                Some(request_id)
            }
            _ => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Error { error_code, .. } => Some(error_code),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Error { error_text, .. } => Some(error_text),
            _ => None,
        }
    }

    /// JSON form handed to and accepted from fabric collaborators.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Copy of this message as delivered by a broker: the sender and origin
    /// are filled in when absent and `broker_id` is appended to the origin
    /// trail.
    pub(crate) fn stamped(mut self, sender_id: &str, broker_id: &str) -> Self {
        if self.sender_id.is_none() {
            self.sender_id = Some(sender_id.to_string());
        }
        if self.origin_id.is_none() {
            self.origin_id = Some(broker_id.to_string());
        }
        self.origin_trail.push(broker_id.to_string());
        self
    }
}

fn optional(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str = "------------------------------------------------------------";
        writeln!(f, "{RULE}")?;
        writeln!(f, "   Topic:          {}", self.topic)?;
        writeln!(f, "   Version:        {}", self.version)?;
        writeln!(f, "   Message type:   {}", self.kind())?;
        writeln!(f, "   Message id:     {}", self.id)?;
        writeln!(f, "   Sender id:      {}", optional(self.sender_id()))?;
        writeln!(f, "   Origin id:      {}", optional(self.origin_id()))?;
        writeln!(f, "   Sender trail:   {:?}", self.sender_trail)?;
        writeln!(f, "   Origin trail:   {:?}", self.origin_trail)?;
        writeln!(f, "   Payload:        {}", String::from_utf8_lossy(&self.payload))?;
        match &self.body {
            MessageBody::Request {
                reply_topic,
                service_id,
            } => {
                writeln!(f, "   Reply topic:    {reply_topic}")?;
                writeln!(f, "   Service id:     {}", optional(service_id.as_deref()))?;
            }
            MessageBody::Response {
                request_id,
                service_id,
            } => {
                writeln!(f, "   Request id:     {request_id}")?;
                writeln!(f, "   Service id:     {}", optional(service_id.as_deref()))?;
            }
            MessageBody::Error {
                request_id,
                error_code,
                error_text,
                ..
            } => {
                writeln!(f, "   Request id:     {request_id}")?;
                writeln!(f, "   Error code:     {error_code}")?;
                writeln!(f, "   Error text:     {error_text}")?;
            }
            MessageBody::Event => {}
        }
        write!(f, "{RULE}")
    }
}
