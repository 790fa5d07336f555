//! The two-element `[header, body]` message unit.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::command::Command;
use super::topic::Topic;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The text is not a two-element JSON array with a header object that
    /// carries a `namespace`.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to serialise envelope: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Envelope header.
///
/// Only `namespace` is mandatory.  Fields the device adds that are not
/// modelled here are kept in `extra` and written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Set on outbound commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Set on replies: the name of the command being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Set on unsolicited events, e.g. `groupVolume`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Header {
    /// A bare header for `topic` with every optional field unset.
    pub fn new(topic: &Topic) -> Self {
        Self {
            namespace: topic.namespace().to_string(),
            household_id: None,
            group_id: None,
            command: None,
            response: None,
            event_type: None,
            success: None,
            cmd_id: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One session message.
///
/// On the wire this is the JSON array `[header, body]`, not an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Header, Value)", into = "(Header, Value)")]
pub struct Envelope {
    pub header: Header,
    pub body: Value,
}

impl From<(Header, Value)> for Envelope {
    fn from((header, body): (Header, Value)) -> Self {
        Self { header, body }
    }
}

impl From<Envelope> for (Header, Value) {
    fn from(envelope: Envelope) -> Self {
        (envelope.header, envelope.body)
    }
}

impl Envelope {
    /// Composes an outbound command for the given household and group.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use zonelink_core::{Command, Envelope, Topic};
    ///
    /// let env = Envelope::command(&Topic::GroupVolume, "HH_1", "G:1", &Command::SetVolume { volume: 35 });
    /// assert_eq!(
    ///     env.to_json().unwrap(),
    ///     r#"[{"namespace":"groupVolume:1","householdId":"HH_1","groupId":"G:1","command":"setVolume"},{"volume":35}]"#
    /// );
    /// ```
    pub fn command(topic: &Topic, household_id: &str, group_id: &str, command: &Command) -> Self {
        let mut header = Header::new(topic);
        header.household_id = Some(household_id.to_string());
        header.group_id = Some(group_id.to_string());
        header.command = Some(command.name().to_string());
        Self {
            header,
            body: command.body(),
        }
    }

    /// Parses an inbound text frame.
    pub fn from_json(text: &str) -> Result<Self, EnvelopeError> {
        serde_json::from_str(text).map_err(EnvelopeError::Malformed)
    }

    /// Serialises the envelope as a JSON text frame.
    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        serde_json::to_string(self).map_err(EnvelopeError::Serialize)
    }

    /// The topic named by `header.namespace`.
    pub fn topic(&self) -> Topic {
        Topic::from_namespace(&self.header.namespace)
    }
}
