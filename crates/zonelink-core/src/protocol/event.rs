//! Typed decoding of inbound events.
//!
//! Events are envelopes whose header carries `type`.  [`GroupEvent::decode`]
//! recognises the event types the agent acts on and leaves everything else as
//! [`GroupEvent::Other`], so a newer device never breaks the session.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::envelope::Envelope;

#[derive(Debug, Error)]
pub enum EventError {
    /// The envelope is a command reply, not an event.
    #[error("envelope has no event type")]
    NotAnEvent,

    /// The body does not match the shape of its declared event type.
    #[error("malformed {event_type} body: {source}")]
    MalformedBody {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `groupVolume` event body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroupVolumeStatus {
    pub volume: u8,
    #[serde(default)]
    pub muted: bool,
    /// `true` when the group's volume cannot be changed (line-level output).
    #[serde(default)]
    pub fixed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PlaybackState {
    #[serde(rename = "PLAYBACK_STATE_IDLE")]
    Idle,
    #[serde(rename = "PLAYBACK_STATE_BUFFERING")]
    Buffering,
    #[serde(rename = "PLAYBACK_STATE_PAUSED")]
    Paused,
    #[serde(rename = "PLAYBACK_STATE_PLAYING")]
    Playing,
    #[serde(other)]
    Unknown,
}

impl PlaybackState {
    /// Buffering counts as playing: audio is about to start.
    pub fn is_playing(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Buffering)
    }
}

/// `playbackStatus` event body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub playback_state: PlaybackState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<Artist>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Track {
    pub fn artist_name(&self) -> Option<&str> {
        self.artist.as_ref().and_then(|a| a.name.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Item {
    #[serde(default)]
    pub track: Option<Track>,
}

/// `metadataStatus` event body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataStatus {
    #[serde(default)]
    pub current_item: Option<Item>,
    #[serde(default)]
    pub next_item: Option<Item>,
}

impl MetadataStatus {
    pub fn current_track(&self) -> Option<&Track> {
        self.current_item.as_ref().and_then(|i| i.track.as_ref())
    }

    pub fn next_track(&self) -> Option<&Track> {
        self.next_item.as_ref().and_then(|i| i.track.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum GroupStatus {
    /// The group still exists; its name may have changed.
    #[serde(rename = "GROUP_STATUS_UPDATED")]
    Updated,
    /// The group was dissolved; the session is now useless.
    #[serde(rename = "GROUP_STATUS_GONE")]
    Gone,
    /// Another player now coordinates the group; reconnect to `websocket_url`.
    #[serde(rename = "GROUP_STATUS_MOVED")]
    Moved,
    #[serde(other)]
    Unknown,
}

/// `groupCoordinatorChanged` event body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorChange {
    pub group_status: GroupStatus,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub websocket_url: Option<String>,
}

/// An inbound event with a decoded body.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupEvent {
    GroupVolume(GroupVolumeStatus),
    PlaybackStatus(PlaybackStatus),
    MetadataStatus(MetadataStatus),
    CoordinatorChanged(CoordinatorChange),
    /// An event type this crate does not model, with its raw body.
    Other { event_type: String, body: Value },
}

impl GroupEvent {
    /// Decodes the body of an event envelope according to its `type`.
    ///
    /// # Errors
    ///
    /// [`EventError::NotAnEvent`] if the header has no `type`;
    /// [`EventError::MalformedBody`] if a known type has an unexpected body.
    pub fn decode(envelope: &Envelope) -> Result<Self, EventError> {
        let event_type = envelope
            .header
            .event_type
            .as_deref()
            .ok_or(EventError::NotAnEvent)?;

        let body = &envelope.body;
        let malformed = |source| EventError::MalformedBody {
            event_type: event_type.to_string(),
            source,
        };

        Ok(match event_type {
            "groupVolume" => {
                GroupEvent::GroupVolume(GroupVolumeStatus::deserialize(body).map_err(malformed)?)
            }
            "playbackStatus" => {
                GroupEvent::PlaybackStatus(PlaybackStatus::deserialize(body).map_err(malformed)?)
            }
            "metadataStatus" => {
                GroupEvent::MetadataStatus(MetadataStatus::deserialize(body).map_err(malformed)?)
            }
            "groupCoordinatorChanged" => GroupEvent::CoordinatorChanged(
                CoordinatorChange::deserialize(body).map_err(malformed)?,
            ),
            other => GroupEvent::Other {
                event_type: other.to_string(),
                body: body.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(text: &str) -> Envelope {
        Envelope::from_json(text).unwrap()
    }

    #[test]
    fn test_decode_group_volume() {
        let env = envelope(
            r#"[{"namespace":"groupVolume:1","type":"groupVolume"},{"volume":35,"muted":true,"fixed":false}]"#,
        );
        assert_eq!(
            GroupEvent::decode(&env).unwrap(),
            GroupEvent::GroupVolume(GroupVolumeStatus {
                volume: 35,
                muted: true,
                fixed: false
            })
        );
    }

    #[test]
    fn test_decode_playback_status() {
        let env = envelope(
            r#"[{"namespace":"playback:1","type":"playbackStatus"},{"playbackState":"PLAYBACK_STATE_BUFFERING","positionMillis":0}]"#,
        );
        let GroupEvent::PlaybackStatus(status) = GroupEvent::decode(&env).unwrap() else {
            panic!("expected PlaybackStatus");
        };
        assert_eq!(status.playback_state, PlaybackState::Buffering);
        assert!(status.playback_state.is_playing());
    }

    #[test]
    fn test_decode_unknown_playback_state() {
        let env = envelope(
            r#"[{"namespace":"playback:1","type":"playbackStatus"},{"playbackState":"PLAYBACK_STATE_WARPING"}]"#,
        );
        let GroupEvent::PlaybackStatus(status) = GroupEvent::decode(&env).unwrap() else {
            panic!("expected PlaybackStatus");
        };
        assert_eq!(status.playback_state, PlaybackState::Unknown);
        assert!(!status.playback_state.is_playing());
    }

    #[test]
    fn test_decode_metadata_with_missing_next_item() {
        let env = envelope(
            r#"[{"namespace":"playbackMetadata:1","type":"metadataStatus"},
                {"currentItem":{"track":{"name":"Song","artist":{"name":"Band"},"imageUrl":"http://x/y.jpg"}}}]"#,
        );
        let GroupEvent::MetadataStatus(meta) = GroupEvent::decode(&env).unwrap() else {
            panic!("expected MetadataStatus");
        };
        let track = meta.current_track().unwrap();
        assert_eq!(track.name.as_deref(), Some("Song"));
        assert_eq!(track.artist_name(), Some("Band"));
        assert_eq!(track.image_url.as_deref(), Some("http://x/y.jpg"));
        assert!(meta.next_track().is_none());
    }

    #[test]
    fn test_decode_coordinator_moved() {
        let env = envelope(
            r#"[{"namespace":"global:1","type":"groupCoordinatorChanged"},
                {"groupStatus":"GROUP_STATUS_MOVED","groupName":"Den","websocketUrl":"wss://10.0.0.9:1443/websocket/api"}]"#,
        );
        let GroupEvent::CoordinatorChanged(change) = GroupEvent::decode(&env).unwrap() else {
            panic!("expected CoordinatorChanged");
        };
        assert_eq!(change.group_status, GroupStatus::Moved);
        assert_eq!(change.group_name.as_deref(), Some("Den"));
    }

    #[test]
    fn test_decode_unmodelled_type_is_other() {
        let env = envelope(r#"[{"namespace":"audioClip:1","type":"audioClipStatus"},{"a":1}]"#);
        assert!(matches!(
            GroupEvent::decode(&env).unwrap(),
            GroupEvent::Other { event_type, .. } if event_type == "audioClipStatus"
        ));
    }

    #[test]
    fn test_decode_response_is_not_an_event() {
        let env = envelope(r#"[{"namespace":"groupVolume:1","response":"subscribe"},{}]"#);
        assert!(matches!(GroupEvent::decode(&env), Err(EventError::NotAnEvent)));
    }

    #[test]
    fn test_decode_wrong_body_shape() {
        let env = envelope(r#"[{"namespace":"groupVolume:1","type":"groupVolume"},{"volume":"loud"}]"#);
        assert!(matches!(
            GroupEvent::decode(&env),
            Err(EventError::MalformedBody { .. })
        ));
    }
}
