//! Outbound commands and their request bodies.

use serde_json::{json, Value};
use thiserror::Error;

use super::topic::Topic;

/// Highest group volume a player accepts.
pub const MAX_VOLUME: u8 = 100;

/// Largest magnitude accepted by `setRelativeVolume`.
pub const MAX_VOLUME_DELTA: i8 = 100;

/// Rejected command arguments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("volume {0} is outside 0..=100")]
    VolumeOutOfRange(i64),

    #[error("volume delta {0} is outside -100..=100")]
    VolumeDeltaOutOfRange(i64),
}

/// A command sent to the connected group.
///
/// The wire name and body shape of each variant are fixed by the device API.
/// Range-limited variants should be built with [`Command::set_volume`] and
/// [`Command::set_relative_volume`], which validate their argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Subscribe,
    Unsubscribe,
    GetVolume,
    SetVolume { volume: u8 },
    SetRelativeVolume { volume_delta: i8 },
    SetMute { muted: bool },
    Play,
    Pause,
    SkipToNextTrack,
    SkipToPreviousTrack,
}

impl Command {
    /// Builds a `setVolume` command.
    ///
    /// # Errors
    ///
    /// [`CommandError::VolumeOutOfRange`] if `volume` is not in `0..=100`.
    pub fn set_volume(volume: i64) -> Result<Self, CommandError> {
        u8::try_from(volume)
            .ok()
            .filter(|v| *v <= MAX_VOLUME)
            .map(|volume| Command::SetVolume { volume })
            .ok_or(CommandError::VolumeOutOfRange(volume))
    }

    /// Builds a `setRelativeVolume` command.
    ///
    /// # Errors
    ///
    /// [`CommandError::VolumeDeltaOutOfRange`] if `delta` is not in `-100..=100`.
    pub fn set_relative_volume(delta: i64) -> Result<Self, CommandError> {
        i8::try_from(delta)
            .ok()
            .filter(|d| (-MAX_VOLUME_DELTA..=MAX_VOLUME_DELTA).contains(d))
            .map(|volume_delta| Command::SetRelativeVolume { volume_delta })
            .ok_or(CommandError::VolumeDeltaOutOfRange(delta))
    }

    /// Re-checks the argument ranges of a command built directly from its
    /// variant.
    pub fn validate(&self) -> Result<(), CommandError> {
        match *self {
            Command::SetVolume { volume } if volume > MAX_VOLUME => {
                Err(CommandError::VolumeOutOfRange(volume.into()))
            }
            Command::SetRelativeVolume { volume_delta }
                if !(-MAX_VOLUME_DELTA..=MAX_VOLUME_DELTA).contains(&volume_delta) =>
            {
                Err(CommandError::VolumeDeltaOutOfRange(volume_delta.into()))
            }
            _ => Ok(()),
        }
    }

    /// The `command` header value.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Subscribe => "subscribe",
            Command::Unsubscribe => "unsubscribe",
            Command::GetVolume => "getVolume",
            Command::SetVolume { .. } => "setVolume",
            Command::SetRelativeVolume { .. } => "setRelativeVolume",
            Command::SetMute { .. } => "setMute",
            Command::Play => "play",
            Command::Pause => "pause",
            Command::SkipToNextTrack => "skipToNextTrack",
            Command::SkipToPreviousTrack => "skipToPreviousTrack",
        }
    }

    /// The request body.  Commands without parameters send `{}`.
    pub fn body(&self) -> Value {
        match *self {
            Command::SetVolume { volume } => json!({ "volume": volume }),
            Command::SetRelativeVolume { volume_delta } => json!({ "volumeDelta": volume_delta }),
            Command::SetMute { muted } => json!({ "muted": muted }),
            _ => json!({}),
        }
    }

    /// The topic a command belongs to, or `None` for commands valid on
    /// every topic (`subscribe`, `unsubscribe`).
    pub fn topic(&self) -> Option<Topic> {
        match self {
            Command::Subscribe | Command::Unsubscribe => None,
            Command::GetVolume
            | Command::SetVolume { .. }
            | Command::SetRelativeVolume { .. }
            | Command::SetMute { .. } => Some(Topic::GroupVolume),
            Command::Play | Command::Pause | Command::SkipToNextTrack | Command::SkipToPreviousTrack => {
                Some(Topic::Playback)
            }
        }
    }
}
