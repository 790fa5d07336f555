//! Typed feature channels on top of the router and the session.
//!
//! Each channel owns one topic.  `subscribe` registers a handler and then asks
//! the device to start sending that topic's events; `unsubscribe` does the
//! reverse.  Command methods compose the envelope header from the session's
//! household and group ids.

use std::sync::Arc;

use tracing::{debug, trace};
use zonelink_core::{Command, Envelope, GroupEvent, Topic};

use crate::application::router::{MessageRouter, TopicHandler};
use crate::domain::SessionError;

/// Where feature channels send commands and register handlers.
///
/// Implemented by the session connector; tests use a recording fake.
pub trait CommandSink: Send + Sync {
    /// Sends `command` on `topic` to the connected group.
    fn send_command(&self, topic: &Topic, command: &Command) -> Result<(), SessionError>;

    /// The router inbound frames for this session are dispatched through.
    fn router(&self) -> &MessageRouter;
}

/// A single-topic channel.
#[derive(Clone)]
pub struct FeatureChannel {
    topic: Topic,
    sink: Arc<dyn CommandSink>,
}

impl FeatureChannel {
    pub fn new(topic: Topic, sink: Arc<dyn CommandSink>) -> Self {
        Self { topic, sink }
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Registers a raw envelope handler and sends `subscribe`.
    pub fn subscribe(&self, handler: TopicHandler) -> Result<(), SessionError> {
        self.sink.router().listen(self.topic.clone(), Some(handler));
        self.command(&Command::Subscribe)
    }

    /// Registers a handler for decoded events and sends `subscribe`.
    ///
    /// Command replies on this topic are skipped; events whose body does not
    /// decode are logged and skipped.
    pub fn subscribe_events<F>(&self, handler: F) -> Result<(), SessionError>
    where
        F: Fn(GroupEvent) + Send + Sync + 'static,
    {
        let topic = self.topic.clone();
        self.subscribe(Arc::new(move |envelope: &Envelope| {
            if envelope.header.event_type.is_none() {
                trace!(%topic, response = ?envelope.header.response, "command reply");
                return;
            }
            match GroupEvent::decode(envelope) {
                Ok(event) => handler(event),
                Err(e) => debug!(%topic, "undecodable event: {e}"),
            }
        }))
    }

    /// Clears the handler and sends `unsubscribe`.
    pub fn unsubscribe(&self) -> Result<(), SessionError> {
        self.sink.router().listen(self.topic.clone(), None);
        self.command(&Command::Unsubscribe)
    }

    /// Sends any command on this channel's topic.
    pub fn command(&self, command: &Command) -> Result<(), SessionError> {
        command.validate()?;
        self.sink.send_command(&self.topic, command)
    }
}

/// `groupVolume:1`.
#[derive(Clone)]
pub struct GroupVolume(FeatureChannel);

impl GroupVolume {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self(FeatureChannel::new(Topic::GroupVolume, sink))
    }

    pub fn channel(&self) -> &FeatureChannel {
        &self.0
    }

    pub fn get_volume(&self) -> Result<(), SessionError> {
        self.0.command(&Command::GetVolume)
    }

    /// Sets the group volume (`0..=100`).
    pub fn set_volume(&self, volume: i64) -> Result<(), SessionError> {
        self.0.command(&Command::set_volume(volume)?)
    }

    /// Adjusts the group volume by `delta` (`-100..=100`).
    pub fn set_relative_volume(&self, delta: i64) -> Result<(), SessionError> {
        self.0.command(&Command::set_relative_volume(delta)?)
    }

    pub fn set_mute(&self, muted: bool) -> Result<(), SessionError> {
        self.0.command(&Command::SetMute { muted })
    }
}

/// `playback:1`.
#[derive(Clone)]
pub struct Playback(FeatureChannel);

impl Playback {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self(FeatureChannel::new(Topic::Playback, sink))
    }

    pub fn channel(&self) -> &FeatureChannel {
        &self.0
    }

    pub fn play(&self) -> Result<(), SessionError> {
        self.0.command(&Command::Play)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        self.0.command(&Command::Pause)
    }

    pub fn skip_to_next_track(&self) -> Result<(), SessionError> {
        self.0.command(&Command::SkipToNextTrack)
    }

    pub fn skip_to_previous_track(&self) -> Result<(), SessionError> {
        self.0.command(&Command::SkipToPreviousTrack)
    }
}

/// The four feature channels of one session.
#[derive(Clone)]
pub struct GroupControls {
    pub volume: GroupVolume,
    pub playback: Playback,
    /// `playbackMetadata:1`: events only.
    pub metadata: FeatureChannel,
    /// `global:1`: household notices such as coordinator changes.
    pub global: FeatureChannel,
}

impl GroupControls {
    pub fn new(sink: Arc<dyn CommandSink>) -> Self {
        Self {
            volume: GroupVolume::new(Arc::clone(&sink)),
            playback: Playback::new(Arc::clone(&sink)),
            metadata: FeatureChannel::new(Topic::PlaybackMetadata, Arc::clone(&sink)),
            global: FeatureChannel::new(Topic::Global, sink),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
