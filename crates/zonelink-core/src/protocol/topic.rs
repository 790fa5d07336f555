//! Session topics (the `namespace` header field).

use std::fmt;

/// A channel within the session protocol.
///
/// Known topics get their own variant; anything else is carried verbatim in
/// [`Topic::Unknown`] so it can still be routed.  Always build topics from
/// wire strings with [`Topic::from_namespace`], which maps known namespaces to
/// their variants, so that equal namespaces compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `groupVolume:1`
    GroupVolume,
    /// `playback:1`
    Playback,
    /// `playbackMetadata:1`
    PlaybackMetadata,
    /// `global:1` – household-wide notices such as coordinator changes.
    Global,
    Unknown(String),
}

impl Topic {
    pub const ALL_KNOWN: [Topic; 4] = [
        Topic::GroupVolume,
        Topic::Playback,
        Topic::PlaybackMetadata,
        Topic::Global,
    ];

    /// Maps a wire namespace string to a topic.
    pub fn from_namespace(namespace: &str) -> Self {
        match namespace {
            "groupVolume:1" => Topic::GroupVolume,
            "playback:1" => Topic::Playback,
            "playbackMetadata:1" => Topic::PlaybackMetadata,
            "global:1" => Topic::Global,
            other => Topic::Unknown(other.to_string()),
        }
    }

    /// The wire namespace string.
    pub fn namespace(&self) -> &str {
        match self {
            Topic::GroupVolume => "groupVolume:1",
            Topic::Playback => "playback:1",
            Topic::PlaybackMetadata => "playbackMetadata:1",
            Topic::Global => "global:1",
            Topic::Unknown(ns) => ns,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Topic::Unknown(_))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

impl From<&str> for Topic {
    fn from(namespace: &str) -> Self {
        Topic::from_namespace(namespace)
    }
}
