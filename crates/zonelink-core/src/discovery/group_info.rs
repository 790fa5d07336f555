//! Parser for the `GROUPINFO.SMARTSPEAKER.AUDIO` advertisement field.
//!
//! The field packs group membership into a single line of `key=value` pairs
//! separated by semicolons.  Values may be double-quoted, in which case they
//! may contain `;` and `=` characters:
//!
//! ```text
//! gc=1; gid=RINCON_000E58A0123401400:2; gname="Kitchen; Patio"
//! ```
//!
//! | Key     | Meaning                                  | Required |
//! |---------|------------------------------------------|----------|
//! | `gc`    | `1` if this player coordinates the group | yes      |
//! | `gid`   | Group identifier                         | yes      |
//! | `gname` | Display name (quoted)                    | yes      |
//!
//! Unknown keys are ignored so that newer firmware can add fields without
//! breaking discovery.

use thiserror::Error;

/// Errors produced by [`GroupInfo::parse`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GroupInfoError {
    /// A required key is absent.
    #[error("missing group-info key `{0}`")]
    MissingKey(&'static str),

    /// A pair has no `=` separator.
    #[error("malformed group-info pair: {0:?}")]
    MalformedPair(String),

    /// A quoted value has no closing quote.
    #[error("unterminated quoted value for key `{0}`")]
    UnterminatedQuote(String),

    /// The coordinator flag is not `0` or `1`.
    #[error("invalid coordinator flag: {0:?}")]
    InvalidCoordinatorFlag(String),

    /// The group id is empty.
    #[error("empty group id")]
    EmptyGroupId,
}

/// Structured group membership extracted from an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// `true` when the advertising player coordinates its group.
    pub coordinator: bool,
    /// Group identifier (`gid`).
    pub group_id: String,
    /// Human-readable group name (`gname`).
    pub group_name: String,
}

impl GroupInfo {
    /// Parses a group-info field value.
    ///
    /// # Errors
    ///
    /// Returns [`GroupInfoError`] if the grammar is violated or any required
    /// key is missing or invalid.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use zonelink_core::GroupInfo;
    ///
    /// let info = GroupInfo::parse(r#"gc=1; gid=RINCON_A:1; gname="Den""#).unwrap();
    /// assert!(info.coordinator);
    /// assert_eq!(info.group_name, "Den");
    /// ```
    pub fn parse(input: &str) -> Result<Self, GroupInfoError> {
        let mut coordinator = None;
        let mut group_id = None;
        let mut group_name = None;

        for pair in Pairs::new(input) {
            let (key, value) = pair?;
            match key.as_str() {
                "gc" => coordinator = Some(value),
                "gid" => group_id = Some(value),
                "gname" => group_name = Some(value),
                _ => {}
            }
        }

        let coordinator = match coordinator.ok_or(GroupInfoError::MissingKey("gc"))?.as_str() {
            "1" => true,
            "0" => false,
            other => return Err(GroupInfoError::InvalidCoordinatorFlag(other.to_string())),
        };
        let group_id = group_id.ok_or(GroupInfoError::MissingKey("gid"))?;
        if group_id.is_empty() {
            return Err(GroupInfoError::EmptyGroupId);
        }
        let group_name = group_name.ok_or(GroupInfoError::MissingKey("gname"))?;

        Ok(Self {
            coordinator,
            group_id,
            group_name,
        })
    }
}

/// Iterator over `key=value` pairs.
///
/// Yields one error on the first grammar violation, after which iteration ends.
struct Pairs<'a> {
    rest: &'a str,
    failed: bool,
}

impl<'a> Pairs<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            rest: input,
            failed: false,
        }
    }

    fn fail(&mut self, err: GroupInfoError) -> Option<Result<(String, String), GroupInfoError>> {
        self.failed = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for Pairs<'a> {
    type Item = Result<(String, String), GroupInfoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        // Skip separators and whitespace between pairs.
        self.rest = self.rest.trim_start_matches(|c: char| c == ';' || c.is_whitespace());
        if self.rest.is_empty() {
            return None;
        }

        let Some(eq) = self.rest.find('=') else {
            let pair = self.rest.split(';').next().unwrap_or_default().trim().to_string();
            return self.fail(GroupInfoError::MalformedPair(pair));
        };
        let key = self.rest[..eq].trim();
        if key.is_empty() || key.contains(';') {
            let pair = self.rest.split(';').next().unwrap_or_default().trim().to_string();
            return self.fail(GroupInfoError::MalformedPair(pair));
        }
        let key = key.to_string();
        let after = self.rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = after.strip_prefix('"') {
            let Some(close) = quoted.find('"') else {
                return self.fail(GroupInfoError::UnterminatedQuote(key));
            };
            self.rest = &quoted[close + 1..];
            quoted[..close].to_string()
        } else {
            let end = after.find(';').unwrap_or(after.len());
            self.rest = &after[end..];
            after[..end].trim().to_string()
        };

        Some(Ok((key, value)))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
