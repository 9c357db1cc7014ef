//! # Score Event Payloads
//!
//! Strongly typed shapes for the three messages the score feed publishes.
//! Every message carries the same envelope, `{"message": "<kind>", "data": {..}}`,
//! and every payload embeds the player and leaderboard identifiers so that
//! consumers can correlate an `upload` with the `accepted`/`rejected` that
//! follows it.
//!
//! Field names follow the upstream camelCase JSON. Only the identifiers and
//! the raw score numbers are required; everything else defaults so that the
//! upstream can add or omit optional fields without breaking the decoder.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

/// # Envelope
///
/// The wire wrapper around every payload. The discriminator field is read
/// separately by the sniffer, so only `data` is decoded here.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    /// The typed event body.
    pub data: T,
}

/// # Score Core
///
/// Fields shared by every score payload, flattened into each event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreCore {
    /// Upstream score id, absent for scores that were never stored.
    #[serde(default)]
    pub id: Option<u64>,
    /// The player who set the score.
    pub player_id: String,
    /// The upstream leaderboard (map + difficulty) the score belongs to.
    pub leaderboard_id: String,
    /// Score before modifiers.
    pub base_score: i64,
    /// Score after modifiers.
    pub modified_score: i64,
    /// Accuracy in the 0..=1 range.
    pub accuracy: f64,
    /// Comma separated gameplay modifiers, e.g. `"FS,GN"`.
    #[serde(default)]
    pub modifiers: String,
    #[serde(default)]
    pub full_combo: bool,
    #[serde(default)]
    pub max_combo: u32,
    #[serde(default)]
    pub missed_notes: u32,
    #[serde(default)]
    pub bad_cuts: u32,
    /// Device/platform string reported by the game client.
    #[serde(default)]
    pub platform: String,
    /// Unix timestamp (seconds) when the score was set. The upstream sends
    /// it as a quoted string; plain numbers are accepted too.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timeset: i64,
}

/// Reads a Unix timestamp given either as a JSON number or a numeric string.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct StringOrNumber;

    impl<'de> Visitor<'de> for StringOrNumber {
        type Value = i64;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a timestamp as a string or number")
        }

        fn visit_str<E>(self, value: &str) -> Result<i64, E>
        where
            E: de::Error,
        {
            value
                .trim()
                .parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
        }

        fn visit_i64<E>(self, value: i64) -> Result<i64, E>
        where
            E: de::Error,
        {
            Ok(value)
        }

        fn visit_u64<E>(self, value: u64) -> Result<i64, E>
        where
            E: de::Error,
        {
            i64::try_from(value).map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}

/// # Upload Payload
///
/// A score as submitted by the game, before the ranking pipeline has looked at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    #[serde(flatten)]
    pub score: ScoreCore,
    /// Location of the uploaded replay, when the upstream exposes it.
    #[serde(default)]
    pub replay: Option<String>,
}

/// # Accepted Payload
///
/// A score that was processed and confirmed on its leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedPayload {
    #[serde(flatten)]
    pub score: ScoreCore,
    /// Performance points awarded.
    #[serde(default)]
    pub pp: f64,
    /// Position on the leaderboard after processing.
    #[serde(default)]
    pub rank: u32,
    /// Weight applied to `pp` in the player's total.
    #[serde(default)]
    pub weight: f64,
}

/// # Rejected Payload
///
/// A score that was processed and then withdrawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPayload {
    #[serde(flatten)]
    pub score: ScoreCore,
    #[serde(default)]
    pub pp: f64,
    #[serde(default)]
    pub rank: u32,
    /// Upstream explanation for the withdrawal, if any.
    #[serde(default)]
    pub reason: Option<String>,
}

/// The discriminator values of known events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Upload,
    Accepted,
    Rejected,
}

impl EventKind {
    /// The discriminator string as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Upload => "upload",
            EventKind::Accepted => "accepted",
            EventKind::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Feed Event
///
/// One decoded message from the score feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// A freshly submitted, unprocessed score.
    Upload(UploadPayload),
    /// A processed and confirmed score.
    Accepted(AcceptedPayload),
    /// A processed and withdrawn score.
    Rejected(RejectedPayload),
}

impl FeedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FeedEvent::Upload(_) => EventKind::Upload,
            FeedEvent::Accepted(_) => EventKind::Accepted,
            FeedEvent::Rejected(_) => EventKind::Rejected,
        }
    }

    /// Fields shared by all variants.
    pub fn score(&self) -> &ScoreCore {
        match self {
            FeedEvent::Upload(p) => &p.score,
            FeedEvent::Accepted(p) => &p.score,
            FeedEvent::Rejected(p) => &p.score,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.score().player_id
    }

    pub fn leaderboard_id(&self) -> &str {
        &self.score().leaderboard_id
    }
}
