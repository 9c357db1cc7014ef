//! # Message Type Sniffer
//!
//! Reads the discriminator of a feed message without materialising its
//! payload. The scan walks the top-level object once: the discriminator key is
//! read as a string, every other member (including the large `data` body) is
//! skipped with `serde::de::IgnoredAny`, which validates the JSON but allocates
//! nothing for it.
//!
//! Shape problems (not an object, field missing, field not a string, field
//! null, broken JSON) are `DeserializationError`s. Whether the discriminator
//! names a known event is the decoder's business, not the sniffer's.

use std::fmt;

use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, Visitor};

use crate::feed::errors::FeedError;

/// The discriminator key used by the upstream feed.
pub const DEFAULT_DISCRIMINATOR_FIELD: &str = "message";

/// Extracts a single string field from a completed JSON message.
#[derive(Debug, Clone)]
pub struct MessageTypeSniffer {
    field: String,
}

impl MessageTypeSniffer {
    /// Creates a sniffer keyed on `field` (`message` upstream, `type` in some deployments).
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// The discriminator key this sniffer looks for.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Returns the discriminator of `message`.
    pub fn sniff(&self, message: &[u8]) -> Result<String, FeedError> {
        let mut de = serde_json::Deserializer::from_slice(message);

        let scanned = DiscriminatorSeed { field: &self.field }
            .deserialize(&mut de)
            .and_then(|found| de.end().map(|_| found));

        match scanned {
            Ok(Some(discriminator)) => Ok(discriminator),
            Ok(None) => Err(FeedError::deserialization(
                message,
                format!("{} (field is missing)", self.expected_shape()),
            )),
            Err(err) => Err(FeedError::deserialization(
                message,
                format!("{} ({err})", self.expected_shape()),
            )),
        }
    }

    fn expected_shape(&self) -> String {
        format!("a JSON object with a string `{}` field", self.field)
    }
}

impl Default for MessageTypeSniffer {
    fn default() -> Self {
        Self::new(DEFAULT_DISCRIMINATOR_FIELD)
    }
}

struct DiscriminatorSeed<'f> {
    field: &'f str,
}

impl<'de> DeserializeSeed<'de> for DiscriminatorSeed<'_> {
    type Value = Option<String>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DiscriminatorSeed<'_> {
    type Value = Option<String>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut found = None;

        while let Some(key) = map.next_key::<String>()? {
            if found.is_none() && key == self.field {
                match map.next_value::<Option<String>>()? {
                    Some(value) => found = Some(value),
                    None => {
                        return Err(de::Error::custom(format_args!("`{}` is null", self.field)))
                    }
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }

        Ok(found)
    }
}
