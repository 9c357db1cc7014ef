//! # Payload Decoder
//!
//! Turns a sniffed discriminator plus the complete message bytes into a typed
//! `FeedEvent`. Routing is a closed lookup: a static table maps each known
//! discriminator to the function that decodes its envelope. Anything not in
//! the table is `UnknownMessageType`; anything in the table whose body does
//! not match its schema is `DeserializationError`.

use serde::de::DeserializeOwned;

use crate::feed::errors::FeedError;
use crate::feed::payloads::{
    AcceptedPayload, Envelope, EventKind, FeedEvent, RejectedPayload, UploadPayload,
};

type DecodeFn = fn(&[u8]) -> serde_json::Result<FeedEvent>;

/// Discriminator → (kind, decoder), scanned linearly once per message.
static DISPATCH: [(&str, EventKind, DecodeFn); 3] = [
    ("upload", EventKind::Upload, decode_upload),
    ("accepted", EventKind::Accepted, decode_accepted),
    ("rejected", EventKind::Rejected, decode_rejected),
];

fn envelope<T: DeserializeOwned>(message: &[u8]) -> serde_json::Result<T> {
    serde_json::from_slice::<Envelope<T>>(message).map(|env| env.data)
}

fn decode_upload(message: &[u8]) -> serde_json::Result<FeedEvent> {
    envelope::<UploadPayload>(message).map(FeedEvent::Upload)
}

fn decode_accepted(message: &[u8]) -> serde_json::Result<FeedEvent> {
    envelope::<AcceptedPayload>(message).map(FeedEvent::Accepted)
}

fn decode_rejected(message: &[u8]) -> serde_json::Result<FeedEvent> {
    envelope::<RejectedPayload>(message).map(FeedEvent::Rejected)
}

/// Stateless decoder over the dispatch table.
#[derive(Debug, Default, Clone, Copy)]
pub struct PayloadDecoder;

impl PayloadDecoder {
    /// Maps a wire discriminator to a known event kind.
    pub fn lookup(discriminator: &str) -> Option<EventKind> {
        DISPATCH
            .iter()
            .find(|(name, _, _)| *name == discriminator)
            .map(|(_, kind, _)| *kind)
    }

    /// Fully decodes `message`, whose discriminator has already been sniffed.
    pub fn decode(&self, discriminator: &str, message: &[u8]) -> Result<FeedEvent, FeedError> {
        let Some((_, _, decode)) = DISPATCH.iter().find(|(name, _, _)| *name == discriminator)
        else {
            return Err(FeedError::UnknownMessageType(discriminator.to_string()));
        };

        decode(message).map_err(|err| {
            FeedError::deserialization(message, format!("a valid `{discriminator}` payload ({err})"))
        })
    }
}
