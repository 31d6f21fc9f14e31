//! Typed value codecs for checkpointed state
//!
//! Checkpointed state is JSON, but callers routinely store domain types in
//! it (messages, tool results, structured records) and need the exact type
//! back after a round trip through any backend. Rather than an ambient
//! "serialize anything" layer, every storable domain type registers a codec
//! under a string tag; encoding wraps the payload in a tagged envelope and
//! decoding refuses tags that were never registered or do not match the
//! requested type's registration.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use trellis_checkpoint::codec::CodecRegistry;
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Note { author: String, body: String }
//!
//! let mut registry = CodecRegistry::new();
//! registry.register::<Note>("note");
//!
//! let note = Note { author: "ada".into(), body: "looks good".into() };
//! let envelope = registry.encode("note", &note).unwrap();
//! let back: Note = registry.decode(&envelope).unwrap();
//! assert_eq!(back, note);
//! ```

use crate::error::{CheckpointError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Envelope field carrying the registered type tag
pub const CODEC_TAG_KEY: &str = "__codec__";

/// Envelope field carrying the encoded payload
pub const CODEC_DATA_KEY: &str = "data";

type CheckFn = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

struct CodecEntry {
    check: CheckFn,
}

/// Table of registered type-tag codecs
#[derive(Default)]
pub struct CodecRegistry {
    entries: HashMap<String, CodecEntry>,
}

impl CodecRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register type `T` under `tag`
    ///
    /// The registration records a decode check for `T`, so a later
    /// [`decode`](Self::decode) of an envelope with this tag verifies the
    /// payload actually deserializes as the registered type.
    pub fn register<T>(&mut self, tag: impl Into<String>)
    where
        T: DeserializeOwned + 'static,
    {
        let check: CheckFn = Arc::new(|value: &Value| {
            serde_json::from_value::<T>(value.clone())
                .map(|_| ())
                .map_err(|err| CheckpointError::Codec(format!("payload check failed: {err}")))
        });
        self.entries.insert(tag.into(), CodecEntry { check });
    }

    /// Whether a tag has a registered codec
    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(tag)
    }

    /// Encode a value into a tagged envelope
    ///
    /// Fails if `tag` has no registered codec.
    pub fn encode<T: Serialize>(&self, tag: &str, value: &T) -> Result<Value> {
        if !self.entries.contains_key(tag) {
            return Err(CheckpointError::Codec(format!(
                "no codec registered for tag '{tag}'"
            )));
        }
        Ok(serde_json::json!({
            CODEC_TAG_KEY: tag,
            CODEC_DATA_KEY: serde_json::to_value(value)?,
        }))
    }

    /// Read the tag of an envelope, if it is one
    pub fn tag_of(value: &Value) -> Option<&str> {
        value.get(CODEC_TAG_KEY)?.as_str()
    }

    /// Decode a tagged envelope back into `T`
    ///
    /// Fails when the value is not an envelope, the tag is unregistered, or
    /// the payload does not deserialize as the registered type.
    pub fn decode<T: DeserializeOwned>(&self, value: &Value) -> Result<T> {
        let tag = Self::tag_of(value).ok_or_else(|| {
            CheckpointError::Codec("value is not a codec envelope".to_string())
        })?;
        let entry = self.entries.get(tag).ok_or_else(|| {
            CheckpointError::Codec(format!("no codec registered for tag '{tag}'"))
        })?;
        let payload = value.get(CODEC_DATA_KEY).ok_or_else(|| {
            CheckpointError::Codec(format!("envelope for '{tag}' has no payload"))
        })?;
        (entry.check)(payload)?;
        serde_json::from_value(payload.clone()).map_err(|err| {
            CheckpointError::Codec(format!("decoding tag '{tag}': {err}"))
        })
    }
}
