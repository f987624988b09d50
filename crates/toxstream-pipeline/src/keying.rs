//! Keying transform
//!
//! Extracts the partition key from a message's attributes and decodes the
//! payload to text. This is the one place the pipeline guards against
//! malformed input: a missing key attribute or non-UTF-8 payload is a
//! per-record error, not a crash.

use toxstream_core::{Error, KeyedRecord, Message, Result};

/// Attribute carrying the user identifier on input messages
pub const DEFAULT_KEY_ATTRIBUTE: &str = "userid";

/// Key a message by the given attribute and decode its payload.
pub fn key_message(message: &Message, attribute: &str) -> Result<KeyedRecord> {
    let key = message
        .attributes
        .get(attribute)
        .ok_or_else(|| Error::missing_key(attribute))?;

    let text = std::str::from_utf8(&message.data)
        .map_err(|e| Error::decoding(format!("payload is not valid UTF-8: {e}")))?;

    Ok(KeyedRecord {
        key: key.clone(),
        text: text.to_string(),
        event_time: message.publish_time,
    })
}
