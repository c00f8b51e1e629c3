//! Binary payload codec.
//!
//! The container does not prescribe a payload wire format beyond the length
//! prefix of each record frame; this module pins the current choice
//! (`bincode`) behind two functions so it stays swappable. The contract is
//! `decode(encode(t)) == t` for every normalized tree, with mapping-typed
//! values always decoding to the uniform insertion-ordered string-keyed
//! [`PayloadMap`](crate::payload::PayloadMap).

use crate::payload::{denormalize, normalize, Payload};
use crate::FormatResult;

/// Normalizes `payload` and serializes the canonical tree.
pub fn encode_payload(payload: &Payload) -> FormatResult<Vec<u8>> {
    Ok(bincode::serialize(&normalize(payload))?)
}

/// Deserializes a canonical tree and materializes blob envelopes back into
/// byte blobs.
pub fn decode_payload(bytes: &[u8]) -> FormatResult<Payload> {
    let canonical: Payload = bincode::deserialize(bytes)?;
    denormalize(&canonical)
}
