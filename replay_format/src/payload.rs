//! Schema-less packet payload trees and their canonical (encoder-facing)
//! form.
//!
//! Payloads are whatever the upstream packet source produced: scalars, byte
//! blobs, ordered lists and string-keyed maps. Before a payload reaches the
//! binary codec it is [`normalize`]d so that byte blobs travel as an
//! envelope map of the shape `{"__type": "Buffer", "__data": <base64>}`;
//! the codec then only ever sees scalar strings for blob data, which keeps
//! the container portable across codecs that do not preserve blob identity.
//! [`denormalize`] materializes the envelopes back into blobs on read.

use crate::{FormatError, FormatResult};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// String-keyed map preserving insertion order.
pub type PayloadMap = IndexMap<String, Payload>;

pub const BLOB_TYPE_KEY: &str = "__type";
pub const BLOB_DATA_KEY: &str = "__data";
pub const BLOB_TYPE_TAG: &str = "Buffer";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Payload>),
    Map(PayloadMap),
}

impl Payload {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Payload::Int(v) => Some(*v),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Payload::Float(v) => Some(*v),
            Payload::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_list(&self) -> Option<&[Payload]> {
        match self {
            Payload::List(v) => Some(v),
            _ => None,
        }
    }
    pub fn as_map(&self) -> Option<&PayloadMap> {
        match self {
            Payload::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Map field lookup; `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&Payload> {
        self.as_map().and_then(|map| map.get(key))
    }
}

impl From<bool> for Payload {
    fn from(v: bool) -> Self {
        Payload::Bool(v)
    }
}
impl From<i32> for Payload {
    fn from(v: i32) -> Self {
        Payload::Int(v as i64)
    }
}
impl From<i64> for Payload {
    fn from(v: i64) -> Self {
        Payload::Int(v)
    }
}
impl From<u32> for Payload {
    fn from(v: u32) -> Self {
        Payload::Int(v as i64)
    }
}
impl From<f64> for Payload {
    fn from(v: f64) -> Self {
        Payload::Float(v)
    }
}
impl From<&str> for Payload {
    fn from(v: &str) -> Self {
        Payload::Str(v.to_string())
    }
}
impl From<String> for Payload {
    fn from(v: String) -> Self {
        Payload::Str(v)
    }
}
impl From<Vec<u8>> for Payload {
    fn from(v: Vec<u8>) -> Self {
        Payload::Bytes(v)
    }
}
impl From<Vec<Payload>> for Payload {
    fn from(v: Vec<Payload>) -> Self {
        Payload::List(v)
    }
}
impl From<PayloadMap> for Payload {
    fn from(v: PayloadMap) -> Self {
        Payload::Map(v)
    }
}

/// Builds a [`Payload::Map`] from `key => value` pairs, converting values
/// with [`Payload::from`].
#[macro_export]
macro_rules! payload_map {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut map = $crate::payload::PayloadMap::default();
        $(map.insert(($key).to_string(), $crate::payload::Payload::from($value));)*
        $crate::payload::Payload::Map(map)
    }};
}

/// Rewrites a payload into the canonical encoder-facing shape: byte blobs
/// become base64 envelope maps, containers are rewritten recursively, and
/// every other scalar passes through. Total on all payloads.
pub fn normalize(payload: &Payload) -> Payload {
    match payload {
        Payload::Bytes(bytes) => {
            let mut envelope = PayloadMap::default();
            envelope.insert(
                BLOB_TYPE_KEY.to_string(),
                Payload::Str(BLOB_TYPE_TAG.to_string()),
            );
            envelope.insert(BLOB_DATA_KEY.to_string(), Payload::Str(BASE64.encode(bytes)));
            Payload::Map(envelope)
        }
        Payload::List(items) => Payload::List(items.iter().map(normalize).collect()),
        Payload::Map(map) => Payload::Map(
            map.iter()
                .map(|(key, value)| (key.clone(), normalize(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Inverse of [`normalize`]: any map of the exact envelope shape is
/// materialized back into a byte blob. Fails only on envelopes whose
/// `__data` is not valid base64.
pub fn denormalize(payload: &Payload) -> FormatResult<Payload> {
    match payload {
        Payload::Map(map) => {
            if let Some(data) = blob_envelope_data(map) {
                let bytes = BASE64.decode(data).map_err(|e| FormatError::BlobEnvelope {
                    detail: e.to_string(),
                })?;
                return Ok(Payload::Bytes(bytes));
            }
            let mut out = PayloadMap::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), denormalize(value)?);
            }
            Ok(Payload::Map(out))
        }
        Payload::List(items) => Ok(Payload::List(
            items.iter().map(denormalize).collect::<FormatResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn blob_envelope_data(map: &PayloadMap) -> Option<&str> {
    if map.len() != 2 {
        return None;
    }
    if map.get(BLOB_TYPE_KEY)?.as_str()? != BLOB_TYPE_TAG {
        return None;
    }
    map.get(BLOB_DATA_KEY)?.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn sample_tree() -> Payload {
        payload_map! {
            "name" => "replay",
            "count" => 3,
            "ratio" => 0.5_f64,
            "enabled" => true,
            "missing" => Payload::Null,
            "blob" => vec![0u8, 1, 2, 254, 255],
            "nested" => payload_map! {
                "inner" => vec![Payload::Int(1), Payload::Bytes(vec![9, 9])],
            },
        }
    }

    #[test]
    fn normalize_wraps_blobs_in_envelopes() {
        let normalized = normalize(&Payload::Bytes(vec![1, 2, 3]));
        let map = normalized.as_map().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(BLOB_TYPE_KEY).unwrap().as_str(), Some("Buffer"));
        assert_eq!(map.get(BLOB_DATA_KEY).unwrap().as_str(), Some("AQID"));
    }

    #[test]
    fn normalized_trees_contain_no_bytes() {
        fn assert_no_bytes(payload: &Payload) {
            match payload {
                Payload::Bytes(..) => panic!("blob survived normalization"),
                Payload::List(items) => items.iter().for_each(assert_no_bytes),
                Payload::Map(map) => map.values().for_each(assert_no_bytes),
                _ => {}
            }
        }
        assert_no_bytes(&normalize(&sample_tree()));
    }

    #[test]
    fn denormalize_is_inverse_of_normalize() {
        let tree = sample_tree();
        assert_eq!(denormalize(&normalize(&tree)).unwrap(), tree);
    }

    #[test]
    fn random_blob_identity() {
        let mut bytes = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let tree = payload_map! { "img" => bytes.clone() };
        let back = denormalize(&normalize(&tree)).unwrap();
        assert_eq!(back.get("img").unwrap().as_bytes(), Some(bytes.as_slice()));
    }

    #[test]
    fn invalid_base64_in_envelope_fails() {
        let envelope = payload_map! {
            BLOB_TYPE_KEY => BLOB_TYPE_TAG,
            BLOB_DATA_KEY => "not base64!!!",
        };
        assert!(matches!(
            denormalize(&envelope),
            Err(FormatError::BlobEnvelope { .. })
        ));
    }

    #[test]
    fn near_envelope_maps_stay_maps() {
        // An extra key disqualifies the envelope shape.
        let map = payload_map! {
            BLOB_TYPE_KEY => BLOB_TYPE_TAG,
            BLOB_DATA_KEY => "AQID",
            "extra" => 1,
        };
        assert_eq!(denormalize(&map).unwrap(), map);
    }

    #[test]
    fn map_iteration_preserves_insertion_order() {
        let payload = payload_map! { "z" => 1, "a" => 2, "m" => 3 };
        let keys: Vec<&str> = payload.as_map().unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }
}
