//! Polymorphic key resolution.
//!
//! A key of unknown stored representation is read through a fixed, ordered
//! list of probes. The first probe that yields a non-empty result wins and its
//! output is normalized into a JSON array or object.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::store::{KeyStore, StoreError, StoreResult};

/// The representation a probe assumes when reading a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Document,
    String,
    Sequence,
    Set,
    Mapping,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::String => "string",
            Self::Sequence => "sequence",
            Self::Set => "set",
            Self::Mapping => "mapping",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probes in the order they are attempted.
pub const PROBE_ORDER: [Strategy; 5] = [
    Strategy::Document,
    Strategy::String,
    Strategy::Sequence,
    Strategy::Set,
    Strategy::Mapping,
];

/// Uniform output shape, serialized as the bare JSON value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    /// Decoded JSON passed through unchanged (document probe, or a string holding JSON)
    Decoded(Value),
    /// Ordered elements, each decoded JSON or the raw string
    Sequence(Vec<Value>),
    /// Hash fields, values left undecoded
    Mapping(BTreeMap<String, String>),
}

impl NormalizedValue {
    pub fn empty() -> Self {
        Self::Sequence(Vec::new())
    }

    /// Number of items reported to callers.
    ///
    /// Arrays and sequences count elements, objects and mappings count fields,
    /// `null` counts as nothing and any other scalar as a single item.
    pub fn count(&self) -> usize {
        match self {
            Self::Sequence(items) => items.len(),
            Self::Mapping(fields) => fields.len(),
            Self::Decoded(Value::Array(items)) => items.len(),
            Self::Decoded(Value::Object(fields)) => fields.len(),
            Self::Decoded(Value::Null) => 0,
            Self::Decoded(_) => 1,
        }
    }

    /// Convert into a plain JSON value
    pub fn into_json(self) -> Value {
        match self {
            Self::Decoded(value) => value,
            Self::Sequence(items) => Value::Array(items),
            Self::Mapping(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(field, value)| (field, Value::String(value)))
                    .collect(),
            ),
        }
    }
}

/// Outcome of a resolution: the value plus the probe that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub value: NormalizedValue,
    /// `None` when every probe came back empty
    pub strategy: Option<Strategy>,
}

impl Resolution {
    fn exhausted() -> Self {
        Self {
            value: NormalizedValue::empty(),
            strategy: None,
        }
    }

    pub fn count(&self) -> usize {
        self.value.count()
    }
}

/// Errors that escape resolution.
///
/// Store failures never appear here; they only cause the next probe to run.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The document probe returned a blob that is not valid JSON
    #[error("document stored at '{key}' is not valid JSON: {source}")]
    DocumentDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode an element as JSON, falling back to the raw string.
pub fn decode_or_raw(raw: String) -> Value {
    serde_json::from_str(&raw).unwrap_or(Value::String(raw))
}

fn decode_elements(items: Vec<String>) -> Vec<Value> {
    items.into_iter().map(decode_or_raw).collect()
}

/// Resolve `key` against `store`, trying each probe in [`PROBE_ORDER`].
///
/// Never mutates the store. An absent key resolves to an empty sequence.
#[instrument(skip(store), fields(backend = store.backend_name()))]
pub async fn resolve<S: KeyStore>(store: &S, key: &str) -> Result<Resolution, ResolveError> {
    for strategy in PROBE_ORDER {
        if let Some(value) = probe(store, strategy, key).await? {
            debug!(%strategy, count = value.count(), "Key resolved");
            return Ok(Resolution {
                value,
                strategy: Some(strategy),
            });
        }
    }

    debug!("No probe matched, returning empty sequence");
    Ok(Resolution::exhausted())
}

async fn probe<S: KeyStore>(
    store: &S,
    strategy: Strategy,
    key: &str,
) -> Result<Option<NormalizedValue>, ResolveError> {
    let found = match strategy {
        Strategy::Document => {
            let Some(blob) = tolerate(strategy, store.get_document(key).await).flatten() else {
                return Ok(None);
            };
            // Decode failures here are not swallowed, unlike the other probes.
            let value = serde_json::from_str(&blob).map_err(|source| {
                ResolveError::DocumentDecode {
                    key: key.to_string(),
                    source,
                }
            })?;
            Some(NormalizedValue::Decoded(value))
        }
        Strategy::String => tolerate(strategy, store.get_string(key).await)
            .flatten()
            .filter(|raw| !raw.is_empty())
            .map(|raw| match serde_json::from_str(&raw) {
                Ok(value) => NormalizedValue::Decoded(value),
                Err(_) => NormalizedValue::Sequence(vec![Value::String(raw)]),
            }),
        Strategy::Sequence => tolerate(strategy, store.get_sequence(key).await)
            .filter(|items| !items.is_empty())
            .map(|items| NormalizedValue::Sequence(decode_elements(items))),
        Strategy::Set => tolerate(strategy, store.get_set(key).await)
            .filter(|members| !members.is_empty())
            .map(|members| NormalizedValue::Sequence(decode_elements(members))),
        Strategy::Mapping => tolerate(strategy, store.get_mapping(key).await)
            .filter(|fields| !fields.is_empty())
            .map(NormalizedValue::Mapping),
    };

    Ok(found)
}

/// Turn a store failure into a skip for this probe.
fn tolerate<T>(strategy: Strategy, result: StoreResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(StoreError::Unsupported(command)) => {
            debug!(%strategy, %command, "Probe skipped, capability not supported");
            None
        }
        Err(e) => {
            warn!(%strategy, kind = e.kind(), error = %e, "Probe failed, trying next");
            None
        }
    }
}
