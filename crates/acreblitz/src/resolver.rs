//! Rewrites payload references in outgoing chunks back into full payloads.
//!
//! Any JSON object carrying a string `uiDataRef` whose id is still in the
//! [`ReferenceCache`] has that key replaced by `uiData` holding the cached
//! payload, and the entry is consumed. References that miss (expired or already
//! consumed) stay as they are. The walk also descends into a payload it has just
//! substituted, so references nested inside cached payloads resolve in the same
//! pass.
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cache::ReferenceCache;

pub const REFERENCE_KEY: &str = "uiDataRef";
pub const PAYLOAD_KEY: &str = "uiData";

/// Replace every resolvable reference in `value`, consuming the cache entries used
pub fn resolve_references(value: Value, cache: &ReferenceCache) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| resolve_references(item, cache))
                .collect(),
        ),
        Value::Object(fields) => Value::Object(resolve_object(fields, cache)),
        scalar => scalar,
    }
}

fn resolve_object(mut fields: Map<String, Value>, cache: &ReferenceCache) -> Map<String, Value> {
    let reference = fields
        .get(REFERENCE_KEY)
        .and_then(Value::as_str)
        .map(str::to_owned);

    if let Some(reference) = reference {
        match cache.take(&reference) {
            Some(payload) => {
                tracing::debug!(reference = %reference, "resolved payload reference");
                fields.remove(REFERENCE_KEY);
                fields.insert(PAYLOAD_KEY.to_string(), payload);
            }
            None => {
                tracing::warn!(reference = %reference, "payload reference expired or already consumed");
            }
        }
    }

    fields
        .into_iter()
        .map(|(key, value)| (key, resolve_references(value, cache)))
        .collect()
}

/// Stream adapter resolving references chunk by chunk
#[derive(Debug, Clone)]
pub struct ReferenceResolver {
    cache: Arc<ReferenceCache>,
}

impl ReferenceResolver {
    pub fn new(cache: Arc<ReferenceCache>) -> Self {
        Self { cache }
    }

    pub fn resolve(&self, chunk: Value) -> Value {
        resolve_references(chunk, &self.cache)
    }

    /// Resolve each chunk of `stream` in order before passing it on.
    ///
    /// One chunk is fully resolved before the next is polled. An upstream error is
    /// forwarded and ends the stream. Dropping the returned stream drops `stream`.
    pub fn resolve_stream<'a, S, E>(&self, stream: S) -> BoxStream<'a, Result<Value, E>>
    where
        S: Stream<Item = Result<Value, E>> + Send + 'a,
        E: Send + 'a,
    {
        let cache = Arc::clone(&self.cache);
        Box::pin(async_stream::stream! {
            futures::pin_mut!(stream);
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(value) => yield Ok(resolve_references(value, &cache)),
                    Err(err) => {
                        yield Err(err);
                        break;
                    }
                }
            }
        })
    }
}
