use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tiktoken_rs::CoreBPE;
use tokenizers::tokenizer::Tokenizer;

use crate::models::message::Message;

pub const DEFAULT_TOKEN_WARNING_THRESHOLD: usize = 10_000;
const MAX_LOGGED_ENTRIES: usize = 1000;
const CHARS_PER_TOKEN: usize = 4;

// Built once per process; None when the encoding could not be constructed
static CL100K: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();

fn cl100k() -> Option<Arc<CoreBPE>> {
    CL100K
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k encoding unavailable, estimating token counts");
                None
            }
        })
        .clone()
}

enum Backend {
    Bpe(Arc<CoreBPE>),
    Pretrained(Box<Tokenizer>),
    Estimate,
}

/// Counts tokens with the cl100k BPE by default.
///
/// A HuggingFace `tokenizer.json` can replace it. When neither is usable the
/// count is estimated at four characters per token.
pub struct TokenCounter {
    backend: Backend,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend = match self.backend {
            Backend::Bpe(_) => "cl100k",
            Backend::Pretrained(_) => "tokenizer.json",
            Backend::Estimate => "estimate",
        };
        f.debug_struct("TokenCounter").field("backend", &backend).finish()
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        match cl100k() {
            Some(bpe) => TokenCounter {
                backend: Backend::Bpe(bpe),
            },
            None => Self::estimating(),
        }
    }

    /// A counter that never tokenizes
    pub fn estimating() -> Self {
        TokenCounter {
            backend: Backend::Estimate,
        }
    }

    /// Load a `tokenizer.json` from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer {}: {}", path.display(), e))?;
        Ok(TokenCounter {
            backend: Backend::Pretrained(Box::new(tokenizer)),
        })
    }

    pub fn from_bytes<B: AsRef<[u8]>>(bytes: B) -> Result<Self> {
        let tokenizer =
            Tokenizer::from_bytes(bytes).map_err(|e| anyhow!("failed to parse tokenizer: {}", e))?;
        Ok(TokenCounter {
            backend: Backend::Pretrained(Box::new(tokenizer)),
        })
    }

    pub fn has_tokenizer(&self) -> bool {
        !matches!(self.backend, Backend::Estimate)
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        match &self.backend {
            Backend::Bpe(bpe) => bpe.encode_with_special_tokens(text).len(),
            Backend::Pretrained(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    tracing::debug!(error = %e, "tokenizer failed, estimating instead");
                    estimate_tokens(text)
                }
            },
            Backend::Estimate => estimate_tokens(text),
        }
    }

    /// Count the tokens of a value's JSON text; bare strings are counted as-is
    pub fn count_value(&self, value: &Value) -> usize {
        match value {
            Value::String(text) => self.count_tokens(text),
            other => self.count_tokens(&other.to_string()),
        }
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|message| match serde_json::to_string(message) {
                Ok(text) => self.count_tokens(&text),
                Err(_) => 0,
            })
            .sum()
    }
}

fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// One tool execution as seen by the token accountant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolTokenEntry {
    pub timestamp: DateTime<Utc>,
    pub tool_name: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Records how many tokens each tool call costs and warns on oversized outputs.
///
/// Only the most recent entries are kept.
#[derive(Debug)]
pub struct TokenAccountant {
    counter: TokenCounter,
    warn_threshold: usize,
    entries: Mutex<VecDeque<ToolTokenEntry>>,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new(TokenCounter::new())
    }
}

impl TokenAccountant {
    pub fn new(counter: TokenCounter) -> Self {
        TokenAccountant {
            counter,
            warn_threshold: DEFAULT_TOKEN_WARNING_THRESHOLD,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_warn_threshold(mut self, threshold: usize) -> Self {
        self.warn_threshold = threshold;
        self
    }

    pub fn warn_threshold(&self) -> usize {
        self.warn_threshold
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Measure a tool's input and model-facing output and record the result
    pub fn log_tool_tokens(&self, tool_name: &str, input: &Value, output: &Value) -> ToolTokenEntry {
        let input_tokens = self.counter.count_value(input);
        let output_tokens = self.counter.count_value(output);
        let entry = ToolTokenEntry {
            timestamp: Utc::now(),
            tool_name: tool_name.to_string(),
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        };

        tracing::info!(
            tool = %entry.tool_name,
            input_tokens,
            output_tokens,
            total_tokens = entry.total_tokens,
            "tool token usage"
        );
        if output_tokens > self.warn_threshold {
            tracing::warn!(
                tool = %entry.tool_name,
                output_tokens,
                threshold = self.warn_threshold,
                "tool output exceeds token threshold"
            );
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == MAX_LOGGED_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// Recorded entries, oldest first
    pub fn entries(&self) -> Vec<ToolTokenEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
