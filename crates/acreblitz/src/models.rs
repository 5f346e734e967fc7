//! These models represent the objects passed around by the assistant
//!
//! There are several related formats we need to interact with:
//! - vercel useChat core messages, sent from the interface to the gateway
//! - vercel streaming protocol parts, sent from the gateway to the interface
//! - openai chat completion messages/tools, sent from the agent to the LLM
//! - tool results, returned by the systems providing capabilities
//!
//! Incoming messages already follow the core message shape, so the internal
//! message model mirrors it directly and is converted for the LLM on the way out.
pub mod message;
pub mod role;
pub mod stream;
pub mod tool;
