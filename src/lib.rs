//! mailkeeper-core: the multi-tenant email digest pipeline — scheduling,
//! concurrency control, IMAP fetch, dedupe, classification, summarization,
//! and digest assembly for one user's run.

pub mod cache;
pub mod classify;
pub mod config;
pub mod dedupe;
pub mod digest;
pub mod errors;
pub mod forward;
pub mod gate;
pub mod imap;
pub mod logging;
pub mod mime;
pub mod pipeline;
pub mod provider;
pub mod rules;
pub mod scheduler;
pub mod store;
pub mod summarize;
pub mod types;
