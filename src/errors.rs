use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Errors surfaced by the IMAP Fetcher (§4.1). Each variant carries a
/// provider-aware diagnostic string so logs can tell accounts apart.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("unknown provider tag: {0}")]
    UnknownProvider(String),
    #[error("auth failure for {account} ({host}:{port})")]
    Auth {
        account: String,
        host: String,
        port: u16,
    },
    #[error("imap transport error for {account} ({host}:{port}): {source}")]
    Transport {
        account: String,
        host: String,
        port: u16,
        #[source]
        source: anyhow::Error,
    },
    #[error("imap protocol error for {account}: {0}")]
    Protocol {
        account: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("socket timeout talking to {host}:{port}")]
    Timeout { host: String, port: u16 },
}

/// MIME / header decode failures, always caught per-message (§4.1, §7).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("mime parse failure: {0}")]
    Mime(String),
    #[error("header decode failure: {0}")]
    Header(String),
}

/// Wraps a Store failure encountered while the Dedupe Engine loads its
/// historical/windowed sets; always caught and treated as fail-open (§4.4).
#[derive(Error, Debug)]
#[error("dedupe query failed: {0}")]
pub struct DedupeError(#[from] pub anyhow::Error);

/// A single rule's evaluation blew up; caught per-rule so the rest of the
/// user's rule set still gets a chance (§4.3.2).
#[derive(Error, Debug)]
#[error("rule evaluation failed: {0}")]
pub struct ClassifyError(pub String);

/// The Summarizer capability's error type (§6). Always caught at the call
/// site and replaced with the deterministic fallback template.
#[derive(Error, Debug)]
pub enum SummarizeError {
    #[error("summarizer transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("summarizer returned an unexpected response: {0}")]
    Protocol(String),
}

/// Errors the sqlx-backed Store adapter surfaces (§4.6).
#[derive(Error, Debug)]
#[error("store error: {0}")]
pub struct StoreError(#[from] pub sqlx::Error);

/// Top-level error a full pipeline run can fail with; caught by the
/// Concurrency Gate and turned into an `error`-typed notification (§4.7).
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to load configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// General-purpose application error retained from the original CLI scaffold
/// for paths outside the pipeline proper (config loading, admin commands).
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Auth expired for account")]
    AuthExpired,
    #[error("Config error: {0}")]
    Config(String),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}
