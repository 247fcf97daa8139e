//! IMAP Fetcher (§4.1): connect to one account, list and retrieve new
//! messages since a cutoff, parse MIME, extract body and attachments.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_imap::{Client, Session};
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerName};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::errors::FetchError;
use crate::forward::{self, MessageView};
use crate::mime::{self, attachments};
use crate::provider::{self, ProviderEntry};
use crate::types::{Attachment, Email, EmailAccount};

type ImapSession = Session<Compat<tokio_rustls::client::TlsStream<TcpStream>>>;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches candidate messages for one account newer than `since_days`, up to
/// `max_emails` (tail-taken, i.e. newest UIDs first when capped).
pub async fn fetch_account(
    account: &EmailAccount,
    since_days: u32,
    max_emails: Option<u32>,
    attachments_root: &Path,
) -> Result<Vec<Email>, FetchError> {
    let entry = provider::resolve(&account.provider_tag, &account.address)
        .ok_or_else(|| FetchError::UnknownProvider(account.provider_tag.clone()))?;

    let mut session = connect_and_login(account, &entry).await?;

    if account.provider_tag == "126" || account.provider_tag == "163" {
        send_id_command(&mut session, &account.address).await;
    }

    let result = fetch_inner(&mut session, account, &entry, since_days, max_emails, attachments_root).await;

    // Logout on every exit path (§4.1 step 7), regardless of fetch outcome.
    let _ = tokio::time::timeout(SOCKET_TIMEOUT, session.logout()).await;

    result
}

async fn connect_and_login(
    account: &EmailAccount,
    entry: &ProviderEntry,
) -> Result<ImapSession, FetchError> {
    let diag = || (account.address.clone(), entry.imap_host.to_string(), entry.imap_port);

    let mut root_store = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs().map_err(|e| {
        let (account, host, port) = diag();
        FetchError::Transport { account, host, port, source: anyhow::anyhow!(e) }
    })?;
    for cert in certs {
        root_store
            .add(&tokio_rustls::rustls::Certificate(cert.0))
            .ok();
    }

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let tcp = tokio::time::timeout(
        SOCKET_TIMEOUT,
        TcpStream::connect((entry.imap_host, entry.imap_port)),
    )
    .await
    .map_err(|_| {
        let (_, host, port) = diag();
        FetchError::Timeout { host, port }
    })?
    .map_err(|e| {
        let (account, host, port) = diag();
        FetchError::Transport { account, host, port, source: anyhow::anyhow!(e) }
    })?;

    let server_name = ServerName::try_from(entry.imap_host).map_err(|e| {
        let (account, host, port) = diag();
        FetchError::Protocol { account, source: anyhow::anyhow!(e).context(format!("{host}:{port}")) }
    })?;
    let tls_stream = connector.connect(server_name, tcp).await.map_err(|e| {
        let (account, host, port) = diag();
        FetchError::Transport { account, host, port, source: anyhow::anyhow!(e) }
    })?;

    let compat_stream = tls_stream.compat();
    let mut client = Client::new(compat_stream);
    client.read_response().await.ok();

    client
        .login(&account.address, &account.credential_secret)
        .await
        .map_err(|(_err, _client)| {
            let (account, host, port) = diag();
            FetchError::Auth { account, host, port }
        })
}

/// IMAP ID command per §4.1 step 3 (126/163 reject INBOX selection without
/// it). Best-effort: log a warning on non-OK and proceed regardless.
async fn send_id_command(session: &mut ImapSession, address: &str) {
    let command = format!(
        "ID (\"name\" \"mailkeeper\" \"version\" \"1.0\" \"vendor\" \"mailkeeper\" \"support-email\" \"{address}\")"
    );
    if let Err(err) = session.run_command_and_check_ok(&command).await {
        tracing::warn!(account = address, error = %err, "IMAP ID command did not return OK");
    }
}

async fn fetch_inner(
    session: &mut ImapSession,
    account: &EmailAccount,
    entry: &ProviderEntry,
    since_days: u32,
    max_emails: Option<u32>,
    attachments_root: &Path,
) -> Result<Vec<Email>, FetchError> {
    let protocol_err = |source: anyhow::Error| FetchError::Protocol {
        account: account.address.clone(),
        source,
    };
    let timeout_err = || FetchError::Timeout {
        host: entry.imap_host.to_string(),
        port: entry.imap_port,
    };

    tokio::time::timeout(SOCKET_TIMEOUT, session.select("INBOX"))
        .await
        .map_err(|_| timeout_err())?
        .map_err(|e| protocol_err(anyhow::anyhow!(e)))?;

    // Cutoff computed in UTC, not local time (§4.1 step 5).
    let since = Utc::now() - chrono::Duration::days(since_days as i64);
    let query = format!("SINCE {}", since.format("%d-%b-%Y"));

    let uid_set = tokio::time::timeout(SOCKET_TIMEOUT, session.uid_search(&query))
        .await
        .map_err(|_| timeout_err())?
        .map_err(|e| protocol_err(anyhow::anyhow!(e)))?;

    let mut uids: Vec<u32> = uid_set.into_iter().collect();
    uids.sort_unstable();

    if let Some(cap) = max_emails {
        let cap = cap as usize;
        if uids.len() > cap {
            uids = uids.split_off(uids.len() - cap);
        }
    }

    if uids.is_empty() {
        return Ok(Vec::new());
    }

    let uid_seq = uids
        .iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let stream = tokio::time::timeout(SOCKET_TIMEOUT, session.uid_fetch(&uid_seq, "RFC822"))
        .await
        .map_err(|_| timeout_err())?
        .map_err(|e| protocol_err(anyhow::anyhow!(e)))?;

    let messages: Vec<_> = stream
        .try_collect()
        .await
        .map_err(|e| protocol_err(anyhow::anyhow!(e)))?;

    let mut emails = Vec::with_capacity(uids.len());
    for msg in &messages {
        let Some(uid) = msg.uid else { continue };
        let Some(body) = msg.body() else { continue };

        match build_email(account, uid, body, attachments_root).await {
            Ok(email) => emails.push(email),
            Err(err) => {
                tracing::warn!(
                    account = account.address,
                    uid,
                    error = %err,
                    "failed to parse message, skipping"
                );
            }
        }
    }

    Ok(emails)
}

async fn build_email(
    account: &EmailAccount,
    uid: u32,
    raw: &[u8],
    attachments_root: &Path,
) -> anyhow::Result<Email> {
    let parsed = mime::parse(raw).context("parsing message")?;

    let date = parsed
        .date_raw
        .as_deref()
        .and_then(parse_imap_date)
        .unwrap_or_else(|| Utc::now().naive_utc());

    let view = MessageView {
        headers: &parsed.headers,
        subject: &parsed.subject,
        body: &parsed.body,
        body_html: parsed.body_html.as_deref(),
    };
    let detection = forward::detect(&view);

    let email_id = format!("{}:{}", account.address, uid);
    let mut saved_attachments = Vec::new();
    for candidate in &parsed.attachments {
        match persist_attachment(account.user_id, &email_id, candidate, attachments_root).await {
            Ok(Some(attachment)) => saved_attachments.push(attachment),
            Ok(None) => {}
            Err(err) => tracing::warn!(
                account = account.address,
                filename = candidate.original_filename,
                error = %err,
                "attachment rejected or failed to persist"
            ),
        }
    }

    let now = chrono::Utc::now().timestamp();

    Ok(Email {
        id: None,
        user_id: account.user_id,
        email_id,
        content_hash: None,
        subject: parsed.subject,
        sender: parsed.from,
        recipients: parsed.to,
        date,
        account_address: account.address.clone(),
        provider_tag: account.provider_tag.clone(),
        body: parsed.body,
        body_html: parsed.body_html,
        body_chinese_translation: None,
        body_english_translation: None,
        summary: None,
        ai_summary: None,
        category: "general".to_string(),
        importance: 1,
        classification_method: None,
        processed: false,
        deleted: false,
        is_forwarded: detection.is_forwarded,
        forward_level: detection.forward_level,
        original_sender: detection.original_sender,
        original_sender_email: detection.original_sender_email,
        forwarded_by: None,
        forwarded_by_email: None,
        forward_chain: detection.forward_chain,
        attachments: saved_attachments,
        created_at: now,
        updated_at: now,
    })
}

async fn persist_attachment(
    user_id: i64,
    email_id: &str,
    candidate: &mime::ParsedAttachment,
    attachments_root: &Path,
) -> anyhow::Result<Option<Attachment>> {
    let ext = match attachments::validate(&candidate.original_filename, candidate.bytes.len() as u64) {
        Ok(ext) => ext,
        Err(rejection) => {
            tracing::debug!(filename = candidate.original_filename, ?rejection, "attachment rejected");
            return Ok(None);
        }
    };

    let stored_filename = attachments::stored_filename(email_id, &ext);
    let relative_path = attachments::stored_path(user_id, &stored_filename);
    let full_path = attachments_root.join(&relative_path);
    if let Some(parent) = full_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&full_path, &candidate.bytes).await?;

    Ok(Some(Attachment {
        original_filename: candidate.original_filename.clone(),
        stored_filename,
        content_type: candidate.content_type.clone(),
        size: candidate.bytes.len() as u64,
        stored_path: relative_path,
    }))
}

/// Parses an RFC 2822 `Date` header into a UTC naive instant (§3 invariant:
/// zone-offset dates are converted before insertion).
fn parse_imap_date(raw: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}
