//! IMAP implementation of the provider adapter.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_native_tls::native_tls::TlsConnector;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};
use crate::models::account::EmailAccount;
use crate::provider::{Batch, DraftRef, MailProvider, MailSession, MessageRef};

type TlsSession =
    async_imap::Session<tokio_util::compat::Compat<tokio_native_tls::TlsStream<TcpStream>>>;

/// Trailing UID window re-scanned on every poll. IMAP gives no strict
/// arrival-order guarantee around the watermark; the dedup ledger absorbs
/// the overlap.
const UID_OVERLAP: u32 = 20;

/// Upper bound on messages pulled per cycle.
const MAX_BATCH: usize = 50;

pub struct ImapProvider;

#[async_trait]
impl MailProvider for ImapProvider {
    async fn connect(&self, account: &EmailAccount) -> EngineResult<Box<dyn MailSession>> {
        let server = account
            .imap_server
            .as_deref()
            .ok_or_else(|| EngineError::Auth(format!("account {} has no imap server", account.email)))?;
        let port = account.imap_port.unwrap_or(993) as u16;
        let login = account
            .imap_login
            .clone()
            .unwrap_or_else(|| account.email.clone());
        let password = account
            .imap_password()
            .map_err(|e| EngineError::Auth(e.to_string()))?;

        let session = login_tls(server, port, &login, &password).await?;
        Ok(Box::new(ImapSessionAdapter {
            session,
            login,
            drafts_folder: None,
            folder_names: None,
        }))
    }
}

/// Validate credentials with a live login, used by the onboarding route
/// before an account row is created.
pub async fn check_imap_access(
    server: &str,
    port: u16,
    login: &str,
    password: &str,
) -> EngineResult<()> {
    let mut session = login_tls(server, port, login, password).await?;
    let _ = session.logout().await;
    Ok(())
}

async fn login_tls(server: &str, port: u16, login: &str, password: &str) -> EngineResult<TlsSession> {
    let tcp = TcpStream::connect((server, port))
        .await
        .map_err(|e| EngineError::Provider(format!("tcp connect {server}:{port}: {e}")))?;
    let tls = TlsConnector::builder()
        .build()
        .map_err(|e| EngineError::Provider(format!("tls setup: {e}")))?;
    let tls = tokio_native_tls::TlsConnector::from(tls);
    let tls_stream = tls
        .connect(server, tcp)
        .await
        .map_err(|e| EngineError::Provider(format!("tls handshake: {e}")))?;
    let client = async_imap::Client::new(tls_stream.compat());
    client
        .login(login, password)
        .await
        .map_err(|(e, _)| EngineError::Auth(format!("imap login failed: {e:?}")))
}

pub struct ImapSessionAdapter {
    session: TlsSession,
    login: String,
    drafts_folder: Option<String>,
    folder_names: Option<Vec<String>>,
}

#[async_trait]
impl MailSession for ImapSessionAdapter {
    async fn list_new_messages(&mut self, since: Option<&str>) -> EngineResult<Batch> {
        self.session
            .select("INBOX")
            .await
            .map_err(|e| EngineError::Provider(format!("select INBOX: {e}")))?;

        let watermark: Option<u32> = since.and_then(|s| s.parse().ok());
        let query = match watermark {
            Some(w) => format!("UID {}:*", w.saturating_sub(UID_OVERLAP).saturating_add(1)),
            None => {
                // First sync: only look one day back, like a fresh onboarding.
                let cutoff = (chrono::Utc::now() - chrono::Duration::days(1)).format("%d-%b-%Y");
                format!("SINCE {}", cutoff)
            }
        };

        let uids = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| EngineError::Provider(format!("uid search: {e}")))?;

        let mut uid_vec: Vec<u32> = uids.into_iter().collect();
        uid_vec.sort_unstable();
        if uid_vec.len() > MAX_BATCH {
            uid_vec = uid_vec.split_off(uid_vec.len() - MAX_BATCH);
        }

        let mut messages = Vec::new();
        let mut max_uid = watermark.unwrap_or(0);

        for chunk in uid_vec.chunks(MAX_BATCH) {
            let uid_set = chunk
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(",");

            let fetches = self
                .session
                .uid_fetch(&uid_set, "(UID ENVELOPE)")
                .await
                .map_err(|e| EngineError::Provider(format!("uid fetch: {e}")))?;

            let mut stream = fetches;
            while let Some(item) = stream.next().await {
                let fetch = match item {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("fetch item error: {e}");
                        continue;
                    }
                };
                let uid = match fetch.uid {
                    Some(u) => u,
                    None => continue,
                };
                max_uid = max_uid.max(uid);
                if let Some(msg) = message_ref_from_envelope(&fetch, uid) {
                    messages.push(msg);
                }
            }
        }

        debug!(count = messages.len(), "imap listing complete");
        Ok(Batch {
            messages,
            next_watermark: if max_uid > 0 {
                Some(max_uid.to_string())
            } else {
                since.map(|s| s.to_string())
            },
        })
    }

    async fn fetch_body(&mut self, msg: &MessageRef) -> EngineResult<String> {
        self.session
            .select("INBOX")
            .await
            .map_err(|e| EngineError::Provider(format!("select INBOX: {e}")))?;

        let fetches = self
            .session
            .uid_fetch(&msg.provider_ref, "(UID BODY.PEEK[])")
            .await
            .map_err(|e| EngineError::Provider(format!("body fetch: {e}")))?;

        let mut raw: Option<Vec<u8>> = None;
        {
            let mut stream = fetches;
            while let Some(item) = stream.next().await {
                if let Ok(fetch) = item {
                    if let Some(body) = fetch.body() {
                        raw = Some(body.to_vec());
                    }
                }
            }
        }

        let raw = raw.ok_or_else(|| {
            EngineError::Provider(format!("message {} no longer on server", msg.smtp_msg_id))
        })?;
        Ok(plain_text_body(&raw))
    }

    async fn prepare_draft_ref(&mut self, msg: &MessageRef) -> EngineResult<DraftRef> {
        let folder = self.drafts_folder().await?;
        let domain = self.login.split('@').nth(1).unwrap_or("inboxpilot.local");
        Ok(DraftRef {
            draft_id: None,
            message_id: Some(format!("<{}@{}>", uuid::Uuid::new_v4(), domain)),
            folder: Some(folder),
            conversation_id: msg.conversation_id.clone(),
        })
    }

    async fn create_draft(
        &mut self,
        msg: &MessageRef,
        body: &str,
        prepared: &DraftRef,
    ) -> EngineResult<DraftRef> {
        let folder = match prepared.folder.clone() {
            Some(f) => f,
            None => self.drafts_folder().await?,
        };
        let message_id = prepared
            .message_id
            .clone()
            .ok_or_else(|| EngineError::Draft("prepared draft ref has no message id".into()))?;

        let mime = build_reply_mime(&self.login, msg, body, &message_id);
        self.session
            .append(&folder, mime.as_bytes())
            .await
            .map_err(|e| EngineError::Provider(format!("append draft: {e}")))?;

        Ok(DraftRef {
            draft_id: None,
            message_id: Some(message_id),
            folder: Some(folder),
            conversation_id: msg.conversation_id.clone(),
        })
    }

    async fn delete_draft(&mut self, draft: &DraftRef) -> EngineResult<()> {
        let message_id = match draft.message_id.as_deref() {
            Some(id) => id.to_string(),
            // Nothing was appended under a known id; nothing to undo.
            None => return Ok(()),
        };
        let folder = match draft.folder.clone() {
            Some(f) => f,
            None => self.drafts_folder().await?,
        };

        if self.session.select(&folder).await.is_err() {
            // Folder gone entirely; treat as already undone.
            return Ok(());
        }

        let query = format!("HEADER Message-ID \"{}\"", message_id.trim_matches(['<', '>']));
        let uids = self
            .session
            .uid_search(&query)
            .await
            .map_err(|e| EngineError::Provider(format!("draft search: {e}")))?;
        if uids.is_empty() {
            // Already deleted; tolerated, not fatal.
            return Ok(());
        }

        let uid_set = uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        self.session
            .uid_store(&uid_set, "+FLAGS (\\Deleted)")
            .await
            .map_err(|e| EngineError::Provider(format!("draft flag: {e}")))?;
        self.session
            .expunge()
            .await
            .map_err(|e| EngineError::Provider(format!("expunge: {e}")))?;
        Ok(())
    }

    async fn has_existing_reply(&mut self, msg: &MessageRef) -> EngineResult<bool> {
        let target = msg.smtp_msg_id.trim_matches(['<', '>']).to_string();
        let mut candidates = vec![self.drafts_folder().await?];
        candidates.extend(detect_sent_candidates(self.folder_names().await?.as_slice()));

        for folder in candidates {
            if self.session.select(&folder).await.is_err() {
                continue;
            }
            for header in ["In-Reply-To", "References"] {
                let query = format!("HEADER {} \"{}\"", header, target);
                match self.session.uid_search(&query).await {
                    Ok(uids) if !uids.is_empty() => return Ok(true),
                    Ok(_) => {}
                    Err(e) => warn!(folder = %folder, "reply search failed: {e}"),
                }
            }
        }
        Ok(false)
    }

    async fn close(&mut self) {
        let _ = self.session.logout().await;
    }
}

impl ImapSessionAdapter {
    async fn folder_names(&mut self) -> EngineResult<Vec<String>> {
        if let Some(names) = &self.folder_names {
            return Ok(names.clone());
        }
        let mut names = Vec::new();
        {
            let list = self
                .session
                .list(None, Some("*"))
                .await
                .map_err(|e| EngineError::Provider(format!("folder list: {e}")))?;
            let mut stream = list;
            while let Some(item) = stream.next().await {
                if let Ok(name) = item {
                    names.push(name.name().to_string());
                }
            }
        }
        self.folder_names = Some(names.clone());
        Ok(names)
    }

    async fn drafts_folder(&mut self) -> EngineResult<String> {
        if let Some(folder) = &self.drafts_folder {
            return Ok(folder.clone());
        }
        let names = self.folder_names().await?;
        let folder = names
            .iter()
            .find(|n| n.to_lowercase().contains("draft"))
            .cloned()
            .unwrap_or_else(|| "Drafts".to_string());
        self.drafts_folder = Some(folder.clone());
        Ok(folder)
    }
}

fn message_ref_from_envelope(fetch: &async_imap::types::Fetch, uid: u32) -> Option<MessageRef> {
    let envelope = fetch.envelope()?;

    let smtp_msg_id = envelope
        .message_id
        .as_ref()
        .and_then(|id| std::str::from_utf8(id).ok())
        .map(|s| s.trim().to_string())?;

    let sender = envelope.from.as_ref().and_then(|addrs| {
        addrs.first().and_then(|addr| {
            let mailbox = std::str::from_utf8(addr.mailbox.as_ref()?).ok()?;
            let host = std::str::from_utf8(addr.host.as_ref()?).ok()?;
            Some(format!("{}@{}", mailbox, host))
        })
    })?;

    let subject = envelope
        .subject
        .as_ref()
        .map(|s| decode_subject(s))
        .unwrap_or_default();

    Some(MessageRef {
        smtp_msg_id,
        provider_ref: uid.to_string(),
        sender,
        subject,
        conversation_id: None,
    })
}

/// Envelope subjects arrive as raw header bytes, RFC 2047 encoded-words
/// included. Run them through the header parser so "=?UTF-8?...?=" runs
/// come out as readable text.
fn decode_subject(raw: &[u8]) -> String {
    let mut header = Vec::with_capacity(raw.len() + 13);
    header.extend_from_slice(b"Subject: ");
    header.extend_from_slice(raw);
    header.extend_from_slice(b"\r\n\r\n");
    mail_parser::MessageParser::default()
        .parse(&header)
        .and_then(|m| m.subject().map(|s| s.to_string()))
        .unwrap_or_else(|| String::from_utf8_lossy(raw).trim().to_string())
}

/// Extract a plain-text body from raw RFC822 bytes. HTML-only messages
/// fall back to the html part with tags stripped by mail-parser.
fn plain_text_body(raw: &[u8]) -> String {
    match mail_parser::MessageParser::default().parse(raw) {
        Some(message) => message
            .body_text(0)
            .map(|t| t.to_string())
            .or_else(|| message.body_html(0).map(|t| t.to_string()))
            .unwrap_or_default(),
        None => String::from_utf8_lossy(raw).to_string(),
    }
}

fn build_reply_mime(login: &str, msg: &MessageRef, body: &str, message_id: &str) -> String {
    let subject = if msg.subject.to_lowercase().starts_with("re:") {
        msg.subject.clone()
    } else {
        format!("Re: {}", msg.subject)
    };
    format!(
        "Message-ID: {message_id}\r\n\
         In-Reply-To: {orig}\r\n\
         References: {orig}\r\n\
         From: {login}\r\n\
         To: {to}\r\n\
         Subject: {subject}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n",
        orig = msg.smtp_msg_id,
        to = msg.sender,
    )
}

fn detect_sent_candidates(names: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for n in names {
        let l = n.to_lowercase();
        if l.contains("[gmail]/sent mail")
            || l.ends_with("/sent")
            || l == "sent"
            || l.contains("sent items")
            || l.contains("sent messages")
        {
            out.push(n.clone());
        }
    }
    if out.is_empty() {
        out.push("Sent".into());
        out.push("Sent Items".into());
        out.push("[Gmail]/Sent Mail".into());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_mime_threads_on_original_message_id() {
        let msg = MessageRef {
            smtp_msg_id: "<abc@example.com>".into(),
            provider_ref: "42".into(),
            sender: "alice@example.com".into(),
            subject: "Quarterly numbers".into(),
            conversation_id: None,
        };
        let mime = build_reply_mime("me@corp.com", &msg, "Thanks, on it.", "<d1@corp.com>");
        assert!(mime.contains("In-Reply-To: <abc@example.com>"));
        assert!(mime.contains("Subject: Re: Quarterly numbers"));
        assert!(mime.contains("To: alice@example.com"));
        assert!(mime.ends_with("Thanks, on it.\r\n"));
    }

    #[test]
    fn reply_mime_does_not_stack_re_prefixes() {
        let msg = MessageRef {
            smtp_msg_id: "<abc@example.com>".into(),
            provider_ref: "42".into(),
            sender: "alice@example.com".into(),
            subject: "RE: Quarterly numbers".into(),
            conversation_id: None,
        };
        let mime = build_reply_mime("me@corp.com", &msg, "ok", "<d2@corp.com>");
        assert!(mime.contains("Subject: RE: Quarterly numbers"));
        assert!(!mime.contains("Re: RE:"));
    }

    #[test]
    fn sent_candidates_thin_out_folder_list() {
        let names = vec![
            "INBOX".to_string(),
            "[Gmail]/Sent Mail".to_string(),
            "Work/Projects".to_string(),
        ];
        assert_eq!(detect_sent_candidates(&names), vec!["[Gmail]/Sent Mail"]);
        assert!(!detect_sent_candidates(&["INBOX".to_string()]).is_empty());
    }

    #[test]
    fn encoded_word_subjects_are_decoded() {
        assert_eq!(
            decode_subject(b"=?UTF-8?B?SGVsbG8gd29ybGQ=?="),
            "Hello world"
        );
        assert_eq!(decode_subject(b"=?utf-8?q?caf=C3=A9_menu?="), "caf\u{e9} menu");
        assert_eq!(decode_subject(b"Plain subject"), "Plain subject");
    }

    #[test]
    fn plain_text_body_prefers_text_part() {
        let raw = b"From: a@b.c\r\nSubject: hi\r\nContent-Type: text/plain\r\n\r\nhello world\r\n";
        assert_eq!(plain_text_body(raw).trim(), "hello world");
    }
}
