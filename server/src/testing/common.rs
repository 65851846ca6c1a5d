use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use google_gmail1::api::{Message, MessagePart, MessagePartBody, MessagePartHeader};
use sea_orm::{ConnectOptions, Database};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use uuid::Uuid;

use crate::{
    db_core::{prelude::*, schema::create_schema},
    email::{
        client::{MailConnector, MailSource, MessageIdPage, MessageQuery},
        fetched_message::FetchedMessage,
    },
    error::{AppError, AppResult},
    model::email::EmailCtrl,
    normalize::UNKNOWN,
    prompt::{
        application_extraction::ExtractionResult,
        chat_completions::{ExtractionEngine, ExtractionRequest},
    },
    util::now_fixed,
};

/// Fresh in-memory database with the schema applied. A single connection
/// keeps every query on the same in-memory database.
pub async fn setup_db() -> DatabaseConnection {
    let mut db_options = ConnectOptions::new("sqlite::memory:");
    db_options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let conn = Database::connect(db_options)
        .await
        .expect("In-memory database failed");
    create_schema(&conn).await.expect("Schema creation failed");
    conn
}

pub fn header(name: &str, value: &str) -> MessagePartHeader {
    MessagePartHeader {
        name: Some(name.to_string()),
        value: Some(value.to_string()),
    }
}

pub fn part(mime_type: &str, data: Option<&str>, parts: Vec<MessagePart>) -> MessagePart {
    MessagePart {
        mime_type: Some(mime_type.to_string()),
        body: data.map(|data| MessagePartBody {
            data: Some(data.as_bytes().to_vec()),
            size: Some(data.len() as i32),
            ..Default::default()
        }),
        parts: if parts.is_empty() { None } else { Some(parts) },
        ..Default::default()
    }
}

pub fn gmail_message(
    id: &str,
    message_id: Option<&str>,
    subject: &str,
    from: &str,
    body: &str,
) -> Message {
    let mut headers = vec![
        header("From", from),
        header("To", "me@example.com"),
        header("Subject", subject),
        header("Date", "Mon, 11 Aug 2025 09:15:00 -0700"),
    ];
    if let Some(message_id) = message_id {
        headers.push(header("Message-ID", message_id));
    }

    let mut payload = part("text/plain", Some(body), vec![]);
    payload.headers = Some(headers);

    Message {
        id: Some(id.to_string()),
        thread_id: Some(format!("thread-{}", id)),
        label_ids: Some(vec!["INBOX".to_string()]),
        internal_date: Some(1_754_928_900_000),
        payload: Some(payload),
        ..Default::default()
    }
}

pub fn fetched(gmail_id: &str, message_id: Option<&str>, subject: &str) -> FetchedMessage {
    FetchedMessage {
        gmail_id: gmail_id.to_string(),
        thread_id: format!("thread-{}", gmail_id),
        rfc822_message_id: message_id.map(str::to_string),
        from: "Careers <careers@example.com>".to_string(),
        to: "me@example.com".to_string(),
        subject: subject.to_string(),
        sent_at: Some(Utc.with_ymd_and_hms(2025, 8, 11, 16, 15, 0).unwrap()),
        body_text: "body".to_string(),
        internal_date_ms: 1_754_928_900_000,
        labels: vec!["INBOX".to_string()],
    }
}

/// An email row that has not been stored.
pub fn email_row(user_id: Uuid, subject: &str, body: &str, from: &str) -> email::Model {
    let id = Uuid::new_v4();
    email::Model {
        id,
        user_id,
        thread_id: format!("thread-{}", id),
        message_id_hash: crate::util::sha256_hex(&id.to_string()),
        gmail_id: id.to_string(),
        from_addr: from.to_string(),
        to_addr: "me@example.com".to_string(),
        subject: subject.to_string(),
        sent_at: Some(now_fixed()),
        body_text: body.to_string(),
        internal_date_ms: 1_754_928_900_000,
        raw_label: "INBOX".to_string(),
        created_at: now_fixed(),
    }
}

pub async fn insert_stored_email(
    conn: &DatabaseConnection,
    user_id: Uuid,
    subject: &str,
    body: &str,
) -> email::Model {
    let row = email_row(user_id, subject, body, "Careers <careers@example.com>");
    email::ActiveModel::from(row)
        .reset_all()
        .insert(conn)
        .await
        .unwrap()
}

pub async fn insert_email(
    conn: &DatabaseConnection,
    user_id: Uuid,
    gmail_id: &str,
) -> email::Model {
    EmailCtrl::new_row(user_id, &fetched(gmail_id, None, "Subject"))
        .insert(conn)
        .await
        .unwrap()
}

pub fn extraction(company: &str, role_title: &str, status: ApplicationStatus) -> ExtractionResult {
    ExtractionResult {
        is_application: true,
        company: company.to_string(),
        role_title: role_title.to_string(),
        location: UNKNOWN.to_string(),
        status,
        next_action: UNKNOWN.to_string(),
        notes: UNKNOWN.to_string(),
        normalized_company: None,
        normalized_role_title: None,
    }
}

pub fn application_row(
    user_id: Uuid,
    normalized_company: &str,
    normalized_role_title: &str,
) -> application::ActiveModel {
    let now = now_fixed();
    application::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        company: Set(normalized_company.to_string()),
        role_title: Set(normalized_role_title.to_string()),
        location: Set(UNKNOWN.to_string()),
        normalized_company: Set(normalized_company.to_string()),
        normalized_role_title: Set(normalized_role_title.to_string()),
        status: Set(ApplicationStatus::Applied),
        next_step: Set(UNKNOWN.to_string()),
        notes: Set(UNKNOWN.to_string()),
        source_email_id: Set(None),
        is_application: Set(true),
        first_seen_at: Set(now),
        last_updated_at: Set(now),
    }
}

pub async fn insert_application(
    conn: &DatabaseConnection,
    user_id: Uuid,
    normalized_company: &str,
    normalized_role_title: &str,
    source_email_id: Option<Uuid>,
) -> application::Model {
    let mut row = application_row(user_id, normalized_company, normalized_role_title);
    row.source_email_id = Set(source_email_id);
    row.insert(conn).await.unwrap()
}

/// In-memory mailbox. Page tokens are page indexes.
#[derive(Default)]
pub struct FakeMailSource {
    pages: Vec<Vec<String>>,
    messages: HashMap<String, Message>,
    failing: HashSet<String>,
    labels: HashMap<String, String>,
    unauthorized: bool,
    revoked_on_fetch: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeMailSource {
    pub fn with_page(mut self, ids: &[&str]) -> Self {
        self.pages.push(ids.iter().map(|id| (*id).to_owned()).collect());
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        let id = message.id.clone().unwrap_or_default();
        self.messages.insert(id, message);
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn with_label(mut self, id: &str, name: &str) -> Self {
        self.labels.insert(id.to_string(), name.to_string());
        self
    }

    pub fn unauthorized(mut self) -> Self {
        self.unauthorized = true;
        self
    }

    /// Listing and labels keep working but every message fetch is refused.
    pub fn revoked_on_fetch(mut self) -> Self {
        self.revoked_on_fetch = true;
        self
    }

    /// Search strings of every listing call so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    fn check_authorized(&self) -> AppResult<()> {
        if self.unauthorized {
            Err(AppError::Unauthorized("token revoked".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MailSource for FakeMailSource {
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage> {
        self.check_authorized()?;
        self.queries.lock().unwrap().push(query.search_string());

        let index = page_token
            .map(|token| token.parse::<usize>())
            .transpose()
            .map_err(|e| AppError::BadRequest(e.to_string()))?
            .unwrap_or(0);
        let ids = self.pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());

        Ok(MessageIdPage {
            ids,
            next_page_token,
        })
    }

    async fn get_full_message(&self, id: &str) -> AppResult<Message> {
        self.check_authorized()?;
        if self.revoked_on_fetch {
            return Err(AppError::Unauthorized("token revoked mid-run".to_string()));
        }
        if self.failing.contains(id) {
            return Err(AppError::Internal(anyhow!("connection reset fetching {}", id)));
        }
        self.messages
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("message {}", id)))
    }

    async fn list_labels(&self) -> AppResult<HashMap<String, String>> {
        self.check_authorized()?;
        Ok(self.labels.clone())
    }
}

/// Hands out one mailbox for every user, or refuses every user.
pub struct FakeConnector {
    source: Option<Arc<FakeMailSource>>,
}

impl FakeConnector {
    pub fn serving(source: Arc<FakeMailSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    pub fn refusing() -> Self {
        Self { source: None }
    }
}

#[async_trait]
impl MailConnector for FakeConnector {
    async fn connect(&self, user_id: Uuid) -> AppResult<Arc<dyn MailSource>> {
        match &self.source {
            Some(source) => Ok(source.clone()),
            None => Err(AppError::Unauthorized(format!(
                "No authorized Google credential for user {}",
                user_id
            ))),
        }
    }
}

enum Scripted {
    Reply(String),
    Fail,
}

/// Extraction engine answering by the first scripted fragment found in the
/// prompt. Unscripted prompts fail.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Vec<(String, Scripted)>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn reply(mut self, fragment: &str, content: &str) -> Self {
        self.script
            .push((fragment.to_string(), Scripted::Reply(content.to_string())));
        self
    }

    pub fn fail(mut self, fragment: &str) -> Self {
        self.script.push((fragment.to_string(), Scripted::Fail));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExtractionEngine for ScriptedEngine {
    async fn generate(&self, request: &ExtractionRequest) -> AppResult<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self
            .script
            .iter()
            .find(|(fragment, _)| request.user_content.contains(fragment.as_str()));

        match scripted {
            Some((_, Scripted::Reply(content))) => Ok(content.clone()),
            Some((_, Scripted::Fail)) => Err(AppError::Internal(anyhow!("engine unavailable"))),
            None => Err(AppError::Internal(anyhow!("no scripted reply"))),
        }
    }
}
