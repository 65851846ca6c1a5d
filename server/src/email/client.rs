extern crate google_gmail1 as gmail1;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use gmail1::api::{ListLabelsResponse, ListMessagesResponse, Message};
use leaky_bucket::RateLimiter;
use reqwest::StatusCode;
use std::{collections::HashMap, env, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    server_config::AccountConfig,
    HttpClient,
};

/// Gmail quota units per call, see the Gmail API usage limits.
struct ApiQuota {
    messages_list: usize,
    messages_get: usize,
    labels_list: usize,
}

const GMAIL_API_QUOTA: ApiQuota = ApiQuota {
    messages_list: 5,
    messages_get: 5,
    labels_list: 1,
};

pub const DEFAULT_TOKEN_ENV: &str = "GMAIL_ACCESS_TOKEN";

macro_rules! gmail_url {
    ($($params:expr),*) => {
        {
            const GMAIL_ENDPOINT: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
            let list_params = vec![$($params),*];
            let path = list_params.join("/");
            format!("{}/{}", GMAIL_ENDPOINT, path)
        }
    };
}

/// Listing filter for one ingestion run.
#[derive(Debug, Clone)]
pub struct MessageQuery {
    pub after: NaiveDate,
    pub label_ids: Vec<String>,
    pub include_spam_trash: bool,
    pub page_size: u32,
}

impl MessageQuery {
    pub fn inbox_since(after: NaiveDate, page_size: u32) -> Self {
        Self {
            after,
            label_ids: vec!["INBOX".to_string()],
            include_spam_trash: false,
            page_size,
        }
    }

    pub fn search_string(&self) -> String {
        format!("after:{} -in:chats", self.after.format("%Y/%m/%d"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageIdPage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Read access to one user's mailbox.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage>;

    async fn get_full_message(&self, id: &str) -> AppResult<Message>;

    /// Label id to display name.
    async fn list_labels(&self) -> AppResult<HashMap<String, String>>;
}

/// Resolves an authorized mailbox for a user. Failing to do so is fatal for a
/// run and is reported as [`AppError::Unauthorized`].
#[async_trait]
pub trait MailConnector: Send + Sync {
    async fn connect(&self, user_id: Uuid) -> AppResult<Arc<dyn MailSource>>;
}

#[derive(Clone)]
pub struct GmailClient {
    http_client: HttpClient,
    access_token: String,
    rate_limiter: Arc<RateLimiter>,
}

impl GmailClient {
    pub fn new(http_client: HttpClient, access_token: String, quota_per_second: usize) -> Self {
        let quota_per_second = quota_per_second.max(GMAIL_API_QUOTA.messages_get);
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(quota_per_second)
                .max(quota_per_second)
                .interval(Duration::from_secs(1))
                .refill(quota_per_second)
                .build(),
        );

        GmailClient {
            http_client,
            access_token,
            rate_limiter,
        }
    }

    async fn check_response(
        resp: reqwest::Response,
        action: &str,
    ) -> AppResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(AppError::Unauthorized(format!(
                "Gmail rejected credentials while {}: {}",
                action, body
            ))),
            StatusCode::TOO_MANY_REQUESTS => Err(AppError::TooManyRequests),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!("{}: {}", action, body))),
            _ => Err(anyhow!("Gmail error while {} ({}): {}", action, status, body).into()),
        }
    }
}

#[async_trait]
impl MailSource for GmailClient {
    async fn list_message_ids(
        &self,
        query: &MessageQuery,
        page_token: Option<&str>,
    ) -> AppResult<MessageIdPage> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_list)
            .await;

        let mut params = vec![
            ("q".to_string(), query.search_string()),
            ("maxResults".to_string(), query.page_size.to_string()),
            (
                "includeSpamTrash".to_string(),
                query.include_spam_trash.to_string(),
            ),
        ];
        for label in &query.label_ids {
            params.push(("labelIds".to_string(), label.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken".to_string(), token.to_string()));
        }

        let resp = self
            .http_client
            .get(gmail_url!("messages"))
            .query(&params)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data = Self::check_response(resp, "listing messages")
            .await?
            .json::<ListMessagesResponse>()
            .await
            .context("Error parsing message list")?;

        let ids = data
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        Ok(MessageIdPage {
            ids,
            next_page_token: data.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_full_message(&self, id: &str) -> AppResult<Message> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;

        let resp = self
            .http_client
            .get(gmail_url!("messages", id))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let message = Self::check_response(resp, "getting message")
            .await?
            .json::<Message>()
            .await
            .with_context(|| format!("Error parsing message {}", id))?;

        Ok(message)
    }

    async fn list_labels(&self) -> AppResult<HashMap<String, String>> {
        self.rate_limiter.acquire(GMAIL_API_QUOTA.labels_list).await;

        let resp = self
            .http_client
            .get(gmail_url!("labels"))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let data = Self::check_response(resp, "listing labels")
            .await?
            .json::<ListLabelsResponse>()
            .await
            .context("Error parsing label list")?;

        Ok(data
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some((id, name)),
                _ => None,
            })
            .collect())
    }
}

/// Builds Gmail clients from access tokens held in environment variables,
/// one variable per configured account.
#[derive(Clone)]
pub struct GmailConnector {
    http_client: HttpClient,
    quota_per_second: usize,
    token_envs: HashMap<Uuid, String>,
}

impl GmailConnector {
    pub fn new(
        http_client: HttpClient,
        quota_per_second: usize,
        accounts: &[AccountConfig],
    ) -> Self {
        let token_envs = accounts
            .iter()
            .map(|a| (a.user_id, a.token_env.clone()))
            .collect();
        Self {
            http_client,
            quota_per_second,
            token_envs,
        }
    }

    fn token_env_for(&self, user_id: Uuid) -> &str {
        self.token_envs
            .get(&user_id)
            .map_or(DEFAULT_TOKEN_ENV, |name| name.as_str())
    }

    fn resolve_token(&self, user_id: Uuid) -> AppResult<String> {
        let var = self.token_env_for(user_id);
        match env::var(var) {
            Ok(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(AppError::Unauthorized(format!(
                "No authorized Google credential for user {} (${} is not set)",
                user_id, var
            ))),
        }
    }
}

#[async_trait]
impl MailConnector for GmailConnector {
    async fn connect(&self, user_id: Uuid) -> AppResult<Arc<dyn MailSource>> {
        let access_token = self.resolve_token(user_id)?;
        Ok(Arc::new(GmailClient::new(
            self.http_client.clone(),
            access_token,
            self.quota_per_second,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_string() {
        let query = MessageQuery::inbox_since(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap(), 50);
        assert_eq!(query.search_string(), "after:2025/08/01 -in:chats");
        assert_eq!(query.label_ids, vec!["INBOX".to_string()]);
        assert!(!query.include_spam_trash);
    }

    #[test]
    fn test_gmail_url() {
        let id = "abc123";
        assert_eq!(
            gmail_url!("messages", id),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/abc123"
        );
    }

    #[tokio::test]
    async fn test_connector_without_token_is_unauthorized() {
        let user_id = Uuid::new_v4();
        let connector = GmailConnector::new(
            reqwest::Client::new(),
            250,
            &[AccountConfig {
                user_id,
                token_env: "APPLYTRACK_TEST_TOKEN_UNSET".to_string(),
            }],
        );

        let result = connector.connect(user_id).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_connector_reads_account_token() {
        let user_id = Uuid::new_v4();
        env::set_var("APPLYTRACK_TEST_TOKEN_SET", "ya29.token");
        let connector = GmailConnector::new(
            reqwest::Client::new(),
            250,
            &[AccountConfig {
                user_id,
                token_env: "APPLYTRACK_TEST_TOKEN_SET".to_string(),
            }],
        );

        assert_eq!(connector.resolve_token(user_id).unwrap(), "ya29.token");
        assert!(connector.connect(user_id).await.is_ok());
    }
}
