//! Bot submission ingestion.
//!
//! Payloads are validated into a [`SubmissionRequest`] once, at the
//! boundary. [`IngestService::submit`] then authenticates the presented key
//! by hash, applies the per-key rate limit, sanitizes links and persists the
//! submission with the key owner's id as lineage.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use tracing::{info, warn};

use crate::config::LinksConfig;
use crate::credentials::cipher::hash_secret;
use crate::credentials::store::StoreError;
use crate::credentials::CredentialManager;
use crate::db::{now_timestamp, Database};
use crate::error::BotKeyError;
use crate::links::{LinkPolicy, LinkSanitizer};
use crate::ratelimit::{RateDecision, RateLimiter};

/// Kind of submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    /// A talk or live demo with a presenter.
    #[default]
    SpeakerDemo,
    /// A discussion topic.
    Topic,
}

impl SubmissionType {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeakerDemo => "speaker_demo",
            Self::Topic => "topic",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised type.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "speaker_demo" => Ok(Self::SpeakerDemo),
            "topic" => Ok(Self::Topic),
            other => Err(StoreError::InvalidEnum {
                field: "submission_type",
                value: other.to_owned(),
            }),
        }
    }
}

/// Who authored a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmittedBy {
    /// The bot on its own account.
    #[default]
    Bot,
    /// The bot for a named person.
    BotOnBehalf,
    /// A human using the bot key directly.
    Human,
}

impl SubmittedBy {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bot => "bot",
            Self::BotOnBehalf => "bot_on_behalf",
            Self::Human => "human",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised author kind.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "bot" => Ok(Self::Bot),
            "bot_on_behalf" => Ok(Self::BotOnBehalf),
            "human" => Ok(Self::Human),
            other => Err(StoreError::InvalidEnum {
                field: "submitted_by",
                value: other.to_owned(),
            }),
        }
    }
}

/// Wire shape of the webhook body. Types are strict; presence is checked in
/// [`SubmissionRequest::from_json`].
#[derive(Debug, Deserialize)]
struct RawSubmission {
    title: Option<String>,
    description: Option<String>,
    presenter_name: Option<String>,
    links: Option<Vec<String>>,
    #[serde(default)]
    submission_type: SubmissionType,
    #[serde(default)]
    submitted_by: SubmittedBy,
    submitted_for_name: Option<String>,
    submitted_for_contact: Option<String>,
}

/// A validated submission, before link sanitizing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Trimmed, non-empty title.
    pub title: String,
    /// Trimmed, non-empty description.
    pub description: String,
    /// Trimmed, non-empty presenter name.
    pub presenter_name: String,
    /// Candidate links, untrusted.
    pub links: Vec<String>,
    /// Kind of submission.
    pub submission_type: SubmissionType,
    /// Who authored it.
    pub submitted_by: SubmittedBy,
    /// Person the bot submits for; required for [`SubmittedBy::BotOnBehalf`].
    pub submitted_for_name: Option<String>,
    /// Contact for that person.
    pub submitted_for_contact: Option<String>,
}

impl SubmissionRequest {
    /// Parse and validate a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`BotKeyError::Validation`] for malformed JSON, wrongly typed
    /// fields, missing required text, or a `bot_on_behalf` submission
    /// without `submitted_for_name`.
    pub fn from_json(body: &[u8]) -> Result<Self, BotKeyError> {
        let raw: RawSubmission = serde_json::from_slice(body)
            .map_err(|e| BotKeyError::Validation(format!("invalid JSON payload: {e}")))?;

        let (Some(title), Some(description), Some(presenter_name)) = (
            trimmed(raw.title),
            trimmed(raw.description),
            trimmed(raw.presenter_name),
        ) else {
            return Err(BotKeyError::Validation(
                "missing required fields: title, description, presenter_name".to_owned(),
            ));
        };

        let submitted_for_name = trimmed(raw.submitted_for_name);
        if raw.submitted_by == SubmittedBy::BotOnBehalf && submitted_for_name.is_none() {
            return Err(BotKeyError::Validation(
                "missing submitted_for_name for bot_on_behalf".to_owned(),
            ));
        }

        Ok(Self {
            title,
            description,
            presenter_name,
            links: raw.links.unwrap_or_default(),
            submission_type: raw.submission_type,
            submitted_by: raw.submitted_by,
            submitted_for_name,
            submitted_for_contact: trimmed(raw.submitted_for_contact),
        })
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// A persisted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// Submission id.
    pub id: String,
    /// Account whose bot key submitted it.
    pub owner_id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Presenter name.
    pub presenter_name: String,
    /// Sanitized links.
    pub links: Vec<String>,
    /// Kind of submission.
    pub submission_type: SubmissionType,
    /// Who authored it.
    pub submitted_by: SubmittedBy,
    /// Person submitted for.
    pub submitted_for_name: Option<String>,
    /// Contact for that person.
    pub submitted_for_contact: Option<String>,
    /// Insert time.
    pub created_at: String,
}

/// Persistence for submissions.
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Insert one submission.
    async fn insert_submission(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Submissions made with a given account's key, oldest first.
    async fn submissions_for_owner(&self, owner_id: &str) -> Result<Vec<Submission>, StoreError>;
}

#[async_trait]
impl SubmissionStore for Database {
    async fn insert_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let links = if submission.links.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&submission.links).map_err(|e| StoreError::InvalidJson {
                    field: "links",
                    message: e.to_string(),
                })?,
            )
        };

        sqlx::query(
            "INSERT INTO submissions \
             (id, owner_id, title, description, presenter_name, links, submission_type, \
              submitted_by, submitted_for_name, submitted_for_contact, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&submission.id)
        .bind(&submission.owner_id)
        .bind(&submission.title)
        .bind(&submission.description)
        .bind(&submission.presenter_name)
        .bind(links)
        .bind(submission.submission_type.as_str())
        .bind(submission.submitted_by.as_str())
        .bind(&submission.submitted_for_name)
        .bind(&submission.submitted_for_contact)
        .bind(&submission.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn submissions_for_owner(&self, owner_id: &str) -> Result<Vec<Submission>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, title, description, presenter_name, links, submission_type, \
                    submitted_by, submitted_for_name, submitted_for_contact, created_at \
             FROM submissions WHERE owner_id = ?1 ORDER BY created_at, id",
        )
        .bind(owner_id)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let links: Option<String> = row.try_get("links")?;
                let links = match links {
                    Some(json) => {
                        serde_json::from_str(&json).map_err(|e| StoreError::InvalidJson {
                            field: "links",
                            message: e.to_string(),
                        })?
                    }
                    None => Vec::new(),
                };
                let submission_type: String = row.try_get("submission_type")?;
                let submitted_by: String = row.try_get("submitted_by")?;
                Ok(Submission {
                    id: row.try_get("id")?,
                    owner_id: row.try_get("owner_id")?,
                    title: row.try_get("title")?,
                    description: row.try_get("description")?,
                    presenter_name: row.try_get("presenter_name")?,
                    links,
                    submission_type: SubmissionType::parse(&submission_type)?,
                    submitted_by: SubmittedBy::parse(&submitted_by)?,
                    submitted_for_name: row.try_get("submitted_for_name")?,
                    submitted_for_contact: row.try_get("submitted_for_contact")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// Acknowledgement for an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Id of the stored submission.
    pub submission_id: String,
    /// Links kept after sanitizing.
    pub links_accepted: usize,
    /// Links discarded by the sanitizer.
    pub links_dropped: usize,
}

/// The public, key-authenticated submission path.
pub struct IngestService {
    credentials: Arc<CredentialManager>,
    limiter: Arc<dyn RateLimiter>,
    submissions: Arc<dyn SubmissionStore>,
    sanitizer: LinkSanitizer,
    rules: LinksConfig,
}

impl IngestService {
    /// Create the service with link rules from config.
    pub fn new(
        credentials: Arc<CredentialManager>,
        limiter: Arc<dyn RateLimiter>,
        submissions: Arc<dyn SubmissionStore>,
        rules: LinksConfig,
    ) -> Self {
        Self {
            credentials,
            limiter,
            submissions,
            sanitizer: LinkSanitizer::new(&rules.allowed_hosts),
            rules,
        }
    }

    /// Accept one submission made with `presented_key`.
    ///
    /// # Errors
    ///
    /// - [`BotKeyError::Authentication`] if the key matches no stored hash
    /// - [`BotKeyError::RateLimited`] if the key is over its window limit
    /// - [`BotKeyError::Validation`] if the link rules reject the payload
    /// - [`BotKeyError::Storage`] if the lookup or insert fails
    pub async fn submit(
        &self,
        presented_key: &str,
        request: SubmissionRequest,
    ) -> Result<IngestReceipt, BotKeyError> {
        let owner_id = self
            .credentials
            .authenticate(presented_key)
            .await?
            .ok_or(BotKeyError::Authentication)?;

        let key_hash = hash_secret(presented_key);
        if let RateDecision::Denied { retry_after } = self.limiter.check(&key_hash).await {
            warn!(owner_id = %owner_id, retry_secs = retry_after.as_secs(), "ingestion rate limited");
            return Err(BotKeyError::RateLimited { retry_after });
        }

        if request.links.len() > self.rules.max_links {
            return Err(BotKeyError::Validation(format!(
                "too many links: {} (max {})",
                request.links.len(),
                self.rules.max_links
            )));
        }

        let links = self.sanitizer.sanitize_all(&request.links);
        if links.rejected > 0 && self.rules.policy == LinkPolicy::RejectPayload {
            return Err(BotKeyError::Validation(format!(
                "{} link(s) failed validation",
                links.rejected
            )));
        }
        if links.accepted.is_empty() && self.rules.require_at_least_one {
            return Err(BotKeyError::Validation(
                "at least one valid https link is required".to_owned(),
            ));
        }

        let submission = Submission {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            title: request.title,
            description: request.description,
            presenter_name: request.presenter_name,
            links: links.accepted,
            submission_type: request.submission_type,
            submitted_by: request.submitted_by,
            submitted_for_name: request.submitted_for_name,
            submitted_for_contact: request.submitted_for_contact,
            created_at: now_timestamp(),
        };
        self.submissions.insert_submission(&submission).await?;

        info!(
            owner_id = %submission.owner_id,
            submission_id = %submission.id,
            links_accepted = submission.links.len(),
            links_dropped = links.rejected,
            "bot submission accepted"
        );

        Ok(IngestReceipt {
            submission_id: submission.id,
            links_accepted: submission.links.len(),
            links_dropped: links.rejected,
        })
    }
}
