//! Reprocess requests.
//!
//! A request names a document or an email and how to redo its OCR. It is
//! validated into a [`ReprocessJob`] before anything is queued; a request
//! that does not validate never reaches a worker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationId;
use crate::error::AppError;

pub const DEFAULT_WORKFLOW: &str = "azure_primary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrEngineName {
    Azure,
    Google,
    Tesseract,
    Mistral,
    Easyocr,
}

impl OcrEngineName {
    pub const ALL: [OcrEngineName; 5] = [
        Self::Azure,
        Self::Google,
        Self::Tesseract,
        Self::Mistral,
        Self::Easyocr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Azure => "azure",
            Self::Google => "google",
            Self::Tesseract => "tesseract",
            Self::Mistral => "mistral",
            Self::Easyocr => "easyocr",
        }
    }
}

impl FromStr for OcrEngineName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == wanted)
            .ok_or_else(|| rejected("ocr_engine", s, Self::ALL.iter().map(|e| e.as_str())))
    }
}

impl fmt::Display for OcrEngineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Self::High, Self::Normal, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| rejected("priority", s, Self::ALL.iter().map(|p| p.as_str())))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn rejected<'a>(field: &str, value: &str, accepted: impl Iterator<Item = &'a str>) -> AppError {
    let accepted: Vec<&str> = accepted.collect();
    AppError::validation(
        field,
        format!("invalid {} '{}', expected one of: {}", field, value, accepted.join(", ")),
    )
    .with_context("value", value)
    .with_context("accepted", accepted)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum ReprocessTarget {
    Document(String),
    Email(String),
}

impl ReprocessTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Document(id) | Self::Email(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Document(_) => "document",
            Self::Email(_) => "email",
        }
    }
}

/// An unvalidated reprocess request as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReprocessRequest {
    pub target: ReprocessTarget,
    #[serde(default)]
    pub ocr_engine: Option<String>,
    #[serde(default = "default_workflow")]
    pub workflow_config: String,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_true")]
    pub process_attachments: bool,
}

fn default_workflow() -> String {
    DEFAULT_WORKFLOW.to_string()
}

fn default_priority() -> String {
    Priority::default().as_str().to_string()
}

fn default_true() -> bool {
    true
}

impl ReprocessRequest {
    pub fn new(target: ReprocessTarget) -> Self {
        Self {
            target,
            ocr_engine: None,
            workflow_config: default_workflow(),
            priority: default_priority(),
            process_attachments: true,
        }
    }

    pub fn validate(&self) -> Result<ReprocessJob, AppError> {
        if self.target.id().trim().is_empty() {
            return Err(AppError::validation(
                self.target.kind(),
                format!("{} id must not be empty", self.target.kind()),
            ));
        }

        let ocr_engine = self
            .ocr_engine
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .map(str::parse::<OcrEngineName>)
            .transpose()?;
        let priority: Priority = self.priority.parse()?;

        let workflow_config = self.workflow_config.trim();
        if workflow_config.is_empty() {
            return Err(AppError::validation(
                "workflow_config",
                "workflow configuration must not be blank",
            ));
        }

        Ok(ReprocessJob {
            job_id: uuid::Uuid::new_v4().to_string(),
            target: self.target.clone(),
            ocr_engine,
            workflow_config: workflow_config.to_string(),
            priority,
            process_attachments: self.process_attachments,
            correlation_id: CorrelationId::new(),
            requested_at: Utc::now(),
        })
    }
}

/// A validated request, ready to queue.
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessJob {
    pub job_id: String,
    pub target: ReprocessTarget,
    pub ocr_engine: Option<OcrEngineName>,
    pub workflow_config: String,
    pub priority: Priority,
    pub process_attachments: bool,
    pub correlation_id: CorrelationId,
    pub requested_at: DateTime<Utc>,
}
