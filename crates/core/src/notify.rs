use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    #[serde(default)]
    pub reply_to: Option<String>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EmailError {
    #[error("email rejected: {0}")]
    Rejected(String),
    #[error("email transport failure: {0}")]
    Transport(String),
    #[error("email template failure: {0}")]
    Template(String),
}

/// Outbound transactional email. Implementations deliver or fail; they never retry.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// Keeps every delivered message in memory. A `failing` dispatcher rejects every send.
#[derive(Clone, Default)]
pub struct RecordingEmailDispatcher {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    failure: Option<EmailError>,
}

impl RecordingEmailDispatcher {
    pub fn failing(error: EmailError) -> Self {
        Self { sent: Arc::default(), failure: Some(error) }
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl EmailDispatcher for RecordingEmailDispatcher {
    fn provider(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        match self.sent.lock() {
            Ok(mut sent) => sent.push(message.clone()),
            Err(poisoned) => poisoned.into_inner().push(message.clone()),
        }
        Ok(())
    }
}
