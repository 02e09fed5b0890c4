//! OpenAI-compatible chat-completions gateway for both capabilities.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::{DraftComposer, EmailClassifier, Label};
use crate::config::Config;
use crate::error::{EngineError, EngineResult};

/// Hard cap on a single completion call; a stuck upstream must not eat
/// the whole sync deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct OpenAiGateway {
    http: reqwest::Client,
    cfg: Arc<Config>,
}

impl OpenAiGateway {
    pub fn new(cfg: Arc<Config>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cfg,
        }
    }

    async fn complete(&self, prompt: &str) -> EngineResult<String> {
        let url = format!("{}/chat/completions", self.cfg.openai_base_url);
        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.cfg.openai_api_key)
            .json(&serde_json::json!({
                "model": self.cfg.openai_model,
                "messages": [
                    {"role": "system", "content": "You are a helpful assistant."},
                    {"role": "user", "content": prompt},
                ],
            }))
            .send();

        let resp = tokio::time::timeout(REQUEST_TIMEOUT, request)
            .await
            .map_err(|_| EngineError::Provider("ai gateway timed out".into()))?
            .map_err(|e| EngineError::Provider(format!("ai gateway: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Provider(format!(
                "ai gateway status {}",
                resp.status()
            )));
        }

        let completion: ChatCompletion = resp
            .json()
            .await
            .map_err(|e| EngineError::Provider(format!("ai gateway response: {e}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Provider("ai gateway returned no choices".into()))
    }

    fn truncate<'a>(&self, body: &'a str) -> &'a str {
        let limit = self.cfg.limit_email_length;
        match body.char_indices().nth(limit) {
            Some((idx, _)) => &body[..idx],
            None => body,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl EmailClassifier for OpenAiGateway {
    async fn classify(&self, subject: &str, body: &str) -> EngineResult<Label> {
        let text = format!("{}\n{}", subject, self.truncate(body));
        let prompt = classification_prompt(&text);
        let answer = self
            .complete(&prompt)
            .await
            .map_err(|e| EngineError::Classification(e.to_string()))?;
        parse_label(&answer)
            .ok_or_else(|| EngineError::Classification(format!("unrecognized label: {answer}")))
    }
}

#[async_trait]
impl DraftComposer for OpenAiGateway {
    async fn compose(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
        account_email: &str,
    ) -> EngineResult<String> {
        let prompt = format!(
            "Write a short, polite reply to the email below. It was sent by {sender} \
             to {account_email}. Answer with the reply body only, no subject line and \
             no commentary.\n\nSubject: {subject}\n\n{}",
            self.truncate(body)
        );
        self.complete(&prompt)
            .await
            .map_err(|e| EngineError::Draft(e.to_string()))
    }
}

fn classification_prompt(email: &str) -> String {
    format!(
        "Classify the following email in one of these types:\n\
         To respond\nEmails you need to respond to\n\n\
         FYI\nEmails that don't require your response, but are important\n\n\
         Comment\nTeam chats in tools like Google Docs or Microsoft Office\n\n\
         Notification\nAutomated updates from tools you use\n\n\
         Meeting update\nCalendar updates from Zoom, Google Meet, etc\n\n\
         Actioned\nEmails you've sent that you're not expecting a reply to\n\n\
         Marketing\nMarketing or cold emails.\n\n\
         Answer with the type name only.\n\n\
         Here is the email to classify:\n\n{email}\n"
    )
}

/// The model is told to answer with the bare label, but tolerate extra
/// prose around it.
fn parse_label(answer: &str) -> Option<Label> {
    if let Some(label) = Label::from_str(answer) {
        return Some(label);
    }
    let lower = answer.to_lowercase();
    Label::ALL
        .into_iter()
        .find(|l| lower.contains(&l.as_str().to_lowercase()))
}
