//! Classification and draft-generation capabilities.
//!
//! Both are consumed as black-box, retryable network calls behind narrow
//! traits so the orchestrator can be exercised with deterministic stubs.

use async_trait::async_trait;

use crate::error::EngineResult;

pub mod openai;

/// Categories a message can be filed under. Only `ToRespond` warrants an
/// automated reply draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    ToRespond,
    Fyi,
    Comment,
    Notification,
    MeetingUpdate,
    Actioned,
    Marketing,
}

impl Label {
    pub const ALL: [Label; 7] = [
        Label::ToRespond,
        Label::Fyi,
        Label::Comment,
        Label::Notification,
        Label::MeetingUpdate,
        Label::Actioned,
        Label::Marketing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToRespond => "To respond",
            Self::Fyi => "FYI",
            Self::Comment => "Comment",
            Self::Notification => "Notification",
            Self::MeetingUpdate => "Meeting update",
            Self::Actioned => "Actioned",
            Self::Marketing => "Marketing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().to_lowercase() == needle)
    }

    pub fn needs_reply(&self) -> bool {
        matches!(self, Self::ToRespond)
    }
}

#[async_trait]
pub trait EmailClassifier: Send + Sync {
    async fn classify(&self, subject: &str, body: &str) -> EngineResult<Label>;
}

#[async_trait]
pub trait DraftComposer: Send + Sync {
    /// Reply text for the given message, addressed from `account_email`.
    async fn compose(
        &self,
        subject: &str,
        body: &str,
        sender: &str,
        account_email: &str,
    ) -> EngineResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_roundtrip() {
        for label in Label::ALL {
            assert_eq!(Label::from_str(label.as_str()), Some(label));
        }
        assert_eq!(Label::from_str("  to respond "), Some(Label::ToRespond));
        assert_eq!(Label::from_str("junk"), None);
    }

    #[test]
    fn only_to_respond_needs_reply() {
        assert!(Label::ToRespond.needs_reply());
        for label in Label::ALL.into_iter().filter(|l| *l != Label::ToRespond) {
            assert!(!label.needs_reply());
        }
    }
}
