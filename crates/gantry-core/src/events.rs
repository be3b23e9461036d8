//! Triggering events and the activation context derived from them.

use crate::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const HEADS_PREFIX: &str = "refs/heads/";
const TAGS_PREFIX: &str = "refs/tags/";

/// Kind of event that can start a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    TagPush,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::TagPush => "tag_push",
        };
        f.write_str(s)
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(EventKind::PullRequest),
            "tag_push" | "tag-push" | "tag" => Ok(EventKind::TagPush),
            other => Err(Error::InvalidEvent(format!("unknown event kind: {}", other))),
        }
    }
}

/// An incoming event. Produced once per pipeline invocation.
///
/// For pull requests `ref` names the target branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub kind: EventKind,
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl Event {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, git_ref)
    }

    pub fn pull_request(target: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest, target)
    }

    pub fn tag_push(tag: impl Into<String>) -> Self {
        Self::new(EventKind::TagPush, tag)
    }

    /// Check that the ref is consistent with the event kind.
    pub fn validate(&self) -> Result<()> {
        let r = self.git_ref.trim();
        if r.is_empty() {
            return Err(Error::InvalidEvent("ref is empty".to_string()));
        }
        match self.kind {
            EventKind::TagPush if r.starts_with(HEADS_PREFIX) => Err(Error::InvalidEvent(
                format!("tag push with branch ref {}", r),
            )),
            EventKind::PullRequest if r.starts_with(TAGS_PREFIX) => Err(Error::InvalidEvent(
                format!("pull request targeting tag ref {}", r),
            )),
            _ => Ok(()),
        }
    }

    /// Tag name, when the event refers to a tag.
    pub fn tag(&self) -> Option<&str> {
        if let Some(tag) = self.git_ref.strip_prefix(TAGS_PREFIX) {
            return Some(tag);
        }
        if self.kind == EventKind::TagPush && !self.git_ref.starts_with("refs/") {
            return Some(&self.git_ref);
        }
        None
    }

    /// Branch name, when the event refers to a branch.
    pub fn branch(&self) -> Option<&str> {
        if let Some(branch) = self.git_ref.strip_prefix(HEADS_PREFIX) {
            return Some(branch);
        }
        if self.kind != EventKind::TagPush && !self.git_ref.starts_with("refs/") {
            return Some(&self.git_ref);
        }
        None
    }

    /// A push of a tag ref counts as a tag push.
    pub fn effective_kind(&self) -> EventKind {
        match self.kind {
            EventKind::Push if self.tag().is_some() => EventKind::TagPush,
            kind => kind,
        }
    }

    /// The fully qualified ref (`refs/heads/...` or `refs/tags/...`).
    pub fn qualified_ref(&self) -> String {
        if self.git_ref.starts_with("refs/") {
            return self.git_ref.clone();
        }
        match (self.tag(), self.branch()) {
            (Some(tag), _) => format!("{}{}", TAGS_PREFIX, tag),
            (None, Some(branch)) => format!("{}{}", HEADS_PREFIX, branch),
            (None, None) => self.git_ref.clone(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.git_ref)
    }
}

/// Context a pipeline run executes under, decided by the trigger evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ActivationContext {
    pub kind: EventKind,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub branch: Option<String>,
    pub tag: Option<String>,
}

impl ActivationContext {
    pub fn from_event(event: &Event) -> Self {
        Self {
            kind: event.effective_kind(),
            git_ref: event.qualified_ref(),
            branch: event.branch().map(str::to_string),
            tag: event.tag().map(str::to_string),
        }
    }

    pub fn is_tag(&self) -> bool {
        self.tag.is_some()
    }

    /// Short ref name: the branch or tag without its `refs/...` prefix.
    pub fn short_ref(&self) -> &str {
        self.tag
            .as_deref()
            .or(self.branch.as_deref())
            .unwrap_or(&self.git_ref)
    }
}
