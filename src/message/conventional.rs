use std::fmt;

use serde::{Deserialize, Serialize};

/// Commit subject length limit.
pub const MAX_MESSAGE_CHARS: usize = 72;

/// Types accepted to the left of the colon.
pub const CONVENTIONAL_TYPES: [&str; 11] = [
    "feat", "fix", "docs", "style", "refactor", "perf", "test", "build", "ci", "chore", "revert",
];

const MIN_MESSAGE_CHARS: usize = 5;
const MIN_FREEFORM_CHARS: usize = 10;

/// A single-line commit subject of at most [`MAX_MESSAGE_CHARS`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitMessage(String);

impl CommitMessage {
    /// Sanitizes raw backend output and keeps it only if it passes validation.
    pub fn from_generated(raw: &str) -> Option<Self> {
        let candidate = sanitize(raw);
        is_valid(&candidate).then_some(Self(candidate))
    }

    /// Forces template output into subject shape. Template text is trusted,
    /// so only emptiness is rejected.
    pub fn from_template(rendered: &str) -> Option<Self> {
        let line = rendered.lines().map(str::trim).find(|line| !line.is_empty())?;
        Some(Self(truncate(line)))
    }

    pub(crate) fn placeholder() -> Self {
        Self("chore: automated update".into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CommitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strips code fences and quotes, keeps the first line and caps the length.
pub fn sanitize(raw: &str) -> String {
    let mut text = raw.trim();
    if let Some(inner) = text
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    {
        text = inner;
    } else if let Some(inner) = text.strip_prefix('`').and_then(|rest| rest.strip_suffix('`')) {
        text = inner;
    }

    let first_line = text.trim().lines().next().unwrap_or_default();
    let cleaned = first_line.trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    truncate(cleaned)
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_MESSAGE_CHARS - 3).collect();
    cut.push_str("...");
    cut
}

/// Colon-form needs a recognized type and a non-empty description; without a
/// colon only length matters.
pub fn is_valid(message: &str) -> bool {
    if message.chars().count() < MIN_MESSAGE_CHARS {
        return false;
    }
    match message.split_once(':') {
        Some((_, description)) => {
            conventional_type(message).is_some() && !description.trim().is_empty()
        }
        None => message.chars().count() >= MIN_FREEFORM_CHARS,
    }
}

/// Recognized type left of the first colon, ignoring a `(scope)` suffix and case.
pub fn conventional_type(message: &str) -> Option<&'static str> {
    let (head, _) = message.split_once(':')?;
    let head = head.trim().to_ascii_lowercase();
    let kind = match head.find('(') {
        Some(open) if head.ends_with(')') => &head[..open],
        _ => head.as_str(),
    };
    CONVENTIONAL_TYPES
        .iter()
        .copied()
        .find(|known| *known == kind.trim())
}
