//! Shared moderation types

use serde::{Deserialize, Serialize};

/// Cache category assigned to a moderated item.
///
/// Cache entries written by the pipelines always carry one of these three
/// values; admin-added bad phrases may instead carry a free-form tag (for
/// example `"profanity"`), which every consumer treats as non-safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Content is clean
    Safe,
    /// Content needs human review
    Controversial,
    /// Content is auto-rejected
    Unsafe,
}

impl Category {
    /// String form stored in cache entries
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Controversial => "controversial",
            Self::Unsafe => "unsafe",
        }
    }

    /// Parse a stored category string; unknown tags map to `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "safe" => Some(Self::Safe),
            "controversial" => Some(Self::Controversial),
            "unsafe" => Some(Self::Unsafe),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final coarse decision produced by verdict synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    /// Content may be published without review
    AutoApprove,
    /// Content is held for human review
    PendingReview,
    /// Content is rejected outright
    AutoReject,
}

impl ModerationAction {
    /// Derive the action from per-modality flags; reject dominates review.
    pub fn from_flags(should_reject: bool, should_review: bool) -> Self {
        if should_reject {
            Self::AutoReject
        } else if should_review {
            Self::PendingReview
        } else {
            Self::AutoApprove
        }
    }
}

/// A known-bad phrase with its metadata, as fed into the cheap filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadPhrase {
    /// The phrase text (normalized at the matching boundary)
    pub word: String,
    /// Category tag, e.g. "profanity" or "unsafe"
    pub category: String,
    /// Severity score in [0, 1]
    pub nsfw_score: f64,
}

impl BadPhrase {
    /// Create a new bad phrase, clamping out-of-range scores to 1.0
    pub fn new(word: impl Into<String>, category: impl Into<String>, nsfw_score: f64) -> Self {
        let nsfw_score = if (0.0..=1.0).contains(&nsfw_score) {
            nsfw_score
        } else {
            1.0
        };
        Self {
            word: word.into(),
            category: category.into(),
            nsfw_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_roundtrip() {
        for c in [Category::Safe, Category::Controversial, Category::Unsafe] {
            assert_eq!(Category::parse(c.as_str()), Some(c));
        }
        assert_eq!(Category::parse("profanity"), None);
    }

    #[test]
    fn test_action_dominance() {
        assert_eq!(
            ModerationAction::from_flags(true, true),
            ModerationAction::AutoReject
        );
        assert_eq!(
            ModerationAction::from_flags(false, true),
            ModerationAction::PendingReview
        );
        assert_eq!(
            ModerationAction::from_flags(false, false),
            ModerationAction::AutoApprove
        );
    }

    #[test]
    fn test_bad_phrase_score_clamped() {
        assert_eq!(BadPhrase::new("x", "y", 1.5).nsfw_score, 1.0);
        assert_eq!(BadPhrase::new("x", "y", -0.1).nsfw_score, 1.0);
        assert_eq!(BadPhrase::new("x", "y", 0.4).nsfw_score, 0.4);
    }
}
