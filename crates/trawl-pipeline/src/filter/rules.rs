//! Content predicates evaluated by the filter stage, in chain order.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::{Regex, RegexSet};
use trawl_core::RejectReason;

/// A pure predicate over item text. A match rejects the item for `reason()`.
pub trait Rule: Send + Sync {
    fn reason(&self) -> RejectReason;
    fn matches(&self, text: &str, language: Option<&str>) -> bool;
}

/// Ordered rules; the first match wins.
pub struct RuleChain {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleChain {
    #[must_use]
    pub fn new(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// spam → offensive → propaganda → low quality.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(SpamRule),
            Box::new(OffensiveRule),
            Box::new(PropagandaRule),
            Box::new(LowQualityRule),
        ])
    }

    /// Returns the first matching rule's reason, or `None` to accept.
    #[must_use]
    pub fn evaluate(&self, text: &str, language: Option<&str>) -> Option<RejectReason> {
        self.rules
            .iter()
            .find(|rule| rule.matches(text, language))
            .map(|rule| rule.reason())
    }
}

impl Default for RuleChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.reason()))
            .finish()
    }
}

static SPAM_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)(buy now|click here|free offer|limited time|discount code|special deal)",
        r"(?i)(earn money online|work from home|make \$\d+ daily)",
        r"(?i)(viagra|cialis|medication online|buy pills)",
        r"(?i)(casino|betting|gambling|slot machine|poker)",
        r"(?i)(subscribe to my|follow me at|check out my profile)",
        r"https?://\S+\s+https?://\S+\s+https?://\S+",
    ])
    .expect("valid regex")
});

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid regex"));

const OFFENSIVE_EN: &[&str] = &["idiot", "moron", "scumbag", "bastard", "imbecile"];
const OFFENSIVE_FA: &[&str] = &["احمق", "بیشعور", "کثافت", "عوضی", "نفهم"];

const PROPAGANDA_INDICATORS: &[&str] = &[
    "حمایت_کنید_از",
    "رای_دهید_به",
    "انتخاب_کنید",
    "فقط_یک_انتخاب",
    "بهترین_گزینه",
];

pub struct SpamRule;

impl Rule for SpamRule {
    fn reason(&self) -> RejectReason {
        RejectReason::Spam
    }

    fn matches(&self, text: &str, _language: Option<&str>) -> bool {
        SPAM_PATTERNS.is_match(text)
    }
}

/// Whole-word match against the list for the item's language. Anything
/// other than `fa` uses the English list.
pub struct OffensiveRule;

impl Rule for OffensiveRule {
    fn reason(&self) -> RejectReason {
        RejectReason::Offensive
    }

    fn matches(&self, text: &str, language: Option<&str>) -> bool {
        let words = match language {
            Some("fa") => OFFENSIVE_FA,
            _ => OFFENSIVE_EN,
        };
        WORD.find_iter(text).any(|m| {
            let token = m.as_str().to_lowercase();
            words.contains(&token.as_str())
        })
    }
}

pub struct PropagandaRule;

impl Rule for PropagandaRule {
    fn reason(&self) -> RejectReason {
        RejectReason::Propaganda
    }

    fn matches(&self, text: &str, _language: Option<&str>) -> bool {
        PROPAGANDA_INDICATORS.iter().any(|i| text.contains(i))
    }
}

/// Too short, dominated by one character, or dominated by one word.
pub struct LowQualityRule;

impl Rule for LowQualityRule {
    fn reason(&self) -> RejectReason {
        RejectReason::LowQuality
    }

    fn matches(&self, text: &str, _language: Option<&str>) -> bool {
        let len = text.chars().count();
        if len < 10 {
            return true;
        }

        if len > 15 {
            let top_char = most_common(text.chars());
            if top_char * 2 > len {
                return true;
            }
        }

        let words: Vec<&str> = WORD.find_iter(text).map(|m| m.as_str()).collect();
        if words.is_empty() {
            return false;
        }
        let top_word = most_common(words.iter().copied());
        // count > 40% of words, kept in integers.
        top_word > 3 && top_word * 5 > words.len() * 2
    }
}

fn most_common<T, I>(values: I) -> usize
where
    T: std::hash::Hash + Eq,
    I: Iterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    counts.into_values().max().unwrap_or(0)
}
