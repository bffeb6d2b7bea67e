//! User-defined container grouping rules
//!
//! Sections are a view-layer concern: the store publishes raw containers,
//! and observers group them using these predicates. The rules themselves
//! are persisted alongside the host list.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::Container;

/// What a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchKind {
    NameContains,
    ImageContains,
    /// Pattern is `key=value`
    LabelEquals,
    NameRegex,
}

/// One grouping predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRule {
    pub kind: MatchKind,
    pub pattern: String,
}

impl SectionRule {
    pub fn new(kind: MatchKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
        }
    }
}

/// A named group of rules; a container belongs when any rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub rules: Vec<SectionRule>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: SectionRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Compile the rules once for repeated matching over a container list.
    pub fn matcher(&self) -> SectionMatcher {
        let rules = self
            .rules
            .iter()
            .filter_map(|rule| match rule.kind {
                MatchKind::NameContains => {
                    Some(CompiledRule::NameContains(rule.pattern.clone()))
                }
                MatchKind::ImageContains => {
                    Some(CompiledRule::ImageContains(rule.pattern.clone()))
                }
                MatchKind::LabelEquals => {
                    let (key, value) = rule.pattern.split_once('=')?;
                    Some(CompiledRule::LabelEquals(key.to_string(), value.to_string()))
                }
                MatchKind::NameRegex => match Regex::new(&rule.pattern) {
                    Ok(re) => Some(CompiledRule::NameRegex(re)),
                    Err(e) => {
                        warn!("Ignoring invalid section regex {:?}: {}", rule.pattern, e);
                        None
                    }
                },
            })
            .collect();
        SectionMatcher { rules }
    }
}

enum CompiledRule {
    NameContains(String),
    ImageContains(String),
    LabelEquals(String, String),
    NameRegex(Regex),
}

impl CompiledRule {
    fn matches(&self, container: &Container) -> bool {
        match self {
            CompiledRule::NameContains(needle) => container.name.contains(needle.as_str()),
            CompiledRule::ImageContains(needle) => container.image.contains(needle.as_str()),
            CompiledRule::LabelEquals(key, value) => {
                container.labels.get(key).map(|v| v == value).unwrap_or(false)
            }
            CompiledRule::NameRegex(re) => re.is_match(&container.name),
        }
    }
}

/// Pre-compiled section predicate.
pub struct SectionMatcher {
    rules: Vec<CompiledRule>,
}

impl SectionMatcher {
    /// OR over the section's rules.
    pub fn matches(&self, container: &Container) -> bool {
        self.rules.iter().any(|r| r.matches(container))
    }
}
