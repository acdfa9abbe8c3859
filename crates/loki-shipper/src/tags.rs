// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extraction of origin tags embedded in raw process output.
//!
//! Rules are evaluated in order. Each rule reports at most its first match,
//! and that match is cut out of the text before the next rule runs. Further
//! occurrences are left for [`crate::sanitizer::sanitize`] to remove.

use crate::sanitizer::{COMPONENT_TAG_REGEX, SCRIPT_TAG_REGEX};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagLabel {
    /// Script/resource that wrote the line.
    Resource,
    /// Server subsystem that wrote the line.
    Component,
}

impl TagLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagLabel::Resource => "resource",
            TagLabel::Component => "fx_component",
        }
    }
}

impl fmt::Display for TagLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One extracted tag. `span` is the byte range of the whole marker in the text
/// the rule was applied to, i.e. after earlier rules had removed their match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub label: TagLabel,
    pub value: String,
    pub span: Range<usize>,
}

/// A pattern whose first capture group is the tag value.
pub struct TagRule {
    pub label: TagLabel,
    pub pattern: &'static Regex,
}

lazy_static! {
    static ref TAG_RULES: Vec<TagRule> = vec![
        TagRule {
            label: TagLabel::Resource,
            pattern: &SCRIPT_TAG_REGEX,
        },
        TagRule {
            label: TagLabel::Component,
            pattern: &COMPONENT_TAG_REGEX,
        },
    ];
}

/// Result of running the tag rules over a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub tags: Vec<Tag>,
    /// The chunk with each reported marker removed.
    pub stripped: String,
}

impl Extraction {
    pub fn get(&self, label: TagLabel) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.label == label)
            .map(|tag| tag.value.as_str())
    }

    pub fn resource(&self) -> Option<&str> {
        self.get(TagLabel::Resource)
    }

    pub fn component(&self) -> Option<&str> {
        self.get(TagLabel::Component)
    }

    pub fn is_untagged(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Scans `chunk` for the first script tag and then the first component tag.
pub fn extract_tags(chunk: &str) -> Extraction {
    extract_with_rules(chunk, &TAG_RULES)
}

pub fn extract_with_rules(chunk: &str, rules: &[TagRule]) -> Extraction {
    let mut stripped = chunk.to_string();
    let mut tags = Vec::with_capacity(rules.len());

    for rule in rules {
        let found = rule.pattern.captures(&stripped).and_then(|captures| {
            let whole = captures.get(0)?;
            let value = captures.get(1)?;
            Some((whole.range(), value.as_str().to_string()))
        });
        if let Some((span, value)) = found {
            stripped.replace_range(span.clone(), "");
            tags.push(Tag {
                label: rule.label,
                value,
                span,
            });
        }
    }

    Extraction { tags, stripped }
}
