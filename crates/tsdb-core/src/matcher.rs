//! Label matchers used by index queries (spec §4.4/§4.5/§6).

use regex::Regex;

use crate::label::LabelSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
}

#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub value: String,
    pub op: MatchOp,
}

impl LabelMatcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            op: MatchOp::Equal,
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            op: MatchOp::NotEqual,
        }
    }

    pub fn regex_match(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: pattern.into(),
            op: MatchOp::RegexMatch,
        }
    }

    pub fn regex_no_match(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: pattern.into(),
            op: MatchOp::RegexNoMatch,
        }
    }

    pub fn is_equality(&self) -> bool {
        self.op == MatchOp::Equal
    }

    /// Evaluates this matcher against a label set. An invalid regex excludes
    /// all candidates (spec §4.4) rather than propagating as an error.
    pub fn matches(&self, labels: &LabelSet) -> bool {
        let actual = labels.get(&self.name).unwrap_or("");
        match self.op {
            MatchOp::Equal => actual == self.value,
            MatchOp::NotEqual => actual != self.value,
            MatchOp::RegexMatch => Regex::new(&self.value)
                .map(|re| re.is_match(actual))
                .unwrap_or(false),
            MatchOp::RegexNoMatch => Regex::new(&self.value)
                .map(|re| !re.is_match(actual))
                .unwrap_or(false),
        }
    }
}
