//! Templated sentence patterns.
//!
//! A template is a regular expression in which `:name` tokens stand for named
//! capture groups, e.g. `deploy :appName from :branch branch`. Literal
//! whitespace in the template matches any run of whitespace in the input.

use std::collections::HashMap;

use regex::{Regex, RegexBuilder};

use crate::errors::BotError;

/// Sub-pattern used for groups without a custom one
pub const DEFAULT_GROUP_PATTERN: &str = r"\w+";

/// Compilation flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatternFlags {
    pub case_insensitive: bool,
}

impl PatternFlags {
    pub fn case_insensitive() -> Self {
        Self {
            case_insensitive: true,
        }
    }
}

/// Custom sub-pattern for one named group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub name: String,
    pub pattern: Option<String>,
}

impl GroupSpec {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: Some(pattern.into()),
        }
    }
}

/// A compiled group with its position among the template tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub pattern: String,
    pub position: usize,
}

/// A compiled sentence pattern.
///
/// Matching is unanchored: `deploy :app` matches anywhere inside the input.
/// Templates that must cover the whole input need their own `^...$`.
#[derive(Debug, Clone)]
pub struct Pattern {
    template: String,
    flags: PatternFlags,
    groups: Vec<Group>,
    regex: Regex,
}

/// A `:name` token found in a template, as byte offsets into it
struct Token {
    start: usize,
    end: usize,
    name: String,
}

impl Pattern {
    pub fn compile(
        template: &str,
        flags: PatternFlags,
        specs: Vec<GroupSpec>,
    ) -> Result<Self, BotError> {
        let mut custom: HashMap<String, String> = HashMap::new();
        for spec in specs {
            if custom.contains_key(&spec.name) {
                return Err(BotError::ParseError(format!(
                    "group `{}` is specified twice",
                    spec.name
                )));
            }
            if let Some(pattern) = spec.pattern {
                custom.insert(spec.name, pattern);
            }
        }

        let loose = loosen_whitespace(template);
        let tokens = find_tokens(&loose);

        let mut groups: Vec<Group> = Vec::with_capacity(tokens.len());
        let mut source = String::with_capacity(loose.len() * 2);
        let mut cursor = 0;
        for (position, token) in tokens.iter().enumerate() {
            if groups.iter().any(|g| g.name == token.name) {
                return Err(BotError::ParseError(format!(
                    "group `{}` appears twice in `{}`",
                    token.name, template
                )));
            }

            let pattern = custom
                .get(&token.name)
                .cloned()
                .unwrap_or_else(|| DEFAULT_GROUP_PATTERN.to_string());

            source.push_str(&loose[cursor..token.start]);
            source.push_str(&format!("(?P<{}>{})", token.name, pattern));
            cursor = token.end;

            groups.push(Group {
                name: token.name.clone(),
                pattern,
                position,
            });
        }
        source.push_str(&loose[cursor..]);

        let regex = RegexBuilder::new(&source)
            .case_insensitive(flags.case_insensitive)
            .build()
            .map_err(|e| BotError::ParseError(format!("invalid template `{}`: {}", template, e)))?;

        Ok(Self {
            template: template.to_string(),
            flags,
            groups,
            regex,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn flags(&self) -> PatternFlags {
        self.flags
    }

    /// Groups in template order
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn is_match(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Match `input`, returning every group that captured something.
    ///
    /// Optional groups that did not take part in the match are absent.
    pub fn captures(&self, input: &str) -> Option<HashMap<String, String>> {
        let caps = self.regex.captures(input)?;
        let mut values = HashMap::with_capacity(self.groups.len());
        for group in &self.groups {
            if let Some(value) = caps.name(&group.name) {
                values.insert(group.name.clone(), value.as_str().to_string());
            }
        }
        Some(values)
    }
}

/// Replace every run of literal whitespace with `\s+`
fn loosen_whitespace(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut in_space = false;
    for c in template.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push_str(r"\s+");
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Whether the colon at `i` closes a `(?:` or `(?flags:` group prefix
fn closes_group_prefix(bytes: &[u8], i: usize) -> bool {
    let mut j = i;
    while j > 0 && (bytes[j - 1].is_ascii_alphabetic() || bytes[j - 1] == b'-') {
        j -= 1;
    }
    j >= 2 && bytes[j - 1] == b'?' && bytes[j - 2] == b'('
}

/// Find `:name` tokens, skipping regex syntax such as `(?:`, `(?i:` and escaped `\:`
fn find_tokens(template: &str) -> Vec<Token> {
    let bytes = template.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b':' {
            i += 1;
            continue;
        }
        let preceded_by_syntax = (i > 0 && (bytes[i - 1] == b'?' || bytes[i - 1] == b'\\'))
            || closes_group_prefix(bytes, i);
        let start = i;
        let mut end = i + 1;
        if end < bytes.len() && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
            end += 1;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
        }
        if end > start + 1 && !preceded_by_syntax {
            tokens.push(Token {
                start,
                end,
                name: template[start + 1..end].to_string(),
            });
            i = end;
        } else {
            i += 1;
        }
    }
    tokens
}
