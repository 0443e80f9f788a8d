//! Raw action identifier parsing.
//!
//! The service advertises follow-ups as strings such as `upscale1`, `reroll`,
//! `pan_left` or `high_variation`. Which rule applies is decided by the shape
//! of the identifier:
//!
//! | shape                 | rule                                   | unknown name  |
//! |-----------------------|----------------------------------------|---------------|
//! | ends in a digit       | strip the digit, resolve the rest      | `MappingError`|
//! | no separator          | resolve as is                          | `MappingError`|
//! | separator-joined      | keyword token is the type; qualifier   | dropped       |
//! |                       | in the disallowed set drops the action |               |

use crate::error::MappingError;
use crate::jobs::JobType;

/// Which parsing rule an identifier falls under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    TrailingDigit,
    Direct,
    Split,
}

/// Declarative rule table for mapping identifiers to job types.
#[derive(Debug)]
pub struct ParseRules {
    pub separator: char,
    /// Name → type, used by the digit and direct rules.
    pub names: &'static [(&'static str, JobType)],
    /// Tokens recognised as the type in separator-joined identifiers.
    pub keywords: &'static [&'static str],
    /// Qualifiers that mark a size/quality modifier rather than an action.
    pub disallowed_qualifiers: &'static [&'static str],
}

pub const DEFAULT_RULES: ParseRules = ParseRules {
    separator: '_',
    names: &[
        ("imagine", JobType::Generate),
        ("generate", JobType::Generate),
        ("upscale", JobType::Upscale),
        ("variation", JobType::Variant),
        ("variant", JobType::Variant),
        ("pan", JobType::Pan),
        ("reroll", JobType::Reroll),
        ("outpaint", JobType::Outpaint),
        ("inpaint", JobType::Inpaint),
    ],
    keywords: &["variation", "variant", "outpaint", "pan", "upscale"],
    disallowed_qualifiers: &["high", "low", "subtle", "creative"],
};

impl ParseRules {
    pub fn rule_for(&self, raw: &str) -> Rule {
        if raw.ends_with(|c: char| c.is_ascii_digit()) {
            Rule::TrailingDigit
        } else if !raw.contains(self.separator) {
            Rule::Direct
        } else {
            Rule::Split
        }
    }

    /// Parse one identifier. `Ok(None)` means the identifier is ignored.
    pub fn parse(&self, raw: &str) -> Result<Option<JobType>, MappingError> {
        match self.rule_for(raw) {
            Rule::TrailingDigit => self.resolve(&raw[..raw.len() - 1]).map(Some),
            Rule::Direct => self.resolve(raw).map(Some),
            Rule::Split => Ok(self.split(raw)),
        }
    }

    fn resolve(&self, name: &str) -> Result<JobType, MappingError> {
        self.lookup(name).ok_or_else(|| MappingError::UnknownAction {
            raw: name.to_string(),
        })
    }

    fn lookup(&self, name: &str) -> Option<JobType> {
        self.names
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, job_type)| *job_type)
    }

    fn split(&self, raw: &str) -> Option<JobType> {
        let mut keyword = None;
        let mut qualifier = None;
        for token in raw.split(self.separator) {
            if self.keywords.contains(&token) {
                keyword = Some(token);
            } else {
                qualifier = Some(token);
            }
        }

        if qualifier.is_some_and(|q| self.disallowed_qualifiers.contains(&q)) {
            return None;
        }
        keyword.and_then(|k| self.lookup(k))
    }
}

impl JobType {
    /// Parse a service-provided action identifier with the default rules.
    pub fn from_raw_identifier(raw: &str) -> Result<Option<JobType>, MappingError> {
        DEFAULT_RULES.parse(raw)
    }
}
