// src/tracker/classifier.rs - Maps chat text to the counter(s) it feeds

use log::debug;
use regex::{Regex, RegexBuilder};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::config::ClassifierConfig;
use crate::types::Classification;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("regex pattern must look like ~/pattern/flags: {0}")]
    MalformedRegex(String),

    #[error("unknown regex flag '{flag}' in {pattern}")]
    UnknownFlag { pattern: String, flag: char },

    #[error("invalid regex {pattern}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("empty pattern")]
    Empty,
}

/// Anything that can decide which counter a message belongs to
pub trait Classifier: Send + Sync {
    fn classify(&self, text: &str) -> Classification;
}

impl<F> Classifier for F
where
    F: Fn(&str) -> Classification + Send + Sync,
{
    fn classify(&self, text: &str) -> Classification {
        self(text)
    }
}

/// A single match rule
#[derive(Debug, Clone)]
pub enum MatchPattern {
    /// Plain substring: "+2"
    Literal(String),
    /// Regex written as ~/pattern/flags
    Regex(Regex),
}

impl MatchPattern {
    /// Parse a pattern; anything not starting with `~/` is a literal
    pub fn parse(input: &str, case_sensitive: bool) -> Result<Self, ClassifierError> {
        if input.is_empty() {
            return Err(ClassifierError::Empty);
        }

        let Some(body) = input.strip_prefix("~/") else {
            let literal = if case_sensitive { input.to_string() } else { input.to_lowercase() };
            return Ok(MatchPattern::Literal(literal));
        };

        let last_slash = body
            .rfind('/')
            .ok_or_else(|| ClassifierError::MalformedRegex(input.to_string()))?;
        let (pattern, flags) = (&body[..last_slash], &body[last_slash + 1..]);

        let mut builder = RegexBuilder::new(pattern);
        builder.case_insensitive(!case_sensitive);
        for flag in flags.chars() {
            match flag {
                'i' => { builder.case_insensitive(true); }
                'm' => { builder.multi_line(true); }
                's' => { builder.dot_matches_new_line(true); }
                'x' => { builder.ignore_whitespace(true); }
                _ => {
                    return Err(ClassifierError::UnknownFlag {
                        pattern: input.to_string(),
                        flag,
                    })
                }
            }
        }

        builder
            .build()
            .map(MatchPattern::Regex)
            .map_err(|source| ClassifierError::InvalidRegex {
                pattern: input.to_string(),
                source,
            })
    }

    /// `lowered` is the lowercase form of `text`, present only for case-insensitive matching
    fn matches(&self, text: &str, lowered: Option<&str>) -> bool {
        match self {
            MatchPattern::Literal(literal) => lowered.unwrap_or(text).contains(literal.as_str()),
            MatchPattern::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Classifier driven by configured positive and negative pattern lists
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    positive: Vec<MatchPattern>,
    negative: Vec<MatchPattern>,
    case_sensitive: bool,
    normalize_unicode: bool,
}

impl PatternClassifier {
    pub fn new(positive: Vec<MatchPattern>, negative: Vec<MatchPattern>) -> Self {
        Self {
            positive,
            negative,
            case_sensitive: true,
            normalize_unicode: false,
        }
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let parse_all = |patterns: &[String]| -> Result<Vec<MatchPattern>, ClassifierError> {
            patterns
                .iter()
                .map(|p| MatchPattern::parse(p, config.case_sensitive))
                .collect()
        };

        Ok(Self {
            positive: parse_all(&config.positive_patterns)?,
            negative: parse_all(&config.negative_patterns)?,
            case_sensitive: config.case_sensitive,
            normalize_unicode: config.normalize_unicode,
        })
    }

    fn any_match(patterns: &[MatchPattern], text: &str, lowered: Option<&str>) -> bool {
        patterns.iter().any(|p| p.matches(text, lowered))
    }
}

impl Default for PatternClassifier {
    /// "+2" counts as positive, "-2" as negative
    fn default() -> Self {
        Self::new(
            vec![MatchPattern::Literal("+2".to_string())],
            vec![MatchPattern::Literal("-2".to_string())],
        )
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, text: &str) -> Classification {
        let normalized: String;
        let text = if self.normalize_unicode {
            normalized = text.nfkc().collect();
            normalized.as_str()
        } else {
            text
        };

        let lowered = (!self.case_sensitive).then(|| text.to_lowercase());
        let lowered = lowered.as_deref();

        let classification = Classification::from_matches(
            Self::any_match(&self.positive, text, lowered),
            Self::any_match(&self.negative, text, lowered),
        );

        if classification != Classification::None {
            debug!("Classified {:?}: {}", classification, text);
        }
        classification
    }
}
