// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Local rule-based prompt scanner
//!
//! Deterministic and I/O free. This is the fail-closed baseline of the
//! admission pipeline: whatever the external classifier does, these rules
//! always run first.

use regex::Regex;
use tracing::debug;

use super::types::{AuditOutcome, BlockSource, PatternMatch, SafetyError};

pub const CATEGORY_MINORS: &str = "minors";
pub const CATEGORY_SEXUAL_VIOLENCE: &str = "sexual_violence";
pub const CATEGORY_BESTIALITY: &str = "bestiality";
pub const CATEGORY_EXTREMISM: &str = "extremism";
pub const CATEGORY_SELF_HARM: &str = "self_harm";
pub const CATEGORY_PROFANITY: &str = "profanity";
pub const CATEGORY_NSFW: &str = "nsfw";
pub const CATEGORY_CUSTOM: &str = "custom";

/// Terms that make a prompt sexual. Used as co-occurrence context for the
/// minors rule, and blocked outright on strict domains.
const SEXUAL_CONTEXT_TERMS: &[&str] = &[
    "nude",
    "naked",
    "nsfw",
    "sex",
    "sexual",
    "sexy",
    "explicit",
    "porn",
    "pornographic",
    "topless",
    "bottomless",
    "lingerie",
    "erotic",
    "hentai",
    "undressed",
    "genitals",
    "nipples",
];

const MINOR_TERMS: &[&str] = &[
    "child",
    "children",
    "kid",
    "kids",
    "minor",
    "minors",
    "underage",
    "toddler",
    "preteen",
    "pre teen",
    "loli",
    "shota",
    "schoolgirl",
    "schoolboy",
    "infant",
    "young girl",
    "young boy",
    "little girl",
    "little boy",
];

/// Negative-prompt terms that steer a sexual prompt away from adults
const ADULT_NEGATION_TERMS: &[&str] = &["adult", "adults", "mature"];

const SEXUAL_VIOLENCE_TERMS: &[&str] = &[
    "rape",
    "raped",
    "raping",
    "non consensual",
    "nonconsensual",
    "sexual assault",
    "molest",
    "molested",
    "molesting",
];

const BESTIALITY_TERMS: &[&str] = &["bestiality", "zoophilia"];

const EXTREMISM_TERMS: &[&str] = &[
    "nazi propaganda",
    "terrorist recruitment",
    "isis propaganda",
    "mass shooting glorification",
];

const SELF_HARM_TERMS: &[&str] = &[
    "suicide",
    "self harm",
    "cutting wrists",
    "slit wrists",
];

const PROFANITY_TERMS: &[&str] = &[
    "fuck",
    "fucking",
    "fucked",
    "shit",
    "bitch",
    "cunt",
    "asshole",
    "dick",
    "bastard",
    "motherfucker",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleScope {
    /// Checked on every domain
    Always,
    /// Checked on every domain, fires only when the prompt is sexual
    WithSexualContext,
    /// Checked only when profanity checking is on
    StrictOnly,
}

struct CompiledRule {
    category: String,
    scope: RuleScope,
    matcher: Regex,
}

/// Rule-based prompt auditor
pub struct PatternAuditor {
    rules: Vec<CompiledRule>,
    sexual_context: Regex,
    adult_negation: Regex,
}

/// Lowercase, fold common digit/symbol substitutions and collapse every
/// non-alphanumeric run into a single space.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for ch in text.chars().flat_map(|c| c.to_lowercase()) {
        let folded = match ch {
            '0' => 'o',
            '1' => 'i',
            '3' => 'e',
            '4' | '@' => 'a',
            '5' | '$' => 's',
            '7' => 't',
            c => c,
        };
        if folded.is_alphanumeric() {
            out.push(folded);
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn compile_terms(category: &str, terms: &[&str]) -> Result<Regex, SafetyError> {
    let alternation = terms
        .iter()
        .map(|t| normalize(t))
        .filter(|t| !t.is_empty())
        .map(|t| regex::escape(&t))
        .collect::<Vec<_>>()
        .join("|");
    // An empty alternation would match everywhere
    if alternation.is_empty() {
        return Err(SafetyError::InvalidRule {
            category: category.to_string(),
            message: "no usable terms".to_string(),
        });
    }
    Regex::new(&format!(r"\b(?:{})\b", alternation)).map_err(|e| SafetyError::InvalidRule {
        category: category.to_string(),
        message: e.to_string(),
    })
}

impl PatternAuditor {
    /// Build the auditor from the built-in rule set plus operator-configured
    /// terms, which are filed under the `custom` category.
    pub fn new(custom_terms: &[String]) -> Result<Self, SafetyError> {
        let mut rules = Vec::new();
        let mut push = |category: &str, scope: RuleScope, terms: &[&str]| -> Result<(), SafetyError> {
            rules.push(CompiledRule {
                category: category.to_string(),
                scope,
                matcher: compile_terms(category, terms)?,
            });
            Ok(())
        };

        push(CATEGORY_MINORS, RuleScope::WithSexualContext, MINOR_TERMS)?;
        push(CATEGORY_SEXUAL_VIOLENCE, RuleScope::Always, SEXUAL_VIOLENCE_TERMS)?;
        push(CATEGORY_BESTIALITY, RuleScope::Always, BESTIALITY_TERMS)?;
        push(CATEGORY_EXTREMISM, RuleScope::Always, EXTREMISM_TERMS)?;
        push(CATEGORY_SELF_HARM, RuleScope::Always, SELF_HARM_TERMS)?;
        push(CATEGORY_PROFANITY, RuleScope::StrictOnly, PROFANITY_TERMS)?;
        push(CATEGORY_NSFW, RuleScope::StrictOnly, SEXUAL_CONTEXT_TERMS)?;

        let custom: Vec<&str> = custom_terms
            .iter()
            .map(String::as_str)
            .filter(|t| !normalize(t).is_empty())
            .collect();
        if !custom.is_empty() {
            push(CATEGORY_CUSTOM, RuleScope::Always, &custom[..])?;
        }

        Ok(Self {
            rules,
            sexual_context: compile_terms("sexual_context", SEXUAL_CONTEXT_TERMS)?,
            adult_negation: compile_terms("adult_negation", ADULT_NEGATION_TERMS)?,
        })
    }

    /// Categories this auditor can report, in rule order
    pub fn categories(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.category.as_str()).collect()
    }

    /// Scan a prompt and optional negative prompt.
    ///
    /// `check_profanity` enables the strict-only rules. Whitespace-only
    /// prompts are never blocked.
    pub fn audit(
        &self,
        text: &str,
        negative_text: Option<&str>,
        check_profanity: bool,
    ) -> AuditOutcome {
        if text.trim().is_empty() {
            return AuditOutcome::allowed(BlockSource::LocalPattern);
        }

        let normalized = normalize(text);
        let sexual = self.sexual_context.is_match(&normalized);
        let mut matches = Vec::new();

        for rule in &self.rules {
            match rule.scope {
                RuleScope::StrictOnly if !check_profanity => continue,
                RuleScope::WithSexualContext if !sexual => continue,
                _ => {}
            }
            for m in rule.matcher.find_iter(&normalized) {
                let hit = PatternMatch::new(m.as_str(), rule.category.as_str());
                if !matches.contains(&hit) {
                    matches.push(hit);
                }
            }
        }

        if sexual {
            if let Some(negative) = negative_text.filter(|n| !n.trim().is_empty()) {
                let negative = normalize(negative);
                for m in self.adult_negation.find_iter(&negative) {
                    let hit = PatternMatch::new(format!("-{}", m.as_str()), CATEGORY_MINORS);
                    if !matches.contains(&hit) {
                        matches.push(hit);
                    }
                }
            }
        }

        let outcome = AuditOutcome::from_matches(matches);
        if outcome.blocked {
            debug!(
                reasons = ?outcome.reasons,
                hits = outcome.matches.len(),
                "Local pattern audit blocked prompt"
            );
        }
        outcome
    }
}
