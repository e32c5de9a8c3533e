//! Chain validation: lint rules and diagnostics.
//!
//! [`parse`](crate::parse) only checks the section structure. The rules here
//! look at what the templates reference: duplicate or reserved outputs,
//! malformed placeholders, names no earlier step produces, and outputs nothing
//! consumes. Call [`validate`] for every diagnostic or [`validate_or_raise`] to
//! fail on any `Error`-severity issue.

use std::collections::{HashMap, HashSet};

use chainflow_types::{ChainflowError, SEED_VARIABLE};

use crate::ast::ParsedChain;
use crate::template::{is_well_formed, placeholders, variable_names};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    /// 1-based section of the chain definition the issue was found in.
    pub section: Option<usize>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "Error",
            Severity::Warning => "Warning",
        };
        match self.section {
            Some(n) => write!(f, "{level} in section {n}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic>;
}

/// Every template in file order, paired with its section.
fn templates(chain: &ParsedChain) -> Vec<(usize, &str)> {
    let mut all: Vec<(usize, &str)> = chain
        .prompts
        .iter()
        .map(|p| (p.section, p.template.as_str()))
        .chain(chain.reports.iter().map(|r| (r.section, r.template.as_str())))
        .collect();
    all.sort_by_key(|(section, _)| *section);
    all
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct DuplicateOutputRule;
impl LintRule for DuplicateOutputRule {
    fn name(&self) -> &str { "duplicate_output" }
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic> {
        let mut first_seen: HashMap<&str, usize> = HashMap::new();
        let mut diags = Vec::new();
        for step in &chain.prompts {
            if let Some(&earlier) = first_seen.get(step.output.as_str()) {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!(
                        "Output '{}' is already defined by section {earlier}.",
                        step.output
                    ),
                    section: Some(step.section),
                    fix: Some("Give every prompt step a distinct output name".into()),
                });
            } else {
                first_seen.insert(step.output.as_str(), step.section);
            }
        }
        diags
    }
}

struct ReservedOutputRule;
impl LintRule for ReservedOutputRule {
    fn name(&self) -> &str { "reserved_output" }
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic> {
        chain
            .prompts
            .iter()
            .filter(|p| p.output == SEED_VARIABLE)
            .map(|p| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Output '{SEED_VARIABLE}' is reserved for the seed input."),
                section: Some(p.section),
                fix: Some("Rename the output".into()),
            })
            .collect()
    }
}

struct MalformedPlaceholderRule;
impl LintRule for MalformedPlaceholderRule {
    fn name(&self) -> &str { "malformed_placeholder" }
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (section, template) in templates(chain) {
            for token in placeholders(template) {
                if !is_well_formed(token) {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!("Malformed placeholder '{{{token}}}' in template."),
                        section: Some(section),
                        fix: Some("Placeholders take the form {name}".into()),
                    });
                }
            }
        }
        diags
    }
}

struct UnknownVariableRule;
impl LintRule for UnknownVariableRule {
    fn name(&self) -> &str { "unknown_variable" }
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut unknown = |section: usize, name: &str, known: &HashSet<&str>| {
            if is_well_formed(name) && !known.contains(name) {
                diags.push(Diagnostic {
                    rule: "unknown_variable".into(),
                    severity: Severity::Error,
                    message: format!("Template references unknown variable '{name}'."),
                    section: Some(section),
                    fix: None,
                });
            }
        };

        // prompt steps only see the seed and earlier outputs
        let mut known: HashSet<&str> = HashSet::from([SEED_VARIABLE]);
        for step in &chain.prompts {
            for name in variable_names(&step.template) {
                unknown(step.section, name, &known);
            }
            known.insert(step.output.as_str());
        }
        for report in &chain.reports {
            for name in variable_names(&report.template) {
                unknown(report.section, name, &known);
            }
        }
        diags
    }
}

struct UnusedOutputRule;
impl LintRule for UnusedOutputRule {
    fn name(&self) -> &str { "unused_output" }
    fn apply(&self, chain: &ParsedChain) -> Vec<Diagnostic> {
        let referenced: HashSet<&str> = templates(chain)
            .into_iter()
            .flat_map(|(_, template)| placeholders(template))
            .collect();
        chain
            .prompts
            .iter()
            .filter(|p| !referenced.contains(p.output.as_str()))
            .map(|p| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Output '{}' is never referenced.", p.output),
                section: Some(p.section),
                fix: Some("Reference it from a later step or a report".into()),
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every built-in rule and return all diagnostics, errors first.
pub fn validate(chain: &ParsedChain) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(DuplicateOutputRule),
        Box::new(ReservedOutputRule),
        Box::new(MalformedPlaceholderRule),
        Box::new(UnknownVariableRule),
        Box::new(UnusedOutputRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(chain));
    }
    diagnostics.sort_by_key(|d| !d.is_error());
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(chain: &ParsedChain) -> chainflow_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(chain);
    let errors: Vec<String> = diagnostics
        .iter()
        .filter(|d| d.is_error())
        .map(|d| d.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ChainflowError::InvalidChain(errors));
    }
    Ok(diagnostics)
}
