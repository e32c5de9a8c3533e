//! `{name}` placeholder scanning and substitution.
//!
//! Placeholders are matched lazily between braces on a single line, so
//! `{{x}}` scans as the token `{x` followed by a literal `}` and `{}` scans as
//! an empty token. [`placeholders`] reports such tokens verbatim; [`render`]
//! rejects them as malformed instead of guessing what was meant.

use winnow::combinator::{alt, delimited, repeat};
use winnow::token::{literal, take_till};
use winnow::{ModalResult, Parser};

use chainflow_types::{ChainflowError, Variables};

/// One piece of a scanned template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// Failure to render a template against a variable mapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("missing variable '{0}'")]
    Missing(String),
    #[error("malformed placeholder '{{{0}}}'")]
    Malformed(String),
}

impl RenderError {
    /// Attach the name of the step whose template failed.
    pub fn for_step(self, step: &str) -> ChainflowError {
        match self {
            RenderError::Missing(variable) => ChainflowError::MissingVariable {
                step: step.to_string(),
                variable,
            },
            RenderError::Malformed(token) => ChainflowError::TemplateSyntax {
                step: step.to_string(),
                token,
            },
        }
    }
}

fn placeholder<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    delimited('{', take_till(0.., ['}', '\n']), '}').parse_next(input)
}

fn text<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_till(1.., '{').parse_next(input)
}

fn segment<'i>(input: &mut &'i str) -> ModalResult<Segment<'i>> {
    alt((
        placeholder.map(Segment::Placeholder),
        text.map(Segment::Text),
        // an unterminated brace is plain text
        literal("{").map(Segment::Text),
    ))
    .parse_next(input)
}

/// Scan a template into text and placeholder segments.
pub fn segments(template: &str) -> Vec<Segment<'_>> {
    let mut input = template;
    let parsed: ModalResult<Vec<Segment<'_>>> = repeat(0.., segment).parse_next(&mut input);
    match parsed {
        Ok(segments) => segments,
        Err(_) => vec![Segment::Text(template)],
    }
}

/// Every placeholder token in order of appearance, duplicates included.
pub fn placeholders(template: &str) -> Vec<&str> {
    segments(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name),
            Segment::Text(_) => None,
        })
        .collect()
}

/// Distinct placeholder names in first-seen order.
pub fn variable_names(template: &str) -> Vec<&str> {
    let mut names: Vec<&str> = Vec::new();
    for name in placeholders(template) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// A token is a usable variable name unless it is blank or contains a brace.
pub fn is_well_formed(token: &str) -> bool {
    !token.trim().is_empty() && !token.contains('{')
}

/// Substitute every placeholder with its value from `vars`.
pub fn render(template: &str, vars: &Variables) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    for segment in segments(template) {
        match segment {
            Segment::Text(text) => out.push_str(text),
            Segment::Placeholder(name) => {
                if !is_well_formed(name) {
                    return Err(RenderError::Malformed(name.to_string()));
                }
                let value = vars
                    .get(name)
                    .ok_or_else(|| RenderError::Missing(name.to_string()))?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}
