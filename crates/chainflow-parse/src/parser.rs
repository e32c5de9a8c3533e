use std::sync::OnceLock;

use regex::Regex;

use crate::ast::{ParsedChain, PromptStep, ReportStep};

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

fn section_delimiter() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\r?\n---\r?\n").expect("valid delimiter pattern"))
}

fn output_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*output:[ \t]*(\S[^\r\n]*)").expect("valid output pattern")
    })
}

fn file_suffix_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*file_suffix:[ \t]*(\S[^\r\n]*)").expect("valid file_suffix pattern")
    })
}

fn legacy_file_key() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^[ \t]*file:[ \t]*(\S[^\r\n]*)").expect("valid file pattern")
    })
}

const LEGACY_EXTENSIONS: &[&str] = &[".md", ".pdf", ".html"];
const CONTINUATION_INDENT: &str = "  ";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Split a chain definition into trimmed pieces on `---` delimiter lines.
///
/// An opening `---` fence on the first line is not a delimiter; it is
/// dropped so that metadata and body pieces pair up from index 0.
fn split_sections(text: &str) -> Vec<&str> {
    let mut text = text.trim();
    if let Some(rest) = text.strip_prefix("---") {
        if rest.is_empty() {
            text = rest;
        } else if rest.starts_with('\n') || rest.starts_with("\r\n") {
            text = rest.trim_start_matches(['\r', '\n']);
        }
    }
    section_delimiter().split(text).map(str::trim).collect()
}

fn key_value<'a>(pattern: &Regex, metadata: &'a str) -> Option<&'a str> {
    pattern
        .captures(metadata)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// `description: text` on one line, or `description:` followed by lines
/// indented with two spaces. Each line is trimmed and joined with `\n`.
fn description(metadata: &str) -> Option<String> {
    let mut lines = metadata.lines();
    let first = lines.find_map(|line| line.trim_start().strip_prefix("description:"))?;

    let inline = first.trim();
    if !inline.is_empty() {
        return Some(inline.to_string());
    }

    let block: Vec<&str> = lines
        .take_while(|line| line.starts_with(CONTINUATION_INDENT) && !line.trim().is_empty())
        .map(str::trim)
        .collect();
    if block.is_empty() {
        None
    } else {
        Some(block.join("\n"))
    }
}

fn legacy_suffix(value: &str) -> String {
    LEGACY_EXTENSIONS
        .iter()
        .find_map(|ext| value.strip_suffix(ext))
        .unwrap_or(value)
        .to_string()
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Parse a chain definition into prompt and report steps.
///
/// Never fails: every structural problem is collected into
/// [`ParsedChain::errors`] and parsing continues with the next section.
pub fn parse(text: &str) -> ParsedChain {
    let pieces = split_sections(text);
    let mut chain = ParsedChain::default();

    for i in (0..pieces.len().saturating_sub(1)).step_by(2) {
        let section = i / 2 + 1;
        let metadata = pieces[i];
        let template = pieces[i + 1].to_string();
        let description = description(metadata);

        let file_suffix = key_value(file_suffix_key(), metadata)
            .map(str::to_string)
            .or_else(|| key_value(legacy_file_key(), metadata).map(legacy_suffix));

        if template.is_empty() {
            tracing::debug!(section, "section has no template body");
        }

        if let Some(file_suffix) = file_suffix {
            chain.reports.push(ReportStep {
                section,
                description,
                file_suffix,
                template: template.clone(),
            });
        } else if let Some(output) = key_value(output_key(), metadata) {
            chain.prompts.push(PromptStep {
                section,
                description,
                output: output.to_string(),
                template: template.clone(),
            });
        } else {
            chain.errors.push(format!(
                "Error in section {section}: Either 'file' or 'output' metadata must be present."
            ));
        }
        if template.is_empty() {
            chain
                .errors
                .push(format!("Error in section {section}: Template content is missing."));
        }
    }

    if chain.reports.is_empty() {
        chain
            .errors
            .push("Error: At least one section must have 'file' metadata.".to_string());
    }

    tracing::debug!(
        prompts = chain.prompts.len(),
        reports = chain.reports.len(),
        errors = chain.errors.len(),
        "parsed chain definition"
    );
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_drops_opening_fence() {
        assert_eq!(split_sections("---\na\n---\nb"), vec!["a", "b"]);
        assert_eq!(split_sections("a\n---\nb"), vec!["a", "b"]);
    }

    #[test]
    fn split_accepts_crlf() {
        assert_eq!(
            split_sections("output: x\r\n---\r\nbody\r\n---\r\nfile_suffix: r\r\n---\r\nrep"),
            vec!["output: x", "body", "file_suffix: r", "rep"]
        );
    }

    #[test]
    fn split_requires_whole_delimiter_line() {
        assert_eq!(split_sections("a\n----\nb"), vec!["a\n----\nb"]);
        assert_eq!(split_sections("a --- b"), vec!["a --- b"]);
    }

    #[test]
    fn description_single_line() {
        assert_eq!(
            description("description: Single line.\noutput: x"),
            Some("Single line.".into())
        );
    }

    #[test]
    fn description_indented_block() {
        let meta = "description: \n  first line\n  second line\noutput: x";
        assert_eq!(description(meta), Some("first line\nsecond line".into()));
    }

    #[test]
    fn description_empty_is_none() {
        assert_eq!(description("description:\noutput: x"), None);
        assert_eq!(description("output: x"), None);
    }

    #[test]
    fn keys_must_start_a_line() {
        assert_eq!(key_value(output_key(), "  output: x"), Some("x"));
        assert_eq!(key_value(output_key(), "my output: x"), None);
        assert_eq!(key_value(output_key(), "output:"), None);
    }

    #[test]
    fn legacy_extension_removed() {
        assert_eq!(legacy_suffix("summary.pdf"), "summary");
        assert_eq!(legacy_suffix("summary.md"), "summary");
        assert_eq!(legacy_suffix("summary.txt"), "summary.txt");
    }

    #[test]
    fn empty_body_still_records_step() {
        let chain = parse("output: a\n---\n\n---\nfile_suffix: r\n---\nx");
        assert_eq!(chain.prompts.len(), 1);
        assert!(chain.prompts[0].template.is_empty());
        assert_eq!(
            chain.errors,
            vec!["Error in section 1: Template content is missing."]
        );
    }

    #[test]
    fn file_suffix_wins_over_output() {
        let chain = parse("output: a\nfile_suffix: r\n---\nbody");
        assert!(chain.prompts.is_empty());
        assert_eq!(chain.reports[0].file_suffix, "r");
        assert!(chain.is_valid());
    }

    #[test]
    fn trailing_unpaired_piece_ignored() {
        let chain = parse("file_suffix: r\n---\nbody\n---\noutput: orphan");
        assert_eq!(chain.reports.len(), 1);
        assert!(chain.prompts.is_empty());
        assert!(chain.is_valid());
    }
}
