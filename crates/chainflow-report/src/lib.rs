//! Report rendering for chainflow runs.
//!
//! Report steps are markdown templates filled from the final variables of a
//! run. Each rendered report is written once per requested [`ReportFormat`]
//! as `{run}_{suffix}_{YYYY-mm-dd-HH-MM-SS}.{ext}`.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use pulldown_cmark::{html, Options, Parser};
use serde::{Deserialize, Serialize};

use chainflow_parse::{render, ReportStep};
use chainflow_types::{Result, Variables};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

// ---------------------------------------------------------------------------
// ReportFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Markdown,
    Html,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "md",
            ReportFormat::Html => "html",
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Fill a report template from the run's variables.
pub fn render_report(step: &ReportStep, vars: &Variables) -> Result<String> {
    render(&step.template, vars).map_err(|e| e.for_step(&step.file_suffix))
}

/// `{run_name}_{file_suffix}_{YYYY-mm-dd-HH-MM-SS}.{ext}`
pub fn report_file_name(
    run_name: &str,
    file_suffix: &str,
    timestamp: NaiveDateTime,
    format: ReportFormat,
) -> String {
    format!(
        "{run_name}_{file_suffix}_{}.{}",
        timestamp.format(TIMESTAMP_FORMAT),
        format.extension()
    )
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Convert markdown into a standalone HTML document.
pub fn markdown_to_html(markdown: &str, title: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut body = String::new();
    html::push_html(&mut body, Parser::new_ext(markdown, options));

    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n{body}</body>\n</html>\n",
        escape_text(title)
    )
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Paths written by [`generate_reports`], grouped by format in report order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportFiles {
    pub markdown: Vec<PathBuf>,
    pub html: Vec<PathBuf>,
}

impl ReportFiles {
    pub fn files(&self, format: ReportFormat) -> &[PathBuf] {
        match format {
            ReportFormat::Markdown => &self.markdown,
            ReportFormat::Html => &self.html,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markdown.is_empty() && self.html.is_empty()
    }

    fn push(&mut self, format: ReportFormat, path: PathBuf) {
        match format {
            ReportFormat::Markdown => self.markdown.push(path),
            ReportFormat::Html => self.html.push(path),
        }
    }
}

/// Render every report and write one file per requested format, stamped
/// with the current local time.
pub fn generate_reports(
    out_dir: &Path,
    run_name: &str,
    reports: &[ReportStep],
    formats: &[ReportFormat],
    vars: &Variables,
) -> Result<ReportFiles> {
    generate_reports_at(
        out_dir,
        run_name,
        reports,
        formats,
        vars,
        chrono::Local::now().naive_local(),
    )
}

/// [`generate_reports`] with an explicit timestamp.
pub fn generate_reports_at(
    out_dir: &Path,
    run_name: &str,
    reports: &[ReportStep],
    formats: &[ReportFormat],
    vars: &Variables,
    timestamp: NaiveDateTime,
) -> Result<ReportFiles> {
    let mut files = ReportFiles::default();
    if formats.is_empty() {
        return Ok(files);
    }

    // render everything first so a bad template writes nothing
    let rendered: Vec<(&ReportStep, String)> = reports
        .iter()
        .map(|step| render_report(step, vars).map(|text| (step, text)))
        .collect::<Result<_>>()?;

    std::fs::create_dir_all(out_dir)?;

    for (step, markdown) in &rendered {
        for &format in formats {
            let path = out_dir.join(report_file_name(run_name, &step.file_suffix, timestamp, format));
            let contents = match format {
                ReportFormat::Markdown => markdown.clone(),
                ReportFormat::Html => markdown_to_html(markdown, &step.file_suffix),
            };
            std::fs::write(&path, contents)?;
            tracing::info!(path = %path.display(), format = ?format, "Wrote report");
            files.push(format, path);
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainflow_types::ChainflowError;
    use chrono::NaiveDate;

    fn timestamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap()
    }

    fn report(suffix: &str, template: &str) -> ReportStep {
        ReportStep {
            section: 1,
            description: None,
            file_suffix: suffix.into(),
            template: template.into(),
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn file_name_layout() {
        assert_eq!(
            report_file_name("acme", "summary", timestamp(), ReportFormat::Markdown),
            "acme_summary_2024-03-09-14-05-07.md"
        );
        assert_eq!(
            report_file_name("acme", "summary", timestamp(), ReportFormat::Html),
            "acme_summary_2024-03-09-14-05-07.html"
        );
    }

    #[test]
    fn render_report_substitutes_values() {
        let text = render_report(&report("r", "Template content {key}"), &vars(&[("key", "value")]))
            .unwrap();
        assert_eq!(text, "Template content value");
    }

    #[test]
    fn render_report_missing_variable_names_report() {
        let err = render_report(&report("summary", "{absent}"), &vars(&[])).unwrap_err();
        assert!(matches!(
            err,
            ChainflowError::MissingVariable { ref step, ref variable } if step == "summary" && variable == "absent"
        ));
    }

    #[test]
    fn html_document_wraps_rendered_markdown() {
        let html = markdown_to_html("# Title\n\n| a | b |\n|---|---|\n| 1 | 2 |\n", "R&D <plan>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<table>"));
        assert!(html.contains("<title>R&amp;D &lt;plan&gt;</title>"));
    }

    #[test]
    fn generate_writes_one_file_per_format() {
        let dir = tempfile::tempdir().unwrap();
        let reports = vec![report("one", "# {seed}"), report("two", "*{idea}*")];
        let files = generate_reports_at(
            dir.path(),
            "run",
            &reports,
            &[ReportFormat::Markdown, ReportFormat::Html],
            &vars(&[("seed", "S"), ("idea", "I")]),
            timestamp(),
        )
        .unwrap();

        assert_eq!(files.markdown.len(), 2);
        assert_eq!(files.html.len(), 2);
        assert_eq!(
            files.markdown[0],
            dir.path().join("run_one_2024-03-09-14-05-07.md")
        );
        assert_eq!(std::fs::read_to_string(&files.markdown[0]).unwrap(), "# S");
        let html = std::fs::read_to_string(&files.html[1]).unwrap();
        assert!(html.contains("<em>I</em>"));
        assert_eq!(files.files(ReportFormat::Html), files.html.as_slice());
    }

    #[test]
    fn generate_creates_missing_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("reports");
        let files = generate_reports(
            &out,
            "run",
            &[report("r", "static")],
            &[ReportFormat::Markdown],
            &vars(&[]),
        )
        .unwrap();
        assert_eq!(files.markdown.len(), 1);
        assert!(files.markdown[0].starts_with(&out));
        assert!(files.markdown[0].exists());
    }

    #[test]
    fn no_formats_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("unused");
        let files =
            generate_reports(&out, "run", &[report("r", "x")], &[], &vars(&[])).unwrap();
        assert!(files.is_empty());
        assert!(!out.exists());
    }

    #[test]
    fn bad_template_writes_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let reports = vec![report("good", "ok"), report("bad", "{missing}")];
        let result = generate_reports(
            dir.path(),
            "run",
            &reports,
            &[ReportFormat::Markdown],
            &vars(&[]),
        );
        assert!(result.is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn report_files_serialize() {
        let files = ReportFiles {
            markdown: vec![PathBuf::from("a.md")],
            html: vec![],
        };
        let json = serde_json::to_value(&files).unwrap();
        assert_eq!(json["markdown"][0], "a.md");
    }
}
