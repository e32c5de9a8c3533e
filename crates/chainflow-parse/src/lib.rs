//! Parser for chainflow chain definitions.
//!
//! A chain definition is a sequence of `---`-delimited sections read in
//! (metadata, body) pairs. Metadata carrying `output:` makes the body a prompt
//! step; `file_suffix:` (or the older `file:`) makes it a report step. Bodies
//! are templates with `{name}` placeholders, handled by [`template`].
//!
//! # Example
//! ```
//! let text = "output: idea\n---\nAn idea about {seed}\n---\nfile_suffix: report\n---\n# {idea}";
//! let chain = chainflow_parse::parse(text);
//! assert!(chain.is_valid());
//! assert_eq!(chain.prompts[0].output, "idea");
//! assert_eq!(chain.reports[0].file_suffix, "report");
//! ```

pub mod ast;
mod parser;
pub mod template;
pub mod validation;

pub use ast::*;
pub use parser::parse;
pub use template::{render, variable_names, RenderError};
pub use validation::{validate, validate_or_raise, Diagnostic, Severity};
