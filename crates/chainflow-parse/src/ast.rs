use serde::{Deserialize, Serialize};

use chainflow_types::{ChainflowError, Result};

/// A generation stage: its rendered template is sent to the backend and the
/// reply is stored under `output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptStep {
    /// 1-based index of the metadata/body pair this step came from.
    pub section: usize,
    pub description: Option<String>,
    pub output: String,
    pub template: String,
}

/// A rendering stage: a markdown template filled from the final variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStep {
    pub section: usize,
    pub description: Option<String>,
    pub file_suffix: String,
    pub template: String,
}

/// Result of parsing a chain definition.
///
/// A non-empty `errors` list means the chain must not be executed, even
/// though `prompts` and `reports` may be partially populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedChain {
    pub prompts: Vec<PromptStep>,
    pub reports: Vec<ReportStep>,
    pub errors: Vec<String>,
}

impl ParsedChain {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Split into the step lists, or fail with every collected error.
    pub fn into_result(self) -> Result<(Vec<PromptStep>, Vec<ReportStep>)> {
        if self.errors.is_empty() {
            Ok((self.prompts, self.reports))
        } else {
            Err(ChainflowError::InvalidChain(self.errors))
        }
    }
}
