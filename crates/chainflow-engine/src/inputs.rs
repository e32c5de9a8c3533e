//! Inference of the variables a chain needs from its caller.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use chainflow_parse::template::{is_well_formed, variable_names};
use chainflow_parse::PromptStep;
use chainflow_types::Variables;

/// How the inputs of a chain are derived from its templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// Only the placeholders of the first step count as inputs.
    FirstStep,
    /// Every placeholder not produced by an earlier step.
    #[default]
    Closure,
}

impl std::str::FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-step" => Ok(InputMode::FirstStep),
            "closure" => Ok(InputMode::Closure),
            other => Err(format!(
                "unknown input mode '{other}' (expected 'first-step' or 'closure')"
            )),
        }
    }
}

/// Names the chain expects to be supplied before it runs, in first-seen order.
pub fn declared_inputs(steps: &[PromptStep], mode: InputMode) -> Vec<String> {
    match mode {
        InputMode::FirstStep => steps
            .first()
            .map(|step| {
                variable_names(&step.template)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        InputMode::Closure => {
            let mut produced: HashSet<&str> = HashSet::new();
            let mut inputs: Vec<String> = Vec::new();
            for step in steps {
                for name in variable_names(&step.template) {
                    if is_well_formed(name)
                        && !produced.contains(name)
                        && !inputs.iter().any(|i| i == name)
                    {
                        inputs.push(name.to_string());
                    }
                }
                produced.insert(step.output.as_str());
            }
            inputs
        }
    }
}

/// The first step referencing a name that neither `available` nor an
/// earlier step provides, with that name.
pub fn first_unresolved<'a>(
    steps: &'a [PromptStep],
    available: &Variables,
) -> Option<(&'a PromptStep, &'a str)> {
    let mut known: HashSet<&str> = available.keys().map(String::as_str).collect();
    for step in steps {
        if let Some(name) = variable_names(&step.template)
            .into_iter()
            .find(|name| is_well_formed(name) && !known.contains(name))
        {
            return Some((step, name));
        }
        known.insert(step.output.as_str());
    }
    None
}
