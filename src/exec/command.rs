// src/exec/command.rs

//! Model command templates.
//!
//! A template is a program plus an argument vector in which `{prompt}` is
//! replaced by the prompt text and `{prompt_file}` by the prompt path. The
//! result is always an argv; nothing is ever handed to a shell.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SeqError};
use crate::types::Model;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandTemplate {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandTemplate {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Built-in template for each model.
    pub fn default_for(model: Model) -> Self {
        match model {
            Model::ClaudeCode => Self::new("claude", &["-p", "{prompt}"]),
            Model::Codex => Self::new("codex", &["exec", "{prompt}"]),
            Model::Gemini => Self::new("gemini", &["-p", "{prompt}"]),
        }
    }

    pub fn render(&self, prompt_file: &str, prompt: &str) -> CommandLine {
        let args = self
            .args
            .iter()
            .map(|a| {
                a.replace("{prompt_file}", prompt_file)
                    .replace("{prompt}", prompt)
            })
            .collect();

        CommandLine {
            program: self.program.clone(),
            args,
        }
    }

    pub fn needs_prompt_text(&self) -> bool {
        self.args.iter().any(|a| a.contains("{prompt}"))
    }
}

/// A concrete program + argv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Space-joined form, used for policy matching and logs.
impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Render `template` for a step whose prompt lives at `prompt_file`
/// (relative to `root` unless absolute).
pub fn build_command(
    template: &CommandTemplate,
    root: &Path,
    prompt_file: &str,
) -> Result<CommandLine> {
    let prompt = if template.needs_prompt_text() {
        let path = root.join(prompt_file);
        match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SeqError::NotFound(format!("prompt file '{prompt_file}'")));
            }
            Err(e) => return Err(e.into()),
        }
    } else {
        String::new()
    };

    Ok(template.render(prompt_file, &prompt))
}
