use std::{io, path::Path};

use serde::Deserialize;

pub const DESCRIPTOR_FILE: &str = ".deployer.yaml";

/// Branch-specific deployment instructions, read from [`DESCRIPTOR_FILE`] in
/// the root of the working copy.
///
/// ```yaml
/// shell: /bin/sh
/// shell-args: ["-c"]
/// env:
///   - RUST_LOG=info
/// commands:
///   - cargo build --release
///   - systemctl --user restart widgets
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DeployDescriptor {
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub shell_args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DescriptorError {
    #[error("failed to read {file}: {0}", file = DESCRIPTOR_FILE)]
    Read(#[from] io::Error),
    #[error("failed to parse {file}: {0}", file = DESCRIPTOR_FILE)]
    Parse(#[from] serde_yaml::Error),
}

/// Program and arguments for one descriptor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl DeployDescriptor {
    pub fn load(dir: &Path) -> Result<Self, DescriptorError> {
        let raw = std::fs::read_to_string(dir.join(DESCRIPTOR_FILE))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Without a shell the command is split on whitespace, with one it is
    /// handed to the shell as a single trailing argument.
    pub fn invocation(&self, command: &str) -> Option<Invocation> {
        match self.shell.as_deref().filter(|shell| !shell.is_empty()) {
            Some(shell) => Some(Invocation {
                program: shell.to_owned(),
                args: self
                    .shell_args
                    .iter()
                    .cloned()
                    .chain(std::iter::once(command.to_owned()))
                    .collect(),
            }),
            None => {
                let mut parts = command.split_whitespace().map(str::to_owned);
                let program = parts.next()?;
                Some(Invocation {
                    program,
                    args: parts.collect(),
                })
            }
        }
    }

    /// `KEY=VALUE` entries of `env`. Entries without `=` are skipped.
    pub fn env_overrides(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key, value)),
            _ => {
                tracing::warn!("Ignoring malformed environment entry `{}`", entry);
                None
            }
        })
    }
}
