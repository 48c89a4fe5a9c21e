use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// A single external-tool invocation with structured arguments.
///
/// Arguments are passed straight to the process, never through a shell.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Appends `--name=value`, the FSL option style.
    pub fn option(mut self, name: &str, value: impl AsRef<OsStr>) -> Self {
        let mut arg = OsString::from(format!("--{name}="));
        arg.push(value.as_ref());
        self.args.push(arg);
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Run to completion, capturing stderr for the error path.
    pub fn run(&self) -> PipelineResult<()> {
        debug!(command = %self, "running external tool");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| PipelineError::Launch {
                program: self.program_name(),
                source,
            })?;

        if output.status.success() {
            return Ok(());
        }

        Err(PipelineError::ExternalTool {
            program: self.program_name(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}
