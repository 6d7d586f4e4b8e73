//! Thin wrapper over `std::process::Command` for the system tools.

use crate::core::error::ConvertError;
use crate::core::output::compact_line;
use std::process::Command;

const STDERR_PREVIEW_CHARS: usize = 240;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stderr_preview(&self) -> String {
        compact_line(&self.stderr, STDERR_PREVIEW_CHARS)
    }

    /// Convert a non-zero exit into `CommandFailed`.
    pub fn into_checked(self, display: &str) -> Result<ToolOutput, ConvertError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ConvertError::CommandFailed {
                command: display.to_string(),
                code: self.code,
                stderr: self.stderr_preview(),
            })
        }
    }
}

/// Run `program` to completion. Only a spawn failure is an `Err`; exit
/// status is left to the caller.
pub fn run_tool(program: &str, args: &[&str]) -> Result<ToolOutput, ConvertError> {
    run_tool_logged_as(program, args, &args.join(" "))
}

/// Like `run_tool`, but logs `shown_args` in place of the real arguments.
pub fn run_tool_logged_as(
    program: &str,
    args: &[&str],
    shown_args: &str,
) -> Result<ToolOutput, ConvertError> {
    tracing::debug!(program, args = %shown_args, "running tool");
    let output = Command::new(program).args(args).output()?;
    let result = ToolOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    };
    if !result.success() {
        tracing::debug!(program, code = result.code, stderr = %result.stderr_preview(), "tool exited non-zero");
    }
    Ok(result)
}

pub fn display_command(program: &str, args: &[&str]) -> String {
    let mut out = program.to_string();
    for a in args {
        out.push(' ');
        if a.contains(' ') {
            out.push_str(&format!("'{}'", a));
        } else {
            out.push_str(a);
        }
    }
    out
}
