/*
 * SPDX-License-Identifier: MIT
 *
 * Permission is hereby granted, free of charge, to any person obtaining a
 * copy of this software and associated documentation files (the "Software"),
 * to deal in the Software without restriction, including without limitation
 * the rights to use, copy, modify, merge, publish, distribute, sublicense,
 * and/or sell copies of the Software, and to permit persons to whom the
 * Software is furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in
 * all copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL
 * THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
 * FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
 * DEALINGS IN THE SOFTWARE.
 */

// The two external boundaries of this crate: running the wsman command
// line tool, and asking the controller for a hard reset. Both are traits
// so callers and tests can substitute their own implementations.

use std::process::Command;

use crate::WsmanError;

/// Captured result of one external tool invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Whether the process reported a zero exit status. The wsman tool does
    /// not set this reliably, so callers must also inspect `stderr`.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Boundary for executing the external protocol tool. The real
/// implementation is [`ProcessRunner`]; tests script their own.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, WsmanError>;
}

/// Runs the tool as a child process and captures its output.
#[derive(Debug, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, WsmanError> {
        let output =
            Command::new(program)
                .args(args)
                .output()
                .map_err(|source| WsmanError::CommandSpawn {
                    command: program.to_string(),
                    source,
                })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Boundary for triggering a soft reset of the management controller,
/// used when the job queue refuses to clear. The shipped crate has no
/// implementation; the embedding application provides one (usually a
/// one-line remote shell command against the endpoint).
pub trait BmcReset: Send + Sync {
    fn reset(&self) -> Result<(), WsmanError>;
}
