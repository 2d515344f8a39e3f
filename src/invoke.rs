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

// Executes one WS-Man operation against one endpoint through the external
// wsman tool and classifies the outcome. The out-of-band channel drops
// authentication and connections sporadically, so those two signatures are
// retried in place; everything else fails on the first attempt.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use tracing::debug;

use crate::parse::select_text;
use crate::transport::CommandRunner;
use crate::{Endpoint, WsmanError};

const WSMAN_BIN: &str = "wsman";

// Retries of one call beyond the first attempt, so 3 attempts total.
const MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// WS-Man operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Enumerate,
    Get,
    /// A named action on the resource, e.g. `InstallFromURI`.
    Invoke(String),
}

/// Per-call extras: selector paths to pull out of the response, keyed
/// input properties, and an optional input payload file.
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    pub selectors: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub input_file: Option<PathBuf>,
}

/// How a failed call output is classified, driving the retry decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Authentication,
    Connection,
    Other,
}

/// Scans captured tool output for the known transient signatures. The tool
/// reports these as free text rather than via exit status, so substring
/// matching mirrors its actual behavior.
pub fn classify_failure(captured: &str) -> FailureClass {
    if captured.contains("Authentication failed") {
        FailureClass::Authentication
    } else if captured.contains("Connection failed.") {
        FailureClass::Connection
    } else {
        FailureClass::Other
    }
}

/// Builds and runs wsman invocations with bounded retry of transient
/// failures.
pub struct WsmanInvoker {
    runner: Arc<dyn CommandRunner>,
    retry_delay: Duration,
}

impl WsmanInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        WsmanInvoker {
            runner,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Overrides the inter-retry delay. Tests run with zero.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Runs one operation and returns the raw response text.
    ///
    /// A call fails when the tool exits non-zero OR writes anything to its
    /// error stream; the tool does not reliably set exit status.
    pub fn invoke(
        &self,
        endpoint: &Endpoint,
        method: &Method,
        schema: &str,
        options: &InvokeOptions,
    ) -> Result<String, WsmanError> {
        let args = build_args(endpoint, method, schema, options);
        debug!(
            host = %endpoint.host,
            command = %redact(&args, &endpoint.password),
            "invoking wsman"
        );

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let output = self.runner.run(WSMAN_BIN, &args)?;
            if output.success && output.stderr.trim().is_empty() {
                return Ok(output.stdout);
            }

            let captured = format!("{}\n{}", output.stdout, output.stderr);
            let class = classify_failure(&captured);
            if class == FailureClass::Other {
                return Err(WsmanError::InvocationFailed {
                    host: endpoint.host.clone(),
                    stdout: output.stdout,
                    stderr: output.stderr,
                });
            }
            if attempts <= MAX_RETRIES {
                debug!(
                    host = %endpoint.host,
                    attempt = attempts,
                    ?class,
                    "transient wsman failure, retrying"
                );
                sleep(self.retry_delay);
                continue;
            }
            return Err(match class {
                FailureClass::Authentication => WsmanError::AuthenticationFailed {
                    host: endpoint.host.clone(),
                    attempts,
                },
                FailureClass::Connection => WsmanError::ConnectionFailed {
                    host: endpoint.host.clone(),
                    attempts,
                },
                FailureClass::Other => unreachable!(),
            });
        }
    }

    /// Runs one operation and extracts the text at each selector path of
    /// `options.selectors`, in the given order. A missing node fails the
    /// whole call.
    pub fn invoke_selected(
        &self,
        endpoint: &Endpoint,
        method: &Method,
        schema: &str,
        options: &InvokeOptions,
    ) -> Result<Vec<String>, WsmanError> {
        let raw = self.invoke(endpoint, method, schema, options)?;
        options
            .selectors
            .iter()
            .map(|selector| {
                select_text(&raw, selector).ok_or_else(|| WsmanError::InvalidResponse {
                    host: endpoint.host.clone(),
                    selector: selector.clone(),
                    body: raw.clone(),
                })
            })
            .collect()
    }
}

fn build_args(
    endpoint: &Endpoint,
    method: &Method,
    schema: &str,
    options: &InvokeOptions,
) -> Vec<String> {
    let mut args: Vec<String> = match method {
        Method::Enumerate => vec!["enumerate".into(), schema.into()],
        Method::Get => vec!["get".into(), schema.into()],
        Method::Invoke(action) => vec!["invoke".into(), "-a".into(), action.clone(), schema.into()],
    };
    args.extend(
        [
            "-h",
            endpoint.host.as_str(),
            "-P",
            "443",
            "-u",
            endpoint.user.as_str(),
            "-p",
            endpoint.password.as_str(),
            "-c",
            "dummy.cert",
            "-y",
            "basic",
            "-V",
            "-v",
            "-o",
            "-m",
            "256",
            "-j",
            "utf-8",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    for (key, value) in &options.properties {
        args.push("-k".into());
        args.push(format!("{key}={value}"));
    }
    if let Some(file) = &options.input_file {
        args.push("-J".into());
        args.push(file.display().to_string());
    }
    args
}

// The credential stays out of every logged argument list.
fn redact(args: &[String], password: &str) -> String {
    args.iter()
        .map(|a| if a == password { "*****" } else { a.as_str() })
        .collect::<Vec<_>>()
        .join(" ")
}
