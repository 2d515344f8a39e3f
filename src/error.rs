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

#[derive(thiserror::Error, Debug)]
pub enum WsmanError {
    #[error("Endpoint is missing required fields: {}", fields.join(", "))]
    IncompleteEndpoint { fields: Vec<String> },

    #[error("Failed to start [{command}]: {source}")]
    CommandSpawn {
        command: String,
        source: std::io::Error,
    },

    #[error("Authentication failed at {host} after {attempts} attempts")]
    AuthenticationFailed { host: String, attempts: u32 },

    #[error("Connection failed at {host} after {attempts} attempts")]
    ConnectionFailed { host: String, attempts: u32 },

    #[error("wsman invocation failed at {host}. stdout: {stdout} stderr: {stderr}")]
    InvocationFailed {
        host: String,
        stdout: String,
        stderr: String,
    },

    #[error("Malformed response: {reason}. Body: {body}")]
    MalformedResponse { reason: String, body: String },

    #[error("No node found for selector {selector} in response from {host}. Body: {body}")]
    InvalidResponse {
        host: String,
        selector: String,
        body: String,
    },

    #[error("SOAP fault {code}: {reason}")]
    Fault { code: String, reason: String },

    #[error("Invalid {name} value '{value}'. Allowed: {allowed}")]
    InvalidEnumValue {
        name: String,
        value: String,
        allowed: String,
    },

    #[error("Missing parameters for {method}: {}", names.join(", "))]
    MissingParameters { method: String, names: Vec<String> },

    #[error("{method} returned {actual}, expected {expected}")]
    UnexpectedReturnValue {
        method: String,
        expected: String,
        actual: String,
    },

    #[error("{collection} enumeration failed: {fields}")]
    EnumerationFailed { collection: String, fields: String },

    #[error("Lifecycle Controller at {host} still busy after {attempts} status checks")]
    ControllerBusy { host: String, attempts: u32 },

    #[error("Job queue still holds {count} pending jobs after a clear")]
    JobQueueNotEmpty { count: usize },

    #[error("Could not clear the job queue; giving up after 3 reset cycles")]
    JobQueueClearFailed,

    #[error("No job id returned for firmware {instance_id} from {uri_path}")]
    MissingJobId {
        instance_id: String,
        uri_path: String,
    },

    #[error("Received empty firmware item list, nothing to install")]
    NoFirmwareItems,

    #[error("Job queue setup failed after {attempts} attempts: {reason}")]
    JobQueueSetupFailed { attempts: u32, reason: String },

    #[error("Reboot job {job_id} did not complete within the wait budget")]
    RebootTimeout { job_id: String },

    #[error("Firmware update failed for: {}", failures.join("; "))]
    FirmwareUpdateFailed { failures: Vec<String> },

    #[error("Hardware reset failed: {reason}")]
    ResetFailed { reason: String },
}
