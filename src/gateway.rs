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

// Named, typed operations against one lifecycle controller, built from the
// invoker and the response parser. The orchestrator consumes these through
// the Controller trait so it can be driven against fakes in tests.

use std::thread::sleep;
use std::time::Duration;

use tracing::debug;

use crate::firmware::FirmwareItem;
use crate::invoke::{InvokeOptions, Method, WsmanInvoker};
use crate::parse::{self, enum_value, Envelope, REBOOT_JOB_TYPES};
use crate::{Endpoint, WsmanError};

const DCIM_BASE: &str = "http://schemas.dell.com/wbem/wscim/1/cim-schema/2";

pub const SOFTWARE_INSTALLATION_SERVICE: &str = "http://schemas.dell.com/wbem/wscim/1/cim-schema/2/DCIM_SoftwareInstallationService?CreationClassName=DCIM_SoftwareInstallationService,SystemCreationClassName=DCIM_ComputerSystem,SystemName=IDRAC:ID,Name=SoftwareUpdate";
pub const JOB_SERVICE: &str = "http://schemas.dell.com/wbem/wscim/1/cim-schema/2/DCIM_JobService?CreationClassName=DCIM_JobService,SystemCreationClassName=DCIM_ComputerSystem,SystemName=Idrac,Name=JobService";
pub const LC_SERVICE: &str = "http://schemas.dell.com/wbem/wscim/1/cim-schema/2/DCIM_LCService?SystemCreationClassName=DCIM_ComputerSystem,CreationClassName=DCIM_LCService,SystemName=DCIM:ComputerSystem,Name=DCIM:LCService";

pub const LIFECYCLE_JOB_CLASS: &str = "DCIM_LifecycleJob";
pub const SOFTWARE_IDENTITY_CLASS: &str = "DCIM_SoftwareIdentity";

// Soft clear removes pending jobs; the forced variant also restarts the
// job store when the queue is wedged.
const CLEAR_JOB_ID: &str = "JID_CLEARALL";
const CLEAR_JOB_ID_FORCE: &str = "JID_CLEARALL_FORCE";

// ReturnValue codes: immediate success, and job-created success.
const RET_OK: &str = "0";
const RET_JOB_CREATED: &str = "4096";

// Lifecycle job statuses that no longer occupy the queue.
const SETTLED_JOB_STATUSES: &[&str] = &[
    "Completed",
    "Failed",
    "Reboot Completed",
    "Completed with Errors",
];

const DEFAULT_READY_ATTEMPTS: u32 = 30;
const DEFAULT_READY_INTERVAL: Duration = Duration::from_secs(60);

/// One lifecycle job as reported by the controller.
#[derive(Debug, Clone)]
pub struct LifecycleJob {
    pub job_id: String,
    pub status: String,
    pub message: Option<String>,
}

/// The controller surface the firmware orchestrator runs against.
pub trait Controller: Send + Sync {
    /// Blocks until the Lifecycle Controller reports ready; bounded.
    fn wait_for_ready(&self) -> Result<(), WsmanError>;

    /// Deletes the pending job queue, forcibly when `force` is set.
    fn delete_job_queue(&self, force: bool) -> Result<(), WsmanError>;

    /// Number of jobs still occupying the queue.
    fn pending_job_count(&self) -> Result<usize, WsmanError>;

    /// Submits an install job for one firmware package and returns the job
    /// id the controller handed back, if any.
    fn install_from_uri(&self, item: &FirmwareItem) -> Result<Option<String>, WsmanError>;

    /// One status fetch, no retry. Callers own the polling cadence.
    fn job_status(&self, job_id: &str) -> Result<LifecycleJob, WsmanError>;

    /// Creates a host reboot job of the given type and returns its id.
    fn create_reboot_job(&self, reboot_type: &str) -> Result<String, WsmanError>;

    /// Schedules the listed jobs for execution now.
    fn setup_job_queue(&self, job_ids: &[String]) -> Result<(), WsmanError>;
}

/// WS-Man implementation of [`Controller`], plus the generic enumerate /
/// get / invoke operations it is built from.
pub struct WsmanGateway {
    invoker: WsmanInvoker,
    endpoint: Endpoint,
    ready_max_attempts: u32,
    ready_poll_interval: Duration,
}

impl WsmanGateway {
    pub fn new(invoker: WsmanInvoker, endpoint: Endpoint) -> Self {
        WsmanGateway {
            invoker,
            endpoint,
            ready_max_attempts: DEFAULT_READY_ATTEMPTS,
            ready_poll_interval: DEFAULT_READY_INTERVAL,
        }
    }

    /// Overrides the readiness polling bound and cadence.
    pub fn ready_polling(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.ready_max_attempts = max_attempts;
        self.ready_poll_interval = interval;
        self
    }

    /// Enumerates all instances of a DCIM class, one mapping per instance.
    pub fn enumerate(&self, class: &str) -> Result<Vec<Envelope>, WsmanError> {
        let schema = format!("{DCIM_BASE}/{class}");
        let raw = self.invoker.invoke(
            &self.endpoint,
            &Method::Enumerate,
            &schema,
            &InvokeOptions::default(),
        )?;
        parse::parse_enumeration(&raw).map_err(|err| match err {
            WsmanError::Fault { code, reason } => WsmanError::EnumerationFailed {
                collection: class.to_string(),
                fields: format!("code: {code}, reason: {reason}"),
            },
            other => other,
        })
    }

    /// Enumerates the installed and available software identity inventory.
    pub fn software_identities(&self) -> Result<Vec<Envelope>, WsmanError> {
        self.enumerate(SOFTWARE_IDENTITY_CLASS)
    }

    /// Fetches one instance of a DCIM class by InstanceID.
    pub fn get(&self, class: &str, instance_id: &str) -> Result<Envelope, WsmanError> {
        let schema = format!("{DCIM_BASE}/{class}?InstanceID={instance_id}");
        let raw = self.invoker.invoke(
            &self.endpoint,
            &Method::Get,
            &schema,
            &InvokeOptions::default(),
        )?;
        match parse::parse(&raw, true)? {
            Some(envelope) => Ok(envelope),
            None => Err(WsmanError::MalformedResponse {
                reason: format!("empty {class} response"),
                body: raw,
            }),
        }
    }

    /// Invokes a named action, validating parameter presence before any
    /// network call and the decoded return value after it.
    ///
    /// Parameters named in `url_params` are bound to the schema as query
    /// parameters; everything else travels as keyed input properties.
    pub fn invoke_method(
        &self,
        action: &str,
        schema: &str,
        params: &[(String, String)],
        required: &[&str],
        url_params: &[&str],
        expected_return: Option<&str>,
    ) -> Result<Envelope, WsmanError> {
        let missing: Vec<String> = required
            .iter()
            .chain(url_params.iter())
            .filter(|name| !params.iter().any(|(key, _)| key == **name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(WsmanError::MissingParameters {
                method: action.to_string(),
                names: missing,
            });
        }

        let mut schema = schema.to_string();
        let mut options = InvokeOptions::default();
        for (key, value) in params {
            if url_params.contains(&key.as_str()) {
                let sep = if schema.contains('?') { ',' } else { '?' };
                schema.push(sep);
                schema.push_str(&format!("{key}={value}"));
            } else {
                options.properties.push((key.clone(), value.clone()));
            }
        }

        let raw = self.invoker.invoke(
            &self.endpoint,
            &Method::Invoke(action.to_string()),
            &schema,
            &options,
        )?;
        let envelope = match parse::parse(&raw, true)? {
            Some(envelope) => envelope,
            None => {
                return Err(WsmanError::MalformedResponse {
                    reason: format!("empty {action} response"),
                    body: raw,
                })
            }
        };

        if let Some(expected) = expected_return {
            let actual = envelope
                .get("return_value")
                .cloned()
                .flatten()
                .unwrap_or_default();
            if actual != expected {
                return Err(WsmanError::UnexpectedReturnValue {
                    method: action.to_string(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        Ok(envelope)
    }
}

impl Controller for WsmanGateway {
    fn wait_for_ready(&self) -> Result<(), WsmanError> {
        for attempt in 1..=self.ready_max_attempts {
            let status =
                self.invoke_method("GetRemoteServicesAPIStatus", LC_SERVICE, &[], &[], &[], None)?;
            let lc_status = status.get("lcstatus").cloned().flatten().unwrap_or_default();
            if lc_status == "0" {
                return Ok(());
            }
            debug!(
                host = %self.endpoint.host,
                attempt,
                %lc_status,
                "Lifecycle Controller not ready"
            );
            if attempt < self.ready_max_attempts {
                sleep(self.ready_poll_interval);
            }
        }
        Err(WsmanError::ControllerBusy {
            host: self.endpoint.host.clone(),
            attempts: self.ready_max_attempts,
        })
    }

    fn delete_job_queue(&self, force: bool) -> Result<(), WsmanError> {
        let job_id = if force { CLEAR_JOB_ID_FORCE } else { CLEAR_JOB_ID };
        self.invoke_method(
            "DeleteJobQueue",
            JOB_SERVICE,
            &[("JobID".to_string(), job_id.to_string())],
            &["JobID"],
            &[],
            Some(RET_OK),
        )
        .map(|_| ())
    }

    fn pending_job_count(&self) -> Result<usize, WsmanError> {
        let jobs = self.enumerate(LIFECYCLE_JOB_CLASS)?;
        Ok(jobs
            .iter()
            .filter(|job| {
                let status = job
                    .get("job_status")
                    .cloned()
                    .flatten()
                    .unwrap_or_default();
                !SETTLED_JOB_STATUSES.contains(&status.as_str())
            })
            .count())
    }

    fn install_from_uri(&self, item: &FirmwareItem) -> Result<Option<String>, WsmanError> {
        let mut params = vec![("URI".to_string(), item.uri_path.clone())];
        params.push(("Target".to_string(), item.instance_id.clone()));
        let envelope = self.invoke_method(
            "InstallFromURI",
            SOFTWARE_INSTALLATION_SERVICE,
            &params,
            &["URI", "Target"],
            &[],
            Some(RET_JOB_CREATED),
        )?;
        Ok(envelope
            .get("job")
            .cloned()
            .flatten()
            .filter(|id| !id.is_empty()))
    }

    fn job_status(&self, job_id: &str) -> Result<LifecycleJob, WsmanError> {
        let envelope = self.get(LIFECYCLE_JOB_CLASS, job_id)?;
        Ok(LifecycleJob {
            job_id: job_id.to_string(),
            status: envelope
                .get("job_status")
                .cloned()
                .flatten()
                .unwrap_or_default(),
            message: envelope.get("message").cloned().flatten(),
        })
    }

    fn create_reboot_job(&self, reboot_type: &str) -> Result<String, WsmanError> {
        let code = enum_value("reboot job type", REBOOT_JOB_TYPES, reboot_type, true)?;
        let envelope = self.invoke_method(
            "CreateRebootJob",
            SOFTWARE_INSTALLATION_SERVICE,
            &[("RebootJobType".to_string(), code)],
            &["RebootJobType"],
            &[],
            Some(RET_JOB_CREATED),
        )?;
        envelope
            .get("reboot_job_id")
            .cloned()
            .flatten()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| WsmanError::MalformedResponse {
                reason: "CreateRebootJob returned no job id".to_string(),
                body: format!("{envelope:?}"),
            })
    }

    fn setup_job_queue(&self, job_ids: &[String]) -> Result<(), WsmanError> {
        let mut params: Vec<(String, String)> = job_ids
            .iter()
            .map(|id| ("JobArray".to_string(), id.clone()))
            .collect();
        params.push(("StartTimeInterval".to_string(), "TIME_NOW".to_string()));
        self.invoke_method(
            "SetupJobQueue",
            JOB_SERVICE,
            &params,
            &["JobArray", "StartTimeInterval"],
            &[],
            Some(RET_OK),
        )
        .map(|_| ())
    }
}
