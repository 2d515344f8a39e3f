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

// The firmware deployment pipeline: clear the controller's job queue
// (escalating to a hard reset when it refuses), submit one install job per
// package, schedule the reboot that applies them, and wait every job out
// to a terminal state. The whole pipeline is one sequential thread of
// control; every wait is an explicit bounded loop with a sleep.

use std::fmt;
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::gateway::Controller;
use crate::transport::BmcReset;
use crate::WsmanError;

// Dell component ids for controller-resident firmware.
pub const COMPONENT_IDRAC: &str = "25227";
pub const COMPONENT_LIFECYCLE_CONTROLLER: &str = "28897";
pub const COMPONENT_UEFI_DIAGNOSTICS: &str = "196545";
pub const COMPONENT_DRIVER_PACK: &str = "18981";
pub const COMPONENT_OS_COLLECTOR: &str = "101734";

// Controller-resident firmware must be flashed before anything else and
// with the Lifecycle Controller otherwise idle.
const PRE_UPDATE_COMPONENT_IDS: &[&str] = &[COMPONENT_IDRAC, COMPONENT_LIFECYCLE_CONTROLLER];

// Components whose update takes effect without a host power cycle.
const NO_REBOOT_COMPONENT_IDS: &[&str] = &[
    COMPONENT_IDRAC,
    COMPONENT_LIFECYCLE_CONTROLLER,
    COMPONENT_UEFI_DIAGNOSTICS,
    COMPONENT_DRIVER_PACK,
    COMPONENT_OS_COLLECTOR,
];

const QUEUE_CLEAR_ATTEMPTS: u32 = 3;
const QUEUE_SETUP_ATTEMPTS: u32 = 4;

/// One firmware package to install, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareItem {
    /// Software identity instance the package targets.
    pub instance_id: String,
    /// Location of the package on the share, e.g. `nfs://10.0.0.5/bios.exe`.
    pub uri_path: String,
    /// Dell component id, when known. Drives reboot classification.
    #[serde(default)]
    pub component_id: Option<String>,
}

/// Install job state as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    New,
    Downloaded,
    Completed,
    Scheduled,
    Failed,
    /// The per-item wait budget ran out before the controller reported a
    /// terminal status.
    InternalTimeout,
    /// A status fetch failed; polling continues.
    TemporaryFailure,
}

impl JobState {
    fn from_status(status: &str) -> JobState {
        match status {
            "Downloaded" => JobState::Downloaded,
            "Completed" | "Reboot Completed" => JobState::Completed,
            "Scheduled" => JobState::Scheduled,
            "Failed" | "Completed with Errors" => JobState::Failed,
            _ => JobState::New,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::New => "new",
            JobState::Downloaded => "Downloaded",
            JobState::Completed => "Completed",
            JobState::Scheduled => "Scheduled",
            JobState::Failed => "Failed",
            JobState::InternalTimeout => "InternalTimeout",
            JobState::TemporaryFailure => "TemporaryFailure",
        };
        f.write_str(name)
    }
}

/// One submitted install job. `desired` is fixed at submission time and
/// never recomputed; once the job is terminal it is not polled again.
#[derive(Debug, Clone)]
pub struct FirmwareJob {
    pub job_id: String,
    pub status: JobState,
    pub firmware: FirmwareItem,
    pub desired: JobState,
    pub reboot_required: bool,
    started: Instant,
}

impl FirmwareJob {
    fn is_terminal(&self) -> bool {
        self.status == self.desired
            || self.status == JobState::Failed
            || self.status == JobState::InternalTimeout
    }
}

/// The end state an item should reach, and whether a host reboot is needed
/// to get there. No-reboot components always settle at Completed; anything
/// else completes only if we force a power cycle, otherwise it parks at
/// Scheduled until the host next reboots.
pub fn desired_end_state(item: &FirmwareItem, force_restart: bool) -> (JobState, bool) {
    let no_reboot = item
        .component_id
        .as_deref()
        .is_some_and(|id| NO_REBOOT_COMPONENT_IDS.contains(&id));
    if no_reboot {
        (JobState::Completed, false)
    } else if force_restart {
        (JobState::Completed, true)
    } else {
        (JobState::Scheduled, true)
    }
}

/// Suspension intervals and wait bounds of the pipeline. Defaults match
/// production cadence; tests shrink them to zero.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Settle time after a queue clear before re-checking readiness.
    pub queue_settle: Duration,
    /// Settle time after a hardware reset.
    pub reset_settle: Duration,
    /// Poll interval for job status sweeps.
    pub poll_interval: Duration,
    /// Delay between job queue setup attempts.
    pub queue_setup_retry_delay: Duration,
    /// Per-job budget from submission to a terminal status.
    pub wait_budget: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            queue_settle: Duration::from_secs(30),
            reset_settle: Duration::from_secs(180),
            poll_interval: Duration::from_secs(30),
            queue_setup_retry_delay: Duration::from_secs(10),
            wait_budget: Duration::from_secs(3600),
        }
    }
}

/// Drives the deployment pipeline against one controller. All state is
/// in-memory for the duration of one `install` call; concurrent runs
/// against the same endpoint are not coordinated.
pub struct FirmwareOrchestrator<'a> {
    controller: &'a dyn Controller,
    reset: &'a dyn BmcReset,
    timing: Timing,
}

impl<'a> FirmwareOrchestrator<'a> {
    pub fn new(controller: &'a dyn Controller, reset: &'a dyn BmcReset) -> Self {
        FirmwareOrchestrator {
            controller,
            reset,
            timing: Timing::default(),
        }
    }

    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Installs every listed firmware package, in two waves: controller
    /// firmware first, everything else after the controller comes back.
    pub fn install(&self, items: &[FirmwareItem], force_restart: bool) -> Result<(), WsmanError> {
        if items.is_empty() {
            return Err(WsmanError::NoFirmwareItems);
        }

        self.controller.wait_for_ready()?;
        self.clear_job_queue_retry()?;

        let (pre, main): (Vec<&FirmwareItem>, Vec<&FirmwareItem>) = items.iter().partition(|item| {
            item.component_id
                .as_deref()
                .is_some_and(|id| PRE_UPDATE_COMPONENT_IDS.contains(&id))
        });

        if !pre.is_empty() {
            info!(count = pre.len(), "installing controller firmware first");
            self.update_firmware(&pre, force_restart)?;
            self.controller.wait_for_ready()?;
        }
        if !main.is_empty() {
            self.update_firmware(&main, force_restart)?;
        }

        // Confirm a consistent post-update state.
        self.controller.wait_for_ready()
    }

    // Clear-verify sequence with reset escalation. Attempt 1 asks nicely;
    // attempts 2 and 3 force the clear after a hard reset.
    fn clear_job_queue_retry(&self) -> Result<(), WsmanError> {
        for attempt in 1..=QUEUE_CLEAR_ATTEMPTS {
            match self.clear_job_queue_once(attempt > 1) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, %err, "job queue clear failed");
                    if attempt < QUEUE_CLEAR_ATTEMPTS {
                        if let Err(reset_err) = self.reset.reset() {
                            warn!(%reset_err, "hardware reset failed, retrying anyway");
                        }
                        sleep(self.timing.reset_settle);
                    }
                }
            }
        }
        Err(WsmanError::JobQueueClearFailed)
    }

    fn clear_job_queue_once(&self, force: bool) -> Result<(), WsmanError> {
        self.controller.wait_for_ready()?;
        self.controller.delete_job_queue(force)?;
        sleep(self.timing.queue_settle);
        self.controller.wait_for_ready()?;
        let count = self.controller.pending_job_count()?;
        if count != 0 {
            return Err(WsmanError::JobQueueNotEmpty { count });
        }
        Ok(())
    }

    fn update_firmware(
        &self,
        items: &[&FirmwareItem],
        force_restart: bool,
    ) -> Result<(), WsmanError> {
        let mut jobs = Vec::with_capacity(items.len());
        for item in items {
            let job_id = self
                .controller
                .install_from_uri(item)?
                .ok_or_else(|| WsmanError::MissingJobId {
                    instance_id: item.instance_id.clone(),
                    uri_path: item.uri_path.clone(),
                })?;
            info!(%job_id, instance_id = %item.instance_id, "install job submitted");

            let (desired, reboot_required) = desired_end_state(item, force_restart);
            let mut job = FirmwareJob {
                job_id,
                status: JobState::New,
                firmware: (*item).clone(),
                desired,
                reboot_required,
                started: Instant::now(),
            };
            self.wait_for_download(&mut job);
            jobs.push(job);
        }

        self.schedule_reboot(&jobs, force_restart)?;

        self.wait_for_end_state(&mut jobs, JobState::Scheduled);
        self.wait_for_end_state(&mut jobs, JobState::Completed);

        let failures: Vec<String> = jobs
            .iter()
            .filter(|job| {
                job.status == JobState::Failed || job.status == JobState::InternalTimeout
            })
            .map(|job| {
                format!(
                    "{} ({}) job {}: {}",
                    job.firmware.instance_id, job.firmware.uri_path, job.job_id, job.status
                )
            })
            .collect();
        if !failures.is_empty() {
            return Err(WsmanError::FirmwareUpdateFailed { failures });
        }
        Ok(())
    }

    // Blocks until the package is at least on the controller. A transient
    // status-fetch failure does not abort the batch; running out of budget
    // marks the job Failed.
    fn wait_for_download(&self, job: &mut FirmwareJob) {
        loop {
            if matches!(
                job.status,
                JobState::Downloaded | JobState::Completed | JobState::Failed
            ) {
                return;
            }
            if job.started.elapsed() > self.timing.wait_budget {
                warn!(job_id = %job.job_id, "download wait budget exhausted");
                job.status = JobState::Failed;
                return;
            }
            match self.controller.job_status(&job.job_id) {
                Ok(status) => {
                    debug!(job_id = %job.job_id, status = %status.status, "download poll");
                    job.status = JobState::from_status(&status.status);
                }
                Err(err) => {
                    warn!(job_id = %job.job_id, %err, "status fetch failed, will re-poll");
                    job.status = JobState::TemporaryFailure;
                }
            }
            if !matches!(
                job.status,
                JobState::Downloaded | JobState::Completed | JobState::Failed
            ) {
                sleep(self.timing.poll_interval);
            }
        }
    }

    // Queues every reboot-required job for execution, with a power cycle
    // first when the caller forces a restart.
    fn schedule_reboot(&self, jobs: &[FirmwareJob], force_restart: bool) -> Result<(), WsmanError> {
        let mut queue_ids: Vec<String> = jobs
            .iter()
            .filter(|job| job.reboot_required)
            .map(|job| job.job_id.clone())
            .collect();
        if queue_ids.is_empty() {
            return Ok(());
        }

        let reboot_job_id = if force_restart {
            let id = self.controller.create_reboot_job("power_cycle")?;
            info!(job_id = %id, "power cycle reboot job created");
            queue_ids.push(id.clone());
            Some(id)
        } else {
            None
        };

        self.setup_job_queue_retry(&queue_ids)?;

        if let Some(job_id) = reboot_job_id {
            self.wait_for_reboot(&job_id)?;
        }
        Ok(())
    }

    fn setup_job_queue_retry(&self, job_ids: &[String]) -> Result<(), WsmanError> {
        let mut last_reason = String::new();
        for attempt in 1..=QUEUE_SETUP_ATTEMPTS {
            match self.controller.setup_job_queue(job_ids) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, %err, "job queue setup failed");
                    last_reason = err.to_string();
                    if attempt < QUEUE_SETUP_ATTEMPTS {
                        sleep(self.timing.queue_setup_retry_delay);
                    }
                }
            }
        }
        Err(WsmanError::JobQueueSetupFailed {
            attempts: QUEUE_SETUP_ATTEMPTS,
            reason: last_reason,
        })
    }

    fn wait_for_reboot(&self, job_id: &str) -> Result<(), WsmanError> {
        let started = Instant::now();
        loop {
            match self.controller.job_status(job_id) {
                Ok(status) => {
                    debug!(%job_id, status = %status.status, "reboot poll");
                    if JobState::from_status(&status.status) == JobState::Completed {
                        return Ok(());
                    }
                }
                Err(err) => warn!(%job_id, %err, "reboot status fetch failed, will re-poll"),
            }
            if started.elapsed() > self.timing.wait_budget {
                return Err(WsmanError::RebootTimeout {
                    job_id: job_id.to_string(),
                });
            }
            sleep(self.timing.poll_interval);
        }
    }

    // Waits out every job whose desired end state matches, one poll sweep
    // and one sleep per iteration across the whole set.
    fn wait_for_end_state(&self, jobs: &mut [FirmwareJob], desired: JobState) {
        loop {
            let mut pending = false;
            for job in jobs.iter_mut().filter(|job| job.desired == desired) {
                if job.is_terminal() {
                    continue;
                }
                if job.started.elapsed() > self.timing.wait_budget {
                    warn!(job_id = %job.job_id, "wait budget exhausted");
                    job.status = JobState::InternalTimeout;
                    continue;
                }
                match self.controller.job_status(&job.job_id) {
                    Ok(status) => {
                        debug!(job_id = %job.job_id, status = %status.status, "end state poll");
                        job.status = JobState::from_status(&status.status);
                    }
                    Err(err) => {
                        warn!(job_id = %job.job_id, %err, "status fetch failed, will re-poll");
                        job.status = JobState::TemporaryFailure;
                    }
                }
                if !job.is_terminal() {
                    pending = true;
                }
            }
            if !pending {
                return;
            }
            sleep(self.timing.poll_interval);
        }
    }
}
