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
//! Drives the firmware deployment pipeline against an in-process fake
//! controller, plus one full-stack run through the real invoker, parser
//! and gateway fed by a scripted command runner.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use libwsman::{
    firmware, BmcReset, CommandOutput, CommandRunner, Controller, Endpoint, FirmwareItem,
    FirmwareOrchestrator, LifecycleJob, Timing, WsmanError, WsmanGateway, WsmanInvoker,
};

fn test_timing() -> Timing {
    Timing {
        queue_settle: Duration::ZERO,
        reset_settle: Duration::ZERO,
        poll_interval: Duration::ZERO,
        queue_setup_retry_delay: Duration::ZERO,
        wait_budget: Duration::from_secs(3600),
    }
}

fn item(name: &str, component_id: Option<&str>) -> FirmwareItem {
    FirmwareItem {
        instance_id: format!("DCIM:INSTALLED#{name}"),
        uri_path: format!("nfs://10.0.0.5/firmware/{name}.exe"),
        component_id: component_id.map(|s| s.to_string()),
    }
}

/// Scriptable stand-in for a lifecycle controller. Job ids are handed out
/// per install in order; job statuses replay per id, a `None` step makes
/// that status fetch fail, and the last successful status repeats once the
/// script runs dry.
#[derive(Default)]
struct FakeController {
    log: Mutex<Vec<String>>,
    job_ids: Mutex<VecDeque<Option<String>>>,
    statuses: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    last_status: Mutex<HashMap<String, String>>,
    delete_failures: Mutex<u32>,
    setup_failures: Mutex<u32>,
}

impl FakeController {
    fn with_job(self, job_id: &str, statuses: &[&str]) -> Self {
        let steps: Vec<Option<&str>> = statuses.iter().map(|s| Some(*s)).collect();
        self.with_job_steps(job_id, &steps)
    }

    // Like with_job, but a None step fails that status fetch.
    fn with_job_steps(self, job_id: &str, steps: &[Option<&str>]) -> Self {
        self.job_ids
            .lock()
            .unwrap()
            .push_back(Some(job_id.to_string()));
        self.statuses.lock().unwrap().insert(
            job_id.to_string(),
            steps.iter().map(|s| s.map(|s| s.to_string())).collect(),
        );
        self
    }

    fn with_missing_job_id(self) -> Self {
        self.job_ids.lock().unwrap().push_back(None);
        self
    }

    fn failing_deletes(self, count: u32) -> Self {
        *self.delete_failures.lock().unwrap() = count;
        self
    }

    fn failing_setups(self, count: u32) -> Self {
        *self.setup_failures.lock().unwrap() = count;
        self
    }

    fn reboot_job(self, job_id: &str, statuses: &[&str]) -> Self {
        self.statuses.lock().unwrap().insert(
            job_id.to_string(),
            statuses.iter().map(|s| Some(s.to_string())).collect(),
        );
        self
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Controller for FakeController {
    fn wait_for_ready(&self) -> Result<(), WsmanError> {
        self.record("ready".to_string());
        Ok(())
    }

    fn delete_job_queue(&self, force: bool) -> Result<(), WsmanError> {
        self.record(format!("delete force={force}"));
        let mut failures = self.delete_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(WsmanError::InvocationFailed {
                host: "fake".to_string(),
                stdout: String::new(),
                stderr: "queue wedged".to_string(),
            });
        }
        Ok(())
    }

    fn pending_job_count(&self) -> Result<usize, WsmanError> {
        Ok(0)
    }

    fn install_from_uri(&self, item: &FirmwareItem) -> Result<Option<String>, WsmanError> {
        self.record(format!("install {}", item.instance_id));
        Ok(self
            .job_ids
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected install"))
    }

    fn job_status(&self, job_id: &str) -> Result<LifecycleJob, WsmanError> {
        let mut statuses = self.statuses.lock().unwrap();
        let mut last = self.last_status.lock().unwrap();
        let step = statuses.get_mut(job_id).and_then(|queue| queue.pop_front());
        let status = match step {
            Some(None) => {
                self.record(format!("status_error {job_id}"));
                return Err(WsmanError::InvocationFailed {
                    host: "fake".to_string(),
                    stdout: String::new(),
                    stderr: "Connection reset".to_string(),
                });
            }
            Some(Some(status)) => status,
            None => last
                .get(job_id)
                .cloned()
                .unwrap_or_else(|| "Running".to_string()),
        };
        last.insert(job_id.to_string(), status.clone());
        Ok(LifecycleJob {
            job_id: job_id.to_string(),
            status,
            message: None,
        })
    }

    fn create_reboot_job(&self, reboot_type: &str) -> Result<String, WsmanError> {
        self.record(format!("reboot_job {reboot_type}"));
        Ok("RID_001".to_string())
    }

    fn setup_job_queue(&self, job_ids: &[String]) -> Result<(), WsmanError> {
        self.record(format!("setup {}", job_ids.join(",")));
        let mut failures = self.setup_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(WsmanError::InvocationFailed {
                host: "fake".to_string(),
                stdout: String::new(),
                stderr: "queue busy".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct FakeReset {
    count: Mutex<u32>,
}

impl FakeReset {
    fn resets(&self) -> u32 {
        *self.count.lock().unwrap()
    }
}

impl BmcReset for FakeReset {
    fn reset(&self) -> Result<(), WsmanError> {
        *self.count.lock().unwrap() += 1;
        Ok(())
    }
}

#[test]
fn test_empty_items_fails_without_network_calls() {
    let controller = FakeController::default();
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    let err = orchestrator.install(&[], false).unwrap_err();
    assert!(matches!(err, WsmanError::NoFirmwareItems));
    assert!(controller.log().is_empty());
}

#[test]
fn test_no_reboot_component_skips_reboot_scheduling() {
    let controller = FakeController::default().with_job(
        "JID_100",
        &["Downloading", "Downloaded", "Completed"],
    );
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    orchestrator
        .install(&[item("driverpack", Some(firmware::COMPONENT_DRIVER_PACK))], true)
        .unwrap();

    let log = controller.log();
    assert!(!log.iter().any(|entry| entry.starts_with("reboot_job")));
    assert!(!log.iter().any(|entry| entry.starts_with("setup")));
}

#[test]
fn test_scheduled_end_state_without_force() {
    let controller = FakeController::default().with_job("JID_200", &["Downloaded", "Scheduled"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    orchestrator.install(&[item("bios", None)], false).unwrap();

    let log = controller.log();
    assert!(log.contains(&"setup JID_200".to_string()));
    assert!(!log.iter().any(|entry| entry.starts_with("reboot_job")));
}

#[test]
fn test_forced_restart_creates_and_waits_for_reboot_job() {
    let controller = FakeController::default()
        .with_job("JID_300", &["Downloaded", "Completed"])
        .reboot_job("RID_001", &["Running", "Reboot Completed"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    orchestrator.install(&[item("bios", None)], true).unwrap();

    let log = controller.log();
    assert!(log.contains(&"reboot_job power_cycle".to_string()));
    assert!(log.contains(&"setup JID_300,RID_001".to_string()));
}

#[test]
fn test_controller_firmware_installed_before_main_set() {
    let controller = FakeController::default()
        .with_job("JID_LC", &["Downloaded", "Completed"])
        .with_job("JID_BIOS", &["Downloaded", "Scheduled"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    // Listed main-set first; the pre set must still install first.
    orchestrator
        .install(
            &[
                item("bios", None),
                item("lc", Some(firmware::COMPONENT_LIFECYCLE_CONTROLLER)),
            ],
            false,
        )
        .unwrap();

    let log = controller.log();
    let lc_pos = log
        .iter()
        .position(|entry| entry == "install DCIM:INSTALLED#lc")
        .unwrap();
    let bios_pos = log
        .iter()
        .position(|entry| entry == "install DCIM:INSTALLED#bios")
        .unwrap();
    assert!(lc_pos < bios_pos);
    // Readiness is re-confirmed between the two waves.
    assert!(log[lc_pos..bios_pos].contains(&"ready".to_string()));
}

// First clear attempt is soft, attempts 2 and 3 are forced, with a hardware
// reset before attempts 2 and 3 only. No fourth cycle.
#[test]
fn test_queue_clear_escalation() {
    let controller = FakeController::default()
        .failing_deletes(3)
        .with_job("JID_X", &["Downloaded", "Scheduled"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    let err = orchestrator.install(&[item("bios", None)], false).unwrap_err();
    assert!(matches!(err, WsmanError::JobQueueClearFailed));

    let deletes: Vec<String> = controller
        .log()
        .into_iter()
        .filter(|entry| entry.starts_with("delete"))
        .collect();
    assert_eq!(
        deletes,
        vec!["delete force=false", "delete force=true", "delete force=true"]
    );
    assert_eq!(reset.resets(), 2);
    // The pipeline never got to submitting installs.
    assert!(!controller.log().iter().any(|entry| entry.starts_with("install")));
}

#[test]
fn test_missing_job_id_is_fatal() {
    let controller = FakeController::default().with_missing_job_id();
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    let err = orchestrator.install(&[item("bios", None)], false).unwrap_err();
    match err {
        WsmanError::MissingJobId { instance_id, .. } => {
            assert_eq!(instance_id, "DCIM:INSTALLED#bios");
        }
        other => panic!("unexpected error: {other}"),
    }
}

// A job that never leaves Running exhausts the wait budget and contributes
// to the aggregate failure.
#[test]
fn test_wait_budget_exhaustion() {
    let controller = FakeController::default().with_job("JID_400", &["Running"]);
    let reset = FakeReset::default();
    let mut timing = test_timing();
    timing.wait_budget = Duration::ZERO;
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(timing);

    let err = orchestrator.install(&[item("bios", None)], false).unwrap_err();
    match err {
        WsmanError::FirmwareUpdateFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("DCIM:INSTALLED#bios"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// Two items, one completes and one fails: the aggregate error names the
// failed item only, and the batch is not aborted early.
#[test]
fn test_partial_failure_aggregated() {
    let controller = FakeController::default()
        .with_job("JID_A", &["Downloaded", "Scheduled"])
        .with_job("JID_B", &["Failed"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    let err = orchestrator
        .install(&[item("good", None), item("bad", None)], false)
        .unwrap_err();
    match err {
        WsmanError::FirmwareUpdateFailed { failures } => {
            assert_eq!(failures.len(), 1);
            assert!(failures[0].contains("DCIM:INSTALLED#bad"));
            assert!(failures[0].contains("Failed"));
            assert!(!failures.iter().any(|f| f.contains("DCIM:INSTALLED#good")));
        }
        other => panic!("unexpected error: {other}"),
    }
    // Reboot scheduling still ran for the whole reboot-required set.
    assert!(controller.log().contains(&"setup JID_A,JID_B".to_string()));
}

// A failed status fetch is absorbed as a transient condition: polling
// continues and the install still succeeds once the controller answers.
#[test]
fn test_transient_status_fetch_absorbed() {
    let controller = FakeController::default().with_job_steps(
        "JID_500",
        &[None, Some("Downloaded"), None, Some("Scheduled")],
    );
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    orchestrator.install(&[item("bios", None)], false).unwrap();

    let log = controller.log();
    let errors = log
        .iter()
        .filter(|entry| entry.as_str() == "status_error JID_500")
        .count();
    assert_eq!(errors, 2);
    assert!(log.contains(&"setup JID_500".to_string()));
}

#[test]
fn test_setup_queue_retry_succeeds_on_fourth() {
    let controller = FakeController::default()
        .failing_setups(3)
        .with_job("JID_600", &["Downloaded", "Scheduled"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    orchestrator.install(&[item("bios", None)], false).unwrap();

    let setups = controller
        .log()
        .into_iter()
        .filter(|entry| entry.starts_with("setup"))
        .count();
    assert_eq!(setups, 4);
}

// Four setup failures exhaust the ladder; there is no fifth attempt.
#[test]
fn test_setup_queue_retry_exhausted() {
    let controller = FakeController::default()
        .failing_setups(4)
        .with_job("JID_700", &["Downloaded", "Scheduled"]);
    let reset = FakeReset::default();
    let orchestrator = FirmwareOrchestrator::new(&controller, &reset).timing(test_timing());

    let err = orchestrator.install(&[item("bios", None)], false).unwrap_err();
    match err {
        WsmanError::JobQueueSetupFailed { attempts, reason } => {
            assert_eq!(attempts, 4);
            assert!(reason.contains("queue busy"));
        }
        other => panic!("unexpected error: {other}"),
    }
    let setups = controller
        .log()
        .into_iter()
        .filter(|entry| entry.starts_with("setup"))
        .count();
    assert_eq!(setups, 4);
}

// Full stack: orchestrator -> gateway -> invoker -> parser, with the wsman
// tool replaced by a scripted runner.

struct ScriptedRunner {
    outputs: Mutex<VecDeque<String>>,
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, _program: &str, _args: &[String]) -> Result<CommandOutput, WsmanError> {
        let stdout = self
            .outputs
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected extra wsman call");
        Ok(CommandOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }
}

fn lc_ready() -> String {
    soap_body(
        "DCIM_LCService",
        "GetRemoteServicesAPIStatus_OUTPUT",
        &[("LCStatus", "0"), ("ReturnValue", "0"), ("ServerStatus", "2")],
    )
}

fn delete_ok() -> String {
    soap_body(
        "DCIM_JobService",
        "DeleteJobQueue_OUTPUT",
        &[("Message", "The specified job was deleted"), ("ReturnValue", "0")],
    )
}

fn empty_job_enum() -> String {
    r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsen="http://schemas.xmlsoap.org/ws/2004/09/enumeration" xmlns:wsman="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">
  <s:Body><wsen:EnumerateResponse><wsman:Items></wsman:Items><wsman:EndOfSequence/></wsen:EnumerateResponse></s:Body>
</s:Envelope>"#
        .to_string()
}

fn install_accepted(job_id: &str) -> String {
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://schemas.xmlsoap.org/ws/2004/08/addressing" xmlns:wsman="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" xmlns:n1="http://schemas.dell.com/wbem/wscim/1/cim-schema/2/DCIM_SoftwareInstallationService">
  <s:Body>
    <n1:InstallFromURI_OUTPUT>
      <n1:Job>
        <wsa:EndpointReference>
          <wsa:ReferenceParameters>
            <wsman:SelectorSet>
              <wsman:Selector Name="InstanceID">{job_id}</wsman:Selector>
            </wsman:SelectorSet>
          </wsa:ReferenceParameters>
        </wsa:EndpointReference>
      </n1:Job>
      <n1:ReturnValue>4096</n1:ReturnValue>
    </n1:InstallFromURI_OUTPUT>
  </s:Body>
</s:Envelope>"#
    )
}

fn job_with_status(job_id: &str, status: &str) -> String {
    soap_body(
        "DCIM_LifecycleJob",
        "DCIM_LifecycleJob",
        &[("InstanceID", job_id), ("JobStatus", status), ("Message", "ok")],
    )
}

fn soap_body(class: &str, element: &str, fields: &[(&str, &str)]) -> String {
    let inner: String = fields
        .iter()
        .map(|(k, v)| format!("<n1:{k}>{v}</n1:{k}>"))
        .collect();
    format!(
        r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:n1="http://schemas.dell.com/wbem/wscim/1/cim-schema/2/{class}">
  <s:Body><n1:{element}>{inner}</n1:{element}></s:Body>
</s:Envelope>"#
    )
}

#[test]
fn test_full_stack_install() -> anyhow::Result<()> {
    let job_id = "JID_845819239488";
    let outputs = vec![
        lc_ready(),                          // initial readiness
        lc_ready(),                          // clear: readiness
        delete_ok(),                         // clear: soft delete
        lc_ready(),                          // clear: readiness after settle
        empty_job_enum(),                    // clear: verify queue empty
        install_accepted(job_id),            // install submission
        job_with_status(job_id, "Downloaded"), // download poll
        job_with_status(job_id, "Completed"),  // end state poll
        lc_ready(),                          // final readiness
    ];
    let runner = Arc::new(ScriptedRunner {
        outputs: Mutex::new(outputs.into_iter().collect()),
    });

    let invoker = WsmanInvoker::new(runner).retry_delay(Duration::ZERO);
    let endpoint = Endpoint::new("192.168.1.10", "root", "calvin")?;
    let gateway = WsmanGateway::new(invoker, endpoint).ready_polling(2, Duration::ZERO);
    let reset = FakeReset::default();

    FirmwareOrchestrator::new(&gateway, &reset)
        .timing(test_timing())
        .install(
            &[item("osc", Some(firmware::COMPONENT_OS_COLLECTOR))],
            false,
        )?;
    assert_eq!(reset.resets(), 0);
    Ok(())
}
