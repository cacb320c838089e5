//! sukap adapter: pjsub submission behind an admission throttle
//!
//! The pjsub frontend on sukap is flaky and the shared queue is small, so this
//! variant polls the queue depth before every submission and re-submits a
//! rejected job until it goes through. Both knobs live in [`ThrottleConfig`].

use super::{process, BackendJobHandle, Listing, RemoteJobRecord, SubmissionError};
use crate::{
    config::{SimulationConfig, ThrottleConfig},
    generate::{self, read_template, render, write_generated, GenerationError, TemplateVars},
    naming,
};
use itertools::Itertools;
use std::{path::PathBuf, thread, time::Duration};
use tracing::{debug, info, warn};

pub const NAME: &str = "sukap";
const LIST_COMMAND: &str = "pjstat";
const SUBMIT_COMMAND: &str = "pjsub";
const KILL_COMMAND: &str = "pjdel";

#[derive(Debug, Clone)]
pub struct SukapBackend {
    pub queue: String,
    pub throttle: ThrottleConfig,
}

impl SukapBackend {
    pub fn new(queue: String, throttle: ThrottleConfig) -> Self {
        Self { queue, throttle }
    }

    /// write the pjsub wrapper for one index
    pub fn render_submission_unit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<PathBuf, GenerationError> {
        let template = read_template(cfg, generate::PJSUB_TEMPLATE)?;

        let vars = TemplateVars::from([
            ("curdir", cfg.work_dir.display().to_string()),
            (
                "shFile",
                naming::run_script(token, index).display().to_string(),
            ),
            ("pjout", naming::pjsub_out(token, index).display().to_string()),
            ("pjerr", naming::pjsub_err(token, index).display().to_string()),
            ("rscgrp", self.queue.clone()),
        ]);

        let unit = naming::pjsub_script(token, index);
        write_generated(cfg, unit.clone(), render(&template, &vars)?)?;

        Ok(unit)
    }

    /// submit one job, waiting for queue admission first and retrying a
    /// rejected submission until it succeeds
    pub fn submit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<Option<BackendJobHandle>, SubmissionError> {
        wait_for_admission_with(&self.throttle, queue_depth)?;

        let unit = cfg.work_dir.join(naming::pjsub_script(token, index));
        let stdout = submit_with_retry(self.throttle.retry_delay(), || {
            super::submit_command(NAME, SUBMIT_COMMAND, [unit.as_os_str()])
        });

        info!("{}", stdout.trim());

        let handle = parse_job_id(&stdout).map(|job_id| BackendJobHandle { job_id, index });
        if handle.is_none() {
            warn!(stdout = %stdout.trim(), "could not parse a job id from the pjsub output");
        }

        Ok(handle)
    }

    pub fn list_owned_jobs(&self, user: &str) -> Vec<RemoteJobRecord> {
        self.listing(user).records
    }

    pub fn status_lines(&self, user: &str) -> Vec<String> {
        self.listing(user).status_lines()
    }

    fn listing(&self, user: &str) -> Listing {
        match process::run_plain(LIST_COMMAND) {
            Ok(output) => parse_listing(&output.stdout, user),
            Err(error) => {
                warn!(%error, "failed to list sukap jobs");
                Listing::default()
            }
        }
    }

    /// cancel every owned job individually, pjstat has no bulk cancel
    pub fn kill_owned(&self, user: &str) -> Vec<String> {
        let mut report = vec!["Killing sukap jobs...".to_string()];

        for record in self.list_owned_jobs(user) {
            debug!(owner = %record.owner, job_id = %record.job_id, "cancelling job");
            report.push(format!("Killing sukap job {}", record.job_id));

            match process::run(KILL_COMMAND, [record.job_id.as_str()]) {
                Ok(output) => {
                    report.extend(non_empty_lines(&output.stdout));
                    report.extend(non_empty_lines(&output.stderr));
                }
                Err(error) => report.push(format!("Error killing sukap jobs: {error}")),
            }
        }

        report
    }
}

fn non_empty_lines(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect_vec()
}

/// current queue depth as seen by pjstat; an unreachable frontend counts as a
/// full queue so the throttle keeps waiting instead of flooding it
fn queue_depth() -> usize {
    match process::run_plain(LIST_COMMAND) {
        Ok(output) => output.stdout.lines().count(),
        Err(error) => {
            warn!(%error, "failed to poll the sukap queue depth");
            usize::MAX
        }
    }
}

/// block until the queue depth falls below the admission limit
pub(crate) fn wait_for_admission_with<F>(
    throttle: &ThrottleConfig,
    mut depth: F,
) -> Result<(), SubmissionError>
where
    F: FnMut() -> usize,
{
    let mut waited = Duration::ZERO;

    loop {
        let current = depth();
        if current < throttle.queue_limit {
            return Ok(());
        }

        debug!(
            depth = current,
            limit = throttle.queue_limit,
            "queue full, holding submission"
        );

        if let Some(max_wait) = throttle.max_wait() {
            if waited >= max_wait {
                return Err(SubmissionError::AdmissionTimeout {
                    waited_secs: waited.as_secs(),
                });
            }
        }

        thread::sleep(throttle.poll_interval());
        waited += throttle.poll_interval();
    }
}

/// re-submit until the command succeeds; at-least-once on purpose, the legacy
/// frontend rejects valid submissions intermittently
pub(crate) fn submit_with_retry<F>(delay: Duration, mut attempt: F) -> String
where
    F: FnMut() -> Result<String, SubmissionError>,
{
    loop {
        match attempt() {
            Ok(stdout) => return stdout,
            Err(error) => {
                warn!(%error, "submission rejected, retrying");
                thread::sleep(delay);
            }
        }
    }
}

/// job id from the pjsub acknowledgement, the second to last token
/// ("[INFO] PJM 0000 pjsub Job 12345 submitted.")
pub(crate) fn parse_job_id(stdout: &str) -> Option<u64> {
    stdout
        .split_whitespace()
        .rev()
        .nth(1)
        .and_then(|token| token.parse().ok())
}

/// parse the pjstat table: header row carries the JOB_ID sentinel, the owner
/// sits in the fifth column
pub fn parse_listing(output: &str, user: &str) -> Listing {
    let mut listing = Listing::default();

    for line in output.lines() {
        let parts = line.split_whitespace().collect_vec();
        if parts.len() < 5 {
            continue;
        }

        if parts[0] == "JOB_ID" {
            listing.header = Some(line.to_string());
            continue;
        }

        if parts[4] == user {
            listing.records.push(RemoteJobRecord {
                raw: line.to_string(),
                owner: user.to_string(),
                job_id: parts[0].to_string(),
            });
        }
    }

    listing
}
