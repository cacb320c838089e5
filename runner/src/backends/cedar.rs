//! cedar adapter: plain sbatch submission, no throttle and no retry
//!
//! cedar's Slurm controller copes fine with a burst of single submissions, so
//! the first rejected sbatch aborts the rest of the sweep; the remainder is
//! picked up by the next idempotent run.

use super::{process, Listing, RemoteJobRecord, SubmissionError};
use crate::{
    config::SimulationConfig,
    generate::{self, read_template, render, write_generated, GenerationError, TemplateVars},
    naming,
};
use itertools::Itertools;
use std::path::PathBuf;
use tracing::{info, warn};

pub const NAME: &str = "cedar";
const LIST_COMMAND: &str = "squeue";
const SUBMIT_COMMAND: &str = "sbatch";
const KILL_COMMAND: &str = "scancel";

#[derive(Debug, Clone)]
pub struct CedarBackend {
    pub account: String,
}

impl CedarBackend {
    pub fn new(account: String) -> Self {
        Self { account }
    }

    /// write the sbatch script for one index
    pub fn render_submission_unit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<PathBuf, GenerationError> {
        let template = read_template(cfg, generate::SLURM_TEMPLATE)?;
        let image = cfg.container.image_for(&cfg.backend)?;

        let vars = TemplateVars::from([
            ("account", self.account.clone()),
            ("curdir", cfg.work_dir.display().to_string()),
            ("mntdir", cfg.mount_dir.display().to_string()),
            ("siffile", image.display().to_string()),
            ("sout", naming::slurm_out(token, index).display().to_string()),
            ("serr", naming::slurm_err(token, index).display().to_string()),
            (
                "shFile",
                naming::run_script(token, index).display().to_string(),
            ),
        ]);

        let unit = naming::slurm_script(token, index);
        write_generated(cfg, unit.clone(), render(&template, &vars)?)?;

        Ok(unit)
    }

    /// submit one job; a rejection is surfaced to the caller unchanged
    pub fn submit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<(), SubmissionError> {
        let unit = cfg.work_dir.join(naming::slurm_script(token, index));
        let stdout = super::submit_command(NAME, SUBMIT_COMMAND, [unit.as_os_str()])?;

        info!("{}", stdout.trim());
        Ok(())
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
                warn!(%error, "failed to list cedar jobs");
                Listing::default()
            }
        }
    }

    /// one bulk cancel by user, Slurm supports it natively
    pub fn kill_owned(&self, user: &str) -> Vec<String> {
        let mut report = vec![format!("Killing cedar jobs for user {user}...")];

        match process::run(KILL_COMMAND, ["-u", user]) {
            Ok(output) => {
                report.extend(
                    output
                        .stdout
                        .lines()
                        .chain(output.stderr.lines())
                        .filter(|line| !line.trim().is_empty())
                        .map(str::to_string),
                );
            }
            Err(error) => report.push(format!("Error killing cedar jobs: {error}")),
        }

        report
    }
}

/// parse the squeue table: header row carries the JOBID sentinel, the owner
/// sits in the fourth column
pub fn parse_listing(output: &str, user: &str) -> Listing {
    let mut listing = Listing::default();

    for line in output.lines() {
        let parts = line.split_whitespace().collect_vec();
        if parts.len() < 4 {
            continue;
        }

        if parts[0] == "JOBID" {
            listing.header = Some(line.to_string());
            continue;
        }

        if parts[3] == user {
            listing.records.push(RemoteJobRecord {
                raw: line.to_string(),
                owner: user.to_string(),
                job_id: parts[0].to_string(),
            });
        }
    }

    listing
}
