//! lxplus HTCondor adapter
//!
//! condor_q -global reports one section per schedd instead of a flat table,
//! and there is no global cancel-by-user, so killing walks the schedds that
//! still hold jobs for the user and cancels on each one separately.

use super::{process, RemoteJobRecord, SubmissionError};
use crate::{
    config::SimulationConfig,
    generate::{self, read_template, render, write_generated, GenerationError, TemplateVars},
    naming,
};
use itertools::Itertools;
use std::{collections::BTreeSet, path::PathBuf};
use tracing::{info, warn};

pub const NAME: &str = "condor";
const LIST_COMMAND: &str = "condor_q -global";
const SCHEDD_BANNER: &str = "-- Schedd";
const HEADER_SENTINEL: &str = "OWNER";

#[derive(Debug, Clone)]
pub struct CondorBackend {
    pub flavour: String,
}

/// jobs of one schedd section of the global queue report
#[derive(Debug, Clone, Default)]
pub struct ScheddSection {
    /// the full "-- Schedd: ..." banner line
    pub banner: String,
    /// schedd host extracted from the banner, used for targeted condor_rm
    pub schedd: Option<String>,
    pub header: Option<String>,
    pub records: Vec<RemoteJobRecord>,
}

impl CondorBackend {
    pub fn new(flavour: String) -> Self {
        Self { flavour }
    }

    /// write the condor submit description for one index
    pub fn render_submission_unit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<PathBuf, GenerationError> {
        let template = read_template(cfg, generate::CONDOR_TEMPLATE)?;

        let vars = TemplateVars::from([
            (
                "shfile",
                naming::run_script(token, index).display().to_string(),
            ),
            ("out", naming::condor_out(token, index).display().to_string()),
            ("err", naming::condor_err(token, index).display().to_string()),
            ("log", naming::condor_log(token, index).display().to_string()),
            ("JobFlavour", self.flavour.clone()),
        ]);

        let unit = naming::condor_submit_file(token, index);
        write_generated(cfg, unit.clone(), render(&template, &vars)?)?;

        Ok(unit)
    }

    /// submit one job through the lxbatch environment; the first rejection
    /// aborts the remaining sweep
    pub fn submit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<(), SubmissionError> {
        let unit = cfg.work_dir.join(naming::condor_submit_file(token, index));
        let command = format!(
            "module load lxbatch/eossubmit && condor_submit {}",
            unit.display()
        );
        let stdout = super::submit_shell_command(NAME, &command)?;

        info!("{}", stdout.trim());
        Ok(())
    }

    pub fn list_owned_jobs(&self, user: &str) -> Vec<RemoteJobRecord> {
        self.sections(user)
            .into_iter()
            .flat_map(|section| section.records)
            .collect_vec()
    }

    pub fn status_lines(&self, user: &str) -> Vec<String> {
        section_lines(&self.sections(user))
    }

    fn sections(&self, user: &str) -> Vec<ScheddSection> {
        match process::run_shell(LIST_COMMAND) {
            Ok(output) => parse_global_queue(&output.stdout, user),
            Err(error) => {
                warn!(%error, "failed to list condor jobs");
                Vec::new()
            }
        }
    }

    /// cancel per schedd: condor has no global cancel-by-user primitive
    pub fn kill_owned(&self, user: &str) -> Vec<String> {
        let mut report = vec![format!("Killing condor jobs for user {user}...")];

        let schedds: BTreeSet<String> = self
            .sections(user)
            .into_iter()
            .filter_map(|section| section.schedd)
            .collect();

        if schedds.is_empty() {
            report.push("No condor jobs found for user.".to_string());
            return report;
        }

        for schedd in schedds {
            report.push(format!("Killing jobs on schedd: {schedd}"));

            match process::run("condor_rm", ["-name", schedd.as_str(), user]) {
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
                Err(error) => report.push(format!("Error killing condor jobs: {error}")),
            }
        }

        report
    }
}

/// split the multi-schedd report into sections, keeping only sections that
/// hold at least one job owned by `user`
pub fn parse_global_queue(output: &str, user: &str) -> Vec<ScheddSection> {
    let mut sections = Vec::new();
    let mut current: Option<ScheddSection> = None;

    let mut flush = |section: Option<ScheddSection>, sections: &mut Vec<ScheddSection>| {
        if let Some(section) = section {
            if !section.records.is_empty() {
                sections.push(section);
            }
        }
    };

    for line in output.lines() {
        if line.starts_with(SCHEDD_BANNER) {
            flush(current.take(), &mut sections);
            current = Some(ScheddSection {
                banner: line.to_string(),
                schedd: line.split_whitespace().nth(2).map(str::to_string),
                ..ScheddSection::default()
            });
        } else if line.starts_with(HEADER_SENTINEL) {
            if let Some(section) = current.as_mut() {
                section.header = Some(line.to_string());
            }
        } else if let Some(section) = current.as_mut() {
            let parts = line.split_whitespace().collect_vec();
            if parts.first() == Some(&user) {
                section.records.push(RemoteJobRecord {
                    raw: line.to_string(),
                    owner: user.to_string(),
                    // the JOB_IDS column closes each batch row
                    job_id: parts.last().unwrap_or(&"").to_string(),
                });
            }
        }
    }

    flush(current, &mut sections);
    sections
}

/// flatten sections back into a printable report, blank line between schedds
pub fn section_lines(sections: &[ScheddSection]) -> Vec<String> {
    let mut lines = Vec::new();

    for (position, section) in sections.iter().enumerate() {
        if position > 0 {
            lines.push(String::new());
        }

        lines.push(section.banner.clone());
        if let Some(header) = &section.header {
            lines.push(header.clone());
        }
        lines.extend(section.records.iter().map(|record| record.raw.clone()));
    }

    lines
}
