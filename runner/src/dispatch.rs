//! the dispatch loop: generate everything, submit only what is missing
//!
//! Generation always covers the full sweep before any submission happens;
//! the completion check then picks the indices that still need to run. A
//! failed run can simply be re-invoked: completed indices are skipped, the
//! rest is submitted again.

use crate::{
    backends::{BackendJobHandle, Backends, SubmissionError},
    completion,
    config::{ConfigError, SimulationConfig},
    generate::{FileGenerator, GenerationError},
    naming,
};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// totals reported back to the caller after a dispatch run
#[derive(Debug, Clone, Default)]
pub struct DispatchSummary {
    pub submitted: u32,
    pub skipped: u32,
    /// job handles for backends that acknowledge submissions with an id
    pub handles: Vec<BackendJobHandle>,
}

/// generate the sweep and submit every missing index through the selected
/// backend
pub fn dispatch(cfg: &SimulationConfig) -> Result<DispatchSummary, DispatchError> {
    cfg.validate()?;

    let token = naming::config_token(cfg);

    let mut generator = FileGenerator::new(cfg, token.clone());
    generator.create_directories()?;
    generator.generate_mac_files()?;
    generator.generate_run_scripts()?;

    let report = completion::scan(cfg, &token);
    info!(
        missing = report.missing,
        complete = report.complete,
        "sweep scanned before submission"
    );

    let Some(backend) = Backends::load(cfg) else {
        info!("no batch system selected, only generating scripts");
        return Ok(DispatchSummary {
            submitted: 0,
            skipped: report.complete,
            handles: Vec::new(),
        });
    };

    info!(backend = backend.name(), "submitting batch jobs");

    // submission units are rendered for the whole sweep so a re-run with
    // changed options refreshes them even for completed indices
    for index in 0..cfg.jobs {
        backend.render_submission_unit(cfg, &token, index)?;
    }

    submit_missing(cfg, &token, |index| backend.submit(cfg, &token, index))
}

/// walk the sweep and submit every index whose outputs are incomplete
///
/// The first submission error aborts the remaining indices; the sukap
/// adapter never returns one from a rejected submit, it retries internally.
pub fn submit_missing<F>(
    cfg: &SimulationConfig,
    token: &str,
    mut submit: F,
) -> Result<DispatchSummary, DispatchError>
where
    F: FnMut(u32) -> Result<Option<BackendJobHandle>, SubmissionError>,
{
    let mut summary = DispatchSummary::default();

    for index in 0..cfg.jobs {
        if completion::is_missing(cfg, token, index) {
            let descriptor = naming::descriptor(cfg, token, index);
            debug!(
                index = descriptor.index,
                script = ?descriptor.run_script,
                unit = ?descriptor.submission_unit,
                "submitting job"
            );

            let handle = submit(index)?;
            if let Some(handle) = &handle {
                debug!(job_id = handle.job_id, index = handle.index, "submission acknowledged");
            }

            summary.submitted += 1;
            summary.handles.extend(handle);
        } else {
            summary.skipped += 1;
        }
    }

    info!(
        submitted = summary.submitted,
        skipped = summary.skipped,
        "sweep dispatch finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ContainerArtifact, GenerationMode, SimulationConfig, Stage, StageSet,
    };
    use std::fs;
    use std::path::{Path, PathBuf};

    fn sweep_config(dir: &Path, jobs: u32) -> SimulationConfig {
        let container =
            ContainerArtifact::from_values(Some(PathBuf::from("/scratch/software.sif")), None)
                .unwrap();
        let mut cfg = SimulationConfig::new(container).unwrap();
        cfg.mode = GenerationMode::Beam {
            kinetic_energy: 100.0,
            wall_distance: 0.0,
        };
        cfg.jobs = jobs;
        cfg.stages = StageSet {
            wcsim: true,
            mdt: false,
            fitqun: false,
        };
        cfg.work_dir = dir.to_path_buf();
        cfg
    }

    fn touch_output(cfg: &SimulationConfig, token: &str, index: u32) {
        let path = cfg
            .work_dir
            .join(naming::stage_output(token, index, Stage::Wcsim));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn only_missing_indices_are_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 5);
        let token = naming::config_token(&cfg);

        for index in [0, 1, 3] {
            touch_output(&cfg, &token, index);
        }

        let mut submitted = Vec::new();
        let summary = submit_missing(&cfg, &token, |index| {
            submitted.push(index);
            Ok(None)
        })
        .unwrap();

        assert_eq!(submitted, vec![2, 4]);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.skipped, 3);
    }

    #[test]
    fn complete_sweep_submits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 4);
        let token = naming::config_token(&cfg);

        for index in 0..4 {
            touch_output(&cfg, &token, index);
        }

        let summary = submit_missing(&cfg, &token, |_| {
            panic!("a complete sweep must not submit")
        })
        .unwrap();

        assert_eq!(summary.submitted, 0);
        assert_eq!(summary.skipped, 4);
    }

    #[test]
    fn first_submission_failure_halts_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 5);
        let token = naming::config_token(&cfg);

        // index 0 is already complete, 1..5 are missing
        touch_output(&cfg, &token, 0);

        let mut attempts = Vec::new();
        let result = submit_missing(&cfg, &token, |index| {
            attempts.push(index);
            if index == 2 {
                Err(SubmissionError::Rejected {
                    backend: "cedar",
                    stderr: "sbatch: error: invalid account".to_string(),
                })
            } else {
                Ok(None)
            }
        });

        assert!(matches!(result, Err(DispatchError::Submission(_))));
        // indices after the failure are left for the next idempotent run
        assert_eq!(attempts, vec![1, 2]);
    }

    #[test]
    fn handles_are_collected_for_acknowledged_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 2);
        let token = naming::config_token(&cfg);

        let summary = submit_missing(&cfg, &token, |index| {
            Ok(Some(BackendJobHandle {
                job_id: 1000 + u64::from(index),
                index,
            }))
        })
        .unwrap();

        assert_eq!(summary.handles.len(), 2);
        assert_eq!(
            summary.handles[1],
            BackendJobHandle {
                job_id: 1001,
                index: 1
            }
        );
    }
}
