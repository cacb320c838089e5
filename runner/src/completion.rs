//! completion detection by artifact existence
//!
//! A job is complete exactly when every enabled stage's terminal output file
//! exists on the shared filesystem. Presence is the only durability signal;
//! no content validation happens here, and disabled stages never block.

use crate::{config::SimulationConfig, naming};
use tracing::debug;

/// true when any enabled stage's expected output is absent for this index
pub fn is_missing(cfg: &SimulationConfig, token: &str, index: u32) -> bool {
    naming::descriptor(cfg, token, index)
        .outputs
        .iter()
        .any(|(_, output)| !cfg.work_dir.join(output).exists())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub missing: u32,
    pub complete: u32,
}

/// count missing and complete jobs over the whole sweep
pub fn scan(cfg: &SimulationConfig, token: &str) -> ScanReport {
    let mut report = ScanReport {
        missing: 0,
        complete: 0,
    };

    for index in 0..cfg.jobs {
        if is_missing(cfg, token, index) {
            report.missing += 1;
        } else {
            report.complete += 1;
        }
    }

    debug!(missing = report.missing, complete = report.complete, "sweep scanned");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerArtifact, GenerationMode, SimulationConfig, Stage, StageSet};
    use crate::naming;
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

    fn touch_output(cfg: &SimulationConfig, token: &str, index: u32, stage: Stage) {
        let path = cfg.work_dir.join(naming::stage_output(token, index, stage));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn scan_counts_missing_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 5);
        let token = naming::config_token(&cfg);

        for index in [0, 1, 3] {
            touch_output(&cfg, &token, index, Stage::Wcsim);
        }

        assert_eq!(
            scan(&cfg, &token),
            ScanReport {
                missing: 2,
                complete: 3
            }
        );
        assert!(!is_missing(&cfg, &token, 0));
        assert!(is_missing(&cfg, &token, 2));
        assert!(is_missing(&cfg, &token, 4));
    }

    #[test]
    fn any_enabled_stage_without_output_marks_the_job_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = sweep_config(dir.path(), 1);
        cfg.stages.fitqun = true;
        let token = naming::config_token(&cfg);

        touch_output(&cfg, &token, 0, Stage::Wcsim);
        assert!(is_missing(&cfg, &token, 0));

        touch_output(&cfg, &token, 0, Stage::Fitqun);
        assert!(!is_missing(&cfg, &token, 0));
    }

    #[test]
    fn disabled_stages_never_block_completion() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 1);
        let token = naming::config_token(&cfg);

        // mdt and fitqun outputs do not exist, but both stages are disabled
        touch_output(&cfg, &token, 0, Stage::Wcsim);
        assert!(!is_missing(&cfg, &token, 0));
    }

    #[test]
    fn fresh_sweep_is_entirely_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sweep_config(dir.path(), 3);
        let token = naming::config_token(&cfg);

        assert_eq!(
            scan(&cfg, &token),
            ScanReport {
                missing: 3,
                complete: 0
            }
        );
    }
}
