//! canonical names for every artifact of a sweep
//!
//! All paths are relative to the sweep working directory (or to the container
//! mount point when embedded in a script). Generation, the completion check
//! and the submitters all go through these helpers so the names cannot drift.

use crate::config::{BackendSelection, GenerationMode, SimulationConfig, Stage};
use std::path::PathBuf;

pub const MAC_DIR: &str = "mac";
pub const OUT_DIR: &str = "out";
pub const LOG_DIR: &str = "log";
pub const SHELL_DIR: &str = "shell";
pub const FIG_DIR: &str = "fig";

pub const PJ_DIR: &str = "pjdir";
pub const PJ_OUT_DIR: &str = "pjout";
pub const PJ_ERR_DIR: &str = "pjerr";

pub const SL_DIR: &str = "sldir";
pub const SL_OUT_DIR: &str = "slout";
pub const SL_ERR_DIR: &str = "slerr";

pub const CONDOR_DIR: &str = "condor_dir";
pub const CONDOR_OUT_DIR: &str = "condor_out";
pub const CONDOR_ERR_DIR: &str = "condor_err";
pub const CONDOR_LOG_DIR: &str = "condor_log";

/// directories every sweep needs
pub fn base_dirs() -> [&'static str; 5] {
    [MAC_DIR, OUT_DIR, LOG_DIR, SHELL_DIR, FIG_DIR]
}

/// extra directories for the selected batch system
pub fn backend_dirs(backend: &BackendSelection) -> &'static [&'static str] {
    match backend {
        BackendSelection::None => &[],
        BackendSelection::Sukap { .. } => &[PJ_DIR, PJ_OUT_DIR, PJ_ERR_DIR],
        BackendSelection::Cedar { .. } => &[SL_DIR, SL_OUT_DIR, SL_ERR_DIR],
        BackendSelection::Condor { .. } => {
            &[CONDOR_DIR, CONDOR_OUT_DIR, CONDOR_ERR_DIR, CONDOR_LOG_DIR]
        }
    }
}

/// canonical token encoding the semantic parameters of a sweep
///
/// Two configs with the same active mode and parameters always map to the
/// same token; the token is embedded in every artifact filename. The cosmics
/// spelling is kept as-is for compatibility with existing productions.
pub fn config_token(cfg: &SimulationConfig) -> String {
    let cds = if cfg.with_cds { "_wCDS" } else { "" };

    match &cfg.mode {
        GenerationMode::Beam {
            kinetic_energy,
            wall_distance,
        } => format!(
            "{cds}_{}_Beam_{kinetic_energy:.0}MeV_{}cm_",
            cfg.particle, *wall_distance as i64
        ),
        GenerationMode::Uniform {
            energy_low,
            energy_high,
        } => format!(
            "{cds}_{}_Uniform_{energy_low:.0}_{energy_high:.0}MeV_",
            cfg.particle
        ),
        GenerationMode::Cosmics => format!("{cds}_Comsics_"),
    }
}

pub fn mac_file(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{MAC_DIR}/wcsim{token}{index:04}.mac"))
}

pub fn tuning_file(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{MAC_DIR}/tuning_parameters{token}{index:04}.mac"))
}

pub fn run_script(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{SHELL_DIR}/run{token}{index:04}.sh"))
}

pub fn run_log(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{LOG_DIR}/run{token}{index:04}.log"))
}

/// terminal artifact of one stage, the completion signal for the sweep
pub fn stage_output(token: &str, index: u32, stage: Stage) -> PathBuf {
    PathBuf::from(format!(
        "{OUT_DIR}/{}{token}{index:04}.root",
        stage.prefix()
    ))
}

pub fn pjsub_script(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{PJ_DIR}/pjsub{token}{index:04}.sh"))
}

pub fn pjsub_out(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{PJ_OUT_DIR}/pjsub{token}{index:04}.out"))
}

pub fn pjsub_err(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{PJ_ERR_DIR}/pjsub{token}{index:04}.err"))
}

pub fn slurm_script(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{SL_DIR}/slurm{token}{index:04}.sh"))
}

pub fn slurm_out(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{SL_OUT_DIR}/slurm{token}{index:04}"))
}

pub fn slurm_err(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{SL_ERR_DIR}/slurm{token}{index:04}"))
}

pub fn condor_submit_file(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{CONDOR_DIR}/condor{token}{index:04}.sub"))
}

pub fn condor_out(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{CONDOR_OUT_DIR}/condor{token}{index:04}"))
}

pub fn condor_err(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{CONDOR_ERR_DIR}/condor{token}{index:04}"))
}

pub fn condor_log(token: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{CONDOR_LOG_DIR}/condor{token}{index:04}"))
}

/// transient view of one job instance, produced on demand
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub index: u32,
    pub run_script: PathBuf,
    /// expected terminal artifact per enabled stage
    pub outputs: Vec<(Stage, PathBuf)>,
    /// backend submission unit, if a batch system is selected
    pub submission_unit: Option<PathBuf>,
}

pub fn descriptor(cfg: &SimulationConfig, token: &str, index: u32) -> JobDescriptor {
    let submission_unit = match &cfg.backend {
        BackendSelection::None => None,
        BackendSelection::Sukap { .. } => Some(pjsub_script(token, index)),
        BackendSelection::Cedar { .. } => Some(slurm_script(token, index)),
        BackendSelection::Condor { .. } => Some(condor_submit_file(token, index)),
    };

    JobDescriptor {
        index,
        run_script: run_script(token, index),
        outputs: cfg
            .stages
            .enabled()
            .map(|stage| (stage, stage_output(token, index, stage)))
            .collect(),
        submission_unit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContainerArtifact, SimulationConfig};
    use std::path::Path;

    fn config_with(mode: GenerationMode) -> SimulationConfig {
        let container =
            ContainerArtifact::from_values(Some(PathBuf::from("/scratch/software.sif")), None)
                .unwrap();
        let mut cfg = SimulationConfig::new(container).unwrap();
        cfg.mode = mode;
        cfg
    }

    #[test]
    fn beam_token_format() {
        let cfg = config_with(GenerationMode::Beam {
            kinetic_energy: 100.0,
            wall_distance: 0.0,
        });

        assert_eq!(config_token(&cfg), "_wCDS_mu-_Beam_100MeV_0cm_");
    }

    #[test]
    fn uniform_token_format() {
        let mut cfg = config_with(GenerationMode::Uniform {
            energy_low: 0.0,
            energy_high: 2000.0,
        });
        cfg.particle = "e-".to_string();

        assert_eq!(config_token(&cfg), "_wCDS_e-_Uniform_0_2000MeV_");
    }

    #[test]
    fn cosmics_token_drops_the_particle() {
        let mut cfg = config_with(GenerationMode::Cosmics);
        cfg.with_cds = false;

        assert_eq!(config_token(&cfg), "_Comsics_");
    }

    #[test]
    fn tokens_differ_when_mode_parameters_differ() {
        let a = config_with(GenerationMode::Beam {
            kinetic_energy: 100.0,
            wall_distance: 0.0,
        });
        let b = config_with(GenerationMode::Beam {
            kinetic_energy: 200.0,
            wall_distance: 0.0,
        });
        let c = config_with(GenerationMode::Beam {
            kinetic_energy: 100.0,
            wall_distance: 20.0,
        });

        assert_ne!(config_token(&a), config_token(&b));
        assert_ne!(config_token(&a), config_token(&c));
        assert_ne!(config_token(&b), config_token(&c));

        // same parameters always collapse to the same token
        let a_again = config_with(GenerationMode::Beam {
            kinetic_energy: 100.0,
            wall_distance: 0.0,
        });
        assert_eq!(config_token(&a), config_token(&a_again));
    }

    #[test]
    fn indices_are_zero_padded() {
        assert_eq!(
            stage_output("_wCDS_mu-_Beam_100MeV_0cm_", 7, Stage::Wcsim),
            Path::new("out/wcsim_wCDS_mu-_Beam_100MeV_0cm_0007.root")
        );
        assert_eq!(
            stage_output("_wCDS_mu-_Beam_100MeV_0cm_", 42, Stage::Fitqun),
            Path::new("out/fq_wCDS_mu-_Beam_100MeV_0cm_0042.root")
        );
        assert_eq!(
            run_script("_t_", 3),
            Path::new("shell/run_t_0003.sh")
        );
    }

    #[test]
    fn descriptor_only_lists_enabled_stages() {
        let mut cfg = config_with(GenerationMode::Cosmics);
        cfg.stages.mdt = false;
        let token = config_token(&cfg);

        let descriptor = descriptor(&cfg, &token, 0);
        let stages: Vec<Stage> = descriptor.outputs.iter().map(|(stage, _)| *stage).collect();

        assert_eq!(stages, vec![Stage::Wcsim, Stage::Fitqun]);
        assert!(descriptor.submission_unit.is_none());
    }
}
