use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

// detector geometry, shared by the token and the generated vertex position
pub const TANK_RADIUS: f64 = 307.5926 / 2.0;
pub const TANK_HALF_Z: f64 = 271.4235 / 2.0;

// beam vertex defaults that are not exposed as options
pub const BEAM_POS_X: f64 = 0.0;
pub const BEAM_POS_Y: f64 = -42.47625;
pub const BEAM_DIR: (f64, f64, f64) = (0.0, 0.0, 1.0);

pub const SIF_ENV: &str = "SOFTWARE_SIF_FILE";
pub const SANDBOX_ENV: &str = "SOFTWARE_SANDBOX_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{SIF_ENV} and {SANDBOX_ENV} are not set")]
    ContainerNotConfigured,
    #[error("{SANDBOX_ENV} is needed for sukap submission")]
    SandboxRequired,
    #[error("the sweep must contain at least one file")]
    EmptySweep,
    #[error("failed to determine the working directory")]
    WorkDir(#[source] std::io::Error),
    #[error("failed to read sweep file {path}")]
    SweepFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse sweep file")]
    SweepFileParse(#[from] serde_yaml::Error),
}

/// one processing step of a job instance, independently toggleable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Wcsim,
    Mdt,
    Fitqun,
}

impl Stage {
    /// prefix used for this stage's output file under out/
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Wcsim => "wcsim",
            Self::Mdt => "mdt",
            Self::Fitqun => "fq",
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct StageSet {
    pub wcsim: bool,
    pub mdt: bool,
    pub fitqun: bool,
}

impl Default for StageSet {
    fn default() -> Self {
        Self {
            wcsim: true,
            mdt: true,
            fitqun: true,
        }
    }
}

impl StageSet {
    pub fn enabled(&self) -> impl Iterator<Item = Stage> {
        [
            (Stage::Wcsim, self.wcsim),
            (Stage::Mdt, self.mdt),
            (Stage::Fitqun, self.fitqun),
        ]
        .into_iter()
        .filter_map(|(stage, on)| on.then_some(stage))
    }
}

/// primary vertex generation mode, exactly one active per sweep
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum GenerationMode {
    Beam {
        kinetic_energy: f64,
        wall_distance: f64,
    },
    Uniform {
        energy_low: f64,
        energy_high: f64,
    },
    Cosmics,
}

impl GenerationMode {
    /// beam parameters substituted into the mac file, falling back to the
    /// historical defaults when another mode is active
    pub fn beam_params(&self) -> (f64, f64) {
        match self {
            Self::Beam {
                kinetic_energy,
                wall_distance,
            } => (*kinetic_energy, *wall_distance),
            _ => (100.0, 0.0),
        }
    }

    pub fn uniform_params(&self) -> (f64, f64) {
        match self {
            Self::Uniform {
                energy_low,
                energy_high,
            } => (*energy_low, *energy_high),
            _ => (0.0, 2000.0),
        }
    }
}

/// selected batch system plus its submission sub-options
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum BackendSelection {
    None,
    Sukap { queue: String },
    Cedar { account: String },
    Condor { flavour: String },
}

/// container artifact resolved from the environment once at startup
#[derive(Debug, Clone)]
pub struct ContainerArtifact {
    pub sif: Option<PathBuf>,
    pub sandbox: Option<PathBuf>,
}

impl ContainerArtifact {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(
            env::var_os(SIF_ENV).map(PathBuf::from),
            env::var_os(SANDBOX_ENV).map(PathBuf::from),
        )
    }

    pub fn from_values(
        sif: Option<PathBuf>,
        sandbox: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if sif.is_none() && sandbox.is_none() {
            return Err(ConfigError::ContainerNotConfigured);
        }

        Ok(Self { sif, sandbox })
    }

    /// image path handed to the run scripts; sukap runs from the extracted
    /// sandbox, the other systems mount the sif file
    pub fn image_for(&self, backend: &BackendSelection) -> Result<&Path, ConfigError> {
        match backend {
            BackendSelection::Sukap { .. } => {
                self.sandbox.as_deref().ok_or(ConfigError::SandboxRequired)
            }
            _ => self
                .sif
                .as_deref()
                .or(self.sandbox.as_deref())
                .ok_or(ConfigError::ContainerNotConfigured),
        }
    }
}

/// admission throttle and submit retry knobs for the sukap queue
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct ThrottleConfig {
    /// submission is withheld while the queue listing reports at least this
    /// many lines
    pub queue_limit: usize,
    pub poll_secs: u64,
    pub retry_secs: u64,
    /// maximum total admission wait; unlimited when unset
    pub max_wait_secs: Option<u64>,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            queue_limit: 300,
            poll_secs: 10,
            retry_secs: 1,
            max_wait_secs: None,
        }
    }
}

impl ThrottleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_secs)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

/// immutable per-run description of one sweep
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub particle: String,
    pub mode: GenerationMode,
    pub with_cds: bool,
    pub events_per_job: u32,
    /// sweep size N
    pub jobs: u32,
    pub seed: u32,
    pub stages: StageSet,
    pub backend: BackendSelection,
    pub container: ContainerArtifact,
    pub throttle: ThrottleConfig,
    /// directory everything is generated into, also the batch jobs' bind mount source
    pub work_dir: PathBuf,
    /// mount point of work_dir inside the container
    pub mount_dir: PathBuf,
}

impl SimulationConfig {
    pub fn new(container: ContainerArtifact) -> Result<Self, ConfigError> {
        let work_dir = env::current_dir().map_err(ConfigError::WorkDir)?;

        Ok(Self {
            particle: "mu-".to_string(),
            mode: GenerationMode::Beam {
                kinetic_energy: 100.0,
                wall_distance: 0.0,
            },
            with_cds: true,
            events_per_job: 1000,
            jobs: 100,
            seed: 20260129,
            stages: StageSet::default(),
            backend: BackendSelection::None,
            container,
            throttle: ThrottleConfig::default(),
            work_dir,
            mount_dir: PathBuf::from("/mnt"),
        })
    }

    /// check invariants that cannot be enforced by construction
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jobs == 0 {
            return Err(ConfigError::EmptySweep);
        }

        if matches!(self.backend, BackendSelection::Sukap { .. }) && self.container.sandbox.is_none()
        {
            return Err(ConfigError::SandboxRequired);
        }

        Ok(())
    }
}

/// optional YAML sweep description, applied beneath the command line flags
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(deny_unknown_fields, default)]
pub struct SweepSpec {
    pub particle: Option<String>,
    pub mode: Option<GenerationMode>,
    pub with_cds: Option<bool>,
    pub events_per_job: Option<u32>,
    pub jobs: Option<u32>,
    pub seed: Option<u32>,
    pub stages: Option<StageSet>,
    pub throttle: Option<ThrottleConfig>,
}

impl SweepSpec {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path).map_err(|source| ConfigError::SweepFileRead {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = ?path, "loading sweep description");

        Ok(serde_yaml::from_reader(file)?)
    }

    pub fn apply(self, cfg: &mut SimulationConfig) {
        if let Some(particle) = self.particle {
            cfg.particle = particle;
        }
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(with_cds) = self.with_cds {
            cfg.with_cds = with_cds;
        }
        if let Some(events_per_job) = self.events_per_job {
            cfg.events_per_job = events_per_job;
        }
        if let Some(jobs) = self.jobs {
            cfg.jobs = jobs;
        }
        if let Some(seed) = self.seed {
            cfg.seed = seed;
        }
        if let Some(stages) = self.stages {
            cfg.stages = stages;
        }
        if let Some(throttle) = self.throttle {
            cfg.throttle = throttle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SimulationConfig {
        let container =
            ContainerArtifact::from_values(Some(PathBuf::from("/scratch/software.sif")), None)
                .unwrap();
        let mut cfg = SimulationConfig::new(container).unwrap();
        cfg.work_dir = PathBuf::from("/tmp/sweep");
        cfg
    }

    #[test]
    fn container_requires_one_artifact() {
        assert!(matches!(
            ContainerArtifact::from_values(None, None),
            Err(ConfigError::ContainerNotConfigured)
        ));
    }

    #[test]
    fn sukap_requires_a_sandbox() {
        let mut cfg = test_config();
        cfg.backend = BackendSelection::Sukap {
            queue: "all".to_string(),
        };

        assert!(matches!(cfg.validate(), Err(ConfigError::SandboxRequired)));

        cfg.container.sandbox = Some(PathBuf::from("/scratch/sandbox"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn empty_sweep_is_rejected() {
        let mut cfg = test_config();
        cfg.jobs = 0;

        assert!(matches!(cfg.validate(), Err(ConfigError::EmptySweep)));
    }

    #[test]
    fn sandbox_backs_the_sukap_image() {
        let container = ContainerArtifact::from_values(
            Some(PathBuf::from("/scratch/software.sif")),
            Some(PathBuf::from("/scratch/sandbox")),
        )
        .unwrap();

        let sukap = BackendSelection::Sukap {
            queue: "all".to_string(),
        };
        let cedar = BackendSelection::Cedar {
            account: "rpp-prod".to_string(),
        };

        assert_eq!(
            container.image_for(&sukap).unwrap(),
            Path::new("/scratch/sandbox")
        );
        assert_eq!(
            container.image_for(&cedar).unwrap(),
            Path::new("/scratch/software.sif")
        );
    }

    #[test]
    fn sweep_spec_overrides_defaults() {
        let spec: SweepSpec = serde_yaml::from_str(
            "particle: e-\njobs: 42\nmode: !uniform\n  energy_low: 0\n  energy_high: 500\n",
        )
        .unwrap();

        let mut cfg = test_config();
        spec.apply(&mut cfg);

        assert_eq!(cfg.particle, "e-");
        assert_eq!(cfg.jobs, 42);
        assert_eq!(
            cfg.mode,
            GenerationMode::Uniform {
                energy_low: 0.0,
                energy_high: 500.0
            }
        );
        // untouched fields keep their defaults
        assert_eq!(cfg.events_per_job, 1000);
    }
}
