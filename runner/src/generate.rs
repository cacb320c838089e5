//! generation of the per-index mac files and run scripts
//!
//! The physics templates live under template/ next to the sweep directory and
//! are treated as opaque content; this module only substitutes `$name` /
//! `${name}` placeholders the way the legacy production scripts did (`$$`
//! escapes a literal dollar so the shell templates keep their own variables).

use crate::{
    config::{
        BackendSelection, ConfigError, GenerationMode, SimulationConfig, BEAM_DIR, BEAM_POS_X,
        BEAM_POS_Y, TANK_HALF_Z, TANK_RADIUS,
    },
    naming,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{collections::BTreeMap, fs, path::PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const WCSIM_DIR: &str = "/opt/WCSim";

pub const MAC_TEMPLATE: &str = "template/WCTE.mac";
pub const TUNING_TEMPLATE: &str = "template/tuning_parameters.mac";
pub const RUN_TEMPLATE: &str = "template/run.sh";
pub const PJSUB_TEMPLATE: &str = "template/pjsub.sh";
pub const SLURM_TEMPLATE: &str = "template/slurm.sh";
pub const CONDOR_TEMPLATE: &str = "template/condor_submit.sub";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("failed to read template {path}")]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("template references unknown placeholder ${name}")]
    MissingPlaceholder { name: String },
    #[error("template contains an unterminated ${{...}} placeholder")]
    UnterminatedPlaceholder,
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type TemplateVars = BTreeMap<&'static str, String>;

/// read a template relative to the sweep working directory
pub(crate) fn read_template(
    cfg: &SimulationConfig,
    name: &str,
) -> Result<String, GenerationError> {
    let path = cfg.work_dir.join(name);
    fs::read_to_string(&path).map_err(|source| GenerationError::TemplateRead { path, source })
}

/// write a rendered artifact relative to the sweep working directory
pub(crate) fn write_generated(
    cfg: &SimulationConfig,
    relative: PathBuf,
    content: String,
) -> Result<(), GenerationError> {
    let path = cfg.work_dir.join(relative);
    debug!(path = ?path, "writing generated file");
    fs::write(&path, content).map_err(|source| GenerationError::Write { path, source })
}

/// substitute `$name` and `${name}` from `vars`, `$$` yields a literal `$`
pub fn render(template: &str, vars: &TemplateVars) -> Result<String, GenerationError> {
    fn lookup<'a>(vars: &'a TemplateVars, name: &str) -> Result<&'a str, GenerationError> {
        vars.get(name)
            .map(String::as_str)
            .ok_or_else(|| GenerationError::MissingPlaceholder {
                name: name.to_string(),
            })
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
        } else if let Some(braced) = after.strip_prefix('{') {
            let end = braced
                .find('}')
                .ok_or(GenerationError::UnterminatedPlaceholder)?;
            out.push_str(lookup(vars, &braced[..end])?);
            rest = &braced[end + 1..];
        } else {
            let len = after
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .count();

            if len == 0 {
                // a lone dollar sign is passed through unchanged
                out.push('$');
                rest = after;
            } else {
                out.push_str(lookup(vars, &after[..len])?);
                rest = &after[len..];
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

/// deterministic per-job sub-seed stream derived from the sweep seed
#[derive(Debug)]
pub struct SubSeedStream {
    rng: StdRng,
}

impl SubSeedStream {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(u64::from(seed)),
        }
    }

    pub fn next_seed(&mut self) -> u32 {
        self.rng.gen_range(0..1_000_000_000)
    }
}

/// renders the full set of per-index artifacts for one sweep
///
/// Generation is idempotent and cheap, so it always covers the whole sweep
/// regardless of which outputs already exist.
pub struct FileGenerator<'a> {
    cfg: &'a SimulationConfig,
    token: String,
    seeds: SubSeedStream,
}

impl<'a> FileGenerator<'a> {
    pub fn new(cfg: &'a SimulationConfig, token: String) -> Self {
        Self {
            seeds: SubSeedStream::new(cfg.seed),
            cfg,
            token,
        }
    }

    pub fn create_directories(&self) -> Result<(), GenerationError> {
        for dir in naming::base_dirs()
            .iter()
            .chain(naming::backend_dirs(&self.cfg.backend))
        {
            let path = self.cfg.work_dir.join(dir);
            fs::create_dir_all(&path)
                .map_err(|source| GenerationError::CreateDir { path, source })?;
        }

        Ok(())
    }

    fn read_template(&self, name: &str) -> Result<String, GenerationError> {
        read_template(self.cfg, name)
    }

    fn write(&self, relative: PathBuf, content: String) -> Result<(), GenerationError> {
        write_generated(self.cfg, relative, content)
    }

    /// render the WCSim mac and tuning files for every index
    pub fn generate_mac_files(&mut self) -> Result<(), GenerationError> {
        info!("Creating mac files for WCSim");

        let mac_template = self.read_template(MAC_TEMPLATE)?;
        let tuning_template = self.read_template(TUNING_TEMPLATE)?;

        let cfg = self.cfg;
        let (kinetic_energy, wall_distance) = cfg.mode.beam_params();
        let (energy_low, energy_high) = cfg.mode.uniform_params();
        let (dir_x, dir_y, dir_z) = BEAM_DIR;

        for index in 0..cfg.jobs {
            let mac_seed = self.seeds.next_seed();
            let output = cfg
                .mount_dir
                .join(naming::stage_output(&self.token, index, crate::config::Stage::Wcsim));

            let vars = TemplateVars::from([
                ("wcsimdir", WCSIM_DIR.to_string()),
                ("rngseed", mac_seed.to_string()),
                ("wCDSmac", comment_flag(cfg.with_cds)),
                (
                    "beammac",
                    comment_flag(matches!(cfg.mode, GenerationMode::Beam { .. })),
                ),
                (
                    "uniformmac",
                    comment_flag(matches!(cfg.mode, GenerationMode::Uniform { .. })),
                ),
                (
                    "comsicsmac",
                    comment_flag(matches!(cfg.mode, GenerationMode::Cosmics)),
                ),
                ("ParticleName", cfg.particle.clone()),
                ("ParticleKE", format_num(kinetic_energy)),
                ("ParticleDirx", format_num(dir_x)),
                ("ParticleDiry", format_num(dir_y)),
                ("ParticleDirz", format_num(dir_z)),
                ("ParticlePosx", format_num(BEAM_POS_X)),
                ("ParticlePosy", format_num(BEAM_POS_Y)),
                ("ParticlePosz", format_num(-(TANK_RADIUS - wall_distance))),
                ("ParticleKELow", format_num(energy_low)),
                ("ParticleKEHigh", format_num(energy_high)),
                ("rmac", format_num(TANK_RADIUS)),
                ("zmac", format_num(TANK_HALF_Z)),
                ("nevs", cfg.events_per_job.to_string()),
                ("filename", output.display().to_string()),
            ]);

            self.write(naming::mac_file(&self.token, index), render(&mac_template, &vars)?)?;

            let tuning_vars = TemplateVars::from([("wcsimdir", WCSIM_DIR.to_string())]);
            self.write(
                naming::tuning_file(&self.token, index),
                render(&tuning_template, &tuning_vars)?,
            )?;
        }

        Ok(())
    }

    /// render the generic containerised run script for every index
    pub fn generate_run_scripts(&mut self) -> Result<(), GenerationError> {
        info!("Creating shell scripts for simulation");

        let template = self.read_template(RUN_TEMPLATE)?;
        let cfg = self.cfg;

        let image = cfg.container.image_for(&cfg.backend)?.to_path_buf();
        let is_sukap = matches!(cfg.backend, BackendSelection::Sukap { .. });
        let is_condor = matches!(cfg.backend, BackendSelection::Condor { .. });

        for index in 0..cfg.jobs {
            let mounted = |relative: PathBuf| cfg.mount_dir.join(relative).display().to_string();

            let vars = TemplateVars::from([
                ("curdir", cfg.work_dir.display().to_string()),
                ("cern_condor", comment_flag(is_condor)),
                (
                    "userns",
                    if is_sukap { "-u" } else { "" }.to_string(),
                ),
                ("mntdir", cfg.mount_dir.display().to_string()),
                ("siffile", image.display().to_string()),
                ("runwcsim", comment_flag(cfg.stages.wcsim)),
                ("runmdt", comment_flag(cfg.stages.mdt)),
                ("runfq", comment_flag(cfg.stages.fitqun)),
                ("macfile", mounted(naming::mac_file(&self.token, index))),
                ("tuningfile", mounted(naming::tuning_file(&self.token, index))),
                ("logfile", mounted(naming::run_log(&self.token, index))),
                (
                    "wcsimfile",
                    mounted(naming::stage_output(&self.token, index, crate::config::Stage::Wcsim)),
                ),
                (
                    "mdtfile",
                    mounted(naming::stage_output(&self.token, index, crate::config::Stage::Mdt)),
                ),
                (
                    "fqfile",
                    mounted(naming::stage_output(&self.token, index, crate::config::Stage::Fitqun)),
                ),
                ("nevs", cfg.events_per_job.to_string()),
                ("rngseed", self.seeds.next_seed().to_string()),
            ]);

            self.write(naming::run_script(&self.token, index), render(&template, &vars)?)?;
        }

        Ok(())
    }
}

/// templates comment out disabled lines with a leading `#`
fn comment_flag(enabled: bool) -> String {
    if enabled { String::new() } else { "#".to_string() }
}

/// match the `%g`-style rendering of the legacy templates: integral values
/// print without a trailing `.0`
fn format_num(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> TemplateVars {
        pairs
            .iter()
            .map(|(name, value)| (*name, value.to_string()))
            .collect()
    }

    #[test]
    fn render_substitutes_both_placeholder_forms() {
        let vars = vars(&[("seed", "123"), ("file", "out/wcsim.root")]);

        assert_eq!(
            render("seed $seed -> ${file}", &vars).unwrap(),
            "seed 123 -> out/wcsim.root"
        );
    }

    #[test]
    fn render_keeps_escaped_and_lone_dollars() {
        let vars = vars(&[("nevs", "1000")]);

        assert_eq!(
            render("echo $$HOME $nevs $ end", &vars).unwrap(),
            "echo $HOME 1000 $ end"
        );
    }

    #[test]
    fn render_rejects_unknown_placeholders() {
        assert!(matches!(
            render("$missing", &TemplateVars::new()),
            Err(GenerationError::MissingPlaceholder { name }) if name == "missing"
        ));
    }

    #[test]
    fn render_rejects_unterminated_braces() {
        assert!(matches!(
            render("${open", &TemplateVars::new()),
            Err(GenerationError::UnterminatedPlaceholder)
        ));
    }

    #[test]
    fn sub_seeds_are_deterministic() {
        let mut a = SubSeedStream::new(20260129);
        let mut b = SubSeedStream::new(20260129);
        let first: Vec<u32> = (0..8).map(|_| a.next_seed()).collect();
        let second: Vec<u32> = (0..8).map(|_| b.next_seed()).collect();

        assert_eq!(first, second);
        assert!(first.iter().all(|seed| *seed < 1_000_000_000));

        let mut c = SubSeedStream::new(1);
        let third: Vec<u32> = (0..8).map(|_| c.next_seed()).collect();
        assert_ne!(first, third);
    }

    #[test]
    fn integral_parameters_render_without_fraction() {
        assert_eq!(format_num(100.0), "100");
        assert_eq!(format_num(0.0), "0");
        assert_eq!(format_num(-42.47625), "-42.47625");
    }
}
