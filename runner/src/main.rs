mod backends;
mod completion;
mod config;
mod dispatch;
mod generate;
mod naming;
mod status;

use backends::Backends;
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::{
    BackendSelection, ContainerArtifact, GenerationMode, SimulationConfig, SweepSpec,
};
use dispatch::DispatchError;
use itertools::Itertools;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "wcprod",
    version,
    about = "Generate and submit WCSim production sweeps across sukap, cedar and condor"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// generate mac files and run scripts, then submit the missing jobs
    Run(RunArgs),
    /// list batch jobs owned by the current user
    Status {
        /// backend to query, all of them when omitted
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },
    /// cancel batch jobs owned by the current user
    Kill {
        #[arg(long, value_enum)]
        backend: BackendArg,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// particle name (mu-, e-, etc.)
    #[arg(short = 'p', long = "pid")]
    particle: Option<String>,

    /// beam mode: kinetic energy in MeV and wall distance in cm
    #[arg(short = 'b', long, value_name = "KE,WALL", value_parser = parse_pair)]
    beam: Option<(f64, f64)>,

    /// uniform vertex mode: kinetic energy range in MeV
    #[arg(short = 'u', long, value_name = "LOW,HIGH", value_parser = parse_pair)]
    uniform: Option<(f64, f64)>,

    /// cosmic muon mode
    #[arg(short = 'm', long)]
    cosmics: bool,

    /// number of events per file
    #[arg(short = 'n', long)]
    nevs: Option<u32>,

    /// number of files in the sweep
    #[arg(short = 'f', long)]
    nfiles: Option<u32>,

    /// seed of the per-job sub-seed stream
    #[arg(short = 's', long)]
    seed: Option<u32>,

    /// disable the CDS in the detector
    #[arg(short = 'c', long = "no-cds")]
    no_cds: bool,

    /// skip the WCSim stage
    #[arg(long)]
    no_wcsim: bool,

    /// skip the MDT stage
    #[arg(long)]
    no_mdt: bool,

    /// skip the fiTQun stage
    #[arg(long)]
    no_fq: bool,

    /// submit on sukap, optionally naming the resource group
    #[arg(
        short = 'k',
        long,
        value_name = "QUEUE",
        num_args = 0..=1,
        default_missing_value = "all"
    )]
    sukap: Option<String>,

    /// submit on cedar under the given RAP account
    #[arg(short = 'd', long, value_name = "ACCOUNT")]
    cedar: Option<String>,

    /// submit on lxplus condor, optionally naming the job flavour
    #[arg(
        long,
        value_name = "FLAVOUR",
        num_args = 0..=1,
        default_missing_value = "tomorrow"
    )]
    condor: Option<String>,

    /// YAML sweep description applied beneath the command line flags
    #[arg(long, value_name = "FILE")]
    sweep: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Sukap,
    Cedar,
    Condor,
}

impl BackendArg {
    /// selection with the backend's default sub-options, enough for the
    /// status and kill surfaces which never submit
    fn selection(self) -> BackendSelection {
        match self {
            Self::Sukap => BackendSelection::Sukap {
                queue: "all".to_string(),
            },
            Self::Cedar => BackendSelection::Cedar {
                account: String::new(),
            },
            Self::Condor => BackendSelection::Condor {
                flavour: "tomorrow".to_string(),
            },
        }
    }
}

fn parse_pair(value: &str) -> Result<(f64, f64), String> {
    let (first, second) = value
        .split_once(',')
        .ok_or_else(|| format!("expected two comma separated values, got '{value}'"))?;

    let first = first
        .trim()
        .parse()
        .map_err(|error| format!("invalid number '{}': {error}", first.trim()))?;
    let second = second
        .trim()
        .parse()
        .map_err(|error| format!("invalid number '{}': {error}", second.trim()))?;

    Ok((first, second))
}

/// fold the sweep file and the command line flags over the defaults
///
/// Mode and backend flags overwrite each other in fixed order (beam, uniform,
/// cosmics and sukap, cedar, condor), matching the historical last-wins
/// behaviour instead of rejecting conflicting flags.
fn build_config(args: RunArgs) -> Result<SimulationConfig, config::ConfigError> {
    let container = ContainerArtifact::from_env()?;
    let mut cfg = SimulationConfig::new(container)?;

    if let Some(path) = &args.sweep {
        SweepSpec::load(path)?.apply(&mut cfg);
    }

    if let Some(particle) = args.particle {
        cfg.particle = particle;
    }
    if let Some((kinetic_energy, wall_distance)) = args.beam {
        cfg.mode = GenerationMode::Beam {
            kinetic_energy,
            wall_distance,
        };
    }
    if let Some((energy_low, energy_high)) = args.uniform {
        cfg.mode = GenerationMode::Uniform {
            energy_low,
            energy_high,
        };
    }
    if args.cosmics {
        cfg.mode = GenerationMode::Cosmics;
    }

    if let Some(nevs) = args.nevs {
        cfg.events_per_job = nevs;
    }
    if let Some(nfiles) = args.nfiles {
        cfg.jobs = nfiles;
    }
    if let Some(seed) = args.seed {
        cfg.seed = seed;
    }

    if args.no_cds {
        cfg.with_cds = false;
    }
    if args.no_wcsim {
        cfg.stages.wcsim = false;
    }
    if args.no_mdt {
        cfg.stages.mdt = false;
    }
    if args.no_fq {
        cfg.stages.fitqun = false;
    }

    if let Some(queue) = args.sukap {
        cfg.backend = BackendSelection::Sukap { queue };
    }
    if let Some(account) = args.cedar {
        cfg.backend = BackendSelection::Cedar { account };
    }
    if let Some(flavour) = args.condor {
        cfg.backend = BackendSelection::Condor { flavour };
    }

    cfg.validate()?;
    Ok(cfg)
}

fn backends_for(backend: Option<BackendArg>) -> Vec<Backends> {
    let throttle = config::ThrottleConfig::default();
    let selections = match backend {
        Some(arg) => vec![arg.selection()],
        None => vec![
            BackendArg::Sukap.selection(),
            BackendArg::Cedar.selection(),
            BackendArg::Condor.selection(),
        ],
    };

    selections
        .iter()
        .filter_map(|selection| Backends::from_selection(selection, &throttle))
        .collect()
}

fn run(cli: Cli) -> Result<(), DispatchError> {
    match cli.command {
        Command::Run(args) => {
            let cfg = build_config(args)?;
            let summary = dispatch::dispatch(&cfg)?;

            println!(
                "Submitted {} jobs. Skipped {} jobs due to existing files.",
                summary.submitted, summary.skipped
            );

            if !summary.handles.is_empty() {
                println!(
                    "Acknowledged job ids: {}",
                    summary
                        .handles
                        .iter()
                        .map(|handle| handle.job_id.to_string())
                        .join(", ")
                );
            }
        }
        Command::Status { backend } => {
            for (name, lines) in status::list_backends(&backends_for(backend)) {
                println!("[{name}]");
                if lines.is_empty() {
                    println!("No jobs found.");
                } else {
                    for line in lines {
                        println!("{line}");
                    }
                }
            }
        }
        Command::Kill { backend } => {
            for line in status::kill_backends(&backends_for(Some(backend))) {
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli) {
        error!("{error}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_parsing() {
        assert_eq!(parse_pair("100,0"), Ok((100.0, 0.0)));
        assert_eq!(parse_pair(" 0 , 2000 "), Ok((0.0, 2000.0)));
        assert!(parse_pair("100").is_err());
        assert!(parse_pair("a,b").is_err());
    }

    #[test]
    fn later_mode_flags_win() {
        let cli = Cli::try_parse_from([
            "wcprod", "run", "--beam", "100,0", "--uniform", "0,2000", "--cosmics",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };

        // fixed application order: beam, uniform, then cosmics on top
        assert!(args.beam.is_some());
        assert!(args.uniform.is_some());
        assert!(args.cosmics);
    }

    #[test]
    fn backend_flags_accept_optional_values() {
        let cli = Cli::try_parse_from(["wcprod", "run", "--sukap"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(args.sukap.as_deref(), Some("all"));

        let cli = Cli::try_parse_from(["wcprod", "run", "--condor", "longlunch"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(args.condor.as_deref(), Some("longlunch"));
    }
}
