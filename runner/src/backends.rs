//! batch system adapters
//!
//! One variant per supported batch system behind a single closed enum
//! (deliberately no dynamic dispatch); adding a backend means adding one
//! variant here without touching the dispatch loop.

pub mod cedar;
pub mod condor;
pub mod process;
pub mod sukap;

#[cfg(test)]
mod cedar_test;

use crate::{
    config::{BackendSelection, SimulationConfig, ThrottleConfig},
    generate::GenerationError,
};
use std::{ffi::OsStr, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("failed to invoke {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    // the native tools signal failure through stderr, the exit code is not
    // reliable across all three systems
    #[error("{backend} submission failed: {stderr}")]
    Rejected {
        backend: &'static str,
        stderr: String,
    },
    #[error("queue admission not granted after {waited_secs}s")]
    AdmissionTimeout { waited_secs: u64 },
}

/// handle to a submitted job on the polling backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendJobHandle {
    pub job_id: u64,
    pub index: u32,
}

/// one row of a native queue listing, filtered to the invoking user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobRecord {
    pub raw: String,
    pub owner: String,
    pub job_id: String,
}

/// parsed flat listing of one backend's queue
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub header: Option<String>,
    pub records: Vec<RemoteJobRecord>,
}

impl Listing {
    /// printable report: the header is repeated only when rows matched
    pub fn status_lines(&self) -> Vec<String> {
        if self.records.is_empty() {
            return Vec::new();
        }

        self.header
            .iter()
            .cloned()
            .chain(self.records.iter().map(|record| record.raw.clone()))
            .collect()
    }
}

/// run a native submit command; any stderr output counts as failure
pub(crate) fn submit_command<I, S>(
    backend: &'static str,
    program: &str,
    args: I,
) -> Result<String, SubmissionError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = process::run(program, args).map_err(|source| SubmissionError::Spawn {
        command: program.to_string(),
        source,
    })?;

    if !output.stderr.is_empty() {
        return Err(SubmissionError::Rejected {
            backend,
            stderr: output.stderr,
        });
    }

    Ok(output.stdout)
}

/// same contract for submitters that need a shell command line
pub(crate) fn submit_shell_command(
    backend: &'static str,
    command: &str,
) -> Result<String, SubmissionError> {
    let output = process::run_shell(command).map_err(|source| SubmissionError::Spawn {
        command: command.to_string(),
        source,
    })?;

    if !output.stderr.is_empty() {
        return Err(SubmissionError::Rejected {
            backend,
            stderr: output.stderr,
        });
    }

    Ok(output.stdout)
}

/// the closed set of supported batch systems
#[derive(Debug, Clone)]
pub enum Backends {
    Sukap(sukap::SukapBackend),
    Cedar(cedar::CedarBackend),
    Condor(condor::CondorBackend),
}

impl Backends {
    /// instantiate the adapter for a backend selection, None when no batch
    /// system was selected
    pub fn from_selection(selection: &BackendSelection, throttle: &ThrottleConfig) -> Option<Self> {
        match selection {
            BackendSelection::None => None,
            BackendSelection::Sukap { queue } => Some(Self::Sukap(sukap::SukapBackend::new(
                queue.clone(),
                throttle.clone(),
            ))),
            BackendSelection::Cedar { account } => {
                Some(Self::Cedar(cedar::CedarBackend::new(account.clone())))
            }
            BackendSelection::Condor { flavour } => {
                Some(Self::Condor(condor::CondorBackend::new(flavour.clone())))
            }
        }
    }

    pub fn load(cfg: &SimulationConfig) -> Option<Self> {
        Self::from_selection(&cfg.backend, &cfg.throttle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sukap(_) => sukap::NAME,
            Self::Cedar(_) => cedar::NAME,
            Self::Condor(_) => condor::NAME,
        }
    }

    /// write the backend native submission file for one index, pure
    /// templating without any submission
    pub fn render_submission_unit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<PathBuf, GenerationError> {
        match self {
            Self::Sukap(backend) => backend.render_submission_unit(cfg, token, index),
            Self::Cedar(backend) => backend.render_submission_unit(cfg, token, index),
            Self::Condor(backend) => backend.render_submission_unit(cfg, token, index),
        }
    }

    /// submit one index with this backend's protocol (throttled at-least-once
    /// on sukap, single-shot on cedar and condor)
    pub fn submit(
        &self,
        cfg: &SimulationConfig,
        token: &str,
        index: u32,
    ) -> Result<Option<BackendJobHandle>, SubmissionError> {
        match self {
            Self::Sukap(backend) => backend.submit(cfg, token, index),
            Self::Cedar(backend) => backend.submit(cfg, token, index).map(|()| None),
            Self::Condor(backend) => backend.submit(cfg, token, index).map(|()| None),
        }
    }

    pub fn list_owned_jobs(&self, user: &str) -> Vec<RemoteJobRecord> {
        match self {
            Self::Sukap(backend) => backend.list_owned_jobs(user),
            Self::Cedar(backend) => backend.list_owned_jobs(user),
            Self::Condor(backend) => backend.list_owned_jobs(user),
        }
    }

    /// raw status lines of the owned jobs, ready to print verbatim
    pub fn status_lines(&self, user: &str) -> Vec<String> {
        match self {
            Self::Sukap(backend) => backend.status_lines(user),
            Self::Cedar(backend) => backend.status_lines(user),
            Self::Condor(backend) => backend.status_lines(user),
        }
    }

    /// best effort cancel of every job owned by `user`, returns the report
    /// instead of printing so callers can forward it
    pub fn kill_owned(&self, user: &str) -> Vec<String> {
        match self {
            Self::Sukap(backend) => backend.kill_owned(user),
            Self::Cedar(backend) => backend.kill_owned(user),
            Self::Condor(backend) => backend.kill_owned(user),
        }
    }
}
