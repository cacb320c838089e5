//! observability surface: list and cancel batch jobs owned by the user
//!
//! Both operations are best effort; a backend that cannot be queried reports
//! no jobs instead of failing the whole command. Reports are returned as
//! lines rather than printed so any caller can surface them verbatim.

use crate::backends::Backends;
use std::{collections::BTreeMap, env};
use tracing::{debug, warn};

/// the invoking user, matched against the owner column of the native listings
pub fn current_user() -> String {
    if let Ok(user) = env::var("USER") {
        if !user.is_empty() {
            return user;
        }
    }

    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => user.name,
        Ok(None) | Err(_) => {
            warn!("could not resolve the invoking user, job filtering will match nothing");
            String::new()
        }
    }
}

/// status lines per backend name
pub fn list_backends(backends: &[Backends]) -> BTreeMap<&'static str, Vec<String>> {
    let user = current_user();

    backends
        .iter()
        .map(|backend| (backend.name(), backend.status_lines(&user)))
        .collect()
}

/// combined kill report over all given backends
pub fn kill_backends(backends: &[Backends]) -> Vec<String> {
    let user = current_user();

    backends
        .iter()
        .flat_map(|backend| {
            let owned = backend.list_owned_jobs(&user);
            debug!(
                backend = backend.name(),
                jobs = owned.len(),
                "cancelling owned jobs"
            );

            backend.kill_owned(&user)
        })
        .collect()
}
