//! Replay-and-escape interception of one execution attempt.
//!
//! `run` wraps a stochastic program so that execution deterministically
//! replays a given trace prefix, and aborts exactly at the first enumerable
//! discrete site the prefix has not resolved. The abort is reified as the
//! `Outcome::Aborted` variant rather than an unchecked signal, so callers
//! pattern-match instead of catching unwinds.

use crate::engine::EnumError;
use crate::recorder::{BranchPoint, ModelError, Recorder};
use crate::trace::{Trace, TraceError};

/// Result of one interception attempt.
#[derive(Debug)]
pub enum Outcome {
    /// Every site reached was replayed, drawn, or observed.
    Completed(Trace),
    /// Execution halted at an unresolved enumerable site. `partial` holds
    /// the prefix plus every site recorded strictly before the abort.
    Aborted { partial: Trace, site: BranchPoint },
}

/// Execute `program` once against `prefix`.
///
/// Two calls with the same prefix, seed, and program replay identically up
/// to the abort point; the search loop relies on this to discard and
/// recompute partial state instead of suspending call stacks.
pub fn run<F>(prefix: &Trace, seed: u64, program: &F) -> Result<Outcome, EnumError>
where
    F: Fn(&mut Recorder) -> Result<(), ModelError>,
{
    let mut recorder = Recorder::new(prefix.clone(), seed);
    match program(&mut recorder) {
        Ok(()) => {
            if let Some(site) = recorder.pending_prefix_site() {
                return Err(EnumError::NonDeterministicReplay {
                    site: site.to_string(),
                    detail: "prefix site never reached on re-execution".to_string(),
                });
            }
            let (trace, _) = recorder.into_parts();
            log::debug!("replay: completed with {} sites", trace.len());
            Ok(Outcome::Completed(trace))
        }
        Err(ModelError::Escape { site }) => {
            let (partial, branch) = recorder.into_parts();
            match branch {
                Some(branch) if branch.name == site => {
                    log::debug!(
                        "replay: aborted at `{}` after {} sites",
                        site,
                        partial.len()
                    );
                    Ok(Outcome::Aborted {
                        partial,
                        site: branch,
                    })
                }
                // An escape the recorder did not issue is a program bug.
                _ => Err(EnumError::Model(ModelError::Escape { site })),
            }
        }
        Err(ModelError::ReplayMismatch { site, detail }) => {
            Err(EnumError::NonDeterministicReplay { site, detail })
        }
        Err(ModelError::Trace(TraceError::DuplicateSite(site))) => {
            Err(EnumError::NonDeterministicReplay {
                site,
                detail: "site name recorded twice in one execution".to_string(),
            })
        }
        Err(err) => Err(EnumError::Model(err)),
    }
}
