//! Locator ladder resolution
//!
//! The scope predicate is checked first. Rungs are then tried in ladder
//! order and the first one matching exactly one live element wins. A rung
//! that matches nothing, matches several elements, or fails outright is
//! recorded and skipped; only running out of rungs is an error.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{Error, Result};
use crate::trace::{ActionOutcome, MatchAttempt, ResolvedElement};
use crate::types::{Target, TargetRung, TargetScope};

/// Live-state queries a driver must answer for resolution.
#[async_trait]
pub trait LocatorProbe: Send + Sync {
    /// Fail with [`Error::ScopeMismatch`] when the scope does not hold.
    async fn check_scope(&self, scope: &TargetScope) -> Result<()>;

    /// Count live elements matching a rung, waiting up to `timeout` for at
    /// least one to appear.
    async fn count(
        &self,
        rung: &TargetRung,
        scope: Option<&TargetScope>,
        timeout: Option<Duration>,
    ) -> Result<usize>;
}

/// Winning rung plus every attempt up to and including it.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub resolved: ResolvedElement,
    pub match_attempts: Vec<MatchAttempt>,
}

impl Resolution {
    pub fn rung_index(&self) -> usize {
        self.resolved.rung_index
    }

    pub fn into_outcome(self) -> ActionOutcome {
        ActionOutcome {
            match_attempts: self.match_attempts,
            resolved: Some(self.resolved),
            ..Default::default()
        }
    }
}

/// Resolve `target` against live state.
pub async fn resolve_ladder<P>(probe: &P, target: &Target, timeout: Option<Duration>) -> Result<Resolution>
where
    P: LocatorProbe + ?Sized,
{
    if let Some(scope) = &target.scope {
        probe.check_scope(scope).await?;
    }

    let mut attempts = Vec::with_capacity(target.ladder.len());
    for (index, rung) in target.ladder.iter().enumerate() {
        let started = Instant::now();
        let counted = probe.count(rung, target.scope.as_ref(), timeout).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let attempt = match counted {
            Ok(matched_count) => MatchAttempt {
                rung_index: index,
                kind: rung.kind.clone(),
                matched_count,
                duration_ms,
                ok: matched_count == 1,
                error: None,
            },
            Err(e) => MatchAttempt {
                rung_index: index,
                kind: rung.kind.clone(),
                matched_count: 0,
                duration_ms,
                ok: false,
                error: Some(e.to_string()),
            },
        };
        debug!(
            "rung {} ({}) matched {} element(s)",
            index, rung.kind, attempt.matched_count
        );

        let ok = attempt.ok;
        attempts.push(attempt);
        if ok {
            return Ok(Resolution {
                resolved: ResolvedElement {
                    rung_index: index,
                    kind: rung.kind.clone(),
                    selector: Some(rung.selector.clone()),
                    element: None,
                },
                match_attempts: attempts,
            });
        }
    }

    Err(Error::LadderExhausted { attempts })
}
