//! Early-exit control for one track's query loop.
//!
//! One state per track, `Searching` until a stop rule fires. Rules are checked
//! after every processed query, in order:
//!
//! 1. query cap (remix intent has its own, usually lower, cap)
//! 2. time budget
//! 3. remix confidence (remix intent only)
//! 4. family consensus: a slightly lower score found by a "full title + one or
//!    two artists" query
//! 5. primary early exit
//!
//! The score-driven rules (3-5) each have a minimum-queries gate that depends on
//! the intent case. They never fire before their gate, however high the score.

use serde::Serialize;
use std::time::Duration;

use crate::config::MatchConfig;
use crate::mix::MixIntent;
use crate::models::Candidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    QueryCap,
    RemixQueryCap,
    TimeBudget,
    RemixConfidence,
    FamilyConsensus,
    EarlyExit,
    /// Every generated query ran without another rule firing.
    Exhausted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::QueryCap => "query_cap",
            StopReason::RemixQueryCap => "remix_query_cap",
            StopReason::TimeBudget => "time_budget",
            StopReason::RemixConfidence => "remix_confidence",
            StopReason::FamilyConsensus => "family_consensus",
            StopReason::EarlyExit => "early_exit",
            StopReason::Exhausted => "exhausted",
        }
    }
}

/// Which set of minimum-queries gates applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentCase {
    /// Original or Extended requested
    Original,
    Default,
    Remix,
}

impl IntentCase {
    pub fn from_intent(intent: &MixIntent) -> Self {
        if intent.remix {
            IntentCase::Remix
        } else if intent.original || intent.extended {
            IntentCase::Original
        } else {
            IntentCase::Default
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Searching,
    Stopped(StopReason),
}

/// What the controller sees after one query.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Number of queries processed so far (1-based index of the last one)
    pub query_index: usize,
    pub elapsed: Duration,
    pub best: Option<&'a Candidate>,
    /// The query that produced `best` was family-shaped
    pub best_from_family_query: bool,
    /// The query just processed was family-shaped
    pub current_family_query: bool,
}

pub struct EarlyExitController<'a> {
    config: &'a MatchConfig,
    case: IntentCase,
    /// The track asked for a generic phrase, so the best must carry it
    needs_phrase: bool,
    state: ExitState,
}

impl<'a> EarlyExitController<'a> {
    pub fn new(config: &'a MatchConfig, intent: &MixIntent, needs_phrase: bool) -> Self {
        Self {
            config,
            case: IntentCase::from_intent(intent),
            needs_phrase,
            state: ExitState::Searching,
        }
    }

    pub fn case(&self) -> IntentCase {
        self.case
    }

    pub fn state(&self) -> ExitState {
        self.state
    }

    /// Primary early-exit gate for this track's intent case.
    pub fn primary_gate(&self) -> usize {
        match self.case {
            IntentCase::Original => self.config.early_exit_min_queries_original,
            IntentCase::Default => self.config.early_exit_min_queries_default,
            IntentCase::Remix => self.config.early_exit_min_queries_remix,
        }
    }

    pub fn family_gate(&self) -> usize {
        match self.case {
            IntentCase::Original => self.config.family_min_queries_original,
            IntentCase::Default => self.config.family_min_queries_default,
            IntentCase::Remix => self.config.family_min_queries_remix,
        }
    }

    /// Smallest query index at which any score-driven rule may fire.
    pub fn min_score_gate(&self) -> usize {
        let gate = self.primary_gate().min(self.family_gate());
        match self.case {
            IntentCase::Remix => gate.min(self.config.remix_exit_min_queries),
            _ => gate,
        }
    }

    /// Evaluate the stop rules after a query. Once stopped, the state never changes.
    pub fn observe(&mut self, obs: &Observation) -> ExitState {
        if let ExitState::Searching = self.state {
            if let Some(reason) = self.check(obs) {
                tracing::debug!(
                    "stop after query {}: {} (case {:?})",
                    obs.query_index,
                    reason.as_str(),
                    self.case
                );
                self.state = ExitState::Stopped(reason);
            }
        }
        self.state
    }

    fn check(&self, obs: &Observation) -> Option<StopReason> {
        let config = self.config;
        let i = obs.query_index;

        if i >= config.max_queries {
            return Some(StopReason::QueryCap);
        }
        if self.case == IntentCase::Remix && i >= config.remix_max_queries {
            return Some(StopReason::RemixQueryCap);
        }
        if config.run_all_queries {
            return None;
        }
        if obs.elapsed >= Duration::from_millis(config.time_budget_ms) {
            return Some(StopReason::TimeBudget);
        }

        let best = obs.best.filter(|b| b.guard_ok)?;
        let phrase_ok = !self.needs_phrase || best.phrase_matched;

        if self.case == IntentCase::Remix
            && best.final_score >= config.remix_exit_score
            && i >= config.remix_exit_min_queries
            && best.mix_compatible
        {
            return Some(StopReason::RemixConfidence);
        }

        if best.final_score >= config.family_exit_score
            && i >= self.family_gate()
            && (obs.best_from_family_query || obs.current_family_query)
            && best.mix_compatible
            && phrase_ok
        {
            return Some(StopReason::FamilyConsensus);
        }

        if best.final_score >= config.early_exit_score && i >= self.primary_gate() && best.mix_compatible && phrase_ok
        {
            return Some(StopReason::EarlyExit);
        }

        None
    }
}
