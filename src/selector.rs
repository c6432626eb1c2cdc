// Team selection: which tenants get pre-aggregation. Four policies with
// fixed precedence, each a pure decision function over the input snapshot;
// the first one that yields a verdict for a tenant wins. Output is sorted
// by team id, so a given snapshot always selects the same set.

use std::collections::BTreeSet;

use crate::event_repo::DailyCount;
use crate::models::{TeamId, TeamRecord};

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Cap on heuristic picks (policy 3).
    pub heuristic_cap: usize,
    /// Operator allow-list (policy 2).
    pub allow_list: Vec<TeamId>,
    /// Static fallback (policy 4), used only when 1-3 select nobody.
    pub fallback_teams: Vec<TeamId>,
}

/// Policy 1: the stored flag, when set, is authoritative in both
/// directions. An explicit false excludes the tenant from every later
/// policy, allow-list included.
fn policy_explicit_flag(team: &TeamRecord) -> Option<bool> {
    team.preagg_enabled
}

/// Policy 2: operator allow-list; enablement without a data migration for
/// tenants whose flag is unset.
fn policy_allow_list(team: &TeamRecord, config: &SelectorConfig) -> Option<bool> {
    config.allow_list.contains(&team.team_id).then_some(true)
}

/// Policy 3: heuristic membership, precomputed by `heuristic_top_n`.
fn policy_heuristic(team: &TeamRecord, top_n: &BTreeSet<TeamId>) -> Option<bool> {
    top_n.contains(&team.team_id).then_some(true)
}

/// Top-N teams by trailing-window median daily pageviews, descending,
/// ties broken by ascending team id. Only teams present in the config
/// snapshot are ranked.
pub fn heuristic_top_n(
    teams: &[TeamRecord],
    activity: &[DailyCount],
    cap: usize,
) -> BTreeSet<TeamId> {
    let known: BTreeSet<TeamId> = teams.iter().map(|t| t.team_id).collect();

    let mut per_team: Vec<(TeamId, Vec<i64>)> = Vec::new();
    for count in activity {
        if !known.contains(&count.team_id) {
            continue;
        }
        match per_team.last_mut() {
            Some((id, samples)) if *id == count.team_id => samples.push(count.pageviews),
            _ => per_team.push((count.team_id, vec![count.pageviews])),
        }
    }

    let mut ranked: Vec<(i64, TeamId)> = per_team
        .into_iter()
        .map(|(id, mut samples)| {
            samples.sort_unstable();
            (median(&samples), id)
        })
        .collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    ranked.into_iter().take(cap).map(|(_, id)| id).collect()
}

/// Lower median of a sorted, non-empty slice.
fn median(sorted: &[i64]) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    sorted[(sorted.len() - 1) / 2]
}

/// Resolve the eligible tenant set from a snapshot of the config store and
/// the activity metric. Deterministic: no randomness, no hash-order
/// dependence.
pub fn select_eligible(
    teams: &[TeamRecord],
    activity: &[DailyCount],
    config: &SelectorConfig,
) -> Vec<TeamId> {
    let top_n = heuristic_top_n(teams, activity, config.heuristic_cap);

    let mut selected = BTreeSet::new();
    for team in teams {
        let verdict = policy_explicit_flag(team)
            .or_else(|| policy_allow_list(team, config))
            .or_else(|| policy_heuristic(team, &top_n));
        if verdict == Some(true) {
            selected.insert(team.team_id);
        }
    }

    if selected.is_empty() {
        selected.extend(config.fallback_teams.iter().copied());
    }

    selected.into_iter().collect()
}
