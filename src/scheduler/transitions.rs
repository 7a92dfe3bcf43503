//! Status transition detection between consecutive checks.

use std::str::FromStr;

use crate::db::SiteState;

/// Which status edges open and close offline incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IncidentPolicy {
    /// Only `online -> offline` opens and only `offline -> online` closes.
    Strict,
    /// Any reachable state moving to `offline` opens; `offline` moving to
    /// any reachable state closes.
    #[default]
    Reachable,
}

impl FromStr for IncidentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(IncidentPolicy::Strict),
            "reachable" => Ok(IncidentPolicy::Reachable),
            other => Err(format!("unknown incident policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOffline,
    WentOnline,
    Unchanged,
}

/// Compare the previous and current state of one site.
///
/// A site with no previous status is treated as having been online.
pub fn detect_transition(
    policy: IncidentPolicy,
    previous: Option<SiteState>,
    current: SiteState,
) -> Transition {
    let previous = previous.unwrap_or(SiteState::Online);
    if !previous.is_settled() || !current.is_settled() {
        return Transition::Unchanged;
    }

    match policy {
        IncidentPolicy::Strict => match (previous, current) {
            (SiteState::Online, SiteState::Offline) => Transition::WentOffline,
            (SiteState::Offline, SiteState::Online) => Transition::WentOnline,
            _ => Transition::Unchanged,
        },
        IncidentPolicy::Reachable => {
            match (previous == SiteState::Offline, current == SiteState::Offline) {
                (false, true) => Transition::WentOffline,
                (true, false) => Transition::WentOnline,
                _ => Transition::Unchanged,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SiteState::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("strict".parse::<IncidentPolicy>().unwrap(), IncidentPolicy::Strict);
        assert_eq!(" Reachable ".parse::<IncidentPolicy>().unwrap(), IncidentPolicy::Reachable);
        assert!("lenient".parse::<IncidentPolicy>().is_err());
        assert_eq!(IncidentPolicy::default(), IncidentPolicy::Reachable);
    }

    #[test]
    fn test_strict_edges() {
        let p = IncidentPolicy::Strict;
        assert_eq!(detect_transition(p, Some(Online), Offline), Transition::WentOffline);
        assert_eq!(detect_transition(p, None, Offline), Transition::WentOffline);
        assert_eq!(detect_transition(p, Some(Offline), Online), Transition::WentOnline);
        assert_eq!(detect_transition(p, Some(Slow), Offline), Transition::Unchanged);
        assert_eq!(detect_transition(p, Some(RateLimited), Offline), Transition::Unchanged);
        assert_eq!(detect_transition(p, Some(Offline), Slow), Transition::Unchanged);
        assert_eq!(detect_transition(p, Some(Offline), Offline), Transition::Unchanged);
    }

    #[test]
    fn test_reachable_edges() {
        let p = IncidentPolicy::Reachable;
        for from in [Online, Slow, RateLimited] {
            assert_eq!(detect_transition(p, Some(from), Offline), Transition::WentOffline);
            assert_eq!(detect_transition(p, Some(Offline), from), Transition::WentOnline);
        }
        assert_eq!(detect_transition(p, Some(Online), Slow), Transition::Unchanged);
        assert_eq!(detect_transition(p, Some(Offline), Offline), Transition::Unchanged);
    }

    #[test]
    fn test_transitional_states_never_transition() {
        for p in [IncidentPolicy::Strict, IncidentPolicy::Reachable] {
            assert_eq!(detect_transition(p, Some(Checking), Offline), Transition::Unchanged);
            assert_eq!(detect_transition(p, Some(Waiting), Online), Transition::Unchanged);
            assert_eq!(detect_transition(p, Some(Offline), Checking), Transition::Unchanged);
        }
    }
}
