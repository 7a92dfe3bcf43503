//! Plain-text renderings of the ledgers for download.

use std::fmt::Write as _;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::db::{OfflineIncident, SlowEvent};

/// Which ledger a text log is rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Offline,
    Slow,
}

impl LogKind {
    pub fn file_name(&self) -> &'static str {
        match self {
            LogKind::Offline => "offline_log.txt",
            LogKind::Slow => "slow_log.txt",
        }
    }
}

impl FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "offline" => Ok(LogKind::Offline),
            "slow" => Ok(LogKind::Slow),
            other => Err(format!("unknown log type: {}", other)),
        }
    }
}

fn stamp(t: &DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// One line per incident, oldest first.
pub fn render_offline_log(incidents: &[OfflineIncident]) -> String {
    let mut out = String::new();
    for incident in incidents {
        let _ = write!(
            out,
            "[{}] {} ({}) went offline",
            stamp(&incident.went_offline_at),
            incident.site_name,
            incident.url
        );
        if let Some(code) = incident.status_code {
            let _ = write!(out, " status={}", code);
        }
        if let Some(error) = &incident.error {
            let _ = write!(out, " error=\"{}\"", error);
        }
        match (incident.went_online_at, incident.duration) {
            (Some(back), Some(duration)) => {
                let _ = write!(out, "; back online at {} after {}s", stamp(&back), duration);
            }
            _ => out.push_str("; still offline"),
        }
        out.push('\n');
    }
    out
}

/// One line per slow event, oldest first.
pub fn render_slow_log(events: &[SlowEvent]) -> String {
    let mut out = String::new();
    for event in events {
        let _ = writeln!(
            out,
            "[{}] {} ({}) responded in {}ms",
            stamp(&event.timestamp),
            event.site_name,
            event.url,
            event.response_time
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_kind_parse() {
        assert_eq!("offline".parse::<LogKind>().unwrap(), LogKind::Offline);
        assert_eq!("SLOW".parse::<LogKind>().unwrap(), LogKind::Slow);
        assert!("errors".parse::<LogKind>().is_err());
    }

    #[test]
    fn test_render_offline_log() {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        let incidents = vec![
            OfflineIncident {
                id: "a_1".to_string(),
                site_id: "a".to_string(),
                site_name: "Alpha".to_string(),
                url: "https://a.test".to_string(),
                went_offline_at: start,
                went_online_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 10, 2, 0).unwrap()),
                duration: Some(120),
                status_code: Some(500),
                error: None,
            },
            OfflineIncident {
                id: "b_1".to_string(),
                site_id: "b".to_string(),
                site_name: "Beta".to_string(),
                url: "https://b.test".to_string(),
                went_offline_at: start,
                went_online_at: None,
                duration: None,
                status_code: None,
                error: Some("DNS does not resolve".to_string()),
            },
        ];

        let text = render_offline_log(&incidents);
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "[2024-06-01 10:00:00 UTC] Alpha (https://a.test) went offline status=500; back online at 2024-06-01 10:02:00 UTC after 120s"
        );
        assert!(lines[1].contains("error=\"DNS does not resolve\""));
        assert!(lines[1].ends_with("still offline"));
    }

    #[test]
    fn test_render_slow_log() {
        let events = vec![SlowEvent {
            id: "a_1".to_string(),
            site_id: "a".to_string(),
            site_name: "Alpha".to_string(),
            url: "https://a.test".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap(),
            response_time: 12_345,
        }];
        assert_eq!(
            render_slow_log(&events),
            "[2024-06-01 10:00:00 UTC] Alpha (https://a.test) responded in 12345ms\n"
        );
        assert!(render_slow_log(&[]).is_empty());
    }
}
