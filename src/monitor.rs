use serde::{Deserialize, Deserializer};
use std::fmt;

/// A monitor as it appears in the `getMonitors` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawMonitor {
    #[serde(default)]
    pub id: u64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub friendly_name: String,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub url: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Paused,
    NotChecked,
    Up,
    SeemsDown,
    Down,
    Unknown,
}

impl MonitorStatus {
    #[must_use]
    pub fn from_code(code: Option<i64>) -> Self {
        match code {
            Some(0) => Self::Paused,
            Some(1) => Self::NotChecked,
            Some(2) => Self::Up,
            Some(8) => Self::SeemsDown,
            Some(9) => Self::Down,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRecord {
    pub id: u64,
    pub display_name: String,
    pub status: MonitorStatus,
    pub url: String,
}

impl MonitorRecord {
    fn is_active(&self) -> bool {
        self.status != MonitorStatus::Paused
    }

    fn is_down(&self) -> bool {
        self.status == MonitorStatus::Down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateStatus {
    Up,
    Down,
    Error,
    Unknown,
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

#[must_use]
pub fn normalize(raw: Vec<RawMonitor>) -> Vec<MonitorRecord> {
    raw.into_iter()
        .map(|m| MonitorRecord {
            id: m.id,
            display_name: m.friendly_name,
            status: MonitorStatus::from_code(m.status),
            url: m.url,
        })
        .collect()
}

/// Reduces a poll result to a single status: any active monitor that is
/// down makes the whole set down. Paused monitors are ignored.
#[must_use]
pub fn compute_aggregate(records: &[MonitorRecord]) -> AggregateStatus {
    if records.iter().filter(|m| m.is_active()).any(MonitorRecord::is_down) {
        AggregateStatus::Down
    } else {
        AggregateStatus::Up
    }
}

/// Active monitors that are currently down, in response order.
pub fn down_monitors(records: &[MonitorRecord]) -> impl Iterator<Item = &MonitorRecord> {
    records.iter().filter(|m| m.is_active() && m.is_down())
}

/// Counts shown on the status summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorSummary {
    pub up: usize,
    pub down: usize,
    pub paused: usize,
}

impl MonitorSummary {
    #[must_use]
    pub fn from_records(records: &[MonitorRecord]) -> Self {
        records
            .iter()
            .fold(Self::default(), |mut acc, m| {
                match m.status {
                    MonitorStatus::Up => acc.up += 1,
                    MonitorStatus::Down => acc.down += 1,
                    MonitorStatus::Paused => acc.paused += 1,
                    _ => {}
                }
                acc
            })
    }
}

impl fmt::Display for MonitorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} UP, {} DOWN", self.up, self.down)?;
        if self.paused > 0 {
            write!(f, ", {} PAUSED", self.paused)?;
        }
        Ok(())
    }
}
