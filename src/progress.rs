//! Per-level completion record
//!
//! Persisted as JSON next to the settings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Win counts keyed by level index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    wins: BTreeMap<usize, u32>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished run; returns the new total for `level`
    pub fn record_win(&mut self, level: usize) -> u32 {
        let count = self.wins.entry(level).or_insert(0);
        *count = count.saturating_add(1);
        log::info!("Level {} won {} time(s)", level, count);
        *count
    }

    pub fn won_count(&self, level: usize) -> u32 {
        self.wins.get(&level).copied().unwrap_or(0)
    }

    /// Levels won at least once
    pub fn levels_won(&self) -> usize {
        self.wins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wins.is_empty()
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_win() {
        let mut progress = Progress::new();
        assert!(progress.is_empty());
        assert_eq!(progress.won_count(3), 0);

        assert_eq!(progress.record_win(3), 1);
        assert_eq!(progress.record_win(3), 2);
        progress.record_win(0);

        assert_eq!(progress.won_count(3), 2);
        assert_eq!(progress.won_count(0), 1);
        assert_eq!(progress.levels_won(), 2);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut progress = Progress::new();
        progress.record_win(7);
        let json = progress.to_json().unwrap();
        assert_eq!(json, r#"{"wins":{"7":1}}"#);
        assert_eq!(Progress::from_json(&json).unwrap(), progress);
    }
}
