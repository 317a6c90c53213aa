//! The process-wide record table: named values whose changes are sampled into
//! per-key time series for post-run analysis.

use std::collections::{BTreeMap, HashMap};

use parse_display::Display;

use crate::types::{Phase, SimTime, TaskState};

/// Keys of the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub enum Record {
    #[display("running_machines")]
    RunningMachines,
    #[display("failed_machines")]
    FailedMachines,
    #[display("active_machines")]
    ActiveMachines,
    #[display("running_stragglers")]
    RunningStragglers,
    /// Sum of the data-transfer rates of all running task instances.
    #[display("data_transfer")]
    DataTransfer,
    /// Population of a task state within one phase, across all computations.
    #[display("{0}_tasks_{1}")]
    Tasks(Phase, TaskState),
    #[display("mapping_done")]
    MappingDone,
    #[display("shuffle_done")]
    ShuffleDone,
}

/// A sampled record value.
#[derive(Debug, Clone, Copy, PartialEq, Display)]
pub enum RecordValue {
    #[display("{0}")]
    Count(i64),
    #[display("{0}")]
    Gauge(f64),
    #[display("{0}")]
    Stamp(SimTime),
}

impl RecordValue {
    pub fn count(self) -> Option<i64> {
        match self {
            RecordValue::Count(c) => Some(c),
            _ => None,
        }
    }

    pub fn gauge(self) -> Option<f64> {
        match self {
            RecordValue::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn stamp(self) -> Option<SimTime> {
        match self {
            RecordValue::Stamp(t) => Some(t),
            _ => None,
        }
    }
}

/// One sample of a record series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub at: SimTime,
    pub value: RecordValue,
}

/// Current values plus the append-on-change histories behind them.
#[derive(Debug, Default)]
pub struct Records {
    current: HashMap<Record, RecordValue>,
    history: BTreeMap<Record, Vec<HistoryEntry>>,
}

impl Records {
    /// Replace the value under `key` (or `default` when absent) with
    /// `transform(current)`. A sample is appended only when the value
    /// changed; two changes at the same timestamp coalesce into one sample.
    pub(crate) fn update(
        &mut self,
        now: SimTime,
        key: Record,
        default: RecordValue,
        transform: impl FnOnce(RecordValue) -> RecordValue,
    ) {
        let prev = self.current.get(&key).copied();
        let next = transform(prev.unwrap_or(default));
        if prev == Some(next) {
            return;
        }
        let series = self.history.entry(key).or_default();
        match series.last_mut() {
            Some(last) if last.at == now => last.value = next,
            _ => series.push(HistoryEntry { at: now, value: next }),
        }
        self.current.insert(key, next);
    }

    pub fn value(&self, key: Record) -> Option<RecordValue> {
        self.current.get(&key).copied()
    }

    pub(crate) fn into_history(self) -> BTreeMap<Record, Vec<HistoryEntry>> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(records: &mut Records, at: SimTime, delta: i64) {
        records.update(at, Record::RunningMachines, RecordValue::Count(0), |v| match v {
            RecordValue::Count(c) => RecordValue::Count(c + delta),
            other => other,
        });
    }

    #[test]
    fn appends_only_on_change() {
        let mut records = Records::default();
        bump(&mut records, SimTime(1), 1);
        bump(&mut records, SimTime(2), 0);
        bump(&mut records, SimTime(3), 1);
        let history = records.into_history();
        let series = &history[&Record::RunningMachines];
        assert_eq!(series.len(), 2);
        assert_eq!(series[0], HistoryEntry { at: SimTime(1), value: RecordValue::Count(1) });
        assert_eq!(series[1], HistoryEntry { at: SimTime(3), value: RecordValue::Count(2) });
    }

    #[test]
    fn same_timestamp_changes_coalesce() {
        let mut records = Records::default();
        bump(&mut records, SimTime(5), 1);
        bump(&mut records, SimTime(5), 1);
        assert_eq!(records.value(Record::RunningMachines), Some(RecordValue::Count(2)));
        let history = records.into_history();
        let series = &history[&Record::RunningMachines];
        assert_eq!(series.len(), 1);
        assert_eq!(series[0], HistoryEntry { at: SimTime(5), value: RecordValue::Count(2) });
    }

    #[test]
    fn zero_delta_on_absent_key_seeds_a_sample() {
        let mut records = Records::default();
        bump(&mut records, SimTime(0), 0);
        let history = records.into_history();
        let series = &history[&Record::RunningMachines];
        assert_eq!(series, &vec![HistoryEntry { at: SimTime(0), value: RecordValue::Count(0) }]);
    }
}
