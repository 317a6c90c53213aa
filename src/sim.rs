//! The event-driven simulation kernel: a simulated clock, a time-ordered
//! queue of pending events and actions, and the record table every entity
//! samples its metrics into.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use educe::Educe;

use crate::sim::msg::{Action, Event, EventKind};
use crate::sim::records::{HistoryEntry, Record, RecordValue, Records};
use crate::types::{EventId, SimDuration, SimTime};
use crate::utils::prelude::*;

pub mod bus;
pub mod msg;
pub mod records;

/// What a queue entry delivers: an event (skippable once destroyed) or a bare
/// deferred action.
#[derive(Debug)]
pub(crate) enum Payload {
    Event { id: EventId, event: Event },
    Action(Action),
}

/// One scheduled entry, ordered by timestamp, then the target's tie-break
/// order, then insertion sequence. Actions sort at order zero, alongside
/// machines.
#[derive(Debug, Educe)]
#[educe(PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    at: SimTime,
    order: u8,
    seq: u64,
    #[educe(PartialEq(ignore))]
    #[educe(PartialOrd(ignore))]
    #[educe(Ord(ignore))]
    payload: Payload,
}

/// Owns the simulated clock, the pending queue, and the record table.
pub struct Scheduler {
    now: SimTime,
    seq: u64,
    next_event: u64,
    queue: BinaryHeap<Reverse<Entry>>,
    destroyed: HashSet<EventId>,
    pending: HashMap<EventKind, i64>,
    records: Records,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            now: SimTime::ZERO,
            seq: 0,
            next_event: 0,
            queue: BinaryHeap::new(),
            destroyed: HashSet::new(),
            pending: HashMap::new(),
            records: Records::default(),
        }
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `event` for delivery after `delay`. The returned handle can
    /// destroy the event any time before delivery.
    pub fn schedule_event(&mut self, delay: SimDuration, event: Event) -> EventId {
        let id = EventId(self.next_event);
        self.next_event += 1;
        *self.pending.entry(event.kind()).or_insert(0) += 1;
        let order = event.target().execution_order();
        trace!(at = %(self.now + delay), %event, "schedule event");
        self.push(self.now + delay, order, Payload::Event { id, event });
        id
    }

    pub fn schedule_action(&mut self, delay: SimDuration, action: Action) {
        trace!(at = %(self.now + delay), %action, "schedule action");
        self.push(self.now + delay, 0, Payload::Action(action));
    }

    /// Mark a pending event so it is silently skipped at delivery.
    pub fn destroy(&mut self, event: EventId) {
        self.destroyed.insert(event);
    }

    /// Number of scheduled, not yet dequeued events of `kind`. Destroyed
    /// events keep counting until they reach the front of the queue.
    pub fn pending_events(&self, kind: EventKind) -> i64 {
        self.pending.get(&kind).copied().unwrap_or(0)
    }

    fn push(&mut self, at: SimTime, order: u8, payload: Payload) {
        let seq = self.seq;
        self.seq += 1;
        self.queue.push(Reverse(Entry { at, order, seq, payload }));
    }

    /// Drain the queue to completion. All entries sharing the earliest
    /// timestamp form one batch; the clock advances to the batch timestamp
    /// before delivery and rolls back when every entry in the batch turned
    /// out to be a destroyed event, so observers never see time advance on a
    /// batch with zero effect.
    pub(crate) fn drain<F>(&mut self, mut deliver: F) -> Result<()>
    where
        F: FnMut(&mut Scheduler, Payload) -> Result<()>,
    {
        while let Some(Reverse(first)) = self.queue.pop() {
            let at = first.at;
            let mut batch = vec![first];
            while self.queue.peek().map_or(false, |Reverse(e)| e.at == at) {
                match self.queue.pop() {
                    Some(Reverse(entry)) => batch.push(entry),
                    None => break,
                }
            }

            let before = self.now;
            self.now = at;

            let mut executed = false;
            for entry in batch {
                match entry.payload {
                    Payload::Event { id, event } => {
                        *self.pending.entry(event.kind()).or_insert(0) -= 1;
                        if self.destroyed.remove(&id) {
                            trace!(at = %self.now, %event, "skip destroyed event");
                            continue;
                        }
                        trace!(at = %self.now, %event, "deliver event");
                        deliver(self, Payload::Event { id, event })?;
                        executed = true;
                    }
                    Payload::Action(action) => {
                        trace!(at = %self.now, %action, "run action");
                        deliver(self, Payload::Action(action))?;
                        executed = true;
                    }
                }
            }
            if !executed {
                self.now = before;
            }
        }
        Ok(())
    }

    // ====== record table ======

    /// Replace the record under `key` (or `default` when absent) with
    /// `transform(current)`, sampling the change into the key's history.
    pub fn update_record(
        &mut self,
        key: Record,
        default: RecordValue,
        transform: impl FnOnce(RecordValue) -> RecordValue,
    ) {
        let now = self.now;
        self.records.update(now, key, default, transform);
    }

    /// Add `delta` to a count record.
    pub fn record_add(&mut self, key: Record, delta: i64) {
        self.update_record(key, RecordValue::Count(0), |v| match v {
            RecordValue::Count(c) => RecordValue::Count(c + delta),
            other => other,
        });
    }

    /// Add `delta` to a gauge record.
    pub fn gauge_add(&mut self, key: Record, delta: f64) {
        self.update_record(key, RecordValue::Gauge(0.0), |v| match v {
            RecordValue::Gauge(g) => RecordValue::Gauge(g + delta),
            other => other,
        });
    }

    /// Stamp `key` with the current timestamp.
    pub fn record_stamp(&mut self, key: Record) {
        let now = self.now;
        self.update_record(key, RecordValue::Stamp(SimTime::ZERO), move |_| RecordValue::Stamp(now));
    }

    pub fn record_value(&self, key: Record) -> Option<RecordValue> {
        self.records.value(key)
    }

    pub(crate) fn into_result(self) -> SimulationResult {
        SimulationResult {
            duration: self.now,
            history: self.records.into_history(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new()
    }
}

/// What a finished run hands to external analysis: the final simulated
/// timestamp and every record's time-ordered samples.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    duration: SimTime,
    history: BTreeMap<Record, Vec<HistoryEntry>>,
}

impl SimulationResult {
    pub fn duration(&self) -> SimTime {
        self.duration
    }

    /// The sample series of `key`, empty when the record was never written.
    pub fn series(&self, key: Record) -> &[HistoryEntry] {
        self.history.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn records(&self) -> impl Iterator<Item = (Record, &[HistoryEntry])> {
        self.history.iter().map(|(k, v)| (*k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::msg::{CompEvent, MachineEvent};
    use crate::types::{CompId, MachineId};

    fn machine_event(m: usize) -> Event {
        Event::Machine(MachineId(m), MachineEvent::Terminated)
    }

    fn comp_event(c: usize) -> Event {
        Event::Computation(CompId(c), CompEvent::InvokeTasks)
    }

    fn drain_kinds(sched: &mut Scheduler) -> Vec<EventKind> {
        let mut seen = Vec::new();
        sched
            .drain(|_, payload| {
                if let Payload::Event { event, .. } = payload {
                    seen.push(event.kind());
                }
                Ok(())
            })
            .unwrap();
        seen
    }

    #[test]
    fn same_timestamp_orders_by_entity_then_insertion() {
        let mut sched = Scheduler::new();
        sched.schedule_event(SimDuration(5), comp_event(0));
        sched.schedule_event(SimDuration(5), machine_event(1));
        sched.schedule_event(SimDuration(5), machine_event(0));
        let seen = drain_kinds(&mut sched);
        // machines (order 0) run before computations, insertion order breaks
        // the machine/machine tie
        assert_eq!(
            seen,
            vec![EventKind::TaskTerminated, EventKind::TaskTerminated, EventKind::InvokeTasks]
        );
        assert_eq!(sched.now(), SimTime(5));
    }

    #[test]
    fn earlier_timestamps_run_first_regardless_of_order() {
        let mut sched = Scheduler::new();
        sched.schedule_event(SimDuration(9), machine_event(0));
        sched.schedule_event(SimDuration(3), comp_event(0));
        let seen = drain_kinds(&mut sched);
        assert_eq!(seen, vec![EventKind::InvokeTasks, EventKind::TaskTerminated]);
        assert_eq!(sched.now(), SimTime(9));
    }

    #[test]
    fn destroyed_events_are_skipped_and_roll_back_the_clock() {
        let mut sched = Scheduler::new();
        let ev = sched.schedule_event(SimDuration(7), machine_event(0));
        assert_eq!(sched.pending_events(EventKind::TaskTerminated), 1);
        sched.destroy(ev);
        let seen = drain_kinds(&mut sched);
        assert!(seen.is_empty());
        // the only batch had zero effect, so time never advanced
        assert_eq!(sched.now(), SimTime::ZERO);
        assert_eq!(sched.pending_events(EventKind::TaskTerminated), 0);
    }

    #[test]
    fn a_live_entry_keeps_the_batch_timestamp() {
        let mut sched = Scheduler::new();
        let ev = sched.schedule_event(SimDuration(4), machine_event(0));
        sched.destroy(ev);
        sched.schedule_event(SimDuration(4), comp_event(0));
        let seen = drain_kinds(&mut sched);
        assert_eq!(seen, vec![EventKind::InvokeTasks]);
        assert_eq!(sched.now(), SimTime(4));
    }

    #[test]
    fn actions_always_execute() {
        let mut sched = Scheduler::new();
        sched.schedule_action(SimDuration(2), Action::DriveRead(crate::types::InstanceId(0)));
        let mut actions = 0;
        sched
            .drain(|_, payload| {
                if let Payload::Action(_) = payload {
                    actions += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(actions, 1);
        assert_eq!(sched.now(), SimTime(2));
    }

    #[test]
    fn events_scheduled_during_a_batch_run_in_a_later_batch() {
        let mut sched = Scheduler::new();
        sched.schedule_event(SimDuration(1), machine_event(0));
        let mut seen = Vec::new();
        sched
            .drain(|sched, payload| {
                if let Payload::Event { event, .. } = payload {
                    seen.push(event.kind());
                    if seen.len() == 1 {
                        // zero-delay event lands at the same timestamp but in
                        // its own batch
                        sched.schedule_event(SimDuration::ZERO, comp_event(0));
                    }
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, vec![EventKind::TaskTerminated, EventKind::InvokeTasks]);
        assert_eq!(sched.now(), SimTime(1));
    }

    #[test]
    fn pending_counts_track_schedule_and_dequeue() {
        let mut sched = Scheduler::new();
        sched.schedule_event(SimDuration(1), machine_event(0));
        sched.schedule_event(SimDuration(2), machine_event(0));
        assert_eq!(sched.pending_events(EventKind::TaskTerminated), 2);
        let mut left = Vec::new();
        sched
            .drain(|sched, _| {
                left.push(sched.pending_events(EventKind::TaskTerminated));
                Ok(())
            })
            .unwrap();
        assert_eq!(left, vec![1, 0]);
    }
}
