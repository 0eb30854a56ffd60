use crate::error::{Error, Result};
use ordered_float::NotNan;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque handle of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A scheduled event: firing time plus payload.
///
/// `seq` is the insertion stamp used to break ties between equal times.
#[derive(Debug, Clone, PartialEq)]
pub struct Event<T> {
    pub time: NotNan<f64>,
    pub payload: T,
    seq: u64,
}

impl<T> Event<T> {
    /// Returns the raw f64 event time.
    #[inline]
    pub fn time_f64(&self) -> f64 {
        self.time.into_inner()
    }
}

/// Ordering key: time first, then insertion order.
type QueueKey = (NotNan<f64>, u64, EventId);

/// Keyed priority queue of events.
///
/// Events with equal time pop in insertion order; [`EventScheduler::update`]
/// counts as a fresh insertion. `+inf` is a valid time and means "never"
/// for practical purposes.
#[derive(Debug, Clone)]
pub struct EventScheduler<T> {
    queue: BTreeSet<QueueKey>,
    events: BTreeMap<EventId, Event<T>>,
    next_id: u64,
    next_seq: u64,
}

impl<T> Default for EventScheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeSet::new(),
            events: BTreeMap::new(),
            next_id: 0,
            next_seq: 0,
        }
    }
}

fn checked_time(time: f64) -> Result<NotNan<f64>> {
    let time =
        NotNan::new(time).map_err(|_| Error::InvalidParam("event time cannot be NaN".into()))?;
    if time.into_inner() < 0.0 {
        return Err(Error::InvalidParam(format!(
            "event time must be >= 0, got {time}"
        )));
    }
    Ok(time)
}

impl<T> EventScheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `payload` at `time` and returns its handle.
    pub fn insert(&mut self, time: f64, payload: T) -> Result<EventId> {
        let time = checked_time(time)?;
        let id = EventId(self.next_id);
        self.next_id += 1;
        let seq = self.bump_seq();
        self.queue.insert((time, seq, id));
        self.events.insert(id, Event { time, payload, seq });
        Ok(id)
    }

    /// Removes an event and returns its payload.
    pub fn cancel(&mut self, id: EventId) -> Result<T> {
        let event = self
            .events
            .remove(&id)
            .ok_or_else(|| Error::consistency(format!("cancel of unknown event {id}")))?;
        self.queue.remove(&(event.time, event.seq, id));
        Ok(event.payload)
    }

    /// Moves an event to `time` with a new payload, keeping its handle.
    pub fn update(&mut self, id: EventId, time: f64, payload: T) -> Result<()> {
        let time = checked_time(time)?;
        let seq = self.bump_seq();
        let event = self
            .events
            .get_mut(&id)
            .ok_or_else(|| Error::consistency(format!("update of unknown event {id}")))?;
        self.queue.remove(&(event.time, event.seq, id));
        *event = Event { time, payload, seq };
        self.queue.insert((time, seq, id));
        Ok(())
    }

    /// Earliest event, if any.
    pub fn peek_min(&self) -> Option<(EventId, &Event<T>)> {
        let &(_, _, id) = self.queue.first()?;
        self.events.get(&id).map(|e| (id, e))
    }

    /// Removes and returns the earliest event, if any.
    pub fn pop_min(&mut self) -> Option<(EventId, Event<T>)> {
        let (_, _, id) = self.queue.pop_first()?;
        self.events.remove(&id).map(|e| (id, e))
    }

    /// Time of the earliest event, if any.
    pub fn top_time(&self) -> Option<f64> {
        self.queue.first().map(|(t, _, _)| t.into_inner())
    }

    pub fn get(&self, id: EventId) -> Option<&Event<T>> {
        self.events.get(&id)
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drops every event. Handles are not reused afterwards.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.events.clear();
    }

    /// Events in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (EventId, &Event<T>)> {
        self.events.iter().map(|(&id, e)| (id, e))
    }

    /// Verifies that the ordering index and the event table agree.
    pub fn check(&self) -> Result<()> {
        if self.queue.len() != self.events.len() {
            return Err(Error::consistency(format!(
                "scheduler index holds {} keys for {} events",
                self.queue.len(),
                self.events.len()
            )));
        }
        for &(time, seq, id) in &self.queue {
            match self.events.get(&id) {
                Some(e) if e.time == time && e.seq == seq => {}
                _ => {
                    return Err(Error::consistency(format!(
                        "scheduler key of event {id} at t={time} is stale"
                    )))
                }
            }
        }
        Ok(())
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_rejects_nan_and_negative_time() {
        let mut s = EventScheduler::new();
        let err = s.insert(f64::NAN, 'a').unwrap_err();
        assert!(err.to_string().contains("NaN"));
        assert!(s.insert(-1.0, 'a').is_err());
        assert!(s.insert(f64::INFINITY, 'a').is_ok());
    }

    #[test]
    fn ordering_by_time() -> Result<()> {
        let mut s = EventScheduler::new();
        s.insert(2.0, "late")?;
        s.insert(1.0, "early")?;
        s.insert(f64::INFINITY, "never")?;
        assert_eq!(s.top_time(), Some(1.0));
        let order: Vec<_> = std::iter::from_fn(|| s.pop_min().map(|(_, e)| e.payload)).collect();
        assert_eq!(order, vec!["early", "late", "never"]);
        assert!(s.pop_min().is_none());
        assert!(s.peek_min().is_none());
        Ok(())
    }

    #[test]
    fn equal_times_pop_in_insertion_order() -> Result<()> {
        let mut s = EventScheduler::new();
        let a = s.insert(0.0, 'a')?;
        s.insert(0.0, 'b')?;
        s.insert(0.0, 'c')?;
        // an update re-enters the queue behind everything at the same time
        s.update(a, 0.0, 'a')?;
        let order: Vec<_> = std::iter::from_fn(|| s.pop_min().map(|(_, e)| e.payload)).collect();
        assert_eq!(order, vec!['b', 'c', 'a']);
        Ok(())
    }

    #[test]
    fn cancel_and_update_keep_index_consistent() -> Result<()> {
        let mut s = EventScheduler::new();
        let a = s.insert(1.0, 10)?;
        let b = s.insert(2.0, 20)?;
        assert_eq!(s.cancel(a)?, 10);
        assert!(s.cancel(a).is_err());
        s.update(b, 0.5, 21)?;
        let (id, e) = s.peek_min().ok_or_else(|| Error::consistency("empty"))?;
        assert_eq!(id, b);
        assert_eq!(e.payload, 21);
        assert_eq!(s.len(), 1);
        s.check()?;
        assert!(s.update(a, 1.0, 0).is_err());
        s.clear();
        assert!(s.is_empty());
        Ok(())
    }
}
