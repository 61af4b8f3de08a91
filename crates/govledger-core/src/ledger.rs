use crate::error::{LedgerError, LedgerResult};
use crate::types::{
    new_id, AppendReceipt, EventEnvelope, EventFilter, EventPage, ExpectedVersion, NewEvent,
};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use std::collections::HashMap;

/// Outcome of preparing an append against the current log.
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedAppend {
    /// A fully sequenced and hashed event ready to be persisted and committed.
    New(EventEnvelope),
    /// The event id already exists with identical content.
    Existing(AppendReceipt),
}

/// In-memory append-only event log with global and per-stream ordering.
///
/// No mutation APIs are exposed beyond `commit`. Each event is hash-chained to
/// its predecessor so a hydrated log can be verified end to end.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<EventEnvelope>,
    by_id: HashMap<String, usize>,
    streams: HashMap<String, Vec<usize>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events, re-checking every ordering and
    /// hash invariant.
    pub fn from_events(events: Vec<EventEnvelope>) -> LedgerResult<Self> {
        let mut log = Self::new();
        for event in events {
            log.commit(event)?;
        }
        Ok(log)
    }

    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_global_seq(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn stream_version(&self, stream_id: &str) -> u64 {
        self.streams
            .get(stream_id)
            .map(|positions| positions.len() as u64)
            .unwrap_or(0)
    }

    pub fn get(&self, event_id: &str) -> Option<&EventEnvelope> {
        self.by_id.get(event_id).map(|&pos| &self.events[pos])
    }

    pub fn read_stream(&self, stream_id: &str) -> Vec<EventEnvelope> {
        self.streams
            .get(stream_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&pos| self.events[pos].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Events with `global_seq` strictly greater than `after`.
    pub fn since(&self, after: u64) -> &[EventEnvelope] {
        let start = (after as usize).min(self.events.len());
        &self.events[start..]
    }

    /// Filtered page. Ascending pages start after `cursor`; descending pages
    /// start below it.
    pub fn query(&self, filter: &EventFilter) -> EventPage {
        let limit = filter.effective_limit();
        let total_count = self.events.iter().filter(|e| filter.matches(e)).count();

        let (events, has_more) = if filter.descending {
            let end = filter.cursor.map_or(self.events.len(), |cursor| {
                (cursor.saturating_sub(1) as usize).min(self.events.len())
            });
            take_page(self.events[..end].iter().rev(), filter, limit)
        } else {
            take_page(self.since(filter.cursor.unwrap_or(0)).iter(), filter, limit)
        };
        let next_cursor = if has_more {
            events.last().map(|e| e.global_seq)
        } else {
            None
        };

        EventPage {
            events,
            total_count,
            has_more,
            next_cursor,
        }
    }

    /// Sequence and hash the next event without mutating the log.
    pub fn prepare(
        &self,
        new: NewEvent,
        expected: ExpectedVersion,
    ) -> LedgerResult<PreparedAppend> {
        new.validate()?;

        if let Some(event_id) = new.event_id.as_deref() {
            if let Some(existing) = self.get(event_id) {
                return if same_content(existing, &new) {
                    Ok(PreparedAppend::Existing(AppendReceipt {
                        event_id: existing.event_id.clone(),
                        stream_seq: existing.stream_seq,
                        global_seq: existing.global_seq,
                        duplicate: true,
                    }))
                } else {
                    Err(LedgerError::Conflict(format!(
                        "event '{}' already exists with different content",
                        event_id
                    )))
                };
            }
        }

        for superseded in &new.supersedes {
            if self.get(superseded).is_none() {
                return Err(LedgerError::Validation(format!(
                    "superseded event '{}' does not exist",
                    superseded
                )));
            }
        }

        if let Some(first) = self
            .streams
            .get(&new.stream_id)
            .and_then(|positions| positions.first())
        {
            let stream_kind = self.events[*first].stream_kind;
            if stream_kind != new.stream_kind {
                return Err(LedgerError::Validation(format!(
                    "stream '{}' is a {} stream, not {}",
                    new.stream_id, stream_kind, new.stream_kind
                )));
            }
        }

        let version = self.stream_version(&new.stream_id);
        if let ExpectedVersion::Exact(expected) = expected {
            if version != expected {
                return Err(LedgerError::Conflict(format!(
                    "stream '{}' is at version {}, expected {}",
                    new.stream_id, version, expected
                )));
            }
        }

        let mut event = EventEnvelope {
            event_id: new.event_id.unwrap_or_else(|| new_id("evt")),
            stream_id: new.stream_id,
            stream_kind: new.stream_kind,
            stream_seq: version + 1,
            global_seq: self.last_global_seq() + 1,
            event_type: new.event_type,
            // Microsecond precision survives a TIMESTAMPTZ round trip.
            occurred_at: Utc::now().trunc_subsecs(6),
            actor_kind: new.actor.kind,
            actor_id: new.actor.id,
            correlation_id: new.correlation_id,
            causation_id: new.causation_id,
            supersedes: new.supersedes,
            refs: new.refs,
            payload: new.payload,
            previous_hash: self.events.last().map(|e| e.event_hash.clone()),
            event_hash: String::new(),
        };
        event.event_hash = compute_event_hash(&event)?;

        Ok(PreparedAppend::New(event))
    }

    /// Commit a prepared event after external durability succeeds.
    pub fn commit(&mut self, event: EventEnvelope) -> LedgerResult<()> {
        let expected_global = self.last_global_seq() + 1;
        if event.global_seq != expected_global {
            return Err(LedgerError::Storage(format!(
                "global_seq gap: expected {}, got {}",
                expected_global, event.global_seq
            )));
        }

        let expected_stream = self.stream_version(&event.stream_id) + 1;
        if event.stream_seq != expected_stream {
            return Err(LedgerError::Storage(format!(
                "stream '{}' seq gap: expected {}, got {}",
                event.stream_id, expected_stream, event.stream_seq
            )));
        }

        if self.by_id.contains_key(&event.event_id) {
            return Err(LedgerError::Conflict(format!(
                "event '{}' already committed",
                event.event_id
            )));
        }

        let expected_previous = self.events.last().map(|e| e.event_hash.clone());
        if event.previous_hash != expected_previous {
            return Err(LedgerError::Storage(format!(
                "previous hash mismatch at global_seq {}",
                event.global_seq
            )));
        }

        if event.event_hash != compute_event_hash(&event)? {
            return Err(LedgerError::Storage(format!(
                "hash mismatch for event '{}'",
                event.event_id
            )));
        }

        let position = self.events.len();
        self.by_id.insert(event.event_id.clone(), position);
        self.streams
            .entry(event.stream_id.clone())
            .or_default()
            .push(position);
        self.events.push(event);
        Ok(())
    }

    pub fn verify_chain(&self) -> bool {
        let mut previous_hash: Option<String> = None;
        for event in &self.events {
            if event.previous_hash != previous_hash {
                return false;
            }
            match compute_event_hash(event) {
                Ok(hash) if hash == event.event_hash => {}
                _ => return false,
            }
            previous_hash = Some(event.event_hash.clone());
        }
        true
    }
}

fn take_page<'a>(
    events: impl Iterator<Item = &'a EventEnvelope>,
    filter: &EventFilter,
    limit: usize,
) -> (Vec<EventEnvelope>, bool) {
    let mut matching = events.filter(|e| filter.matches(e));
    let page: Vec<EventEnvelope> = matching.by_ref().take(limit).cloned().collect();
    let has_more = matching.next().is_some();
    (page, has_more)
}

fn same_content(existing: &EventEnvelope, new: &NewEvent) -> bool {
    existing.stream_id == new.stream_id
        && existing.stream_kind == new.stream_kind
        && existing.event_type == new.event_type
        && existing.actor_kind == new.actor.kind
        && existing.actor_id == new.actor.id
        && existing.correlation_id == new.correlation_id
        && existing.causation_id == new.causation_id
        && existing.refs == new.refs
        && existing.supersedes == new.supersedes
        && existing.payload == new.payload
}

fn compute_event_hash(event: &EventEnvelope) -> LedgerResult<String> {
    let material = serde_json::json!({
        "event_id": event.event_id,
        "stream_id": event.stream_id,
        "stream_kind": event.stream_kind,
        "stream_seq": event.stream_seq,
        "global_seq": event.global_seq,
        "event_type": event.event_type,
        "occurred_at": timestamp_material(event.occurred_at),
        "actor_kind": event.actor_kind,
        "actor_id": event.actor_id,
        "correlation_id": event.correlation_id,
        "causation_id": event.causation_id,
        "supersedes": event.supersedes,
        "refs": event.refs,
        "payload": canonical(&event.payload),
        "previous_hash": event.previous_hash,
    });

    let bytes = serde_json::to_vec(&material)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

fn timestamp_material(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

// JSONB does not preserve key order; hash over sorted keys.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonical(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::types::{StreamKind, TypedRef};

    fn candidate_event(stream: &str) -> NewEvent {
        NewEvent::new(
            stream,
            StreamKind::Candidate,
            "CandidateMaterialized",
            Actor::agent("agent-1"),
        )
        .with_refs(vec![TypedRef::new(
            "GovernedArtifact",
            "SR-SPEC",
            "depends_on",
        )])
    }

    fn append(log: &mut EventLog, new: NewEvent) -> EventEnvelope {
        match log.prepare(new, ExpectedVersion::Any).unwrap() {
            PreparedAppend::New(event) => {
                log.commit(event.clone()).unwrap();
                event
            }
            PreparedAppend::Existing(receipt) => panic!("unexpected duplicate {:?}", receipt),
        }
    }

    #[test]
    fn assigns_global_and_stream_sequences() {
        let mut log = EventLog::new();
        let a1 = append(&mut log, candidate_event("cand_a"));
        let b1 = append(&mut log, candidate_event("cand_b"));
        let a2 = append(&mut log, candidate_event("cand_a"));

        assert_eq!((a1.global_seq, a1.stream_seq), (1, 1));
        assert_eq!((b1.global_seq, b1.stream_seq), (2, 1));
        assert_eq!((a2.global_seq, a2.stream_seq), (3, 2));
        assert_eq!(log.stream_version("cand_a"), 2);
        assert!(log.verify_chain());
    }

    #[test]
    fn identical_retry_returns_existing_receipt() {
        let mut log = EventLog::new();
        let first = append(&mut log, candidate_event("cand_a").with_event_id("evt_fixed"));

        match log
            .prepare(
                candidate_event("cand_a").with_event_id("evt_fixed"),
                ExpectedVersion::Any,
            )
            .unwrap()
        {
            PreparedAppend::Existing(receipt) => {
                assert!(receipt.duplicate);
                assert_eq!(receipt.global_seq, first.global_seq);
                assert_eq!(receipt.stream_seq, first.stream_seq);
            }
            PreparedAppend::New(_) => panic!("retry must not create a new event"),
        }
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn reused_event_id_with_other_content_conflicts() {
        let mut log = EventLog::new();
        append(&mut log, candidate_event("cand_a").with_event_id("evt_fixed"));

        let err = log
            .prepare(
                candidate_event("cand_b").with_event_id("evt_fixed"),
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn retry_with_other_causation_conflicts() {
        let mut log = EventLog::new();
        append(
            &mut log,
            candidate_event("cand_a")
                .with_event_id("evt_fixed")
                .with_causation(Some("evt_cause_1".to_string())),
        );

        let err = log
            .prepare(
                candidate_event("cand_a")
                    .with_event_id("evt_fixed")
                    .with_causation(Some("evt_cause_2".to_string())),
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let err = log
            .prepare(
                candidate_event("cand_a")
                    .with_event_id("evt_fixed")
                    .with_causation(Some("evt_cause_1".to_string()))
                    .with_correlation(Some("corr_9".to_string())),
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[test]
    fn expected_version_mismatch_conflicts() {
        let mut log = EventLog::new();
        append(&mut log, candidate_event("cand_a"));

        let err = log
            .prepare(candidate_event("cand_a"), ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert!(log
            .prepare(candidate_event("cand_a"), ExpectedVersion::Exact(1))
            .is_ok());
    }

    #[test]
    fn supersedes_must_name_existing_events() {
        let mut log = EventLog::new();
        let original = append(&mut log, candidate_event("cand_a"));

        let err = log
            .prepare(
                candidate_event("cand_a").superseding(vec!["evt_missing".into()]),
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let correction = append(
            &mut log,
            candidate_event("cand_a").superseding(vec![original.event_id.clone()]),
        );
        assert_eq!(correction.supersedes, vec![original.event_id.clone()]);
        // The original is untouched.
        assert_eq!(log.events()[0], original);
    }

    #[test]
    fn stream_kind_is_fixed_per_stream() {
        let mut log = EventLog::new();
        append(&mut log, candidate_event("shared"));
        let mut other = candidate_event("shared");
        other.stream_kind = StreamKind::Run;
        assert!(matches!(
            log.prepare(other, ExpectedVersion::Any),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn detects_tampered_events() {
        let mut log = EventLog::new();
        append(&mut log, candidate_event("cand_a"));
        append(&mut log, candidate_event("cand_a"));

        let mut events = log.events().to_vec();
        events[0].payload = serde_json::json!({"tampered": true});
        assert!(EventLog::from_events(events).is_err());
    }

    #[test]
    fn hydration_rejects_gaps() {
        let mut log = EventLog::new();
        append(&mut log, candidate_event("cand_a"));
        append(&mut log, candidate_event("cand_a"));

        let events = log.events()[1..].to_vec();
        assert!(EventLog::from_events(events).is_err());
    }

    #[test]
    fn query_paginates_by_cursor() {
        let mut log = EventLog::new();
        for i in 0..5 {
            append(&mut log, candidate_event(&format!("cand_{}", i)));
        }

        let filter = EventFilter {
            limit: Some(2),
            ..Default::default()
        };
        let first = log.query(&filter);
        assert_eq!(first.total_count, 5);
        assert!(first.has_more);
        assert_eq!(first.next_cursor, Some(2));

        let second = log.query(&EventFilter {
            cursor: first.next_cursor,
            ..filter.clone()
        });
        let seqs: Vec<u64> = second.events.iter().map(|e| e.global_seq).collect();
        assert_eq!(seqs, vec![3, 4]);

        let last = log.query(&EventFilter {
            cursor: Some(4),
            ..filter
        });
        assert_eq!(last.events.len(), 1);
        assert!(!last.has_more);
        assert_eq!(last.next_cursor, None);
    }

    #[test]
    fn descending_pages_walk_backwards() {
        let mut log = EventLog::new();
        for i in 0..5 {
            append(&mut log, candidate_event(&format!("cand_{}", i)));
        }

        let filter = EventFilter {
            limit: Some(2),
            descending: true,
            ..Default::default()
        };
        let first = log.query(&filter);
        let seqs: Vec<u64> = first.events.iter().map(|e| e.global_seq).collect();
        assert_eq!(seqs, vec![5, 4]);
        assert_eq!(first.next_cursor, Some(4));

        let second = log.query(&EventFilter {
            cursor: first.next_cursor,
            ..filter.clone()
        });
        let seqs: Vec<u64> = second.events.iter().map(|e| e.global_seq).collect();
        assert_eq!(seqs, vec![3, 2]);

        let last = log.query(&EventFilter {
            cursor: Some(2),
            ..filter
        });
        assert_eq!(last.events[0].global_seq, 1);
        assert!(!last.has_more);
    }

    #[test]
    fn payload_key_order_does_not_change_hash() {
        let a = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(
            serde_json::to_vec(&canonical(&a)).unwrap(),
            serde_json::to_vec(&canonical(&b)).unwrap()
        );
    }
}
