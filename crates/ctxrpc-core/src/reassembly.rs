use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{DEFAULT_MAX_PARTIAL_MESSAGES, DEFAULT_PARTIAL_MESSAGE_TTL};
use crate::env::Endpoint;
use crate::envelope::{CorrelationId, Envelope, Header, Message};

/// Partial messages are keyed by sender, direction and id, so a request and
/// its response (which share an id) never mix, and neither do two peers that
/// happen to pick the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    from: Endpoint,
    request: bool,
    id: CorrelationId,
}

#[derive(Debug)]
struct Partial {
    header: Header,
    started: Instant,
    /// Insertion order, for evicting the oldest.
    seq: u64,
    total: u32,
    received: u32,
    parts: Vec<Option<String>>,
}

/// Outcome of feeding one envelope to the table.
#[derive(Debug, PartialEq)]
pub enum Progress {
    /// More parts are needed.
    Pending,
    /// The message is complete.
    Complete(Message),
    /// This part was already received; the envelope was ignored.
    Duplicate,
    /// The envelope contradicts earlier parts; the partial message was
    /// discarded.
    Rejected(String),
}

/// Reassembles multi-part messages by part position.
///
/// Each sender may hold a bounded number of incomplete messages; the oldest
/// is evicted to make room. Messages that stop receiving parts expire.
#[derive(Debug)]
pub struct ReassemblyTable {
    partial: HashMap<Key, Partial>,
    max_per_sender: usize,
    ttl: Duration,
    next_seq: u64,
}

impl Default for ReassemblyTable {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_PARTIAL_MESSAGES, DEFAULT_PARTIAL_MESSAGE_TTL)
    }
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(max_per_sender: usize, ttl: Duration) -> Self {
        Self {
            partial: HashMap::new(),
            max_per_sender: max_per_sender.max(1),
            ttl,
            next_seq: 0,
        }
    }

    /// Feed one validated envelope received from `from`.
    pub fn push(&mut self, from: &Endpoint, envelope: Envelope) -> Progress {
        if envelope.total == 1 {
            return Progress::Complete(Message {
                header: envelope.header(),
                args: envelope.args,
            });
        }

        let key = Key {
            from: from.clone(),
            request: envelope.kind.is_request(),
            id: envelope.id.clone(),
        };
        self.evict_expired();
        if !self.partial.contains_key(&key) {
            self.make_room(from);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let partial = self.partial.entry(key.clone()).or_insert_with(|| Partial {
            header: envelope.header(),
            started: Instant::now(),
            seq,
            total: envelope.total,
            received: 0,
            parts: vec![None; envelope.total as usize],
        });

        if partial.total != envelope.total || partial.header.kind != envelope.kind {
            self.partial.remove(&key);
            return Progress::Rejected(format!(
                "part {} of {} disagrees with earlier parts of message {}",
                envelope.part, envelope.total, envelope.id
            ));
        }

        let slot = &mut partial.parts[envelope.part as usize - 1];
        if slot.is_some() {
            debug!(id = %envelope.id, part = envelope.part, "duplicate part ignored");
            return Progress::Duplicate;
        }
        *slot = Some(envelope.args.unwrap_or_default());
        partial.received += 1;

        if partial.received < partial.total {
            return Progress::Pending;
        }

        match self.partial.remove(&key) {
            Some(done) => Progress::Complete(Message {
                header: done.header,
                args: Some(done.parts.into_iter().flatten().collect()),
            }),
            None => Progress::Pending,
        }
    }

    fn evict_expired(&mut self) {
        let ttl = self.ttl;
        let before = self.partial.len();
        self.partial.retain(|_, partial| partial.started.elapsed() < ttl);
        let expired = before - self.partial.len();
        if expired > 0 {
            debug!(expired, "incomplete messages expired");
        }
    }

    /// Evict `from`'s oldest partial message if it is at its limit.
    fn make_room(&mut self, from: &Endpoint) {
        let held = self.partial.keys().filter(|key| &key.from == from).count();
        if held < self.max_per_sender {
            return;
        }
        let oldest = self
            .partial
            .iter()
            .filter(|(key, _)| &key.from == from)
            .min_by_key(|(_, partial)| partial.seq)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.partial.remove(&key);
            debug!(peer = %from, id = %key.id, held, "oldest incomplete message evicted");
        }
    }

    /// Discard every partial message received from `from`.
    pub fn drop_endpoint(&mut self, from: &Endpoint) -> usize {
        let before = self.partial.len();
        self.partial.retain(|key, _| &key.from != from);
        before - self.partial.len()
    }

    /// Number of messages still waiting for parts.
    pub fn len(&self) -> usize {
        self.partial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::env::{Env, SurfaceId};

    fn parts(id: &str, text: &str, chunk: usize) -> Vec<Envelope> {
        let header = Header::request(CorrelationId::from(id), "big", Env::Client);
        encode(&header, Some(text), Some(chunk))
    }

    fn surface(id: &str) -> Endpoint {
        Endpoint::Surface(SurfaceId::from(id))
    }

    #[test]
    fn single_part_completes_without_state() {
        let mut table = ReassemblyTable::new();
        let progress = table.push(&Endpoint::Server, parts("a", "[1]", 100).remove(0));
        match progress {
            Progress::Complete(message) => assert_eq!(message.args.as_deref(), Some("[1]")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(table.is_empty());
    }

    #[test]
    fn parts_arriving_out_of_order_land_in_position() {
        let text = "abcdefghij";
        let mut envelopes = parts("a", text, 3);
        envelopes.reverse();

        let mut table = ReassemblyTable::new();
        let mut done = None;
        for envelope in envelopes {
            if let Progress::Complete(message) = table.push(&Endpoint::Server, envelope) {
                done = Some(message);
            }
        }
        assert_eq!(done.unwrap().args.as_deref(), Some(text));
        assert!(table.is_empty());
    }

    #[test]
    fn duplicate_part_is_ignored() {
        let envelopes = parts("a", "abcdef", 2);
        let mut table = ReassemblyTable::new();
        assert_eq!(table.push(&Endpoint::Server, envelopes[0].clone()), Progress::Pending);
        assert_eq!(table.push(&Endpoint::Server, envelopes[0].clone()), Progress::Duplicate);
        assert_eq!(table.push(&Endpoint::Server, envelopes[1].clone()), Progress::Pending);
        assert!(matches!(
            table.push(&Endpoint::Server, envelopes[2].clone()),
            Progress::Complete(m) if m.args.as_deref() == Some("abcdef")
        ));
    }

    #[test]
    fn conflicting_total_discards_the_message() {
        let envelopes = parts("a", "abcdef", 2);
        let mut table = ReassemblyTable::new();
        table.push(&Endpoint::Server, envelopes[0].clone());

        let mut liar = envelopes[1].clone();
        liar.total = 2;
        assert!(matches!(table.push(&Endpoint::Server, liar), Progress::Rejected(_)));
        assert!(table.is_empty());
    }

    #[test]
    fn same_id_from_different_senders_stays_separate() {
        let mut table = ReassemblyTable::new();
        let a = parts("same", "aaaa", 2);
        let b = parts("same", "bbbb", 2);

        table.push(&surface("s1"), a[0].clone());
        table.push(&surface("s2"), b[0].clone());
        assert_eq!(table.len(), 2);

        assert!(matches!(
            table.push(&surface("s2"), b[1].clone()),
            Progress::Complete(m) if m.args.as_deref() == Some("bbbb")
        ));
        assert_eq!(table.drop_endpoint(&surface("s1")), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn each_sender_holds_a_bounded_number_of_partials() {
        let mut table = ReassemblyTable::with_limits(2, Duration::from_secs(60));
        let a = parts("a", "aaaa", 2);
        for id in ["a", "b", "c"] {
            assert_eq!(table.push(&Endpoint::Server, parts(id, "xxxx", 2)[0].clone()), Progress::Pending);
        }
        table.push(&surface("s1"), a[0].clone());
        assert_eq!(table.len(), 3);

        // "a" from the server was evicted; its second part starts over.
        assert_eq!(table.push(&Endpoint::Server, a[1].clone()), Progress::Pending);
        assert!(matches!(
            table.push(&surface("s1"), a[1].clone()),
            Progress::Complete(m) if m.args.as_deref() == Some("aaaa")
        ));
    }

    #[test]
    fn abandoned_partials_expire() {
        let mut table = ReassemblyTable::with_limits(64, Duration::ZERO);
        table.push(&Endpoint::Server, parts("a", "aaaa", 2)[0].clone());
        table.push(&Endpoint::Server, parts("b", "bbbb", 2)[0].clone());
        assert_eq!(table.len(), 1);
    }
}
