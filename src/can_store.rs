/* Per-bus ordered buffer of decoded CAN frames (C2). */

use std::collections::HashMap;

/// Either side of a DBC lookup: a signal/message referred to by name, or by
/// its raw 29-bit arbitration id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanRef {
    Name(String),
    Id(u32),
}

impl CanRef {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }
}

/// A decoded CAN message as stored after a `RECV_CAN` frame is parsed and
/// resolved against the DBC database.
#[derive(Debug, Clone, PartialEq)]
pub struct CanMessage {
    pub signal: CanRef,
    pub fields: HashMap<String, f64>,
}

/// Filter applied to `get_last`/`get_all`/`clear`: `None` matches every
/// message on the bus, `Some(signal)` matches only messages carrying that
/// signal reference.
pub type CanFilter = Option<CanRef>;

fn matches(msg: &CanMessage, filter: &CanFilter) -> bool {
    match filter {
        None => true,
        Some(want) => &msg.signal == want,
    }
}

/// Append-only, filterable store of decoded CAN messages for one bus.
#[derive(Debug, Default)]
pub struct CanStore {
    messages: Vec<CanMessage>,
}

impl CanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a newly decoded message. Insertion order is preserved.
    pub fn push(&mut self, msg: CanMessage) {
        self.messages.push(msg);
    }

    /// The most recently appended message matching `filter`, if any.
    pub fn last(&self, filter: &CanFilter) -> Option<CanMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| matches(m, filter))
            .cloned()
    }

    /// All messages matching `filter`, oldest first.
    pub fn all(&self, filter: &CanFilter) -> Vec<CanMessage> {
        self.messages
            .iter()
            .filter(|m| matches(m, filter))
            .cloned()
            .collect()
    }

    /// Remove messages matching `filter`, preserving the relative order of
    /// the remaining entries. `clear(None)` empties the store.
    pub fn clear(&mut self, filter: &CanFilter) {
        self.messages.retain(|m| !matches(m, filter));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(signal: &str, v: f64) -> CanMessage {
        let mut fields = HashMap::new();
        fields.insert("value".to_string(), v);
        CanMessage {
            signal: CanRef::name(signal),
            fields,
        }
    }

    #[test]
    fn get_all_preserves_insertion_order() {
        let mut store = CanStore::new();
        store.push(msg("Foo", 1.0));
        store.push(msg("Bar", 2.0));
        store.push(msg("Foo", 3.0));

        let all = store.all(&None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].fields["value"], 1.0);
        assert_eq!(all[1].fields["value"], 2.0);
        assert_eq!(all[2].fields["value"], 3.0);
    }

    #[test]
    fn get_last_returns_most_recent_matching_signal() {
        let mut store = CanStore::new();
        store.push(msg("Foo", 1.0));
        store.push(msg("Bar", 2.0));
        store.push(msg("Foo", 3.0));

        let last_foo = store.last(&Some(CanRef::name("Foo"))).unwrap();
        assert_eq!(last_foo.fields["value"], 3.0);

        assert!(store.last(&Some(CanRef::name("Baz"))).is_none());
    }

    #[test]
    fn clear_with_filter_removes_only_matching_preserving_order() {
        let mut store = CanStore::new();
        store.push(msg("Foo", 1.0));
        store.push(msg("Bar", 2.0));
        store.push(msg("Foo", 3.0));

        store.clear(&Some(CanRef::name("Foo")));

        let remaining = store.all(&None);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].signal, CanRef::name("Bar"));
    }

    #[test]
    fn clear_none_empties_store() {
        let mut store = CanStore::new();
        store.push(msg("Foo", 1.0));
        store.push(msg("Bar", 2.0));
        store.clear(&None);
        assert!(store.all(&None).is_empty());
    }
}
