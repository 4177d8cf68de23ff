use fnv::FnvHashMap;
use slab::Slab;

use crate::frame::StreamId;
use crate::proto::streams::Stream;

/// Storage for streams
///
/// Streams live in a slab; the id map resolves the 31-bit wire identifier to
/// the slab slot.
#[derive(Debug, Default)]
pub struct Store {
    slab: Slab<Stream>,
    ids: FnvHashMap<StreamId, usize>,
}

impl Store {
    pub fn new() -> Self {
        Store::default()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: StreamId) -> bool {
        self.ids.contains_key(&id)
    }

    pub fn insert(&mut self, id: StreamId, val: Stream) -> &mut Stream {
        let key = self.slab.insert(val);
        assert!(self.ids.insert(id, key).is_none());
        &mut self.slab[key]
    }

    pub fn find_mut(&mut self, id: StreamId) -> Option<&mut Stream> {
        let key = *self.ids.get(&id)?;
        Some(&mut self.slab[key])
    }

    pub fn find(&self, id: StreamId) -> Option<&Stream> {
        let key = *self.ids.get(&id)?;
        Some(&self.slab[key])
    }

    pub fn remove(&mut self, id: StreamId) -> Option<Stream> {
        let key = self.ids.remove(&id)?;
        Some(self.slab.remove(key))
    }

    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Stream),
    {
        for (_, stream) in self.slab.iter_mut() {
            f(stream);
        }
    }

    /// Stream ids for which `f` holds.
    pub fn ids_where<F>(&self, f: F) -> Vec<StreamId>
    where
        F: Fn(&Stream) -> bool,
    {
        self.slab
            .iter()
            .filter(|(_, s)| f(s))
            .map(|(_, s)| s.id)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stream(id: u32) -> Stream {
        Stream::new(StreamId::from(id), 65_535, 65_535)
    }

    #[test]
    fn insert_find_remove() {
        let mut store = Store::new();
        store.insert(StreamId::from(1), stream(1));
        store.insert(StreamId::from(3), stream(3));

        assert_eq!(store.len(), 2);
        assert!(store.find_mut(StreamId::from(1)).is_some());
        assert!(store.find_mut(StreamId::from(5)).is_none());

        let removed = store.remove(StreamId::from(1)).unwrap();
        assert_eq!(removed.id, StreamId::from(1));
        assert_eq!(store.len(), 1);
        assert!(!store.contains(StreamId::from(1)));
    }

    #[test]
    fn slots_are_reused() {
        let mut store = Store::new();
        store.insert(StreamId::from(1), stream(1));
        store.remove(StreamId::from(1));
        store.insert(StreamId::from(3), stream(3));
        assert_eq!(store.len(), 1);
        assert_eq!(store.find(StreamId::from(3)).unwrap().id, StreamId::from(3));
    }
}
