use std::collections::VecDeque;

use bytes::Bytes;
use fnv::FnvHashMap;
use once_cell::sync::Lazy;

/// The static table of well known headers, RFC 7541 Appendix A.
///
/// Indices are 1-based on the wire; entry 0 of this array is index 1.
pub const STATIC_TABLE: [(&str, &str); 61] = [
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Static entries grouped by name: first index for the name, then each
/// (value, index) pair under it. Built once, for the encoder's lookups.
static STATIC_BY_NAME: Lazy<FnvHashMap<&'static str, Vec<(&'static str, usize)>>> =
    Lazy::new(|| {
        let mut map: FnvHashMap<&'static str, Vec<(&'static str, usize)>> =
            FnvHashMap::default();
        for (i, &(name, value)) in STATIC_TABLE.iter().enumerate() {
            map.entry(name).or_default().push((value, i + 1));
        }
        map
    });

pub fn static_full_index(name: &[u8], value: &[u8]) -> Option<usize> {
    let name = std::str::from_utf8(name).ok()?;
    let value = std::str::from_utf8(value).ok()?;
    STATIC_BY_NAME
        .get(name)?
        .iter()
        .find(|(v, _)| *v == value)
        .map(|&(_, i)| i)
}

pub fn static_name_index(name: &[u8]) -> Option<usize> {
    let name = std::str::from_utf8(name).ok()?;
    STATIC_BY_NAME.get(name)?.first().map(|&(_, i)| i)
}

/// The dynamic table: a FIFO of (name, value) entries with a byte budget.
///
/// Entries are addressed from the most recently inserted (wire index 62)
/// to the oldest. The size of an entry is `name + value + 32` octets.
#[derive(Debug)]
pub struct Table {
    entries: VecDeque<(Bytes, Bytes)>,
    size: usize,
    max_size: usize,
}

impl Table {
    pub fn new(max_size: usize) -> Table {
        Table {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up a dynamic entry by its 0-based offset (wire index minus 62).
    pub fn get(&self, index: usize) -> Option<&(Bytes, Bytes)> {
        self.entries.get(index)
    }

    /// Insert an entry, evicting from the tail until it fits.
    ///
    /// An entry larger than the whole budget empties the table without
    /// being added, per RFC 7541 § 4.4.
    pub fn insert(&mut self, name: Bytes, value: Bytes) {
        let len = name.len() + value.len() + 32;

        if len > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }

        while self.size + len > self.max_size {
            let (name, value) = self
                .entries
                .pop_back()
                .expect("size accounting out of sync");
            self.size -= name.len() + value.len() + 32;
        }

        self.size += len;
        self.entries.push_front((name, value));
    }

    /// Resize the byte budget, evicting as needed.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;

        while self.size > self.max_size {
            let (name, value) = self
                .entries
                .pop_back()
                .expect("size accounting out of sync");
            self.size -= name.len() + value.len() + 32;
        }
    }

    /// Find an exact entry, returning its 0-based offset.
    pub fn find_full(&self, name: &[u8], value: &[u8]) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, v)| n == name && v == value)
    }

    /// Find an entry by name, returning its 0-based offset.
    pub fn find_name(&self, name: &[u8]) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n == name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inserts_evict_from_the_tail() {
        // Two entries of size 32 + 1 + 1 = 34 fit in 68 bytes.
        let mut table = Table::new(68);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        table.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"));
        assert_eq!(table.len(), 2);

        table.insert(Bytes::from_static(b"c"), Bytes::from_static(b"3"));
        assert_eq!(table.len(), 2);

        // Most recent first
        assert_eq!(&table.get(0).unwrap().0[..], b"c");
        assert_eq!(&table.get(1).unwrap().0[..], b"b");
        assert!(table.get(2).is_none());
    }

    #[test]
    fn oversize_insert_empties_table() {
        let mut table = Table::new(64);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        assert_eq!(table.len(), 1);

        let big = Bytes::from(vec![b'x'; 64]);
        table.insert(Bytes::from_static(b"b"), big);
        assert_eq!(table.len(), 0);
        assert_eq!(table.size(), 0);
    }

    #[test]
    fn shrinking_budget_evicts() {
        let mut table = Table::new(128);
        table.insert(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        table.insert(Bytes::from_static(b"b"), Bytes::from_static(b"2"));

        table.set_max_size(40);
        assert_eq!(table.len(), 1);
        assert_eq!(&table.get(0).unwrap().0[..], b"b");
    }

    #[test]
    fn static_lookups() {
        assert_eq!(static_full_index(b":method", b"GET"), Some(2));
        assert_eq!(static_full_index(b":status", b"200"), Some(8));
        assert_eq!(static_name_index(b":authority"), Some(1));
        assert_eq!(static_name_index(b"www-authenticate"), Some(61));
        assert_eq!(static_name_index(b"x-custom"), None);
    }
}
