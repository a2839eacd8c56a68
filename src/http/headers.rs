//! Header storage for one message.
//!
//! Names and values are appended to a single byte buffer; entries refer to
//! them by [`ByteRange`], so cloning a table never leaves a dangling
//! reference. Both the entry count and the byte buffer are bounded.
//! Lookup is case-insensitive and walks the table backwards, so the most
//! recently pushed duplicate wins.

/// A `start..start+len` window into a header buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start: u32,
    len: u32,
}

impl ByteRange {
    /// Builds a range, refusing one that does not fit `u32` offsets.
    pub fn new(start: usize, len: usize) -> Option<Self> {
        let start = u32::try_from(start).ok()?;
        let len = u32::try_from(len).ok()?;
        start.checked_add(len)?;
        Some(Self { start, len })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolves the range against `buf`; `None` if it falls outside.
    pub fn slice<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        let start = self.start as usize;
        buf.get(start..start + self.len as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: ByteRange,
    pub value: ByteRange,
    pub hash: u32,
}

/// FNV-1a over the ASCII-lowercased name.
pub fn name_hash(name: &str) -> u32 {
    name.bytes().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(b.to_ascii_lowercase())).wrapping_mul(0x0100_0193)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderTable {
    buf: Vec<u8>,
    entries: Vec<HeaderEntry>,
    max_entries: usize,
    max_bytes: usize,
}

impl HeaderTable {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            entries: Vec::new(),
            max_entries,
            max_bytes,
        }
    }

    /// Appends a header. Returns `false` once the table or the byte buffer
    /// is full; the table is left untouched in that case.
    pub fn push(&mut self, name: &str, value: &str) -> bool {
        if self.entries.len() >= self.max_entries {
            return false;
        }
        if self.buf.len() + name.len() + value.len() > self.max_bytes {
            return false;
        }

        let Some(name_range) = ByteRange::new(self.buf.len(), name.len()) else {
            return false;
        };
        let Some(value_range) = ByteRange::new(self.buf.len() + name.len(), value.len()) else {
            return false;
        };

        self.buf.extend_from_slice(name.as_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self.entries.push(HeaderEntry {
            name: name_range,
            value: value_range,
            hash: name_hash(name),
        });
        true
    }

    /// Returns the value of the last header called `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        let hash = name_hash(name);
        self.entries
            .iter()
            .rev()
            .filter(|entry| entry.hash == hash)
            .find_map(|entry| {
                let (stored, value) = self.resolve(entry)?;
                stored.eq_ignore_ascii_case(name).then_some(value)
            })
    }

    /// Every stored header in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().filter_map(|entry| self.resolve(entry))
    }

    fn resolve(&self, entry: &HeaderEntry) -> Option<(&str, &str)> {
        let name = std::str::from_utf8(entry.name.slice(&self.buf)?).ok()?;
        let value = std::str::from_utf8(entry.value.slice(&self.buf)?).ok()?;
        Some((name, value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_entries
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.entries.clear();
    }
}
