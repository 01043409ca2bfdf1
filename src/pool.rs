/// Key of an interned byte string.
///
/// Equal inputs interned in the same pool always resolve to the same key,
/// so keys can be compared cheaply instead of their bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Interned {
    start: usize,
    len: usize,
}

impl Interned {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u32,
    start: usize,
    len: usize,
}

const INITIAL_BUCKETS: usize = 16;

#[inline(always)]
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;

    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x01000193);
    }

    hash
}

/// Deduplicating store for byte strings, typically fed from row callbacks
/// to keep long-lived copies of repeated field values.
///
/// Open addressing with linear probing over a power-of-two bucket count,
/// at most 3/4 full. Interned bytes live in an append-only arena. Not
/// involved in parsing itself.
#[derive(Debug)]
pub struct StringPool {
    buckets: Vec<Option<Entry>>,
    items: usize,
    data: Vec<u8>,
}

impl Default for StringPool {
    fn default() -> Self {
        Self::with_capacity(4096)
    }
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pool whose arena starts out with `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: vec![None; INITIAL_BUCKETS],
            items: 0,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Number of distinct byte strings held by the pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.items
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Intern `bytes`, returning a key equal to the one returned for every
    /// other equal input.
    pub fn intern(&mut self, bytes: &[u8]) -> Interned {
        if (self.items + 1) * 4 > self.buckets.len() * 3 {
            self.grow();
        }

        let hash = fnv1a(bytes);
        let mask = self.buckets.len() - 1;
        let mut index = hash as usize & mask;

        loop {
            match &self.buckets[index] {
                Some(entry)
                    if entry.hash == hash
                        && entry.len == bytes.len()
                        && &self.data[entry.start..entry.start + entry.len] == bytes =>
                {
                    return Interned {
                        start: entry.start,
                        len: entry.len,
                    };
                }
                Some(_) => {
                    index = (index + 1) & mask;
                }
                None => break,
            }
        }

        let start = self.data.len();
        self.data.extend_from_slice(bytes);

        self.buckets[index] = Some(Entry {
            hash,
            start,
            len: bytes.len(),
        });
        self.items += 1;

        Interned {
            start,
            len: bytes.len(),
        }
    }

    /// Intern `bytes` and resolve the key immediately.
    #[inline]
    pub fn intern_bytes(&mut self, bytes: &[u8]) -> &[u8] {
        let interned = self.intern(bytes);
        self.get(interned)
    }

    /// Resolve a key previously returned by [`StringPool::intern`].
    #[inline]
    pub fn get(&self, interned: Interned) -> &[u8] {
        &self.data[interned.start..interned.start + interned.len]
    }

    /// Forget every interned string, retaining allocations.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|bucket| *bucket = None);
        self.items = 0;
        self.data.clear();
    }

    fn grow(&mut self) {
        let new_len = (self.buckets.len() * 2).next_power_of_two();
        let old_buckets = std::mem::replace(&mut self.buckets, vec![None; new_len]);

        let mask = self.buckets.len() - 1;

        for entry in old_buckets.into_iter().flatten() {
            let mut index = entry.hash as usize & mask;

            while self.buckets[index].is_some() {
                index = (index + 1) & mask;
            }

            self.buckets[index] = Some(entry);
        }
    }
}
