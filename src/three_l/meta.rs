//! Dense per-object tables for the learned policy.
//!
//! Resident objects live in `in_cache`, a dense arena threaded by an
//! intrusive circular doubly-linked list (`prev`/`next` indices inside each
//! record): O(1) head access, O(1) re-request promotion, contiguous rows
//! for feature extraction. Recently evicted objects move to `out_cache`, a
//! FIFO of shadow records whose front position is tracked by a persistent
//! `front_index` so key-map positions survive pop-from-front.

use std::collections::{HashMap, VecDeque};

/// Length of the past inter-access distance ring.
pub(crate) const DISTANCE_RING: usize = 3;

const NIL: usize = usize::MAX;

/// Cyclic ring of the most recent inter-access distances.
#[derive(Clone, Debug, Default)]
pub(crate) struct ExtraRing {
    past: [u64; DISTANCE_RING],
    len: u8,
    cursor: u8,
}

impl ExtraRing {
    pub(crate) fn push(&mut self, distance: u64) {
        self.past[self.cursor as usize] = distance;
        self.cursor = (self.cursor + 1) % DISTANCE_RING as u8;
        self.len = (self.len + 1).min(DISTANCE_RING as u8);
    }

    /// Stored distances, newest first.
    pub(crate) fn newest_first(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len as usize).map(move |i| {
            let idx = (self.cursor as usize + DISTANCE_RING - 1 - i) % DISTANCE_RING;
            self.past[idx]
        })
    }
}

/// Per-object record: identity, size, access history and list linkage.
#[derive(Clone, Debug)]
pub(crate) struct Meta {
    pub(crate) key: u64,
    pub(crate) size: u64,
    pub(crate) last_access: u64,
    pub(crate) freq: u16,
    /// Logical time this object was marked for training-label emission;
    /// 0 when not currently sampled.
    pub(crate) sample_time: u64,
    /// Distance ring, allocated lazily on the second access.
    pub(crate) extra: Option<Box<ExtraRing>>,
    prev: usize,
    next: usize,
}

impl Meta {
    pub(crate) fn new(key: u64, size: u64, now: u64) -> Self {
        Self {
            key,
            size,
            last_access: now,
            freq: 1,
            sample_time: 0,
            extra: None,
            prev: NIL,
            next: NIL,
        }
    }

    /// Records a re-access: appends the inter-access distance, bumps the
    /// saturating frequency and refreshes the last-access time.
    pub(crate) fn record_access(&mut self, now: u64) {
        let distance = now.saturating_sub(self.last_access);
        self.extra.get_or_insert_with(Default::default).push(distance);
        self.freq = self.freq.saturating_add(1);
        self.last_access = now;
    }
}

/// Which table a key currently maps into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ListKind {
    InCache,
    OutCache,
}

/// Row descriptor: table selector plus position. For `OutCache` the
/// position is absolute (offset by the persistent front index).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) list: ListKind,
    pub(crate) pos: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MetaTables {
    in_cache: Vec<Meta>,
    head: usize,
    scan: usize,
    out_cache: VecDeque<Meta>,
    front_index: usize,
    key_map: HashMap<u64, Location>,
}

impl MetaTables {
    pub(crate) fn new() -> Self {
        Self {
            in_cache: Vec::new(),
            head: NIL,
            scan: NIL,
            out_cache: VecDeque::new(),
            front_index: 0,
            key_map: HashMap::new(),
        }
    }

    #[inline]
    pub(crate) fn in_len(&self) -> usize {
        self.in_cache.len()
    }

    #[inline]
    pub(crate) fn out_len(&self) -> usize {
        self.out_cache.len()
    }

    #[inline]
    pub(crate) fn total_len(&self) -> usize {
        self.in_cache.len() + self.out_cache.len()
    }

    #[inline]
    pub(crate) fn location(&self, key: u64) -> Option<Location> {
        self.key_map.get(&key).copied()
    }

    #[inline]
    pub(crate) fn head(&self) -> Option<usize> {
        if self.head == NIL {
            None
        } else {
            Some(self.head)
        }
    }

    #[inline]
    pub(crate) fn next_of(&self, idx: usize) -> usize {
        self.in_cache[idx].next
    }

    #[inline]
    pub(crate) fn in_meta(&self, idx: usize) -> &Meta {
        &self.in_cache[idx]
    }

    #[inline]
    pub(crate) fn in_meta_mut(&mut self, idx: usize) -> &mut Meta {
        &mut self.in_cache[idx]
    }

    /// The record at position `i` over the union `in_cache ++ out_cache`,
    /// as used by the uniform sampler.
    pub(crate) fn nth_meta_mut(&mut self, i: usize) -> &mut Meta {
        let in_len = self.in_cache.len();
        if i < in_len {
            &mut self.in_cache[i]
        } else {
            &mut self.out_cache[i - in_len]
        }
    }

    fn link_tail(&mut self, idx: usize) {
        if self.head == NIL {
            self.head = idx;
            self.in_cache[idx].prev = idx;
            self.in_cache[idx].next = idx;
        } else {
            let head = self.head;
            let tail = self.in_cache[head].prev;
            self.in_cache[tail].next = idx;
            self.in_cache[idx].prev = tail;
            self.in_cache[idx].next = head;
            self.in_cache[head].prev = idx;
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.in_cache[idx].prev, self.in_cache[idx].next);
        if next == idx {
            // Sole element
            self.head = NIL;
            self.scan = NIL;
        } else {
            self.in_cache[prev].next = next;
            self.in_cache[next].prev = prev;
            if self.head == idx {
                self.head = next;
            }
            if self.scan == idx {
                self.scan = next;
            }
        }
        self.in_cache[idx].prev = NIL;
        self.in_cache[idx].next = NIL;
    }

    /// Appends a record at the tail of the circular list (just before the
    /// head) and indexes it in the key map.
    pub(crate) fn push_in(&mut self, meta: Meta) -> usize {
        let idx = self.in_cache.len();
        self.key_map.insert(
            meta.key,
            Location {
                list: ListKind::InCache,
                pos: idx,
            },
        );
        self.in_cache.push(meta);
        self.link_tail(idx);
        idx
    }

    /// Re-request promotion: detach and re-link at the tail.
    pub(crate) fn touch(&mut self, idx: usize) {
        if self.in_cache[idx].next == idx {
            return;
        }
        self.detach(idx);
        self.link_tail(idx);
    }

    /// Removes a record by swap-remove, fixing the circular links, the key
    /// map entry of the displaced record and the head/scan pointers in one
    /// logical operation.
    pub(crate) fn swap_remove_in(&mut self, idx: usize) -> Meta {
        self.detach(idx);
        let key = self.in_cache[idx].key;
        self.key_map.remove(&key);

        let last = self.in_cache.len() - 1;
        let meta = if idx != last {
            let moved_key = self.in_cache[last].key;
            self.in_cache.swap(idx, last);
            let meta = self.in_cache.pop().expect("non-empty after swap");
            let (prev, next) = (self.in_cache[idx].prev, self.in_cache[idx].next);
            if next == last {
                // The displaced record was the sole list element
                self.in_cache[idx].prev = idx;
                self.in_cache[idx].next = idx;
            } else {
                self.in_cache[prev].next = idx;
                self.in_cache[next].prev = idx;
            }
            if self.head == last {
                self.head = idx;
            }
            if self.scan == last {
                self.scan = idx;
            }
            let entry = self
                .key_map
                .get_mut(&moved_key)
                .expect("displaced record must be indexed");
            debug_assert_eq!(entry.pos, last, "stale index for displaced record");
            entry.pos = idx;
            meta
        } else {
            self.in_cache.pop().expect("non-empty at swap_remove")
        };
        debug_assert!(self.head == NIL || self.head < self.in_cache.len());
        debug_assert!(self.scan == NIL || self.scan < self.in_cache.len());
        meta
    }

    /// Current scan position, falling back to the head after removals
    /// invalidated the pointer.
    pub(crate) fn scan_current(&self) -> Option<usize> {
        if self.head == NIL {
            None
        } else if self.scan == NIL {
            Some(self.head)
        } else {
            Some(self.scan)
        }
    }

    /// Advances the scan pointer one step. Returns `true` when the scan
    /// wrapped around to the head (one full sweep completed).
    pub(crate) fn scan_advance(&mut self) -> bool {
        match self.scan_current() {
            Some(cur) => {
                self.scan = self.in_cache[cur].next;
                self.scan == self.head
            }
            None => false,
        }
    }

    /// Moves an evicted record into the shadow FIFO.
    pub(crate) fn push_out(&mut self, meta: Meta) {
        self.key_map.insert(
            meta.key,
            Location {
                list: ListKind::OutCache,
                pos: self.front_index + self.out_cache.len(),
            },
        );
        self.out_cache.push_back(meta);
    }

    /// Pops the oldest shadow record. The second tuple element is `false`
    /// for tombstones: records whose key has since been promoted back into
    /// the cache, detected by a key-map agreement check.
    pub(crate) fn pop_out(&mut self) -> Option<(Meta, bool)> {
        let meta = self.out_cache.pop_front()?;
        let pos = self.front_index;
        self.front_index += 1;
        let live = self.key_map.get(&meta.key)
            == Some(&Location {
                list: ListKind::OutCache,
                pos,
            });
        if live {
            self.key_map.remove(&meta.key);
        }
        Some((meta, live))
    }

    /// Copies a shadow record for promotion back into the cache. The slot
    /// in `out_cache` stays behind as a tombstone; the caller's `push_in`
    /// repoints the key map, which is what `pop_out` later detects.
    pub(crate) fn clone_out(&self, key: u64) -> Option<Meta> {
        match self.key_map.get(&key) {
            Some(&Location {
                list: ListKind::OutCache,
                pos,
            }) => self.out_cache.get(pos - self.front_index).cloned(),
            _ => None,
        }
    }
}
