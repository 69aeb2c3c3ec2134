//! Expiry-ordered list of running timers.
//!
//! Nodes live in an arena indexed by timer slot, so links are plain indices
//! and a timer that is not a member is `Link::Unlinked` rather than a
//! self-pointer. Only the dispatcher touches this structure.

use crate::clock::ticks_until;
use crate::timer::TimerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Unlinked,
    Linked {
        prev: Option<usize>,
        next: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    link: Link,
    expiry: u32,
    generation: u32,
}

impl Node {
    const EMPTY: Node = Node {
        link: Link::Unlinked,
        expiry: 0,
        generation: 0,
    };
}

/// Sorted doubly linked list; insertion is a linear scan from the head.
#[derive(Debug, Default)]
pub(crate) struct ActiveList {
    nodes: Vec<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ActiveList {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        ActiveList {
            nodes: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Whether `timer`, at this exact generation, is a member.
    pub(crate) fn contains(&self, timer: TimerId) -> bool {
        self.linked_generation(timer.slot()) == Some(timer.generation)
    }

    fn linked_generation(&self, slot: usize) -> Option<u32> {
        match self.nodes.get(slot) {
            Some(node) if node.link != Link::Unlinked => Some(node.generation),
            _ => None,
        }
    }

    /// Earliest member and its expiry.
    pub(crate) fn peek_earliest(&self) -> Option<(TimerId, u32)> {
        self.head.map(|slot| self.entry(slot))
    }

    /// Inserts `timer` ordered by `expiry - now`, after any equal members.
    ///
    /// Returns `false` and changes nothing if `timer` is already linked. A
    /// node left behind by an earlier generation of the slot is dropped.
    pub(crate) fn insert(&mut self, timer: TimerId, expiry: u32, now: u32) -> bool {
        let slot = timer.slot();
        if self.nodes.len() <= slot {
            self.nodes.resize(slot + 1, Node::EMPTY);
        }
        match self.linked_generation(slot) {
            Some(generation) if generation == timer.generation => return false,
            Some(_) => self.unlink(slot),
            None => {}
        }

        let remaining = ticks_until(expiry, now);
        let mut cursor = self.head;
        while let Some(pos) = cursor {
            if remaining < ticks_until(self.nodes[pos].expiry, now) {
                break;
            }
            cursor = self.next_of(pos);
        }

        let prev = match cursor {
            Some(pos) => self.prev_of(pos),
            None => self.tail,
        };
        self.nodes[slot] = Node {
            link: Link::Linked { prev, next: cursor },
            expiry,
            generation: timer.generation,
        };
        match prev {
            Some(p) => self.set_next(p, Some(slot)),
            None => self.head = Some(slot),
        }
        match cursor {
            Some(n) => self.set_prev(n, Some(slot)),
            None => self.tail = Some(slot),
        }
        self.len += 1;
        true
    }

    /// Unlinks `timer` in O(1). Returns `false` if it was not a member.
    ///
    /// A node of another generation in the same slot is left alone.
    pub(crate) fn remove(&mut self, timer: TimerId) -> bool {
        if !self.contains(timer) {
            return false;
        }
        self.unlink(timer.slot());
        true
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.nodes[slot].link {
            Link::Linked { prev, next } => (prev, next),
            Link::Unlinked => return,
        };
        match prev {
            Some(p) => self.set_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.set_prev(n, prev),
            None => self.tail = prev,
        }
        self.nodes[slot].link = Link::Unlinked;
        self.len -= 1;
    }

    /// Members in firing order with their expiries.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (TimerId, u32)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = cursor?;
            cursor = self.next_of(slot);
            Some(self.entry(slot))
        })
    }

    fn entry(&self, slot: usize) -> (TimerId, u32) {
        let node = &self.nodes[slot];
        let id = TimerId {
            index: slot as u32,
            generation: node.generation,
        };
        (id, node.expiry)
    }

    fn next_of(&self, slot: usize) -> Option<usize> {
        match self.nodes[slot].link {
            Link::Linked { next, .. } => next,
            Link::Unlinked => None,
        }
    }

    fn prev_of(&self, slot: usize) -> Option<usize> {
        match self.nodes[slot].link {
            Link::Linked { prev, .. } => prev,
            Link::Unlinked => None,
        }
    }

    fn set_next(&mut self, slot: usize, value: Option<usize>) {
        if let Link::Linked { next, .. } = &mut self.nodes[slot].link {
            *next = value;
        }
    }

    fn set_prev(&mut self, slot: usize, value: Option<usize>) {
        if let Link::Linked { prev, .. } = &mut self.nodes[slot].link {
            *prev = value;
        }
    }
}
