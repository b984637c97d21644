//! Recycling (inactive) queues
//!
//! Unreferenced windows wait here to be rebound. Each color has its own
//! queue; a window never moves between colors. Queues are intrusive doubly
//! linked lists threaded through the window arena by index, so insertion
//! and removal are O(1) and removing a window that is not queued is a
//! no-op.

use alloc::vec::Vec;

/// Links of one window in its queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLink {
    prev: Option<usize>,
    next: Option<usize>,
    queued: bool,
}

impl QueueLink {
    /// Is the window on a queue?
    pub fn is_queued(&self) -> bool {
        self.queued
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct QueueHead {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// The set of per-color recycling queues
#[derive(Debug)]
pub struct InactiveQueues {
    queues: Vec<QueueHead>,
}

impl InactiveQueues {
    /// Create `ncolors` empty queues
    pub fn new(ncolors: usize) -> Self {
        Self {
            queues: alloc::vec![QueueHead::default(); ncolors],
        }
    }

    /// Number of queues
    pub fn ncolors(&self) -> usize {
        self.queues.len()
    }

    /// Windows on queue `q`
    pub fn len(&self, q: usize) -> usize {
        self.queues[q].len
    }

    /// Windows on every queue
    pub fn total(&self) -> usize {
        self.queues.iter().map(|q| q.len).sum()
    }

    /// Oldest window on queue `q`
    pub fn first(&self, q: usize) -> Option<usize> {
        self.queues[q].head
    }

    /// Queue `win` at the tail of `q` (most recently released)
    pub fn insert_tail(&mut self, links: &mut [QueueLink], q: usize, win: usize) {
        debug_assert!(!links[win].queued, "window {} queued twice", win);
        let head = &mut self.queues[q];
        links[win] = QueueLink {
            prev: head.tail,
            next: None,
            queued: true,
        };
        match head.tail {
            Some(t) => links[t].next = Some(win),
            None => head.head = Some(win),
        }
        head.tail = Some(win);
        head.len += 1;
    }

    /// Queue `win` at the head of `q` (next to be recycled)
    pub fn insert_head(&mut self, links: &mut [QueueLink], q: usize, win: usize) {
        debug_assert!(!links[win].queued, "window {} queued twice", win);
        let head = &mut self.queues[q];
        links[win] = QueueLink {
            prev: None,
            next: head.head,
            queued: true,
        };
        match head.head {
            Some(h) => links[h].prev = Some(win),
            None => head.tail = Some(win),
        }
        head.head = Some(win);
        head.len += 1;
    }

    /// Take `win` off queue `q`; returns false if it was not queued
    pub fn remove(&mut self, links: &mut [QueueLink], q: usize, win: usize) -> bool {
        let link = links[win];
        if !link.queued {
            return false;
        }
        let head = &mut self.queues[q];
        match link.prev {
            Some(p) => links[p].next = link.next,
            None => head.head = link.next,
        }
        match link.next {
            Some(n) => links[n].prev = link.prev,
            None => head.tail = link.prev,
        }
        head.len -= 1;
        links[win] = QueueLink::default();
        true
    }

    /// Windows on queue `q`, oldest first
    pub fn iter<'a>(&self, links: &'a [QueueLink], q: usize) -> impl Iterator<Item = usize> + 'a {
        let mut cur = self.queues[q].head;
        core::iter::from_fn(move || {
            let win = cur?;
            cur = links[win].next;
            Some(win)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_fifo_order() {
        let mut links = vec![QueueLink::default(); 4];
        let mut q = InactiveQueues::new(1);
        for w in 0..4 {
            q.insert_tail(&mut links, 0, w);
        }
        assert_eq!(q.iter(&links, 0).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(q.first(0), Some(0));

        assert!(q.remove(&mut links, 0, 0));
        q.insert_tail(&mut links, 0, 0);
        assert_eq!(q.iter(&links, 0).collect::<Vec<_>>(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_insert_head_is_next_victim() {
        let mut links = vec![QueueLink::default(); 3];
        let mut q = InactiveQueues::new(1);
        q.insert_tail(&mut links, 0, 0);
        q.insert_tail(&mut links, 0, 1);
        q.insert_head(&mut links, 0, 2);
        assert_eq!(q.first(0), Some(2));
        assert_eq!(q.len(0), 3);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut links = vec![QueueLink::default(); 3];
        let mut q = InactiveQueues::new(2);
        q.insert_tail(&mut links, 1, 0);
        q.insert_tail(&mut links, 1, 1);
        q.insert_tail(&mut links, 1, 2);

        assert!(q.remove(&mut links, 1, 1));
        assert!(!q.remove(&mut links, 1, 1));
        assert_eq!(q.len(1), 2);
        assert_eq!(q.iter(&links, 1).collect::<Vec<_>>(), vec![0, 2]);
        assert!(!links[1].is_queued());

        assert!(q.remove(&mut links, 1, 0));
        assert!(q.remove(&mut links, 1, 2));
        assert_eq!(q.first(1), None);
        assert_eq!(q.total(), 0);
        assert_eq!(q.len(0), 0);
    }
}
