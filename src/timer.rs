//! Indexed min-heap timer for idle-connection deadlines.
//!
//! A binary min-heap ordered by `expires`, plus an auxiliary `id ->
//! heap index` map so a live timer can be adjusted or cancelled by
//! identity in `O(log n)` without a linear scan. All mutation goes
//! through `swap`, which keeps both heap slots' index entries correct.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// Identity of a timed entity — a connection's slab index / fd.
pub type TimerId = usize;

struct TimerNode {
    id: TimerId,
    expires: Instant,
    callback: Box<dyn FnOnce(TimerId) + Send>,
}

/// An indexed min-heap of `(id, deadline, callback)` triples.
#[derive(Default)]
pub struct TimerHeap {
    heap: Vec<TimerNode>,
    index: HashMap<TimerId, usize>,
}

impl TimerHeap {
    /// Creates an empty heap with room for `capacity` timers before the
    /// first reallocation.
    pub fn with_capacity(capacity: usize) -> Self {
        TimerHeap {
            heap: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the heap holds no timers.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.index.insert(self.heap[i].id, i);
        self.index.insert(self.heap[j].id, j);
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if self.heap[i].expires >= self.heap[parent].expires {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    /// Sifts the node at `i` down. Returns whether the node moved, which
    /// callers use to decide whether a subsequent `sift_up` is needed.
    fn sift_down(&mut self, i: usize) -> bool {
        let n = self.heap.len();
        let mut j = i;
        loop {
            let mut smallest = j;
            let left = 2 * j + 1;
            let right = 2 * j + 2;
            if left < n && self.heap[left].expires < self.heap[smallest].expires {
                smallest = left;
            }
            if right < n && self.heap[right].expires < self.heap[smallest].expires {
                smallest = right;
            }
            if smallest == j {
                break;
            }
            self.swap(j, smallest);
            j = smallest;
        }
        j != i
    }

    /// Deletes the node at heap index `i`: swap-with-last, pop, then
    /// sift-down at `i`; if that didn't move the element, sift-up instead.
    /// Returns the removed node so callers can run its callback.
    fn delete_at(&mut self, i: usize) -> TimerNode {
        let last = self.heap.len() - 1;
        if i != last {
            self.swap(i, last);
        }
        let removed = self.heap.pop().expect("delete_at on empty heap");
        self.index.remove(&removed.id);

        if i < self.heap.len() && !self.sift_down(i) {
            self.sift_up(i);
        }
        removed
    }

    /// Adds a new timer, or refreshes an existing one's deadline and
    /// callback in place.
    pub fn add(
        &mut self,
        id: TimerId,
        ttl: Duration,
        callback: impl FnOnce(TimerId) + Send + 'static,
    ) {
        let expires = Instant::now() + ttl;
        match self.index.get(&id).copied() {
            None => {
                let i = self.heap.len();
                self.index.insert(id, i);
                self.heap.push(TimerNode {
                    id,
                    expires,
                    callback: Box::new(callback),
                });
                self.sift_up(i);
            }
            Some(i) => {
                self.heap[i].expires = expires;
                self.heap[i].callback = Box::new(callback);
                if !self.sift_down(i) {
                    self.sift_up(i);
                }
            }
        }
    }

    /// Refreshes an existing timer's deadline to `now + ttl`, leaving its
    /// callback untouched. Because the new deadline is always strictly
    /// later than any sooner-expiring sibling it might displace,
    /// sift-down alone suffices.
    pub fn adjust(&mut self, id: TimerId, ttl: Duration) {
        if let Some(&i) = self.index.get(&id) {
            self.heap[i].expires = Instant::now() + ttl;
            self.sift_down(i);
        }
    }

    /// Invokes and removes the timer for `id`, if it is still live. No-op
    /// if absent (e.g. the connection already closed through another path).
    pub fn do_work(&mut self, id: TimerId) {
        if let Some(&i) = self.index.get(&id) {
            let node = self.delete_at(i);
            (node.callback)(node.id);
        }
    }

    /// Removes the root of the heap, if any, without running its callback.
    pub fn pop(&mut self) {
        if !self.heap.is_empty() {
            self.delete_at(0);
        }
    }

    /// Removes the timer for `id` without running its callback, e.g.
    /// when a connection closes through a path other than the idle
    /// timeout (peer hangup, write error) and must not fire later.
    /// No-op if `id` isn't live.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(&i) = self.index.get(&id) {
            self.delete_at(i);
        }
    }

    /// Runs and pops every timer whose deadline has already passed.
    pub fn tick(&mut self) {
        let now = Instant::now();
        while let Some(node) = self.heap.first() {
            if node.expires > now {
                break;
            }
            let expired = self.delete_at(0);
            (expired.callback)(expired.id);
        }
    }

    /// Runs `tick()`, then returns the number of milliseconds until the
    /// next deadline, or `None` if the heap is empty (meaning "wait
    /// indefinitely").
    pub fn next_tick_ms(&mut self) -> Option<u64> {
        self.tick();
        self.heap.first().map(|node| {
            let now = Instant::now();
            node.expires.saturating_duration_since(now).as_millis() as u64
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn heap_property_holds_after_adds() {
        let mut heap = TimerHeap::with_capacity(8);
        for (id, ms) in [(1, 500), (2, 10), (3, 250), (4, 1)] {
            heap.add(id, Duration::from_millis(ms), |_| {});
        }
        for i in 0..heap.heap.len() {
            if i == 0 {
                continue;
            }
            let parent = (i - 1) / 2;
            assert!(heap.heap[parent].expires <= heap.heap[i].expires);
            assert_eq!(heap.index[&heap.heap[i].id], i);
        }
    }

    #[test]
    fn tick_fires_only_expired_entries_in_order() {
        let mut heap = TimerHeap::with_capacity(4);
        let fired = Arc::new(Mutex::new(Vec::new()));
        let f1 = fired.clone();
        heap.add(1, Duration::from_millis(0), move |id| f1.lock().unwrap().push(id));
        let f2 = fired.clone();
        heap.add(2, Duration::from_secs(60), move |id| f2.lock().unwrap().push(id));
        heap.tick();
        assert_eq!(*fired.lock().unwrap(), vec![1]);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn adjust_pushes_deadline_into_the_future() {
        let mut heap = TimerHeap::with_capacity(4);
        heap.add(1, Duration::from_millis(0), |_| {});
        heap.adjust(1, Duration::from_secs(60));
        heap.tick();
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn do_work_removes_without_double_firing_on_tick() {
        let mut heap = TimerHeap::with_capacity(4);
        let fired = Arc::new(Mutex::new(0u32));
        let f = fired.clone();
        heap.add(1, Duration::from_millis(0), move |_| {
            *f.lock().unwrap() += 1;
        });
        heap.do_work(1);
        assert_eq!(heap.len(), 0);
        heap.tick();
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn cancel_removes_without_running_callback() {
        let mut heap = TimerHeap::with_capacity(4);
        let fired = Arc::new(Mutex::new(0u32));
        let f = fired.clone();
        heap.add(1, Duration::from_millis(0), move |_| {
            *f.lock().unwrap() += 1;
        });
        heap.cancel(1);
        assert_eq!(heap.len(), 0);
        heap.tick();
        assert_eq!(*fired.lock().unwrap(), 0);
    }

    #[test]
    fn next_tick_ms_none_when_empty() {
        let mut heap = TimerHeap::with_capacity(1);
        assert_eq!(heap.next_tick_ms(), None);
    }
}
