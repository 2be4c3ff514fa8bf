use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// A node in the lock-free stack
///
/// The value slot is `MaybeUninit` because the pop that unlinks a node moves
/// the value out; by the time the node itself is reclaimed the slot must no
/// longer own anything.
struct Node<T> {
    /// The value stored in this node
    value: MaybeUninit<T>,
    /// Atomic pointer to the node below this one
    next: Atomic<Node<T>>,
}

/// A lock-free stack implementation using epoch-based memory reclamation
///
/// This is a Treiber stack: a single atomic top-of-stack reference updated
/// purely through compare-and-swap retry loops. Operations never block and
/// never fail; contention only causes retries. Epoch-based reclamation
/// guarantees that an unlinked node cannot be freed and reused while any
/// thread still holds a reference to it, which rules out the ABA problem.
///
/// # Type Parameters
/// * `T`: The type of values stored in the stack
///
/// # Examples
/// ```
/// use lockfree_collections::LockFreeStack;
///
/// let stack = LockFreeStack::new();
/// stack.push(1);
/// assert_eq!(stack.pop(), Some(1));
/// assert_eq!(stack.pop(), None);
/// ```
pub struct LockFreeStack<T: Send + Sync + 'static> {
    top: Atomic<Node<T>>,
    size: AtomicUsize,
}

impl<T: Send + Sync + 'static> Default for LockFreeStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> LockFreeStack<T> {
    /// Creates a new empty stack
    ///
    /// Every call produces a fresh, fully independent instance; no state is
    /// shared between stacks.
    pub fn new() -> Self {
        Self {
            top: Atomic::null(),
            size: AtomicUsize::new(0),
        }
    }

    /// Pushes a value onto the stack
    ///
    /// The new node is linked above the currently observed top and published
    /// with a single CAS; if another thread won the race, the link is
    /// refreshed to the newly observed top and the CAS is retried. The
    /// operation always succeeds eventually and never reports an error.
    ///
    /// # Examples
    /// ```
    /// use lockfree_collections::LockFreeStack;
    ///
    /// let stack = LockFreeStack::new();
    /// stack.push("foo");
    /// stack.push("bar");
    /// assert_eq!(stack.pop(), Some("bar"));
    /// ```
    pub fn push(&self, value: T) {
        let guard = epoch::pin();
        let mut node = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        });

        let backoff = Backoff::new();
        loop {
            let top = self.top.load(Ordering::Relaxed, &guard);
            node.next.store(top, Ordering::Relaxed);

            match self
                .top
                .compare_exchange(top, node, Ordering::Release, Ordering::Relaxed, &guard)
            {
                Ok(_) => {
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    // CAS failed: take the node back and retry against the new top.
                    node = e.new;
                    backoff.spin();
                    if backoff.is_completed() {
                        thread::yield_now();
                    }
                }
            }
        }
    }

    /// Removes and returns the top element from the stack
    ///
    /// Returns `None` if the stack was observed empty. The winning CAS is the
    /// single point where ownership of the value transfers to the caller; the
    /// unlinked node is retired to the epoch collector.
    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let top = self.top.load(Ordering::Acquire, &guard);
            match unsafe { top.as_ref() } {
                Some(node) => {
                    let next = node.next.load(Ordering::Acquire, &guard);
                    if self
                        .top
                        .compare_exchange(top, next, Ordering::AcqRel, Ordering::Acquire, &guard)
                        .is_ok()
                    {
                        self.size.fetch_sub(1, Ordering::Relaxed);
                        unsafe {
                            guard.defer_destroy(top);
                            return Some(node.value.assume_init_read());
                        }
                    }
                    backoff.spin();
                    if backoff.is_completed() {
                        thread::yield_now();
                    }
                }
                None => return None,
            }
        }
    }

    /// Returns a copy of the top element without removing it
    ///
    /// Returns `None` if the stack was observed empty. The result is a
    /// snapshot: under concurrent mutation the top may change immediately
    /// after this call returns.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = epoch::pin();
        let top = self.top.load(Ordering::Acquire, &guard);
        unsafe { top.as_ref() }.map(|node| unsafe { node.value.assume_init_ref() }.clone())
    }

    /// Returns true if the stack is empty
    ///
    /// True iff no node is currently linked as the top. The observation is a
    /// snapshot and may be stale immediately after return under concurrent
    /// mutation.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.top.load(Ordering::Acquire, &guard).is_null()
    }

    /// Returns the current size of the stack
    ///
    /// Note: Due to concurrent operations, the size may change
    /// immediately after this call returns.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Walks the chain from the current top, yielding each value in
    /// top-to-bottom order. Quiescent use only: a concurrent pop may move a
    /// yielded value out while the walk is still borrowing it.
    fn iter<'g>(&self, guard: &'g Guard) -> Iter<'g, T> {
        Iter {
            current: self.top.load(Ordering::Acquire, guard),
            guard,
        }
    }
}

struct Iter<'g, T> {
    current: Shared<'g, Node<T>>,
    guard: &'g Guard,
}

impl<'g, T> Iterator for Iter<'g, T> {
    type Item = &'g T;

    fn next(&mut self) -> Option<&'g T> {
        let node = unsafe { self.current.as_ref() }?;
        self.current = node.next.load(Ordering::Acquire, self.guard);
        Some(unsafe { node.value.assume_init_ref() })
    }
}

/// Renders the current contents top-to-bottom, e.g. `[3, 2, 1]`.
///
/// Meaningful when the stack is quiescent; intended for test assertions and
/// diagnostics, not for coordination between threads.
impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for LockFreeStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        f.debug_list().entries(self.iter(&guard)).finish()
    }
}

/// Structural equality over the current element sequence, top-to-bottom.
impl<T: PartialEq + Send + Sync + 'static> PartialEq for LockFreeStack<T> {
    fn eq(&self, other: &Self) -> bool {
        let guard = epoch::pin();
        self.iter(&guard).eq(other.iter(&guard))
    }
}

impl<T: Eq + Send + Sync + 'static> Eq for LockFreeStack<T> {}

/// Hashes the current element sequence, top-to-bottom.
impl<T: Hash + Send + Sync + 'static> Hash for LockFreeStack<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let guard = epoch::pin();
        for value in self.iter(&guard) {
            value.hash(state);
        }
    }
}

impl<T: Send + Sync + 'static> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        // &mut self: no other thread can hold a guard into this stack.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.top.load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let node = current.into_owned();
                current = node.next.load(Ordering::Relaxed, guard);
                drop(node.value.assume_init_read());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stack_basic_operations() {
        let stack = LockFreeStack::new();
        assert!(stack.is_empty());

        stack.push(1);
        stack.push(2);
        stack.push(3);

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.pop(), Some(3));
        assert_eq!(stack.pop(), Some(2));
        assert_eq!(stack.pop(), Some(1));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_lifo_order() {
        let stack = LockFreeStack::new();

        for i in 1..=100 {
            stack.push(i);
        }
        for i in (1..=100).rev() {
            assert_eq!(stack.pop(), Some(i), "LIFO order violated");
        }
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_peek_scenario() {
        let stack = LockFreeStack::new();

        stack.push("foo");
        stack.push("bar");

        assert_eq!(stack.peek(), Some("bar"));
        assert_eq!(stack.pop(), Some("bar"));
        assert_eq!(stack.peek(), Some("foo"));
        assert_eq!(stack.pop(), Some("foo"));
        assert_eq!(stack.peek(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_emptiness_is_idempotent() {
        let stack: LockFreeStack<u32> = LockFreeStack::new();

        // Repeated observation without mutation must not change the answer.
        for _ in 0..10 {
            assert!(stack.is_empty());
            assert_eq!(stack.peek(), None);
        }

        stack.push(7);
        for _ in 0..10 {
            assert!(!stack.is_empty());
            assert_eq!(stack.peek(), Some(7));
        }

        assert_eq!(stack.pop(), Some(7));
        assert!(stack.is_empty());
    }

    #[test]
    fn test_stored_absent_value_is_not_emptiness() {
        // An element that is itself `None` must stay distinct from the
        // empty-stack result.
        let stack: LockFreeStack<Option<i32>> = LockFreeStack::new();

        stack.push(None);
        assert!(!stack.is_empty());
        assert_eq!(stack.peek(), Some(None));
        assert_eq!(stack.pop(), Some(None));
        assert_eq!(stack.pop(), None);
    }

    #[test]
    fn test_debug_rendering() {
        let stack = LockFreeStack::new();
        assert_eq!(format!("{:?}", stack), "[]");

        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(format!("{:?}", stack), "[3, 2, 1]");
    }

    #[test]
    fn test_sequence_equality_and_hash() {
        let a = LockFreeStack::new();
        let b = LockFreeStack::new();
        assert_eq!(a, b);

        a.push(1);
        a.push(2);
        b.push(1);
        assert_ne!(a, b);

        b.push(2);
        assert_eq!(a, b);

        let hash = |s: &LockFreeStack<i32>| {
            let mut h = DefaultHasher::new();
            s.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));

        b.pop();
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_no_loss_no_duplication() {
        let stack = Arc::new(LockFreeStack::new());
        let num_producers = 4;
        let num_consumers = 4;
        let items_per_producer = 1000;
        let total_items = num_producers * items_per_producer;

        let mut handles = vec![];
        for i in 0..num_producers {
            let stack = Arc::clone(&stack);
            handles.push(thread::spawn(move || {
                for j in 0..items_per_producer {
                    stack.push(i * items_per_producer + j);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Drain concurrently until every consumer observes empty.
        let mut consumers = vec![];
        for _ in 0..num_consumers {
            let stack = Arc::clone(&stack);
            consumers.push(thread::spawn(move || {
                let mut received = Vec::new();
                while let Some(value) = stack.pop() {
                    received.push(value);
                }
                received
            }));
        }

        let mut all_received = Vec::new();
        for handle in consumers {
            all_received.extend(handle.join().unwrap());
        }

        all_received.sort_unstable();
        let expected: Vec<_> = (0..total_items).collect();
        assert_eq!(all_received, expected, "values lost or duplicated");
        assert!(stack.is_empty());
    }

    #[test]
    fn test_concurrent_mixed_operations() {
        let stack = Arc::new(LockFreeStack::new());
        let mut handles = vec![];

        for i in 0..8 {
            let stack = Arc::clone(&stack);
            handles.push(thread::spawn(move || {
                for j in 0..500 {
                    if j % 2 == 0 {
                        stack.push(i * 500 + j);
                    } else {
                        stack.pop();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Whatever remains must still pop cleanly.
        while stack.pop().is_some() {}
        assert!(stack.is_empty());
    }

    #[test]
    fn test_drop_releases_remaining_values() {
        let tracker = Arc::new(());
        let stack = LockFreeStack::new();

        for _ in 0..100 {
            stack.push(Arc::clone(&tracker));
        }
        // Pop a few so both the popped and the still-linked paths run.
        for _ in 0..10 {
            assert!(stack.pop().is_some());
        }

        drop(stack);
        assert_eq!(Arc::strong_count(&tracker), 1, "values leaked or double-freed");
    }
}
