use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem::MaybeUninit;
use std::sync::atomic::Ordering;

/// A node in the lock-free queue
///
/// The value slot is `MaybeUninit`: the permanent sentinel cell holds no
/// value at all, and a dequeued cell's value has been moved out by the time
/// the cell is reclaimed.
struct Node<T> {
    value: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

/// A lock-free FIFO queue using epoch-based memory reclamation
///
/// This is the dummy-head Michael-Scott linked queue: `head` always
/// references a sentinel cell whose successor chain holds the live elements,
/// and `tail` references the sentinel or a cell at (or near) the end of that
/// chain. Enqueueing links the new cell after the observed tail and then
/// swings `tail` forward; a thread that observes a lagging `tail` helps
/// advance it before retrying. Dequeueing swings `head` from the sentinel to
/// its successor, retires the old sentinel, and takes the successor's value.
///
/// The queue is unbounded, never blocks, and never reports an error;
/// contention only causes retries.
///
/// # Type Parameters
///
/// * `T`: The type of elements in the queue. Must be Send + Sync for thread-safety
pub struct LockFreeQueue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

impl<T: Send + Sync + 'static> LockFreeQueue<T> {
    /// Creates a new empty queue.
    ///
    /// Every call produces a fresh, fully independent instance.
    ///
    /// # Examples
    /// ```
    /// use lockfree_collections::queue::LockFreeQueue;
    /// let queue: LockFreeQueue<i32> = LockFreeQueue::new();
    /// assert!(queue.is_empty());
    /// ```
    pub fn new() -> Self {
        let sentinel = Owned::new(Node {
            value: MaybeUninit::uninit(),
            next: Atomic::null(),
        });
        let sentinel = sentinel.into_shared(unsafe { epoch::unprotected() });
        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
        }
    }

    /// Adds a value to the back of the queue.
    ///
    /// Always succeeds; there is no capacity bound.
    ///
    /// # Examples
    /// ```
    /// use lockfree_collections::LockFreeQueue;
    /// let queue = LockFreeQueue::new();
    /// queue.add(42);
    /// assert!(!queue.is_empty());
    /// ```
    pub fn add(&self, value: T) {
        let guard = epoch::pin();
        let new_node = Owned::new(Node {
            value: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(&guard);

        let backoff = Backoff::new();
        loop {
            // The sentinel guarantees tail is never null.
            let tail = self.tail.load(Ordering::Acquire, &guard);
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);

            if next.is_null() {
                match tail_ref.next.compare_exchange(
                    Shared::null(),
                    new_node,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                ) {
                    Ok(_) => {
                        // Linked; swing tail to the new cell. Losing this CAS
                        // means another thread already helped.
                        let _ = self.tail.compare_exchange(
                            tail,
                            new_node,
                            Ordering::Release,
                            Ordering::Relaxed,
                            &guard,
                        );
                        return;
                    }
                    Err(_) => backoff.spin(),
                }
            } else {
                // Tail lags behind the last cell; help advance it.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
            }
        }
    }

    /// Removes and returns the value at the front of the queue.
    ///
    /// Returns `None` if the queue was observed empty.
    ///
    /// # Examples
    /// ```
    /// use lockfree_collections::LockFreeQueue;
    /// let queue = LockFreeQueue::new();
    /// queue.add(42);
    /// assert_eq!(queue.get(), Some(42));
    /// assert_eq!(queue.get(), None);
    /// ```
    pub fn get(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, &guard);

            if next.is_null() {
                return None;
            }

            // Tail must never be left referencing the cell we retire, so if
            // it still points at the sentinel, advance it first.
            let tail = self.tail.load(Ordering::Acquire, &guard);
            if head == tail {
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, &guard)
                .is_ok()
            {
                unsafe {
                    // The old sentinel is unlinked; the successor becomes the
                    // new sentinel and gives up its value exactly once, to
                    // the thread that won the CAS.
                    guard.defer_destroy(head);
                    return Some(next.deref().value.assume_init_read());
                }
            }
            backoff.spin();
        }
    }

    /// Returns true if the queue is empty.
    ///
    /// True iff the sentinel currently has no successor, i.e. the queue
    /// holds no elements. The observation is a snapshot and may be stale
    /// immediately after return under concurrent mutation.
    ///
    /// # Examples
    /// ```
    /// use lockfree_collections::LockFreeQueue;
    /// let queue: LockFreeQueue<i32> = LockFreeQueue::new();
    /// assert!(queue.is_empty());
    /// queue.add(42);
    /// assert!(!queue.is_empty());
    /// ```
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Acquire, &guard);
        unsafe { head.deref() }
            .next
            .load(Ordering::Acquire, &guard)
            .is_null()
    }

    /// Walks the live cells front-to-back. Quiescent use only.
    fn iter<'g>(&self, guard: &'g Guard) -> Iter<'g, T> {
        let head = self.head.load(Ordering::Acquire, guard);
        Iter {
            current: unsafe { head.deref() }.next.load(Ordering::Acquire, guard),
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

impl<T: Send + Sync + 'static> Default for LockFreeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders the current contents front-to-back, e.g. `[1, 2, 3]`.
///
/// Meaningful when the queue is quiescent; intended for test assertions and
/// diagnostics.
impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for LockFreeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = epoch::pin();
        f.debug_list().entries(self.iter(&guard)).finish()
    }
}

/// Structural equality over the current element sequence, front-to-back.
impl<T: PartialEq + Send + Sync + 'static> PartialEq for LockFreeQueue<T> {
    fn eq(&self, other: &Self) -> bool {
        let guard = epoch::pin();
        self.iter(&guard).eq(other.iter(&guard))
    }
}

impl<T: Eq + Send + Sync + 'static> Eq for LockFreeQueue<T> {}

/// Hashes the current element sequence, front-to-back.
impl<T: Hash + Send + Sync + 'static> Hash for LockFreeQueue<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let guard = epoch::pin();
        for value in self.iter(&guard) {
            value.hash(state);
        }
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // &mut self: no other thread can hold a guard into this queue.
        unsafe {
            let guard = epoch::unprotected();
            let sentinel = self.head.load(Ordering::Relaxed, guard);
            let mut current = sentinel.deref().next.load(Ordering::Relaxed, guard);
            // The sentinel never owns a value.
            drop(sentinel.into_owned());
            while !current.is_null() {
                let node = current.into_owned();
                current = node.next.load(Ordering::Relaxed, guard);
                drop(node.value.assume_init_read());
            }
        }
    }
}
