// Two-party mutual exclusion over three shared boolean cells.
//
// Only SeqCst loads and stores are used; the algorithm needs the store of
// our own flag to be ordered before the load of the peer's flag, and it
// must not rely on a hardware exchange being available to the peer.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;

use crossbeam_utils::Backoff;

/// Which of the two parties a lock instance acts for.
///
/// The role decides which "want" cell is ours and which value of `turn`
/// favours us. Both parties share the same three cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    #[inline]
    pub fn peer(self) -> Role {
        match self {
            Role::Producer => Role::Consumer,
            Role::Consumer => Role::Producer,
        }
    }

    /// Value of the `turn` cell that gives priority to this role.
    #[inline]
    fn turn_value(self) -> bool {
        matches!(self, Role::Consumer)
    }
}

/// Dekker-style lock for exactly two participants.
///
/// Each party builds its own instance over the same cells; the instance
/// only ever writes its own want flag and reads the peer's.
pub struct TwoPartyLock<'a> {
    mine: &'a AtomicBool,
    theirs: &'a AtomicBool,
    turn: &'a AtomicBool,
    role: Role,
}

impl<'a> TwoPartyLock<'a> {
    /// `producer_wants` / `consumer_wants` are passed in a fixed order; the
    /// role picks which one is ours.
    pub fn new(
        producer_wants: &'a AtomicBool,
        consumer_wants: &'a AtomicBool,
        turn: &'a AtomicBool,
        role: Role,
    ) -> Self {
        let (mine, theirs) = match role {
            Role::Producer => (producer_wants, consumer_wants),
            Role::Consumer => (consumer_wants, producer_wants),
        };
        Self {
            mine,
            theirs,
            turn,
            role,
        }
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    fn our_turn(&self) -> bool {
        self.turn.load(SeqCst) == self.role.turn_value()
    }

    /// Busy-waits until the lock is held. There is no timeout.
    pub fn lock(&self) {
        self.mine.store(true, SeqCst);

        let backoff = Backoff::new();
        while self.theirs.load(SeqCst) {
            if !self.our_turn() {
                self.mine.store(false, SeqCst);
                // A peer that gave up in try_lock never hands the turn over.
                while !self.our_turn() && self.theirs.load(SeqCst) {
                    backoff.snooze();
                }
                self.mine.store(true, SeqCst);
            } else {
                backoff.spin();
            }
        }
    }

    /// Hands the turn to the peer and withdraws our claim.
    pub fn unlock(&self) {
        self.turn.store(self.role.peer().turn_value(), SeqCst);
        self.mine.store(false, SeqCst);
    }

    /// Single attempt. Backs out if the peer currently wants the lock.
    ///
    /// `turn` only arbitrates contention, so an uncontended attempt succeeds
    /// no matter whose turn it is. A contended attempt always backs out, so
    /// yielding on `turn` as well could only turn a success into a retry.
    pub fn try_lock(&self) -> bool {
        self.mine.store(true, SeqCst);

        if self.theirs.load(SeqCst) {
            self.mine.store(false, SeqCst);
            return false;
        }

        true
    }

    pub fn acquire(&self) -> TwoPartyGuard<'_, 'a> {
        self.lock();
        TwoPartyGuard { lock: self }
    }

    pub fn try_acquire(&self) -> Option<TwoPartyGuard<'_, 'a>> {
        self.try_lock().then(|| TwoPartyGuard { lock: self })
    }
}

/// Releases the two-party lock on drop.
pub struct TwoPartyGuard<'l, 'a> {
    lock: &'l TwoPartyLock<'a>,
}

impl Drop for TwoPartyGuard<'_, '_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::UnsafeCell;
    use std::sync::Arc;
    use std::thread;

    struct Cells {
        producer: AtomicBool,
        consumer: AtomicBool,
        turn: AtomicBool,
        counter: UnsafeCell<u64>,
    }

    unsafe impl Sync for Cells {}

    #[test]
    fn roles_swap_cells() {
        let a = AtomicBool::new(false);
        let b = AtomicBool::new(false);
        let turn = AtomicBool::new(false);

        let producer = TwoPartyLock::new(&a, &b, &turn, Role::Producer);
        let consumer = TwoPartyLock::new(&a, &b, &turn, Role::Consumer);

        let guard = producer.acquire();
        assert!(a.load(SeqCst));
        assert!(!b.load(SeqCst));
        assert!(consumer.try_acquire().is_none());
        assert!(!b.load(SeqCst));
        drop(guard);

        assert!(!a.load(SeqCst));
        // Producer handed the turn over on unlock.
        assert!(turn.load(SeqCst));
        assert!(consumer.try_acquire().is_some());
    }

    #[test]
    fn uncontended_try_lock_ignores_turn() {
        let a = AtomicBool::new(false);
        let b = AtomicBool::new(false);
        let turn = AtomicBool::new(false);
        let producer = TwoPartyLock::new(&a, &b, &turn, Role::Producer);

        for _ in 0..3 {
            let guard = producer.try_acquire();
            assert!(guard.is_some());
        }
    }

    #[test]
    fn excludes_the_peer() {
        let cells = Arc::new(Cells {
            producer: AtomicBool::new(false),
            consumer: AtomicBool::new(false),
            turn: AtomicBool::new(false),
            counter: UnsafeCell::new(0),
        });
        let iterations = 20_000u64;

        let handles: Vec<_> = [Role::Producer, Role::Consumer]
            .into_iter()
            .map(|role| {
                let cells = Arc::clone(&cells);
                thread::spawn(move || {
                    let lock =
                        TwoPartyLock::new(&cells.producer, &cells.consumer, &cells.turn, role);
                    for _ in 0..iterations {
                        let _guard = lock.acquire();
                        unsafe {
                            let value = cells.counter.get().read_volatile();
                            cells.counter.get().write_volatile(value + 1);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(unsafe { *cells.counter.get() }, iterations * 2);
    }
}
