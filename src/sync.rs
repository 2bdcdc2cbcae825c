//! Mutexes that know their place in the runtime's lock hierarchy.
//!
//! Every shared structure that plugin threads can reach sits behind an
//! [OrderedMutex] tagged with a [LockLevel]. A thread may only acquire a lock
//! whose level is strictly above every lock it already holds, so the order
//! children, keymap, plugins, terminal state, screen, pty is fixed. Taking
//! locks in any other order is a bug and panics immediately instead of
//! deadlocking some time later.

use std::cell::RefCell;
use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockLevel {
    /// Table of terminal/child pairings.
    Children,
    Keymap,
    /// The plugin stack and its callback tables.
    Plugins,
    /// One terminal's vt100 state. Always taken before [LockLevel::Screen].
    TermState,
    /// The physical screen, window layout and every terminal window.
    Screen,
    /// Leaf lock around a pty's writer and control handles. Held for a single
    /// write or resize only.
    Pty,
}

thread_local! {
    static HELD: RefCell<Vec<LockLevel>> = RefCell::new(Vec::new());
}

/// The highest level the current thread holds, if any.
pub fn highest_held() -> Option<LockLevel> {
    HELD.with(|held| held.borrow().iter().max().copied())
}

fn enter(level: LockLevel) {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(highest) = held.iter().max() {
            if *highest >= level {
                panic!("lock order violation: acquiring {level:?} while holding {highest:?}");
            }
        }
        held.push(level);
    });
}

fn leave(level: LockLevel) {
    HELD.with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|l| *l == level) {
            held.remove(pos);
        }
    });
}

pub struct OrderedMutex<T> {
    level: LockLevel,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub fn new(level: LockLevel, value: T) -> Self {
        Self {
            level,
            inner: Mutex::new(value),
        }
    }

    pub fn level(&self) -> LockLevel {
        self.level
    }

    pub fn lock(&self) -> OrderedGuard<'_, T> {
        enter(self.level);
        OrderedGuard {
            level: self.level,
            guard: self.inner.lock(),
        }
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: fmt::Debug> fmt::Debug for OrderedMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedMutex")
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

pub struct OrderedGuard<'a, T> {
    level: LockLevel,
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        leave(self.level);
    }
}

#[cfg(test)]
mod test {
    use super::{highest_held, LockLevel, OrderedMutex};

    #[test]
    fn in_order_acquisition_is_allowed() {
        let keymap = OrderedMutex::new(LockLevel::Keymap, 1);
        let screen = OrderedMutex::new(LockLevel::Screen, 2);
        let a = keymap.lock();
        let b = screen.lock();
        assert_eq!(*a + *b, 3);
        assert_eq!(highest_held(), Some(LockLevel::Screen));
        drop(b);
        assert_eq!(highest_held(), Some(LockLevel::Keymap));
        drop(a);
        assert_eq!(highest_held(), None);
    }

    #[test]
    fn guards_may_drop_out_of_order() {
        let plugins = OrderedMutex::new(LockLevel::Plugins, ());
        let term = OrderedMutex::new(LockLevel::TermState, ());
        let a = plugins.lock();
        let b = term.lock();
        drop(a);
        assert_eq!(highest_held(), Some(LockLevel::TermState));
        drop(b);
        assert_eq!(highest_held(), None);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn reverse_order_panics() {
        let children = OrderedMutex::new(LockLevel::Children, ());
        let screen = OrderedMutex::new(LockLevel::Screen, ());
        let _screen = screen.lock();
        let _children = children.lock();
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn same_level_twice_panics() {
        let a = OrderedMutex::new(LockLevel::TermState, ());
        let b = OrderedMutex::new(LockLevel::TermState, ());
        let _a = a.lock();
        let _b = b.lock();
    }

    #[test]
    fn levels_are_tracked_per_thread() {
        let screen = std::sync::Arc::new(OrderedMutex::new(LockLevel::Screen, 0));
        let _held = screen.lock();
        let handle = std::thread::spawn(highest_held);
        assert_eq!(handle.join().unwrap(), None);
    }
}
