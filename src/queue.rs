//! Fixed-capacity FIFO of deferred start/stop requests.
//!
//! The queue itself is not synchronised; the scheduler wraps every `push`
//! and `pop` in its critical section so each hold is O(1).

use crate::errors::TimerError;
use crate::timer::TimerId;

/// What a queued command asks the dispatcher to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Arm the timer at `now + period` and insert it into the active list.
    Start,
    /// Remove the timer from the active list.
    Stop,
}

/// A deferred mutation request, applied exactly once by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Target timer, checked against its generation when applied.
    pub timer: TimerId,
    /// Requested transition.
    pub kind: CommandKind,
}

/// Ring buffer with `N` slots, one of which is always left free.
///
/// `head == tail` is empty and `head + 1 == tail` (mod `N`) is full, so at
/// most `N - 1` commands are pending.
#[derive(Debug)]
pub struct CommandQueue<const N: usize> {
    slots: [Option<Command>; N],
    head: usize,
    tail: usize,
}

impl<const N: usize> CommandQueue<N> {
    const VALID_CAPACITY: () = assert!(
        N >= 2 && N.is_power_of_two(),
        "command queue capacity must be a power of two >= 2"
    );

    /// Creates an empty queue.
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        CommandQueue {
            slots: [None; N],
            head: 0,
            tail: 0,
        }
    }

    /// Number of commands the queue can hold at once.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Commands currently queued.
    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) & (N - 1)
    }

    /// No commands are waiting.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// The next `push` would fail with `QueueFull`.
    pub fn is_full(&self) -> bool {
        (self.head + 1) & (N - 1) == self.tail
    }

    /// Appends a command, or fails without side effects when full.
    pub fn push(&mut self, command: Command) -> Result<(), TimerError> {
        let next = (self.head + 1) & (N - 1);
        if next == self.tail {
            return Err(TimerError::QueueFull);
        }
        self.slots[self.head] = Some(command);
        self.head = next;
        Ok(())
    }

    /// Removes and returns the oldest command.
    pub fn pop(&mut self) -> Option<Command> {
        if self.is_empty() {
            return None;
        }
        let command = self.slots[self.tail].take();
        self.tail = (self.tail + 1) & (N - 1);
        command
    }
}

impl<const N: usize> Default for CommandQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}
