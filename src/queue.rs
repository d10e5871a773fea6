//! Outbound event queue shared between the caller and the transport
//!
//! The caller owns the [`WaitingList`] and pushes events onto it; the transport
//! drains it on each tick while the sender link is open.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use crate::message::{ConfirmationResult, Message};

type ConfirmationCallback = Box<dyn FnOnce(ConfirmationResult)>;

/// A queued event and the callback that receives its confirmation
pub struct EventItem {
    message: Message,
    callback: Option<ConfirmationCallback>,
}

impl EventItem {
    /// Event without a confirmation callback
    pub fn new(message: Message) -> Self {
        EventItem {
            message,
            callback: None,
        }
    }

    /// Event whose confirmation is handed to `callback` exactly once
    pub fn with_callback<F>(message: Message, callback: F) -> Self
    where
        F: FnOnce(ConfirmationResult) + 'static,
    {
        EventItem {
            message,
            callback: Some(Box::new(callback)),
        }
    }

    ///
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consume the item, reporting `result` to its callback
    pub fn confirm(self, result: ConfirmationResult) {
        if let Some(callback) = self.callback {
            callback(result);
        }
    }
}

impl fmt::Debug for EventItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventItem")
            .field("message", &self.message)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Caller-owned FIFO of events waiting to be sent
///
/// Cloning yields another handle onto the same list.
#[derive(Clone, Default)]
pub struct WaitingList {
    items: Rc<RefCell<VecDeque<EventItem>>>,
}

impl WaitingList {
    ///
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event to the back of the list
    pub fn push(&self, item: EventItem) {
        self.items.borrow_mut().push_back(item);
    }

    ///
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    ///
    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Whether both handles refer to the same list
    pub fn ptr_eq(&self, other: &WaitingList) -> bool {
        Rc::ptr_eq(&self.items, &other.items)
    }

    /// Remove every queued event, front first
    pub(crate) fn take_all(&self) -> VecDeque<EventItem> {
        std::mem::take(&mut *self.items.borrow_mut())
    }

    /// Put events back at the front, keeping their relative order
    pub(crate) fn requeue_front(&self, returned: impl DoubleEndedIterator<Item = EventItem>) {
        let mut items = self.items.borrow_mut();
        for item in returned.rev() {
            items.push_front(item);
        }
    }
}

impl fmt::Debug for WaitingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingList").field("len", &self.len()).finish()
    }
}
