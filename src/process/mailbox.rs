//! Mailboxes for lightweight-process message passing: messages to a given
//! mailbox are delivered in send order, sending is non-blocking, and
//! receiving is restricted to the owner.

use crate::value::specifier::Specifier;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Default)]
pub struct Mailbox {
    queue: RefCell<VecDeque<Specifier>>,
}

pub type MailboxRef = Rc<Mailbox>;

impl Mailbox {
    pub fn new() -> MailboxRef {
        Rc::new(Mailbox::default())
    }

    /// Non-blocking: any process holding a reference to this mailbox may
    /// send.
    pub fn send(&self, message: Specifier) {
        self.queue.borrow_mut().push_back(message);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// FIFO receive. Returns `None` if the mailbox is empty — callers
    /// (the scheduler) are responsible for suspending the process and
    /// retrying once a message has been delivered.
    pub fn try_receive(&self) -> Option<Specifier> {
        self.queue.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }
}
