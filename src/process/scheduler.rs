//! Cooperative run-queue scheduler for lightweight processes.
//!
//! One interpreter thread, no preemption: a process only gives up control
//! at specific opcodes (mailbox receive, explicit yield, `intcheck`,
//! blocking I/O). This scheduler owns only the *ordering* of runnable
//! processes; each process's own call stack and spec blocks live wherever
//! `interp::engine` keeps them, keyed by the process's object identity — no
//! parent links, just a flat queue.

use crate::object::{ObjectRef, ProcessStatus};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct Scheduler {
    run_queue: VecDeque<ObjectRef>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, proc: ObjectRef) {
        self.run_queue.push_back(proc);
    }

    pub fn len(&self) -> usize {
        self.run_queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_queue.is_empty()
    }

    /// Pops the next runnable process in FIFO order. A process blocked on
    /// an empty mailbox is skipped (and re-queued) until its mailbox has a
    /// message waiting.
    pub fn next_runnable(&mut self) -> Option<ObjectRef> {
        let len = self.run_queue.len();
        for _ in 0..len {
            let proc = self.run_queue.pop_front()?;
            let ready = match proc.process.borrow().as_ref() {
                Some(record) => match record.status {
                    ProcessStatus::Runnable => true,
                    ProcessStatus::WaitingOnMailbox => !record.mailbox.is_empty(),
                    ProcessStatus::Terminated => false,
                },
                None => true,
            };
            if ready {
                return Some(proc);
            }
            self.run_queue.push_back(proc);
        }
        None
    }

    /// Re-enqueues a process that voluntarily yielded, hit an `intcheck`
    /// back-edge, or whose receive just blocked.
    pub fn requeue(&mut self, proc: ObjectRef) {
        self.run_queue.push_back(proc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectHeader;
    use crate::process::mailbox::Mailbox;
    use crate::unit::UnitId;
    use crate::value::specifier::Specifier;

    #[test]
    fn runnable_processes_resume_fifo() {
        let mut sched = Scheduler::new();
        let a = ObjectHeader::new_process(UnitId(0), 0, Mailbox::new());
        let b = ObjectHeader::new_process(UnitId(0), 0, Mailbox::new());
        sched.spawn(a.clone());
        sched.spawn(b.clone());
        assert!(std::rc::Rc::ptr_eq(&sched.next_runnable().unwrap(), &a));
        assert!(std::rc::Rc::ptr_eq(&sched.next_runnable().unwrap(), &b));
    }

    #[test]
    fn blocked_process_is_skipped_until_message_arrives() {
        let mut sched = Scheduler::new();
        let mailbox = Mailbox::new();
        let blocked = ObjectHeader::new_process(UnitId(0), 0, mailbox.clone());
        blocked.process.borrow_mut().as_mut().unwrap().status =
            crate::object::ProcessStatus::WaitingOnMailbox;
        let runnable = ObjectHeader::new_process(UnitId(0), 0, Mailbox::new());
        sched.spawn(blocked.clone());
        sched.spawn(runnable.clone());
        assert!(std::rc::Rc::ptr_eq(&sched.next_runnable().unwrap(), &runnable));
        sched.requeue(runnable);
        assert!(sched.next_runnable().is_none());
        mailbox.send(Specifier::int(1));
        assert!(std::rc::Rc::ptr_eq(&sched.next_runnable().unwrap(), &blocked));
    }
}
