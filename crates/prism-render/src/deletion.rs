// SPDX-License-Identifier: CEPL-1.0
//! LIFO teardown registry for device objects.
//!
//! Every GPU object gets its destroy call registered right after it is
//! created. `flush` replays those calls newest-first, so a resource is always
//! released before anything it was built from.

type Teardown = Box<dyn FnOnce()>;

#[derive(Default)]
pub struct DeletionQueue {
    deletors: Vec<Teardown>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, teardown: F)
    where
        F: FnOnce() + 'static,
    {
        self.deletors.push(Box::new(teardown));
    }

    /// Runs every registered action in reverse registration order and empties
    /// the queue. Flushing an empty queue does nothing.
    ///
    /// The caller must make sure the device is idle first.
    pub fn flush(&mut self) {
        while let Some(teardown) = self.deletors.pop() {
            teardown();
        }
    }

    pub fn len(&self) -> usize {
        self.deletors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deletors.is_empty()
    }
}

impl std::fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.deletors.len())
            .finish()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.deletors.is_empty() {
            tracing::warn!(
                "deletion queue dropped with {} pending teardown actions",
                self.deletors.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recording_queue(count: usize) -> (DeletionQueue, Rc<RefCell<Vec<usize>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for i in 0..count {
            let log = Rc::clone(&log);
            queue.register(move || log.borrow_mut().push(i));
        }
        (queue, log)
    }

    #[test]
    fn flush_runs_in_reverse_registration_order() {
        for k in [0usize, 1, 2, 7, 32] {
            let (mut queue, log) = recording_queue(k);
            assert_eq!(queue.len(), k);
            queue.flush();
            let expected: Vec<usize> = (0..k).rev().collect();
            assert_eq!(*log.borrow(), expected);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn second_flush_runs_nothing() {
        let (mut queue, log) = recording_queue(4);
        queue.flush();
        queue.flush();
        assert_eq!(log.borrow().len(), 4);
    }

    #[test]
    fn actions_registered_after_a_flush_run_on_the_next_one() {
        let (mut queue, log) = recording_queue(2);
        queue.flush();
        let late = Rc::clone(&log);
        queue.register(move || late.borrow_mut().push(99));
        queue.flush();
        assert_eq!(*log.borrow(), vec![1, 0, 99]);
    }
}
