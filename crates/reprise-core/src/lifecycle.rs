use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::entry::{ListFlags, Teardown};
use crate::{Cache, ListId, RemovalLevel};

impl Cache {
    /// Marks `root` and everything under it as detached. Returns false when
    /// `root` was already detached or is gone.
    pub(crate) fn detach_subtree(&mut self, root: ListId) -> bool {
        if self.lists.get(root).is_none_or(|l| l.removal >= RemovalLevel::Detached) {
            return false;
        }
        let mut work = vec![root];
        let mut count = 0usize;
        while let Some(id) = work.pop() {
            let Some(list) = self.lists.get_mut(id) else {
                continue;
            };
            if list.removal >= RemovalLevel::Detached {
                continue;
            }
            list.removal = RemovalLevel::Detached;
            list.flags.remove(ListFlags::REACHABLE | ListFlags::REENTERING);
            list.push_children(&mut work);
            count += 1;
        }
        log::debug!("detached {count} block(s)");
        true
    }

    /// Frees `root` and everything under it, running teardowns children
    /// first. Returns false when `root` is already gone.
    pub(crate) fn destroy_subtree(&mut self, root: ListId) -> bool {
        if !self.lists.contains_key(root) {
            return false;
        }
        let mut order = Vec::new();
        let mut work = vec![root];
        while let Some(id) = work.pop() {
            if let Some(list) = self.lists.get(id) {
                order.push(id);
                list.push_children(&mut work);
            }
        }

        let count = order.len();
        for id in order.into_iter().rev() {
            if let Some(mut list) = self.lists.remove(id) {
                list.removal = RemovalLevel::Destroyed;
                if let Some(teardowns) = list.teardowns.take() {
                    run_teardowns(teardowns);
                }
            }
        }
        log::debug!("destroyed {count} block(s)");
        true
    }
}

fn run_teardowns(teardowns: Vec<Teardown>) {
    for teardown in teardowns {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(teardown)) {
            log::error!("teardown panicked: {}", crate::unwind::panic_message(&*panic));
        }
    }
}
