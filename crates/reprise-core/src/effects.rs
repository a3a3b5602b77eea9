use std::cell::RefCell;
use std::rc::Rc;

use crate::{Cache, MemoResult, Result};

#[derive(Clone)]
pub struct Dispose(Rc<RefCell<Option<Box<dyn FnOnce()>>>>);

impl Dispose {
    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Self(Rc::new(RefCell::new(Some(Box::new(f)))))
    }

    /// Runs at most once (safe to call multiple times).
    pub fn run(&self) {
        let f = self.0.borrow_mut().take();
        if let Some(f) = f {
            f()
        }
    }
}

/// Helper to build the cleanup returned from an effect.
pub fn on_unmount(f: impl FnOnce() + 'static) -> Dispose {
    Dispose::new(f)
}

impl Cache {
    /// Runs `effect` when `key` changes (or the enclosing block comes back
    /// into view), cleaning up the previous run first. The last cleanup runs
    /// when the enclosing block is destroyed.
    pub fn disposable_effect<K: PartialEq + 'static>(
        &mut self,
        key: K,
        effect: impl FnOnce() -> Dispose,
    ) -> Result<()> {
        let cleanup = self.remember(|| RefCell::new(None::<Dispose>))?;
        let status = self.memo(key)?;

        if status == MemoResult::FirstRender {
            let cleanup = cleanup.clone();
            self.on_teardown(move || {
                if let Some(d) = cleanup.borrow_mut().take() {
                    d.run();
                }
            })?;
        }

        if status.should_run() {
            if let Some(d) = cleanup.borrow_mut().take() {
                d.run();
            }
            let d = effect();
            *cleanup.borrow_mut() = Some(d);
        }
        Ok(())
    }
}
