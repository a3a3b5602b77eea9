use crate::entry::ListFlags;
use crate::{Cache, EngineError, Result, TypeTag};

/// How a memoized value compares with the one seen at the same call site on
/// the previous pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoResult {
    Unchanged,
    Changed,
    /// No previous value: the call site is new.
    FirstRender,
    /// Same value, but the enclosing block just became reachable again and
    /// anything it gates may have gone stale while hidden.
    FirstRenderConditional,
}

impl MemoResult {
    /// Whether work gated on this value should run.
    pub fn should_run(self) -> bool {
        self != MemoResult::Unchanged
    }

    pub fn is_first(self) -> bool {
        matches!(
            self,
            MemoResult::FirstRender | MemoResult::FirstRenderConditional
        )
    }
}

impl Cache {
    pub fn memo<T: PartialEq + 'static>(&mut self, value: T) -> Result<MemoResult> {
        let tag = TypeTag::memo::<T>();
        let (list, index) = self.next_entry(tag)?;
        let reentering = self.lists[list].flags.contains(ListFlags::REENTERING);
        let entry = self.entry_mut(list, index);

        if entry.is_vacant() {
            entry.set(value);
            return Ok(MemoResult::FirstRender);
        }
        let Some(previous) = entry.get_mut::<T>() else {
            return self.fail(EngineError::PayloadType {
                tag,
                expected: std::any::type_name::<T>(),
            });
        };
        if *previous != value {
            *previous = value;
            Ok(MemoResult::Changed)
        } else if reentering {
            Ok(MemoResult::FirstRenderConditional)
        } else {
            Ok(MemoResult::Unchanged)
        }
    }
}
