use std::cell::Cell;
use std::rc::Rc;

use crate::{Cache, Result};

#[derive(Default)]
pub(crate) struct PassState {
    pub(crate) needs_rerender: Cell<bool>,
    pub(crate) is_rendering: Cell<bool>,
}

/// Cloneable request line into a [`Cache`]. Requests made while a pass is
/// running are coalesced into one follow-up pass.
#[derive(Clone)]
pub struct RerenderHandle(Rc<PassState>);

impl RerenderHandle {
    pub(crate) fn new(state: Rc<PassState>) -> Self {
        Self(state)
    }

    pub fn request(&self) {
        if self.0.is_rendering.get() {
            log::trace!("rerender requested mid-pass; coalesced");
        }
        self.0.needs_rerender.set(true);
    }

    pub fn is_pending(&self) -> bool {
        self.0.needs_rerender.get()
    }
}

pub const MAX_PASSES_ENV: &str = "REPRISE_MAX_PASSES";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on passes run by one `tick` while rerenders keep being
    /// requested.
    pub max_passes_per_tick: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes_per_tick: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn max_passes_per_tick(mut self, n: usize) -> Self {
        self.max_passes_per_tick = n.max(1);
        self
    }

    /// Defaults, overridden by `REPRISE_MAX_PASSES` when it parses.
    pub fn from_env() -> Self {
        let config = Self::default();
        match std::env::var(MAX_PASSES_ENV) {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(n) => config.max_passes_per_tick(n),
                Err(e) => {
                    log::warn!("ignoring {MAX_PASSES_ENV}={raw:?}: {e}");
                    config
                }
            },
            Err(_) => config,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    pub passes: usize,
    /// False when the pass limit was hit with a rerender still pending.
    pub settled: bool,
}

/// Drives a [`Cache`]: one `tick` re-runs the root until no further pass is
/// requested.
pub struct Scheduler {
    cache: Cache,
    config: SchedulerConfig,
    ticks: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            cache: Cache::new(),
            config,
            ticks: 0,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut Cache {
        &mut self.cache
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn rerender_handle(&self) -> RerenderHandle {
        self.cache.rerender_handle()
    }

    pub fn tick<F>(&mut self, mut root: F) -> Result<TickStats>
    where
        F: FnMut(&mut Cache) -> Result<()>,
    {
        self.ticks += 1;
        let mut passes = 0;
        loop {
            passes += 1;
            self.cache.run_pass(&mut root)?;
            if !self.cache.needs_rerender() {
                return Ok(TickStats {
                    passes,
                    settled: true,
                });
            }
            if passes >= self.config.max_passes_per_tick {
                log::warn!(
                    "tick {} stopped after {passes} passes with a rerender still pending",
                    self.ticks
                );
                return Ok(TickStats {
                    passes,
                    settled: false,
                });
            }
        }
    }

    /// Destroys the whole tree, running every remaining teardown.
    pub fn dispose(self) {
        drop(self.cache);
    }
}
