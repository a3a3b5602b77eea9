use std::time::Duration;

use serde::Serialize;
use web_time::Instant;

use reprise_core::{Cache, ListId, RemovalLevel};

/// Pass-rate overlay. Fed once per pass by [`Inspector::record_pass`].
pub struct Hud {
    pub inspector_enabled: bool,
    pass_count: u64,
    last_pass: Option<Instant>,
    passes_per_sec: f32,
    pub metrics: Option<Metrics>,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

impl Hud {
    pub fn new() -> Self {
        Self {
            inspector_enabled: false,
            pass_count: 0,
            last_pass: None,
            passes_per_sec: 0.0,
            metrics: None,
        }
    }

    pub fn toggle_inspector(&mut self) {
        self.inspector_enabled = !self.inspector_enabled;
    }

    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    pub fn passes_per_sec(&self) -> f32 {
        self.passes_per_sec
    }

    fn tick(&mut self, now: Instant) {
        self.pass_count += 1;
        if let Some(prev) = self.last_pass.replace(now) {
            let dt = (now - prev).as_secs_f32();
            if dt > 0.0 {
                let rate = 1.0 / dt;
                // simple EMA
                let a = 0.2;
                self.passes_per_sec = if self.passes_per_sec == 0.0 {
                    rate
                } else {
                    (1.0 - a) * self.passes_per_sec + a * rate
                };
            }
        }
    }

    pub fn overlay_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("pass: {}", self.pass_count),
            format!("passes/s: {:.1}", self.passes_per_sec),
        ];
        if let Some(m) = &self.metrics {
            lines.push(format!("pass time: {:.2} ms", m.pass_ms));
            lines.push(format!("blocks: {}", m.live_blocks));
            if m.detached_blocks > 0 {
                lines.push(format!("detached: {}", m.detached_blocks));
            }
        }
        lines
    }

    pub fn overlay(&self) -> String {
        self.overlay_lines().join("  |  ")
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Metrics {
    pub pass_ms: f32,
    pub live_blocks: usize,
    pub detached_blocks: usize,
}

/// One block of the tree, flattened.
#[derive(Clone, Debug, Serialize)]
pub struct NodeSnapshot {
    pub id: String,
    pub depth: usize,
    pub kind: String,
    pub removal: String,
    pub reachable: bool,
    pub key: Option<String>,
    /// Tag labels of the block's slots, in address order.
    pub slots: Vec<String>,
    pub last_cursor: usize,
    pub teardowns: usize,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct TreeSnapshot {
    pub pass: u64,
    pub nodes: Vec<NodeSnapshot>,
}

impl TreeSnapshot {
    pub fn detached(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.removal == RemovalLevel::Detached.to_string())
            .count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

pub struct Inspector {
    pub hud: Hud,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self { hud: Hud::new() }
    }

    /// Walks the tree from the root in pre-order. Keyed children follow the
    /// slotted ones, in key order.
    pub fn snapshot(&self, cache: &Cache) -> TreeSnapshot {
        let mut nodes = Vec::new();
        let mut work: Vec<(ListId, usize)> = vec![(cache.root(), 0)];
        while let Some((id, depth)) = work.pop() {
            let Some(list) = cache.list(id) else {
                continue;
            };
            let children: Vec<ListId> = list
                .entries()
                .iter()
                .filter_map(|e| e.child())
                .chain(list.keyed_children().map(|(_, c)| c))
                .collect();
            work.extend(children.into_iter().rev().map(|c| (c, depth + 1)));

            nodes.push(NodeSnapshot {
                id: format!("{id:?}"),
                depth,
                kind: list.kind().to_string(),
                removal: list.removal_level().to_string(),
                reachable: list.is_reachable(),
                key: list.key().map(|k| k.to_string()),
                slots: list.entries().iter().map(|e| e.tag().to_string()).collect(),
                last_cursor: list.last_cursor(),
                teardowns: list.teardown_count(),
            });
        }
        TreeSnapshot {
            pass: cache.pass_count(),
            nodes,
        }
    }

    /// Call after each pass with the instant it started.
    pub fn record_pass(&mut self, cache: &Cache, started: Instant) {
        let now = Instant::now();
        self.hud.tick(now);
        let elapsed = now.checked_duration_since(started).unwrap_or(Duration::ZERO);
        let detached_blocks = if self.hud.inspector_enabled {
            self.snapshot(cache).detached()
        } else {
            0
        };
        self.hud.metrics = Some(Metrics {
            pass_ms: elapsed.as_secs_f32() * 1000.0,
            live_blocks: cache.live_blocks(),
            detached_blocks,
        });
        log::trace!("pass {} took {:?}", cache.pass_count(), elapsed);
    }

    /// The HUD line, when the inspector is enabled.
    pub fn frame(&self) -> Option<String> {
        self.hud.inspector_enabled.then(|| self.hud.overlay())
    }
}
