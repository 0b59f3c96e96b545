use crate::config::schema::TablesConfig;
use serde::Deserialize;
use std::sync::Arc;

/// One row of a show table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AnimationStep {
    /// Time to stay on this row.
    pub duration_ms: u32,
    pub light: u8,
    pub audio: u8,
    pub motor: u8,
}

impl AnimationStep {
    pub const fn new(duration_ms: u32, light: u8, audio: u8, motor: u8) -> Self {
        Self {
            duration_ms,
            light,
            audio,
            motor,
        }
    }
}

/// Which table the orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Idle,
    Local,
    Remote,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Local => "local",
            Self::Remote => "remote",
        })
    }
}

/// An immutable, ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowTable {
    kind: TableKind,
    steps: Arc<[AnimationStep]>,
}

impl ShowTable {
    pub fn new(kind: TableKind, steps: &[AnimationStep]) -> Self {
        Self {
            kind,
            steps: steps.into(),
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&AnimationStep> {
        self.steps.get(index)
    }
}

/// The three tables the orchestrator chooses from.
#[derive(Debug, Clone)]
pub struct TableSet {
    pub idle: ShowTable,
    pub local: ShowTable,
    pub remote: ShowTable,
}

impl TableSet {
    pub fn from_config(config: &TablesConfig) -> Self {
        Self {
            idle: ShowTable::new(TableKind::Idle, &config.idle),
            local: ShowTable::new(TableKind::Local, &config.local),
            remote: ShowTable::new(TableKind::Remote, &config.remote),
        }
    }

    pub fn get(&self, kind: TableKind) -> &ShowTable {
        match kind {
            TableKind::Idle => &self.idle,
            TableKind::Local => &self.local,
            TableKind::Remote => &self.remote,
        }
    }
}

impl Default for TableSet {
    fn default() -> Self {
        Self::from_config(&TablesConfig::default())
    }
}

// Light: 0 blank, 1 candy cane, 2 flames, 3 bounce, 4 lightning.
// Motor: 0 home, 1 jiggle, 2 hammer. Audio values are track numbers.

pub fn default_idle() -> Vec<AnimationStep> {
    vec![
        AnimationStep::new(10_000, 1, 0, 0),
        AnimationStep::new(5_000, 2, 1, 1),
    ]
}

pub fn default_local() -> Vec<AnimationStep> {
    vec![
        AnimationStep::new(3_000, 4, 2, 2),
        AnimationStep::new(2_000, 3, 3, 1),
    ]
}

pub fn default_remote() -> Vec<AnimationStep> {
    vec![AnimationStep::new(4_000, 2, 4, 1)]
}
