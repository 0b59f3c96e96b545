//! The show orchestrator.
//!
//! Owns the single authoritative show state. Each tick it first applies every
//! pending input, then advances the table state machine, publishing one
//! `Play` per subsystem at the start of each row.

pub mod table;

use crate::bus::{Bus, BusReceiver};
use crate::clock::millis_since;
use crate::event::{
    AudioCmd, AudioMsg, LightCmd, LightMsg, MotorCmd, MotorMsg, NetSend, ShowCmd, ShowInput,
};
use crate::net::protocol::{Command, BROADCAST};
use arc_swap::ArcSwap;
use std::sync::Arc;
use std::time::Duration;
use table::{AnimationStep, ShowTable, TableKind, TableSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowState {
    Disabling,
    Disabled,
    TableStart,
    StepActive,
    StepWait,
}

pub struct Show {
    bus: Bus,
    tables: Arc<ArcSwap<TableSet>>,
    turnaround_ms: u32,

    state: ShowState,
    active: Option<ShowTable>,
    step_index: usize,
    step_start: u32,
    last_local_trigger: Option<u32>,
}

impl Show {
    pub fn new(
        bus: Bus,
        tables: Arc<ArcSwap<TableSet>>,
        turnaround_ms: u32,
        autostart: bool,
    ) -> Self {
        Self {
            bus,
            tables,
            turnaround_ms,
            state: if autostart {
                ShowState::TableStart
            } else {
                ShowState::Disabled
            },
            active: None,
            step_index: 0,
            step_start: 0,
            last_local_trigger: None,
        }
    }

    pub fn state(&self) -> ShowState {
        self.state
    }

    pub fn active_table(&self) -> Option<TableKind> {
        self.active.as_ref().map(ShowTable::kind)
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    fn is_disabled(&self) -> bool {
        matches!(self.state, ShowState::Disabling | ShowState::Disabled)
    }

    fn select(&mut self, kind: TableKind) {
        self.active = Some(self.tables.load().get(kind).clone());
    }

    fn current_step(&self) -> Option<AnimationStep> {
        self.active.as_ref()?.step(self.step_index).copied()
    }

    /// Apply one input. Any accepted table change abandons the current step.
    pub fn handle(&mut self, input: ShowInput, now: u32) {
        match input.cmd {
            ShowCmd::None => {}

            ShowCmd::Start => {
                info!("show start, running idle table");
                self.select(TableKind::Idle);
                self.state = ShowState::TableStart;
            }

            ShowCmd::Stop => {
                info!("show stop");
                self.state = ShowState::Disabling;
            }

            ShowCmd::TriggerLocal => {
                if self.is_disabled() {
                    info!("local trigger ignored, show is disabled");
                    return;
                }
                if let Some(last) = self.last_local_trigger {
                    let since = now.wrapping_sub(last);
                    if since < self.turnaround_ms {
                        info!(
                            "local trigger ignored, {}ms left in turnaround",
                            self.turnaround_ms - since
                        );
                        return;
                    }
                }

                info!("local trigger, running local table");
                self.last_local_trigger = Some(now);
                self.select(TableKind::Local);
                self.bus.net.publish(NetSend {
                    dest: BROADCAST,
                    cmd: Command::TriggerAnim.into(),
                    param: input.param,
                });
                self.state = ShowState::TableStart;
            }

            ShowCmd::TriggerPeer => {
                if self.is_disabled() {
                    info!("peer trigger {} ignored, show is disabled", input.param);
                    return;
                }
                info!("peer trigger {}, running remote table", input.param);
                self.select(TableKind::Remote);
                self.state = ShowState::TableStart;
            }
        }
    }

    /// Advance the state machine. Transitions that need no waiting are chained
    /// within the same tick.
    pub fn tick(&mut self, now: u32) {
        loop {
            match self.state {
                ShowState::Disabling => {
                    self.active = None;
                    self.step_index = 0;
                    self.bus.light.publish(LightMsg::new(LightCmd::Stop, 0));
                    self.bus.audio.publish(AudioMsg::new(AudioCmd::Stop, 0));
                    self.bus.motor.publish(MotorMsg::new(MotorCmd::Stop, 0));
                    info!("show disabled");
                    self.state = ShowState::Disabled;
                }

                ShowState::Disabled => return,

                ShowState::TableStart => {
                    if self.active.is_none() {
                        self.select(TableKind::Idle);
                    }
                    self.step_index = 0;
                    match &self.active {
                        Some(table) if !table.is_empty() => {
                            debug!("starting {} table ({} steps)", table.kind(), table.len());
                            self.state = ShowState::StepActive;
                        }
                        _ => {
                            warn!("selected table has no steps, parking show");
                            self.active = None;
                            self.state = ShowState::Disabled;
                        }
                    }
                }

                ShowState::StepActive => {
                    let Some(step) = self.current_step() else {
                        self.state = ShowState::Disabled;
                        continue;
                    };
                    debug!(
                        "step {}: light {} audio {} motor {} for {}ms",
                        self.step_index, step.light, step.audio, step.motor, step.duration_ms
                    );
                    self.bus.light.publish(LightMsg::new(LightCmd::Play, step.light));
                    self.bus.audio.publish(AudioMsg::new(AudioCmd::Play, step.audio));
                    self.bus.motor.publish(MotorMsg::new(MotorCmd::Play, step.motor));
                    self.step_start = now;
                    self.state = ShowState::StepWait;
                }

                ShowState::StepWait => {
                    let Some(step) = self.current_step() else {
                        self.state = ShowState::Disabled;
                        continue;
                    };
                    if now.wrapping_sub(self.step_start) <= step.duration_ms {
                        return;
                    }

                    self.step_index += 1;
                    let len = self.active.as_ref().map_or(0, ShowTable::len);
                    if self.step_index >= len {
                        // Every table ends back on the idle loop.
                        self.select(TableKind::Idle);
                        self.state = ShowState::TableStart;
                    } else {
                        self.state = ShowState::StepActive;
                    }
                }
            }
        }
    }
}

/// Run the orchestrator until cancelled.
pub async fn run(
    mut show: Show,
    mut inputs: BusReceiver<ShowInput>,
    tick: Duration,
    cancel: CancellationToken,
) {
    let epoch = Instant::now();
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("show task started, {}ms tick", tick.as_millis());

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                info!("show task shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let now = millis_since(epoch);
        for input in inputs.drain() {
            debug!("show input: {:?} param {}", input.cmd, input.param);
            show.handle(input, now);
        }
        show.tick(now);
    }
}
