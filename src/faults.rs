use std::sync::atomic::{AtomicU32, Ordering};

/// Conditions a task can flag without disturbing anyone else's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Fault {
    ConsoleTask = 0,
    CommandExecTask = 1,
    ShowTask = 2,
    ConfigRestore = 3,
    NetworkTask = 4,
    AudioTask = 5,
    LightTask = 6,
    MotorTask = 7,
    ProxDetectTask = 8,
    TofSensorInit = 9,
    AudioDeviceInit = 10,
}

impl Fault {
    pub const ALL: [Fault; 11] = [
        Fault::ConsoleTask,
        Fault::CommandExecTask,
        Fault::ShowTask,
        Fault::ConfigRestore,
        Fault::NetworkTask,
        Fault::AudioTask,
        Fault::LightTask,
        Fault::MotorTask,
        Fault::ProxDetectTask,
        Fault::TofSensorInit,
        Fault::AudioDeviceInit,
    ];

    fn bit(self) -> u32 {
        1 << self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Fault::ConsoleTask => "CONSOLE_TASK_FAULT",
            Fault::CommandExecTask => "COMMAND_EXEC_TASK_FAULT",
            Fault::ShowTask => "SHOW_TASK_FAULT",
            Fault::ConfigRestore => "CONFIG_RESTORE_FAULT",
            Fault::NetworkTask => "NETWORK_TASK_FAULT",
            Fault::AudioTask => "AUDIO_TASK_FAULT",
            Fault::LightTask => "LIGHT_TASK_FAULT",
            Fault::MotorTask => "MOTOR_TASK_FAULT",
            Fault::ProxDetectTask => "PROX_DETECT_TASK_FAULT",
            Fault::TofSensorInit => "TOF_SENSOR_INIT_FAIL",
            Fault::AudioDeviceInit => "AUDIO_DEVICE_INIT_FAIL",
        }
    }
}

/// Shared fault bitset. Any task may set or clear; readers poll on demand.
#[derive(Debug, Default)]
pub struct FaultRegister {
    bits: AtomicU32,
}

impl FaultRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, fault: Fault) {
        self.bits.fetch_or(fault.bit(), Ordering::AcqRel);
    }

    pub fn clear(&self, fault: Fault) {
        self.bits.fetch_and(!fault.bit(), Ordering::AcqRel);
    }

    pub fn is_active(&self, fault: Fault) -> bool {
        self.bits.load(Ordering::Acquire) & fault.bit() != 0
    }

    pub fn active(&self) -> Vec<Fault> {
        let bits = self.bits.load(Ordering::Acquire);
        Fault::ALL
            .into_iter()
            .filter(|f| bits & f.bit() != 0)
            .collect()
    }

    /// One fault name per line, or "None".
    pub fn report(&self) -> String {
        let active = self.active();
        if active.is_empty() {
            return "None".to_string();
        }
        active
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
