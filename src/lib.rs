#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::ignored_unit_patterns
)]

pub mod bus;
pub mod clock;
pub mod config;
pub mod console;
pub mod daemon;
pub mod detector;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod event;
pub mod faults;
pub mod net;
pub mod settings;
pub mod show;
