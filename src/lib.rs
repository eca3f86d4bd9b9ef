// Print-job checkpoint and power-panic recovery for FDM printer firmware,
// together with the host-side models of the firmware parts it drives.

pub mod accounting;
pub mod cmdqueue;
pub mod config;
pub mod configfile;
pub mod core_traits;
pub mod crash_detect;
pub mod eeprom;
pub mod error;
pub mod failstats;
pub mod gcode;
pub mod hal;
pub mod heaters;
pub mod leveling;
pub mod machine;
pub mod mathutil;
pub mod planner;
pub mod power_panic;
pub mod printer;
pub mod prompt;
pub mod ram_checkpoint;
pub mod recovery;
pub mod sdcard;
pub mod stepper;
pub mod transform;

pub use printer::Printer;
pub use recovery::{RecoveryOrchestrator, RecoveryState};
