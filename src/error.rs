// src/error.rs
// Error types shared across the checkpoint, motion and recovery code.

use thiserror::Error;

/// Failures of the byte-addressed persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("access {addr:#06x}+{len} outside of {size}-byte storage")]
    OutOfRange { addr: usize, len: usize, size: usize },
    #[error("write at {addr:#06x} lost, supply collapsed")]
    PowerLost { addr: usize },
    #[error("storage image i/o failed: {0}")]
    Io(String),
    #[error("{len} bytes do not fit a {max}-byte field")]
    TooLong { len: usize, max: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MotionError {
    #[error("planner buffer full")]
    PlannerFull,
    #[error("homing {0} failed, endstop never triggered")]
    HomingFailed(char),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HeatingError {
    #[error("{heater} did not reach {target:.1}C within {timeout_s:.0}s (stuck at {current:.1}C)")]
    Timeout {
        heater: String,
        target: f64,
        current: f64,
        timeout_s: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("no file open")]
    NoFileOpen,
    #[error("path {path} is longer than {max} bytes")]
    PathTooLong { path: String, max: usize },
    #[error("position {pos} is beyond the end of {path} ({size} bytes)")]
    SeekBeyondEnd { path: String, pos: u32, size: u32 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("{command}: missing parameter {param}")]
    MissingParam { command: String, param: char },
    #[error("command queue full")]
    QueueFull,
    #[error("command line too long ({0} bytes)")]
    LineTooLong(usize),
    #[error(transparent)]
    Motion(#[from] MotionError),
    #[error(transparent)]
    Heating(#[from] HeatingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Card(#[from] CardError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RecoveryError {
    #[error("no interrupted print is pending")]
    NothingPending,
    #[error("recovery is not paused, nothing to retry")]
    NotPaused,
    #[error("source file of the interrupted print is unusable: {0}")]
    StaleFile(CardError),
    #[error("heating failed while recovering: {0}")]
    Heating(HeatingError),
    #[error("homing failed while recovering: {0}")]
    Homing(MotionError),
    #[error("recovery command failed: {0}")]
    Command(CommandError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<CommandError> for RecoveryError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Heating(e) => RecoveryError::Heating(e),
            CommandError::Motion(e @ MotionError::HomingFailed(_)) => RecoveryError::Homing(e),
            CommandError::Card(e) => RecoveryError::StaleFile(e),
            CommandError::Storage(e) => RecoveryError::Storage(e),
            other => RecoveryError::Command(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_errors_map_onto_recovery_failures() {
        let heating = CommandError::Heating(HeatingError::Timeout {
            heater: "bed".into(),
            target: 60.0,
            current: 31.0,
            timeout_s: 900.0,
        });
        assert!(matches!(RecoveryError::from(heating), RecoveryError::Heating(_)));

        let homing = CommandError::from(MotionError::HomingFailed('X'));
        assert_eq!(
            RecoveryError::from(homing),
            RecoveryError::Homing(MotionError::HomingFailed('X'))
        );

        let card = CommandError::from(CardError::NotFound("part.gco".into()));
        assert!(matches!(RecoveryError::from(card), RecoveryError::StaleFile(_)));

        let other = CommandError::Unknown("M999".into());
        assert!(matches!(RecoveryError::from(other), RecoveryError::Command(_)));
    }

    #[test]
    fn messages_name_the_failure() {
        let err = StorageError::OutOfRange { addr: 0x0ffe, len: 4, size: 4096 };
        assert_eq!(err.to_string(), "access 0x0ffe+4 outside of 4096-byte storage");
        assert_eq!(MotionError::HomingFailed('Y').to_string(), "homing Y failed, endstop never triggered");
    }
}
