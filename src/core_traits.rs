// src/core_traits.rs
// Narrow contracts between the checkpoint core and the firmware parts it
// drives. Each collaborator is implemented by a concrete simulated component
// (planner, command queue, EEPROM, mesh, heaters, prompt) and tests swap in
// their own where useful.

use crate::cmdqueue::CommandOrigin;
use crate::error::{CommandError, HeatingError, StorageError};
use crate::machine::Axis;

// --- MotionPlanner Trait ---
/// The part of the look-ahead planner the checkpoint code needs.
pub trait MotionPlanner {
    /// Drops every queued block. Motion stops where the steppers are.
    fn abort_and_drain(&mut self);
    /// Source-file bytes carried by each queued block, oldest first.
    fn queued_block_lengths(&self) -> impl Iterator<Item = u16> + '_;
    /// Nominal speed (mm/s) of the block currently executing, if any.
    fn front_block_nominal_speed(&self) -> Option<f32>;
}

// --- CommandQueue Trait ---
pub trait CommandQueue {
    /// Origin and source length of every queued command, oldest first.
    fn pending_entries(&self) -> impl Iterator<Item = (CommandOrigin, u16)> + '_;
    fn reset(&mut self);
    /// Queues `line` ahead of everything else.
    fn push_front(&mut self, line: &str, origin: CommandOrigin) -> Result<(), CommandError>;
}

// --- PersistentStorage Trait ---
/// Byte-addressed non-volatile memory. Writes land in the order they are
/// issued; a write that returns an error may have stored a prefix of its
/// bytes.
pub trait PersistentStorage {
    fn size(&self) -> usize;
    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), StorageError>;

    /// Writes only the bytes that differ, keeping cell wear down.
    fn update(&mut self, addr: usize, data: &[u8]) -> Result<(), StorageError> {
        if addr.checked_add(data.len()).map_or(true, |end| end > self.size()) {
            return Err(StorageError::OutOfRange {
                addr,
                len: data.len(),
                size: self.size(),
            });
        }
        for (i, &new) in data.iter().enumerate() {
            if self.read_u8(addr + i)? != new {
                self.write(addr + i, &[new])?;
            }
        }
        Ok(())
    }

    fn read_u8(&self, addr: usize) -> Result<u8, StorageError> {
        let mut buf = [0u8; 1];
        self.read(addr, &mut buf)?;
        Ok(buf[0])
    }

    fn read_u16(&self, addr: usize) -> Result<u16, StorageError> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    fn read_i16(&self, addr: usize) -> Result<i16, StorageError> {
        let mut buf = [0u8; 2];
        self.read(addr, &mut buf)?;
        Ok(i16::from_le_bytes(buf))
    }

    fn read_u32(&self, addr: usize) -> Result<u32, StorageError> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_f32(&self, addr: usize) -> Result<f32, StorageError> {
        let mut buf = [0u8; 4];
        self.read(addr, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn update_u8(&mut self, addr: usize, value: u8) -> Result<(), StorageError> {
        self.update(addr, &[value])
    }

    fn update_u16(&mut self, addr: usize, value: u16) -> Result<(), StorageError> {
        self.update(addr, &value.to_le_bytes())
    }

    fn update_i16(&mut self, addr: usize, value: i16) -> Result<(), StorageError> {
        self.update(addr, &value.to_le_bytes())
    }

    fn update_u32(&mut self, addr: usize, value: u32) -> Result<(), StorageError> {
        self.update(addr, &value.to_le_bytes())
    }

    fn update_f32(&mut self, addr: usize, value: f32) -> Result<(), StorageError> {
        self.update(addr, &value.to_le_bytes())
    }
}

// --- BedLeveling Trait ---
pub trait BedLeveling {
    /// The 3x3 measured points in micrometres, row major from the front left.
    fn sample_corners(&self) -> [i16; 9];
    /// Loads measured points and rebuilds the dense mesh from them.
    fn load_and_upsample(&mut self, samples: [i16; 9]);
}

// --- MotorDrivers Trait ---
pub trait MotorDrivers {
    /// Position inside the driver's 1024-entry commutation table.
    fn microstep_counter(&self, axis: Axis) -> u16;
    fn enable(&mut self, axis: Axis);
    fn disable(&mut self, axis: Axis);
}

// --- TemperatureControl Trait ---
pub trait TemperatureControl {
    fn set_targets(&mut self, hotend: f64, bed: f64);
    /// Blocks (servicing the heaters) until both targets are reached.
    fn wait_for_targets(&mut self) -> Result<(), HeatingError>;
}

// --- OperatorPrompt Trait ---
/// The operator-facing side: a yes/no question and a terminal message.
pub trait OperatorPrompt {
    fn confirm(&mut self, message: &str) -> bool;
    fn show_fatal(&mut self, message: &str);
}

// --- PrintKObject Trait ---
/// Components that report their state for status queries.
pub trait PrintKObject {
    fn get_status(&self) -> serde_json::Value;
}
