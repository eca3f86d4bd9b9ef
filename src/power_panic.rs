// src/power_panic.rs
// Under-voltage handling. The supply capacitors buy a few hundred
// milliseconds: stop, park the nozzle off the part, write the resume record
// and halt. The pending flag is written last so a record is only ever
// trusted when it is complete.

use serde_json::json;

use crate::accounting;
use crate::core_traits::{CommandQueue, MotionPlanner, MotorDrivers, PersistentStorage, PrintKObject};
use crate::eeprom::*;
use crate::error::StorageError;
use crate::failstats;
use crate::leveling::{resume_z_offset, snapshot_leveling, snapshot_z_phase, MESH_SNAPSHOT_LEN};
use crate::machine::Axis;
use crate::printer::Printer;

/// Retraction speed while the supply collapses, mm/s.
pub const UVLO_RETRACT_FEEDRATE: f32 = 95.0;
/// Z raise speed, mm/s.
pub const UVLO_Z_FEEDRATE: f32 = 40.0;

/// Everything needed to continue a print after the power comes back.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PowerLossCheckpoint {
    pub file_position: u32,
    /// Logical x, y, z at the moment motion stopped.
    pub logical_position: [f32; 3],
    /// Z driver commutation counter, 0..1024.
    pub z_microstep_phase: u16,
    pub extruder_position: f32,
    pub extruder_absolute_mode: bool,
    /// mm/min
    pub feedrate: i16,
    pub target_hotend: u8,
    pub target_bed: u8,
    pub fan_speed: u8,
    /// Measured mesh points in micrometres; all zero without leveling.
    pub leveling_mesh: [i16; MESH_SNAPSHOT_LEN],
}

impl PowerLossCheckpoint {
    /// Writes every field except the pending flag.
    pub fn write_fields(&self, ee: &mut dyn PersistentStorage) -> Result<(), StorageError> {
        ee.update_u32(EEPROM_FILE_POSITION, self.file_position)?;
        for (i, sample) in self.leveling_mesh.iter().enumerate() {
            ee.update_i16(EEPROM_UVLO_MESH_BED_LEVELING + 2 * i, *sample)?;
        }
        ee.update_u16(EEPROM_UVLO_Z_MICROSTEPS, self.z_microstep_phase)?;
        ee.update_f32(EEPROM_UVLO_CURRENT_POSITION, self.logical_position[0])?;
        ee.update_f32(EEPROM_UVLO_CURRENT_POSITION + 4, self.logical_position[1])?;
        ee.update_f32(EEPROM_UVLO_CURRENT_POSITION_Z, self.logical_position[2])?;
        ee.update_f32(EEPROM_UVLO_CURRENT_POSITION_E, self.extruder_position)?;
        ee.update_u8(EEPROM_UVLO_E_ABS, u8::from(self.extruder_absolute_mode))?;
        ee.update_i16(EEPROM_UVLO_FEEDRATE, self.feedrate)?;
        ee.update_u8(EEPROM_UVLO_TARGET_HOTEND, self.target_hotend)?;
        ee.update_u8(EEPROM_UVLO_TARGET_BED, self.target_bed)?;
        ee.update_u8(EEPROM_UVLO_FAN_SPEED, self.fan_speed)
    }

    pub fn load(ee: &dyn PersistentStorage) -> Result<Self, StorageError> {
        let mut leveling_mesh = [0i16; MESH_SNAPSHOT_LEN];
        for (i, sample) in leveling_mesh.iter_mut().enumerate() {
            *sample = ee.read_i16(EEPROM_UVLO_MESH_BED_LEVELING + 2 * i)?;
        }
        Ok(PowerLossCheckpoint {
            file_position: ee.read_u32(EEPROM_FILE_POSITION)?,
            logical_position: [
                ee.read_f32(EEPROM_UVLO_CURRENT_POSITION)?,
                ee.read_f32(EEPROM_UVLO_CURRENT_POSITION + 4)?,
                ee.read_f32(EEPROM_UVLO_CURRENT_POSITION_Z)?,
            ],
            z_microstep_phase: ee.read_u16(EEPROM_UVLO_Z_MICROSTEPS)? & 0x3ff,
            extruder_position: ee.read_f32(EEPROM_UVLO_CURRENT_POSITION_E)?,
            extruder_absolute_mode: ee.read_u8(EEPROM_UVLO_E_ABS)? == 1,
            feedrate: ee.read_i16(EEPROM_UVLO_FEEDRATE)?,
            target_hotend: ee.read_u8(EEPROM_UVLO_TARGET_HOTEND)?,
            target_bed: ee.read_u8(EEPROM_UVLO_TARGET_BED)?,
            fan_speed: ee.read_u8(EEPROM_UVLO_FAN_SPEED)?,
            leveling_mesh,
        })
    }
}

impl PrintKObject for PowerLossCheckpoint {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "file_position": self.file_position,
            "position": self.logical_position,
            "z_microstep_phase": self.z_microstep_phase,
            "extruder_position": self.extruder_position,
            "extruder_absolute": self.extruder_absolute_mode,
            "feedrate": self.feedrate,
            "target_hotend": self.target_hotend,
            "target_bed": self.target_bed,
            "fan_speed": self.fan_speed,
            "leveling_mesh": self.leveling_mesh,
        })
    }
}

pub fn is_pending(ee: &dyn PersistentStorage) -> Result<bool, StorageError> {
    Ok(ee.read_u8(EEPROM_UVLO)? == 1)
}

pub fn set_pending(ee: &mut dyn PersistentStorage, pending: bool) -> Result<(), StorageError> {
    ee.update_u8(EEPROM_UVLO, u8::from(pending))
}

fn saturating_i16(value: f32) -> i16 {
    value.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

fn temp_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UvloOutcome {
    /// The line was already disarmed: a second edge during handling.
    AlreadyHandled,
    /// No print running; nothing to keep.
    NotPrinting,
    Checkpointed,
    /// Storage failed before the record was complete; it stays unflagged.
    CheckpointLost(StorageError),
}

impl Printer {
    /// Falling edge on the under-voltage input.
    pub fn uvlo_interrupt(&mut self) -> UvloOutcome {
        if !self.uvlo_line.enter() {
            return UvloOutcome::AlreadyHandled;
        }
        log::warn!("INT4: supply voltage low");
        if !self.is_sd_printing() {
            log::info!("power panic without an SD print, ignored");
            return UvloOutcome::NotPrinting;
        }
        self.uvlo()
    }

    fn uvlo(&mut self) -> UvloOutcome {
        let cs = self.irq.cli();
        let sd_print = self.is_sd_printing();

        self.steppers.disable(Axis::X);
        self.steppers.disable(Axis::Y);
        self.steppers.disable(Axis::E);

        let z_microstep_phase = snapshot_z_phase(&self.steppers);
        let file_position = accounting::unexecuted_file_offset(self.sdpos_atomic, &self.planner, &self.cmdqueue);
        let feedrate = self
            .planner
            .front_block_nominal_speed()
            .map_or(self.machine.feedrate, |speed| speed * 60.0);
        self.planner_abort_hard();
        let extruder_position = self.steppers.axis_position_mm(Axis::E);
        let extruder_absolute_mode = self.machine.extruder_absolute();
        self.cmdqueue.reset();
        self.card.sdprinting = false;

        let pos = self.machine.current_position;
        let record = PowerLossCheckpoint {
            file_position,
            logical_position: [pos[0], pos[1], pos[2]],
            z_microstep_phase,
            extruder_position,
            extruder_absolute_mode,
            feedrate: saturating_i16(feedrate),
            target_hotend: temp_u8(self.heaters.hotend.target_temp),
            target_bed: temp_u8(self.heaters.bed.target_temp),
            fan_speed: self.machine.fan_speed,
            leveling_mesh: snapshot_leveling(&self.mbl),
        };

        drop(cs);
        self.park_after_power_loss(z_microstep_phase);

        let outcome = match self.with_storage(|ee| -> Result<(), StorageError> {
            record.write_fields(ee)?;
            if sd_print {
                set_pending(ee, true)?;
            }
            Ok(())
        }) {
            Ok(()) => {
                log::info!("power panic checkpoint written, resume at byte {}", record.file_position);
                UvloOutcome::Checkpointed
            }
            Err(e) => {
                log::error!("power panic checkpoint incomplete: {}", e);
                UvloOutcome::CheckpointLost(e)
            }
        };
        if let Err(e) = self.with_storage(failstats::increment_power_count) {
            log::error!("power panic counter not updated: {}", e);
        }

        self.halt();
        outcome
    }

    // Retract, then lift Z onto a full step so the motor lands on the same
    // phase after power returns.
    fn park_after_power_loss(&mut self, z_microstep_phase: u16) {
        let mut pos = self.machine.current_position;
        pos[Axis::E.index()] -= self.config.power_panic.retract_length;
        if let Err(e) = self.plan_buffer_line(pos, UVLO_RETRACT_FEEDRATE) {
            log::warn!("power panic retraction skipped: {}", e);
        } else {
            self.machine.current_position = pos;
        }
        self.synchronize();
        self.steppers.disable(Axis::E);

        let full_step = resume_z_offset(z_microstep_phase, self.config.z_steps_per_mm(), self.config.microsteps);
        let mut pos = self.machine.current_position;
        pos[Axis::Z.index()] += self.config.power_panic.z_lift + full_step;
        if let Err(e) = self.plan_buffer_line(pos, UVLO_Z_FEEDRATE) {
            log::warn!("power panic Z lift skipped: {}", e);
        } else {
            self.machine.current_position = pos;
        }
        self.synchronize();
        self.steppers.disable(Axis::E);
        self.steppers.disable(Axis::Z);
    }
}
