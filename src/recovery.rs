// src/recovery.rs
// Boot-time continuation of a print interrupted by a power loss.
//
// The persisted checkpoint is turned back into machine state, then the
// printer is walked through the same commands an operator would type:
// lift, home XY, heat, prime, move back over the part, seek the file and
// start it again. Each phase queues its commands and runs them to
// completion before the next one starts, so a failure stops the sequence
// at a well-defined point.

use serde_json::json;

use crate::cmdqueue::CommandOrigin;
use crate::core_traits::{CommandQueue, MotorDrivers, PrintKObject, TemperatureControl};
use crate::eeprom;
use crate::error::{CardError, RecoveryError};
use crate::leveling::{restore_leveling, resume_z_offset};
use crate::machine::Axis;
use crate::power_panic::{self, PowerLossCheckpoint};
use crate::printer::Printer;
use crate::prompt::MSG_RECOVER_PRINT;
use crate::transform::CoordinateTransform;

// mm/min
const PURGE_FEEDRATE: u32 = 120;
const RETRACT_FEEDRATE: u32 = 480;
const TRAVEL_FEEDRATE: u32 = 2000;
const LIFT_FEEDRATE: u32 = 800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Boot,
    Recovering,
    Rehoming,
    Reheating,
    Repositioning,
    Resuming,
    /// Printing normally, with or without a recovered job.
    Running,
    /// Heating failed; the checkpoint is kept and `retry` reheats.
    Paused,
    Failed,
    /// The operator declined or gave up; the checkpoint is cleared.
    Abandoned,
}

impl RecoveryState {
    pub fn name(&self) -> &'static str {
        match self {
            RecoveryState::Boot => "boot",
            RecoveryState::Recovering => "recovering",
            RecoveryState::Rehoming => "rehoming",
            RecoveryState::Reheating => "reheating",
            RecoveryState::Repositioning => "repositioning",
            RecoveryState::Resuming => "resuming",
            RecoveryState::Running => "running",
            RecoveryState::Paused => "paused",
            RecoveryState::Failed => "failed",
            RecoveryState::Abandoned => "abandoned",
        }
    }
}

#[derive(Debug)]
pub struct RecoveryOrchestrator {
    state: RecoveryState,
    record: Option<PowerLossCheckpoint>,
    file_path: Option<String>,
    automatic: bool,
}

impl Default for RecoveryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryOrchestrator {
    pub fn new() -> Self {
        RecoveryOrchestrator {
            state: RecoveryState::Boot,
            record: None,
            file_path: None,
            automatic: false,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn record(&self) -> Option<&PowerLossCheckpoint> {
        self.record.as_ref()
    }

    /// True when the bed was still warm and nobody was asked.
    pub fn is_automatic(&self) -> bool {
        self.automatic
    }

    /// Decides at start-up whether an interrupted print is continued and,
    /// if so, runs the whole recovery. Returns the state reached.
    pub fn on_boot(&mut self, printer: &mut Printer) -> Result<RecoveryState, RecoveryError> {
        self.state = RecoveryState::Boot;
        if !printer.with_storage(|ee| power_panic::is_pending(ee))? {
            log::info!("no interrupted print");
            self.state = RecoveryState::Running;
            return Ok(self.state);
        }
        let record = printer.with_storage(|ee| PowerLossCheckpoint::load(ee))?;
        self.record = Some(record);

        // A bed that is still close to its target means the outage was short.
        let bed = printer.heaters.bed.get_current_temp();
        let threshold = f64::from(record.target_bed) - printer.config.power_panic.automatic_bed_temp_offset;
        self.automatic = bed > threshold;
        log::info!(
            "interrupted print at byte {}, bed {:.1}C (automatic above {:.1}C)",
            record.file_position,
            bed,
            threshold
        );
        if !self.automatic && !printer.prompt.confirm(MSG_RECOVER_PRINT) {
            self.abandon(printer)?;
            return Ok(self.state);
        }
        self.run_from(printer, RecoveryState::Recovering)
    }

    /// Continues a paused recovery from the reheating phase.
    pub fn retry(&mut self, printer: &mut Printer) -> Result<RecoveryState, RecoveryError> {
        if self.state != RecoveryState::Paused {
            return Err(RecoveryError::NotPaused);
        }
        log::info!("retrying recovery");
        self.run_from(printer, RecoveryState::Reheating)
    }

    /// Gives up on the interrupted print for good.
    pub fn abandon(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        printer.with_storage(|ee| power_panic::set_pending(ee, false))?;
        printer.cmdqueue.reset();
        printer.card.sdprinting = false;
        printer.card.close_file();
        self.state = RecoveryState::Abandoned;
        log::info!("interrupted print abandoned");
        Ok(())
    }

    fn run_from(&mut self, printer: &mut Printer, start: RecoveryState) -> Result<RecoveryState, RecoveryError> {
        let mut phase = start;
        loop {
            self.state = phase;
            log::debug!("recovery phase {}", phase.name());
            let result = match phase {
                RecoveryState::Recovering => self.recover_machine_state(printer),
                RecoveryState::Rehoming => self.rehome(printer),
                RecoveryState::Reheating => self.reheat(printer),
                RecoveryState::Repositioning => self.reposition(printer),
                RecoveryState::Resuming => self.resume(printer),
                _ => return Ok(phase),
            };
            if let Err(err) = result {
                return Err(self.fail(printer, err));
            }
            phase = match phase {
                RecoveryState::Recovering => RecoveryState::Rehoming,
                RecoveryState::Rehoming => RecoveryState::Reheating,
                RecoveryState::Reheating => RecoveryState::Repositioning,
                RecoveryState::Repositioning => RecoveryState::Resuming,
                _ => RecoveryState::Running,
            };
        }
    }

    fn fail(&mut self, printer: &mut Printer, err: RecoveryError) -> RecoveryError {
        match &err {
            RecoveryError::Heating(e) => {
                log::error!("recovery paused: {}", e);
                self.state = RecoveryState::Paused;
            }
            RecoveryError::StaleFile(_) => {
                if let Err(e) = printer.with_storage(|ee| power_panic::set_pending(ee, false)) {
                    log::error!("could not clear the pending checkpoint: {}", e);
                }
                printer.prompt.show_fatal(&err.to_string());
                self.state = RecoveryState::Failed;
            }
            _ => {
                printer.prompt.show_fatal(&err.to_string());
                self.state = RecoveryState::Failed;
            }
        }
        err
    }

    fn checkpoint(&self) -> Result<PowerLossCheckpoint, RecoveryError> {
        self.record.ok_or(RecoveryError::NothingPending)
    }

    // The file must still be there and at least as long as the resume point.
    fn check_source_file(printer: &Printer, record: &PowerLossCheckpoint) -> Result<String, RecoveryError> {
        let path = printer
            .with_storage(|ee| eeprom::load_file_path(ee))?
            .ok_or_else(|| RecoveryError::StaleFile(CardError::NotFound("(no file recorded)".to_string())))?;
        let size = printer
            .card
            .file_size(&path)
            .ok_or_else(|| RecoveryError::StaleFile(CardError::NotFound(path.clone())))?;
        if record.file_position > size {
            return Err(RecoveryError::StaleFile(CardError::SeekBeyondEnd {
                path,
                pos: record.file_position,
                size,
            }));
        }
        Ok(path)
    }

    fn recover_machine_state(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        let record = self.checkpoint()?;
        self.file_path = Some(Self::check_source_file(printer, &record)?);

        // The power panic handler parked Z on a full step above the print.
        let [x, y, z] = record.logical_position;
        let z = z
            + printer.config.power_panic.z_lift
            + resume_z_offset(record.z_microstep_phase, printer.config.z_steps_per_mm(), printer.config.microsteps);
        let e = if record.extruder_absolute_mode {
            record.extruder_position
        } else {
            printer.machine.current_position[Axis::E.index()]
        };

        printer.transform = printer.with_storage(|ee| CoordinateTransform::initialize(ee))?;
        printer.mbl.reset();
        restore_leveling(&mut printer.mbl, record.leveling_mesh);

        let logical = [x, y, z, e];
        printer.machine.current_position = logical;
        printer.plan_set_position(logical);
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            printer.machine.axis_known_position[axis.index()] = true;
            printer.steppers.enable(axis);
        }
        printer
            .heaters
            .set_targets(f64::from(record.target_hotend), f64::from(record.target_bed));
        log::info!(
            "machine state recovered at X{:.3} Y{:.3} Z{:.3} E{:.3}, mesh {}",
            x,
            y,
            z,
            e,
            if printer.mbl.active { "on" } else { "off" }
        );
        Ok(())
    }

    fn rehome(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        let safe_z = printer.config.power_panic.safe_z;
        let mut commands = Vec::new();
        if printer.machine.current_position[Axis::Z.index()] < safe_z {
            commands.push(format!("G1 Z{:.3} F{}", safe_z, LIFT_FEEDRATE));
        }
        commands.push("G28 X Y".to_string());
        run_commands(printer, &commands)
    }

    fn reheat(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        let record = self.checkpoint()?;
        let retract = printer.config.power_panic.retract_length;
        let mut commands = vec![
            format!("M109 S{}", record.target_hotend),
            format!("M190 S{}", record.target_bed),
            "M83".to_string(),
        ];
        // After a long outage the nozzle has oozed; prime it first.
        if !self.automatic {
            commands.push(format!("G1 E{:.3} F{}", printer.config.power_panic.purge_length, PURGE_FEEDRATE));
        }
        commands.push(format!("G1 E{:.3} F{}", -retract, RETRACT_FEEDRATE));
        run_commands(printer, &commands)
    }

    fn reposition(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        let record = self.checkpoint()?;
        let path = self
            .file_path
            .clone()
            .ok_or_else(|| RecoveryError::StaleFile(CardError::NoFileOpen))?;
        let [x, y, z] = record.logical_position;
        let retract = printer.config.power_panic.retract_length;
        let mut commands = vec![
            format!("M23 {}", path),
            format!("G1 X{:.3} Y{:.3} F{}", x, y, TRAVEL_FEEDRATE),
            format!("G1 Z{:.3}", z),
            format!("G1 E{:.3} F{}", 2.0 * retract, RETRACT_FEEDRATE),
            format!("G1 F{}", record.feedrate),
        ];
        if record.extruder_absolute_mode {
            // Priming moved E; the file continues from the saved value.
            commands.push(format!("G92 E{:.3}", record.extruder_position));
            commands.push("M82".to_string());
        }
        run_commands(printer, &commands)
    }

    fn resume(&mut self, printer: &mut Printer) -> Result<(), RecoveryError> {
        let record = self.checkpoint()?;
        let commands = [
            format!("M106 S{}", record.fan_speed),
            format!("M26 S{}", record.file_position),
            "RECOVERY_COMMIT".to_string(),
            "M24".to_string(),
        ];
        run_commands(printer, &commands)?;
        log::info!("print resumed at byte {}", record.file_position);
        Ok(())
    }
}

fn run_commands(printer: &mut Printer, commands: &[String]) -> Result<(), RecoveryError> {
    for line in commands {
        printer.enqueue(line, CommandOrigin::Ui)?;
    }
    printer.drain_commands()?;
    printer.synchronize();
    Ok(())
}

impl PrintKObject for RecoveryOrchestrator {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "state": self.state.name(),
            "automatic": self.automatic,
            "file": self.file_path,
            "checkpoint": self.record.map(|r| r.get_status()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterConfig;
    use crate::eeprom::{MemEeprom, SharedEeprom};
    use crate::prompt::ScriptedPrompt;
    use crate::sdcard::SdCard;

    fn booted(storage: SharedEeprom, answers: &[bool]) -> Printer {
        let mut card = SdCard::new();
        card.insert_file("part.gco", "G1 X10 F600\nG1 X20\nG1 X30\n");
        let mut printer = Printer::new(
            PrinterConfig::default(),
            storage,
            card,
            Box::new(ScriptedPrompt::new(answers, false)),
        );
        printer.boot().unwrap();
        printer
    }

    #[test]
    fn nothing_pending_goes_straight_to_running() {
        let mut printer = booted(SharedEeprom::new(MemEeprom::new()), &[]);
        let mut orchestrator = RecoveryOrchestrator::new();
        assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
        assert!(orchestrator.record().is_none());
        assert!(printer.cmdqueue.is_empty());
    }

    #[test]
    fn retry_needs_a_paused_recovery() {
        let mut printer = booted(SharedEeprom::new(MemEeprom::new()), &[]);
        let mut orchestrator = RecoveryOrchestrator::new();
        assert_eq!(orchestrator.retry(&mut printer), Err(RecoveryError::NotPaused));
    }

    #[test]
    fn state_names_reported_in_status() {
        let orchestrator = RecoveryOrchestrator::new();
        assert_eq!(orchestrator.get_status()["state"], "boot");
        assert_eq!(RecoveryState::Repositioning.name(), "repositioning");
    }
}
