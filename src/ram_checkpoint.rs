// src/ram_checkpoint.rs
// Stop the print, remember exactly where it was, and later continue from
// there. Used for pause and crash handling; lives for one power-on session.

use serde_json::json;

use crate::accounting;
use crate::cmdqueue::CommandOrigin;
use crate::core_traits::{CommandQueue, MotionPlanner, PrintKObject};
use crate::error::CommandError;
use crate::machine::{Axis, NUM_AXIS};
use crate::printer::Printer;

// The way back is taken slowly: Z homing feedrate divided by this, mm/s.
const RESTORE_FEEDRATE_DIVISOR: f32 = 13.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RamCheckpoint {
    pub file_position: u32,
    /// Logical x, y, z, e when motion stopped.
    pub position: [f32; NUM_AXIS],
    /// mm/min
    pub feedrate: f32,
    pub active_extruder: u8,
    pub extruder_under_pressure: bool,
    pub active: bool,
}

impl PrintKObject for RamCheckpoint {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "active": self.active,
            "file_position": self.file_position,
            "position": self.position,
            "feedrate": self.feedrate,
            "active_extruder": self.active_extruder,
        })
    }
}

impl Printer {
    /// Stops motion and file playback and records the resume point. A no-op
    /// while a checkpoint is already held.
    ///
    /// A non-zero `z_move` or `e_move` queues one move (relative to the stop
    /// position) at the head of the command queue.
    pub fn stop_and_save_print_to_ram(&mut self, z_move: f32, e_move: f32) {
        if self.saved_print.active {
            log::debug!("print already saved to RAM");
            return;
        }
        {
            let _cs = self.irq.cli();
            let file_position =
                accounting::unexecuted_file_offset(self.sdpos_atomic, &self.planner, &self.cmdqueue);
            let feedrate = self
                .planner
                .front_block_nominal_speed()
                .map_or(self.machine.feedrate, |speed| speed * 60.0);
            self.planner_abort_hard();
            self.saved_print = RamCheckpoint {
                file_position,
                position: self.machine.current_position,
                feedrate,
                active_extruder: self.machine.active_extruder,
                extruder_under_pressure: self.machine.extruder_under_pressure,
                active: true,
            };
            self.cmdqueue.reset();
            self.card.sdprinting = false;
        }
        log::info!(
            "print stopped at file position {}, position {:?}",
            self.saved_print.file_position,
            self.saved_print.position
        );

        if z_move != 0.0 || e_move != 0.0 {
            let line = self.lift_move(z_move, e_move);
            if let Err(e) = self.cmdqueue.push_front(&line, CommandOrigin::Ui) {
                log::warn!("could not queue '{}': {}", line, e);
            }
        }
    }

    fn lift_move(&self, z_move: f32, e_move: f32) -> String {
        let pos = &self.machine.current_position;
        let z = if self.machine.is_relative(Axis::Z) {
            z_move
        } else {
            pos[Axis::Z.index()] + z_move
        };
        let e = if self.machine.is_relative(Axis::E) {
            e_move
        } else {
            pos[Axis::E.index()] + e_move
        };
        format!("G1 Z{:.3} E{:.3} F{}", z, e, self.config.homing.feedrate_z.round())
    }

    /// Moves back to the recorded position and restarts file playback there.
    /// `e_move` is the extrusion to make up for (usually the retraction done
    /// when stopping). A no-op without a checkpoint.
    pub fn restore_print_from_ram_and_continue(&mut self, e_move: f32) -> Result<(), CommandError> {
        if !self.saved_print.active {
            log::debug!("nothing saved in RAM");
            return Ok(());
        }
        let saved = self.saved_print;
        self.machine.active_extruder = saved.active_extruder;
        self.machine.feedrate = saved.feedrate;
        self.machine.extruder_under_pressure = saved.extruder_under_pressure;

        let e = saved.position[Axis::E.index()] - e_move;
        self.machine.current_position[Axis::E.index()] = e;
        self.plan_set_e_position(e);
        self.plan_buffer_line(saved.position, self.config.homing.feedrate_z / RESTORE_FEEDRATE_DIVISOR)?;
        self.synchronize();
        self.machine.current_position = saved.position;

        self.card.set_index(saved.file_position)?;
        self.sdpos_atomic = saved.file_position;
        self.card.start_printing()?;
        self.saved_print.active = false;
        log::info!("print continues at file position {}", saved.file_position);
        Ok(())
    }

    /// Drops the checkpoint without resuming.
    pub fn discard_saved_print(&mut self) {
        self.saved_print.active = false;
    }

    // M601
    pub fn pause_print(&mut self) {
        let z_lift = self.config.pause.z_lift;
        let retract = self.config.power_panic.retract_length;
        self.stop_and_save_print_to_ram(z_lift, -retract);
    }

    // M602
    pub fn resume_print(&mut self) -> Result<(), CommandError> {
        let retract = self.config.power_panic.retract_length;
        self.restore_print_from_ram_and_continue(retract)
    }

    /// Resume point the current pipeline implies.
    pub fn current_file_offset(&self) -> u32 {
        let _cs = self.irq.cli();
        accounting::compute_unexecuted_file_offset(
            self.sdpos_atomic,
            self.cmdqueue.pending_entries(),
            self.planner.queued_block_lengths(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrinterConfig;
    use crate::eeprom::{MemEeprom, SharedEeprom};
    use crate::prompt::ScriptedPrompt;
    use crate::sdcard::SdCard;

    fn printing(gcode: &str) -> Printer {
        let mut card = SdCard::new();
        card.insert_file("part.gco", gcode);
        let mut printer = Printer::new(
            PrinterConfig::default(),
            SharedEeprom::new(MemEeprom::new()),
            card,
            Box::new(ScriptedPrompt::new(&[], true)),
        );
        printer.boot().unwrap();
        printer.start_sd_print("part.gco").unwrap();
        printer
    }

    #[test]
    fn second_save_is_ignored() {
        let mut printer = printing("G1 X10 F600\nG1 X20\nG1 X30\n");
        printer.get_command().unwrap();
        printer.process_next_command().unwrap();
        printer.stop_and_save_print_to_ram(0.0, 0.0);
        let first = printer.saved_print;
        assert!(first.active);

        printer.sdpos_atomic = 5;
        printer.stop_and_save_print_to_ram(5.0, 0.0);
        assert_eq!(printer.saved_print, first);
        assert!(printer.cmdqueue.is_empty());
    }

    #[test]
    fn lift_follows_the_positioning_mode() {
        let mut printer = printing("");
        printer.execute_line("G1 Z0.4 E3 F600").unwrap();
        printer.synchronize();
        printer.stop_and_save_print_to_ram(10.0, -1.0);
        assert_eq!(printer.cmdqueue.front().unwrap().line, "G1 Z10.400 E2.000 F800");

        printer.discard_saved_print();
        printer.execute_line("M83").unwrap();
        printer.stop_and_save_print_to_ram(2.0, -1.0);
        assert_eq!(printer.cmdqueue.front().unwrap().line, "G1 Z2.400 E-1.000 F800");
        assert_eq!(printer.cmdqueue.front().unwrap().origin, CommandOrigin::Ui);
    }

    #[test]
    fn feedrate_comes_from_the_executing_block() {
        let mut printer = printing("G1 X10 F600\nG1 X20 F1200\n");
        printer.get_command().unwrap();
        printer.process_next_command().unwrap();
        printer.process_next_command().unwrap();
        printer.stop_and_save_print_to_ram(0.0, 0.0);
        assert_eq!(printer.saved_print.feedrate, 600.0);

        let mut idle = printing("");
        idle.machine.feedrate = 4200.0;
        idle.stop_and_save_print_to_ram(0.0, 0.0);
        assert_eq!(idle.saved_print.feedrate, 4200.0);
    }

    #[test]
    fn restore_without_checkpoint_does_nothing() {
        let mut printer = printing("G1 X1\n");
        printer.card.sdprinting = false;
        printer.restore_print_from_ram_and_continue(0.0).unwrap();
        assert!(!printer.card.sdprinting);
    }

    #[test]
    fn pause_and_resume_make_up_the_retraction() {
        let gcode = "G1 X10 E1 F600\nG1 X20 E2\nG1 X30 E3\n";
        let mut printer = printing(gcode);
        printer.get_command().unwrap();
        printer.process_next_command().unwrap();
        printer.process_next_command().unwrap();
        printer.synchronize();

        printer.execute_line("M601").unwrap();
        assert!(printer.saved_print.active);
        // 35 bytes read, "G1 X30 E3\n" still queued
        assert_eq!(printer.saved_print.file_position, 25);
        printer.drain_commands().unwrap();
        printer.synchronize();
        assert_eq!(printer.steppers.axis_position_mm(Axis::E), 1.0);

        printer.execute_line("M602").unwrap();
        assert!(!printer.saved_print.active);
        assert!(printer.card.sdprinting);
        assert_eq!(printer.card.get_sdpos(), 25);
        assert!((printer.steppers.axis_position_mm(Axis::E) - 2.0).abs() < 0.01);
        printer.run(20);
        assert!((printer.steppers.axis_position_mm(Axis::X) - 30.0).abs() < 0.01);
    }
}
