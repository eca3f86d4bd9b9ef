// src/gcode.rs
// G-code parsing and the command dispatcher. Besides the classic letter +
// number commands a few extended commands (`CRASH_RECOVER`, ...) are accepted
// for the firmware's own use.

use std::collections::HashMap;

use crate::error::CommandError;
use crate::heaters::HeaterId;
use crate::machine::{Axis, NUM_AXIS};
use crate::power_panic;
use crate::printer::Printer;

// Represents a parsed G-code command
#[derive(Debug, PartialEq)]
pub struct GCodeCommand<'a> {
    /// Normalised name: "G1", "M109", "CRASH_RECOVER".
    pub command: String,
    pub params: HashMap<char, f64>,
    /// Everything after the command word, for commands taking a string.
    pub arg_str: &'a str,
    pub raw_line: &'a str,
}

impl GCodeCommand<'_> {
    /// Parameter value, None if absent or given as a bare flag.
    pub fn get_float(&self, key: char) -> Option<f64> {
        self.params.get(&key).copied().filter(|v| !v.is_nan())
    }

    pub fn has_param(&self, key: char) -> bool {
        self.params.contains_key(&key)
    }

    pub fn require_float(&self, key: char) -> Result<f64, CommandError> {
        self.get_float(key).ok_or_else(|| CommandError::MissingParam {
            command: self.command.clone(),
            param: key,
        })
    }
}

// Commands whose argument is free text rather than parameters.
const STRING_ARG_COMMANDS: [&str; 1] = ["M23"];

pub fn parse_line(line: &str) -> Result<GCodeCommand<'_>, CommandError> {
    let clean_line = line.split(';').next().unwrap_or("").trim();
    if clean_line.is_empty() {
        return Err(CommandError::Parse("Empty G-code line".to_string()));
    }

    let (head, rest) = match clean_line.find(char::is_whitespace) {
        Some(i) => (&clean_line[..i], clean_line[i..].trim_start()),
        None => (clean_line, ""),
    };
    let head = head.to_ascii_uppercase();
    if !head.is_ascii() {
        return Err(CommandError::Parse(format!("Invalid command format: {}", head)));
    }

    let mut chars = head.chars();
    let command_letter = chars.next().unwrap_or(' ');
    if !command_letter.is_ascii_alphabetic() {
        return Err(CommandError::Parse(format!("Command must start with a letter: {}", head)));
    }
    let number_str = chars.as_str();
    let command = match number_str.parse::<f64>() {
        Ok(number) if number.fract() == 0.0 => format!("{}{}", command_letter, number as i64),
        Ok(number) => format!("{}{}", command_letter, number),
        Err(_) if head.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && head.len() > 1 => head.clone(),
        Err(_) => {
            return Err(CommandError::Parse(format!(
                "Invalid command number: {} in {}",
                number_str, head
            )))
        }
    };

    let mut params = HashMap::new();
    if !STRING_ARG_COMMANDS.contains(&command.as_str()) {
        for part in rest.split_whitespace() {
            let mut pchars = part.chars();
            let param_char = pchars.next().unwrap_or(' ').to_ascii_uppercase();
            if !param_char.is_ascii_alphabetic() {
                return Err(CommandError::Parse(format!("Parameter must start with a letter: {}", part)));
            }
            let value_str = pchars.as_str();
            if value_str.is_empty() {
                // Bare flag like G28 X
                params.insert(param_char, f64::NAN);
                continue;
            }
            let value = value_str.parse::<f64>().map_err(|_| {
                CommandError::Parse(format!("Invalid parameter value for {}: {}", param_char, value_str))
            })?;
            params.insert(param_char, value);
        }
    }

    Ok(GCodeCommand {
        command,
        params,
        arg_str: rest,
        raw_line: line,
    })
}

impl Printer {
    // Generic command dispatcher
    pub fn process_command(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        match cmd.command.as_str() {
            "G0" | "G1" => self.cmd_g0_g1(cmd),
            "G4" => {
                self.synchronize();
                Ok(())
            }
            "G28" => self.cmd_g28(cmd),
            "G90" => {
                self.machine.relative_mode = false;
                Ok(())
            }
            "G91" => {
                self.machine.relative_mode = true;
                Ok(())
            }
            "G92" => self.cmd_g92(cmd),
            "M82" => {
                self.machine.axis_relative_modes[Axis::E.index()] = false;
                Ok(())
            }
            "M83" => {
                self.machine.axis_relative_modes[Axis::E.index()] = true;
                Ok(())
            }
            "M104" => self.cmd_set_temp(cmd, HeaterId::Hotend, false),
            "M109" => self.cmd_set_temp(cmd, HeaterId::Hotend, true),
            "M140" => self.cmd_set_temp(cmd, HeaterId::Bed, false),
            "M190" => self.cmd_set_temp(cmd, HeaterId::Bed, true),
            "M106" => {
                let speed = cmd.get_float('S').unwrap_or(255.0);
                self.machine.fan_speed = speed.clamp(0.0, 255.0) as u8;
                Ok(())
            }
            "M107" => {
                self.machine.fan_speed = 0;
                Ok(())
            }
            "M23" => self.cmd_m23(cmd),
            "M24" => {
                self.card.start_printing()?;
                log::info!("SD print started at {}", self.card.get_sdpos());
                Ok(())
            }
            "M25" => {
                self.card.pause_printing();
                Ok(())
            }
            "M26" => self.cmd_m26(cmd),
            "M601" => {
                self.pause_print();
                Ok(())
            }
            "M602" => self.resume_print(),
            "CRASH_RECOVER" => self.crashdet_recover(),
            "CRASH_CANCEL" => {
                self.crashdet_cancel();
                Ok(())
            }
            "RECOVERY_COMMIT" => {
                self.with_storage(|ee| power_panic::set_pending(ee, false))?;
                log::info!("power panic recovery committed");
                Ok(())
            }
            _ => Err(CommandError::Unknown(cmd.raw_line.trim().to_string())),
        }
    }

    // G0/G1: Move
    fn cmd_g0_g1(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        if let Some(f_val) = cmd.get_float('F') {
            if f_val > 0.0 {
                self.machine.feedrate = f_val as f32;
            }
        }
        let mut destination: [f32; NUM_AXIS] = self.machine.current_position;
        for axis in Axis::ALL {
            if let Some(value) = cmd.get_float(axis.letter()) {
                let value = value as f32;
                destination[axis.index()] = if self.machine.is_relative(axis) {
                    destination[axis.index()] + value
                } else {
                    value
                };
            }
        }
        self.plan_buffer_line(destination, self.machine.feedrate / 60.0)?;
        self.machine.current_position = destination;
        Ok(())
    }

    // G28: Home. Bare G28 homes X, Y and Z.
    fn cmd_g28(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        self.synchronize();
        let requested: Vec<Axis> = [Axis::X, Axis::Y, Axis::Z]
            .into_iter()
            .filter(|axis| cmd.has_param(axis.letter()))
            .collect();
        let axes = if requested.is_empty() {
            vec![Axis::X, Axis::Y, Axis::Z]
        } else {
            requested
        };
        for axis in axes {
            let home = self.config.homing.position[axis.index()];
            self.steppers.home(axis, home)?;
            self.machine.current_position[axis.index()] = home;
            self.machine.axis_known_position[axis.index()] = true;
            self.plan_set_position(self.machine.current_position);
            log::debug!("homed {}", axis.letter());
        }
        Ok(())
    }

    // G92: Set position
    fn cmd_g92(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        self.synchronize();
        let mut only_e = true;
        for axis in Axis::ALL {
            if let Some(value) = cmd.get_float(axis.letter()) {
                self.machine.current_position[axis.index()] = value as f32;
                only_e &= axis == Axis::E;
            }
        }
        if only_e {
            self.plan_set_e_position(self.machine.current_position[Axis::E.index()]);
        } else {
            self.plan_set_position(self.machine.current_position);
        }
        Ok(())
    }

    fn cmd_set_temp(&mut self, cmd: &GCodeCommand, id: HeaterId, wait: bool) -> Result<(), CommandError> {
        if let Some(temp) = cmd.get_float('S') {
            self.heaters.heater_mut(id).set_target_temp(temp);
        }
        if wait {
            self.heaters.wait_for_heater(id)?;
        }
        Ok(())
    }

    // M23: Select file
    fn cmd_m23(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        let path = cmd.arg_str.trim();
        if path.is_empty() {
            return Err(CommandError::Parse("M23 needs a file name".to_string()));
        }
        self.card.open_file(path)?;
        Ok(())
    }

    // M26: Set file position
    fn cmd_m26(&mut self, cmd: &GCodeCommand) -> Result<(), CommandError> {
        let pos = cmd.require_float('S')?;
        let pos = pos.max(0.0) as u32;
        self.card.set_index(pos)?;
        self.sdpos_atomic = pos;
        Ok(())
    }
}
