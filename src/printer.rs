// src/printer.rs
// The firmware core: owns every component and runs the cooperative main
// loop (read file, dispatch commands, keep the steppers and heaters going).

use serde_json::json;

use crate::cmdqueue::{CmdQueue, CommandOrigin};
use crate::config::PrinterConfig;
use crate::core_traits::{CommandQueue, MotionPlanner, OperatorPrompt, PersistentStorage, PrintKObject};
use crate::eeprom::{self, SharedEeprom};
use crate::error::{CardError, CommandError, MotionError, StorageError};
use crate::failstats;
use crate::gcode::parse_line;
use crate::hal::{InterruptLine, Interrupts, StallFlags};
use crate::heaters::Heaters;
use crate::leveling::{MeshBedLeveling, MESH_NUM_X_POINTS};
use crate::machine::{Axis, MachineState, NUM_AXIS};
use crate::planner::Planner;
use crate::ram_checkpoint::RamCheckpoint;
use crate::sdcard::SdCard;
use crate::stepper::Steppers;
use crate::transform::CoordinateTransform;

pub struct Printer {
    pub config: PrinterConfig,
    pub machine: MachineState,
    pub planner: Planner,
    pub steppers: Steppers,
    pub cmdqueue: CmdQueue,
    pub card: SdCard,
    pub heaters: Heaters,
    pub mbl: MeshBedLeveling,
    pub transform: CoordinateTransform,
    pub storage: SharedEeprom,
    pub prompt: Box<dyn OperatorPrompt>,
    pub irq: Interrupts,
    /// Under-voltage (power panic) input.
    pub uvlo_line: InterruptLine,
    pub stall: StallFlags,
    /// Stall reports stop the print only while this is set.
    pub crash_detection_enabled: bool,
    pub saved_print: RamCheckpoint,
    /// Read position in the print file right after the newest queued file
    /// command.
    pub sdpos_atomic: u32,
    halted: bool,
}

impl Printer {
    pub fn new(config: PrinterConfig, storage: SharedEeprom, card: SdCard, prompt: Box<dyn OperatorPrompt>) -> Self {
        let mut mbl = MeshBedLeveling::new(config.mesh);
        if let Some(probed) = config.probed_mesh {
            mbl.set_measured(probed);
        }
        Printer {
            machine: MachineState::new(),
            planner: Planner::new(),
            steppers: Steppers::new(config.steps_per_mm, config.microsteps),
            cmdqueue: CmdQueue::new(),
            card,
            heaters: Heaters::new(config.heating),
            mbl,
            transform: CoordinateTransform::identity(),
            storage,
            prompt,
            irq: Interrupts::new(),
            uvlo_line: InterruptLine::new("UVLO"),
            stall: StallFlags::new(),
            crash_detection_enabled: config.pause.crash_detection,
            saved_print: RamCheckpoint::default(),
            sdpos_atomic: 0,
            halted: false,
            config,
        }
    }

    /// Start-up: first-boot EEPROM init, world to machine transform from the
    /// stored calibration, then arm the power panic input.
    pub fn boot(&mut self) -> Result<(), StorageError> {
        self.with_storage(failstats::init_erased)?;
        self.transform = self.with_storage(|ee| CoordinateTransform::initialize(ee))?;
        self.plan_set_position(self.machine.current_position);
        if !self.transform.is_identity() {
            log::info!("bed skew calibration loaded");
        }
        self.uvlo_line.arm();
        log::info!("printer booted, power panic armed");
        Ok(())
    }

    pub fn with_storage<R>(&self, f: impl FnOnce(&mut dyn PersistentStorage) -> R) -> R {
        let mut ee = self.storage.lock();
        f(&mut **ee)
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Final state after a power panic: interrupts off, nothing runs.
    pub fn halt(&mut self) {
        self.irq.disable();
        self.halted = true;
        log::warn!("printer halted");
    }

    pub fn is_sd_printing(&self) -> bool {
        self.card.sdprinting && self.card.is_file_open()
    }

    // --- coordinate handling ---

    pub fn logical_to_physical(&self, logical: [f32; NUM_AXIS]) -> [f32; NUM_AXIS] {
        let [x, y, mut z, e] = logical;
        if self.mbl.active {
            z += self.mbl.get_z(x, y);
        }
        let (mx, my) = self.transform.world2machine(x, y);
        [mx, my, z, e]
    }

    pub fn physical_to_logical(&self, physical: [f32; NUM_AXIS]) -> [f32; NUM_AXIS] {
        let [mx, my, mut z, e] = physical;
        let (x, y) = self.transform.machine2world(mx, my);
        if self.mbl.active {
            z -= self.mbl.get_z(x, y);
        }
        [x, y, z, e]
    }

    // --- motion ---

    /// Queues a move to a logical position; `feed_rate` in mm/s. A full
    /// buffer first lets the steppers finish the oldest block.
    pub fn plan_buffer_line(&mut self, logical: [f32; NUM_AXIS], feed_rate: f32) -> Result<(), MotionError> {
        if self.planner.is_full() {
            if !self.irq.enabled() {
                return Err(MotionError::PlannerFull);
            }
            self.step_block();
        }
        let physical = self.logical_to_physical(logical);
        self.planner.buffer_line(physical, feed_rate, self.machine.active_extruder)
    }

    pub fn plan_set_position(&mut self, logical: [f32; NUM_AXIS]) {
        let physical = self.logical_to_physical(logical);
        self.planner.set_position(physical);
        self.steppers.set_position(physical);
    }

    pub fn plan_set_e_position(&mut self, e: f32) {
        self.planner.set_e_position(e);
        self.steppers.set_e_position(e);
    }

    // The stepper interrupt finishing one block.
    fn step_block(&mut self) {
        let Some(block) = self.planner.discard_current_block() else {
            return;
        };
        let from = self.steppers.position_mm();
        self.steppers.execute(&block);
        let dist = (0..3)
            .map(|i| (block.target[i] - from[i]).powi(2))
            .sum::<f32>()
            .sqrt()
            .max((block.target[Axis::E.index()] - from[Axis::E.index()]).abs());
        if block.nominal_speed > 0.0 {
            self.heaters.tick(f64::from(dist / block.nominal_speed));
        }
    }

    /// Waits until every queued block has been executed.
    pub fn synchronize(&mut self) {
        if !self.irq.enabled() && self.planner.blocks_queued() {
            log::error!("synchronize with interrupts masked, {} blocks stuck", self.planner.len());
            return;
        }
        while self.planner.blocks_queued() {
            self.step_block();
        }
    }

    /// Drops all queued motion. The logical position becomes wherever the
    /// motors stopped.
    pub fn planner_abort_hard(&mut self) {
        self.planner.abort_and_drain();
        let physical = self.steppers.position_mm();
        self.planner.set_position(physical);
        self.machine.current_position = self.physical_to_logical(physical);
    }

    // --- commands ---

    pub fn enqueue(&mut self, line: &str, origin: CommandOrigin) -> Result<(), CommandError> {
        self.cmdqueue.enqueue(line, origin)
    }

    /// Moves file lines into the command queue while printing.
    pub fn get_command(&mut self) -> Result<(), CommandError> {
        while self.is_sd_printing() && self.cmdqueue.has_room() {
            match self.card.read_command() {
                Some(line) => {
                    match self.cmdqueue.enqueue_sd(&line.text, line.sdlen) {
                        Ok(()) => {}
                        Err(CommandError::LineTooLong(len)) => {
                            log::error!("skipping {}-byte file line: {}", len, line.text);
                            self.cmdqueue.enqueue_sd("", line.sdlen)?;
                        }
                        Err(e) => return Err(e),
                    }
                    self.sdpos_atomic = self.card.get_sdpos();
                }
                // The print stays active until its last command has run.
                None => {
                    if self.cmdqueue.is_empty() {
                        log::info!("Done printing file");
                        self.card.close_file();
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    /// Runs one queued command. `Ok(false)` when the queue was empty.
    pub fn process_next_command(&mut self) -> Result<bool, CommandError> {
        let Some(cmd) = self.cmdqueue.pop_front() else {
            return Ok(false);
        };
        log::debug!("{:?}: {}", cmd.origin, cmd.line);
        // filler entries only carry skipped file bytes
        if !cmd.line.is_empty() {
            self.execute_line(&cmd.line)?;
        }
        if cmd.origin == CommandOrigin::SdCard {
            self.planner.add_sd_length(cmd.sdlen);
        }
        Ok(true)
    }

    pub fn execute_line(&mut self, line: &str) -> Result<(), CommandError> {
        let cmd = parse_line(line)?;
        self.process_command(&cmd)
    }

    /// Runs everything queued. The first failure flushes the rest.
    pub fn drain_commands(&mut self) -> Result<(), CommandError> {
        loop {
            match self.process_next_command() {
                Ok(true) => continue,
                Ok(false) => return Ok(()),
                Err(e) => {
                    self.cmdqueue.reset();
                    return Err(e);
                }
            }
        }
    }

    /// One pass of the main loop.
    pub fn loop_once(&mut self) {
        if self.halted {
            return;
        }
        self.check_crash();
        if let Err(e) = self.get_command() {
            log::error!("reading print file: {}", e);
        }
        if let Err(e) = self.process_next_command() {
            log::error!("{}", e);
        }
    }

    /// Main loop until the print and the queue are done, or `max_passes`.
    pub fn run(&mut self, max_passes: usize) -> usize {
        let mut passes = 0;
        while passes < max_passes && !self.halted && (self.is_sd_printing() || !self.cmdqueue.is_empty()) {
            self.loop_once();
            passes += 1;
        }
        if !self.halted && self.irq.enabled() {
            self.synchronize();
        }
        passes
    }

    /// Starts a fresh print of `path` from the card.
    pub fn start_sd_print(&mut self, path: &str) -> Result<(), CommandError> {
        // a print whose file cannot be recorded could never be recovered
        if path.len() > eeprom::FILENAME_MAX_LEN {
            return Err(CardError::PathTooLong {
                path: path.to_string(),
                max: eeprom::FILENAME_MAX_LEN,
            }
            .into());
        }
        self.card.open_file(path)?;
        self.with_storage(|ee| -> Result<(), StorageError> {
            failstats::reset_print(ee)?;
            eeprom::store_file_path(ee, path)
        })?;
        self.saved_print = RamCheckpoint::default();
        self.sdpos_atomic = 0;
        self.card.start_printing()?;
        log::info!("printing {}", path);
        Ok(())
    }
}

impl PrintKObject for Printer {
    fn get_status(&self) -> serde_json::Value {
        let mesh_row: Vec<f32> = (0..MESH_NUM_X_POINTS).map(|i| self.mbl.z_values[0][i]).collect();
        json!({
            "position": self.machine.current_position,
            "feedrate": self.machine.feedrate,
            "homed": self.machine.axis_known_position,
            "fan_speed": self.machine.fan_speed,
            "planner_blocks": self.planner.len(),
            "queued_commands": self.cmdqueue.len(),
            "sdpos_atomic": self.sdpos_atomic,
            "resume_position": crate::accounting::unexecuted_file_offset(self.sdpos_atomic, &self.planner, &self.cmdqueue),
            "halted": self.halted,
            "sdcard": self.card.get_status(),
            "heaters": self.heaters.get_status(),
            "mesh": {"active": self.mbl.active, "front_row": mesh_row},
            "transform": self.transform.get_status(),
            "saved_print": self.saved_print.get_status(),
        })
    }
}
