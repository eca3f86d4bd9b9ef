// Shared rigs for the integration tests.
#![allow(dead_code)]

use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

use fdm_recovery::config::PrinterConfig;
use fdm_recovery::core_traits::PersistentStorage;
use fdm_recovery::eeprom::{MemEeprom, SharedEeprom};
use fdm_recovery::error::StorageError;
use fdm_recovery::prompt::{PromptLog, ScriptedPrompt};
use fdm_recovery::sdcard::SdCard;
use fdm_recovery::transform::BedCalibration;
use fdm_recovery::Printer;

pub const PART: &str = "part.gco";

pub const PROBED: [[f32; 3]; 3] = [[0.120, -0.045, 0.010], [0.033, 0.0, -0.071], [-0.2, 0.0876, 0.3]];

pub const CALIBRATION: BedCalibration = BedCalibration {
    vec_x: [1.0, 0.002],
    vec_y: [-0.002, 1.0],
    center: [1.5, -0.5],
};

/// Heats, homes and prints four small square layers in absolute E.
pub fn part_gcode() -> String {
    let mut g = String::from(
        "; generated test part\nM104 S215\nM140 S60\nM190 S60\nM109 S215\nG28\nG90\nM82\nM106 S180\n\
         G1 Z0.23 F600\nG1 X30 Y30 F3000\nG92 E0\n",
    );
    let mut e = 0.0f32;
    for layer in 0..4 {
        let z = 0.23 + 0.2 * layer as f32;
        let _ = writeln!(g, "; layer {}", layer);
        let _ = writeln!(g, "G1 Z{:.2} F600", z);
        for i in 0..10 {
            let x = if i % 2 == 0 { 80.0 } else { 30.0 };
            let y = 30.0 + 5.0 * i as f32;
            e += 1.7;
            let _ = writeln!(g, "G1 X{:.1} Y{:.1} E{:.4} F1800", x, y, e);
        }
    }
    g.push_str("M107\nM104 S0\nM140 S0\n");
    g
}

pub fn card_with(path: &str, content: &str) -> SdCard {
    let mut card = SdCard::new();
    card.insert_file(path, content);
    card
}

/// A booted printer on `storage`, answering questions from `answers` then no.
pub fn printer_on(storage: SharedEeprom, card: SdCard, answers: &[bool]) -> (Printer, Arc<Mutex<PromptLog>>) {
    printer_with(PrinterConfig::default(), storage, card, answers)
}

pub fn printer_with(
    config: PrinterConfig,
    storage: SharedEeprom,
    card: SdCard,
    answers: &[bool],
) -> (Printer, Arc<Mutex<PromptLog>>) {
    let prompt = ScriptedPrompt::new(answers, false);
    let log = prompt.log();
    let mut printer = Printer::new(config, storage, card, Box::new(prompt));
    printer.boot().unwrap();
    (printer, log)
}

/// Blank EEPROM holding only the skew calibration.
pub fn calibrated_storage() -> SharedEeprom {
    let storage = SharedEeprom::new(MemEeprom::new());
    CALIBRATION.store(&mut **storage.lock()).unwrap();
    storage
}

/// Probed mesh plus stored skew calibration, as a calibrated printer has.
/// The calibration takes effect from the next power-up.
pub fn calibrate(printer: &mut Printer) {
    printer.with_storage(|ee| CALIBRATION.store(ee)).unwrap();
    printer.boot().unwrap();
    printer.mbl.set_measured(PROBED);
    printer.plan_set_position(printer.machine.current_position);
}

pub fn run_passes(printer: &mut Printer, passes: usize) {
    for _ in 0..passes {
        printer.loop_once();
    }
}

/// Physical end position of the part printed without interruption.
pub fn uninterrupted_result(gcode: &str) -> [f32; 4] {
    let (mut printer, _) = printer_on(SharedEeprom::new(MemEeprom::new()), card_with(PART, gcode), &[]);
    calibrate(&mut printer);
    printer.start_sd_print(PART).unwrap();
    printer.run(10_000);
    printer.steppers.position_mm()
}

pub fn storage_image(storage: &SharedEeprom) -> Vec<u8> {
    let ee = storage.lock();
    let mut image = vec![0u8; ee.size()];
    ee.read(0, &mut image).unwrap();
    image
}

/// Supply state shared with a `SwitchedEeprom`: `Some(n)` lets n more bytes
/// through.
#[derive(Debug, Clone, Default)]
pub struct PowerSwitch(Arc<Mutex<Option<usize>>>);

impl PowerSwitch {
    pub fn cut_after(&self, bytes: usize) {
        *self.0.lock() = Some(bytes);
    }

    pub fn restore(&self) {
        *self.0.lock() = None;
    }
}

/// EEPROM whose supply can fail part way through a sequence of writes.
#[derive(Debug)]
pub struct SwitchedEeprom {
    inner: MemEeprom,
    switch: PowerSwitch,
}

impl SwitchedEeprom {
    pub fn new(switch: PowerSwitch) -> Self {
        SwitchedEeprom {
            inner: MemEeprom::new(),
            switch,
        }
    }
}

impl PersistentStorage for SwitchedEeprom {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.inner.read(addr, buf)
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), StorageError> {
        for (i, byte) in data.iter().enumerate() {
            if let Some(budget) = self.switch.0.lock().as_mut() {
                if *budget == 0 {
                    return Err(StorageError::PowerLost { addr: addr + i });
                }
                *budget -= 1;
            }
            self.inner.write(addr + i, std::slice::from_ref(byte))?;
        }
        Ok(())
    }
}
