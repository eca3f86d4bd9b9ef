// src/crash_detect.rs
// Motor stall handling. The driver interrupt only records which axes
// stalled; the main loop stops the print, lifts the nozzle clear and asks
// whether to re-home and continue.

use crate::cmdqueue::CommandOrigin;
use crate::error::CommandError;
use crate::failstats::{self, CRASH_MASK_X, CRASH_MASK_Y};
use crate::printer::Printer;
use crate::prompt::MSG_CRASH_DETECTED;

fn describe_mask(mask: u8) -> &'static str {
    match (mask & CRASH_MASK_X != 0, mask & CRASH_MASK_Y != 0) {
        (true, true) => "X and Y",
        (true, false) => "X",
        (false, true) => "Y",
        (false, false) => "no axis",
    }
}

impl Printer {
    /// Stall interrupt from the X/Y drivers.
    pub fn report_stall(&self, mask: u8) {
        self.stall.report(mask);
    }

    /// Main loop hook: acts on a stall reported since the last pass.
    pub fn check_crash(&mut self) {
        let mask = self.stall.take();
        if mask == 0 {
            return;
        }
        if !self.crash_detection_enabled || !self.is_sd_printing() {
            log::debug!("stall on {} ignored", describe_mask(mask));
            return;
        }
        self.crashdet_detected(mask);
    }

    fn crashdet_detected(&mut self, mask: u8) {
        log::warn!("crash detected on {}", describe_mask(mask));
        self.crash_detection_enabled = false;
        self.stop_and_save_print_to_ram(self.config.pause.crash_z_lift, 0.0);

        if let Err(e) = self.with_storage(|ee| failstats::increment_crash_count(ee, mask)) {
            log::error!("crash counter not updated: {}", e);
        }

        let recover = self.config.pause.automatic_crash_recovery || self.prompt.confirm(MSG_CRASH_DETECTED);
        let commands: &[&str] = if recover {
            &["G28 X Y", "CRASH_RECOVER"]
        } else {
            &["CRASH_CANCEL"]
        };
        for line in commands {
            if let Err(e) = self.enqueue(line, CommandOrigin::Ui) {
                log::error!("could not queue '{}': {}", line, e);
            }
        }
    }

    // CRASH_RECOVER
    pub fn crashdet_recover(&mut self) -> Result<(), CommandError> {
        self.restore_print_from_ram_and_continue(0.0)?;
        self.crash_detection_enabled = self.config.pause.crash_detection;
        Ok(())
    }

    // CRASH_CANCEL
    pub fn crashdet_cancel(&mut self) {
        self.card.sdprinting = false;
        self.card.close_file();
        self.discard_saved_print();
        self.crash_detection_enabled = self.config.pause.crash_detection;
        log::info!("print cancelled after crash");
    }
}
