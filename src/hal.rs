// src/hal.rs
// Interrupt plumbing: the global enable flag with an RAII critical section,
// self-disabling interrupt lines and the motor stall flags.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Global interrupt enable (the I bit).
#[derive(Debug, Clone)]
pub struct Interrupts {
    global: Arc<AtomicBool>,
}

impl Interrupts {
    pub fn new() -> Self {
        Interrupts {
            global: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn enabled(&self) -> bool {
        self.global.load(Ordering::SeqCst)
    }

    /// Masks interrupts until the returned guard is dropped.
    pub fn cli(&self) -> CriticalSection {
        let was_enabled = self.global.swap(false, Ordering::SeqCst);
        CriticalSection {
            global: Arc::clone(&self.global),
            was_enabled,
        }
    }

    pub fn sei(&self) {
        self.global.store(true, Ordering::SeqCst);
    }

    /// Masks interrupts for good (halt).
    pub fn disable(&self) {
        self.global.store(false, Ordering::SeqCst);
    }
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous interrupt state on drop, so sections nest.
#[derive(Debug)]
pub struct CriticalSection {
    global: Arc<AtomicBool>,
    was_enabled: bool,
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        if self.was_enabled {
            self.global.store(true, Ordering::SeqCst);
        }
    }
}

/// An external interrupt source with its own enable bit.
#[derive(Debug)]
pub struct InterruptLine {
    name: &'static str,
    enabled: AtomicBool,
}

impl InterruptLine {
    pub const fn new(name: &'static str) -> Self {
        InterruptLine {
            name,
            enabled: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        log::debug!("{} interrupt armed", self.name);
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Handler entry: disarms the line and reports whether it was armed. A
    /// second edge while the handler runs finds it disarmed.
    pub fn enter(&self) -> bool {
        self.enabled.swap(false, Ordering::SeqCst)
    }
}

/// Motor stall flags raised by the driver interrupt, consumed by the main
/// loop.
#[derive(Debug, Default)]
pub struct StallFlags {
    mask: AtomicU8,
}

impl StallFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, mask: u8) {
        self.mask.fetch_or(mask, Ordering::SeqCst);
    }

    pub fn take(&self) -> u8 {
        self.mask.swap(0, Ordering::SeqCst)
    }

    pub fn peek(&self) -> u8 {
        self.mask.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_sections_nest() {
        let irq = Interrupts::new();
        {
            let _outer = irq.cli();
            assert!(!irq.enabled());
            {
                let _inner = irq.cli();
                assert!(!irq.enabled());
            }
            assert!(!irq.enabled());
        }
        assert!(irq.enabled());
    }

    #[test]
    fn section_entered_while_masked_stays_masked() {
        let irq = Interrupts::new();
        irq.disable();
        {
            let _cs = irq.cli();
        }
        assert!(!irq.enabled());
        irq.sei();
        assert!(irq.enabled());
    }

    #[test]
    fn interrupt_line_fires_once() {
        let line = InterruptLine::new("UVLO");
        assert!(!line.enter());
        line.arm();
        assert!(line.enter());
        assert!(!line.enter());
        assert!(!line.is_armed());
    }

    #[test]
    fn stall_flags_accumulate_until_taken() {
        let flags = StallFlags::new();
        flags.report(0x01);
        flags.report(0x02);
        assert_eq!(flags.peek(), 0x03);
        assert_eq!(flags.take(), 0x03);
        assert_eq!(flags.take(), 0);
    }
}
