// src/failstats.rs
// Failure statistics: power panics and crashes, per print and lifetime.

use serde_json::json;

use crate::core_traits::{PersistentStorage, PrintKObject};
use crate::eeprom::*;
use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FailStats {
    pub power_count: u8,
    pub power_count_total: u16,
    pub crash_count_x: u8,
    pub crash_count_y: u8,
    pub crash_count_x_total: u16,
    pub crash_count_y_total: u16,
}

impl FailStats {
    pub fn load(storage: &dyn PersistentStorage) -> Result<Self, StorageError> {
        Ok(FailStats {
            power_count: storage.read_u8(EEPROM_POWER_COUNT)?,
            power_count_total: storage.read_u16(EEPROM_POWER_COUNT_TOT)?,
            crash_count_x: storage.read_u8(EEPROM_CRASH_COUNT_X)?,
            crash_count_y: storage.read_u8(EEPROM_CRASH_COUNT_Y)?,
            crash_count_x_total: storage.read_u16(EEPROM_CRASH_COUNT_X_TOT)?,
            crash_count_y_total: storage.read_u16(EEPROM_CRASH_COUNT_Y_TOT)?,
        })
    }
}

impl PrintKObject for FailStats {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "power_panics": {"print": self.power_count, "total": self.power_count_total},
            "crashes_x": {"print": self.crash_count_x, "total": self.crash_count_x_total},
            "crashes_y": {"print": self.crash_count_y, "total": self.crash_count_y_total},
        })
    }
}

/// First boot: erased (0xFF) counters and flags become zero.
pub fn init_erased(storage: &mut dyn PersistentStorage) -> Result<(), StorageError> {
    if storage.read_u8(EEPROM_UVLO)? == 0xFF {
        storage.update_u8(EEPROM_UVLO, 0)?;
    }
    for addr in [EEPROM_POWER_COUNT, EEPROM_CRASH_COUNT_X, EEPROM_CRASH_COUNT_Y] {
        if storage.read_u8(addr)? == 0xFF {
            storage.update_u8(addr, 0)?;
        }
    }
    for addr in [EEPROM_POWER_COUNT_TOT, EEPROM_CRASH_COUNT_X_TOT, EEPROM_CRASH_COUNT_Y_TOT] {
        if storage.read_u16(addr)? == 0xFFFF {
            storage.update_u16(addr, 0)?;
        }
    }
    if storage.read_u8(EEPROM_FILENAME)? == 0xFF {
        storage.update_u8(EEPROM_FILENAME, 0)?;
    }
    Ok(())
}

/// A new print starts with clean per-print counters.
pub fn reset_print(storage: &mut dyn PersistentStorage) -> Result<(), StorageError> {
    storage.update_u8(EEPROM_POWER_COUNT, 0)?;
    storage.update_u8(EEPROM_CRASH_COUNT_X, 0)?;
    storage.update_u8(EEPROM_CRASH_COUNT_Y, 0)
}

pub fn increment_power_count(storage: &mut dyn PersistentStorage) -> Result<(), StorageError> {
    increment_pair(storage, EEPROM_POWER_COUNT, EEPROM_POWER_COUNT_TOT)
}

pub const CRASH_MASK_X: u8 = 0x01;
pub const CRASH_MASK_Y: u8 = 0x02;

pub fn increment_crash_count(storage: &mut dyn PersistentStorage, mask: u8) -> Result<(), StorageError> {
    if mask & CRASH_MASK_X != 0 {
        increment_pair(storage, EEPROM_CRASH_COUNT_X, EEPROM_CRASH_COUNT_X_TOT)?;
    }
    if mask & CRASH_MASK_Y != 0 {
        increment_pair(storage, EEPROM_CRASH_COUNT_Y, EEPROM_CRASH_COUNT_Y_TOT)?;
    }
    Ok(())
}

fn increment_pair(storage: &mut dyn PersistentStorage, print_addr: usize, total_addr: usize) -> Result<(), StorageError> {
    let print = storage.read_u8(print_addr)?;
    storage.update_u8(print_addr, print.saturating_add(1))?;
    let total = storage.read_u16(total_addr)?;
    storage.update_u16(total_addr, total.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_counters_start_at_zero() {
        let mut ee = MemEeprom::new();
        init_erased(&mut ee).unwrap();
        assert_eq!(FailStats::load(&ee).unwrap(), FailStats::default());
        assert_eq!(ee.read_u8(EEPROM_UVLO).unwrap(), 0);
        assert_eq!(load_file_path(&ee).unwrap(), None);
    }

    #[test]
    fn init_keeps_existing_values() {
        let mut ee = MemEeprom::new();
        init_erased(&mut ee).unwrap();
        ee.update_u8(EEPROM_UVLO, 1).unwrap();
        increment_power_count(&mut ee).unwrap();
        init_erased(&mut ee).unwrap();
        assert_eq!(ee.read_u8(EEPROM_UVLO).unwrap(), 1);
        assert_eq!(FailStats::load(&ee).unwrap().power_count, 1);
    }

    #[test]
    fn counters_per_print_and_total() {
        let mut ee = MemEeprom::new();
        init_erased(&mut ee).unwrap();
        increment_power_count(&mut ee).unwrap();
        increment_crash_count(&mut ee, CRASH_MASK_X | CRASH_MASK_Y).unwrap();
        increment_crash_count(&mut ee, CRASH_MASK_Y).unwrap();
        reset_print(&mut ee).unwrap();
        increment_power_count(&mut ee).unwrap();

        let stats = FailStats::load(&ee).unwrap();
        assert_eq!(stats.power_count, 1);
        assert_eq!(stats.power_count_total, 2);
        assert_eq!(stats.crash_count_x, 0);
        assert_eq!(stats.crash_count_x_total, 1);
        assert_eq!(stats.crash_count_y_total, 2);
        assert_eq!(stats.get_status()["power_panics"]["total"], 2);
    }
}
