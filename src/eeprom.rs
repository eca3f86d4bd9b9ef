// src/eeprom.rs
// Persistent storage: fixed address map, an in-memory image with power-cut
// injection, a file-backed image for the command line tool, and a shared
// handle that outlives a simulated reboot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::core_traits::PersistentStorage;
use crate::error::StorageError;

pub const EEPROM_SIZE: usize = 4096;

// Power panic record. The pending flag sits first but is written last.
pub const EEPROM_UVLO: usize = 0x000;
pub const EEPROM_FILE_POSITION: usize = 0x001;
pub const EEPROM_UVLO_CURRENT_POSITION: usize = 0x005; // x, y
pub const EEPROM_UVLO_CURRENT_POSITION_Z: usize = 0x00D;
pub const EEPROM_UVLO_Z_MICROSTEPS: usize = 0x011;
pub const EEPROM_UVLO_CURRENT_POSITION_E: usize = 0x013;
pub const EEPROM_UVLO_E_ABS: usize = 0x017;
pub const EEPROM_UVLO_FEEDRATE: usize = 0x018;
pub const EEPROM_UVLO_TARGET_HOTEND: usize = 0x01A;
pub const EEPROM_UVLO_TARGET_BED: usize = 0x01B;
pub const EEPROM_UVLO_FAN_SPEED: usize = 0x01C;
pub const EEPROM_UVLO_MESH_BED_LEVELING: usize = 0x01D; // 9 x i16

// Failure statistics.
pub const EEPROM_POWER_COUNT: usize = 0x02F;
pub const EEPROM_POWER_COUNT_TOT: usize = 0x030;
pub const EEPROM_CRASH_COUNT_X: usize = 0x032;
pub const EEPROM_CRASH_COUNT_Y: usize = 0x033;
pub const EEPROM_CRASH_COUNT_X_TOT: usize = 0x034;
pub const EEPROM_CRASH_COUNT_Y_TOT: usize = 0x036;

pub const EEPROM_FILENAME: usize = 0x040;
pub const FILENAME_MAX_LEN: usize = 63;

pub const EEPROM_BED_CALIBRATION: usize = 0x080; // 6 x f32

fn check_range(addr: usize, len: usize, size: usize) -> Result<(), StorageError> {
    if addr.checked_add(len).map_or(true, |end| end > size) {
        return Err(StorageError::OutOfRange { addr, len, size });
    }
    Ok(())
}

/// In-memory EEPROM. Fresh cells read 0xFF.
#[derive(Debug, Clone)]
pub struct MemEeprom {
    bytes: Vec<u8>,
    // Byte writes left before the supply collapses; None = unlimited.
    write_budget: Option<usize>,
    bytes_written: usize,
}

impl MemEeprom {
    pub fn new() -> Self {
        Self::with_size(EEPROM_SIZE)
    }

    pub fn with_size(size: usize) -> Self {
        MemEeprom {
            bytes: vec![0xFF; size],
            write_budget: None,
            bytes_written: 0,
        }
    }

    /// After `bytes` more byte writes every further write fails.
    pub fn cut_power_after(&mut self, bytes: usize) {
        self.write_budget = Some(bytes);
    }

    pub fn restore_power(&mut self) {
        self.write_budget = None;
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub fn image(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MemEeprom {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStorage for MemEeprom {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        check_range(addr, buf.len(), self.bytes.len())?;
        buf.copy_from_slice(&self.bytes[addr..addr + buf.len()]);
        Ok(())
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), StorageError> {
        check_range(addr, data.len(), self.bytes.len())?;
        for (i, &byte) in data.iter().enumerate() {
            if let Some(budget) = self.write_budget.as_mut() {
                if *budget == 0 {
                    return Err(StorageError::PowerLost { addr: addr + i });
                }
                *budget -= 1;
            }
            self.bytes[addr + i] = byte;
            self.bytes_written += 1;
        }
        Ok(())
    }
}

/// EEPROM image mirrored to a host file after every write.
#[derive(Debug)]
pub struct FileEeprom {
    path: PathBuf,
    image: MemEeprom,
}

impl FileEeprom {
    /// Loads the image, or starts an erased one if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let mut image = MemEeprom::new();
        match std::fs::read(&path) {
            Ok(bytes) => {
                let len = bytes.len().min(EEPROM_SIZE);
                image.bytes[..len].copy_from_slice(&bytes[..len]);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("EEPROM image {} not found, starting erased", path.display());
            }
            Err(e) => return Err(StorageError::Io(format!("{}: {}", path.display(), e))),
        }
        Ok(FileEeprom { path, image })
    }

    fn flush(&self) -> Result<(), StorageError> {
        std::fs::write(&self.path, self.image.image())
            .map_err(|e| StorageError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

impl PersistentStorage for FileEeprom {
    fn size(&self) -> usize {
        self.image.size()
    }

    fn read(&self, addr: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.image.read(addr, buf)
    }

    fn write(&mut self, addr: usize, data: &[u8]) -> Result<(), StorageError> {
        self.image.write(addr, data)?;
        self.flush()
    }
}

type DynStorage = Box<dyn PersistentStorage + Send>;

/// Cloneable handle to one storage device. The device survives the printer
/// that uses it, the way the chip survives a power cycle.
#[derive(Clone)]
pub struct SharedEeprom(Arc<Mutex<DynStorage>>);

impl SharedEeprom {
    pub fn new<S: PersistentStorage + Send + 'static>(storage: S) -> Self {
        SharedEeprom(Arc::new(Mutex::new(Box::new(storage))))
    }

    pub fn lock(&self) -> MutexGuard<'_, DynStorage> {
        self.0.lock()
    }
}

impl std::fmt::Debug for SharedEeprom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedEeprom").finish_non_exhaustive()
    }
}

/// Remembers which file the running print comes from. Paths longer than
/// `FILENAME_MAX_LEN` bytes are refused, never cut.
pub fn store_file_path(storage: &mut dyn PersistentStorage, path: &str) -> Result<(), StorageError> {
    let bytes = path.as_bytes();
    if bytes.len() > FILENAME_MAX_LEN {
        return Err(StorageError::TooLong {
            len: bytes.len(),
            max: FILENAME_MAX_LEN,
        });
    }
    storage.update(EEPROM_FILENAME + 1, bytes)?;
    storage.update_u8(EEPROM_FILENAME, bytes.len() as u8)
}

pub fn load_file_path(storage: &dyn PersistentStorage) -> Result<Option<String>, StorageError> {
    let len = storage.read_u8(EEPROM_FILENAME)? as usize;
    if len == 0 || len > FILENAME_MAX_LEN {
        return Ok(None);
    }
    let mut buf = vec![0u8; len];
    storage.read(EEPROM_FILENAME + 1, &mut buf)?;
    Ok(String::from_utf8(buf).ok())
}
