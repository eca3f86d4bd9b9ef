// src/sdcard.rs
// Print file source. Files live in memory; the command line tool mounts host
// files into it.

use std::collections::HashMap;
use std::path::Path;

use serde_json::json;

use crate::core_traits::PrintKObject;
use crate::error::CardError;

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    pos: u32,
}

/// One line read from the open file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLine {
    pub text: String,
    /// Bytes consumed from the file for this command, including skipped
    /// blank and comment lines before it and the line terminator.
    pub sdlen: u16,
}

#[derive(Debug, Default)]
pub struct SdCard {
    files: HashMap<String, Vec<u8>>,
    open: Option<OpenFile>,
    /// SD playback running (M24 until paused, stopped or end of file).
    pub sdprinting: bool,
}

impl SdCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&mut self, path: &str, content: impl Into<Vec<u8>>) {
        self.files.insert(path.to_string(), content.into());
    }

    pub fn remove_file(&mut self, path: &str) -> bool {
        if self.open.as_ref().is_some_and(|f| f.path == path) {
            self.close_file();
        }
        self.files.remove(path).is_some()
    }

    /// Makes a host file visible on the card under its own path.
    pub fn mount_host_file<P: AsRef<Path>>(&mut self, host_path: P) -> std::io::Result<String> {
        let host_path = host_path.as_ref();
        let content = std::fs::read(host_path)?;
        let name = host_path.display().to_string();
        self.insert_file(&name, content);
        Ok(name)
    }

    pub fn file_size(&self, path: &str) -> Option<u32> {
        self.files.get(path).map(|f| f.len() as u32)
    }

    /// M23
    pub fn open_file(&mut self, path: &str) -> Result<(), CardError> {
        if !self.files.contains_key(path) {
            return Err(CardError::NotFound(path.to_string()));
        }
        self.open = Some(OpenFile {
            path: path.to_string(),
            pos: 0,
        });
        log::info!("File opened: {} Size: {}", path, self.file_size(path).unwrap_or(0));
        Ok(())
    }

    pub fn close_file(&mut self) {
        self.open = None;
        self.sdprinting = false;
    }

    pub fn is_file_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_path(&self) -> Option<&str> {
        self.open.as_ref().map(|f| f.path.as_str())
    }

    /// M26: moves the read cursor.
    pub fn set_index(&mut self, pos: u32) -> Result<(), CardError> {
        let open = self.open.as_mut().ok_or(CardError::NoFileOpen)?;
        let size = self.files.get(&open.path).map_or(0, |f| f.len() as u32);
        if pos > size {
            return Err(CardError::SeekBeyondEnd {
                path: open.path.clone(),
                pos,
                size,
            });
        }
        open.pos = pos;
        Ok(())
    }

    pub fn get_sdpos(&self) -> u32 {
        self.open.as_ref().map_or(0, |f| f.pos)
    }

    pub fn eof(&self) -> bool {
        match &self.open {
            Some(open) => self.file_size(&open.path).map_or(true, |size| open.pos >= size),
            None => true,
        }
    }

    /// M24
    pub fn start_printing(&mut self) -> Result<(), CardError> {
        if self.open.is_none() {
            return Err(CardError::NoFileOpen);
        }
        self.sdprinting = true;
        Ok(())
    }

    pub fn pause_printing(&mut self) {
        self.sdprinting = false;
    }

    /// Next command line. Blank and comment-only lines are skipped but their
    /// bytes are charged to the command that follows them. A skipped run that
    /// would not fit `sdlen` comes back first as a filler line with empty
    /// text.
    pub fn read_command(&mut self) -> Option<FileLine> {
        let open = self.open.as_mut()?;
        let data = self.files.get(&open.path)?;
        let mut consumed: u32 = 0;
        while (open.pos as usize) < data.len() {
            let start = open.pos as usize;
            let end = data[start..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(data.len(), |i| start + i + 1);
            let line_len = (end - start) as u32;
            if consumed > 0 && consumed + line_len > u32::from(u16::MAX) {
                return Some(FileLine {
                    text: String::new(),
                    sdlen: consumed as u16,
                });
            }
            open.pos = end as u32;
            consumed += line_len;

            let raw = String::from_utf8_lossy(&data[start..end]);
            let text = raw.split(';').next().unwrap_or("").trim();
            if !text.is_empty() {
                return Some(FileLine {
                    text: text.to_string(),
                    sdlen: line_sdlen(consumed, start),
                });
            }
        }
        if consumed > 0 {
            // trailing comments still count as read
            return Some(FileLine {
                text: String::new(),
                sdlen: line_sdlen(consumed, data.len()),
            });
        }
        None
    }
}

fn line_sdlen(consumed: u32, at: usize) -> u16 {
    u16::try_from(consumed).unwrap_or_else(|_| {
        log::warn!("line at byte {} is longer than {} bytes, resume offset will be off", at, u16::MAX);
        u16::MAX
    })
}

impl PrintKObject for SdCard {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "file_path": self.open_path(),
            "file_position": self.get_sdpos(),
            "is_active": self.sdprinting,
        })
    }
}
