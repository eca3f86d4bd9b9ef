// src/cmdqueue.rs
// Queue of parsed-later command lines waiting for the dispatcher. Every entry
// remembers where it came from and, for file commands, how many source bytes
// it stands for.

use heapless::{Deque, String};

use crate::core_traits::CommandQueue;
use crate::error::CommandError;

pub const CMDQUEUE_CAPACITY: usize = 16;
/// Longest command line the queue stores, in bytes.
pub const MAX_CMD_SIZE: usize = 96;

pub type CommandLine = String<MAX_CMD_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    Serial,
    /// Generated by the firmware itself (menus, recovery, pause).
    Ui,
    SdCard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub line: CommandLine,
    pub origin: CommandOrigin,
    /// Non-zero only for `SdCard` entries.
    pub sdlen: u16,
}

#[derive(Debug)]
pub struct CmdQueue {
    entries: Deque<QueuedCommand, CMDQUEUE_CAPACITY>,
    capacity: usize,
}

fn command_line(line: &str) -> Result<CommandLine, CommandError> {
    let mut stored = CommandLine::new();
    stored
        .push_str(line)
        .map_err(|_| CommandError::LineTooLong(line.len()))?;
    Ok(stored)
}

impl CmdQueue {
    pub fn new() -> Self {
        Self::with_capacity(CMDQUEUE_CAPACITY)
    }

    /// A queue holding at most `capacity` entries, itself capped at
    /// `CMDQUEUE_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        CmdQueue {
            entries: Deque::new(),
            capacity: capacity.min(CMDQUEUE_CAPACITY),
        }
    }

    pub fn enqueue(&mut self, line: &str, origin: CommandOrigin) -> Result<(), CommandError> {
        self.push_back(QueuedCommand {
            line: command_line(line)?,
            origin,
            sdlen: 0,
        })
    }

    /// Queues a line read from the print file along with its byte length.
    pub fn enqueue_sd(&mut self, line: &str, sdlen: u16) -> Result<(), CommandError> {
        self.push_back(QueuedCommand {
            line: command_line(line)?,
            origin: CommandOrigin::SdCard,
            sdlen,
        })
    }

    fn push_back(&mut self, cmd: QueuedCommand) -> Result<(), CommandError> {
        if !self.has_room() {
            return Err(CommandError::QueueFull);
        }
        log::trace!("enqueue {:?}: {}", cmd.origin, cmd.line);
        self.entries.push_back(cmd).map_err(|_| CommandError::QueueFull)
    }

    pub fn pop_front(&mut self) -> Option<QueuedCommand> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<&QueuedCommand> {
        self.entries.front()
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedCommand> {
        self.entries.iter()
    }
}

impl Default for CmdQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue for CmdQueue {
    fn pending_entries(&self) -> impl Iterator<Item = (CommandOrigin, u16)> + '_ {
        self.entries.iter().map(|cmd| (cmd.origin, cmd.sdlen))
    }

    fn reset(&mut self) {
        self.entries.clear();
    }

    fn push_front(&mut self, line: &str, origin: CommandOrigin) -> Result<(), CommandError> {
        if !self.has_room() {
            return Err(CommandError::QueueFull);
        }
        log::debug!("enqueue front {:?}: {}", origin, line);
        let cmd = QueuedCommand {
            line: command_line(line)?,
            origin,
            sdlen: 0,
        };
        self.entries.push_front(cmd).map_err(|_| CommandError::QueueFull)
    }
}
