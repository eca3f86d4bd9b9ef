// src/accounting.rs
// Where in the print file does the machine really stand? The reader is ahead
// of the motion by everything sitting in the command queue and the planner.

use crate::cmdqueue::CommandOrigin;
use crate::core_traits::{CommandQueue, MotionPlanner};

/// Offset of the first source byte whose effect has not happened yet.
///
/// `last_enqueued_file_pos` is the reader position right after the newest
/// queued file command. The three inputs must describe the same instant; the
/// callers guarantee that by running with interrupts masked. Underflow
/// clamps to the start of the file.
pub fn compute_unexecuted_file_offset<C, B>(last_enqueued_file_pos: u32, queued_commands: C, queued_blocks: B) -> u32
where
    C: IntoIterator<Item = (CommandOrigin, u16)>,
    B: IntoIterator<Item = u16>,
{
    let in_blocks: u32 = queued_blocks.into_iter().map(u32::from).sum();
    let in_commands: u32 = queued_commands
        .into_iter()
        .filter(|(origin, _)| *origin == CommandOrigin::SdCard)
        .map(|(_, sdlen)| u32::from(sdlen))
        .sum();
    last_enqueued_file_pos.saturating_sub(in_blocks + in_commands)
}

pub fn unexecuted_file_offset<P: MotionPlanner, Q: CommandQueue>(last_enqueued_file_pos: u32, planner: &P, queue: &Q) -> u32 {
    compute_unexecuted_file_offset(last_enqueued_file_pos, queue.pending_entries(), planner.queued_block_lengths())
}
