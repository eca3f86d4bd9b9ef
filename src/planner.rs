// src/planner.rs
// Fixed-capacity look-ahead block buffer. Blocks hold physical targets;
// logical coordinates are corrected by the caller before queuing.

use heapless::Deque;

use crate::core_traits::MotionPlanner;
use crate::error::MotionError;
use crate::machine::{Axis, NUM_AXIS};

// Capacity of the block buffer, as on the 8-bit firmware.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// One queued linear move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingBlock {
    /// Physical x, y, z, e at the end of the move, in mm.
    pub target: [f32; NUM_AXIS],
    /// mm/s
    pub nominal_speed: f32,
    /// Bytes of the source file this block (and the commands folded into it)
    /// consumed.
    pub sdlen: u16,
    pub active_extruder: u8,
}

#[derive(Debug)]
pub struct Planner {
    blocks: Deque<PendingBlock, BLOCK_BUFFER_SIZE>,
    // Physical position at the end of the newest queued block.
    position: [f32; NUM_AXIS],
}

impl Planner {
    pub fn new() -> Self {
        Self {
            blocks: Deque::new(),
            position: [0.0; NUM_AXIS],
        }
    }

    /// Queues a move to the physical `target`. Zero-length moves are
    /// dropped. The caller makes room first when the buffer is full.
    pub fn buffer_line(
        &mut self,
        target: [f32; NUM_AXIS],
        feed_rate: f32,
        active_extruder: u8,
    ) -> Result<(), MotionError> {
        if target == self.position {
            return Ok(());
        }
        let block = PendingBlock {
            target,
            nominal_speed: feed_rate,
            sdlen: 0,
            active_extruder,
        };
        self.blocks.push_back(block).map_err(|_| MotionError::PlannerFull)?;
        self.position = target;
        Ok(())
    }

    pub fn set_position(&mut self, position: [f32; NUM_AXIS]) {
        self.position = position;
    }

    pub fn set_e_position(&mut self, e: f32) {
        self.position[Axis::E.index()] = e;
    }

    pub fn position(&self) -> [f32; NUM_AXIS] {
        self.position
    }

    /// Charges `len` source bytes to the newest block. With nothing queued the
    /// command has fully taken effect and its bytes need no replay.
    pub fn add_sd_length(&mut self, len: u16) {
        if let Some(block) = self.blocks.back_mut() {
            block.sdlen = block.sdlen.saturating_add(len);
        }
    }

    /// Hands the oldest block to the stepper executor.
    pub fn discard_current_block(&mut self) -> Option<PendingBlock> {
        self.blocks.pop_front()
    }

    pub fn blocks_queued(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.blocks.is_full()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionPlanner for Planner {
    fn abort_and_drain(&mut self) {
        self.blocks.clear();
    }

    fn queued_block_lengths(&self) -> impl Iterator<Item = u16> + '_ {
        self.blocks.iter().map(|block| block.sdlen)
    }

    fn front_block_nominal_speed(&self) -> Option<f32> {
        self.blocks.front().map(|block| block.nominal_speed)
    }
}
