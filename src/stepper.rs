// src/stepper.rs
// Step executor and driver model. Positions are kept in microsteps; the
// driver commutation counter (MSCNT) only moves when real steps are issued,
// so a position reset does not change the motor phase.

use crate::core_traits::MotorDrivers;
use crate::error::MotionError;
use crate::machine::{Axis, NUM_AXIS};
use crate::planner::PendingBlock;

/// Length of the driver commutation table.
pub const MSCNT_CYCLE: i64 = 1024;

/// Stepper motors of all four axes.
#[derive(Debug, Clone)]
pub struct Steppers {
    steps_per_mm: [f32; NUM_AXIS],
    microsteps: u16,
    count_position: [i64; NUM_AXIS],
    // Commutation counters, 0..1024.
    mscnt: [u16; NUM_AXIS],
    enabled: [bool; NUM_AXIS],
    // Endstops that will not trigger, for fault injection.
    endstop_fault: [bool; 3],
    steps_issued: [u64; NUM_AXIS],
}

impl Steppers {
    pub fn new(steps_per_mm: [f32; NUM_AXIS], microsteps: u16) -> Self {
        Steppers {
            steps_per_mm,
            microsteps: microsteps.clamp(1, 256),
            count_position: [0; NUM_AXIS],
            mscnt: [0; NUM_AXIS],
            enabled: [false; NUM_AXIS],
            endstop_fault: [false; 3],
            steps_issued: [0; NUM_AXIS],
        }
    }

    pub fn steps_per_mm(&self, axis: Axis) -> f32 {
        self.steps_per_mm[axis.index()]
    }

    fn mm_to_steps(&self, axis: Axis, mm: f32) -> i64 {
        (mm * self.steps_per_mm[axis.index()]).round() as i64
    }

    /// Runs one planner block to completion.
    pub fn execute(&mut self, block: &PendingBlock) {
        for axis in Axis::ALL {
            let target = self.mm_to_steps(axis, block.target[axis.index()]);
            let delta = target - self.count_position[axis.index()];
            if delta != 0 {
                self.enabled[axis.index()] = true;
                self.step(axis, delta);
            }
        }
    }

    fn step(&mut self, axis: Axis, delta: i64) {
        let i = axis.index();
        let per_step = i64::from(256 / self.microsteps);
        let phase = (i64::from(self.mscnt[i]) + delta * per_step).rem_euclid(MSCNT_CYCLE);
        self.mscnt[i] = phase as u16;
        self.count_position[i] += delta;
        self.steps_issued[i] += delta.unsigned_abs();
    }

    /// Physical position (mm) the motors are at right now.
    pub fn position_mm(&self) -> [f32; NUM_AXIS] {
        let mut pos = [0.0; NUM_AXIS];
        for axis in Axis::ALL {
            pos[axis.index()] = self.count_position[axis.index()] as f32 / self.steps_per_mm[axis.index()];
        }
        pos
    }

    pub fn axis_position_mm(&self, axis: Axis) -> f32 {
        self.count_position[axis.index()] as f32 / self.steps_per_mm[axis.index()]
    }

    /// Redefines the current physical position without moving.
    pub fn set_position(&mut self, position: [f32; NUM_AXIS]) {
        for axis in Axis::ALL {
            self.count_position[axis.index()] = self.mm_to_steps(axis, position[axis.index()]);
        }
    }

    pub fn set_e_position(&mut self, e: f32) {
        self.count_position[Axis::E.index()] = self.mm_to_steps(Axis::E, e);
    }

    /// Drives `axis` to its endstop and defines the position there.
    pub fn home(&mut self, axis: Axis, home_position: f32) -> Result<(), MotionError> {
        if axis == Axis::E || self.endstop_fault[axis.index()] {
            return Err(MotionError::HomingFailed(axis.letter()));
        }
        self.enabled[axis.index()] = true;
        let target = self.mm_to_steps(axis, home_position);
        let delta = target - self.count_position[axis.index()];
        self.step(axis, delta);
        Ok(())
    }

    pub fn inject_endstop_fault(&mut self, axis: Axis, faulty: bool) {
        if axis != Axis::E {
            self.endstop_fault[axis.index()] = faulty;
        }
    }

    pub fn is_enabled(&self, axis: Axis) -> bool {
        self.enabled[axis.index()]
    }

    pub fn steps_issued(&self, axis: Axis) -> u64 {
        self.steps_issued[axis.index()]
    }
}

impl MotorDrivers for Steppers {
    fn microstep_counter(&self, axis: Axis) -> u16 {
        self.mscnt[axis.index()]
    }

    fn enable(&mut self, axis: Axis) {
        self.enabled[axis.index()] = true;
    }

    fn disable(&mut self, axis: Axis) {
        self.enabled[axis.index()] = false;
    }
}
