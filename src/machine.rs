// src/machine.rs
// Logical machine state shared by the motion, checkpoint and recovery code.

pub const NUM_AXIS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X = 0,
    Y = 1,
    Z = 2,
    E = 3,
}

impl Axis {
    pub const ALL: [Axis; NUM_AXIS] = [Axis::X, Axis::Y, Axis::Z, Axis::E];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn letter(self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }

    pub fn from_letter(letter: char) -> Option<Axis> {
        match letter.to_ascii_uppercase() {
            'X' => Some(Axis::X),
            'Y' => Some(Axis::Y),
            'Z' => Some(Axis::Z),
            'E' => Some(Axis::E),
            _ => None,
        }
    }
}

/// Everything the motion front end knows about where the machine is and how
/// it interprets incoming coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineState {
    /// Logical x, y, z, e in mm.
    pub current_position: [f32; NUM_AXIS],
    /// Commanded feedrate in mm/min.
    pub feedrate: f32,
    pub active_extruder: u8,
    pub axis_known_position: [bool; 3],
    /// G91 makes every axis relative.
    pub relative_mode: bool,
    /// Per-axis relative flags; M83 sets the E entry.
    pub axis_relative_modes: [bool; NUM_AXIS],
    pub fan_speed: u8,
    pub extruder_under_pressure: bool,
}

impl MachineState {
    pub fn new() -> Self {
        MachineState {
            current_position: [0.0; NUM_AXIS],
            feedrate: 1500.0,
            active_extruder: 0,
            axis_known_position: [false; 3],
            relative_mode: false,
            axis_relative_modes: [false; NUM_AXIS],
            fan_speed: 0,
            extruder_under_pressure: false,
        }
    }

    pub fn is_relative(&self, axis: Axis) -> bool {
        self.relative_mode || self.axis_relative_modes[axis.index()]
    }

    pub fn extruder_absolute(&self) -> bool {
        !self.is_relative(Axis::E)
    }

    pub fn position(&self, axis: Axis) -> f32 {
        self.current_position[axis.index()]
    }

    pub fn all_axes_known(&self) -> bool {
        self.axis_known_position.iter().all(|&known| known)
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
