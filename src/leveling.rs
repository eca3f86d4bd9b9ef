// src/leveling.rs
// Mesh bed leveling: a 7x7 height grid built from 3x3 probed points, plus
// the compact snapshot of it and of the Z motor phase kept in a checkpoint.

use crate::core_traits::{BedLeveling, MotorDrivers};
use crate::machine::Axis;
use crate::mathutil::lagrange3;

pub const MESH_NUM_X_POINTS: usize = 7;
pub const MESH_NUM_Y_POINTS: usize = 7;
pub const MESH_MEAS_NUM_X_POINTS: usize = 3;
pub const MESH_MEAS_NUM_Y_POINTS: usize = 3;
pub const MESH_SNAPSHOT_LEN: usize = MESH_MEAS_NUM_X_POINTS * MESH_MEAS_NUM_Y_POINTS;

// Grid step between two measured points.
const MEAS_STRIDE: usize = (MESH_NUM_X_POINTS - 1) / (MESH_MEAS_NUM_X_POINTS - 1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshGeometry {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Default for MeshGeometry {
    fn default() -> Self {
        MeshGeometry {
            min_x: 24.0,
            max_x: 228.0,
            min_y: 6.0,
            max_y: 210.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshBedLeveling {
    pub active: bool,
    /// Heights in mm, `z_values[iy][ix]`.
    pub z_values: [[f32; MESH_NUM_X_POINTS]; MESH_NUM_Y_POINTS],
    geometry: MeshGeometry,
}

impl MeshBedLeveling {
    pub fn new(geometry: MeshGeometry) -> Self {
        MeshBedLeveling {
            active: false,
            z_values: [[0.0; MESH_NUM_X_POINTS]; MESH_NUM_Y_POINTS],
            geometry,
        }
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.z_values = [[0.0; MESH_NUM_X_POINTS]; MESH_NUM_Y_POINTS];
    }

    pub fn get_x(&self, i: usize) -> f32 {
        let g = &self.geometry;
        g.min_x + (g.max_x - g.min_x) * i as f32 / (MESH_NUM_X_POINTS - 1) as f32
    }

    pub fn get_y(&self, i: usize) -> f32 {
        let g = &self.geometry;
        g.min_y + (g.max_y - g.min_y) * i as f32 / (MESH_NUM_Y_POINTS - 1) as f32
    }

    /// Stores a 3x3 probe result (mm, `measured[iy][ix]`) and activates the
    /// mesh.
    pub fn set_measured(&mut self, measured: [[f32; MESH_MEAS_NUM_X_POINTS]; MESH_MEAS_NUM_Y_POINTS]) {
        for (iy, row) in measured.iter().enumerate() {
            for (ix, &z) in row.iter().enumerate() {
                self.z_values[iy][ix] = z;
            }
        }
        self.upsample_3x3();
        self.active = true;
    }

    /// Expands the 3x3 values parked in the top-left corner of `z_values`
    /// over the full grid with quadratic interpolation, first along X, then
    /// along Y.
    pub fn upsample_3x3(&mut self) {
        let idx = [0, MEAS_STRIDE, 2 * MEAS_STRIDE];

        let xs = idx.map(|i| self.get_x(i));
        for j in 0..MESH_MEAS_NUM_Y_POINTS {
            let zs = [self.z_values[j][0], self.z_values[j][1], self.z_values[j][2]];
            for i in 0..MESH_NUM_X_POINTS {
                self.z_values[j][i] = if let Some(k) = idx.iter().position(|&m| m == i) {
                    zs[k]
                } else {
                    lagrange3(self.get_x(i), xs, zs)
                };
            }
        }

        let ys = idx.map(|j| self.get_y(j));
        for i in 0..MESH_NUM_X_POINTS {
            let zs = [self.z_values[0][i], self.z_values[1][i], self.z_values[2][i]];
            for j in 0..MESH_NUM_Y_POINTS {
                self.z_values[j][i] = if let Some(k) = idx.iter().position(|&m| m == j) {
                    zs[k]
                } else {
                    lagrange3(self.get_y(j), ys, zs)
                };
            }
        }
    }

    /// Bilinear height correction at (x, y). Points outside the mesh use the
    /// nearest edge.
    pub fn get_z(&self, x: f32, y: f32) -> f32 {
        let (ix, tx) = self.cell(x, self.geometry.min_x, self.geometry.max_x, MESH_NUM_X_POINTS);
        let (iy, ty) = self.cell(y, self.geometry.min_y, self.geometry.max_y, MESH_NUM_Y_POINTS);
        let z0 = self.z_values[iy][ix] + (self.z_values[iy][ix + 1] - self.z_values[iy][ix]) * tx;
        let z1 = self.z_values[iy + 1][ix] + (self.z_values[iy + 1][ix + 1] - self.z_values[iy + 1][ix]) * tx;
        z0 + (z1 - z0) * ty
    }

    fn cell(&self, v: f32, min: f32, max: f32, points: usize) -> (usize, f32) {
        let step = (max - min) / (points - 1) as f32;
        let pos = ((v.clamp(min, max) - min) / step).max(0.0);
        let index = (pos.floor() as usize).min(points - 2);
        (index, pos - index as f32)
    }
}

impl BedLeveling for MeshBedLeveling {
    fn sample_corners(&self) -> [i16; MESH_SNAPSHOT_LEN] {
        let mut samples = [0i16; MESH_SNAPSHOT_LEN];
        if !self.active {
            return samples;
        }
        for iy in 0..MESH_MEAS_NUM_Y_POINTS {
            for ix in 0..MESH_MEAS_NUM_X_POINTS {
                let z = self.z_values[iy * MEAS_STRIDE][ix * MEAS_STRIDE];
                let um = (z * 1000.0 + 0.5).floor();
                samples[iy * MESH_MEAS_NUM_X_POINTS + ix] = um.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
        samples
    }

    fn load_and_upsample(&mut self, samples: [i16; MESH_SNAPSHOT_LEN]) {
        if samples.iter().all(|&v| v == 0) {
            return;
        }
        self.active = true;
        for iy in 0..MESH_MEAS_NUM_Y_POINTS {
            for ix in 0..MESH_MEAS_NUM_X_POINTS {
                self.z_values[iy][ix] = f32::from(samples[iy * MESH_MEAS_NUM_X_POINTS + ix]) * 0.001;
            }
        }
        self.upsample_3x3();
    }
}

/// Compact image of the active mesh; all zero when leveling is off.
pub fn snapshot_leveling<L: BedLeveling>(leveling: &L) -> [i16; MESH_SNAPSHOT_LEN] {
    leveling.sample_corners()
}

/// Rebuilds the mesh from a snapshot. An all-zero snapshot leaves leveling
/// untouched.
pub fn restore_leveling<L: BedLeveling>(leveling: &mut L, snapshot: [i16; MESH_SNAPSHOT_LEN]) {
    leveling.load_and_upsample(snapshot);
}

pub fn snapshot_z_phase<D: MotorDrivers>(drivers: &D) -> u16 {
    drivers.microstep_counter(Axis::Z) & 0x3ff
}

/// Z travel (mm) from `phase` up to the next 0th full step, rounded to
/// whole microsteps. `z_steps_per_mm` counts microsteps at the driver's
/// `microsteps` setting; each of them moves MSCNT by `256 / microsteps`.
pub fn resume_z_offset(phase: u16, z_steps_per_mm: f32, microsteps: u16) -> f32 {
    let unit = 256 / i32::from(microsteps.clamp(1, 256));
    let travel = 1024 - i32::from(phase & 0x3ff);
    let steps = (travel + (unit - 1) / 2) / unit;
    steps as f32 / z_steps_per_mm
}
