// src/transform.rs
// World (g-code) to machine XY correction derived from the XYZ calibration:
// machine = M * world + shift.

use serde_json::json;

use crate::core_traits::{PersistentStorage, PrintKObject};
use crate::eeprom::EEPROM_BED_CALIBRATION;
use crate::error::StorageError;
use crate::mathutil::{matrix_apply, matrix_inverse, vector_add, vector_sub, Matrix2x2f, Vector2f, IDENTITY};

/// Result of the XYZ calibration: the machine-space images of the world X
/// and Y unit vectors and the offset of the world origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedCalibration {
    pub vec_x: Vector2f,
    pub vec_y: Vector2f,
    pub center: Vector2f,
}

impl BedCalibration {
    /// None when the calibration block was never written.
    pub fn load(storage: &dyn PersistentStorage) -> Result<Option<Self>, StorageError> {
        let mut v = [0f32; 6];
        for (i, item) in v.iter_mut().enumerate() {
            *item = storage.read_f32(EEPROM_BED_CALIBRATION + 4 * i)?;
        }
        if v.iter().any(|x| !x.is_finite()) {
            return Ok(None);
        }
        Ok(Some(BedCalibration {
            vec_x: [v[0], v[1]],
            vec_y: [v[2], v[3]],
            center: [v[4], v[5]],
        }))
    }

    pub fn store(&self, storage: &mut dyn PersistentStorage) -> Result<(), StorageError> {
        let v = [
            self.vec_x[0],
            self.vec_x[1],
            self.vec_y[0],
            self.vec_y[1],
            self.center[0],
            self.center[1],
        ];
        for (i, value) in v.iter().enumerate() {
            storage.update_f32(EEPROM_BED_CALIBRATION + 4 * i, *value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    matrix: Matrix2x2f,
    inverse: Matrix2x2f,
    shift: Vector2f,
}

impl CoordinateTransform {
    pub fn identity() -> Self {
        CoordinateTransform {
            matrix: IDENTITY,
            inverse: IDENTITY,
            shift: [0.0, 0.0],
        }
    }

    pub fn from_calibration(cal: &BedCalibration) -> Self {
        let matrix = [[cal.vec_x[0], cal.vec_y[0]], [cal.vec_x[1], cal.vec_y[1]]];
        match matrix_inverse(&matrix) {
            Some(inverse) => CoordinateTransform {
                matrix,
                inverse,
                shift: cal.center,
            },
            None => {
                log::warn!("bed calibration matrix is singular, using identity");
                Self::identity()
            }
        }
    }

    /// Re-derives the transform from the stored calibration. A missing
    /// calibration yields the identity.
    pub fn initialize(storage: &dyn PersistentStorage) -> Result<Self, StorageError> {
        Ok(match BedCalibration::load(storage)? {
            Some(cal) => Self::from_calibration(&cal),
            None => Self::identity(),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.matrix == IDENTITY && self.shift == [0.0, 0.0]
    }

    pub fn world2machine(&self, x: f32, y: f32) -> (f32, f32) {
        let [mx, my] = vector_add(matrix_apply(&self.matrix, [x, y]), self.shift);
        (mx, my)
    }

    pub fn machine2world(&self, x: f32, y: f32) -> (f32, f32) {
        let [wx, wy] = matrix_apply(&self.inverse, vector_sub([x, y], self.shift));
        (wx, wy)
    }
}

impl Default for CoordinateTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl PrintKObject for CoordinateTransform {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "matrix": self.matrix,
            "shift": self.shift,
            "identity": self.is_identity(),
        })
    }
}
