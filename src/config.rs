// src/config.rs
// Typed printer settings read from the INI config. Every option has the
// firmware default, so an empty file describes a stock printer.

use crate::configfile::{ConfigError, Configfile};
use crate::heaters::HeatingSettings;
use crate::leveling::{MeshGeometry, MESH_MEAS_NUM_X_POINTS, MESH_MEAS_NUM_Y_POINTS, MESH_SNAPSHOT_LEN};
use crate::machine::{Axis, NUM_AXIS};

#[derive(Debug, Clone, PartialEq)]
pub struct HomingConfig {
    /// mm/min
    pub feedrate_xy: f32,
    /// mm/min
    pub feedrate_z: f32,
    /// Logical position reached by homing x, y, z.
    pub position: [f32; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerPanicConfig {
    /// Z raise on power loss, mm.
    pub z_lift: f32,
    /// Retraction on power loss and during recovery, mm.
    pub retract_length: f32,
    /// Recovery lifts the nozzle to at least this height before homing XY.
    pub safe_z: f32,
    /// A bed still within this many degrees of its target means the outage
    /// was short and recovery starts without asking.
    pub automatic_bed_temp_offset: f64,
    /// Priming extrusion after a prompted recovery, mm.
    pub purge_length: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PauseConfig {
    pub z_lift: f32,
    pub crash_z_lift: f32,
    pub automatic_crash_recovery: bool,
    pub crash_detection: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrinterConfig {
    pub steps_per_mm: [f32; NUM_AXIS],
    pub microsteps: u16,
    pub homing: HomingConfig,
    pub power_panic: PowerPanicConfig,
    pub pause: PauseConfig,
    pub heating: HeatingSettings,
    pub mesh: MeshGeometry,
    /// Optional 3x3 probe result (mm, row major) loaded at start-up.
    pub probed_mesh: Option<[[f32; MESH_MEAS_NUM_X_POINTS]; MESH_MEAS_NUM_Y_POINTS]>,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        PrinterConfig {
            steps_per_mm: [100.0, 100.0, 400.0, 280.0],
            microsteps: 16,
            homing: HomingConfig {
                feedrate_xy: 3000.0,
                feedrate_z: 800.0,
                position: [0.0, -4.0, 0.15],
            },
            power_panic: PowerPanicConfig {
                z_lift: 2.0,
                retract_length: 1.0,
                safe_z: 25.0,
                automatic_bed_temp_offset: 5.0,
                purge_length: 5.0,
            },
            pause: PauseConfig {
                z_lift: 2.0,
                crash_z_lift: 10.0,
                automatic_crash_recovery: false,
                crash_detection: true,
            },
            heating: HeatingSettings::default(),
            mesh: MeshGeometry::default(),
            probed_mesh: None,
        }
    }
}

fn getf32(
    cf: &Configfile,
    section: &str,
    option: &str,
    default: f32,
    minval: Option<f64>,
) -> Result<f32, ConfigError> {
    Ok(cf.getfloat(section, option, Some(f64::from(default)), minval, None)? as f32)
}

impl PrinterConfig {
    pub fn from_configfile(cf: &Configfile) -> Result<Self, ConfigError> {
        let d = PrinterConfig::default();

        let mut steps_per_mm = d.steps_per_mm;
        for (axis, section) in [
            (Axis::X, "stepper_x"),
            (Axis::Y, "stepper_y"),
            (Axis::Z, "stepper_z"),
            (Axis::E, "extruder"),
        ] {
            let default = steps_per_mm[axis.index()];
            steps_per_mm[axis.index()] = getf32(cf, section, "steps_per_mm", default, Some(1.0))?;
        }
        let microsteps = cf.getint("stepper_z", "microsteps", Some(i64::from(d.microsteps)), Some(1), Some(256))? as u16;
        if !microsteps.is_power_of_two() {
            return Err(ConfigError::ValidationError(format!(
                "microsteps must be a power of two, got {}",
                microsteps
            )));
        }

        let homing = HomingConfig {
            feedrate_xy: getf32(cf, "homing", "feedrate_xy", d.homing.feedrate_xy, Some(1.0))?,
            feedrate_z: getf32(cf, "homing", "feedrate_z", d.homing.feedrate_z, Some(1.0))?,
            position: [
                getf32(cf, "homing", "position_x", d.homing.position[0], None)?,
                getf32(cf, "homing", "position_y", d.homing.position[1], None)?,
                getf32(cf, "homing", "position_z", d.homing.position[2], None)?,
            ],
        };

        let pp = &d.power_panic;
        let power_panic = PowerPanicConfig {
            z_lift: getf32(cf, "power_panic", "z_lift", pp.z_lift, Some(0.0))?,
            retract_length: getf32(cf, "power_panic", "retract_length", pp.retract_length, Some(0.0))?,
            safe_z: getf32(cf, "power_panic", "safe_z", pp.safe_z, Some(0.0))?,
            automatic_bed_temp_offset: cf.getfloat(
                "power_panic",
                "automatic_bed_temp_offset",
                Some(pp.automatic_bed_temp_offset),
                Some(0.0),
                None,
            )?,
            purge_length: getf32(cf, "power_panic", "purge_length", pp.purge_length, Some(0.0))?,
        };

        let pause = PauseConfig {
            z_lift: getf32(cf, "pause", "z_lift", d.pause.z_lift, Some(0.0))?,
            crash_z_lift: getf32(cf, "pause", "crash_z_lift", d.pause.crash_z_lift, Some(0.0))?,
            automatic_crash_recovery: cf.getboolean(
                "pause",
                "automatic_crash_recovery",
                Some(d.pause.automatic_crash_recovery),
            )?,
            crash_detection: cf.getboolean("pause", "crash_detection", Some(d.pause.crash_detection))?,
        };

        let h = &d.heating;
        let heating = HeatingSettings {
            timeout_s: cf.getfloat("heaters", "heating_timeout", Some(h.timeout_s), Some(1.0), None)?,
            hotend_tolerance: cf.getfloat("heaters", "hotend_tolerance", Some(h.hotend_tolerance), Some(0.0), None)?,
            bed_tolerance: cf.getfloat("heaters", "bed_tolerance", Some(h.bed_tolerance), Some(0.0), None)?,
            hotend_rate: cf.getfloat("heaters", "hotend_heating_rate", Some(h.hotend_rate), Some(0.01), None)?,
            bed_rate: cf.getfloat("heaters", "bed_heating_rate", Some(h.bed_rate), Some(0.01), None)?,
        };

        let mesh = MeshGeometry {
            min_x: getf32(cf, "bed_mesh", "min_x", d.mesh.min_x, None)?,
            max_x: getf32(cf, "bed_mesh", "max_x", d.mesh.max_x, None)?,
            min_y: getf32(cf, "bed_mesh", "min_y", d.mesh.min_y, None)?,
            max_y: getf32(cf, "bed_mesh", "max_y", d.mesh.max_y, None)?,
        };
        if mesh.max_x <= mesh.min_x || mesh.max_y <= mesh.min_y {
            return Err(ConfigError::ValidationError("bed_mesh max must be greater than min".to_string()));
        }

        let probed_mesh = match cf.getfloatlist("bed_mesh", "probed")? {
            None => None,
            Some(values) if values.len() == MESH_SNAPSHOT_LEN => {
                let mut grid = [[0f32; MESH_MEAS_NUM_X_POINTS]; MESH_MEAS_NUM_Y_POINTS];
                for (i, v) in values.iter().enumerate() {
                    grid[i / MESH_MEAS_NUM_X_POINTS][i % MESH_MEAS_NUM_X_POINTS] = *v as f32;
                }
                Some(grid)
            }
            Some(values) => {
                return Err(ConfigError::ValidationError(format!(
                    "bed_mesh probed needs {} values, got {}",
                    MESH_SNAPSHOT_LEN,
                    values.len()
                )))
            }
        };

        Ok(PrinterConfig {
            steps_per_mm,
            microsteps,
            homing,
            power_panic,
            pause,
            heating,
            mesh,
            probed_mesh,
        })
    }

    pub fn z_steps_per_mm(&self) -> f32 {
        self.steps_per_mm[Axis::Z.index()]
    }
}
