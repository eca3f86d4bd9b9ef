// src/heaters.rs

use serde_json::json;

use crate::core_traits::{PrintKObject, TemperatureControl};
use crate::error::HeatingError;

pub const AMBIENT_TEMP: f64 = 25.0;

#[derive(Debug, Clone)]
pub struct Heater {
    pub name: String,
    pub target_temp: f64,
    pub current_temp: f64,
    /// Degrees per second the element can gain (and lose towards ambient).
    pub heating_rate: f64,
    // A dead element never warms up.
    faulty: bool,
}

impl Heater {
    pub fn new(name: &str, heating_rate: f64) -> Self {
        Heater {
            name: name.to_string(),
            target_temp: 0.0,
            current_temp: AMBIENT_TEMP,
            heating_rate,
            faulty: false,
        }
    }

    pub fn set_target_temp(&mut self, temp: f64) {
        self.target_temp = temp.max(0.0);
        log::debug!("Heater '{}': target temperature set to {:.1}C", self.name, self.target_temp);
    }

    pub fn get_target_temp(&self) -> f64 {
        self.target_temp
    }

    pub fn get_current_temp(&self) -> f64 {
        self.current_temp
    }

    /// Advances the thermal model by `dt` seconds.
    pub fn update_current_temp(&mut self, dt: f64) {
        let goal = if self.faulty || self.target_temp <= 0.0 {
            AMBIENT_TEMP
        } else {
            self.target_temp
        };
        let step = self.heating_rate * dt;
        let delta = goal - self.current_temp;
        self.current_temp = if delta.abs() <= step {
            goal
        } else {
            self.current_temp + step.copysign(delta)
        };
    }

    pub fn check_target_reached(&self, tolerance: f64) -> bool {
        self.target_temp <= 0.0 || (self.current_temp - self.target_temp).abs() <= tolerance
    }

    pub fn set_faulty(&mut self, faulty: bool) {
        self.faulty = faulty;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatingSettings {
    /// Longest a single wait may take, seconds.
    pub timeout_s: f64,
    pub hotend_tolerance: f64,
    pub bed_tolerance: f64,
    pub hotend_rate: f64,
    pub bed_rate: f64,
}

impl Default for HeatingSettings {
    fn default() -> Self {
        HeatingSettings {
            timeout_s: 900.0,
            hotend_tolerance: 1.0,
            bed_tolerance: 1.0,
            hotend_rate: 2.5,
            bed_rate: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaterId {
    Hotend,
    Bed,
}

/// The hotend and the bed, driven on a simulated clock.
#[derive(Debug, Clone)]
pub struct Heaters {
    pub hotend: Heater,
    pub bed: Heater,
    settings: HeatingSettings,
    clock_s: f64,
}

// Period of the wait loop, seconds.
const WAIT_INTERVAL_S: f64 = 1.0;

impl Heaters {
    pub fn new(settings: HeatingSettings) -> Self {
        Heaters {
            hotend: Heater::new("extruder", settings.hotend_rate),
            bed: Heater::new("heater_bed", settings.bed_rate),
            settings,
            clock_s: 0.0,
        }
    }

    /// manage_heater: one control period.
    pub fn tick(&mut self, dt: f64) {
        self.clock_s += dt;
        self.hotend.update_current_temp(dt);
        self.bed.update_current_temp(dt);
    }

    pub fn clock(&self) -> f64 {
        self.clock_s
    }

    pub fn heater(&self, id: HeaterId) -> &Heater {
        match id {
            HeaterId::Hotend => &self.hotend,
            HeaterId::Bed => &self.bed,
        }
    }

    pub fn heater_mut(&mut self, id: HeaterId) -> &mut Heater {
        match id {
            HeaterId::Hotend => &mut self.hotend,
            HeaterId::Bed => &mut self.bed,
        }
    }

    fn tolerance(&self, id: HeaterId) -> f64 {
        match id {
            HeaterId::Hotend => self.settings.hotend_tolerance,
            HeaterId::Bed => self.settings.bed_tolerance,
        }
    }

    /// Waits for one heater, servicing both while waiting.
    pub fn wait_for_heater(&mut self, id: HeaterId) -> Result<(), HeatingError> {
        self.wait_until(&[id])
    }

    fn wait_until(&mut self, ids: &[HeaterId]) -> Result<(), HeatingError> {
        let started = self.clock_s;
        loop {
            let pending = ids
                .iter()
                .copied()
                .find(|&id| !self.heater(id).check_target_reached(self.tolerance(id)));
            let Some(id) = pending else {
                return Ok(());
            };
            if self.clock_s - started >= self.settings.timeout_s {
                let heater = self.heater(id);
                log::warn!(
                    "{} stuck at {:.1}C waiting for {:.1}C",
                    heater.name,
                    heater.current_temp,
                    heater.target_temp
                );
                return Err(HeatingError::Timeout {
                    heater: heater.name.clone(),
                    target: heater.target_temp,
                    current: heater.current_temp,
                    timeout_s: self.settings.timeout_s,
                });
            }
            self.tick(WAIT_INTERVAL_S);
        }
    }
}

impl TemperatureControl for Heaters {
    fn set_targets(&mut self, hotend: f64, bed: f64) {
        self.hotend.set_target_temp(hotend);
        self.bed.set_target_temp(bed);
    }

    fn wait_for_targets(&mut self) -> Result<(), HeatingError> {
        self.wait_until(&[HeaterId::Hotend, HeaterId::Bed])
    }
}

impl PrintKObject for Heaters {
    fn get_status(&self) -> serde_json::Value {
        json!({
            "extruder": {"temperature": self.hotend.current_temp, "target": self.hotend.target_temp},
            "heater_bed": {"temperature": self.bed.current_temp, "target": self.bed.target_temp},
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn heater_creation_and_set_target() {
        let mut heater = Heater::new("extruder_test", 2.0);
        assert_eq!(heater.name, "extruder_test");
        assert_eq!(heater.target_temp, 0.0);
        assert_eq!(heater.current_temp, AMBIENT_TEMP);

        heater.set_target_temp(200.5);
        assert_eq!(heater.get_target_temp(), 200.5);
        heater.set_target_temp(-5.0);
        assert_eq!(heater.get_target_temp(), 0.0);
    }

    #[test]
    fn temperature_approaches_target_without_overshoot() {
        let mut heater = Heater::new("bed", 1.0);
        heater.set_target_temp(27.5);
        heater.update_current_temp(2.0);
        assert_approx_eq!(f64, heater.get_current_temp(), 27.0);
        heater.update_current_temp(2.0);
        assert_approx_eq!(f64, heater.get_current_temp(), 27.5);
        heater.set_target_temp(0.0);
        heater.update_current_temp(100.0);
        assert_approx_eq!(f64, heater.get_current_temp(), AMBIENT_TEMP);
    }

    #[test]
    fn wait_for_targets_advances_the_clock() {
        let mut heaters = Heaters::new(HeatingSettings::default());
        heaters.set_targets(215.0, 60.0);
        heaters.wait_for_targets().unwrap();
        assert!(heaters.hotend.check_target_reached(1.0));
        assert!(heaters.bed.check_target_reached(1.0));
        // the bed is the slow one: 35 degrees at 0.8/s
        assert!(heaters.clock() >= 42.0);
    }

    #[test]
    fn dead_heater_times_out() {
        let settings = HeatingSettings {
            timeout_s: 120.0,
            ..HeatingSettings::default()
        };
        let mut heaters = Heaters::new(settings);
        heaters.bed.set_faulty(true);
        heaters.set_targets(0.0, 60.0);
        match heaters.wait_for_heater(HeaterId::Bed) {
            Err(HeatingError::Timeout { heater, target, .. }) => {
                assert_eq!(heater, "heater_bed");
                assert_eq!(target, 60.0);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_approx_eq!(f64, heaters.clock(), 120.0);
    }
}
