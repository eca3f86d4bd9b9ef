mod common;

use common::*;
use float_cmp::assert_approx_eq;

use fdm_recovery::eeprom::{MemEeprom, SharedEeprom, FILENAME_MAX_LEN};
use fdm_recovery::error::{CardError, CommandError, MotionError, RecoveryError};
use fdm_recovery::failstats::FailStats;
use fdm_recovery::machine::Axis;
use fdm_recovery::power_panic::{is_pending, UvloOutcome};
use fdm_recovery::prompt::MSG_RECOVER_PRINT;
use fdm_recovery::transform::CoordinateTransform;
use fdm_recovery::{Printer, RecoveryOrchestrator, RecoveryState};

/// Prints part of the test part and cuts the power; returns the EEPROM.
fn interrupted_print(passes: usize) -> SharedEeprom {
    let storage = SharedEeprom::new(MemEeprom::new());
    let (mut printer, _) = printer_on(storage.clone(), card_with(PART, &part_gcode()), &[]);
    calibrate(&mut printer);
    printer.start_sd_print(PART).unwrap();
    run_passes(&mut printer, passes);
    assert_eq!(printer.uvlo_interrupt(), UvloOutcome::Checkpointed);
    storage
}

fn pending(printer: &Printer) -> bool {
    printer.with_storage(|ee| is_pending(ee)).unwrap()
}

fn assert_same_end_position(printer: &Printer, expected: [f32; 4]) {
    let pos = printer.steppers.position_mm();
    assert_approx_eq!(f32, pos[0], expected[0], epsilon = 2e-3);
    assert_approx_eq!(f32, pos[1], expected[1], epsilon = 2e-3);
    assert_approx_eq!(f32, pos[2], expected[2], epsilon = 2e-3);
    assert_approx_eq!(f32, pos[3], expected[3], epsilon = 1e-2);
}

#[test]
fn test_warm_bed_recovers_without_asking() {
    let expected = uninterrupted_result(&part_gcode());
    let storage = interrupted_print(40);

    let (mut printer, log) = printer_on(storage, card_with(PART, &part_gcode()), &[]);
    printer.heaters.bed.current_temp = 58.0;
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
    assert!(orchestrator.is_automatic());
    assert!(log.lock().questions.is_empty());
    assert!(!pending(&printer));
    assert!(printer.is_sd_printing());
    assert_eq!(printer.machine.fan_speed, 180);
    assert!(printer.machine.all_axes_known());

    printer.run(10_000);
    assert!(!printer.is_sd_printing());
    assert_same_end_position(&printer, expected);
    let stats = printer.with_storage(|ee| FailStats::load(ee)).unwrap();
    assert_eq!(stats.power_count, 1);
}

#[test]
fn test_cold_bed_asks_first() {
    let expected = uninterrupted_result(&part_gcode());
    let storage = interrupted_print(52);

    let (mut printer, log) = printer_on(storage, card_with(PART, &part_gcode()), &[true]);
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
    assert!(!orchestrator.is_automatic());
    assert_eq!(log.lock().questions, vec![MSG_RECOVER_PRINT]);

    printer.run(10_000);
    assert_same_end_position(&printer, expected);
}

#[test]
fn test_declined_recovery_is_abandoned() {
    let storage = interrupted_print(40);
    let (mut printer, _) = printer_on(storage, card_with(PART, &part_gcode()), &[false]);
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Abandoned);
    assert!(!pending(&printer));
    assert!(!printer.is_sd_printing());
    assert!(printer.cmdqueue.is_empty());

    // a later boot has nothing to do
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
}

#[test]
fn test_heating_timeout_pauses_until_retried() {
    let expected = uninterrupted_result(&part_gcode());
    let storage = interrupted_print(40);
    let (mut printer, _) = printer_on(storage, card_with(PART, &part_gcode()), &[true]);
    printer.heaters.hotend.set_faulty(true);

    let mut orchestrator = RecoveryOrchestrator::new();
    let err = orchestrator.on_boot(&mut printer).unwrap_err();
    assert!(matches!(err, RecoveryError::Heating(_)));
    assert_eq!(orchestrator.state(), RecoveryState::Paused);
    assert!(pending(&printer));
    assert!(printer.cmdqueue.is_empty());
    assert!(!printer.is_sd_printing());

    printer.heaters.hotend.set_faulty(false);
    assert_eq!(orchestrator.retry(&mut printer).unwrap(), RecoveryState::Running);
    assert!(!pending(&printer));
    printer.run(10_000);
    assert_same_end_position(&printer, expected);
}

#[test]
fn test_homing_failure_is_fatal_but_keeps_the_checkpoint() {
    let storage = interrupted_print(40);
    let (mut printer, log) = printer_on(storage, card_with(PART, &part_gcode()), &[true]);
    printer.steppers.inject_endstop_fault(Axis::Y, true);

    let mut orchestrator = RecoveryOrchestrator::new();
    let err = orchestrator.on_boot(&mut printer).unwrap_err();
    assert_eq!(err, RecoveryError::Homing(MotionError::HomingFailed('Y')));
    assert_eq!(orchestrator.state(), RecoveryState::Failed);
    assert_eq!(log.lock().fatal.len(), 1);
    assert!(pending(&printer));
    assert_eq!(orchestrator.retry(&mut printer), Err(RecoveryError::NotPaused));

    orchestrator.abandon(&mut printer).unwrap();
    assert_eq!(orchestrator.state(), RecoveryState::Abandoned);
    assert!(!pending(&printer));
}

#[test]
fn test_missing_file_fails_and_clears_the_checkpoint() {
    let storage = interrupted_print(40);
    let (mut printer, log) = printer_on(storage, card_with("other.gco", "G1 X1\n"), &[true]);

    let mut orchestrator = RecoveryOrchestrator::new();
    let err = orchestrator.on_boot(&mut printer).unwrap_err();
    assert_eq!(err, RecoveryError::StaleFile(CardError::NotFound(PART.to_string())));
    assert_eq!(orchestrator.state(), RecoveryState::Failed);
    assert!(!pending(&printer));
    assert_eq!(log.lock().fatal.len(), 1);
    assert!(printer.cmdqueue.is_empty());
}

#[test]
fn test_truncated_file_is_stale() {
    let storage = interrupted_print(40);
    let gcode = part_gcode();
    let (mut printer, _) = printer_on(storage, card_with(PART, &gcode[..120]), &[true]);

    let mut orchestrator = RecoveryOrchestrator::new();
    let err = orchestrator.on_boot(&mut printer).unwrap_err();
    assert!(matches!(
        err,
        RecoveryError::StaleFile(CardError::SeekBeyondEnd { size: 120, .. })
    ));
    assert!(!pending(&printer));
}

#[test]
fn test_geometry_comes_back_from_storage() {
    let storage = interrupted_print(40);
    let (mut printer, _) = printer_on(storage, card_with(PART, &part_gcode()), &[]);
    printer.heaters.bed.current_temp = 60.0;
    assert!(!printer.mbl.active);

    let mut orchestrator = RecoveryOrchestrator::new();
    orchestrator.on_boot(&mut printer).unwrap();
    assert!(printer.mbl.active);
    for (iy, row) in PROBED.iter().enumerate() {
        for (ix, z) in row.iter().enumerate() {
            assert_approx_eq!(f32, printer.mbl.z_values[iy * 3][ix * 3], *z, epsilon = 6e-4);
        }
    }
    assert_eq!(printer.transform, CoordinateTransform::from_calibration(&CALIBRATION));
}

#[test]
fn test_stored_skew_applies_before_and_after_power_loss() {
    let gcode = part_gcode();
    let (mut plain, _) = printer_on(calibrated_storage(), card_with(PART, &gcode), &[]);
    assert_eq!(plain.transform, CoordinateTransform::from_calibration(&CALIBRATION));
    plain.start_sd_print(PART).unwrap();
    plain.run(10_000);
    let expected = plain.steppers.position_mm();
    // the skew moves the part off the nominal coordinates
    assert!((expected[0] - 30.0).abs() > 0.1);

    let storage = calibrated_storage();
    let (mut printer, _) = printer_on(storage.clone(), card_with(PART, &gcode), &[]);
    printer.start_sd_print(PART).unwrap();
    run_passes(&mut printer, 40);
    assert_eq!(printer.uvlo_interrupt(), UvloOutcome::Checkpointed);

    let (mut printer, _) = printer_on(storage, card_with(PART, &gcode), &[]);
    printer.heaters.bed.current_temp = 60.0;
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
    printer.run(10_000);
    assert_same_end_position(&printer, expected);
}

#[test]
fn test_long_file_names_survive_or_are_refused_up_front() {
    let gcode = part_gcode();
    let too_long = format!("prints/{}.gco", "long".repeat(15));
    let (mut printer, _) = printer_on(SharedEeprom::new(MemEeprom::new()), card_with(&too_long, &gcode), &[]);
    assert_eq!(
        printer.start_sd_print(&too_long),
        Err(CommandError::Card(CardError::PathTooLong {
            path: too_long.clone(),
            max: FILENAME_MAX_LEN,
        }))
    );
    assert!(!printer.is_sd_printing());

    // exactly full, with multi-byte characters
    let wide = format!("{}.gco", "\u{20ac}".repeat(19) + "ab");
    assert_eq!(wide.len(), FILENAME_MAX_LEN);
    let storage = SharedEeprom::new(MemEeprom::new());
    let (mut printer, _) = printer_on(storage.clone(), card_with(&wide, &gcode), &[]);
    printer.start_sd_print(&wide).unwrap();
    run_passes(&mut printer, 40);
    assert_eq!(printer.uvlo_interrupt(), UvloOutcome::Checkpointed);

    let (mut printer, _) = printer_on(storage, card_with(&wide, &gcode), &[]);
    printer.heaters.bed.current_temp = 60.0;
    let mut orchestrator = RecoveryOrchestrator::new();
    assert_eq!(orchestrator.on_boot(&mut printer).unwrap(), RecoveryState::Running);
    assert_eq!(printer.card.open_path(), Some(wide.as_str()));
}
