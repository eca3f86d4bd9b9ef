mod common;

use common::*;
use float_cmp::assert_approx_eq;

use fdm_recovery::cmdqueue::CommandOrigin;
use fdm_recovery::eeprom::{MemEeprom, SharedEeprom};
use fdm_recovery::machine::Axis;
use fdm_recovery::Printer;

fn printing(passes: usize) -> Printer {
    let (mut printer, _) = printer_on(SharedEeprom::new(MemEeprom::new()), card_with(PART, &part_gcode()), &[]);
    calibrate(&mut printer);
    printer.start_sd_print(PART).unwrap();
    run_passes(&mut printer, passes);
    printer
}

#[test]
fn test_save_then_restore_is_seamless() {
    let expected = uninterrupted_result(&part_gcode());
    let mut printer = printing(40);
    let offset = printer.current_file_offset();

    printer.stop_and_save_print_to_ram(10.0, 0.0);
    let saved = printer.saved_print;
    assert!(saved.active);
    assert_eq!(saved.file_position, offset);
    assert!(!printer.is_sd_printing());
    assert!(printer.planner.is_empty());
    // only the lift is queued
    assert_eq!(printer.cmdqueue.len(), 1);
    assert_eq!(printer.cmdqueue.front().unwrap().origin, CommandOrigin::Ui);

    printer.drain_commands().unwrap();
    printer.synchronize();
    assert_approx_eq!(f32, printer.machine.current_position[2], saved.position[2] + 10.0, epsilon = 1e-3);
    let e_parked = printer.steppers.axis_position_mm(Axis::E);

    printer.restore_print_from_ram_and_continue(0.0).unwrap();
    assert!(!printer.saved_print.active);
    assert_eq!(printer.machine.current_position, saved.position);
    assert_eq!(printer.card.get_sdpos(), saved.file_position);
    assert_eq!(printer.sdpos_atomic, saved.file_position);
    assert_approx_eq!(f32, printer.steppers.axis_position_mm(Axis::E), e_parked, epsilon = 1e-2);
    assert_eq!(printer.machine.feedrate, saved.feedrate);

    printer.run(10_000);
    let pos = printer.steppers.position_mm();
    for axis in Axis::ALL {
        assert_approx_eq!(f32, pos[axis.index()], expected[axis.index()], epsilon = 1e-2);
    }
}

#[test]
fn test_pause_and_resume_commands() {
    let expected = uninterrupted_result(&part_gcode());
    let mut printer = printing(30);

    printer.enqueue("M601", CommandOrigin::Serial).unwrap();
    printer.drain_commands().unwrap();
    assert!(printer.saved_print.active);
    // the queued lift ran behind the pause
    printer.synchronize();
    let e_paused = printer.steppers.axis_position_mm(Axis::E);
    assert_approx_eq!(f32, e_paused, printer.saved_print.position[3] - 1.0, epsilon = 1e-2);

    // nothing moves while paused
    assert_eq!(printer.run(10), 0);

    printer.enqueue("M602", CommandOrigin::Serial).unwrap();
    printer.run(10_000);
    let pos = printer.steppers.position_mm();
    for axis in Axis::ALL {
        assert_approx_eq!(f32, pos[axis.index()], expected[axis.index()], epsilon = 1e-2);
    }
}

#[test]
fn test_save_is_idempotent_while_held() {
    let mut printer = printing(40);
    printer.stop_and_save_print_to_ram(0.0, 0.0);
    let first = printer.saved_print;
    run_passes(&mut printer, 5);
    printer.stop_and_save_print_to_ram(10.0, -1.0);
    assert_eq!(printer.saved_print, first);
    assert!(printer.cmdqueue.is_empty());
}
