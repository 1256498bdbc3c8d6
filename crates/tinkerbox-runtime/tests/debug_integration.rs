//! Integration tests for breakpoints set from a running program

mod common;

use common::*;

#[test]
fn test_breakpoint_ids_and_hooks() {
    let h = Harness::new(
        "breakpoint /rom/programs/shell.lua 10\n\
         breakpoint bios.lua 3\n\
         hooks\n\
         unbreakpoint 1\n\
         hooks\n\
         breakpoint startup.lua 1\n\
         unbreakpoint 9\n\
         yield\n",
    );
    let computer = h.host.spawn(1).unwrap();
    assert!(h.wait_for_lines(1, 7));

    assert_eq!(
        h.transcript(1),
        vec![
            "breakpoint 1",
            "breakpoint 2",
            "hooks 2",
            "unbreakpoint 1 true",
            "hooks 2",
            "breakpoint 3",
            "unbreakpoint 9 false",
        ]
    );

    computer.with_breakpoints(|table| {
        assert_eq!(table.len(), 2);
        assert_eq!(table.matches("@/bios.lua", 3), Some(2));
        assert_eq!(table.matches("@/startup.lua", 1), Some(3));
        assert_eq!(table.matches("@/rom/programs/shell.lua", 10), None);
    });

    computer.shutdown();
    h.join(&computer);
}

#[test]
fn test_clearing_last_breakpoint_removes_hooks_and_restarts_ids() {
    let h = Harness::new(
        "breakpoint a.lua 1\n\
         unbreakpoint 1\n\
         hooks\n\
         breakpoint b.lua 2\n\
         hooks\n\
         return\n",
    );
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert_eq!(
        h.transcript(1),
        vec![
            "breakpoint 1",
            "unbreakpoint 1 true",
            "hooks 0",
            "breakpoint 1",
            "hooks 2",
        ]
    );
}

#[test]
fn test_first_breakpoint_forces_timeout_check() {
    let h = Harness::new("breakpoint a.lua 1\nbreakpoint a.lua 2\nyield\n");
    let computer = h.host.spawn(1).unwrap();
    assert!(h.wait_for_lines(1, 2));

    computer.with_breakpoints(|table| {
        assert!(table.has_breakpoints());
        assert!(table.take_force_check_timeout());
        assert!(!table.take_force_check_timeout());
    });

    computer.shutdown();
    h.join(&computer);
}

#[test]
fn test_breakpoints_survive_reboot() {
    let h = Harness::new("breakpoint a.lua 1\nyield\n");
    let computer = h.host.spawn(1).unwrap();
    assert!(h.wait_for_lines(1, 1));

    computer.reboot();
    assert!(h.wait_for_lines(1, 2));
    computer.shutdown();
    h.join(&computer);

    // The table belongs to the computer, so the second boot appends
    assert_eq!(h.transcript(1), vec!["breakpoint 1", "breakpoint 2"]);
}
