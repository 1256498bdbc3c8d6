//! Integration tests for what a booted program sees: libraries, globals
//! and the loader

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tinkerbox_runtime::{BootPhase, RenderMode, StandardLibrary};

#[test]
fn test_default_libraries() {
    let h = Harness::new("libraries\nsurfaces debug\nreturn\n");
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    let transcript = h.transcript(1);
    assert_eq!(
        transcript[0],
        "libraries config,fs,mounter,os,peripheral,periphemu,redstone,term,http,debug"
    );
    assert_eq!(
        transcript[1],
        "surfaces debug traceback,getinfo,getlocal,sethook,gethook,setbreakpoint,unsetbreakpoint"
    );
}

#[test]
fn test_vanilla_strips_extensions() {
    let h = Harness::with_config("libraries\nsurfaces term\nsurfaces debug\nreturn\n", |config| {
        config.vanilla = true;
    });
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    let transcript = h.transcript(1);
    assert_eq!(transcript[0], "libraries fs,os,peripheral,redstone,term,http,debug");
    assert!(!transcript[1].contains("setGraphicsMode"));
    assert!(transcript[1].contains("setPaletteColor"));
    assert!(!transcript[2].contains("setbreakpoint"));
}

#[test]
fn test_disabled_http_and_debug() {
    let h = Harness::with_config("libraries\nhidden collectgarbage\nreturn\n", |config| {
        config.http_enable = false;
        config.debug_enable = false;
    });
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert_eq!(
        h.transcript(1),
        vec![
            "libraries config,fs,mounter,os,peripheral,periphemu,redstone,term",
            "hidden collectgarbage true",
        ]
    );
}

#[test]
fn test_server_mode_drops_listeners_and_mounter() {
    let h = Harness::with_config("libraries\nsurfaces http\nreturn\n", |config| {
        config.server_mode = true;
    });
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    let transcript = h.transcript(1);
    assert!(!transcript[0].contains("mounter"));
    assert_eq!(transcript[1], "surfaces http request,checkURL,websocket");
}

#[test]
fn test_debugger_gets_debugger_library() {
    let h = Harness::new("libraries\nreturn\n");
    let computer = h.host.spawn_debugger(1).unwrap();
    h.join(&computer);

    assert!(h.transcript(1)[0].ends_with(",debugger"));
    let points: Vec<String> = computer.mounts().into_iter().map(|m| m.mount_point).collect();
    assert_eq!(points, vec!["rom", "debug"]);
}

#[test]
fn test_extra_library_is_opened() {
    let h = Harness::build(
        Fixture::new(),
        "libraries\nreturn\n",
        |_| {},
        |builder| builder.library(Arc::new(StandardLibrary::new("extra", None, vec![]))),
    );
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert!(h.transcript(1)[0].ends_with(",extra"));
}

#[test]
fn test_host_globals() {
    let h = Harness::with_config(
        "global _HOST\nglobal _HEADLESS\nglobal _DEFAULT_SETTINGS\nglobal _STARTUP_SCRIPT\nglobal _STARTUP_ARGS\nhidden print\nreturn\n",
        |config| {
            config.default_computer_settings = "shell.autocomplete=false".to_string();
            config.startup_script = Some("\x1bprint hi".to_string());
            config.startup_args = Some("--fast".to_string());
        },
    );
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    let transcript = h.transcript(1);
    assert!(transcript[0].starts_with("global _HOST = Tinkerbox "));
    assert_eq!(transcript[1], "global _HEADLESS = nil");
    assert_eq!(transcript[2], "global _DEFAULT_SETTINGS = shell.autocomplete=false");
    assert_eq!(transcript[3], "global _STARTUP_SCRIPT = print hi");
    assert_eq!(transcript[4], "global _STARTUP_ARGS = --fast");
    assert_eq!(transcript[5], "hidden print true");
}

#[test]
fn test_headless_computer_is_flagged() {
    let h = Harness::build(
        Fixture::new(),
        "global _HEADLESS\nreturn\n",
        |_| {},
        |builder| builder.terminals(Arc::new(RenderMode::Headless)),
    );
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert_eq!(h.transcript(1), vec!["global _HEADLESS = true"]);
}

#[test]
fn test_startup_script_file_is_read() {
    let fixture = Fixture::new();
    let script = fixture.path().join("startup.lua");
    std::fs::write(&script, "print from file").unwrap();
    let path = script.display().to_string();
    let h = Harness::build(
        fixture,
        "global _STARTUP_SCRIPT\nreturn\n",
        |config| config.startup_script = Some(path),
        |builder| builder,
    );
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert_eq!(h.transcript(1), vec!["global _STARTUP_SCRIPT = print from file"]);
}

#[test]
fn test_blocking_loader_outside_standards_mode() {
    let h = Harness::new("load direct ab cd ef\nload split ab ~ cd\nreturn\n");
    let computer = h.host.spawn(1).unwrap();
    h.join(&computer);

    assert_eq!(
        h.transcript(1),
        vec![
            "loaded direct: abcdef",
            "load failed split: attempt to yield across a C-call boundary",
        ]
    );
}

#[test]
fn test_yieldable_loader_matches_direct_load() {
    let h = Harness::with_config(
        "queue tick\nqueue tock\nload split ab ~ cd ~ ef\nload direct ab cd ef\nload broken ab !\nprint done\nyield\n",
        |config| config.standards_mode = true,
    );
    let computer = h.host.spawn(1).unwrap();
    assert!(h.wait_for_lines(1, 4));
    computer.shutdown();
    h.join(&computer);

    assert_eq!(
        h.transcript(1),
        vec![
            "loaded split: abcdef",
            "loaded direct: abcdef",
            "load failed broken: reader failed",
            "done",
        ]
    );
}

#[test]
fn test_shutdown_during_yielded_load_stops_computer() {
    let h = Harness::with_config("print loading\nload split ab ~ cd\nprint never\n", |config| {
        config.standards_mode = true
    });
    let computer = h.host.spawn(1).unwrap();
    assert!(h.wait_for_lines(1, 1));
    // Let the reader reach its yield and the loop park on the event queue
    std::thread::sleep(Duration::from_millis(50));

    computer.shutdown();
    h.join(&computer);

    assert_eq!(computer.phase(), BootPhase::Stopped);
    assert_eq!(h.transcript(1), vec!["loading"]);
    assert!(h.host.registry().is_empty());
}
