//! `tinkerbox run`: boot computers and serve as their display thread

use anyhow::bail;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tinkerbox_runtime::{BiosSource, FileConfigStore, Host, ScriptedEngine};

/// How long the display loop waits for a task before re-checking the registry
const DISPLAY_POLL: Duration = Duration::from_millis(50);

pub struct RunArgs {
    pub config: Option<PathBuf>,
    pub id: u32,
    pub count: u32,
    pub bios: Option<PathBuf>,
    pub debugger: bool,
    pub standards: bool,
    pub ephemeral: bool,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if args.standards {
        config.standards_mode = true;
    }

    let engine = Arc::new(ScriptedEngine::new());
    let mut builder = Host::builder(config.clone(), engine.clone());
    if let Some(bios) = args.bios {
        builder = builder.bios(BiosSource::File(bios));
    }
    if !args.ephemeral {
        builder = builder.config_store(Arc::new(FileConfigStore::new(super::computer_config_dir(&config))));
    }
    let host = builder.build();

    let mut started = Vec::new();
    for id in args.id..args.id.saturating_add(args.count) {
        let result = if args.debugger {
            host.spawn_debugger(id)
        } else {
            host.spawn(id)
        };
        match result {
            Ok(computer) => started.push(computer),
            Err(err) => eprintln!("Computer {} failed to start: {}", id, err),
        }
    }

    if started.is_empty() {
        host.run_pending_tasks();
        bail!("No computer could be started");
    }

    while !host.registry().is_empty() {
        host.tasks().run_next(DISPLAY_POLL);
    }
    host.join_all();
    host.run_pending_tasks();

    for computer in &started {
        for line in engine.transcript(computer.id()) {
            println!("[{}] {}", computer.id(), line);
        }
    }

    Ok(())
}
