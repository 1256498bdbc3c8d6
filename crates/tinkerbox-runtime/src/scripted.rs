//! A tiny line-oriented script engine
//!
//! Programs are plain text, one instruction per line. It exists so the
//! runtime can be driven end to end without an embedded language: the CLI
//! boots it and the integration tests script computers with it. Whatever a
//! program observes is appended to a transcript kept per computer id.
//!
//! | instruction              | effect                                          |
//! |--------------------------|-------------------------------------------------|
//! | `print <text>`           | append `<text>`                                 |
//! | `yield [filter]`         | suspend; the next event is logged as `event ..` |
//! | `error <message>`        | raise a script error                            |
//! | `return`                 | finish                                          |
//! | `shutdown` / `reboot`    | ask the computer to stop or reboot, then suspend|
//! | `breakpoint <src> <n>`   | set a breakpoint, log its id                    |
//! | `unbreakpoint <id>`      | clear a breakpoint, log the result              |
//! | `hooks`                  | log how many hooks are installed                |
//! | `timer <ms>`             | start a timer, log its id                       |
//! | `queue <kind>`           | queue an event on this computer                 |
//! | `global <name>`          | log a global's value                            |
//! | `hidden <name>`          | log whether a base global is hidden             |
//! | `libraries`              | log opened library names                        |
//! | `surfaces <lib>`         | log a library's exposed surfaces                |
//! | `load <name> <piece>..`  | load through the installed loader; `~` yields   |
//! | `call <side> <method>`   | call a peripheral method                        |
//! | `label <text>`           | set the computer label                          |
//! | `panic <message>`        | panic the computer thread                       |
//!
//! A line starting with `!` is a syntax error when the chunk is loaded.

use crate::bridge::{BlockingLoader, ChunkParser, ChunkSupplier, LoadOperation, LoadStep, Loader, SourceParser, SupplierStep};
use crate::computer::Computer;
use crate::error::{LoadError, ScriptError};
use crate::event::Event;
use crate::script::{Coroutine, Hook, HookControl, HookTarget, Resumed, ScriptEngine, ScriptState};
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Transcript key used before a state is bound to a computer
const UNBOUND: u32 = u32::MAX;

type Transcripts = Arc<Mutex<FxHashMap<u32, Vec<String>>>>;

/// Engine for line-oriented test programs
pub struct ScriptedEngine {
    transcripts: Transcripts,
    parser: Arc<dyn ChunkParser>,
}

impl ScriptedEngine {
    /// Create an engine with empty transcripts
    pub fn new() -> Self {
        Self {
            transcripts: Arc::new(Mutex::new(FxHashMap::default())),
            parser: Arc::new(SourceParser),
        }
    }

    /// Everything computer `id` has logged so far, across boots
    pub fn transcript(&self, id: u32) -> Vec<String> {
        self.transcripts
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for ScriptedEngine {
    fn new_state(&self) -> Result<Box<dyn ScriptState>, ScriptError> {
        Ok(Box::new(ScriptedState {
            transcripts: self.transcripts.clone(),
            computer: None,
            globals: FxHashMap::default(),
            hidden: Vec::new(),
            libraries: Vec::new(),
            hooks: FxHashMap::default(),
            loader: Arc::new(BlockingLoader::new(self.parser.clone())),
            coroutines: Vec::new(),
        }))
    }

    fn parser(&self) -> Arc<dyn ChunkParser> {
        self.parser.clone()
    }
}

struct PendingLoad {
    name: String,
    operation: Box<dyn LoadOperation>,
}

#[derive(Default)]
struct Program {
    name: String,
    lines: Vec<String>,
    pc: usize,
    awaiting_event: bool,
    pending: Option<PendingLoad>,
}

/// Reader function fed from a fixed list of pieces.
///
/// `~` suspends the reader; `!` makes it fail.
struct PieceSupplier {
    pieces: VecDeque<String>,
}

impl ChunkSupplier for PieceSupplier {
    fn resume(&mut self, _args: Vec<Value>) -> SupplierStep {
        match self.pieces.pop_front() {
            Some(piece) if piece == "~" => SupplierStep::Yielded(Vec::new()),
            Some(piece) if piece == "!" => SupplierStep::Failed("reader failed".to_string()),
            Some(piece) => SupplierStep::Returned(Value::Str(piece)),
            None => SupplierStep::Returned(Value::Nil),
        }
    }
}

/// Interpreter state of the scripted engine
pub struct ScriptedState {
    transcripts: Transcripts,
    computer: Option<Arc<Computer>>,
    globals: FxHashMap<String, Value>,
    hidden: Vec<String>,
    libraries: Vec<(String, Vec<String>)>,
    hooks: FxHashMap<HookTarget, Hook>,
    loader: Arc<dyn Loader>,
    coroutines: Vec<Option<Program>>,
}

impl ScriptedState {
    fn log(&self, line: impl Into<String>) {
        let id = self.computer.as_ref().map_or(UNBOUND, |c| c.id());
        self.transcripts
            .lock()
            .entry(id)
            .or_default()
            .push(line.into());
    }

    fn computer(&self) -> Result<Arc<Computer>, ScriptError> {
        self.computer
            .clone()
            .ok_or_else(|| ScriptError::Runtime("no computer bound to this state".to_string()))
    }

    fn finish_load(&self, name: &str, result: Result<Value, LoadError>) {
        match result {
            Ok(Value::Function(chunk)) => {
                self.log(format!("loaded {}: {}", name, String::from_utf8_lossy(&chunk.source)))
            }
            Ok(other) => self.log(format!("loaded {}: {}", name, other)),
            Err(err) => self.log(format!("load failed {}: {}", name, err)),
        }
    }

    fn run(&mut self, program: &mut Program, args: Vec<Value>) -> Result<Resumed, ScriptError> {
        if let Some(mut pending) = program.pending.take() {
            match pending.operation.step(args) {
                LoadStep::Yielded(values) => {
                    program.pending = Some(pending);
                    return Ok(Resumed::Yielded(values));
                }
                LoadStep::Done(result) => self.finish_load(&pending.name, result),
            }
        } else if program.awaiting_event {
            program.awaiting_event = false;
            let words: Vec<String> = args.iter().map(Value::to_string).collect();
            self.log(format!("event {}", words.join(" ")));
        }

        while program.pc < program.lines.len() {
            let line_no = program.pc + 1;
            let line = program.lines[program.pc].trim().to_string();
            program.pc += 1;

            let (op, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let rest = rest.trim();
            match op {
                "" => {}
                _ if op.starts_with('#') => {}
                "print" => self.log(rest),
                "yield" => {
                    program.awaiting_event = true;
                    let values = if rest.is_empty() {
                        Vec::new()
                    } else {
                        vec![Value::str(rest)]
                    };
                    return Ok(Resumed::Yielded(values));
                }
                "error" => return Err(ScriptError::Runtime(rest.to_string())),
                "return" => return Ok(Resumed::Finished(Vec::new())),
                "shutdown" => {
                    self.computer()?.shutdown();
                    return Ok(Resumed::Yielded(Vec::new()));
                }
                "reboot" => {
                    self.computer()?.reboot();
                    return Ok(Resumed::Yielded(Vec::new()));
                }
                "breakpoint" => {
                    let (source, line) = rest.rsplit_once(' ').unwrap_or((rest, "0"));
                    let line = line.parse().unwrap_or(0);
                    let computer = self.computer()?;
                    let id = computer.set_breakpoint(source, line, self);
                    self.log(format!("breakpoint {}", id));
                }
                "unbreakpoint" => {
                    let id = rest.parse().unwrap_or(0);
                    let computer = self.computer()?;
                    let cleared = computer.clear_breakpoint(id, self);
                    self.log(format!("unbreakpoint {} {}", id, cleared));
                }
                "hooks" => self.log(format!("hooks {}", self.hooks.len())),
                "timer" => {
                    let ms = rest.parse().unwrap_or(0);
                    let id = self.computer()?.start_timer(Duration::from_millis(ms));
                    self.log(format!("timer {}", id.as_u64()));
                }
                "queue" => self.computer()?.queue_event(Event::new(rest, Vec::new())),
                "global" => {
                    let value = self.globals.get(rest).cloned().unwrap_or_default();
                    self.log(format!("global {} = {}", rest, value));
                }
                "hidden" => {
                    let hidden = self.hidden.iter().any(|h| h == rest);
                    self.log(format!("hidden {} {}", rest, hidden));
                }
                "libraries" => {
                    let names: Vec<&str> = self.libraries.iter().map(|(n, _)| n.as_str()).collect();
                    self.log(format!("libraries {}", names.join(",")));
                }
                "surfaces" => {
                    let surfaces = self
                        .libraries
                        .iter()
                        .find(|(n, _)| n == rest)
                        .map(|(_, s)| s.join(","));
                    match surfaces {
                        Some(surfaces) => self.log(format!("surfaces {} {}", rest, surfaces)),
                        None => self.log(format!("surfaces {} missing", rest)),
                    }
                }
                "load" => {
                    let mut words = rest.split_whitespace();
                    let name = words.next().unwrap_or("=load").to_string();
                    let supplier = PieceSupplier {
                        pieces: words.map(str::to_string).collect(),
                    };
                    let mut operation = self.loader.start(Box::new(supplier), &name);
                    match operation.step(Vec::new()) {
                        LoadStep::Yielded(values) => {
                            program.pending = Some(PendingLoad { name, operation });
                            return Ok(Resumed::Yielded(values));
                        }
                        LoadStep::Done(result) => self.finish_load(&name, result),
                    }
                }
                "call" => {
                    let mut words = rest.split_whitespace();
                    let side = words.next().unwrap_or("");
                    let method = words.next().unwrap_or("");
                    let args: Vec<Value> = words.map(Value::str).collect();
                    match self.computer()?.call_peripheral(side, method, args) {
                        Ok(values) => {
                            let words: Vec<String> = values.iter().map(Value::to_string).collect();
                            self.log(format!("call {}.{} -> {}", side, method, words.join(" ")));
                        }
                        Err(err) => self.log(format!("call {}.{} failed: {}", side, method, err)),
                    }
                }
                "label" => self.computer()?.set_label(Some(rest.to_string())),
                "panic" => panic!("{}", rest),
                other => {
                    return Err(ScriptError::Runtime(format!(
                        "{}:{}: unknown instruction '{}'",
                        program.name, line_no, other
                    )))
                }
            }
        }
        Ok(Resumed::Finished(Vec::new()))
    }
}

impl HookControl for ScriptedState {
    fn set_hook(&mut self, target: HookTarget, hook: Option<Hook>) {
        match hook {
            Some(hook) => {
                self.hooks.insert(target, hook);
            }
            None => {
                self.hooks.remove(&target);
            }
        }
    }
}

impl ScriptState for ScriptedState {
    fn create_coroutine(&mut self) -> Result<Coroutine, ScriptError> {
        self.coroutines.push(None);
        Ok(Coroutine(self.coroutines.len() as u32 - 1))
    }

    fn open_base_library(&mut self, hidden: &[&str]) {
        self.hidden = hidden.iter().map(|h| h.to_string()).collect();
    }

    fn open_library(&mut self, name: &str, surfaces: &[&str]) {
        self.libraries.push((
            name.to_string(),
            surfaces.iter().map(|s| s.to_string()).collect(),
        ));
    }

    fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_string(), value);
    }

    fn bind_computer(&mut self, computer: Arc<Computer>) {
        self.computer = Some(computer);
    }

    fn set_loader(&mut self, loader: Arc<dyn Loader>) {
        self.loader = loader;
    }

    fn load(&mut self, co: Coroutine, source: &[u8], chunk_name: &str) -> Result<(), ScriptError> {
        let display = chunk_name.trim_start_matches('@');
        let text = std::str::from_utf8(source)
            .map_err(|_| ScriptError::Runtime(format!("{}: invalid UTF-8 in source", display)))?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        if let Some(bad) = lines.iter().position(|l| l.trim_start().starts_with('!')) {
            return Err(ScriptError::Runtime(format!(
                "{}:{}: unexpected symbol",
                display,
                bad + 1
            )));
        }
        let slot = self
            .coroutines
            .get_mut(co.0 as usize)
            .ok_or_else(|| ScriptError::Runtime("no such coroutine".to_string()))?;
        *slot = Some(Program {
            name: display.to_string(),
            lines,
            ..Program::default()
        });
        Ok(())
    }

    fn resume(&mut self, co: Coroutine, args: Vec<Value>) -> Result<Resumed, ScriptError> {
        let index = co.0 as usize;
        let mut program = self
            .coroutines
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| ScriptError::Runtime("cannot resume dead coroutine".to_string()))?;
        let result = self.run(&mut program, args);
        if matches!(result, Ok(Resumed::Yielded(_))) {
            self.coroutines[index] = Some(program);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::YieldableLoader;

    fn state(engine: &ScriptedEngine) -> Box<dyn ScriptState> {
        engine.new_state().unwrap()
    }

    fn run(state: &mut dyn ScriptState, source: &str) -> (Coroutine, Result<Resumed, ScriptError>) {
        let co = state.create_coroutine().unwrap();
        state.load(co, source.as_bytes(), "@test").unwrap();
        let result = state.resume(co, Vec::new());
        (co, result)
    }

    #[test]
    fn test_print_and_finish() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        let (_, result) = run(state.as_mut(), "print hello\n# comment\nprint world\n");
        assert_eq!(result, Ok(Resumed::Finished(vec![])));
        assert_eq!(engine.transcript(UNBOUND), vec!["hello", "world"]);
    }

    #[test]
    fn test_yield_with_filter_and_event_log() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        let (co, result) = run(state.as_mut(), "yield key\nprint after\n");
        assert_eq!(result, Ok(Resumed::Yielded(vec![Value::str("key")])));

        let result = state.resume(co, vec![Value::str("key"), Value::Integer(28)]);
        assert_eq!(result, Ok(Resumed::Finished(vec![])));
        assert_eq!(engine.transcript(UNBOUND), vec!["event key 28", "after"]);

        // A finished coroutine cannot be resumed again
        assert!(state.resume(co, vec![]).is_err());
    }

    #[test]
    fn test_error_and_unknown_instruction() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        let (_, result) = run(state.as_mut(), "error boom\n");
        assert_eq!(result, Err(ScriptError::Runtime("boom".to_string())));

        let (_, result) = run(state.as_mut(), "print ok\nfrobnicate\n");
        assert_eq!(
            result,
            Err(ScriptError::Runtime("test:2: unknown instruction 'frobnicate'".to_string()))
        );
    }

    #[test]
    fn test_syntax_error_on_load() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        let co = state.create_coroutine().unwrap();
        let err = state
            .load(co, b"print a\n!oops\n", "@bios.lua")
            .unwrap_err();
        assert_eq!(err, ScriptError::Runtime("bios.lua:2: unexpected symbol".to_string()));
    }

    #[test]
    fn test_blocking_load_rejects_yield() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        let (_, result) = run(state.as_mut(), "load a x y\nload b x ~ y\n");
        assert_eq!(result, Ok(Resumed::Finished(vec![])));
        assert_eq!(
            engine.transcript(UNBOUND),
            vec![
                "loaded a: xy".to_string(),
                "load failed b: attempt to yield across a C-call boundary".to_string(),
            ]
        );
    }

    #[test]
    fn test_yieldable_load_suspends_program() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        state.set_loader(Arc::new(YieldableLoader::new(engine.parser())));

        let (co, result) = run(state.as_mut(), "load chunk ab ~ cd ~ ef\nprint done\n");
        assert_eq!(result, Ok(Resumed::Yielded(vec![])));
        assert_eq!(
            state.resume(co, vec![Value::str("tick")]),
            Ok(Resumed::Yielded(vec![]))
        );
        assert_eq!(
            state.resume(co, vec![Value::str("tick")]),
            Ok(Resumed::Finished(vec![]))
        );
        assert_eq!(engine.transcript(UNBOUND), vec!["loaded chunk: abcdef", "done"]);
    }

    #[test]
    fn test_globals_libraries_and_hooks() {
        let engine = ScriptedEngine::new();
        let mut state = state(&engine);
        state.set_global("_HOST", Value::str("Tinkerbox"));
        state.open_base_library(&["print"]);
        state.open_library("os", &["startTimer", "queueEvent"]);
        state.set_hook(
            HookTarget::Main,
            Some(Hook {
                mask: 1,
                count: 0,
            }),
        );

        let (_, result) = run(
            state.as_mut(),
            "global _HOST\nglobal missing\nhidden print\nlibraries\nsurfaces os\nsurfaces fs\nhooks\n",
        );
        assert!(result.is_ok());
        assert_eq!(
            engine.transcript(UNBOUND),
            vec![
                "global _HOST = Tinkerbox",
                "global missing = nil",
                "hidden print true",
                "libraries os",
                "surfaces os startTimer,queueEvent",
                "surfaces fs missing",
                "hooks 1",
            ]
        );
    }
}
