//! Yieldable load
//!
//! The interpreter's parser pulls source text from a reader callback and
//! cannot itself be suspended. When the reader is a script function that
//! wants to yield (to wait for an event, say), the parse has to be parked
//! somewhere while the computer's resume loop goes back to waiting.
//!
//! The parse therefore runs on a dedicated loader thread. Whenever the
//! reader yields, the worker hands the yielded values to the owning thread
//! and blocks until it is sent the values the owner was resumed with. To the
//! owning computer this looks like an ordinary cooperative suspension:
//!
//! ```text
//! owner                               worker
//!   |---- start (spawn) ---------------->|  parse -> reader -> supplier
//!   |<--------------- Yielded(values) ---|  blocks on recv
//!   |  (computer yields, waits for event)|
//!   |---- Resume(values) --------------->|  supplier continues
//!   |<------------- Finished(result) ----|  thread exits
//! ```
//!
//! The round trip strictly alternates: the worker never runs ahead of the
//! owner and vice versa. Abandoning the load sends `Cancel` and joins the
//! worker before anything it touched is released.

use crate::error::LoadError;
use crate::value::{Chunk, Value};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Message from the worker to the owning thread
enum WorkerMsg {
    Yielded(Vec<Value>),
    Finished(Result<Value, LoadError>),
}

/// Message from the owning thread to the worker
enum OwnerMsg {
    Resume(Vec<Value>),
    Cancel,
}

/// One step of the reader function
#[derive(Debug, Clone, PartialEq)]
pub enum SupplierStep {
    /// The reader suspended with these values
    Yielded(Vec<Value>),
    /// The reader returned: a string piece, or nil/empty for end of input
    Returned(Value),
    /// The reader raised an error
    Failed(String),
}

/// The script-side reader function passed to `load`.
///
/// `resume(vec![])` starts a new call for the next piece; after a
/// `Yielded` step, the next `resume` continues that call with the values
/// the suspension was resumed with.
pub trait ChunkSupplier: Send {
    /// Start or continue the reader
    fn resume(&mut self, args: Vec<Value>) -> SupplierStep;
}

/// Source of pieces for a parser
pub trait ChunkReader {
    /// Next piece of source, or `None` at end of input
    fn next_piece(&mut self) -> Result<Option<Vec<u8>>, LoadError>;
}

/// A blocking parser that pulls its input from a reader
pub trait ChunkParser: Send + Sync {
    /// Parse a whole chunk, returning the loaded function value
    fn parse(&self, name: &str, reader: &mut dyn ChunkReader) -> Result<Value, LoadError>;
}

/// Outcome of driving a load one step
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStep {
    /// The reader suspended; yield these values from the calling coroutine
    Yielded(Vec<Value>),
    /// The load finished
    Done(Result<Value, LoadError>),
}

/// An in-progress `load` call
pub trait LoadOperation: Send {
    /// Drive the load. The first call passes no values; every later call
    /// passes the values the calling coroutine was resumed with.
    fn step(&mut self, resumed: Vec<Value>) -> LoadStep;
}

/// The implementation behind the script-visible `load`
pub trait Loader: Send + Sync {
    /// Begin loading from `supplier`
    fn start(&self, supplier: Box<dyn ChunkSupplier>, name: &str) -> Box<dyn LoadOperation>;
}

/// Convert a reader's return value into a piece, following the reader
/// contract: nil or an empty string ends input, numbers are coerced.
fn piece_from(value: Value) -> Result<Option<Vec<u8>>, LoadError> {
    match value {
        Value::Nil => Ok(None),
        Value::Str(s) if s.is_empty() => Ok(None),
        Value::Str(s) => Ok(Some(s.into_bytes())),
        Value::Integer(i) => Ok(Some(i.to_string().into_bytes())),
        Value::Number(n) => Ok(Some(n.to_string().into_bytes())),
        _ => Err(LoadError::Reader("reader function must return a string".to_string())),
    }
}

/// Default parser: reads every piece and keeps the source verbatim
#[derive(Debug, Default)]
pub struct SourceParser;

impl ChunkParser for SourceParser {
    fn parse(&self, name: &str, reader: &mut dyn ChunkReader) -> Result<Value, LoadError> {
        let mut source = Vec::new();
        while let Some(piece) = reader.next_piece()? {
            source.extend_from_slice(&piece);
        }
        Ok(Value::Function(Arc::new(Chunk {
            name: name.to_string(),
            source,
        })))
    }
}

/// Reader that refuses to suspend
struct DirectReader<'a> {
    supplier: &'a mut dyn ChunkSupplier,
}

impl ChunkReader for DirectReader<'_> {
    fn next_piece(&mut self) -> Result<Option<Vec<u8>>, LoadError> {
        match self.supplier.resume(Vec::new()) {
            SupplierStep::Returned(value) => piece_from(value),
            SupplierStep::Failed(message) => Err(LoadError::Reader(message)),
            SupplierStep::Yielded(_) => Err(LoadError::Reader(
                "attempt to yield across a C-call boundary".to_string(),
            )),
        }
    }
}

/// Load on the calling thread. A reader that yields fails the load.
pub fn load_direct(
    parser: &dyn ChunkParser,
    supplier: &mut dyn ChunkSupplier,
    name: &str,
) -> Result<Value, LoadError> {
    parser.parse(name, &mut DirectReader { supplier })
}

/// The default, non-suspending loader
pub struct BlockingLoader {
    parser: Arc<dyn ChunkParser>,
}

impl BlockingLoader {
    /// Create a loader over `parser`
    pub fn new(parser: Arc<dyn ChunkParser>) -> Self {
        Self { parser }
    }
}

struct BlockingLoad {
    parser: Arc<dyn ChunkParser>,
    supplier: Option<Box<dyn ChunkSupplier>>,
    name: String,
}

impl LoadOperation for BlockingLoad {
    fn step(&mut self, _resumed: Vec<Value>) -> LoadStep {
        match self.supplier.take() {
            Some(mut supplier) => {
                LoadStep::Done(load_direct(self.parser.as_ref(), supplier.as_mut(), &self.name))
            }
            None => LoadStep::Done(Err(LoadError::Cancelled)),
        }
    }
}

impl Loader for BlockingLoader {
    fn start(&self, supplier: Box<dyn ChunkSupplier>, name: &str) -> Box<dyn LoadOperation> {
        Box::new(BlockingLoad {
            parser: self.parser.clone(),
            supplier: Some(supplier),
            name: name.to_string(),
        })
    }
}

/// The loader installed in standards mode: every load runs on a worker
/// thread so that its reader may yield
pub struct YieldableLoader {
    parser: Arc<dyn ChunkParser>,
}

impl YieldableLoader {
    /// Create a loader over `parser`
    pub fn new(parser: Arc<dyn ChunkParser>) -> Self {
        Self { parser }
    }
}

impl Loader for YieldableLoader {
    fn start(&self, supplier: Box<dyn ChunkSupplier>, name: &str) -> Box<dyn LoadOperation> {
        Box::new(PendingLoad::start(self.parser.clone(), supplier, name))
    }
}

/// Protocol state of a bridged load, as seen from the owning thread
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BridgeState {
    /// Worker spawned, owner has not waited on it yet
    Idle,
    /// Worker is parsing (or running the reader)
    WorkerRunning,
    /// Worker is parked waiting for resume values
    WorkerYielded,
    /// Worker finished and has been joined
    WorkerDone,
    /// The load was abandoned and the worker joined
    Cancelled,
}

/// Reader used on the worker thread: forwards yields to the owner
struct BridgedReader<'a> {
    supplier: &'a mut dyn ChunkSupplier,
    to_owner: &'a Sender<WorkerMsg>,
    from_owner: &'a Receiver<OwnerMsg>,
    cancelled: bool,
}

impl ChunkReader for BridgedReader<'_> {
    fn next_piece(&mut self) -> Result<Option<Vec<u8>>, LoadError> {
        if self.cancelled {
            return Err(LoadError::Cancelled);
        }
        let mut args = Vec::new();
        loop {
            match self.supplier.resume(std::mem::take(&mut args)) {
                SupplierStep::Returned(value) => return piece_from(value),
                SupplierStep::Failed(message) => return Err(LoadError::Reader(message)),
                SupplierStep::Yielded(values) => {
                    if self.to_owner.send(WorkerMsg::Yielded(values)).is_err() {
                        self.cancelled = true;
                        return Err(LoadError::Cancelled);
                    }
                    match self.from_owner.recv() {
                        Ok(OwnerMsg::Resume(values)) => args = values,
                        Ok(OwnerMsg::Cancel) | Err(_) => {
                            self.cancelled = true;
                            return Err(LoadError::Cancelled);
                        }
                    }
                }
            }
        }
    }
}

fn load_worker(
    parser: Arc<dyn ChunkParser>,
    mut supplier: Box<dyn ChunkSupplier>,
    name: String,
    to_owner: Sender<WorkerMsg>,
    from_owner: Receiver<OwnerMsg>,
) {
    let mut reader = BridgedReader {
        supplier: supplier.as_mut(),
        to_owner: &to_owner,
        from_owner: &from_owner,
        cancelled: false,
    };
    let result = parser.parse(&name, &mut reader);
    if reader.cancelled {
        return;
    }
    // The owner may already be gone; that is a cancellation too
    let _ = to_owner.send(WorkerMsg::Finished(result));
}

/// A load whose parse runs on its own thread
pub struct PendingLoad {
    name: String,
    to_worker: Sender<OwnerMsg>,
    from_worker: Receiver<WorkerMsg>,
    worker: Option<JoinHandle<()>>,
    state: BridgeState,
    round_trips: usize,
}

impl PendingLoad {
    /// Spawn the loader thread for `supplier`
    pub fn start(parser: Arc<dyn ChunkParser>, supplier: Box<dyn ChunkSupplier>, name: &str) -> Self {
        let (to_worker, from_owner) = bounded(1);
        let (to_owner, from_worker) = bounded(1);
        let worker_name = name.to_string();

        let worker = thread::Builder::new()
            .name(format!("Loader Thread: {}", name))
            .spawn(move || load_worker(parser, supplier, worker_name, to_owner, from_owner))
            .expect("Failed to spawn loader thread");

        Self {
            name: name.to_string(),
            to_worker,
            from_worker,
            worker: Some(worker),
            state: BridgeState::Idle,
            round_trips: 0,
        }
    }

    /// Chunk name this load was started with
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current protocol state
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Number of completed yield/resume round trips
    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    /// Has the worker thread been joined?
    pub fn is_joined(&self) -> bool {
        self.worker.is_none()
    }

    /// Drive the load; see [`LoadOperation::step`]
    pub fn step(&mut self, resumed: Vec<Value>) -> LoadStep {
        match self.state {
            BridgeState::Idle => self.state = BridgeState::WorkerRunning,
            BridgeState::WorkerYielded => {
                if self.to_worker.send(OwnerMsg::Resume(resumed)).is_err() {
                    self.join_worker();
                    self.state = BridgeState::Cancelled;
                    return LoadStep::Done(Err(LoadError::Cancelled));
                }
                self.round_trips += 1;
                self.state = BridgeState::WorkerRunning;
            }
            BridgeState::WorkerRunning => {}
            BridgeState::WorkerDone | BridgeState::Cancelled => {
                return LoadStep::Done(Err(LoadError::Cancelled));
            }
        }

        match self.from_worker.recv() {
            Ok(WorkerMsg::Yielded(values)) => {
                self.state = BridgeState::WorkerYielded;
                LoadStep::Yielded(values)
            }
            Ok(WorkerMsg::Finished(result)) => {
                self.join_worker();
                self.state = BridgeState::WorkerDone;
                LoadStep::Done(result)
            }
            Err(_) => {
                // The worker went away without reporting (it panicked)
                self.join_worker();
                self.state = BridgeState::Cancelled;
                LoadStep::Done(Err(LoadError::Cancelled))
            }
        }
    }

    /// Abandon the load. Joins the worker; calling it again does nothing.
    pub fn cancel(&mut self) {
        if self.worker.is_none() {
            return;
        }
        let _ = self.to_worker.send(OwnerMsg::Cancel);
        self.join_worker();
        self.state = BridgeState::Cancelled;
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                eprintln!("Loader thread for {} panicked", self.name);
            }
        }
    }
}

impl LoadOperation for PendingLoad {
    fn step(&mut self, resumed: Vec<Value>) -> LoadStep {
        PendingLoad::step(self, resumed)
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        self.cancel();
    }
}
