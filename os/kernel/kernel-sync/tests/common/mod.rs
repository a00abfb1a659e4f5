#![allow(dead_code)]

use kernel_sync::{
    InterruptGate, InterruptState, OracleError, Priority, ProcessId, ProcessOracle, ProcessState,
};
use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

thread_local! {
    /// The process "running" on this thread.
    static CURRENT: Cell<u32> = const { Cell::new(0) };
}

type YieldHook<'a> = Box<dyn FnOnce(&TableOracle<'a>) + Send + 'a>;

#[derive(Copy, Clone)]
struct Entry {
    state: ProcessState,
    priority: Priority,
}

/// An in-memory process table.
///
/// Each test thread plays one process (see [`TableOracle::switch_to`]).
/// Hooks queued with [`TableOracle::on_yield`] run on the next yields, which
/// is how single-threaded tests let the holder act while a waiter spins.
pub struct TableOracle<'a> {
    processes: Mutex<HashMap<u32, Entry>>,
    yields: AtomicUsize,
    yield_limit: Option<usize>,
    hooks: Mutex<VecDeque<YieldHook<'a>>>,
}

impl<'a> TableOracle<'a> {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            yields: AtomicUsize::new(0),
            yield_limit: None,
            hooks: Mutex::new(VecDeque::new()),
        }
    }

    /// Panics once a waiter has yielded more than `limit` times.
    pub fn with_yield_limit(mut self, limit: usize) -> Self {
        self.yield_limit = Some(limit);
        self
    }

    pub fn spawn(&self, pid: u32, priority: u8) -> ProcessId {
        let id = ProcessId::new(pid).expect("non-zero pid");
        self.processes.lock().unwrap().insert(
            pid,
            Entry {
                state: ProcessState::Running,
                priority: Priority::new(priority),
            },
        );
        id
    }

    pub fn switch_to(&self, pid: ProcessId) {
        CURRENT.with(|c| c.set(pid.as_u32()));
    }

    pub fn switch_to_nobody(&self) {
        CURRENT.with(|c| c.set(0));
    }

    pub fn set_state(&self, pid: ProcessId, state: ProcessState) {
        self.processes
            .lock()
            .unwrap()
            .get_mut(&pid.as_u32())
            .expect("known pid")
            .state = state;
    }

    pub fn kill(&self, pid: ProcessId) {
        self.processes.lock().unwrap().remove(&pid.as_u32());
    }

    pub fn priority_of(&self, pid: ProcessId) -> u8 {
        self.processes.lock().unwrap()[&pid.as_u32()].priority.level()
    }

    pub fn yields(&self) -> usize {
        self.yields.load(Ordering::SeqCst)
    }

    pub fn on_yield(&self, hook: impl FnOnce(&TableOracle<'a>) + Send + 'a) {
        self.hooks.lock().unwrap().push_back(Box::new(hook));
    }

    fn entry(&self, pid: ProcessId) -> Result<Entry, OracleError> {
        self.processes
            .lock()
            .unwrap()
            .get(&pid.as_u32())
            .copied()
            .ok_or(OracleError::NoSuchProcess(pid))
    }
}

impl ProcessOracle for TableOracle<'_> {
    fn current_process_id(&self) -> Result<ProcessId, OracleError> {
        ProcessId::new(CURRENT.with(Cell::get)).ok_or(OracleError::NoProcess)
    }

    fn priority(&self, pid: ProcessId) -> Result<Priority, OracleError> {
        self.entry(pid).map(|e| e.priority)
    }

    fn set_priority(&self, pid: ProcessId, priority: Priority) -> Result<(), OracleError> {
        let mut table = self.processes.lock().unwrap();
        let entry = table
            .get_mut(&pid.as_u32())
            .ok_or(OracleError::NoSuchProcess(pid))?;
        entry.priority = priority;
        Ok(())
    }

    fn state(&self, pid: ProcessId) -> Result<ProcessState, OracleError> {
        self.entry(pid).map(|e| e.state)
    }

    fn yield_now(&self) {
        let n = self.yields.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.yield_limit {
            assert!(n <= limit, "waiter yielded {n} times");
        }
        let hook = self.hooks.lock().unwrap().pop_front();
        match hook {
            Some(hook) => hook(self),
            None => std::thread::yield_now(),
        }
    }
}

/// Interrupt gate that records how it is used.
#[derive(Default)]
pub struct RecordingGate {
    pub disables: AtomicUsize,
    pub masked: AtomicBool,
    pub in_handler: AtomicBool,
}

impl InterruptGate for RecordingGate {
    fn disable(&self) -> InterruptState {
        self.disables.fetch_add(1, Ordering::SeqCst);
        InterruptState::new(!self.masked.swap(true, Ordering::SeqCst))
    }

    fn restore(&self, state: InterruptState) {
        if state.were_enabled() {
            self.masked.store(false, Ordering::SeqCst);
        }
    }

    fn in_interrupt_handler(&self) -> bool {
        self.in_handler.load(Ordering::SeqCst)
    }
}
