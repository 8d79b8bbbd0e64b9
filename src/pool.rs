use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};
use crossbeam::select;
use tracing::{debug, error, trace};

use super::errors::ScheduleError;

/// An opaque unit of work. The pool never inspects it, it only runs it.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Capacity substituted when a caller asks for a zero-sized pool.
pub const DEFAULT_CAPACITY: usize = 100;
/// Hard ceiling on pool capacity; larger requests are clamped down to it.
pub const MAX_CAPACITY: usize = 10_000;

/// Pool construction options.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Spawn all workers up front instead of on demand.
    pub pre_alloc: bool,
    /// Make `schedule` wait for a free worker instead of rejecting.
    pub block: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pre_alloc: false,
            block: true,
        }
    }
}

/// Fixed-capacity worker pool over OS threads.
///
/// Tasks are handed to workers through a rendezvous channel, so a submission
/// succeeds only when some worker actually takes the task. A bounded slot
/// channel acts as a semaphore that caps how many workers exist at once;
/// every worker holds one slot for its whole lifetime.
pub struct Pool {
    capacity: usize,
    pre_alloc: bool,
    block: bool,
    /// Rendezvous point between submitters and idle workers.
    tasks_tx: Sender<Task>,
    /// Never receives a message; disconnection is the shutdown broadcast.
    quit_rx: Receiver<()>,
    /// One-shot shutdown request consumed by the supervisor.
    shutdown_tx: Sender<()>,
    /// Disconnects once the supervisor and every worker are gone.
    alive_rx: Receiver<()>,
}

impl Pool {
    /// Creates a pool with the default options (lazy workers, blocking
    /// submission).
    pub fn new(capacity: usize) -> Pool {
        Self::with_config(capacity, Config::default())
    }

    /// Creates a pool, clamping `capacity` into the supported range.
    pub fn with_config(capacity: usize, config: Config) -> Pool {
        let capacity = match capacity {
            0 => DEFAULT_CAPACITY,
            c if c > MAX_CAPACITY => MAX_CAPACITY,
            c => c,
        };

        let (tasks_tx, tasks_rx) = channel::bounded::<Task>(0);
        let (quit_tx, quit_rx) = channel::bounded::<()>(0);
        let (active_tx, active_rx) = channel::bounded::<()>(capacity);
        let (alive_tx, alive_rx) = channel::bounded::<()>(0);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);

        let worker_ch = WorkerChannels {
            tasks_rx,
            quit_rx: quit_rx.clone(),
            active_rx,
            alive: alive_tx,
        };

        debug!(
            capacity,
            pre_alloc = config.pre_alloc,
            block = config.block,
            "worker pool starting"
        );

        let mut next_seq = 0;
        if config.pre_alloc {
            for _ in 0..capacity {
                active_tx
                    .send(())
                    .expect("slot channel holds exactly `capacity` permits");
                next_seq += 1;
                spawn_worker(next_seq, None, worker_ch.clone());
            }
        }

        let supervisor = Supervisor {
            tasks_tx: tasks_tx.clone(),
            active_tx,
            shutdown_rx,
            quit_tx,
            worker_ch,
            next_seq,
            pre_alloc: config.pre_alloc,
        };
        thread::Builder::new()
            .name("workerpool-supervisor".into())
            .spawn(move || supervisor.run())
            .expect("failed to spawn supervisor thread");

        Pool {
            capacity,
            pre_alloc: config.pre_alloc,
            block: config.block,
            tasks_tx,
            quit_rx,
            shutdown_tx,
            alive_rx,
        }
    }

    /// Effective capacity after clamping.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a saturated `schedule` waits instead of rejecting.
    pub fn is_blocking(&self) -> bool {
        self.block
    }

    /// Submits a task for execution.
    ///
    /// Returns as soon as a worker (or, before the pool is saturated, the
    /// supervisor) has taken the task. With `block = false` a saturated pool
    /// answers [`ScheduleError::NoIdleWorker`] immediately; with
    /// `block = true` the call waits until a worker frees up or the pool is
    /// freed underneath it.
    pub fn schedule<F>(&self, task: F) -> Result<(), ScheduleError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task: Task = Box::new(task);

        if self.is_freed() {
            return Err(ScheduleError::PoolFreed);
        }

        match self.tasks_tx.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(ScheduleError::PoolFreed),
            Err(TrySendError::Full(task)) => {
                if self.block {
                    select! {
                        recv(self.quit_rx) -> _ => Err(ScheduleError::PoolFreed),
                        send(self.tasks_tx, task) -> res => {
                            res.map_err(|_| ScheduleError::PoolFreed)
                        }
                    }
                } else {
                    Err(ScheduleError::NoIdleWorker)
                }
            }
        }
    }

    /// Shuts the pool down and waits for in-flight tasks to finish.
    ///
    /// Safe to call more than once and from several threads; every call
    /// returns only after the drain is complete.
    pub fn free(&self) {
        // A full buffer or a gone supervisor both mean shutdown is already
        // under way, so the send result does not matter.
        let _ = self.shutdown_tx.try_send(());
        // Blocks until the last alive handle is dropped.
        let _ = self.alive_rx.recv();
        debug!(pre_alloc = self.pre_alloc, "worker pool freed");
    }

    fn is_freed(&self) -> bool {
        matches!(self.quit_rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Channel endpoints a worker keeps for its whole lifetime.
#[derive(Clone)]
struct WorkerChannels {
    tasks_rx: Receiver<Task>,
    quit_rx: Receiver<()>,
    active_rx: Receiver<()>,
    /// Never sent on. Dropping it deregisters the holder from the drain.
    alive: Sender<()>,
}

/// Gives the worker's slot back when dropped, whatever the exit path.
struct SlotGuard(Receiver<()>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.0.try_recv();
    }
}

fn spawn_worker(seq: usize, initial: Option<Task>, ch: WorkerChannels) {
    thread::Builder::new()
        .name(format!("workerpool-worker-{seq}"))
        .spawn(move || worker_loop(seq, initial, ch))
        .expect("failed to spawn worker thread");
}

fn worker_loop(seq: usize, initial: Option<Task>, ch: WorkerChannels) {
    debug!(worker = seq, "worker started");
    let _slot = SlotGuard(ch.active_rx.clone());
    let mut faulted = false;

    if let Some(task) = initial {
        faulted = run_task(seq, task);
    }

    while !faulted {
        select! {
            // Nothing is ever sent on quit; this arm fires on disconnect,
            // which is the shutdown broadcast.
            recv(ch.quit_rx) -> _ => break,
            recv(ch.tasks_rx) -> task => {
                match task {
                    Ok(task) => faulted = run_task(seq, task),
                    Err(_) => break,
                }
            }
        }
    }

    debug!(worker = seq, faulted, "worker exited");
}

/// Runs one task under a fault boundary. Returns true if it panicked.
fn run_task(seq: usize, task: Task) -> bool {
    trace!(worker = seq, "task received");
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => false,
        Err(payload) => {
            error!(
                worker = seq,
                cause = panic_message(payload.as_ref()),
                "task panicked, retiring worker"
            );
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Owns worker provisioning. Lives on its own thread from pool construction
/// until shutdown; dropping its fields on exit is what disconnects the quit
/// channel and, together with the workers, the alive channel.
struct Supervisor {
    tasks_tx: Sender<Task>,
    active_tx: Sender<()>,
    shutdown_rx: Receiver<()>,
    quit_tx: Sender<()>,
    worker_ch: WorkerChannels,
    next_seq: usize,
    pre_alloc: bool,
}

impl Supervisor {
    fn run(mut self) {
        if self.pre_alloc || self.ramp_up() {
            self.supervise();
        }
        debug!(spawned = self.next_seq, "supervisor exiting");
        // Dropping self raises the quit broadcast (quit_tx) and releases
        // this thread's alive handle (worker_ch.alive).
    }

    /// Lazy ramp-up: consume submissions only to decide provisioning, and
    /// hand every consumed task onward exactly once, as the initial task of
    /// the worker it triggered. Returns false if shutdown was requested.
    fn ramp_up(&mut self) -> bool {
        loop {
            select! {
                recv(self.shutdown_rx) -> _ => return false,
                recv(self.worker_ch.tasks_rx) -> task => {
                    let Ok(task) = task else { return false };
                    match self.active_tx.try_send(()) {
                        Ok(()) => self.spawn(Some(task)),
                        // All slots taken: the pool is fully ramped up. Pass
                        // the task on and switch to supervising.
                        Err(TrySendError::Full(())) => return self.forward(task),
                        Err(TrySendError::Disconnected(())) => return false,
                    }
                }
            }
        }
    }

    /// Delivers the task consumed by the last ramp-up step to a worker. If a
    /// slot frees up first (a worker died), a replacement takes the task
    /// instead. Returns false if shutdown won the race; the task is dropped
    /// then, the same as any task caught in pool destruction.
    fn forward(&mut self, task: Task) -> bool {
        select! {
            recv(self.shutdown_rx) -> _ => false,
            send(self.tasks_tx, task) -> res => res.is_ok(),
            send(self.active_tx, ()) -> res => {
                if res.is_err() {
                    return false;
                }
                if self.shutdown_requested() {
                    let _ = self.worker_ch.active_rx.try_recv();
                    return false;
                }
                self.spawn(Some(task));
                true
            }
        }
    }

    /// Keeps the slot channel full: every slot released by a dying worker is
    /// reclaimed and a replacement spawned, until shutdown.
    fn supervise(&mut self) {
        loop {
            select! {
                recv(self.shutdown_rx) -> _ => return,
                send(self.active_tx, ()) -> res => {
                    if res.is_err() {
                        return;
                    }
                    // Shutdown may have raced the slot acquisition. Never
                    // spawn once it has been requested.
                    if self.shutdown_requested() {
                        let _ = self.worker_ch.active_rx.try_recv();
                        return;
                    }
                    self.spawn(None);
                }
            }
        }
    }

    fn spawn(&mut self, initial: Option<Task>) {
        self.next_seq += 1;
        spawn_worker(self.next_seq, initial, self.worker_ch.clone());
    }

    fn shutdown_requested(&self) -> bool {
        // Both a pending request and a dropped pool count as shutdown.
        !matches!(self.shutdown_rx.try_recv(), Err(TryRecvError::Empty))
    }
}
