//! Job coordination: admission of index requests, the PCH in-flight gate,
//! the single-consumer event loop that serializes dependency commits, and
//! process shutdown. All shared pipeline state lives in [`Inner`], which is
//! handed to every job by `Arc` handle.

use crate::accumulator::{Accumulator, Flusher};
use crate::config::IndexerConfig;
use crate::deps::DependencyRegistry;
use crate::dirty_job::DirtyJob;
use crate::parse_job::ParseJob;
use crate::watch::WatchRegistry;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Instant;
use symdex_clang::SourceParser;
use symdex_core::{paths, DependencyMap, Result, SymdexError};
use symdex_store::{IndexStore, Table};
use tracing::{info, warn};

/// Fired once per job after its completion has been processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEvent {
    pub id: i32,
    pub input: String,
}

pub(crate) enum CoordinatorEvent {
    Dependencies(DependencyMap),
    JobDone { id: i32, input: String },
    Stop,
}

pub(crate) struct CoordinatorState {
    pub indexing: HashSet<String>,
    pub pch_header_error: HashSet<String>,
    pub jobs: HashMap<i32, String>,
    pub last_job_id: i32,
    pub job_counter: u32,
    pub timer_running: bool,
    pub started: Instant,
}

pub(crate) struct Inner {
    pub config: IndexerConfig,
    pub store: Arc<IndexStore>,
    pub parser: Arc<dyn SourceParser>,
    pub accumulator: Arc<Accumulator>,
    pub deps: DependencyRegistry,
    pub watch: WatchRegistry,
    pub state: Mutex<CoordinatorState>,
    pub pch_cond: Condvar,
    pub default_args: RwLock<Vec<String>>,
    pub events_tx: Sender<CoordinatorEvent>,
    pool: rayon::ThreadPool,
    done_tx: Sender<IndexEvent>,
}

impl Inner {
    fn on_job_done(&self, id: i32, input: String) {
        {
            let mut state = self.state.lock();
            state.jobs.remove(&id);
            if state.indexing.remove(&input) {
                self.pch_cond.notify_all();
            }
            state.job_counter += 1;

            let drained = state.jobs.is_empty();
            if drained || state.job_counter >= self.config.sync_interval {
                state.job_counter = 0;
                self.accumulator.notify();
            }
            if drained && state.timer_running {
                state.timer_running = false;
                info!("jobs took {} ms", state.started.elapsed().as_millis());
            }
        }
        let _ = self.done_tx.send(IndexEvent { id, input });
    }

    fn commit_dependencies(&self, delta: DependencyMap) {
        let added = self.deps.commit(&delta);
        if added.is_empty() {
            return;
        }
        self.watch.register(added.keys().cloned());
        self.accumulator.add_dependencies(added);
    }
}

/// Admit one translation unit for indexing. Returns the allocated job id, or
/// -1 when a job for `input` is already in flight.
pub(crate) fn submit(inner: &Arc<Inner>, input: &str, args: &[String]) -> i32 {
    let input = paths::canonical_str(input);
    let id;
    {
        let mut state = inner.state.lock();
        if state.indexing.contains(&input) {
            return -1;
        }
        // Lowest unused id; completed ids become reusable.
        state.last_job_id = 0;
        while state.jobs.contains_key(&state.last_job_id) {
            state.last_job_id += 1;
        }
        id = state.last_job_id;
        state.indexing.insert(input.clone());
        state.jobs.insert(id, input.clone());
        if !state.timer_running {
            state.timer_running = true;
            state.started = Instant::now();
        }
    }

    let job = ParseJob::new(
        id,
        inner.config.storage_path.clone(),
        input,
        args.to_vec(),
    );
    let handle = Arc::clone(inner);
    inner.pool.spawn(move || job.run(&handle));
    id
}

/// Handle a directory change notification: compute the dirty set from the
/// watch registry, fan it out through the dependency registry, recover each
/// affected unit's last argument vector, and hand the result to a dirty job.
pub(crate) fn handle_directory_changed(inner: &Arc<Inner>, dir: &str) {
    let dir = if dir.ends_with('/') {
        dir.to_string()
    } else {
        format!("{dir}/")
    };

    let Some(changed) = inner.watch.scan_changed(&dir) else {
        warn!("directory changed, but not in watched list: {dir}");
        return;
    };
    if changed.is_empty() {
        return;
    }

    let mut dirty: HashSet<String> = HashSet::new();
    let mut to_index: HashMap<String, Vec<String>> = HashMap::new();
    let mut to_index_pch: HashMap<String, Vec<String>> = HashMap::new();

    for file in changed {
        dirty.insert(file.clone());
        let Some(dependents) = inner.deps.dependents(&file) else {
            warn!("file modified but not in dependency list: {file}");
            continue;
        };
        for unit in dependents {
            dirty.insert(unit.clone());
            if !paths::exists(&unit) {
                continue;
            }
            let args: Option<Vec<String>> =
                match inner.store.read(Table::FileInformation, unit.as_bytes()) {
                    Ok(args) => args,
                    Err(e) => {
                        warn!("can't read file information for {unit}: {e}");
                        return;
                    }
                };
            if let Some(args) = args {
                if is_pch_args(&args) {
                    to_index_pch.insert(unit, args);
                } else {
                    to_index.insert(unit, args);
                }
            }
        }
    }

    let job = DirtyJob::new(dirty, to_index_pch, to_index);
    let handle = Arc::clone(inner);
    inner.pool.spawn(move || job.run(&handle));
}

fn is_pch_args(args: &[String]) -> bool {
    let mut next_is_x = false;
    for arg in args {
        if next_is_x {
            return arg == "c++-header" || arg == "c-header";
        }
        if arg == "-x" {
            next_is_x = true;
        }
    }
    false
}

/// The public handle to the indexing pipeline. Dropping it stops the flusher
/// and the event loop; outstanding parse jobs run to completion.
pub struct Indexer {
    inner: Arc<Inner>,
    done_rx: Receiver<IndexEvent>,
    event_thread: Option<JoinHandle<()>>,
    flusher_thread: Option<JoinHandle<()>>,
    watch_thread: Option<JoinHandle<()>>,
}

impl Indexer {
    pub fn new(config: IndexerConfig, parser: Arc<dyn SourceParser>) -> Result<Self> {
        std::fs::create_dir_all(&config.storage_path)?;
        let store = Arc::new(IndexStore::open(&config.storage_path)?);
        let accumulator = Arc::new(Accumulator::new());

        let (events_tx, events_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("symdex-worker-{i}"))
            .build()
            .map_err(|e| SymdexError::Threading(e.to_string()))?;

        let flush_idle = config.flush_idle();
        let inner = Arc::new(Inner {
            config,
            store: store.clone(),
            parser,
            accumulator: accumulator.clone(),
            deps: DependencyRegistry::new(),
            watch: WatchRegistry::new(),
            state: Mutex::new(CoordinatorState {
                indexing: HashSet::new(),
                pch_header_error: HashSet::new(),
                jobs: HashMap::new(),
                last_job_id: 0,
                job_counter: 0,
                timer_running: false,
                started: Instant::now(),
            }),
            pch_cond: Condvar::new(),
            default_args: RwLock::new(Vec::new()),
            events_tx,
            pool,
            done_tx,
        });

        let (fs_tx, fs_rx) = unbounded();
        let watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                let _ = fs_tx.send(event);
            })
            .map_err(|e| SymdexError::Watch(e.to_string()))?;
        inner.watch.attach(watcher);

        let watch_inner = Arc::downgrade(&inner);
        let watch_thread = std::thread::Builder::new()
            .name("symdex-watch".to_string())
            .spawn(move || watch_loop(watch_inner, fs_rx))
            .map_err(|e| SymdexError::Threading(e.to_string()))?;

        let event_inner = inner.clone();
        let event_thread = std::thread::Builder::new()
            .name("symdex-events".to_string())
            .spawn(move || event_loop(event_inner, events_rx))
            .map_err(|e| SymdexError::Threading(e.to_string()))?;

        let flusher_thread = Flusher::spawn(accumulator, store, flush_idle)?;

        Ok(Self {
            inner,
            done_rx,
            event_thread: Some(event_thread),
            flusher_thread: Some(flusher_thread),
            watch_thread: Some(watch_thread),
        })
    }

    /// See [`submit`]. Returns -1 while a job for `input` is in flight.
    pub fn index(&self, input: &str, args: &[String]) -> i32 {
        submit(&self.inner, input, args)
    }

    /// Arguments appended to every job's vector before parsing.
    pub fn set_default_args(&self, args: Vec<String>) {
        *self.inner.default_args.write() = args;
    }

    /// Completion stream; one event per finished job, in completion order.
    pub fn events(&self) -> Receiver<IndexEvent> {
        self.done_rx.clone()
    }

    /// The store this pipeline writes into. The query front end reads
    /// through the same handle; RocksDB only allows one open per database.
    pub fn store(&self) -> Arc<IndexStore> {
        self.inner.store.clone()
    }

    /// Entry point for OS directory-change notifications. Also callable
    /// directly, which is how tests drive invalidation deterministically.
    pub fn directory_changed(&self, dir: &str) {
        handle_directory_changed(&self.inner, dir);
    }
}

impl Drop for Indexer {
    fn drop(&mut self) {
        self.inner.watch.shutdown();
        let _ = self.inner.events_tx.send(CoordinatorEvent::Stop);
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
        self.inner.accumulator.stop();
        if let Some(handle) = self.flusher_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.watch_thread.take() {
            let _ = handle.join();
        }
    }
}

fn event_loop(inner: Arc<Inner>, events: Receiver<CoordinatorEvent>) {
    for event in events.iter() {
        match event {
            CoordinatorEvent::Dependencies(delta) => inner.commit_dependencies(delta),
            CoordinatorEvent::JobDone { id, input } => inner.on_job_done(id, input),
            CoordinatorEvent::Stop => break,
        }
    }
}

fn watch_loop(
    inner: Weak<Inner>,
    events: Receiver<std::result::Result<notify::Event, notify::Error>>,
) {
    while let Ok(event) = events.recv() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            Ok(event) => {
                let mut dirs: BTreeSet<String> = BTreeSet::new();
                for path in &event.paths {
                    dirs.insert(paths::parent_dir(&path.to_string_lossy()));
                }
                for dir in dirs {
                    handle_directory_changed(&inner, &dir);
                }
            }
            Err(e) => warn!("watch error: {e}"),
        }
    }
}
