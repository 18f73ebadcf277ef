//! Shared debug session state
//!
//! One [`Session`] lives for the whole console run. The inbound dispatcher
//! writes into it as agent messages arrive and operator commands read from it
//! on their own thread. Every field sits behind a single mutex so compound
//! reads (current breakpoint plus its thread) never observe a half-applied
//! update.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use topics_protocol::LocalVar;
use topics_utils::{Result, TopicsError};

/// Resumable thread handle reported by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub id: i64,
    pub name: String,
}

/// A thread suspended at a breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointEvent {
    pub breakpoint_id: i32,
    pub class_name: String,
    pub line: i32,
    pub thread: ThreadRef,
    /// Innermost first
    pub frames: Vec<String>,
    pub locals: Vec<LocalVar>,
}

/// A breakpoint installed in the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointHandle {
    pub id: i32,
    pub class_name: String,
    pub line: i32,
}

impl BreakpointHandle {
    /// Key under which the session stores this breakpoint
    pub fn key(&self) -> String {
        breakpoint_key(&self.class_name, self.line)
    }
}

pub fn breakpoint_key(class_name: &str, line: i32) -> String {
    format!("{}:{}", class_name, line)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodReturn {
    pub location: String,
    pub value: String,
}

/// Summary of the last instrumentation response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationRecord {
    pub class_len: usize,
    pub method_name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionStateError {
    #[error("no breakpoint is currently hit")]
    NoBreakpoint,

    #[error("no agent attached")]
    NotAttached,

    #[error("agent detached while waiting")]
    Detached,

    #[error("session is shutting down")]
    ShuttingDown,

    #[error("timed out waiting for a breakpoint")]
    Timeout,
}

impl From<SessionStateError> for TopicsError {
    fn from(e: SessionStateError) -> Self {
        TopicsError::session_state(e.to_string())
    }
}

/// Callback invoked for every breakpoint hit
pub type BreakpointListener = Arc<dyn Fn(&BreakpointEvent) + Send + Sync>;

/// Callback invoked for every traced method return
pub type ReturnListener = Arc<dyn Fn(&MethodReturn) + Send + Sync>;

/// Maps fully qualified class names to source files
#[derive(Debug, Default, Clone)]
pub struct SourceIndex {
    files: HashMap<String, PathBuf>,
}

impl SourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every `.java` file under `root`
    ///
    /// `root/a/b/C.java` is stored as `a.b.C`. Returns the number of files
    /// added; later roots override earlier ones for the same class.
    pub fn add_root(&mut self, root: &Path) -> Result<usize> {
        if !root.is_dir() {
            return Err(TopicsError::FileRead {
                path: root.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "source root is not a directory",
                ),
            });
        }

        let mut added = 0;
        for entry in WalkDir::new(root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable source entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("java") {
                continue;
            }

            let Ok(rel) = path.strip_prefix(root) else {
                continue;
            };
            if let Some(class_name) = class_name_for(rel) {
                self.files.insert(class_name, path.to_path_buf());
                added += 1;
            }
        }

        debug!(root = %root.display(), added, "indexed source root");
        Ok(added)
    }

    pub fn get(&self, class_name: &str) -> Option<&Path> {
        self.files.get(class_name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn class_name_for(rel: &Path) -> Option<String> {
    let stem = rel.with_extension("");
    let parts: Vec<&str> = stem
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("."))
}

/// Render `line - radius ..= line + radius` of `path`, marking `line` with `>`
pub fn render_source_lines(path: &Path, line: i32, radius: u32) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), "cannot read source: {}", e);
            return None;
        }
    };

    let radius = i64::from(radius);
    let target = i64::from(line);
    let first = (target - radius).max(1);
    let last = target + radius;

    let mut out = Vec::new();
    for (idx, text) in content.lines().enumerate() {
        let n = idx as i64 + 1;
        if n < first {
            continue;
        }
        if n > last {
            break;
        }
        let marker = if n == target { '>' } else { ' ' };
        out.push(format!("{}{:>5} {}", marker, n, text));
    }

    if out.is_empty() {
        None
    } else {
        Some(out.join("\n"))
    }
}

struct SessionInner {
    pid: Option<i32>,
    current_type: Option<String>,
    breakpoints: BTreeMap<String, BreakpointHandle>,
    current: Option<BreakpointEvent>,
    /// Every thread reported stopped and not yet resumed, by id
    suspended: BTreeMap<i64, ThreadRef>,
    frame_history: VecDeque<Vec<String>>,
    returns: VecDeque<MethodReturn>,
    last_instrumentation: Option<InstrumentationRecord>,
    sources: SourceIndex,
    /// Bumped by every `clear`, lets waiters notice a detach
    detach_epoch: u64,
    shut_down: bool,
}

impl SessionInner {
    fn new() -> Self {
        Self {
            pid: None,
            current_type: None,
            breakpoints: BTreeMap::new(),
            current: None,
            suspended: BTreeMap::new(),
            frame_history: VecDeque::new(),
            returns: VecDeque::new(),
            last_instrumentation: None,
            sources: SourceIndex::new(),
            detach_epoch: 0,
            shut_down: false,
        }
    }
}

/// The console's debug state
pub struct Session {
    inner: Mutex<SessionInner>,
    hit: Condvar,
    listeners: Mutex<Vec<BreakpointListener>>,
    return_listeners: Mutex<Vec<ReturnListener>>,
    history_limit: usize,
}

impl Session {
    pub fn new(history_limit: usize) -> Self {
        Self {
            inner: Mutex::new(SessionInner::new()),
            hit: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
            return_listeners: Mutex::new(Vec::new()),
            history_limit: history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    // === Attachment ===

    pub fn set_pid(&self, pid: i32) {
        self.inner.lock().pid = Some(pid);
        info!(pid, "agent attached");
    }

    pub fn pid(&self) -> Option<i32> {
        self.inner.lock().pid
    }

    pub fn require_attached(&self) -> std::result::Result<i32, SessionStateError> {
        self.pid().ok_or(SessionStateError::NotAttached)
    }

    pub fn set_current_type(&self, class_name: impl Into<String>) {
        self.inner.lock().current_type = Some(class_name.into());
    }

    pub fn current_type(&self) -> Option<String> {
        self.inner.lock().current_type.clone()
    }

    // === Breakpoint hits ===

    /// Record a hit, wake waiters, then run listeners without holding the lock
    pub fn record_breakpoint_hit(&self, event: BreakpointEvent) {
        {
            let mut inner = self.inner.lock();
            if inner.shut_down {
                return;
            }
            push_bounded(&mut inner.frame_history, event.frames.clone(), self.history_limit);
            inner.suspended.insert(event.thread.id, event.thread.clone());
            if let Some(previous) = inner.current.replace(event.clone()) {
                debug!(
                    thread = previous.thread.id,
                    "replacing unresumed breakpoint hit"
                );
            }
            self.hit.notify_all();
        }

        let listeners: Vec<BreakpointListener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn on_breakpoint_hit(&self, listener: BreakpointListener) {
        self.listeners.lock().push(listener);
    }

    pub fn current_breakpoint(&self) -> Option<BreakpointEvent> {
        self.inner.lock().current.clone()
    }

    pub fn current_with_thread(&self) -> Option<(BreakpointEvent, ThreadRef)> {
        let inner = self.inner.lock();
        inner
            .current
            .as_ref()
            .map(|event| (event.clone(), event.thread.clone()))
    }

    /// Take the current breakpoint so its thread can be resumed
    ///
    /// Exactly one of several concurrent callers gets the event.
    pub fn resume_current(&self) -> std::result::Result<BreakpointEvent, SessionStateError> {
        let mut inner = self.inner.lock();
        let event = inner.current.take().ok_or(SessionStateError::NoBreakpoint)?;
        inner.suspended.remove(&event.thread.id);
        self.hit.notify_all();
        Ok(event)
    }

    /// Put back an event taken by [`Session::resume_current`] whose resume
    /// never reached the agent
    ///
    /// A newer hit recorded in the meantime wins.
    pub fn restore_current(&self, event: BreakpointEvent) {
        let mut inner = self.inner.lock();
        if inner.shut_down || inner.current.is_some() {
            return;
        }
        inner.suspended.insert(event.thread.id, event.thread.clone());
        inner.current = Some(event);
        self.hit.notify_all();
    }

    /// Take the suspended thread called `name` so it can be resumed
    ///
    /// When that thread owns the current breakpoint the event is taken too
    /// and returned alongside it.
    pub fn resume_thread_named(&self, name: &str) -> Option<(ThreadRef, Option<BreakpointEvent>)> {
        let mut inner = self.inner.lock();
        let id = inner
            .suspended
            .values()
            .find(|t| t.name == name)
            .map(|t| t.id)?;
        let thread = inner.suspended.remove(&id)?;
        let event = if inner.current.as_ref().map(|e| e.thread.id) == Some(id) {
            inner.current.take()
        } else {
            None
        };
        self.hit.notify_all();
        Some((thread, event))
    }

    /// Undo [`Session::resume_thread_named`] after the resume failed to send
    pub fn restore_thread(&self, thread: ThreadRef, event: Option<BreakpointEvent>) {
        match event {
            Some(event) => self.restore_current(event),
            None => {
                let mut inner = self.inner.lock();
                if !inner.shut_down {
                    inner.suspended.insert(thread.id, thread);
                }
            }
        }
    }

    /// Threads stopped at a breakpoint, ordered by id
    pub fn suspended_threads(&self) -> Vec<ThreadRef> {
        self.inner.lock().suspended.values().cloned().collect()
    }

    /// Block until a breakpoint is hit
    ///
    /// Returns immediately if one is already current.
    pub fn wait_for_breakpoint(
        &self,
        timeout: Duration,
    ) -> std::result::Result<BreakpointEvent, SessionStateError> {
        // Too far out to represent means no deadline at all
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        let epoch = inner.detach_epoch;

        loop {
            if inner.shut_down {
                return Err(SessionStateError::ShuttingDown);
            }
            if let Some(event) = &inner.current {
                return Ok(event.clone());
            }
            if inner.detach_epoch != epoch {
                return Err(SessionStateError::Detached);
            }
            match deadline {
                Some(deadline) => {
                    if self.hit.wait_until(&mut inner, deadline).timed_out() {
                        return inner.current.clone().ok_or(SessionStateError::Timeout);
                    }
                }
                None => self.hit.wait(&mut inner),
            }
        }
    }

    // === Registered breakpoints ===

    pub fn register_breakpoint(&self, key: impl Into<String>, handle: BreakpointHandle) {
        self.inner.lock().breakpoints.insert(key.into(), handle);
    }

    pub fn remove_breakpoint(&self, key: &str) -> Option<BreakpointHandle> {
        self.inner.lock().breakpoints.remove(key)
    }

    /// Remove every breakpoint matching `predicate` and return them
    pub fn clear_breakpoints<F>(&self, mut predicate: F) -> Vec<(String, BreakpointHandle)>
    where
        F: FnMut(&str, &BreakpointHandle) -> bool,
    {
        let mut inner = self.inner.lock();
        let keys: Vec<String> = inner
            .breakpoints
            .iter()
            .filter(|(k, h)| predicate(k, h))
            .map(|(k, _)| k.clone())
            .collect();

        keys.into_iter()
            .filter_map(|k| inner.breakpoints.remove(&k).map(|h| (k, h)))
            .collect()
    }

    pub fn breakpoints(&self) -> Vec<(String, BreakpointHandle)> {
        self.inner
            .lock()
            .breakpoints
            .iter()
            .map(|(k, h)| (k.clone(), h.clone()))
            .collect()
    }

    pub fn breakpoint_count(&self) -> usize {
        self.inner.lock().breakpoints.len()
    }

    // === Histories ===

    /// Record a return value, then notify listeners without holding the lock
    pub fn record_return(&self, ret: MethodReturn) {
        {
            let mut inner = self.inner.lock();
            if inner.shut_down {
                return;
            }
            push_bounded(&mut inner.returns, ret.clone(), self.history_limit);
        }

        let listeners: Vec<ReturnListener> = self.return_listeners.lock().clone();
        for listener in listeners {
            listener(&ret);
        }
    }

    pub fn on_method_return(&self, listener: ReturnListener) {
        self.return_listeners.lock().push(listener);
    }

    /// Captured stack snapshots, most recent last
    pub fn previous_frames(&self) -> Vec<Vec<String>> {
        self.inner.lock().frame_history.iter().cloned().collect()
    }

    pub fn returns(&self) -> Vec<MethodReturn> {
        self.inner.lock().returns.iter().cloned().collect()
    }

    pub fn record_instrumentation(&self, record: InstrumentationRecord) {
        self.inner.lock().last_instrumentation = Some(record);
    }

    pub fn last_instrumentation(&self) -> Option<InstrumentationRecord> {
        self.inner.lock().last_instrumentation.clone()
    }

    // === Sources ===

    pub fn add_source_root(&self, root: &Path) -> Result<usize> {
        // Walk outside the lock; it touches the filesystem
        let mut index = SourceIndex::new();
        let added = index.add_root(root)?;

        let mut inner = self.inner.lock();
        inner.sources.files.extend(index.files);
        info!(root = %root.display(), added, "added source root");
        Ok(added)
    }

    pub fn source_file(&self, class_name: &str) -> Option<PathBuf> {
        self.inner.lock().sources.get(class_name).map(Path::to_path_buf)
    }

    pub fn source_count(&self) -> usize {
        self.inner.lock().sources.len()
    }

    pub fn lookup_source_line(&self, class_name: &str, line: i32, radius: u32) -> Option<String> {
        let path = self.source_file(class_name)?;
        render_source_lines(&path, line, radius)
    }

    // === Lifecycle ===

    /// Forget everything tied to the agent connection
    ///
    /// The source index survives; it belongs to the operator.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.pid = None;
        inner.current_type = None;
        inner.breakpoints.clear();
        inner.current = None;
        inner.suspended.clear();
        inner.frame_history.clear();
        inner.returns.clear();
        inner.last_instrumentation = None;
        inner.detach_epoch += 1;
        self.hit.notify_all();
        debug!("session cleared");
    }

    /// Mark the session terminal and release every waiter
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shut_down = true;
        inner.current = None;
        self.hit.notify_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.lock().shut_down
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Session")
            .field("pid", &inner.pid)
            .field("current_type", &inner.current_type)
            .field("breakpoints", &inner.breakpoints.len())
            .field("hit", &inner.current.is_some())
            .field("suspended", &inner.suspended.len())
            .finish()
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, limit: usize) {
    while queue.len() >= limit {
        queue.pop_front();
    }
    queue.push_back(item);
}
