//! Frame tracking and per-line time aggregation.
//!
//! Instrumented code calls `enter(id)` when a watched routine begins
//! executing. The returned RAII `FrameGuard` closes the frame on any exit
//! path, including unwinding. Between entry and exit, `line(id, lineno)`
//! checkpoints fire each time control reaches a retained line boundary;
//! each one attributes the elapsed time since the previous checkpoint to
//! the line the frame was sitting on.
//!
//! The engine slot is thread-local and exclusive: starting a `Stopwatch`
//! replaces whatever engine was previously installed, so overlapping
//! stopwatches must be finished in last-in-first-out order relative to
//! installation. All bookkeeping runs inline on the traced thread, so a
//! thread only ever observes its own frames; each thread that wants tracing
//! must install its own stopwatch.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Stable identity token for a traced routine, assigned at resolution time.
pub type UnitId = u32;

/// Registry entry for a routine: everything the engine needs to materialize
/// a `CodeUnit` the first time the routine is entered.
struct RegisteredUnit {
    id: UnitId,
    name: &'static str,
    first_line: u32,
    source: &'static str,
}

thread_local! {
    static REGISTRY: RefCell<Vec<RegisteredUnit>> = const { RefCell::new(Vec::new()) };
    /// The exclusive engine slot for this thread.
    static CURRENT: RefCell<Option<Rc<RefCell<EngineState>>>> = const { RefCell::new(None) };
}

/// Make a routine known to the engine: display name, starting line offset,
/// and captured source text (newline-separated, original formatting).
///
/// The rewriter injects one call per instrumented routine at the top of
/// `main`; manual annotations can call it directly. Registering an id twice
/// keeps the first registration.
pub fn register_unit(id: UnitId, name: &'static str, first_line: u32, source: &'static str) {
    REGISTRY.with(|reg| {
        let mut reg = reg.borrow_mut();
        if reg.iter().any(|u| u.id == id) {
            return;
        }
        reg.push(RegisteredUnit {
            id,
            name,
            first_line,
            source,
        });
    });
}

/// Ids of every routine registered on this thread, in registration order.
pub fn registered_units() -> Vec<UnitId> {
    REGISTRY.with(|reg| reg.borrow().iter().map(|u| u.id).collect())
}

/// A traced routine's identity plus its captured source lines and the
/// cumulative per-line durations of every invocation seen so far.
struct CodeUnit {
    id: UnitId,
    name: String,
    first_line: u32,
    lines: Vec<String>,
    times: HashMap<u32, Duration>,
}

impl CodeUnit {
    fn last_line(&self) -> u32 {
        self.first_line + self.lines.len().saturating_sub(1) as u32
    }
}

/// One in-flight invocation's line/timestamp cursor.
struct Frame {
    unit: usize,
    token: u64,
    last_line: u32,
    last_at: Instant,
}

#[derive(Default)]
struct EngineState {
    watched: HashSet<UnitId>,
    /// Discovery order; index is the `Frame::unit` key.
    units: Vec<CodeUnit>,
    /// Open frames, innermost last.
    frames: Vec<Frame>,
    next_token: u64,
}

impl EngineState {
    /// Entry event. Returns a frame token when the routine is watched and
    /// known to the registry, `None` otherwise.
    fn open(&mut self, id: UnitId, line: Option<u32>) -> Option<u64> {
        if !self.watched.contains(&id) {
            return None;
        }
        let unit = self.materialize(id)?;
        // Clamp explicit attach lines into the unit's span so every recorded
        // duration lands on a reportable line.
        let last_line = match line {
            Some(l) => l.clamp(self.units[unit].first_line, self.units[unit].last_line()),
            None => self.units[unit].first_line,
        };
        let token = self.next_token;
        self.next_token += 1;
        self.frames.push(Frame {
            unit,
            token,
            last_line,
            last_at: Instant::now(),
        });
        Some(token)
    }

    /// Look up `id` in the discovery table, consulting the registry on first
    /// contact. Repeat invocations of the same routine share one unit, so
    /// their line times merge into a single table.
    fn materialize(&mut self, id: UnitId) -> Option<usize> {
        if let Some(pos) = self.units.iter().position(|u| u.id == id) {
            return Some(pos);
        }
        REGISTRY.with(|reg| {
            let reg = reg.borrow();
            let entry = reg.iter().find(|u| u.id == id)?;
            self.units.push(CodeUnit {
                id,
                name: entry.name.to_string(),
                first_line: entry.first_line,
                lines: entry.source.lines().map(str::to_string).collect(),
                times: HashMap::new(),
            });
            Some(self.units.len() - 1)
        })
    }

    /// Line-advance event: charge the time since the last checkpoint to the
    /// line the innermost frame was sitting on, then move its cursor.
    fn advance(&mut self, id: UnitId, line: u32) {
        let now = Instant::now();
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        let unit = frame.unit;
        if self.units[unit].id != id {
            return;
        }
        let elapsed = now.saturating_duration_since(frame.last_at);
        *self.units[unit].times.entry(frame.last_line).or_default() += elapsed;
        frame.last_line = line;
        // Re-read the clock so the table update itself is not charged to the
        // next line.
        frame.last_at = Instant::now();
    }

    /// Return event: flush the frame's pending elapsed time and drop it.
    /// A token the engine no longer knows (already flushed by `finish`) is
    /// a no-op.
    fn close(&mut self, token: u64) {
        let Some(pos) = self.frames.iter().rposition(|f| f.token == token) else {
            return;
        };
        while self.frames.len() > pos {
            let frame = self.frames.pop().unwrap();
            self.flush(frame);
        }
    }

    fn flush(&mut self, frame: Frame) {
        let elapsed = Instant::now().saturating_duration_since(frame.last_at);
        *self.units[frame.unit]
            .times
            .entry(frame.last_line)
            .or_default() += elapsed;
    }

    fn build_report(&mut self) -> Report {
        while let Some(frame) = self.frames.pop() {
            self.flush(frame);
        }
        let blocks = self
            .units
            .iter()
            .map(|unit| {
                let indent = common_indent(&unit.lines);
                let mut total = Duration::ZERO;
                let lines = unit
                    .lines
                    .iter()
                    .enumerate()
                    .map(|(i, raw)| {
                        let number = unit.first_line + i as u32;
                        let time = unit.times.get(&number).copied().unwrap_or_default();
                        total += time;
                        LineTiming {
                            number,
                            time,
                            text: dedent(raw.trim_end(), indent),
                        }
                    })
                    .collect();
                UnitBlock {
                    name: unit.name.clone(),
                    lines,
                    total,
                }
            })
            .collect();
        Report { blocks }
    }
}

/// Common leading-whitespace width across non-blank lines.
fn common_indent(lines: &[String]) -> usize {
    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0)
}

fn dedent(line: &str, indent: usize) -> String {
    let strip = line
        .chars()
        .take_while(|c| c.is_whitespace())
        .count()
        .min(indent);
    line.chars().skip(strip).collect()
}

/// Immutable per-routine timing snapshot, produced exactly once by
/// `Stopwatch::finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    /// One block per entered routine, in discovery order.
    pub blocks: Vec<UnitBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitBlock {
    pub name: String,
    pub lines: Vec<LineTiming>,
    /// Sum of the per-line durations.
    pub total: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineTiming {
    pub number: u32,
    pub time: Duration,
    /// Source text, right-trimmed, with the block's common indent stripped.
    pub text: String,
}

/// RAII handle for one frame. Closing is idempotent with respect to
/// `Stopwatch::finish`: a guard outliving its engine is a no-op.
#[must_use = "dropping the guard immediately closes the frame; bind it with `let _frame = ...`"]
pub struct FrameGuard {
    slot: Option<(Weak<RefCell<EngineState>>, u64)>,
}

impl FrameGuard {
    fn disarmed() -> Self {
        Self { slot: None }
    }

    /// Whether this guard actually opened a frame.
    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some((state, token)) = self.slot.take() {
            if let Some(state) = state.upgrade() {
                state.borrow_mut().close(token);
            }
        }
    }
}

/// Entry hook: open a frame for `id` on the currently installed engine.
/// Without a running engine, or for an unwatched id, this is a single
/// thread-local read.
pub fn enter(id: UnitId) -> FrameGuard {
    CURRENT.with(|cur| {
        let slot = cur.borrow();
        match slot.as_ref() {
            Some(state) => {
                let token = state.borrow_mut().open(id, None);
                match token {
                    Some(token) => FrameGuard {
                        slot: Some((Rc::downgrade(state), token)),
                    },
                    None => FrameGuard::disarmed(),
                }
            }
            None => FrameGuard::disarmed(),
        }
    })
}

/// Line-advance hook for the innermost open frame of `id`.
pub fn line(id: UnitId, lineno: u32) {
    CURRENT.with(|cur| {
        if let Some(state) = cur.borrow().as_ref() {
            state.borrow_mut().advance(id, lineno);
        }
    });
}

/// The instrumentation engine: installs itself into the thread's engine
/// slot on `start`, accumulates per-line durations while running, and
/// finalizes into an immutable [`Report`].
pub struct Stopwatch {
    state: Rc<RefCell<EngineState>>,
    report: Option<Report>,
}

impl Stopwatch {
    /// Fix the watched set and install the engine, replacing any engine
    /// previously installed on this thread.
    pub fn start(watched: impl IntoIterator<Item = UnitId>) -> Self {
        let state = Rc::new(RefCell::new(EngineState {
            watched: watched.into_iter().collect(),
            ..EngineState::default()
        }));
        CURRENT.with(|cur| {
            *cur.borrow_mut() = Some(Rc::clone(&state));
        });
        Self {
            state,
            report: None,
        }
    }

    /// Attach to a routine that is already executing: create its first frame
    /// immediately, with the cursor on `lineno`, instead of waiting for a
    /// future entry event.
    pub fn attach(&self, id: UnitId, lineno: u32) -> FrameGuard {
        if self.report.is_some() {
            return FrameGuard::disarmed();
        }
        let token = self.state.borrow_mut().open(id, Some(lineno));
        match token {
            Some(token) => FrameGuard {
                slot: Some((Rc::downgrade(&self.state), token)),
            },
            None => FrameGuard::disarmed(),
        }
    }

    /// Flush every still-open frame, disable the hooks, and build the
    /// report. Calling `finish` twice is a no-op returning the same report.
    pub fn finish(&mut self) -> &Report {
        if self.report.is_none() {
            self.uninstall();
            self.report = Some(self.state.borrow_mut().build_report());
        }
        self.report.as_ref().unwrap()
    }

    /// The report, if `finish` has run.
    pub fn report(&self) -> Option<&Report> {
        self.report.as_ref()
    }

    /// Render the finalized report. Before `finish`, returns a diagnostic
    /// placeholder instead of failing so accidental early formatting is
    /// observable but non-fatal.
    pub fn render(&self, options: &crate::render::RenderOptions) -> String {
        match &self.report {
            Some(report) => crate::render::render(report, options)
                .unwrap_or_else(|e| format!("<Stopwatch (bad display config: {e})>")),
            None => "<Stopwatch (unfinished)>".to_string(),
        }
    }

    fn uninstall(&self) {
        CURRENT.with(|cur| {
            let mut slot = cur.borrow_mut();
            let installed = slot
                .as_ref()
                .is_some_and(|state| Rc::ptr_eq(state, &self.state));
            if installed {
                *slot = None;
            }
        });
    }
}

impl Drop for Stopwatch {
    fn drop(&mut self) {
        // Leave no dangling hook behind if the owner never called finish.
        self.uninstall();
    }
}
