//! Script dispatch
//!
//! A script is anything implementing [`Script`]. It registers interest in
//! frames through its [`ScriptHost`] (`set_filter`) and may ask for a
//! periodic `tick`. The [`ScriptDispatcher`] offers every ingested frame to
//! each script whose filters match, and runs due ticks when polled.
//!
//! Script failures never reach the caller: they are turned into
//! [`ScriptDiagnostic`]s and handed to a [`DiagnosticsSink`].

use crate::types::CanFrame;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One `(id, mask, bus)` subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptFilter {
    pub id: u32,
    pub mask: u32,
    /// Bus number, or -1 for any bus
    pub bus: i32,
}

impl ScriptFilter {
    pub const ANY_BUS: i32 = -1;

    pub fn new(id: u32, mask: u32, bus: i32) -> Self {
        Self { id, mask, bus }
    }

    pub fn matches(&self, frame: &CanFrame) -> bool {
        (frame.id & self.mask) == (self.id & self.mask)
            && (self.bus == Self::ANY_BUS || self.bus == i32::from(frame.bus))
    }
}

/// Error raised by a script callback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub line: Option<u32>,
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
            stack: None,
        }
    }

    /// Builder method: source line
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// Builder method: stack trace
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Which callback failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptPhase {
    Setup,
    Frame,
    Tick,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptPhase::Setup => "setup",
            ScriptPhase::Frame => "gotFrame",
            ScriptPhase::Tick => "tick",
        };
        write!(f, "{}", name)
    }
}

/// A script failure, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDiagnostic {
    pub script: String,
    pub phase: ScriptPhase,
    pub error: ScriptError,
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error in {} function", self.phase)?;
        if let Some(line) = self.error.line {
            write!(f, " on line {}", line)?;
        }
        write!(f, " of script {}: {}", self.script, self.error.message)
    }
}

/// Receiver of script diagnostics
pub trait DiagnosticsSink: Send + Sync {
    fn report(&self, diagnostic: ScriptDiagnostic);
}

/// Logs diagnostics at warn level
#[derive(Debug, Default)]
pub struct LogDiagnostics;

impl DiagnosticsSink for LogDiagnostics {
    fn report(&self, diagnostic: ScriptDiagnostic) {
        log::warn!("{}", diagnostic);
        if let Some(stack) = &diagnostic.error.stack {
            log::debug!("Stack:\n{}", stack);
        }
    }
}

/// Keeps diagnostics in memory for a UI to pick up
#[derive(Debug, Default)]
pub struct CollectedDiagnostics {
    entries: Mutex<Vec<ScriptDiagnostic>>,
}

impl CollectedDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return everything collected so far
    pub fn take(&self) -> Vec<ScriptDiagnostic> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DiagnosticsSink for CollectedDiagnostics {
    fn report(&self, diagnostic: ScriptDiagnostic) {
        self.entries.lock().push(diagnostic);
    }
}

/// Engine-side API a script calls into
#[derive(Debug, Default)]
pub struct ScriptHost {
    filters: Vec<ScriptFilter>,
    tick_interval: Option<Duration>,
    timer_changed: bool,
}

impl ScriptHost {
    /// Subscribe to frames matching `id` under `mask` on `bus` (-1 = any)
    pub fn set_filter(&mut self, id: u32, mask: u32, bus: i32) {
        log::debug!("Script filter id 0x{:X} mask 0x{:X} bus {}", id, mask, bus);
        self.filters.push(ScriptFilter::new(id, mask, bus));
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn filters(&self) -> &[ScriptFilter] {
        &self.filters
    }

    /// Start (or restart) the tick timer; `interval_ms <= 0` stops it
    pub fn set_tick_interval(&mut self, interval_ms: i64) {
        self.tick_interval = u64::try_from(interval_ms)
            .ok()
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis);
        self.timer_changed = true;
    }

    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval
    }

    fn wants(&self, frame: &CanFrame) -> bool {
        self.filters.iter().any(|f| f.matches(frame))
    }
}

/// Callbacks a script may provide; all default to doing nothing
pub trait Script: Send {
    /// Runs once when the script is loaded
    fn setup(&mut self, _host: &mut ScriptHost) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Runs for each ingested frame matching one of the script's filters
    fn got_frame(&mut self, _host: &mut ScriptHost, _frame: &CanFrame) -> Result<(), ScriptError> {
        Ok(())
    }

    /// Runs when the tick timer fires
    fn tick(&mut self, _host: &mut ScriptHost) -> Result<(), ScriptError> {
        Ok(())
    }
}

/// A loaded script with its host state and timer
pub struct ScriptContainer {
    name: String,
    script: Box<dyn Script>,
    host: ScriptHost,
    next_tick: Option<Instant>,
}

impl ScriptContainer {
    pub fn new(name: impl Into<String>, script: Box<dyn Script>) -> Self {
        Self {
            name: name.into(),
            script,
            host: ScriptHost::default(),
            next_tick: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    /// When the next tick is due, if the timer runs
    pub fn next_tick(&self) -> Option<Instant> {
        self.next_tick
    }

    fn report(&self, sink: &dyn DiagnosticsSink, phase: ScriptPhase, error: ScriptError) {
        sink.report(ScriptDiagnostic {
            script: self.name.clone(),
            phase,
            error,
        });
    }

    /// Pick up a timer change requested by the last callback
    fn sync_timer(&mut self, now: Instant) {
        if std::mem::take(&mut self.host.timer_changed) {
            self.next_tick = self.host.tick_interval.map(|interval| now + interval);
        }
    }

    fn setup(&mut self, now: Instant, sink: &dyn DiagnosticsSink) {
        if let Err(e) = self.script.setup(&mut self.host) {
            self.report(sink, ScriptPhase::Setup, e);
        }
        self.sync_timer(now);
    }

    /// Offer a frame; returns whether the script took it
    fn got_frame(&mut self, frame: &CanFrame, sink: &dyn DiagnosticsSink) -> bool {
        if !self.host.wants(frame) {
            return false;
        }
        if let Err(e) = self.script.got_frame(&mut self.host, frame) {
            self.report(sink, ScriptPhase::Frame, e);
        }
        self.sync_timer(Instant::now());
        true
    }

    /// Run the tick callback if due at `now`
    fn poll_tick(&mut self, now: Instant, sink: &dyn DiagnosticsSink) -> bool {
        let (Some(due), Some(interval)) = (self.next_tick, self.host.tick_interval) else {
            return false;
        };
        if now < due {
            return false;
        }
        self.next_tick = Some(now + interval);
        if let Err(e) = self.script.tick(&mut self.host) {
            self.report(sink, ScriptPhase::Tick, e);
        }
        self.sync_timer(now);
        true
    }
}

impl fmt::Debug for ScriptContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContainer")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("next_tick", &self.next_tick)
            .finish()
    }
}

/// All loaded scripts of a model
pub struct ScriptDispatcher {
    scripts: Vec<ScriptContainer>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl ScriptDispatcher {
    /// Dispatcher reporting diagnostics to the log
    pub fn new() -> Self {
        Self::with_sink(Arc::new(LogDiagnostics))
    }

    pub fn with_sink(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            scripts: Vec::new(),
            sink,
        }
    }

    pub fn set_sink(&mut self, sink: Arc<dyn DiagnosticsSink>) {
        self.sink = sink;
    }

    /// Load a script and run its setup
    pub fn load(&mut self, name: impl Into<String>, script: Box<dyn Script>) {
        let mut container = ScriptContainer::new(name, script);
        log::info!("Loading script {}", container.name());
        container.setup(Instant::now(), self.sink.as_ref());
        self.scripts.push(container);
    }

    /// Unload a script by name; returns whether one was found
    pub fn unload(&mut self, name: &str) -> bool {
        let before = self.scripts.len();
        self.scripts.retain(|s| s.name != name);
        before != self.scripts.len()
    }

    pub fn scripts(&self) -> &[ScriptContainer] {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Offer a frame to every script; returns how many took it
    pub fn dispatch_frame(&mut self, frame: &CanFrame) -> usize {
        let sink = self.sink.as_ref();
        self.scripts
            .iter_mut()
            .map(|script| script.got_frame(frame, sink))
            .filter(|&taken| taken)
            .count()
    }

    /// Run every tick due at `now`; returns how many ran
    pub fn poll_ticks(&mut self, now: Instant) -> usize {
        let sink = self.sink.as_ref();
        self.scripts
            .iter_mut()
            .map(|script| script.poll_tick(now, sink))
            .filter(|&ran| ran)
            .count()
    }
}

impl Default for ScriptDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptDispatcher")
            .field("scripts", &self.scripts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records what it was called with
    struct Recorder {
        filters: Vec<(u32, u32, i32)>,
        tick_ms: i64,
        frames: Arc<Mutex<Vec<u32>>>,
        ticks: Arc<Mutex<u32>>,
    }

    impl Recorder {
        fn new(filters: Vec<(u32, u32, i32)>) -> (Self, Arc<Mutex<Vec<u32>>>) {
            let frames = Arc::new(Mutex::new(Vec::new()));
            let recorder = Self {
                filters,
                tick_ms: 0,
                frames: Arc::clone(&frames),
                ticks: Arc::new(Mutex::new(0)),
            };
            (recorder, frames)
        }
    }

    impl Script for Recorder {
        fn setup(&mut self, host: &mut ScriptHost) -> Result<(), ScriptError> {
            for &(id, mask, bus) in &self.filters {
                host.set_filter(id, mask, bus);
            }
            host.set_tick_interval(self.tick_ms);
            Ok(())
        }

        fn got_frame(&mut self, _host: &mut ScriptHost, frame: &CanFrame) -> Result<(), ScriptError> {
            self.frames.lock().push(frame.id);
            Ok(())
        }

        fn tick(&mut self, _host: &mut ScriptHost) -> Result<(), ScriptError> {
            *self.ticks.lock() += 1;
            Ok(())
        }
    }

    struct Failing;

    impl Script for Failing {
        fn setup(&mut self, host: &mut ScriptHost) -> Result<(), ScriptError> {
            host.set_filter(0, 0, ScriptFilter::ANY_BUS);
            Err(ScriptError::new("x is not defined").with_line(3))
        }

        fn got_frame(&mut self, _host: &mut ScriptHost, _frame: &CanFrame) -> Result<(), ScriptError> {
            Err(ScriptError::new("boom").with_stack("gotFrame@script.js:10"))
        }
    }

    #[test]
    fn test_filter_matches() {
        let frame = CanFrame::new(0x181, &[]).with_bus(1);
        assert!(ScriptFilter::new(0x180, 0x780, -1).matches(&frame));
        assert!(ScriptFilter::new(0x181, 0x7FF, 1).matches(&frame));
        assert!(!ScriptFilter::new(0x181, 0x7FF, 0).matches(&frame));
        assert!(!ScriptFilter::new(0x200, 0x780, -1).matches(&frame));
        assert!(ScriptFilter::new(0x555, 0, -1).matches(&frame));
    }

    #[test]
    fn test_first_match_within_script() {
        let mut dispatcher = ScriptDispatcher::new();
        let (a, frames_a) = Recorder::new(vec![(0x181, 0x7FF, -1), (0x180, 0x780, -1)]);
        let (b, frames_b) = Recorder::new(vec![(0x181, 0x7FF, 0)]);
        dispatcher.load("a", Box::new(a));
        dispatcher.load("b", Box::new(b));

        // Both filters of "a" match, but it sees the frame once
        assert_eq!(dispatcher.dispatch_frame(&CanFrame::new(0x181, &[])), 2);
        assert_eq!(dispatcher.dispatch_frame(&CanFrame::new(0x182, &[])), 1);
        assert_eq!(*frames_a.lock(), vec![0x181, 0x182]);
        assert_eq!(*frames_b.lock(), vec![0x181]);
    }

    #[test]
    fn test_script_without_filters_gets_nothing() {
        let mut dispatcher = ScriptDispatcher::new();
        let (script, frames) = Recorder::new(vec![]);
        dispatcher.load("idle", Box::new(script));
        assert_eq!(dispatcher.dispatch_frame(&CanFrame::new(0x181, &[])), 0);
        assert!(frames.lock().is_empty());
    }

    #[test]
    fn test_errors_become_diagnostics() {
        let sink = Arc::new(CollectedDiagnostics::new());
        let mut dispatcher = ScriptDispatcher::with_sink(sink.clone());
        dispatcher.load("bad.js", Box::new(Failing));
        assert_eq!(dispatcher.dispatch_frame(&CanFrame::new(0x10, &[])), 1);

        let diagnostics = sink.take();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].phase, ScriptPhase::Setup);
        assert_eq!(diagnostics[0].error.line, Some(3));
        assert_eq!(
            diagnostics[0].to_string(),
            "Error in setup function on line 3 of script bad.js: x is not defined"
        );
        assert_eq!(diagnostics[1].phase, ScriptPhase::Frame);
        assert_eq!(diagnostics[1].error.stack.as_deref(), Some("gotFrame@script.js:10"));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_tick_timer() {
        let mut dispatcher = ScriptDispatcher::new();
        let (mut script, _) = Recorder::new(vec![]);
        script.tick_ms = 100;
        let ticks = Arc::clone(&script.ticks);
        dispatcher.load("ticker", Box::new(script));
        let base = Instant::now();

        assert_eq!(dispatcher.poll_ticks(base + Duration::from_millis(150)), 1);
        assert_eq!(dispatcher.poll_ticks(base + Duration::from_millis(200)), 0);
        assert_eq!(dispatcher.poll_ticks(base + Duration::from_millis(260)), 1);
        assert_eq!(*ticks.lock(), 2);
    }

    #[test]
    fn test_non_positive_interval_stops_timer() {
        let mut host = ScriptHost::default();
        host.set_tick_interval(50);
        assert_eq!(host.tick_interval(), Some(Duration::from_millis(50)));
        host.set_tick_interval(0);
        assert_eq!(host.tick_interval(), None);
        host.set_tick_interval(-5);
        assert_eq!(host.tick_interval(), None);

        let mut dispatcher = ScriptDispatcher::new();
        let (script, _) = Recorder::new(vec![]);
        dispatcher.load("quiet", Box::new(script));
        assert_eq!(dispatcher.scripts()[0].next_tick(), None);
        assert_eq!(dispatcher.poll_ticks(Instant::now() + Duration::from_secs(10)), 0);
    }

    #[test]
    fn test_unload() {
        let mut dispatcher = ScriptDispatcher::new();
        let (script, _) = Recorder::new(vec![]);
        dispatcher.load("one", Box::new(script));
        assert!(dispatcher.unload("one"));
        assert!(!dispatcher.unload("one"));
        assert!(dispatcher.is_empty());
    }
}
