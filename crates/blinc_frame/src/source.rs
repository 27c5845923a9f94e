//! External tick sources
//!
//! A tick source is whatever fires once per host frame boundary for a phase:
//! a platform event loop, a display link, a timer. The scheduler only needs
//! two things from it: connect a [`TickSink`] for a phase, and tear that
//! connection down again through the returned [`Connection`].

use crate::error::SourceError;
use crate::lock;
use crate::phase::Phase;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;

/// Receives the ticks of one connected phase
///
/// Sources call [`TickSink::fire`] once per frame with the elapsed time in
/// seconds. Sinks are cheap to clone.
#[derive(Clone)]
pub struct TickSink {
    phase: Phase,
    on_fire: Arc<dyn Fn(f32) + Send + Sync>,
}

impl TickSink {
    pub fn new<F>(phase: Phase, on_fire: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        Self {
            phase,
            on_fire: Arc::new(on_fire),
        }
    }

    /// The phase this sink was connected for
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Deliver one tick
    pub fn fire(&self, delta_time: f32) {
        (self.on_fire)(delta_time);
    }
}

impl fmt::Debug for TickSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickSink").field("phase", &self.phase).finish()
    }
}

/// Callback type for closure-based disconnects
pub type DisconnectFn = Box<dyn FnOnce() -> Result<(), SourceError> + Send>;

/// A live connection between a tick source and a sink
///
/// Sources hand back whichever shape fits them; the scheduler only ever
/// calls [`Connection::disconnect`].
pub enum Connection {
    /// A task firing the sink; disconnect aborts it
    Task(JoinHandle<()>),
    /// An arbitrary disconnect routine
    Callback(DisconnectFn),
}

impl Connection {
    /// Wrap a disconnect closure
    pub fn from_fn<F>(disconnect: F) -> Self
    where
        F: FnOnce() -> Result<(), SourceError> + Send + 'static,
    {
        Connection::Callback(Box::new(disconnect))
    }

    /// Tear the connection down
    ///
    /// Once this returns the sink is not fired again by this connection.
    pub fn disconnect(self) -> Result<(), SourceError> {
        match self {
            Connection::Task(handle) => {
                handle.abort();
                Ok(())
            }
            Connection::Callback(disconnect) => disconnect(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connection::Task(_) => f.write_str("Connection::Task"),
            Connection::Callback(_) => f.write_str("Connection::Callback"),
        }
    }
}

/// Something that fires ticks for phases
pub trait TickSource: Send + Sync {
    /// Whether the phase can be driven in the current context
    ///
    /// A source without a rendering context reports `false` for render-only
    /// phases; subscribing to those degrades to an inert subscription.
    fn supports(&self, phase: Phase) -> bool;

    /// Start firing `sink` on every tick of `phase`
    ///
    /// Implementations must not fire the sink from inside this call.
    fn connect(&self, phase: Phase, sink: TickSink) -> Result<Connection, SourceError>;
}

// ============================================================================
// Manual Tick Source
// ============================================================================

struct ManualInner {
    render_context: bool,
    closed: bool,
    sinks: [Option<(u64, TickSink)>; Phase::COUNT],
    next_token: u64,
    connects: u64,
    disconnects: u64,
}

/// A tick source driven by the host's own frame loop
///
/// The host calls [`ManualTickSource::fire`] (or [`ManualTickSource::fire_frame`])
/// from its event loop, e.g. on every `Frame` event.
///
/// ```ignore
/// let source = ManualTickSource::new();
/// let scheduler = FrameScheduler::new(Arc::new(source.clone()))?;
///
/// // in the event loop
/// source.fire_frame(dt);
/// ```
#[derive(Clone)]
pub struct ManualTickSource {
    inner: Arc<Mutex<ManualInner>>,
}

impl ManualTickSource {
    /// Source for a host with a rendering context (all phases supported)
    pub fn new() -> Self {
        Self::with_render_context(true)
    }

    /// Source for a headless host; render-only phases are unsupported
    pub fn headless() -> Self {
        Self::with_render_context(false)
    }

    pub fn with_render_context(render_context: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualInner {
                render_context,
                closed: false,
                sinks: [None, None, None],
                next_token: 0,
                connects: 0,
                disconnects: 0,
            })),
        }
    }

    /// Fire one tick for `phase`
    ///
    /// Returns `true` if a sink was connected for the phase.
    pub fn fire(&self, phase: Phase, delta_time: f32) -> bool {
        // Clone the sink out so it is never fired under our own lock
        let sink = lock(&self.inner).sinks[phase.index()]
            .as_ref()
            .map(|(_, sink)| sink.clone());

        match sink {
            Some(sink) => {
                sink.fire(delta_time);
                true
            }
            None => false,
        }
    }

    /// Fire every connected phase once, in frame order
    pub fn fire_frame(&self, delta_time: f32) {
        for phase in [Phase::PrePhysics, Phase::Simulation, Phase::PreRender] {
            self.fire(phase, delta_time);
        }
    }

    /// Whether a sink is connected for `phase`
    pub fn is_connected(&self, phase: Phase) -> bool {
        lock(&self.inner).sinks[phase.index()].is_some()
    }

    /// Total successful connects
    pub fn connect_count(&self) -> u64 {
        lock(&self.inner).connects
    }

    /// Total disconnects of live connections
    pub fn disconnect_count(&self) -> u64 {
        lock(&self.inner).disconnects
    }

    /// Drop every sink and refuse further connects
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        inner.closed = true;
        inner.sinks = [None, None, None];
    }
}

impl Default for ManualTickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ManualTickSource {
    fn supports(&self, phase: Phase) -> bool {
        lock(&self.inner).render_context || !phase.requires_render_context()
    }

    fn connect(&self, phase: Phase, sink: TickSink) -> Result<Connection, SourceError> {
        let mut inner = lock(&self.inner);
        if inner.closed {
            return Err(SourceError::Closed);
        }
        if !inner.render_context && phase.requires_render_context() {
            return Err(SourceError::Unsupported(phase));
        }

        let token = inner.next_token;
        inner.next_token += 1;
        inner.connects += 1;
        inner.sinks[phase.index()] = Some((token, sink));
        tracing::trace!(%phase, token, "manual source connected");

        let weak: Weak<Mutex<ManualInner>> = Arc::downgrade(&self.inner);
        Ok(Connection::from_fn(move || {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let mut inner = lock(&inner);
            let slot = &mut inner.sinks[phase.index()];
            if matches!(slot, Some((t, _)) if *t == token) {
                *slot = None;
                inner.disconnects += 1;
            }
            Ok(())
        }))
    }
}
