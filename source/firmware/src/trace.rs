//! Logging into the remoteproc trace buffer.
//!
//! The resource table's trace entry tells the host where a text buffer lives;
//! the host exposes it as `/sys/kernel/debug/remoteproc/*/trace0`. The
//! [`TraceSubscriber`] formats `tracing` events into that buffer, one line
//! per event.
//!
//! Installing the subscriber as the global default allocates once, so the
//! firmware image needs a global allocator.

use core::{
    cell::RefCell,
    fmt::{self, Write as _},
};

use critical_section::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use tracing::{
    field::{Field, Visit},
    level_filters::LevelFilter,
    span,
    subscriber::Interest,
    Dispatch, Event, Metadata, Subscriber,
};

use crate::settings::TraceSettings;

/// A fixed buffer holding NUL-terminated text.
///
/// Writes wrap around to the start when the buffer is full, so the buffer
/// always ends with the most recent text. The byte after the last write is
/// always NUL, which is where the host stops reading.
#[derive(Debug)]
pub struct TraceBuffer<'buf> {
    buf: &'buf mut [u8],
    pos: usize,
}

/// A [`Subscriber`] writing events into a [`TraceBuffer`].
///
/// Spans are given IDs but otherwise ignored.
pub struct TraceSubscriber {
    buf: Mutex<RefCell<Option<TraceBuffer<'static>>>>,
    next_id: AtomicU64,
    max_level: LevelFilter,
}

/// Forwards to a static [`TraceSubscriber`], for [`Dispatch::new`].
#[derive(Copy, Clone)]
struct Shared(&'static TraceSubscriber);

/// Errors returned by [`TraceSubscriber::install`].
#[derive(Debug)]
pub struct AlreadyInstalled(());

// === impl TraceBuffer ===

impl<'buf> TraceBuffer<'buf> {
    /// Wrap `buf`, discarding its contents.
    pub fn new(buf: &'buf mut [u8]) -> Self {
        let mut this = Self { buf, pos: 0 };
        this.clear();
        this
    }

    pub fn clear(&mut self) {
        self.buf.fill(0);
        self.pos = 0;
    }

    /// Usable capacity, not counting the NUL terminator.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len().saturating_sub(1)
    }

    /// The text written since the last clear or wrap.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn push(&mut self, byte: u8) {
        let cap = self.capacity();
        if cap == 0 {
            return;
        }
        if self.pos == cap {
            self.pos = 0;
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        self.buf[self.pos] = 0;
    }
}

impl fmt::Write for TraceBuffer<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        s.bytes().for_each(|b| self.push(b));
        Ok(())
    }
}

// === impl TraceSubscriber ===

impl TraceSubscriber {
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            buf: Mutex::new(RefCell::new(None)),
            next_id: AtomicU64::new(1),
            max_level,
        }
    }

    /// A subscriber filtering at the configured level.
    pub const fn from_settings(settings: &TraceSettings) -> Self {
        Self::new(settings.level.filter())
    }

    /// A [`Dispatch`] forwarding to this subscriber.
    #[must_use]
    pub fn dispatch(&'static self) -> Dispatch {
        Dispatch::new(Shared(self))
    }

    /// Start writing into `buf`. Until this is called, events are dropped.
    pub fn attach(&self, buf: &'static mut [u8]) {
        critical_section::with(|cs| {
            self.buf.borrow(cs).replace(Some(TraceBuffer::new(buf)));
        });
    }

    /// Make this the global default subscriber.
    pub fn install(&'static self) -> Result<(), AlreadyInstalled> {
        tracing::dispatcher::set_global_default(self.dispatch()).map_err(|_| AlreadyInstalled(()))
    }

    /// Empty the trace buffer.
    pub fn clear(&self) {
        self.with_buffer(TraceBuffer::clear);
    }

    /// Run `f` with the trace buffer, if one is attached.
    pub fn with_buffer<T>(&self, f: impl FnOnce(&mut TraceBuffer<'static>) -> T) -> Option<T> {
        critical_section::with(|cs| {
            // An event emitted while the buffer is borrowed is dropped.
            let mut buf = self.buf.borrow(cs).try_borrow_mut().ok()?;
            buf.as_mut().map(f)
        })
    }
}

impl Subscriber for TraceSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= &self.max_level
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(self.max_level)
    }

    fn new_span(&self, _: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn record(&self, _: &span::Id, _: &span::Record<'_>) {}

    fn record_follows_from(&self, _: &span::Id, _: &span::Id) {}

    fn event(&self, event: &Event<'_>) {
        self.with_buffer(|buf| {
            let meta = event.metadata();
            let err = write!(buf, "{} {}:", meta.level(), meta.target());
            let mut line = Line { buf, err };
            event.record(&mut line);
            let _ = line.buf.write_char('\n');
        });
    }

    fn enter(&self, _: &span::Id) {}

    fn exit(&self, _: &span::Id) {}
}

impl Subscriber for Shared {
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        self.0.register_callsite(metadata)
    }

    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        self.0.enabled(metadata)
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        self.0.max_level_hint()
    }

    fn new_span(&self, attrs: &span::Attributes<'_>) -> span::Id {
        self.0.new_span(attrs)
    }

    fn record(&self, id: &span::Id, values: &span::Record<'_>) {
        self.0.record(id, values)
    }

    fn record_follows_from(&self, span: &span::Id, follows: &span::Id) {
        self.0.record_follows_from(span, follows)
    }

    fn event(&self, event: &Event<'_>) {
        self.0.event(event)
    }

    fn enter(&self, id: &span::Id) {
        self.0.enter(id)
    }

    fn exit(&self, id: &span::Id) {
        self.0.exit(id)
    }
}

/// Formats one event's fields onto a line.
struct Line<'a, 'buf> {
    buf: &'a mut TraceBuffer<'buf>,
    err: fmt::Result,
}

impl Visit for Line<'_, '_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.err = write!(self.buf, " {value}");
        } else {
            self.record_debug(field, &value)
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if self.err.is_err() {
            return;
        }
        self.err = if field.name() == "message" {
            write!(self.buf, " {value:?}")
        } else {
            write!(self.buf, " {}={value:?}", field.name())
        };
    }
}

impl fmt::Display for AlreadyInstalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a global tracing subscriber was already installed")
    }
}
