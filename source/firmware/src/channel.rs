//! A virtio channel: the two vrings of a vdev, and the loop serving them.
//!
//! The host fills the *incoming* ring with messages and keeps the *outgoing*
//! ring stocked with empty buffers. Each time the host signals, the firmware
//! drains the incoming ring, answering each message in the next outgoing
//! buffer, then signals back.

use core::{fmt, ops::ControlFlow, slice};

use vring::{Buffer, ConfigError, Notify, RingError, Vring};

use crate::{
    resource_table::{FwRscVdevVring, VdevEntry},
    settings::{Mode, TraceSettings},
    trace::TraceSubscriber,
    translate::Translate,
};

/// Something that turns a message into a reply.
pub trait Handler {
    /// Handle one message, writing the reply into `output`.
    ///
    /// Returns the length of the reply. Lengths past the end of `output` are
    /// clamped.
    fn handle(&mut self, input: &[u8], output: &mut [u8]) -> usize;
}

impl<F> Handler for F
where
    F: FnMut(&[u8], &mut [u8]) -> usize,
{
    fn handle(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        self(input, output)
    }
}

pub struct Channel<N, T> {
    incoming: Vring,
    outgoing: Vring,
    notify: N,
    translate: T,
    /// Emptied each time the host signals.
    clear_trace: Option<&'static TraceSubscriber>,
}

/// What one drain pass did.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Drain {
    /// Messages answered through the outgoing ring.
    pub handled: usize,
    /// Messages consumed without an answer, because the host had not
    /// provided an outgoing buffer (or provided one that could not be
    /// addressed).
    pub dropped: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// Errors returned by [`Channel`] operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChannelError {
    Config { ring: Direction, error: ConfigError },
    /// The host has not placed the vring yet, or placed it somewhere that
    /// cannot be addressed.
    NoAddress { ring: Direction, da: u32 },
    Ring { ring: Direction, error: RingError },
}

// === impl Channel ===

impl<N: Notify, T: Translate> Channel<N, T> {
    pub fn new(incoming: Vring, outgoing: Vring, notify: N, translate: T) -> Self {
        Self {
            incoming,
            outgoing,
            notify,
            translate,
            clear_trace: None,
        }
    }

    /// Set up both vrings as the host described them in the resource table.
    ///
    /// # Safety
    ///
    /// The host must have filled in the vrings' device addresses, and the
    /// memory they name must stay reserved for this channel for the rest of
    /// the program.
    pub unsafe fn from_resources(
        vdev: &VdevEntry,
        notify: N,
        translate: T,
    ) -> Result<Self, ChannelError> {
        let incoming = Self::vring(vdev.incoming(), &translate, Direction::Incoming)?;
        let outgoing = Self::vring(vdev.outgoing(), &translate, Direction::Outgoing)?;
        Ok(Self::new(incoming, outgoing, notify, translate))
    }

    unsafe fn vring(
        rsc: &FwRscVdevVring,
        translate: &T,
        ring: Direction,
    ) -> Result<Vring, ChannelError> {
        let layout = rsc
            .layout()
            .map_err(|error| ChannelError::Config { ring, error })?;
        let da = rsc.da();
        let base = translate
            .ptr(da as u64)
            .filter(|_| da != 0)
            .ok_or(ChannelError::NoAddress { ring, da })?;
        tracing::info!(?ring, da, num = layout.num(), align = layout.align(), "vring");
        Vring::new(base, layout).map_err(|error| ChannelError::Config { ring, error })
    }

    /// Empty `trace` every time the host signals, if
    /// `settings.clear_on_notify` is set.
    #[must_use]
    pub fn with_trace(self, trace: &'static TraceSubscriber, settings: &TraceSettings) -> Self {
        Self {
            clear_trace: settings.clear_on_notify.then_some(trace),
            ..self
        }
    }

    /// Serve the host once, if it has signalled.
    ///
    /// # Returns
    ///
    /// - [`Ok`]`(`[`None`]`)` if the host has not signalled.
    /// - [`Ok`]`(`[`Some`]`(`[`Drain`]`))` if the host had signalled and the
    ///   incoming ring was drained. The host has been signalled back.
    /// - [`Err`]`(`[`ChannelError`]`)` if the host put something invalid on
    ///   either ring. Anything handled before that was still returned, and
    ///   the host has still been signalled.
    pub fn poll<H: Handler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<Option<Drain>, ChannelError> {
        if !self.notify.take_pending() {
            return Ok(None);
        }

        if let Some(trace) = self.clear_trace {
            trace.clear();
        }

        let res = self.drain(handler);
        if let Err(error) = res {
            tracing::error!(?error, "drain pass failed");
        }

        self.incoming.dump("incoming");
        self.outgoing.dump("outgoing");

        if self.incoming.interrupt_suppressed() && self.outgoing.interrupt_suppressed() {
            tracing::trace!("host suppressed interrupts; not signalling");
        } else {
            self.notify.signal();
        }

        res.map(Some)
    }

    /// Handle every message on the incoming ring, without checking for a
    /// signal or signalling back.
    pub fn drain<H: Handler + ?Sized>(&mut self, handler: &mut H) -> Result<Drain, ChannelError> {
        let mut drain = Drain::default();

        while let Some(input) = self
            .incoming
            .get_buffer()
            .map_err(ChannelError::incoming)?
        {
            let len = input.len();
            let replied = self.reply(&input, handler);
            // The message goes back to the host even if the outgoing ring
            // failed, or the incoming ring would run out of descriptors.
            self.incoming
                .release(input, len)
                .map_err(ChannelError::incoming)?;
            if replied? {
                drain.handled += 1;
            } else {
                drain.dropped += 1;
            }
        }

        Ok(drain)
    }

    fn reply<H: Handler + ?Sized>(
        &mut self,
        input: &Buffer,
        handler: &mut H,
    ) -> Result<bool, ChannelError> {
        let Some(output) = self
            .outgoing
            .get_buffer()
            .map_err(ChannelError::outgoing)?
        else {
            tracing::warn!(len = input.len(), "no outgoing buffer; dropping message");
            return Ok(false);
        };

        // Safety: both descriptors are claimed by us until released, and the
        // host does not touch claimed buffers.
        let bufs = unsafe {
            (
                bytes(&self.translate, input),
                bytes(&self.translate, &output),
            )
        };
        let (Some(src), Some(dst)) = bufs else {
            tracing::warn!(
                input = input.addr(),
                output = output.addr(),
                "buffer at a null address; dropping message",
            );
            self.outgoing
                .release(output, 0)
                .map_err(ChannelError::outgoing)?;
            return Ok(false);
        };

        let written = handler.handle(src, dst).min(dst.len());
        tracing::debug!(
            incoming = input.id(),
            outgoing = output.id(),
            len = src.len(),
            written,
            "handled message",
        );
        self.outgoing
            .release(output, written as u32)
            .map_err(ChannelError::outgoing)?;
        Ok(true)
    }

    /// Serve the host forever, or until `idle` breaks.
    ///
    /// In [`Mode::Interrupt`], `idle` is called before each pass and should
    /// sleep until an interrupt arrives. In [`Mode::Polled`], `idle` is called
    /// after each pass and should return promptly; it is where background
    /// work such as a [`Strip`](crate::ws2812::Strip) gets its turn.
    pub fn run<H: Handler + ?Sized>(
        &mut self,
        mode: Mode,
        handler: &mut H,
        mut idle: impl FnMut() -> ControlFlow<()>,
    ) -> Result<(), ChannelError> {
        tracing::info!(?mode, "serving host");
        loop {
            if mode == Mode::Interrupt && idle().is_break() {
                return Ok(());
            }
            self.poll(handler)?;
            if mode == Mode::Polled {
                if idle().is_break() {
                    return Ok(());
                }
                core::hint::spin_loop();
            }
        }
    }

    #[must_use]
    pub fn incoming(&self) -> &Vring {
        &self.incoming
    }

    #[must_use]
    pub fn outgoing(&self) -> &Vring {
        &self.outgoing
    }

    pub fn notify_mut(&mut self) -> &mut N {
        &mut self.notify
    }

    pub fn into_parts(self) -> (Vring, Vring, N) {
        (self.incoming, self.outgoing, self.notify)
    }
}

impl<N, T> fmt::Debug for Channel<N, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("incoming", &self.incoming)
            .field("outgoing", &self.outgoing)
            .finish_non_exhaustive()
    }
}

/// # Safety
///
/// The buffer must be claimed, and must be addressable through `translate`.
unsafe fn bytes<'buf>(translate: &impl Translate, buf: &Buffer) -> Option<&'buf mut [u8]> {
    let ptr = translate.ptr(buf.addr())?;
    Some(slice::from_raw_parts_mut(ptr.as_ptr(), buf.len() as usize))
}

// === impl ChannelError ===

impl ChannelError {
    fn incoming(error: RingError) -> Self {
        Self::Ring {
            ring: Direction::Incoming,
            error,
        }
    }

    fn outgoing(error: RingError) -> Self {
        Self::Ring {
            ring: Direction::Outgoing,
            error,
        }
    }
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Config { ring, error } => write!(f, "{ring} vring: {error}"),
            ChannelError::NoAddress { ring, da } => {
                write!(f, "{ring} vring: device address {da:#x} is not usable")
            }
            ChannelError::Ring { ring, error } => write!(f, "{ring} vring: {error}"),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        })
    }
}
