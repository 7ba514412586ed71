//! Doorbells between the device and the host.

/// A way to exchange notifications with the peer on the other end of a pair
/// of vrings.
///
/// On real hardware this is an inter-processor interrupt; in a simulation it
/// can be a flag shared between threads. Implementations decide what "the
/// peer" is, so callers never deal in channel or interrupt numbers.
pub trait Notify {
    /// Returns `true` if the peer has signalled since the last call, and
    /// acknowledges the signal.
    ///
    /// This must not block.
    fn take_pending(&mut self) -> bool;

    /// Signal the peer.
    fn signal(&mut self);
}

impl<N: Notify + ?Sized> Notify for &mut N {
    #[inline]
    fn take_pending(&mut self) -> bool {
        N::take_pending(self)
    }

    #[inline]
    fn signal(&mut self) {
        N::signal(self)
    }
}
