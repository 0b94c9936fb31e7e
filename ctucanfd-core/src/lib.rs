#![no_std]
#![warn(missing_docs)]

//! `ctucanfd-core` provides the set of abstractions that serve as a thin
//! integration layer between the platform independent [`ctucanfd`] crate and
//! the platform it runs on (a BSP plus an RTOS, in documentation also referred
//! to as _the target_).
//!
//! The driver core needs three things from its target:
//! - word sized access to the memory-mapped register window of the IP core
//!   ([`Registers`])
//! - binary semaphores used to hand work from the interrupt handler to the
//!   worker task and to signal completion of a stop request
//!   ([`BinarySemaphore`])
//! - a single owner of all of the above together with the frequency of the
//!   clock feeding the controller ([`Dependencies`])
//!
//! Integrators of this crate into any given target are responsible for
//! soundness of trait implementations and conforming to their respective safety
//! prerequisites.
//!
//! [`ctucanfd`]: <https://docs.rs/crate/ctucanfd/>

pub use fugit;

/// Word access to the register window of a single controller instance
///
/// Offsets are byte offsets from the start of the window and are always
/// multiples of four.
///
/// # Safety
/// - `read32` and `write32` must perform exactly one volatile 32-bit access per
///   call; the RX data register pops a word from the receive FIFO on every
///   read and must not be cached or merged
/// - the window must stay mapped and valid for the whole lifetime of the
///   implementing object
///
/// # Examples
/// ```no_run
/// use ctucanfd_core::Registers;
///
/// pub struct Window(*mut u32);
///
/// unsafe impl Registers for Window {
///     fn read32(&self, offset: usize) -> u32 {
///         unsafe { self.0.add(offset / 4).read_volatile() }
///     }
///
///     fn write32(&self, offset: usize, value: u32) {
///         unsafe { self.0.add(offset / 4).write_volatile(value) }
///     }
/// }
/// ```
pub unsafe trait Registers {
    /// Reads the 32-bit register at `offset`
    fn read32(&self, offset: usize) -> u32;
    /// Writes `value` to the 32-bit register at `offset`
    fn write32(&self, offset: usize, value: u32);
}

/// Binary semaphore provided by the RTOS
///
/// The semaphore holds at most one pending token; posting an already posted
/// semaphore is a no-op.
///
/// `post` is called from interrupt context by [`InterruptHandle`] and must not
/// block.
///
/// [`InterruptHandle`]: <https://docs.rs/ctucanfd/latest/ctucanfd/interrupt/struct.InterruptHandle.html>
pub trait BinarySemaphore {
    /// Releases the token, waking a single waiter
    fn post(&self);
    /// Blocks until the token is available and takes it
    fn wait(&self);
    /// Takes the token if it is available without blocking
    ///
    /// Returns `true` if the token was taken.
    fn try_wait(&self) -> bool;
    /// Blocks for at most `timeout` waiting for the token
    ///
    /// Returns `true` if the token was taken.
    fn wait_timeout(&self, timeout: fugit::MicrosDurationU64) -> bool;
}

/// Trait representing controller dependencies
///
/// Structs implementing [`Dependencies`] should
/// - enclose the register window of exactly one controller instance
/// - own the two semaphores used by the driver core for that instance
/// - be constructible only when it is safe and sound to interact with the
///   controller (clocks are running and the window is mapped)
/// - be a singleton (only a single instance of [`Dependencies`] for a specific
///   controller must exist at the same time)
///
/// in order to prevent aliasing and guarantee that the abstractions provided by
/// [`ctucanfd`] are sole owners of the peripheral.
///
/// # Safety
/// While a [`Dependencies`] type instance exists
/// - the CAN core clock must not change
/// - the register window must not be accessed by anything else
///
/// [`ctucanfd`]: <https://docs.rs/crate/ctucanfd/>
pub unsafe trait Dependencies {
    /// Register window of the controller
    type Registers: Registers;
    /// Semaphore flavour provided by the RTOS
    type Semaphore: BinarySemaphore;

    /// Register window of the controller
    fn registers(&self) -> &Self::Registers;
    /// Semaphore the worker task sleeps on between passes
    fn worker_semaphore(&self) -> &Self::Semaphore;
    /// Semaphore posted by the worker once all TX buffers are drained after a
    /// stop request
    fn stop_semaphore(&self) -> &Self::Semaphore;
    /// Frequency of the clock driving the CAN core.
    ///
    /// Bit timing is derived from this clock, it should therefore be of
    /// reasonably high precision.
    fn can_clock(&self) -> fugit::HertzU32;
}
