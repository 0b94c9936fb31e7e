#![no_std]
#![warn(missing_docs)]
//! # CTU CAN FD
//!
//! ## Overview
//! This crate provides a platform-agnostic driver core for the CTU CAN FD IP
//! core, an open source CAN FD controller found in FPGA designs.
//!
//! It provides the following features:
//!
//! - classical CAN and CAN FD with bitrate switching support
//! - transmission through up to [`MAX_TXBUFS`] hardware buffers scheduled
//!   by priority class, with preemption of less important frames
//! - reception through the RX FIFO with hardware timestamps
//! - bus error and fault confinement reporting as error frames
//! - bit timing calculation and validation
//!
//! The driver does not queue frames itself. Applications exchange frames
//! with a queue layer, which the driver reaches through the traits in
//! [`queue`]. All platform specifics (register access, semaphores, the CAN
//! clock) are covered by the [`ctucanfd_core`] traits which the integration
//! for a given target is expected to implement.
//!
//! ## Structure
//!
//! A controller is probed with [`Chip::init`] and [`split`] into three parts
//! that live in different execution contexts:
//!
//! - [`Can`], the control handle used to configure, start and stop the
//!   controller
//! - [`Worker`], to be run by a dedicated task. It owns the TXT buffers and
//!   does all the actual work.
//! - [`InterruptHandle`], to be called from the interrupt service routine. It
//!   only masks the controller and wakes the worker.
//!
//! ## General usage example
//!
//! ```no_run
//! # use ctucanfd::message::Frame;
//! # use ctucanfd::queue::{OutSlot, QueueEdge, QueueEnds};
//! # use ctucanfd::message::FrameFlags;
//! # struct Edge;
//! # impl QueueEdge for Edge { fn prio(&self) -> usize { 0 } }
//! # struct Slot(Frame);
//! # impl OutSlot for Slot { fn frame(&self) -> &Frame { &self.0 } }
//! # struct Queue;
//! # impl QueueEnds for Queue {
//! #     type Edge = Edge;
//! #     type Slot = Slot;
//! #     fn filter_frame_to_edges(&self, _: Option<&Edge>, _: &Frame, _: FrameFlags) -> usize { 0 }
//! #     fn test_outslot(&self) -> Option<(Edge, Slot)> { None }
//! #     fn push_back_outslot(&self, _: Edge, _: Slot) {}
//! #     fn free_outslot(&self, _: Edge, _: Slot) {}
//! #     fn pending_outslot_prio(&self, _: usize) -> Option<usize> { None }
//! #     fn flush_outlist(&self) {}
//! # }
//! # pub mod hal {
//! #     pub struct Semaphore;
//! #     impl ctucanfd::core::BinarySemaphore for Semaphore {
//! #         fn post(&self) {}
//! #         fn wait(&self) {}
//! #         fn try_wait(&self) -> bool { unreachable!() }
//! #         fn wait_timeout(&self, _: fugit::MicrosDurationU64) -> bool { unreachable!() }
//! #     }
//! #     pub struct Dependencies(ctucanfd::reg::Mmio, Semaphore, Semaphore);
//! #     unsafe impl ctucanfd::core::Dependencies for Dependencies {
//! #         type Registers = ctucanfd::reg::Mmio;
//! #         type Semaphore = Semaphore;
//! #         fn registers(&self) -> &Self::Registers { &self.0 }
//! #         fn worker_semaphore(&self) -> &Semaphore { &self.1 }
//! #         fn stop_semaphore(&self) -> &Semaphore { &self.2 }
//! #         fn can_clock(&self) -> fugit::HertzU32 { unreachable!() }
//! #     }
//! #     impl Dependencies {
//! #         pub fn new() -> Result<Dependencies, ()> { unreachable!() }
//! #     }
//! # }
//! # static QUEUE: Queue = Queue;
//! use ctucanfd::bus::Chip;
//! use ctucanfd::config::{BitTimingKind, ControlMode};
//! use fugit::RateExtU32 as _;
//!
//! let dependencies = hal::Dependencies::new(/* all required parameters */).unwrap();
//! let mut chip = Chip::init(dependencies, 4).unwrap();
//! let parts = chip.split(&QUEUE);
//! let mut can = parts.can;
//!
//! can.calc_and_set_bit_timing(BitTimingKind::Nominal, 500.kHz()).unwrap();
//! can.calc_and_set_bit_timing(BitTimingKind::Data, 2.MHz()).unwrap();
//! can.set_control_mode(ControlMode::FD | ControlMode::BERR_REPORTING).unwrap();
//!
//! // `parts.interrupt.on_interrupt()` goes to the interrupt service routine,
//! // `parts.worker.run()` to a task of its own.
//!
//! can.start().unwrap();
//! ```
//!
//! [`MAX_TXBUFS`]: txb::MAX_TXBUFS
//! [`Chip::init`]: bus::Chip::init
//! [`split`]: bus::Chip::split
//! [`Can`]: bus::Can
//! [`Worker`]: worker::Worker
//! [`InterruptHandle`]: interrupt::InterruptHandle

pub mod bus;
pub mod config;
pub mod fault;
pub mod interrupt;
pub mod message;
pub mod prelude;
pub mod queue;
pub mod reg;
pub mod stats;
pub mod txb;
pub mod worker;

pub use ctucanfd_core as core;
pub use embedded_can;
