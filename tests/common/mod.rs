//! Simulated controller and queue layer shared by the integration tests
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use ctucanfd::bus::{Can, Chip};
use ctucanfd::config::BitTimingKind;
use ctucanfd::core::{BinarySemaphore, Dependencies, Registers};
use ctucanfd::embedded_can::{Frame as _, StandardId};
use ctucanfd::interrupt::InterruptSet;
use ctucanfd::message::{Frame, FrameFlags};
use ctucanfd::queue::{OutSlot, QueueEdge, QueueEnds, PRIO_NR};
use ctucanfd::reg::{self, FrameFormat, Mode};
use ctucanfd::txb::{TxtbStatus, MAX_TXBUFS};
use fugit::{HertzU32, MicrosDurationU64, RateExtU32 as _};

pub const CAN_CLOCK_HZ: u32 = 100_000_000;

/// Words of a TXT buffer: format, identifier, two timestamp words and 64
/// payload bytes
const TXTB_WORDS: usize = 20;

fn nibble(status: TxtbStatus) -> u32 {
    match status {
        TxtbStatus::NotExist => 0x0,
        TxtbStatus::Ready => 0x1,
        TxtbStatus::Transmitting => 0x2,
        TxtbStatus::AbortInProgress => 0x3,
        TxtbStatus::Ok => 0x4,
        TxtbStatus::Error => 0x6,
        TxtbStatus::Aborted => 0x7,
        TxtbStatus::Empty => 0x8,
        TxtbStatus::Unknown(value) => value.into(),
    }
}

fn is_done(status: TxtbStatus) -> bool {
    matches!(
        status,
        TxtbStatus::Ok | TxtbStatus::Error | TxtbStatus::Aborted
    )
}

pub struct SimState {
    pub device_id: u32,
    pub txt_buffer_count: u32,
    /// Whether the core answers again after a soft reset
    pub reset_recovers: bool,
    pub in_reset: bool,
    pub mode: u32,
    pub int_stat: u32,
    pub int_ena: u32,
    pub int_mask: u32,
    pub tx_status: [TxtbStatus; MAX_TXBUFS],
    pub txtb: [[u32; TXTB_WORDS]; MAX_TXBUFS],
    pub rx_fifo: VecDeque<u32>,
    /// Plain storage for everything without side effects
    pub plain: HashMap<usize, u32>,
    /// Values returned by consecutive reads, ahead of `plain`
    pub scripted: HashMap<usize, VecDeque<u32>>,
    pub writes: Vec<(usize, u32)>,
}

impl SimState {
    fn new() -> Self {
        Self {
            device_id: reg::DEVICE_ID_MAGIC | 0x0203 << 16,
            txt_buffer_count: 4,
            reset_recovers: true,
            in_reset: false,
            mode: 0,
            int_stat: 0,
            int_ena: 0,
            int_mask: 0,
            tx_status: [TxtbStatus::NotExist; MAX_TXBUFS],
            txtb: [[0; TXTB_WORDS]; MAX_TXBUFS],
            rx_fifo: VecDeque::new(),
            plain: HashMap::new(),
            scripted: HashMap::new(),
            writes: Vec::new(),
        }
    }

    fn buffers(&self) -> usize {
        match self.txt_buffer_count {
            0 => 4,
            count => count as usize,
        }
    }

    /// Latches `bits` unless they are masked
    fn raise(&mut self, bits: u32) {
        self.int_stat |= bits & !self.int_mask;
    }

    fn txbhci() -> u32 {
        let mut set = InterruptSet::NONE;
        set.set_txbhci(true);
        set.0
    }

    fn rbnei() -> u32 {
        let mut set = InterruptSet::NONE;
        set.set_rbnei(true);
        set.0
    }

    fn tx_command(&mut self, value: u32) {
        let command = value & 0x7;
        for buffer in 0..MAX_TXBUFS {
            if value & 1 << (buffer + 8) == 0 {
                continue;
            }
            let current = self.tx_status[buffer];
            let next = match (command, current) {
                (1, status) if is_done(status) => TxtbStatus::Empty,
                (2, TxtbStatus::Empty) => TxtbStatus::Ready,
                (4, TxtbStatus::Ready) => TxtbStatus::Aborted,
                (4, TxtbStatus::Transmitting) => TxtbStatus::AbortInProgress,
                (_, status) => status,
            };
            self.tx_status[buffer] = next;
            if next != current && is_done(next) {
                self.raise(Self::txbhci());
            }
        }
    }

    fn read(&mut self, offset: usize) -> u32 {
        if let Some(value) = self.scripted.get_mut(&offset).and_then(VecDeque::pop_front) {
            return value;
        }
        match offset {
            reg::DEVICE_ID if self.in_reset && !self.reset_recovers => 0,
            reg::DEVICE_ID => self.device_id,
            reg::MODE => self.mode,
            reg::INT_STAT => {
                let mut live = self.int_stat;
                if !self.rx_fifo.is_empty() {
                    live |= Self::rbnei();
                }
                live & !self.int_mask
            }
            reg::INT_ENA_SET | reg::INT_ENA_CLR => self.int_ena,
            reg::INT_MASK_SET | reg::INT_MASK_CLR => self.int_mask,
            reg::RX_DATA => self.rx_fifo.pop_front().unwrap_or(0),
            reg::TX_STATUS => self
                .tx_status
                .iter()
                .enumerate()
                .fold(0, |acc, (buffer, &status)| {
                    acc | nibble(status) << (buffer * 4)
                }),
            reg::TX_COMMAND => self.txt_buffer_count << 16,
            offset if offset >= 0x100 => {
                let buffer = offset / 0x100 - 1;
                self.txtb[buffer][(offset % 0x100) / 4]
            }
            offset => self.plain.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.writes.push((offset, value));
        match offset {
            reg::MODE => {
                if Mode(value).rst() {
                    self.in_reset = true;
                    self.mode = 0;
                    self.int_stat = 0;
                    self.int_ena = 0;
                    self.int_mask = 0;
                    let buffers = self.buffers();
                    for (buffer, status) in self.tx_status.iter_mut().enumerate() {
                        *status = if buffer < buffers {
                            TxtbStatus::Empty
                        } else {
                            TxtbStatus::NotExist
                        };
                    }
                } else {
                    self.mode = value;
                }
            }
            reg::INT_STAT => self.int_stat &= !value,
            reg::INT_ENA_SET => self.int_ena |= value,
            reg::INT_ENA_CLR => self.int_ena &= !value,
            reg::INT_MASK_SET => self.int_mask |= value,
            reg::INT_MASK_CLR => self.int_mask &= !value,
            reg::TX_COMMAND => self.tx_command(value),
            offset if offset >= 0x100 => {
                let buffer = offset / 0x100 - 1;
                self.txtb[buffer][(offset % 0x100) / 4] = value;
            }
            offset => {
                self.plain.insert(offset, value);
            }
        }
    }
}

/// Register window of a simulated controller
#[derive(Clone)]
pub struct Sim(Arc<Mutex<SimState>>);

unsafe impl Registers for Sim {
    fn read32(&self, offset: usize) -> u32 {
        self.state().read(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        self.state().write(offset, value)
    }
}

impl Sim {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(SimState::new())))
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.0.lock().unwrap()
    }

    /// Finishes a pending transmission of `buffer` with `status`
    pub fn complete(&self, buffer: usize, status: TxtbStatus) {
        let mut state = self.state();
        state.tx_status[buffer] = status;
        state.raise(SimState::txbhci());
    }

    pub fn raise(&self, set: InterruptSet) {
        self.state().raise(set.0);
    }

    pub fn tx_status(&self, buffer: usize) -> TxtbStatus {
        self.state().tx_status[buffer]
    }

    /// Frame format, identifier and payload words written to `buffer`
    pub fn txtb(&self, buffer: usize) -> [u32; TXTB_WORDS] {
        self.state().txtb[buffer]
    }

    pub fn push_rx(&self, words: &[u32]) {
        self.state().rx_fifo.extend(words);
    }

    pub fn rx_words(&self) -> usize {
        self.state().rx_fifo.len()
    }

    pub fn set(&self, offset: usize, value: u32) {
        self.state().plain.insert(offset, value);
    }

    pub fn script(&self, offset: usize, values: &[u32]) {
        self.state()
            .scripted
            .entry(offset)
            .or_default()
            .extend(values);
    }

    pub fn mode(&self) -> Mode {
        Mode(self.state().mode)
    }

    /// All values written to `offset`, oldest first
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.state()
            .writes
            .iter()
            .filter(|(at, _)| *at == offset)
            .map(|&(_, value)| value)
            .collect()
    }

    pub fn last_write(&self, offset: usize) -> Option<u32> {
        self.writes_to(offset).last().copied()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

#[derive(Default)]
struct SemaphoreInner {
    token: Mutex<bool>,
    cond: Condvar,
    posts: Mutex<usize>,
}

#[derive(Clone, Default)]
pub struct Semaphore(Arc<SemaphoreInner>);

impl Semaphore {
    pub fn posts(&self) -> usize {
        *self.0.posts.lock().unwrap()
    }

    pub fn is_posted(&self) -> bool {
        *self.0.token.lock().unwrap()
    }
}

impl BinarySemaphore for Semaphore {
    fn post(&self) {
        *self.0.posts.lock().unwrap() += 1;
        *self.0.token.lock().unwrap() = true;
        self.0.cond.notify_one();
    }

    fn wait(&self) {
        let mut token = self.0.token.lock().unwrap();
        while !*token {
            token = self.0.cond.wait(token).unwrap();
        }
        *token = false;
    }

    fn try_wait(&self) -> bool {
        std::mem::take(&mut *self.0.token.lock().unwrap())
    }

    fn wait_timeout(&self, timeout: MicrosDurationU64) -> bool {
        let token = self.0.token.lock().unwrap();
        let (mut token, _) = self
            .0
            .cond
            .wait_timeout_while(token, Duration::from_micros(timeout.ticks()), |posted| {
                !*posted
            })
            .unwrap();
        std::mem::take(&mut *token)
    }
}

pub struct TestDeps {
    pub sim: Sim,
    pub worker: Semaphore,
    pub stop: Semaphore,
}

unsafe impl Dependencies for TestDeps {
    type Registers = Sim;
    type Semaphore = Semaphore;

    fn registers(&self) -> &Sim {
        &self.sim
    }

    fn worker_semaphore(&self) -> &Semaphore {
        &self.worker
    }

    fn stop_semaphore(&self) -> &Semaphore {
        &self.stop
    }

    fn can_clock(&self) -> HertzU32 {
        HertzU32::from_raw(CAN_CLOCK_HZ)
    }
}

/// Handles kept by a test after the dependencies moved into the chip
pub struct Harness {
    pub sim: Sim,
    pub worker: Semaphore,
    pub stop: Semaphore,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            sim: Sim::new(),
            worker: Semaphore::default(),
            stop: Semaphore::default(),
        }
    }

    pub fn deps(&self) -> TestDeps {
        TestDeps {
            sim: self.sim.clone(),
            worker: self.worker.clone(),
            stop: self.stop.clone(),
        }
    }

    /// Probes a controller with four TXT buffers, using `ntxbufs` of them
    pub fn chip(&self, ntxbufs: usize) -> Chip<TestDeps> {
        Chip::init(self.deps(), ntxbufs).unwrap()
    }
}

/// Sets 500 kbit/s nominal and 2 Mbit/s data bitrate
pub fn configure<Q: QueueEnds>(can: &mut Can<'_, TestDeps, Q>) {
    can.calc_and_set_bit_timing(BitTimingKind::Nominal, 500.kHz())
        .unwrap();
    can.calc_and_set_bit_timing(BitTimingKind::Data, 2.MHz())
        .unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    pub id: u32,
    pub prio: usize,
}

impl QueueEdge for Edge {
    fn prio(&self) -> usize {
        self.prio
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub frame: Frame,
}

impl OutSlot for Slot {
    fn frame(&self) -> &Frame {
        &self.frame
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub source: Option<u32>,
    pub frame: Frame,
    pub flags: FrameFlags,
}

#[derive(Default)]
pub struct QueueState {
    pub outgoing: [VecDeque<(Edge, Slot)>; PRIO_NR],
    pub delivered: Vec<Delivery>,
    pub freed: Vec<(Edge, Slot)>,
    pub pushed_back: Vec<(Edge, Slot)>,
    pub flushed: usize,
    pub stops: usize,
}

/// Queue layer recording everything the driver does with it
#[derive(Default)]
pub struct TestQueue(Mutex<QueueState>);

impl TestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, QueueState> {
        self.0.lock().unwrap()
    }

    /// Queues a classic frame with identifier `id` from edge `id`
    pub fn send(&self, id: u16, prio: usize, data: &[u8]) -> Slot {
        let frame = Frame::new(StandardId::new(id).unwrap(), data).unwrap();
        let edge = Edge {
            id: id.into(),
            prio,
        };
        let slot = Slot { frame };
        self.state().outgoing[prio].push_back((edge, slot.clone()));
        slot
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.state().delivered.clone()
    }

    pub fn pending(&self) -> Vec<u32> {
        self.state()
            .outgoing
            .iter()
            .rev()
            .flat_map(|queue| queue.iter().map(|(edge, _)| edge.id))
            .collect()
    }
}

impl QueueEnds for TestQueue {
    type Edge = Edge;
    type Slot = Slot;

    fn filter_frame_to_edges(&self, source: Option<&Edge>, frame: &Frame, flags: FrameFlags) -> usize {
        self.state().delivered.push(Delivery {
            source: source.map(|edge| edge.id),
            frame: *frame,
            flags,
        });
        1
    }

    fn test_outslot(&self) -> Option<(Edge, Slot)> {
        self.state()
            .outgoing
            .iter_mut()
            .rev()
            .find_map(VecDeque::pop_front)
    }

    fn push_back_outslot(&self, edge: Edge, slot: Slot) {
        let mut state = self.state();
        state.pushed_back.push((edge.clone(), slot.clone()));
        state.outgoing[edge.prio].push_front((edge, slot));
    }

    fn free_outslot(&self, edge: Edge, slot: Slot) {
        self.state().freed.push((edge, slot));
    }

    fn pending_outslot_prio(&self, min_prio: usize) -> Option<usize> {
        let state = self.state();
        (min_prio..PRIO_NR)
            .rev()
            .find(|&prio| !state.outgoing[prio].is_empty())
    }

    fn flush_outlist(&self) {
        let mut guard = self.state();
        let state = &mut *guard;
        for queue in state.outgoing.iter_mut() {
            state.flushed += queue.len();
            queue.clear();
        }
    }

    fn notify_chip_stop(&self) {
        self.state().stops += 1;
    }
}

/// Frame format word announcing a frame of `words` words after it
pub fn rx_format(dlc: u32, words: u32, f: impl FnOnce(&mut FrameFormat)) -> u32 {
    let mut ffw = FrameFormat(0);
    ffw.set_dlc(dlc);
    ffw.set_rwcnt(words);
    f(&mut ffw);
    ffw.0
}
