//! The per-device Peach state machine: attach, non-blocking tick, detach.
//!
//! The control flow mirrors the reference GPU solve loop and its device
//! init routine; the two command queues are driven through the `Kernels`
//! trait so this module never depends on a specific compute backend.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use peach_core::{trailer::SEED_HALF_LEN, BTrailer, Difficulty, Result, BTRAILER_LEN};

use crate::context::{DeviceDescriptor, DeviceKind, Status, BRIDGE_SECS, PEACHCACHELEN};
use crate::kernels::Kernels;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Solve,
    NoSolve,
    Timeout,
}

/// One attached device and its driver state. Generic over the kernel
/// backend so tests can run against `MockKernels` with no GPU present.
pub struct PeachDriver<K: Kernels> {
    pub id: u32,
    pub kind: DeviceKind,
    pub info: String,
    pub local: usize,
    pub global: usize,
    pub status: Status,
    pub work: u64,
    pub hps: f64,
    last: Instant,
    build_started: bool,
    last_reported_bnum: [u8; 8],
    host_trailer: [[u8; BTRAILER_LEN]; 2],
    rng: StdRng,
    kernels: Option<K>,
}

impl<K: Kernels> PeachDriver<K> {
    pub fn new(descriptor: &DeviceDescriptor) -> Self {
        PeachDriver {
            id: descriptor.id,
            kind: descriptor.kind,
            info: descriptor.info.clone(),
            local: descriptor.local,
            global: descriptor.global,
            status: Status::Null,
            work: 0,
            hps: 0.0,
            last: Instant::now(),
            build_started: false,
            last_reported_bnum: [0; 8],
            host_trailer: [[0; BTRAILER_LEN]; 2],
            rng: StdRng::from_entropy(),
            kernels: None,
        }
    }

    /// Allocates everything through `build`, zeroes the solve buffers, and
    /// seeds each queue's PRNG state with `now ^ (id << 32) ^ queue_index`.
    /// Transitions NULL → INIT on success, NULL → FAIL on any step failure.
    pub fn attach(&mut self, build: impl FnOnce() -> Result<K>) -> Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        let result = (|| -> Result<K> {
            let mut kernels = build()?;
            for q in 0..2usize {
                kernels.zero_solve(q)?;
                let seed = now ^ ((self.id as u64) << 32) ^ q as u64;
                kernels.seed_prng(q, seed)?;
            }
            Ok(kernels)
        })();

        match result {
            Ok(kernels) => {
                self.kernels = Some(kernels);
                self.status = Status::Init;
                self.work = 0;
                self.build_started = false;
                Ok(())
            }
            Err(e) => {
                tracing::error!(device = self.id, error = %e, "attach failed");
                self.status = Status::Fail;
                Err(e)
            }
        }
    }

    /// Releases every resource. Safe to call repeatedly and on
    /// partially-attached (or already-detached) contexts.
    pub fn detach(&mut self) {
        self.kernels = None;
        self.status = Status::Null;
        self.work = 0;
        self.build_started = false;
    }

    /// One non-blocking step of the state machine.
    pub fn tick(
        &mut self,
        in_bt: &BTrailer,
        diff_floor: Difficulty,
        out_bt: &mut BTrailer,
    ) -> Result<TickOutcome> {
        if self.status == Status::Fail || self.kernels.is_none() {
            return Ok(TickOutcome::Timeout);
        }

        let result = match self.status {
            Status::Null => Ok(TickOutcome::Timeout),
            Status::Init => self.tick_init(in_bt),
            Status::Idle => self.tick_idle(in_bt),
            Status::Work => self.tick_work(in_bt, diff_floor, out_bt),
            Status::Fail => unreachable!("handled above"),
        };

        if let Err(ref e) = result {
            tracing::error!(device = self.id, error = %e, "driver error");
            self.status = Status::Fail;
        }

        result
    }

    fn work_available(&self, bt: &BTrailer) -> bool {
        let tcount_nonzero = bt.tcount_u32() != 0;
        let bnum_changed = bt.bnum != self.last_reported_bnum;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let fresh = now.saturating_sub(bt.time0_u32() as u64) < BRIDGE_SECS;
        tcount_nonzero && bnum_changed && fresh
    }

    fn tick_init(&mut self, in_bt: &BTrailer) -> Result<TickOutcome> {
        for q in 0..2usize {
            if !self.kernels.as_mut().unwrap().queue_ready(q)? {
                continue;
            }

            if self.work == 0 && !self.build_started {
                if !self.kernels.as_mut().unwrap().queue_ready(q ^ 1)? {
                    continue;
                }
                self.kernels.as_mut().unwrap().zero_solve(0)?;
                self.kernels.as_mut().unwrap().zero_solve(1)?;
                self.host_trailer[0] = in_bt.into_bytes();
                self.host_trailer[1] = in_bt.into_bytes();
                self.kernels.as_mut().unwrap().write_phash(&in_bt.phash)?;
                self.kernels.as_mut().unwrap().finish_all()?;
                self.build_started = true;
            }

            if self.work < PEACHCACHELEN {
                let remaining = PEACHCACHELEN - self.work;
                let launch = round_up(remaining.min(self.global as u64), self.local as u64);
                self.kernels.as_mut().unwrap().launch_build(q, self.work, launch)?;
                self.work += launch;
            } else if self.kernels.as_mut().unwrap().queue_ready(q ^ 1)? {
                self.work = 0;
                self.build_started = false;
                self.last = Instant::now();
                self.status = Status::Idle;
                return Ok(TickOutcome::NoSolve);
            }
        }
        Ok(TickOutcome::NoSolve)
    }

    fn tick_idle(&mut self, in_bt: &BTrailer) -> Result<TickOutcome> {
        if self.work_available(in_bt) {
            self.work = 0;
            self.last = Instant::now();
            self.status = Status::Work;
        }
        Ok(TickOutcome::NoSolve)
    }

    fn tick_work(
        &mut self,
        in_bt: &BTrailer,
        diff_floor: Difficulty,
        out_bt: &mut BTrailer,
    ) -> Result<TickOutcome> {
        for q in 0..2usize {
            if !self.kernels.as_mut().unwrap().queue_ready(q)? {
                continue;
            }

            let host_phash = &self.host_trailer[q][..32];
            if host_phash != in_bt.phash {
                self.status = Status::Init;
                self.work = 0;
                self.build_started = false;
                return Ok(TickOutcome::NoSolve);
            }

            if !self.work_available(in_bt) {
                self.status = Status::Idle;
                self.work = 0;
                return Ok(TickOutcome::NoSolve);
            }

            let solve = self.kernels.as_mut().unwrap().solve_result(q);
            if solve[..8].iter().any(|&b| b != 0) {
                let mut solved = BTrailer::from_bytes(&self.host_trailer[q])?;
                solved.nonce = solve;
                self.last_reported_bnum = solved.bnum;
                *out_bt = solved;
                self.kernels.as_mut().unwrap().zero_solve(q)?;
                return Ok(TickOutcome::Solve);
            }

            let mut attempt = *in_bt;
            let mut seed_half = [0u8; SEED_HALF_LEN];
            self.rng.fill_bytes(&mut seed_half);
            attempt.set_seed_half(seed_half);
            self.host_trailer[q] = attempt.into_bytes();

            let effective_diff = if diff_floor.as_u8() != 0 {
                diff_floor.as_u8().min(in_bt.difficulty().as_u8())
            } else {
                in_bt.difficulty().as_u8()
            };

            let bytes = self.host_trailer[q];
            let kernels = self.kernels.as_mut().unwrap();
            kernels.write_trailer(q, &bytes[..108])?;
            kernels.launch_solve(q, effective_diff)?;
            kernels.enqueue_solve_read(q)?;

            self.work += self.global as u64;
            let elapsed = self.last.elapsed().as_secs_f64().max(1e-6);
            self.hps = self.work as f64 / elapsed;
        }
        Ok(TickOutcome::NoSolve)
    }
}

fn round_up(value: u64, multiple: u64) -> u64 {
    if multiple == 0 {
        value
    } else {
        ((value + multiple - 1) / multiple) * multiple
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::{Capability, DeviceDescriptor, DeviceKind};
    use crate::kernels::MockKernels;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor::new(
            0,
            DeviceKind::GpuA,
            "mock gpu".into(),
            Capability {
                compute_units: 4,
                max_workgroup_size: 256,
                global_mem_bytes: 2_000_000_000,
            },
        )
    }

    fn attached() -> PeachDriver<MockKernels> {
        let mut driver = PeachDriver::new(&descriptor());
        driver.attach(|| Ok(MockKernels::new())).unwrap();
        driver
    }

    fn fresh_trailer(phash: u8, bnum: u64, difficulty: u8, tcount: u32) -> BTrailer {
        let mut t = BTrailer::default();
        t.phash = [phash; 32];
        t.bnum = bnum.to_le_bytes();
        t.difficulty[0] = difficulty;
        t.tcount = tcount.to_le_bytes();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        t.set_time0(now);
        t
    }

    fn drive_to_idle(driver: &mut PeachDriver<MockKernels>, bt: &BTrailer) {
        let mut out = BTrailer::default();
        let ticks_needed = (PEACHCACHELEN / driver.global as u64) + 4;
        for _ in 0..ticks_needed {
            if driver.status == Status::Idle {
                break;
            }
            driver.tick(bt, Difficulty(0), &mut out).unwrap();
        }
        assert_eq!(driver.status, Status::Idle);
    }

    #[test]
    fn cold_start_builds_then_idles_then_works_then_solves() {
        let mut driver = attached();
        let bt = fresh_trailer(0x11, 0x01, 8, 3);

        drive_to_idle(&mut driver, &bt);

        let mut out = BTrailer::default();
        driver.tick(&bt, Difficulty(0), &mut out).unwrap();
        assert_eq!(driver.status, Status::Work);

        driver
            .kernels
            .as_mut()
            .unwrap()
            .inject_solve(0, [0xAB; 32]);

        let outcome = driver.tick(&bt, Difficulty(0), &mut out).unwrap();
        assert_eq!(outcome, TickOutcome::Solve);
        assert_eq!(out.nonce, [0xAB; 32]);
        assert_eq!(driver.kernels.as_ref().unwrap().solve_result(0), [0; 32]);
    }

    #[test]
    fn phash_rotation_resets_to_init() {
        let mut driver = attached();
        let bt1 = fresh_trailer(0x11, 0x01, 8, 3);
        drive_to_idle(&mut driver, &bt1);

        let mut out = BTrailer::default();
        driver.tick(&bt1, Difficulty(0), &mut out).unwrap();
        assert_eq!(driver.status, Status::Work);

        let bt2 = fresh_trailer(0x22, 0x01, 8, 3);
        let outcome = driver.tick(&bt2, Difficulty(0), &mut out).unwrap();
        assert_eq!(outcome, TickOutcome::NoSolve);
        assert_eq!(driver.status, Status::Init);
        assert_eq!(driver.work, 0);

        drive_to_idle(&mut driver, &bt2);
        assert_eq!(
            driver.kernels.as_ref().unwrap().map_sentinel,
            bt2.phash.to_vec(),
            "build phase must rebuild the map under the rotated phash"
        );
    }

    #[test]
    fn zero_tcount_yields_to_idle() {
        let mut driver = attached();
        let bt = fresh_trailer(0x11, 0x01, 8, 3);
        drive_to_idle(&mut driver, &bt);

        let mut out = BTrailer::default();
        driver.tick(&bt, Difficulty(0), &mut out).unwrap();
        assert_eq!(driver.status, Status::Work);

        let idle_bt = fresh_trailer(0x11, 0x01, 8, 0);
        let outcome = driver.tick(&idle_bt, Difficulty(0), &mut out).unwrap();
        assert_eq!(outcome, TickOutcome::NoSolve);
        assert_eq!(driver.status, Status::Idle);
    }

    #[test]
    fn build_phase_terminates_within_expected_tick_budget() {
        let mut driver = attached();
        let bt = fresh_trailer(0x33, 0x02, 10, 1);
        let expected_max = (PEACHCACHELEN / driver.global as u64) + 4;
        let mut out = BTrailer::default();
        let mut ticks = 0u64;
        while driver.status == Status::Init && ticks < expected_max {
            driver.tick(&bt, Difficulty(0), &mut out).unwrap();
            ticks += 1;
        }
        assert_eq!(driver.status, Status::Idle);
    }
}
