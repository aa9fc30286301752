//! Device identity, capability and the driver's externally visible status.

use std::fmt;

/// Which kernel family a device was matched against. The enumerator has no
/// vendor- or platform-derived signal to split devices on, so every
/// discovered device is currently tagged `GpuA`; `GpuB` stays defined for
/// when such a signal exists, rather than collapsing the tag to a single
/// variant that would need re-widening later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    GpuA,
    GpuB,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceKind::GpuA => write!(f, "gpu-A"),
            DeviceKind::GpuB => write!(f, "gpu-B"),
        }
    }
}

/// Raw capability queried once at enumeration time.
#[derive(Debug, Clone, Copy)]
pub struct Capability {
    pub compute_units: u32,
    pub max_workgroup_size: usize,
    pub global_mem_bytes: u64,
}

/// The driver's externally visible lifecycle state. See `peach_device::driver`
/// for the transition rules between these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Null,
    Init,
    Idle,
    Work,
    Fail,
}

/// Everything the enumerator learns about one accelerator before a driver is
/// attached to it.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub id: u32,
    pub kind: DeviceKind,
    pub info: String,
    pub capability: Capability,
    /// Local work-group size, capped at 256 and at the device's own max.
    pub local: usize,
    /// Global work size: `compute_units * 256 * local`.
    pub global: usize,
}

impl DeviceDescriptor {
    pub fn new(id: u32, kind: DeviceKind, info: String, capability: Capability) -> Self {
        let local = capability.max_workgroup_size.min(256);
        let global = capability.compute_units as usize * 256 * local;
        DeviceDescriptor {
            id,
            kind,
            info,
            capability,
            local,
            global,
        }
    }
}

/// Minimum accepted global memory: the 1 GiB Peach map plus working overhead.
pub const MIN_GLOBAL_MEM_BYTES: u64 = 1_200_000_000;

/// Number of entries in the precomputed Peach map. An external compile-time
/// constant of the opaque kernel (see the crate's module docs); this value
/// matches a 1 GiB map at 1 KiB per entry.
pub const PEACHCACHELEN: u64 = 1_048_576;

/// Soft time horizon, in seconds, after which a block's `time0` is considered
/// stale. External to the opaque kernel contract; chosen to match the
/// network's block-time bridge window.
pub const BRIDGE_SECS: u64 = 1200;
