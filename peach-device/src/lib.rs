//! GPU device enumeration and the per-device Peach driver.
//!
//! The hot-path state machine in [`driver`] never touches a compute API
//! directly; it dispatches through the [`kernels::Kernels`] trait so it can
//! be driven by a real OpenCL backend or, in tests, by
//! [`kernels::MockKernels`].

pub mod context;
pub mod driver;
pub mod enumerate;
pub mod kernels;

pub use context::{Capability, DeviceDescriptor, DeviceKind, Status};
pub use driver::{PeachDriver, TickOutcome};
pub use enumerate::enumerate;
pub use kernels::Kernels;

#[cfg(feature = "opencl")]
pub use kernels::ocl_backend::{enumerate_attachable, OclKernels};
