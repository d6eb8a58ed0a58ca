//! Native bindings for loading device modules, operating on typed device
//! buffers and binding kernel arguments, over CUDA, Level Zero or a host
//! reference driver.

pub mod buffer;
pub mod config;
pub mod driver;
pub mod element;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod kernel;
pub mod module;
pub mod schedule;

pub use buffer::{BufferAdapter, DeviceAllocation};
pub use config::{BinderConfig, HostLimits};
pub use driver::{ActiveDriver, DriverBindings, DynamicSharedMem};
pub use element::{Element, ElementKind};
pub use error::{BindError, Result, Status};
pub use handle::{DeviceBuffer, DevicePtr, Dim3, KernelHandle, ModuleHandle};
pub use kernel::{ArgumentValue, Kernel, KernelState, SharedKernel};
pub use module::Module;
pub use schedule::LaunchDims;
