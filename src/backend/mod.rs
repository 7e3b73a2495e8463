// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Every wrapper holds an Arc<DeviceContext>, so the
// device outlives everything created from it.

pub mod buffer;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceContext, PresentationSurface};
pub use error::{GpuError, InitError};
pub use pipeline::Pipeline;
pub use swapchain::{Acquired, Presented, Swapchain};
pub use sync::FrameResources;
