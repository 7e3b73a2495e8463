// Backend error taxonomy
//
// InitError: startup failures, the application cannot run.
// GpuError: failures during the frame loop that end it (device lost,
// device out of memory, any unexpected API result).
// Outdated/suboptimal swapchains are not errors, see swapchain::Acquired.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("Failed to load the Vulkan library. Is Vulkan installed? ({0})")]
    Loader(#[from] ash::LoadingError),

    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("No GPU with graphics and presentation support for this surface")]
    NoSuitableDevice,

    #[error("Shader {0} was not compiled into the binary (glslc missing at build time?)")]
    ShaderMissing(&'static str),

    #[error("Shader {0} is not valid SPIR-V: {1}")]
    InvalidShader(&'static str, #[source] std::io::Error),

    #[error("GPU allocator: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),
}

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("{what} failed: {result}")]
    Vulkan {
        what: &'static str,
        #[source]
        result: vk::Result,
    },

    #[error("GPU allocator: {0}")]
    Allocator(#[from] gpu_allocator::AllocationError),

    #[error("Frame geometry needs {needed} vertices, staging buffer holds {capacity}")]
    VertexOverflow { needed: usize, capacity: usize },

    #[error("Render target rebuild failed: {0}")]
    Rebuild(#[source] Box<InitError>),
}

impl GpuError {
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            GpuError::Vulkan {
                result: vk::Result::ERROR_DEVICE_LOST,
                ..
            }
        )
    }
}

impl From<InitError> for GpuError {
    fn from(err: InitError) -> Self {
        match err {
            InitError::Vulkan { what, result } => GpuError::Vulkan { what, result },
            InitError::Allocator(e) => GpuError::Allocator(e),
            other => GpuError::Rebuild(Box::new(other)),
        }
    }
}

/// Attach a description to a raw Vulkan result
pub trait VkContext<T> {
    fn init_context(self, what: &'static str) -> Result<T, InitError>;
    fn gpu_context(self, what: &'static str) -> Result<T, GpuError>;
}

impl<T> VkContext<T> for Result<T, vk::Result> {
    fn init_context(self, what: &'static str) -> Result<T, InitError> {
        self.map_err(|result| InitError::Vulkan { what, result })
    }

    fn gpu_context(self, what: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::Vulkan { what, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_results_carry_their_description() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .gpu_context("Queue submit")
            .unwrap_err();

        assert!(err.is_device_lost());
        assert!(err.to_string().starts_with("Queue submit failed"));
    }

    #[test]
    fn init_errors_wrap_into_rebuild() {
        let err: GpuError = InitError::ShaderMissing("quad.vert").into();
        assert!(matches!(err, GpuError::Rebuild(_)));
        assert!(!err.is_device_lost());
    }

    #[test]
    fn device_loss_during_rebuild_stays_recognizable() {
        let err: GpuError = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .init_context("Swapchain creation")
            .unwrap_err()
            .into();
        assert!(err.is_device_lost());
    }
}
