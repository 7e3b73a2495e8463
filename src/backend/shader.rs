// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. build.rs compiles shaders/*.vert|frag with
// glslc into OUT_DIR and the results are embedded here.

use super::error::{InitError, VkContext};
use ash::vk;
use std::io::Cursor;

/// Embedded SPIR-V blob and the shader file it was compiled from
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource {
    pub name: &'static str,
    pub bytes: &'static [u8],
}

pub const QUAD_VERT: ShaderSource = ShaderSource {
    name: "quad.vert",
    bytes: include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv")),
};

pub const QUAD_FRAG: ShaderSource = ShaderSource {
    name: "quad.frag",
    bytes: include_bytes!(concat!(env!("OUT_DIR"), "/quad.frag.spv")),
};

/// Convert the byte blob into 4-byte SPIR-V words
pub fn decode(source: ShaderSource) -> Result<Vec<u32>, InitError> {
    // build.rs leaves an empty file when glslc is unavailable
    if source.bytes.is_empty() {
        return Err(InitError::ShaderMissing(source.name));
    }
    ash::util::read_spv(&mut Cursor::new(source.bytes)).map_err(|e| InitError::InvalidShader(source.name, e))
}

pub fn create_shader_module(device: &ash::Device, source: ShaderSource) -> Result<vk::ShaderModule, InitError> {
    let code = decode(source)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe { device.create_shader_module(&create_info, None) }.init_context("Shader module creation")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_blob_reports_missing_shader() {
        let source = ShaderSource {
            name: "quad.vert",
            bytes: &[],
        };
        assert!(matches!(decode(source), Err(InitError::ShaderMissing("quad.vert"))));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let source = ShaderSource {
            name: "quad.frag",
            bytes: &[0x03, 0x02, 0x23],
        };
        assert!(matches!(decode(source), Err(InitError::InvalidShader("quad.frag", _))));
    }

    #[test]
    fn words_are_little_endian() {
        static BYTES: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];
        let words = decode(ShaderSource {
            name: "test",
            bytes: &BYTES,
        })
        .unwrap();
        assert_eq!(words, vec![0x0723_0203, 0x0001_0000]);
    }
}
