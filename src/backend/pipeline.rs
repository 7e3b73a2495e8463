// Graphics pipeline creation and management
//
// One render pass with a single color attachment, a framebuffer per
// swapchain image, and a pipeline drawing flat-colored 2D triangles.
// Viewport and scissor are baked in, so all of this is rebuilt together with
// the swapchain.

use super::device::DeviceContext;
use super::error::{GpuError, InitError, VkContext};
use super::shader::{self, ShaderSource};
use super::swapchain::Swapchain;
use crate::geometry::Vertex;
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

const ENTRY_POINT: &CStr = c"main";

/// Largest viewport with the playfield's aspect ratio, centered in `extent`
pub fn letterbox(extent: vk::Extent2D, aspect: f32) -> vk::Viewport {
    let width = extent.width as f32;
    let height = extent.height as f32;

    let (w, h) = if width / height > aspect {
        (height * aspect, height)
    } else {
        (width, width / aspect)
    };

    vk::Viewport {
        x: ((width - w) * 0.5).floor(),
        y: ((height - h) * 0.5).floor(),
        width: w,
        height: h,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Vertex input description for position + color vertices
pub fn vertex_input_info() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 2],
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: std::mem::size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    };

    let position = vk::VertexInputAttributeDescription {
        binding: 0,
        location: 0,
        format: vk::Format::R32G32_SFLOAT,
        offset: std::mem::offset_of!(Vertex, position) as u32,
    };

    let color = vk::VertexInputAttributeDescription {
        binding: 0,
        location: 1,
        format: vk::Format::R32G32B32A32_SFLOAT,
        offset: std::mem::offset_of!(Vertex, color) as u32,
    };

    ([binding], [position, color])
}

pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    viewport: vk::Viewport,
    extent: vk::Extent2D,
    device: Arc<DeviceContext>,
}

impl Pipeline {
    /// Build the render pass, framebuffers and pipeline for the current
    /// swapchain, letterboxing a playfield of the given aspect ratio.
    pub fn build(device: Arc<DeviceContext>, swapchain: &Swapchain, aspect: f32) -> Result<Self, InitError> {
        let extent = swapchain.extent();

        // Null handles are ignored by the destroy calls in Drop, so a
        // partially built pipeline cleans up after itself on error.
        let mut built = Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            render_pass: vk::RenderPass::null(),
            viewport: letterbox(extent, aspect),
            extent,
            device,
        };

        built.render_pass = built.create_render_pass(swapchain.format())?;
        for &view in swapchain.image_views() {
            let framebuffer = built.create_framebuffer(view)?;
            built.framebuffers.push(framebuffer);
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        built.layout = unsafe { built.device.device().create_pipeline_layout(&layout_info, None) }
            .init_context("Pipeline layout creation")?;

        built.pipeline = built.create_graphics_pipeline(shader::QUAD_VERT, shader::QUAD_FRAG)?;

        log::debug!(
            "Pipeline built for {}x{}, viewport {}x{} at ({}, {})",
            extent.width,
            extent.height,
            built.viewport.width,
            built.viewport.height,
            built.viewport.x,
            built.viewport.y
        );
        Ok(built)
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, InitError> {
        // Color attachment (the swapchain image)
        let color_attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();

        let color_attachment_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };

        let color_attachments = [color_attachment_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachments)
            .build();

        // Wait for the acquired image before writing to it
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();

        let attachments = [color_attachment];
        let subpasses = [subpass];
        let dependencies = [dependency];

        let render_pass_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        unsafe { self.device.device().create_render_pass(&render_pass_info, None) }
            .init_context("Render pass creation")
    }

    fn create_framebuffer(&self, image_view: vk::ImageView) -> Result<vk::Framebuffer, InitError> {
        let attachments = [image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(self.render_pass)
            .attachments(&attachments)
            .width(self.extent.width)
            .height(self.extent.height)
            .layers(1);

        unsafe { self.device.device().create_framebuffer(&framebuffer_info, None) }
            .init_context("Framebuffer creation")
    }

    fn create_graphics_pipeline(&self, vert: ShaderSource, frag: ShaderSource) -> Result<vk::Pipeline, InitError> {
        let device = self.device.device();

        let vert_module = shader::create_shader_module(device, vert)?;
        let frag_module = match shader::create_shader_module(device, frag) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(ENTRY_POINT)
                .build(),
        ];

        let (bindings, attributes) = vertex_input_info();
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewports = [self.viewport];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D {
                x: self.viewport.x as i32,
                y: self.viewport.y as i32,
            },
            extent: vk::Extent2D {
                width: self.viewport.width as u32,
                height: self.viewport.height as u32,
            },
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        // 2D quads come in both windings, so nothing is culled
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Opaque, later draws paint over earlier ones
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };

        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }

        let pipelines = pipelines.map_err(|(_, result)| InitError::Vulkan {
            what: "Graphics pipeline creation",
            result,
        })?;

        pipelines.into_iter().next().ok_or(InitError::Vulkan {
            what: "Graphics pipeline creation",
            result: vk::Result::ERROR_UNKNOWN,
        })
    }

    /// Record one frame: clear, then draw `vertex_count` vertices from
    /// `vertex_buffer` in submission order.
    pub fn record(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        clear_color: [f32; 4],
        vertex_buffer: vk::Buffer,
        vertex_count: u32,
    ) -> Result<(), GpuError> {
        let device = self.device.device();
        let framebuffer = self.framebuffers[image_index as usize];

        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .gpu_context("Command buffer reset")?;

            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .gpu_context("Command buffer begin")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: clear_color },
            }];

            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: self.extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);

            if vertex_count > 0 {
                device.cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer], &[0]);
                device.cmd_draw(command_buffer, vertex_count, 1, 0, 0);
            }

            device.cmd_end_render_pass(command_buffer);
            device
                .end_command_buffer(command_buffer)
                .gpu_context("Command buffer end")?;
        }

        Ok(())
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let device = self.device.device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            for framebuffer in self.framebuffers.drain(..) {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_window_gets_pillarboxed() {
        let viewport = letterbox(vk::Extent2D { width: 2000, height: 800 }, 1.6);
        assert_eq!(viewport.height, 800.0);
        assert_eq!(viewport.width, 1280.0);
        assert_eq!(viewport.x, 360.0);
        assert_eq!(viewport.y, 0.0);
    }

    #[test]
    fn tall_window_gets_letterboxed() {
        let viewport = letterbox(vk::Extent2D { width: 800, height: 1000 }, 1.6);
        assert_eq!(viewport.width, 800.0);
        assert_eq!(viewport.height, 500.0);
        assert_eq!(viewport.x, 0.0);
        assert_eq!(viewport.y, 250.0);
    }

    #[test]
    fn matching_aspect_fills_the_window() {
        let viewport = letterbox(vk::Extent2D { width: 1280, height: 800 }, 1.6);
        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (1280.0, 800.0));
    }

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        let (bindings, attributes) = vertex_input_info();
        assert_eq!(bindings[0].stride, 24);
        assert_eq!(attributes[0].location, 0);
        assert_eq!(attributes[0].offset, 0);
        assert_eq!(attributes[1].location, 1);
        assert_eq!(attributes[1].offset, 8);
        assert_eq!(attributes[1].format, vk::Format::R32G32B32A32_SFLOAT);
    }
}
