// SPDX-License-Identifier: CEPL-1.0
//! Shader loading, render pass, and the fixed-function description that turns
//! into a graphics pipeline.
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use prism_math::MeshPushConstants;
use prism_render::{DeletionQueue, Material, Vertex};
use tracing::info;

pub const MESH_VERT_SHADER: &str = "tri_mesh.vert.spv";
pub const MESH_FRAG_SHADER: &str = "colored_triangle.frag.spv";

/// Reads a SPIR-V binary from disk and wraps it in a shader module. The
/// caller destroys the module once the pipelines using it are built.
pub unsafe fn load_shader_module(device: &ash::Device, path: &Path) -> Result<vk::ShaderModule> {
    let mut file = File::open(path)
        .with_context(|| format!("opening shader {}", path.display()))?;
    let code = read_spv(&mut file).with_context(|| format!("reading SPIR-V {}", path.display()))?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    let module = device
        .create_shader_module(&ci, None)
        .with_context(|| format!("create_shader_module({})", path.display()))?;
    info!("vk: shader loaded: {}", path.display());
    Ok(module)
}

/// Binding 0, per-vertex; locations 0/1/2 = position/normal/color.
pub struct VertexInputDescription {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexInputDescription {
    pub fn for_vertex() -> Self {
        let bindings = vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: Vertex::STRIDE as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            std::mem::offset_of!(Vertex, position),
            std::mem::offset_of!(Vertex, normal),
            std::mem::offset_of!(Vertex, color),
        ]
        .into_iter()
        .enumerate()
        .map(|(location, offset)| vk::VertexInputAttributeDescription {
            location: location as u32,
            binding: 0,
            format: vk::Format::R32G32B32_SFLOAT,
            offset: offset as u32,
        })
        .collect();
        Self {
            bindings,
            attributes,
        }
    }
}

// STRICT ORDER: attachment 0 = swapchain color, attachment 1 = depth. The
// framebuffers in `surface` are built in the same order.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::CLEAR,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };

    // Color writes wait for the acquired image; depth writes wait for the
    // previous frame's depth tests on the shared depth image.
    let fragment_tests = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let dependencies = [
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        },
        vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: fragment_tests,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: fragment_tests,
            dst_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            ..Default::default()
        },
    ];

    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: dependencies.len() as u32,
        p_dependencies: dependencies.as_ptr(),
        ..Default::default()
    };
    Ok(device.create_render_pass(&ci, None).context("create_render_pass")?)
}

/// Plain-data pipeline description. `build` turns it into Vulkan create
/// infos on the stack, so the builder itself holds no pointers.
#[derive(Clone, Debug)]
pub struct PipelineBuilder {
    pub stages: Vec<(vk::ShaderStageFlags, vk::ShaderModule)>,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub blend_enable: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: vk::CompareOp,
    pub layout: vk::PipelineLayout,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_enable: false,
            depth_test: true,
            depth_write: true,
            depth_compare: vk::CompareOp::LESS_OR_EQUAL,
            layout: vk::PipelineLayout::null(),
        }
    }
}

impl PipelineBuilder {
    pub fn vertex_input(mut self, desc: VertexInputDescription) -> Self {
        self.vertex_bindings = desc.bindings;
        self.vertex_attributes = desc.attributes;
        self
    }

    pub fn shader(mut self, stage: vk::ShaderStageFlags, module: vk::ShaderModule) -> Self {
        self.stages.push((stage, module));
        self
    }

    /// Viewport and scissor are dynamic; the draw loop sets them from the
    /// current extent so a resize does not need a new pipeline.
    pub unsafe fn build(&self, device: &ash::Device, render_pass: vk::RenderPass) -> Result<vk::Pipeline> {
        let entry = c"main";
        let stages: Vec<_> = self
            .stages
            .iter()
            .map(|&(stage, module)| vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage,
                module,
                p_name: entry.as_ptr(),
                ..Default::default()
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: self.vertex_bindings.len() as u32,
            p_vertex_binding_descriptions: self.vertex_bindings.as_ptr(),
            vertex_attribute_description_count: self.vertex_attributes.len() as u32,
            p_vertex_attribute_descriptions: self.vertex_attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: self.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: self.polygon_mode,
            cull_mode: self.cull_mode,
            front_face: self.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: 1.0,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: self.depth_test.into(),
            depth_write_enable: self.depth_write.into(),
            depth_compare_op: if self.depth_test {
                self.depth_compare
            } else {
                vk::CompareOp::ALWAYS
            },
            min_depth_bounds: 0.0,
            max_depth_bounds: 1.0,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: self.blend_enable.into(),
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        match device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => p
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing")),
            Err((_, err)) => Err(anyhow!("create_graphics_pipelines failed: {:?}", err)),
        }
    }
}

/// Layout with the camera set at set 0 and one vertex-stage push-constant
/// block for the model matrix.
pub unsafe fn create_mesh_pipeline_layout(
    device: &ash::Device,
    global_set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let push_constant = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::VERTEX,
        offset: 0,
        size: std::mem::size_of::<MeshPushConstants>() as u32,
    };
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &global_set_layout,
        push_constant_range_count: 1,
        p_push_constant_ranges: &push_constant,
        ..Default::default()
    };
    Ok(device
        .create_pipeline_layout(&layout_info, None)
        .context("create_pipeline_layout(mesh)")?)
}

/// Builds the default mesh material from the shaders in `shader_dir`.
/// Shader modules are destroyed before returning; pipeline and layout
/// teardown go on `deletion`.
pub unsafe fn create_mesh_material(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    global_set_layout: vk::DescriptorSetLayout,
    shader_dir: &Path,
    deletion: &mut DeletionQueue,
) -> Result<Material<vk::Pipeline, vk::PipelineLayout>> {
    let vert = load_shader_module(device, &shader_dir.join(MESH_VERT_SHADER))?;
    let frag = match load_shader_module(device, &shader_dir.join(MESH_FRAG_SHADER)) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vert, None);
            return Err(e);
        }
    };

    let built = (|| -> Result<Material<vk::Pipeline, vk::PipelineLayout>> {
        let layout = create_mesh_pipeline_layout(device, global_set_layout)?;
        {
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_pipeline_layout(layout, None) });
        }
        let builder = PipelineBuilder {
            layout,
            ..Default::default()
        }
        .vertex_input(VertexInputDescription::for_vertex())
        .shader(vk::ShaderStageFlags::VERTEX, vert)
        .shader(vk::ShaderStageFlags::FRAGMENT, frag);
        let pipeline = builder.build(device, render_pass)?;
        {
            let d = device.clone();
            deletion.register(move || unsafe { d.destroy_pipeline(pipeline, None) });
        }
        Ok(Material::new(pipeline, layout))
    })();

    device.destroy_shader_module(vert, None);
    device.destroy_shader_module(frag, None);
    built
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_attributes_follow_struct_layout() {
        let desc = VertexInputDescription::for_vertex();
        assert_eq!(desc.bindings.len(), 1);
        assert_eq!(desc.bindings[0].stride, 36);
        let offsets: Vec<u32> = desc.attributes.iter().map(|a| a.offset).collect();
        let locations: Vec<u32> = desc.attributes.iter().map(|a| a.location).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        assert_eq!(locations, vec![0, 1, 2]);
        assert!(desc
            .attributes
            .iter()
            .all(|a| a.format == vk::Format::R32G32B32_SFLOAT));
    }

    #[test]
    fn builder_defaults_match_mesh_pipeline() {
        let b = PipelineBuilder::default();
        assert_eq!(b.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(b.polygon_mode, vk::PolygonMode::FILL);
        assert!(b.depth_test && b.depth_write);
        assert_eq!(b.depth_compare, vk::CompareOp::LESS_OR_EQUAL);
    }
}
