// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface, device and allocator: everything that lives for the
//! whole run and is torn down last.
use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{info, warn};

#[cfg(debug_assertions)]
type DebugState = Option<vk::DebugUtilsMessengerEXT>;
#[cfg(not(debug_assertions))]
type DebugState = ();

#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

pub type SharedAllocator = Arc<Mutex<Allocator>>;

pub struct GpuContext {
    pub entry: Entry,
    pub instance: Instance,
    debug_messenger: DebugState,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub phys: vk::PhysicalDevice,
    pub queue_family: u32,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub swapchain_loader: swapchain::Device,
    allocator: Option<SharedAllocator>,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::os::raw::c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{:?}: {}", types, msg);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{:?}: {}", types, msg);
    } else {
        tracing::debug!(target: "vulkan", "{:?}: {}", types, msg);
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn validation_available(entry: &Entry) -> bool {
    entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER)
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance) -> Result<DebugState> {
    if !validation_available(entry) {
        return Ok(None);
    }
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = loader
        .create_debug_utils_messenger(&ci, None)
        .context("create_debug_utils_messenger")?;
    Ok(Some(messenger))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance) -> Result<DebugState> {
    Ok(())
}

#[cfg(debug_assertions)]
unsafe fn destroy_debug_messenger(entry: &Entry, instance: &Instance, dbg: DebugState) {
    if let Some(messenger) = dbg {
        let loader = ext_debug::Instance::new(entry, instance);
        loader.destroy_debug_utils_messenger(messenger, None);
    }
}

#[cfg(not(debug_assertions))]
unsafe fn destroy_debug_messenger(_entry: &Entry, _instance: &Instance, _dbg: DebugState) {}

#[cfg(debug_assertions)]
unsafe fn instance_extensions_and_layers(
    entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<(Vec<*const c_char>, Vec<*const c_char>)> {
    let mut extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    let mut layers = Vec::new();
    if validation_available(entry) {
        extensions.push(ext_debug::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
        info!("vk: validation layer enabled");
    } else {
        warn!("vk: VK_LAYER_KHRONOS_validation not installed, running without validation");
    }
    Ok((extensions, layers))
}

#[cfg(not(debug_assertions))]
unsafe fn instance_extensions_and_layers(
    _entry: &Entry,
    display_raw: RawDisplayHandle,
) -> Result<(Vec<*const c_char>, Vec<*const c_char>)> {
    let extensions = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();
    Ok((extensions, Vec::new()))
}

unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle, app_name: &str) -> Result<Instance> {
    let app = CString::new(app_name).unwrap_or_else(|_| c"prism".to_owned());
    let engine = c"prism";

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: 0,
        p_engine_name: engine.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_1,
        ..Default::default()
    };

    let (extensions, layers) = instance_extensions_and_layers(entry, display_raw)?;

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layers.len() as u32,
        pp_enabled_layer_names: layers.as_ptr(),
        ..Default::default()
    };

    Ok(entry.create_instance(&create_info, None)?)
}

/// First device with a queue family that does graphics and can present to
/// `surface`. Discrete GPUs are preferred.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let mut candidates = Vec::new();
    for phys in instance.enumerate_physical_devices()? {
        let qprops = instance.get_physical_device_queue_family_properties(phys);
        let family = qprops.iter().enumerate().find_map(|(i, q)| {
            let present = surf_i
                .get_physical_device_surface_support(phys, i as u32, surface)
                .unwrap_or(false);
            (q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present).then_some(i as u32)
        });
        if let Some(family) = family {
            candidates.push((phys, family));
        }
    }
    candidates.sort_by_key(|&(phys, _)| {
        let ty = instance.get_physical_device_properties(phys).device_type;
        ty != vk::PhysicalDeviceType::DISCRETE_GPU
    });
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no suitable physical device/queue family"))
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let queue = device.get_device_queue(queue_family, 0);
    Ok((device, queue))
}

impl GpuContext {
    // STRICT ORDER:
    // 1) Instance (WSI extensions + validation in debug builds)
    // 2) Surface from THIS instance
    // 3) Physical device + queue family checked AGAINST THIS surface
    // 4) Logical device, then the allocator bound to it
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        app_name: &str,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("loading the Vulkan library")?;
        let instance = create_instance(&entry, dh, app_name).context("create_instance")?;
        let debug_messenger = create_debug_messenger(&entry, &instance)?;

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;

        let (phys, queue_family) = pick_device_and_queue(&instance, &surface_loader, surface)?;
        let props = instance.get_physical_device_properties(phys);
        info!(
            "vk: device '{}' (api {}.{}), queue family {}",
            CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy(),
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            queue_family
        );

        let (device, queue) = create_device(&instance, phys, queue_family)?;
        let swapchain_loader = swapchain::Device::new(&instance, &device);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device: phys,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })
        .context("creating the GPU memory allocator")?;

        Ok(Self {
            entry,
            instance,
            debug_messenger,
            surface_loader,
            surface,
            phys,
            queue_family,
            device,
            queue,
            swapchain_loader,
            allocator: Some(Arc::new(Mutex::new(allocator))),
        })
    }

    pub fn allocator(&self) -> Result<&SharedAllocator> {
        self.allocator
            .as_ref()
            .ok_or_else(|| anyhow!("allocator already released"))
    }

    /// Destroys the device-level objects. Every deletion queue holding device
    /// resources must have been flushed first.
    // STRICT TEARDOWN ORDER:
    // - Allocator (frees its memory blocks through the device)
    // - Device
    // - Surface, debug messenger, instance last
    pub unsafe fn destroy(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            match Arc::try_unwrap(allocator) {
                Ok(allocator) => drop(allocator),
                Err(shared) => {
                    warn!("vk: allocator still shared at teardown; leaking it");
                    std::mem::forget(shared);
                }
            }
        }
        self.device.destroy_device(None);
        self.surface_loader.destroy_surface(self.surface, None);
        #[cfg(debug_assertions)]
        {
            destroy_debug_messenger(&self.entry, &self.instance, self.debug_messenger.take());
        }
        #[cfg(not(debug_assertions))]
        destroy_debug_messenger(&self.entry, &self.instance, self.debug_messenger);
        self.instance.destroy_instance(None);
    }
}
