// Device Context - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layers
// - Window surface creation
// - Physical device selection (graphics + presentation queue families)
// - Logical device + queue creation
// - Memory allocator setup

use super::error::{InitError, VkContext};
use super::swapchain::SurfaceSupport;
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Queue family indices, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// One family serves both graphics and presentation
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present]).into_iter().collect()
    }
}

/// Pick queue families, preferring a single family that does both jobs
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;

    for (index, props) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics = props.queue_count > 0 && props.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let has_present = supports_present(index);

        if has_graphics && has_present {
            return Some(QueueFamilies {
                graphics: index,
                present: index,
            });
        }
        if has_graphics && graphics.is_none() {
            graphics = Some(index);
        }
        if has_present && present.is_none() {
            present = Some(index);
        }
    }

    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

/// First candidate with a shared family wins, otherwise the first candidate
pub fn choose_candidate(candidates: &[QueueFamilies]) -> Option<usize> {
    candidates
        .iter()
        .position(QueueFamilies::is_shared)
        .or(if candidates.is_empty() { None } else { Some(0) })
}

/// The window surface, owned by the swapchain once it exists
pub struct PresentationSurface {
    pub loader: khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl PresentationSurface {
    /// # Safety
    /// No swapchain created from this surface may still exist.
    pub unsafe fn destroy(&self) {
        self.loader.destroy_surface(self.handle, None);
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct DeviceContext {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    _entry: Entry,

    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilies,

    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,

    device_name: String,
}

/// Everything created after the instance, built in one fallible step
struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilies,
    device: ash::Device,
    allocator: Allocator,
    device_name: String,
}

impl DeviceContext {
    /// Create the device context and the window surface.
    ///
    /// `enable_validation` requests the Khronos validation layer; it is
    /// skipped with a warning when the layer is not installed.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<(Arc<Self>, PresentationSurface), InitError> {
        log::info!("Creating Vulkan device: {}", app_name);

        let entry = unsafe { Entry::load() }?;

        let validation = enable_validation && Self::validation_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation layers requested but not available");
        }
        log::info!("Validation layers: {}", if validation { "enabled" } else { "disabled" });

        let instance = Self::create_instance(&entry, app_name, validation, display_handle)?;

        let debug_utils = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let surface_handle = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .init_context("Window surface creation");

        let surface = match surface_handle {
            Ok(handle) => PresentationSurface {
                loader: khr::Surface::new(&entry, &instance),
                handle,
            },
            Err(e) => {
                unsafe { Self::destroy_instance(&instance, &debug_utils) };
                return Err(e);
            }
        };

        let parts = match Self::create_device(&instance, &surface) {
            Ok(parts) => parts,
            Err(e) => {
                unsafe {
                    surface.destroy();
                    Self::destroy_instance(&instance, &debug_utils);
                }
                return Err(e);
            }
        };

        let graphics_queue = unsafe { parts.device.get_device_queue(parts.queue_families.graphics, 0) };
        let present_queue = unsafe { parts.device.get_device_queue(parts.queue_families.present, 0) };

        let context = Self {
            allocator: ManuallyDrop::new(Mutex::new(parts.allocator)),
            device: parts.device,
            physical_device: parts.physical_device,
            instance,
            _entry: entry,
            graphics_queue,
            present_queue,
            queue_families: parts.queue_families,
            debug_utils,
            device_name: parts.device_name,
        };

        Ok((Arc::new(context), surface))
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
            })
            .unwrap_or(false)
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display_handle: RawDisplayHandle,
    ) -> Result<ash::Instance, InitError> {
        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| CString::from(c"vkpong"));
        let engine_name = c"vkpong";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        // Surface extensions required by the window system
        let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_handle)
            .init_context("Querying surface extensions")?
            .to_vec();

        if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }.init_context("Instance creation")
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(DebugUtils, vk::DebugUtilsMessengerEXT), InitError> {
        let debug_utils = DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .init_context("Debug messenger creation")?;

        Ok((debug_utils, messenger))
    }

    fn create_device(instance: &ash::Instance, surface: &PresentationSurface) -> Result<DeviceParts, InitError> {
        let (physical_device, queue_families) = Self::pick_physical_device(instance, surface)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let device_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        log::info!("Selected GPU: {}", device_name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics {}, present {}{}",
            queue_families.graphics,
            queue_families.present,
            if queue_families.is_shared() { " (shared)" } else { "" }
        );

        let device = Self::create_logical_device(instance, physical_device, queue_families)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });

        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        Ok(DeviceParts {
            physical_device,
            queue_families,
            device,
            allocator,
            device_name,
        })
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface: &PresentationSurface,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies), InitError> {
        let devices = unsafe { instance.enumerate_physical_devices() }.init_context("Enumerating GPUs")?;

        if devices.is_empty() {
            log::error!("No Vulkan-capable GPU found");
            return Err(InitError::NoSuitableDevice);
        }

        let mut candidates = Vec::new();
        for device in devices {
            if let Some(families) = Self::check_device(instance, surface, device) {
                candidates.push((device, families));
            }
        }

        let families: Vec<QueueFamilies> = candidates.iter().map(|&(_, families)| families).collect();
        choose_candidate(&families)
            .map(|index| candidates[index])
            .ok_or(InitError::NoSuitableDevice)
    }

    /// Queue families of a device that can render and present to `surface`
    fn check_device(
        instance: &ash::Instance,
        surface: &PresentationSurface,
        device: vk::PhysicalDevice,
    ) -> Option<QueueFamilies> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }.ok()?;
        let has_swapchain = extensions
            .iter()
            .any(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) } == khr::Swapchain::name());
        if !has_swapchain {
            return None;
        }

        let support = SurfaceSupport::query(surface, device).ok()?;
        if support.formats.is_empty() || support.present_modes.is_empty() {
            return None;
        }

        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };
        select_queue_families(&queue_families, |index| unsafe {
            surface
                .loader
                .get_physical_device_surface_support(device, index, surface.handle)
                .unwrap_or(false)
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilies,
    ) -> Result<ash::Device, InitError> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }.init_context("Logical device creation")
    }

    unsafe fn destroy_instance(
        instance: &ash::Instance,
        debug_utils: &Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        if let Some((debug_utils, messenger)) = debug_utils {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        if let Err(e) = self.wait_idle() {
            log::error!("Device wait idle failed during shutdown: {}", e);
        }

        // Cleanup in reverse order
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            Self::destroy_instance(&self.instance, &self.debug_utils);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn prefers_a_family_that_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
        ];

        let chosen = select_queue_families(&families, |index| index != 0).unwrap();

        assert_eq!(chosen, QueueFamilies { graphics: 2, present: 2 });
        assert!(chosen.is_shared());
        assert_eq!(chosen.unique(), vec![2]);
    }

    #[test]
    fn falls_back_to_separate_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];

        let chosen = select_queue_families(&families, |index| index == 1).unwrap();

        assert_eq!(chosen, QueueFamilies { graphics: 0, present: 1 });
        assert_eq!(chosen.unique(), vec![0, 1]);
    }

    #[test]
    fn no_present_support_means_no_families() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert_eq!(select_queue_families(&families, |_| false), None);
    }

    #[test]
    fn empty_graphics_family_is_ignored() {
        let empty = vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 0,
            ..Default::default()
        };
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];

        let chosen = select_queue_families(&families, |_| true).unwrap();
        assert_eq!(chosen.graphics, 1);
    }

    #[test]
    fn candidate_with_shared_family_beats_earlier_split_one() {
        let split = QueueFamilies { graphics: 0, present: 1 };
        let shared = QueueFamilies { graphics: 0, present: 0 };

        assert_eq!(choose_candidate(&[split, shared]), Some(1));
        assert_eq!(choose_candidate(&[split, split]), Some(0));
        assert_eq!(choose_candidate(&[]), None);
    }
}
