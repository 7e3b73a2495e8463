// Swapchain - Window presentation
//
// Manages the surface and the chain of images we render to and present.
// Rebuilt in place when the window is resized or presentation reports the
// surface as outdated/suboptimal.

use super::device::{DeviceContext, PresentationSurface};
use super::error::{GpuError, InitError, VkContext};
use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

/// What the surface supports on a given physical device
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(surface: &PresentationSurface, physical_device: vk::PhysicalDevice) -> Result<Self, vk::Result> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, surface.handle)?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(physical_device, surface.handle)?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, surface.handle)?,
            })
        }
    }
}

/// Everything decided about a swapchain before it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainSettings {
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainSettings {
    /// `None` if the surface reports no formats
    pub fn choose(
        support: &SurfaceSupport,
        desired_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Option<Self> {
        let surface_format = choose_surface_format(&support.formats)?;
        let caps = &support.capabilities;

        Some(Self {
            format: surface_format.format,
            color_space: surface_format.color_space,
            present_mode: choose_present_mode(&support.present_modes, preferred_present_mode),
            extent: choose_extent(caps, desired_extent),
            image_count: choose_image_count(caps),
            pre_transform: caps.current_transform,
            composite_alpha: choose_composite_alpha(caps),
        })
    }
}

/// Prefer SRGB so the blend/output path is gamma correct
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX: vsync, no tearing, bounded queue
/// FIFO: vsync, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], preferred: vk::PresentModeKHR) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, desired: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: desired
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: desired
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum so one image can be drawn while another is shown
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&mode| caps.supported_composite_alpha.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Create one view per image, destroying the ones already made if any fails
fn create_image_views(
    images: &[vk::Image],
    mut create: impl FnMut(vk::Image) -> Result<vk::ImageView, vk::Result>,
    mut destroy: impl FnMut(vk::ImageView),
) -> Result<Vec<vk::ImageView>, vk::Result> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        match create(image) {
            Ok(view) => views.push(view),
            Err(e) => {
                views.into_iter().for_each(&mut destroy);
                return Err(e);
            }
        }
    }
    Ok(views)
}

/// Result of asking for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; recreate and skip the tick
    Outdated,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    Ok,
    /// Outdated or suboptimal, recreate before the next frame
    NeedsRecreate,
}

pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> Result<Acquired, GpuError> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::Outdated),
        Err(result) => Err(GpuError::Vulkan {
            what: "Swapchain image acquire",
            result,
        }),
    }
}

pub fn classify_present(result: Result<bool, vk::Result>) -> Result<Presented, GpuError> {
    match result {
        Ok(false) => Ok(Presented::Ok),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::NeedsRecreate),
        Err(result) => Err(GpuError::Vulkan {
            what: "Queue present",
            result,
        }),
    }
}

pub struct Swapchain {
    swapchain: vk::SwapchainKHR,
    loader: khr::Swapchain,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    settings: SwapchainSettings,
    preferred_present_mode: vk::PresentModeKHR,
    surface: PresentationSurface,
    device: Arc<DeviceContext>,
}

impl Swapchain {
    /// Takes ownership of the surface; it is destroyed with the swapchain.
    pub fn new(
        device: Arc<DeviceContext>,
        surface: PresentationSurface,
        desired_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self, InitError> {
        let loader = khr::Swapchain::new(device.instance(), device.device());

        let built = Self::build(
            &device,
            &loader,
            &surface,
            desired_extent,
            preferred_present_mode,
            vk::SwapchainKHR::null(),
        );

        let (swapchain, images, image_views, settings) = match built {
            Ok(built) => built,
            Err(e) => {
                unsafe { surface.destroy() };
                return Err(e);
            }
        };

        log::info!("Present mode: {:?}", settings.present_mode);
        log::info!(
            "Created swapchain: {}x{}, {:?}, {} images",
            settings.extent.width,
            settings.extent.height,
            settings.format,
            images.len()
        );

        Ok(Self {
            swapchain,
            loader,
            images,
            image_views,
            settings,
            preferred_present_mode,
            surface,
            device,
        })
    }

    fn build(
        device: &DeviceContext,
        loader: &khr::Swapchain,
        surface: &PresentationSurface,
        desired_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>, Vec<vk::ImageView>, SwapchainSettings), InitError> {
        let support = SurfaceSupport::query(surface, device.physical_device()).init_context("Surface query")?;
        let settings = SwapchainSettings::choose(&support, desired_extent, preferred_present_mode).ok_or(
            InitError::Vulkan {
                what: "Surface format selection",
                result: vk::Result::ERROR_FORMAT_NOT_SUPPORTED,
            },
        )?;

        let families = device.queue_families();
        let family_indices = [families.graphics, families.present];
        let (sharing_mode, shared_families) = if families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, &family_indices[..0])
        } else {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(settings.image_count)
            .image_format(settings.format)
            .image_color_space(settings.color_space)
            .image_extent(settings.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(settings.pre_transform)
            .composite_alpha(settings.composite_alpha)
            .present_mode(settings.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }.init_context("Swapchain creation")?;

        let images = match unsafe { loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(result) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(InitError::Vulkan {
                    what: "Swapchain image query",
                    result,
                });
            }
        };

        let views = create_image_views(
            &images,
            |image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(settings.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe { device.device().create_image_view(&create_info, None) }
            },
            |view| unsafe { device.device().destroy_image_view(view, None) },
        );

        match views {
            Ok(views) => Ok((swapchain, images, views, settings)),
            Err(result) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                Err(InitError::Vulkan {
                    what: "Swapchain image view creation",
                    result,
                })
            }
        }
    }

    /// Rebuild the swapchain for a new surface extent.
    ///
    /// Waits for the device to go idle first. Image views handed out before
    /// this call are destroyed.
    pub fn recreate(&mut self, new_extent: vk::Extent2D) -> Result<(), GpuError> {
        self.device.wait_idle().gpu_context("Device wait idle")?;

        let (swapchain, images, image_views, settings) = Self::build(
            &self.device,
            &self.loader,
            &self.surface,
            new_extent,
            self.preferred_present_mode,
            self.swapchain,
        )?;

        unsafe { self.destroy_chain() };

        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;
        self.settings = settings;

        log::info!(
            "Swapchain recreated: {}x{}, {} images",
            settings.extent.width,
            settings.extent.height,
            self.images.len()
        );
        Ok(())
    }

    /// Acquire next image for rendering; signals `semaphore` when it is ready
    pub fn acquire_next(&self, semaphore: vk::Semaphore) -> Result<Acquired, GpuError> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Present rendered image to screen once `wait_semaphore` is signaled
    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphore: vk::Semaphore) -> Result<Presented, GpuError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        classify_present(unsafe { self.loader.queue_present(queue, &present_info) })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    pub fn format(&self) -> vk::Format {
        self.settings.format
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    unsafe fn destroy_chain(&mut self) {
        for view in self.image_views.drain(..) {
            self.device.device().destroy_image_view(view, None);
        }
        self.loader.destroy_swapchain(self.swapchain, None);
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.destroy_chain();
            self.surface.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn support(current_extent: vk::Extent2D) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent,
                min_image_extent: extent(1, 1),
                max_image_extent: extent(4096, 4096),
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    const VARIABLE: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn recreating_with_same_extent_is_idempotent() {
        let support = support(VARIABLE);
        let first = SwapchainSettings::choose(&support, extent(800, 600), vk::PresentModeKHR::MAILBOX).unwrap();
        let second = SwapchainSettings::choose(&support, extent(800, 600), vk::PresentModeKHR::MAILBOX).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn recreated_extent_follows_latest_surface_size() {
        let support = support(VARIABLE);
        let before = SwapchainSettings::choose(&support, extent(800, 600), vk::PresentModeKHR::MAILBOX).unwrap();
        let after = SwapchainSettings::choose(&support, extent(1024, 700), vk::PresentModeKHR::MAILBOX).unwrap();

        assert_eq!(before.extent, extent(800, 600));
        assert_eq!(after.extent, extent(1024, 700));

        // Surfaces that dictate their size win over the request
        let fixed = SwapchainSettings::choose(
            &self::support(extent(1920, 1080)),
            extent(1024, 700),
            vk::PresentModeKHR::MAILBOX,
        )
        .unwrap();
        assert_eq!(fixed.extent, extent(1920, 1080));
    }

    #[test]
    fn extent_is_clamped_to_surface_limits() {
        let mut support = support(VARIABLE);
        support.capabilities.max_image_extent = extent(1000, 1000);
        support.capabilities.min_image_extent = extent(100, 100);

        assert_eq!(choose_extent(&support.capabilities, extent(5000, 10)), extent(1000, 100));
    }

    #[test]
    fn prefers_srgb_format() {
        let support = support(VARIABLE);
        let chosen = choose_surface_format(&support.formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);

        let other = [vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert_eq!(choose_surface_format(&other).unwrap().format, vk::Format::R16G16B16A16_SFLOAT);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_configured_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps), 3, "zero max means unbounded");

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn acquire_results_are_classified() {
        assert_eq!(
            classify_acquire(Ok((2, false))).unwrap(),
            Acquired::Image {
                index: 2,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Ok((0, true))).unwrap(),
            Acquired::Image {
                index: 0,
                suboptimal: true
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Acquired::Outdated
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST))
            .unwrap_err()
            .is_device_lost());
    }

    #[test]
    fn present_results_are_classified() {
        assert_eq!(classify_present(Ok(false)).unwrap(), Presented::Ok);
        assert_eq!(classify_present(Ok(true)).unwrap(), Presented::NeedsRecreate);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            Presented::NeedsRecreate
        );
        assert!(classify_present(Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)).is_err());
    }

    #[test]
    fn image_views_are_cleaned_up_on_partial_failure() {
        let images = [vk::Image::from_raw(1), vk::Image::from_raw(2), vk::Image::from_raw(3)];
        let calls = RefCell::new(0u64);
        let destroyed = RefCell::new(Vec::new());

        let result = create_image_views(
            &images,
            |_| {
                let mut call = calls.borrow_mut();
                *call += 1;
                if *call < 3 {
                    Ok(vk::ImageView::from_raw(10 + *call))
                } else {
                    Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
                }
            },
            |view| destroyed.borrow_mut().push(view),
        );

        assert_eq!(result, Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY));
        assert_eq!(
            destroyed.borrow().as_slice(),
            &[vk::ImageView::from_raw(11), vk::ImageView::from_raw(12)]
        );
    }
}
