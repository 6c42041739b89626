//! Swapchain context: the backend's view of an externally-managed swapchain.
//!
//! Surface creation, image acquisition and presentation are platform glue;
//! the backend only needs to take acquired images in order and to know their
//! format, and to hand window textures back at frame cycle.
use ash::vk;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Copy, Clone, Debug)]
pub struct AcquiredImage {
    pub index: u32,
    /// Signalled when the presentation engine is done with the image.
    pub semaphore: vk::Semaphore,
}

pub struct SwapchainContext {
    pub raw: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    /// Images acquired by the platform glue, not yet taken by the registry.
    acquired: Mutex<VecDeque<AcquiredImage>>,
}

impl SwapchainContext {
    pub fn new(
        raw: vk::SwapchainKHR,
        images: Vec<vk::Image>,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> SwapchainContext {
        SwapchainContext {
            raw,
            images,
            format,
            extent,
            usage,
            acquired: Mutex::new(VecDeque::new()),
        }
    }

    /// Called by the platform glue after `vkAcquireNextImageKHR`.
    pub fn push_acquired(&self, index: u32, semaphore: vk::Semaphore) {
        self.acquired
            .lock()
            .unwrap()
            .push_back(AcquiredImage { index, semaphore });
    }

    /// Takes the next acquired image for a window texture.
    pub fn take_next(&self) -> Option<AcquiredImage> {
        self.acquired.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_images_come_out_in_order() {
        let ctx = SwapchainContext::new(
            vk::SwapchainKHR::null(),
            vec![vk::Image::null(), vk::Image::null()],
            vk::Format::B8G8R8A8_SRGB,
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            vk::ImageUsageFlags::COLOR_ATTACHMENT,
        );
        ctx.push_acquired(1, vk::Semaphore::null());
        ctx.push_acquired(0, vk::Semaphore::null());
        assert_eq!(ctx.take_next().unwrap().index, 1);
        assert_eq!(ctx.take_next().unwrap().index, 0);
        assert!(ctx.take_next().is_none());
    }
}
