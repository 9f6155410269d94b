// SPDX-License-Identifier: CEPL-1.0
//! Thin window-system layer. The app reaches winit through this re-export so
//! the version is pinned in one place.
pub use winit;

use anyhow::{Context, Result};
use tracing::debug;
use winit::{
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::ActiveEventLoop,
    window::{Window, WindowAttributes},
};

/// Attributes for the render window at the requested physical size.
pub fn window_attributes(title: &str, width: u32, height: u32) -> WindowAttributes {
    Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)))
}

pub fn create_window(
    event_loop: &ActiveEventLoop,
    title: &str,
    width: u32,
    height: u32,
) -> Result<Window> {
    let window = event_loop
        .create_window(window_attributes(title, width, height))
        .context("create_window")?;
    let size = window.inner_size();
    debug!("window '{}' created ({}x{})", title, size.width, size.height);
    Ok(window)
}

/// The only event the engine treats as a quit request.
pub fn is_quit_request(event: &WindowEvent) -> bool {
    matches!(event, WindowEvent::CloseRequested | WindowEvent::Destroyed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_and_destroy_mean_quit() {
        assert!(is_quit_request(&WindowEvent::CloseRequested));
        assert!(is_quit_request(&WindowEvent::Destroyed));
        assert!(!is_quit_request(&WindowEvent::Focused(true)));
    }
}
