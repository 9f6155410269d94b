// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

/// Installs the global fmt subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports once per window.
#[derive(Debug)]
pub struct FrameRateCounter {
    frames: u32,
    window: Duration,
    started: Instant,
}

impl FrameRateCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            frames: 0,
            window,
            started: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Returns the frame count for the elapsed window and restarts it, or
    /// `None` while the window is still open.
    pub fn tick(&mut self, now: Instant) -> Option<u32> {
        if now.duration_since(self.started) < self.window {
            return None;
        }
        let frames = self.frames;
        self.frames = 0;
        self.started = now;
        Some(frames)
    }

    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.started = now;
    }
}

impl Default for FrameRateCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_only_after_window_elapses() {
        let t0 = Instant::now();
        let mut fps = FrameRateCounter::starting_at(Duration::from_secs(1), t0);
        fps.frame();
        fps.frame();
        assert_eq!(fps.tick(t0 + Duration::from_millis(500)), None);
        fps.frame();
        assert_eq!(fps.tick(t0 + Duration::from_secs(1)), Some(3));
        // window restarted
        assert_eq!(fps.tick(t0 + Duration::from_millis(1500)), None);
        assert_eq!(fps.tick(t0 + Duration::from_secs(2)), Some(0));
    }

    #[test]
    fn reset_drops_pending_frames() {
        let t0 = Instant::now();
        let mut fps = FrameRateCounter::starting_at(Duration::from_secs(1), t0);
        fps.frame();
        fps.reset(t0 + Duration::from_millis(100));
        assert_eq!(fps.tick(t0 + Duration::from_millis(1100)), Some(0));
    }
}
