//! Software output volume and mute
//!
//! Shared between the controller (which handles volume_up / volume_down /
//! mute_toggle) and the playback callback (which applies the gain). It
//! outlives individual sessions so the level survives restarts.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::constants::VOLUME_STEP;

pub struct VolumeControl {
    level_bits: AtomicU32,
    muted: AtomicBool,
}

impl VolumeControl {
    pub fn new(level: f32) -> Self {
        Self {
            level_bits: AtomicU32::new(level.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(false),
        }
    }

    /// Current level in [0.0, 1.0], ignoring mute
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level_bits.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: f32) -> f32 {
        let level = level.clamp(0.0, 1.0);
        self.level_bits.store(level.to_bits(), Ordering::Relaxed);
        level
    }

    /// Adjust by `delta`, clamped, returning the new level
    pub fn change(&self, delta: f32) -> f32 {
        let mut new_level = 0.0;
        let _ = self
            .level_bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                new_level = (f32::from_bits(bits) + delta).clamp(0.0, 1.0);
                Some(new_level.to_bits())
            });
        new_level
    }

    pub fn step_up(&self) -> f32 {
        self.change(VOLUME_STEP)
    }

    pub fn step_down(&self) -> f32 {
        self.change(-VOLUME_STEP)
    }

    /// Flip mute, returning the new state
    pub fn toggle_mute(&self) -> bool {
        !self.muted.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    /// Gain the playback callback multiplies samples by
    pub fn gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.level()
        }
    }
}

impl Default for VolumeControl {
    fn default() -> Self {
        Self::new(1.0)
    }
}
