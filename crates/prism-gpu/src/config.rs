//! Presentation settings.

use ash::vk;

/// Settings consulted every time the swapchain is (re)built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentSettings {
    /// Minimum number of bits in the depth buffer. Zero disables depth.
    pub depth_buffer_bits: u32,
    /// Minimum number of bits in the stencil buffer. Zero disables stencil.
    pub stencil_buffer_bits: u32,
    /// Desired MSAA sample count. The adapter may use fewer; zero disables MSAA.
    pub samples: u32,
    /// Prefer vsync-only present modes over immediate presentation.
    pub vsync: bool,
}

impl Default for PresentSettings {
    fn default() -> Self {
        Self {
            depth_buffer_bits: 24,
            stencil_buffer_bits: 0,
            samples: 0,
            vsync: false,
        }
    }
}

impl PresentSettings {
    /// Create settings with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the depth buffer precision.
    pub fn with_depth_bits(mut self, bits: u32) -> Self {
        self.depth_buffer_bits = bits;
        self
    }

    /// Set the stencil buffer precision.
    pub fn with_stencil_bits(mut self, bits: u32) -> Self {
        self.stencil_buffer_bits = bits;
        self
    }

    /// Set the desired MSAA sample count.
    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Whether a depth/stencil attachment is needed at all.
    pub fn wants_depth_stencil(&self) -> bool {
        self.depth_buffer_bits > 0 || self.stencil_buffer_bits > 0
    }

    /// The requested sample count as a power of two in `[1, 64]`, rounded down.
    pub fn requested_sample_count(&self) -> vk::SampleCountFlags {
        let samples = self.samples.clamp(1, 64);
        // Highest set bit
        let exponent = 31 - samples.leading_zeros();
        vk::SampleCountFlags::from_raw(1 << exponent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = PresentSettings::default();
        assert_eq!(settings.depth_buffer_bits, 24);
        assert_eq!(settings.stencil_buffer_bits, 0);
        assert_eq!(settings.samples, 0);
        assert!(!settings.vsync);
        assert!(settings.wants_depth_stencil());
    }

    #[test]
    fn requested_sample_count_rounds_down_to_power_of_two() {
        let count = |samples| PresentSettings::new().with_samples(samples).requested_sample_count();
        assert_eq!(count(0), vk::SampleCountFlags::TYPE_1);
        assert_eq!(count(1), vk::SampleCountFlags::TYPE_1);
        assert_eq!(count(3), vk::SampleCountFlags::TYPE_2);
        assert_eq!(count(4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(count(7), vk::SampleCountFlags::TYPE_4);
        assert_eq!(count(16), vk::SampleCountFlags::TYPE_16);
        assert_eq!(count(1000), vk::SampleCountFlags::TYPE_64);
    }

    #[test]
    fn depth_stencil_disabled_when_both_zero() {
        let settings = PresentSettings::new().with_depth_bits(0).with_stencil_bits(0);
        assert!(!settings.wants_depth_stencil());
        assert!(settings.with_stencil_bits(8).wants_depth_stencil());
    }
}
