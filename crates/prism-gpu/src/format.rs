//! Surface format, present mode, extent and depth format negotiation.
//!
//! Everything here is a pure function of what the surface and adapter report,
//! so a rebuild can be planned and tested without touching the GPU.

use crate::config::PresentSettings;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceSupport;
use ash::vk;

/// Surface formats tried in order, all in the sRGB non-linear color space.
pub const PREFERRED_SURFACE_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];

/// Pick a surface format, falling back to the first one supported.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    PREFERRED_SURFACE_FORMATS
        .iter()
        .find_map(|&wanted| {
            available.iter().copied().find(|candidate| {
                candidate.format == wanted
                    && candidate.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
        })
        .or_else(|| available.first().copied())
}

/// Present modes in order of preference.
pub fn present_mode_priority(vsync: bool) -> Vec<vk::PresentModeKHR> {
    let mut modes = vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
    if !vsync {
        modes.insert(0, vk::PresentModeKHR::IMMEDIATE);
    }
    modes
}

/// Pick the first preferred mode the surface supports, else FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    present_mode_priority(vsync)
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO support is mandatory
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Images a present mode needs to run without stalling.
pub fn min_image_count_for(mode: vk::PresentModeKHR) -> u32 {
    match mode {
        vk::PresentModeKHR::MAILBOX => 3,
        vk::PresentModeKHR::FIFO | vk::PresentModeKHR::FIFO_RELAXED => 2,
        _ => 1,
    }
}

/// Image count for the swapchain, within what the surface allows.
pub fn choose_image_count(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    mode: vk::PresentModeKHR,
) -> u32 {
    let count = capabilities.min_image_count.max(min_image_count_for(mode));
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Swapchain extent: the surface's own size if it has one, else the window's, clamped.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: window.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: window.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Whether an extent has no pixels to render into.
pub fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

/// Composite alpha mode, preferring the ones that blend with the desktop.
pub fn choose_composite_alpha(supported: vk::CompositeAlphaFlagsKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|&mode| supported.contains(mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Depth/stencil formats worth trying for the requested precision.
pub fn depth_candidates(settings: &PresentSettings) -> &'static [vk::Format] {
    match (settings.depth_buffer_bits > 0, settings.stencil_buffer_bits > 0) {
        (false, false) => &[],
        (true, false) => &[
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM,
            vk::Format::D16_UNORM_S8_UINT,
        ],
        (false, true) => &[
            vk::Format::S8_UINT,
            vk::Format::D16_UNORM_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT_S8_UINT,
        ],
        (true, true) => &[
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D16_UNORM_S8_UINT,
        ],
    }
}

/// Bits of depth a format stores.
pub fn depth_bits(format: vk::Format) -> u32 {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 32,
        vk::Format::D24_UNORM_S8_UINT | vk::Format::X8_D24_UNORM_PACK32 => 24,
        vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT => 16,
        _ => 0,
    }
}

/// Bits of stencil a format stores.
pub fn stencil_bits(format: vk::Format) -> u32 {
    match format {
        vk::Format::S8_UINT
        | vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => 8,
        _ => 0,
    }
}

/// Check that `format` holds the requested depth and stencil precision.
pub fn validate_depth_format(format: vk::Format, settings: &PresentSettings) -> Result<()> {
    let depth = settings.depth_buffer_bits;
    let stencil = settings.stencil_buffer_bits;

    if stencil > 8 || (stencil > 0 && stencil_bits(format) == 0) {
        return Err(GpuError::FormatNegotiation(format!(
            "No format with a {stencil}-bit stencil buffer (got {format:?})"
        )));
    }

    let available = depth_bits(format);
    if depth > 32
        || (depth > 24 && available < 32)
        || (depth > 16 && available < 24)
        || (depth > 0 && available == 0)
    {
        return Err(GpuError::FormatNegotiation(format!(
            "No format with a {depth}-bit depth buffer (got {format:?})"
        )));
    }

    Ok(())
}

/// Choose the depth/stencil attachment format.
///
/// `supported` reports whether a format can be an optimally tiled
/// depth/stencil attachment. Returns `UNDEFINED` when neither depth nor
/// stencil is requested.
pub fn negotiate_depth_format<F>(settings: &PresentSettings, supported: F) -> Result<vk::Format>
where
    F: Fn(vk::Format) -> bool,
{
    if !settings.wants_depth_stencil() {
        return Ok(vk::Format::UNDEFINED);
    }

    let format = depth_candidates(settings)
        .iter()
        .copied()
        .find(|&format| supported(format))
        .ok_or_else(|| {
            GpuError::FormatNegotiation(format!(
                "No depth/stencil attachment format for {} depth bits and {} stencil bits",
                settings.depth_buffer_bits, settings.stencil_buffer_bits
            ))
        })?;

    validate_depth_format(format, settings)?;
    Ok(format)
}

/// Everything needed to create a swapchain, decided up front.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPlan {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
}

impl SwapchainPlan {
    /// Plan a swapchain for the surface.
    ///
    /// Returns `Ok(None)` when the extent is degenerate, e.g. while the window
    /// is minimized.
    pub fn negotiate(
        support: &SurfaceSupport,
        settings: &PresentSettings,
        window: vk::Extent2D,
    ) -> Result<Option<Self>> {
        let capabilities = &support.capabilities;

        let extent = choose_extent(capabilities, window);
        if is_degenerate(extent) {
            return Ok(None);
        }

        let surface_format = select_surface_format(&support.formats).ok_or_else(|| {
            GpuError::SwapchainCreation("Surface reports no formats".to_string())
        })?;
        let present_mode = select_present_mode(&support.present_modes, settings.vsync);

        Ok(Some(Self {
            surface_format,
            present_mode,
            image_count: choose_image_count(capabilities, present_mode),
            extent,
            pre_transform: capabilities.current_transform,
            composite_alpha: choose_composite_alpha(capabilities.supported_composite_alpha),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32, current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: current,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    const UNDEFINED_EXTENT: vk::Extent2D = vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    };

    #[test]
    fn typical_desktop_surface_plan() {
        let mut caps = capabilities(2, 3, UNDEFINED_EXTENT);
        caps.min_image_extent = extent(64, 64);
        let support = SurfaceSupport {
            capabilities: caps,
            formats: vec![srgb(vk::Format::B8G8R8A8_UNORM)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let settings = PresentSettings::default().with_vsync(true);

        let plan = SwapchainPlan::negotiate(&support, &settings, extent(800, 600))
            .unwrap()
            .unwrap();
        assert_eq!(plan.surface_format.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(plan.present_mode, vk::PresentModeKHR::FIFO);
        assert!(plan.image_count >= 2);
        assert_eq!(plan.extent, extent(800, 600));
        assert_eq!(plan.composite_alpha, vk::CompositeAlphaFlagsKHR::OPAQUE);
    }

    #[test]
    fn surface_format_follows_preference_then_falls_back() {
        let available = [
            srgb(vk::Format::R8G8B8A8_UNORM),
            srgb(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );

        // Wrong color space does not count as a match
        let hdr = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::HDR10_ST2084_EXT,
        };
        let available = [srgb(vk::Format::A2B10G10R10_UNORM_PACK32), hdr];
        assert_eq!(
            select_surface_format(&available).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );

        assert!(select_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_prefers_immediate_without_vsync() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO_RELAXED], false),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(select_present_mode(&[], true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn image_count_respects_surface_limits() {
        let caps = capabilities(2, 3, extent(800, 600));
        assert_eq!(choose_image_count(&caps, vk::PresentModeKHR::MAILBOX), 3);
        assert_eq!(choose_image_count(&caps, vk::PresentModeKHR::FIFO), 2);
        assert_eq!(choose_image_count(&caps, vk::PresentModeKHR::IMMEDIATE), 2);

        let capped = capabilities(1, 2, extent(800, 600));
        assert_eq!(choose_image_count(&capped, vk::PresentModeKHR::MAILBOX), 2);

        // Zero maximum means unbounded
        let unbounded = capabilities(4, 0, extent(800, 600));
        assert_eq!(choose_image_count(&unbounded, vk::PresentModeKHR::MAILBOX), 4);
    }

    #[test]
    fn defined_surface_extent_wins_over_window_size() {
        let caps = capabilities(2, 3, extent(1024, 768));
        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(1024, 768));
    }

    #[test]
    fn undefined_surface_extent_clamps_window_size() {
        let mut caps = capabilities(2, 3, UNDEFINED_EXTENT);
        caps.min_image_extent = extent(100, 100);
        caps.max_image_extent = extent(1920, 1080);

        assert_eq!(choose_extent(&caps, extent(800, 600)), extent(800, 600));
        assert_eq!(choose_extent(&caps, extent(4000, 50)), extent(1920, 100));
    }

    #[test]
    fn degenerate_extent_plans_nothing() {
        let support = SurfaceSupport {
            capabilities: capabilities(2, 3, extent(0, 0)),
            formats: vec![srgb(vk::Format::B8G8R8A8_UNORM)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        let plan =
            SwapchainPlan::negotiate(&support, &PresentSettings::default(), extent(0, 0)).unwrap();
        assert!(plan.is_none());

        assert!(is_degenerate(extent(0, 600)));
        assert!(is_degenerate(extent(800, 0)));
        assert!(!is_degenerate(extent(1, 1)));
    }

    #[test]
    fn composite_alpha_preference() {
        let all = vk::CompositeAlphaFlagsKHR::OPAQUE
            | vk::CompositeAlphaFlagsKHR::INHERIT
            | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(all),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
        assert_eq!(
            choose_composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn no_depth_or_stencil_means_undefined() {
        let settings = PresentSettings::default().with_depth_bits(0);
        let format = negotiate_depth_format(&settings, |_| true).unwrap();
        assert_eq!(format, vk::Format::UNDEFINED);
    }

    #[test]
    fn depth_and_stencil_grid_with_full_support() {
        let expected = [
            ((0, 0), Some(vk::Format::UNDEFINED)),
            ((16, 0), Some(vk::Format::D32_SFLOAT)),
            ((24, 0), Some(vk::Format::D32_SFLOAT)),
            ((32, 0), Some(vk::Format::D32_SFLOAT)),
            ((0, 8), Some(vk::Format::S8_UINT)),
            ((16, 8), Some(vk::Format::D32_SFLOAT_S8_UINT)),
            ((24, 8), Some(vk::Format::D32_SFLOAT_S8_UINT)),
            ((32, 8), Some(vk::Format::D32_SFLOAT_S8_UINT)),
        ];

        for ((depth, stencil), want) in expected {
            let settings = PresentSettings::default()
                .with_depth_bits(depth)
                .with_stencil_bits(stencil);
            let got = negotiate_depth_format(&settings, |_| true).ok();
            assert_eq!(got, want, "depth {depth} stencil {stencil}");
        }
    }

    #[test]
    fn depth_and_stencil_grid_with_only_16_bit_formats() {
        let only_16 = |format: vk::Format| {
            matches!(
                format,
                vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT
            )
        };

        for depth in [0, 16, 24, 32] {
            for stencil in [0, 8] {
                let settings = PresentSettings::default()
                    .with_depth_bits(depth)
                    .with_stencil_bits(stencil);
                let result = negotiate_depth_format(&settings, only_16);
                if depth > 16 {
                    assert!(
                        matches!(result, Err(GpuError::FormatNegotiation(_))),
                        "depth {depth} stencil {stencil} should fail"
                    );
                } else {
                    let format = result.unwrap();
                    assert!(depth_bits(format) >= depth);
                    assert!(stencil_bits(format) >= stencil);
                }
            }
        }
    }

    #[test]
    fn precision_beyond_hardware_is_rejected() {
        let too_deep = PresentSettings::default().with_depth_bits(48);
        assert!(matches!(
            negotiate_depth_format(&too_deep, |_| true),
            Err(GpuError::FormatNegotiation(_))
        ));

        let wide_stencil = PresentSettings::default()
            .with_depth_bits(0)
            .with_stencil_bits(16);
        assert!(matches!(
            negotiate_depth_format(&wide_stencil, |_| true),
            Err(GpuError::FormatNegotiation(_))
        ));
    }

    #[test]
    fn stencil_only_falls_back_to_combined_formats() {
        let settings = PresentSettings::default()
            .with_depth_bits(0)
            .with_stencil_bits(8);
        let format =
            negotiate_depth_format(&settings, |f| f == vk::Format::D24_UNORM_S8_UINT).unwrap();
        assert_eq!(format, vk::Format::D24_UNORM_S8_UINT);
    }

    #[test]
    fn validation_checks_channels() {
        let stencil = PresentSettings::default()
            .with_depth_bits(0)
            .with_stencil_bits(8);
        assert!(validate_depth_format(vk::Format::D32_SFLOAT, &stencil).is_err());

        let depth = PresentSettings::default().with_depth_bits(24);
        assert!(validate_depth_format(vk::Format::S8_UINT, &depth).is_err());
        assert!(validate_depth_format(vk::Format::D16_UNORM, &depth).is_err());
        assert!(validate_depth_format(vk::Format::D24_UNORM_S8_UINT, &depth).is_ok());
    }
}
