use log::info;

/// Render quality tier hinted to renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Low,
    High,
}

/// Tuning the host publishes for the detected device class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimalSettings {
    pub pixel_ratio: f32,
    pub fft_size: usize,
    pub particle_count: usize,
    pub quality: Quality,
}

/// Graphics events delivered by the host shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsEvent {
    ContextLost,
    ContextRestored,
}

/// Keeps the display awake for the duration of a performance. The desktop
/// shell provides the real implementation.
pub trait WakeLock: Send {
    fn acquire(&mut self);
    fn release(&mut self);
}

/// Hosts without a wake-lock facility.
pub struct NoopWakeLock;

impl WakeLock for NoopWakeLock {
    fn acquire(&mut self) {}
    fn release(&mut self) {}
}

/// Host device class, detected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProfile {
    pub mobile: bool,
}

impl HostProfile {
    pub fn detect() -> Self {
        let mobile = cfg!(any(target_os = "android", target_os = "ios"));
        let profile = Self { mobile };
        info!(
            "Host profile: {}",
            if mobile { "mobile" } else { "desktop" }
        );
        profile
    }

    /// Quality hints for this device class. Mobile hosts trade analysis
    /// resolution and particle budget for frame rate.
    pub fn optimal_settings(&self) -> OptimalSettings {
        if self.mobile {
            OptimalSettings {
                pixel_ratio: 1.0,
                fft_size: 2048,
                particle_count: 500,
                quality: Quality::Low,
            }
        } else {
            OptimalSettings {
                pixel_ratio: 2.0,
                fft_size: 8192,
                particle_count: 2000,
                quality: Quality::High,
            }
        }
    }
}
