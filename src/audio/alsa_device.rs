//! ALSA PCM device wrapper for microphone capture.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use super::CaptureError;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open a PCM device for float capture.
///
/// The device is configured for interleaved f32 samples so the fixed-point
/// wire conversion happens in one place, in [`super::encode`]. If anything
/// fails after the device opens, the handle is dropped before the error
/// returns, releasing the device.
pub fn open_capture(
    device: &str,
    sample_rate: u32,
    channels: u32,
) -> Result<(PCM, AlsaParams), CaptureError> {
    let pcm = PCM::new(device, Direction::Capture, false).map_err(classify_open_error)?;

    // Configure hardware parameters. Dropping `pcm` on any failure below
    // releases the device, so a half-configured handle never leaks out.
    {
        let hwp = HwParams::any(&pcm).map_err(classify_config_error)?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(classify_config_error)?;
        hwp.set_format(Format::float())
            .map_err(classify_config_error)?;
        hwp.set_channels(channels).map_err(classify_config_error)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)
            .map_err(classify_config_error)?;
        pcm.hw_params(&hwp).map_err(classify_config_error)?;
    }

    // Read back actual negotiated parameters
    let params = {
        let hwp = pcm.hw_params_current().map_err(classify_config_error)?;
        AlsaParams {
            sample_rate: hwp.get_rate().map_err(classify_config_error)?,
            channels: hwp.get_channels().map_err(classify_config_error)?,
            period_size: hwp.get_period_size().map_err(classify_config_error)? as usize,
        }
    };

    log::info!(
        "ALSA capture: device={}, rate={}, channels={}, period_size={}",
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

/// Classify a failure to open the device at all.
fn classify_open_error(err: alsa::Error) -> CaptureError {
    match std::io::Error::from_raw_os_error(err.errno()).kind() {
        std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
        std::io::ErrorKind::NotFound => CaptureError::DeviceNotFound,
        std::io::ErrorKind::ResourceBusy => CaptureError::DeviceBusy,
        std::io::ErrorKind::Interrupted => CaptureError::Interrupted,
        _ => CaptureError::Unknown(err.to_string()),
    }
}

/// Classify a failure while negotiating hardware parameters on an open device.
fn classify_config_error(err: alsa::Error) -> CaptureError {
    match std::io::Error::from_raw_os_error(err.errno()).kind() {
        std::io::ErrorKind::InvalidInput | std::io::ErrorKind::Unsupported => {
            CaptureError::ConstraintsUnsupported
        }
        std::io::ErrorKind::PermissionDenied => CaptureError::SecurityRestricted,
        std::io::ErrorKind::ResourceBusy => CaptureError::DeviceBusy,
        std::io::ErrorKind::Interrupted => CaptureError::Interrupted,
        _ => CaptureError::ProcessorInitFailed(err.to_string()),
    }
}
