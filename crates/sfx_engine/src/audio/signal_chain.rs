//! Per-instance filter and pitch chain
//!
//! Filters are created on first use and wired in series between the instance
//! and the output. Cutoff and detune changes can be ramped over time; the
//! ramps advance once per frame through [`SignalChain::advance`].

use crate::audio::backend::{AudioDevice, FilterHandle, FilterKind, SoundHandle};
use crate::audio::spatial::OPEN_LOWPASS_HZ;
use crate::audio::tween::Tween;
use crate::audio::AudioError;
use crate::foundation::math::cents_to_rate;

/// Largest pitch offset accepted, in cents
pub const MAX_DETUNE_CENTS: f32 = 2400.0;

const MIN_CUTOFF_HZ: f32 = 10.0;

/// Clamp a cutoff to what a device at `sample_rate` can represent
pub fn clamp_cutoff(hz: f32, sample_rate: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let nyquist_margin = (sample_rate as f32).mul_add(0.5, -50.0);
    let max = OPEN_LOWPASS_HZ.min(nyquist_margin).max(MIN_CUTOFF_HZ);
    if hz.is_finite() {
        hz.clamp(MIN_CUTOFF_HZ, max)
    } else {
        max
    }
}

/// Filter nodes and parameter ramps owned by one instance
#[derive(Debug, Default)]
pub struct SignalChain {
    lowpass: Option<(FilterHandle, f32)>,
    highpass: Option<(FilterHandle, f32)>,
    base_rate: Option<f32>,
    detune_cents: f32,
    lowpass_tween: Option<Tween>,
    detune_tween: Option<Tween>,
}

impl SignalChain {
    /// Empty chain; the instance plays straight to the output
    pub fn new() -> Self {
        Self::default()
    }

    /// Current lowpass cutoff, if a lowpass is attached
    pub fn lowpass_hz(&self) -> Option<f32> {
        self.lowpass.map(|(_, hz)| hz)
    }

    /// Current highpass cutoff, if a highpass is attached
    pub fn highpass_hz(&self) -> Option<f32> {
        self.highpass.map(|(_, hz)| hz)
    }

    /// Current pitch offset in cents
    pub fn detune_cents(&self) -> f32 {
        self.detune_cents
    }

    /// Whether any ramp is still running
    pub fn is_tweening(&self) -> bool {
        self.lowpass_tween.is_some() || self.detune_tween.is_some()
    }

    /// Playback rate the detune fallback scales
    pub fn set_base_rate(&mut self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.base_rate = Some(rate);
        }
    }

    fn filters(&self) -> Vec<FilterHandle> {
        self.lowpass
            .iter()
            .chain(self.highpass.iter())
            .map(|(filter, _)| *filter)
            .collect()
    }

    fn apply_filter(
        &mut self,
        device: &mut dyn AudioDevice,
        handle: SoundHandle,
        kind: FilterKind,
        hz: f32,
    ) -> Result<(), AudioError> {
        let hz = clamp_cutoff(hz, device.sample_rate());
        let slot = match kind {
            FilterKind::Lowpass => &mut self.lowpass,
            FilterKind::Highpass => &mut self.highpass,
        };
        if let Some((filter, current)) = slot {
            device.set_filter_frequency(*filter, hz)?;
            *current = hz;
            return Ok(());
        }

        let filter = device.create_filter(kind, hz)?;
        *slot = Some((filter, hz));
        let chain = self.filters();
        if let Err(e) = device.route_through(handle, &chain) {
            device.destroy_filter(filter);
            match kind {
                FilterKind::Lowpass => self.lowpass = None,
                FilterKind::Highpass => self.highpass = None,
            }
            return Err(e);
        }
        Ok(())
    }

    /// Set the lowpass cutoff immediately, attaching a filter on first use
    pub fn set_lowpass(&mut self, device: &mut dyn AudioDevice, handle: SoundHandle, hz: f32) -> Result<(), AudioError> {
        self.apply_filter(device, handle, FilterKind::Lowpass, hz)
    }

    /// Set the highpass cutoff immediately, attaching a filter on first use
    pub fn set_highpass(&mut self, device: &mut dyn AudioDevice, handle: SoundHandle, hz: f32) -> Result<(), AudioError> {
        self.apply_filter(device, handle, FilterKind::Highpass, hz)
    }

    /// Ramp the lowpass cutoff, replacing any running lowpass ramp
    pub fn tween_lowpass(
        &mut self,
        device: &mut dyn AudioDevice,
        handle: SoundHandle,
        to_hz: f32,
        duration_ms: f32,
    ) -> Result<(), AudioError> {
        self.lowpass_tween = None;
        if duration_ms.is_nan() || duration_ms <= 0.0 {
            return self.set_lowpass(device, handle, to_hz);
        }
        let sample_rate = device.sample_rate();
        let from = self.lowpass_hz().unwrap_or_else(|| clamp_cutoff(OPEN_LOWPASS_HZ, sample_rate));
        if self.lowpass.is_none() {
            self.set_lowpass(device, handle, from)?;
        }
        self.lowpass_tween = Some(Tween::new(from, clamp_cutoff(to_hz, sample_rate), duration_ms));
        Ok(())
    }

    /// Set the pitch offset immediately
    ///
    /// Devices without a detune control get the equivalent rate change.
    pub fn set_detune(&mut self, device: &mut dyn AudioDevice, handle: SoundHandle, cents: f32) -> Result<(), AudioError> {
        let cents = if cents.is_finite() {
            cents.clamp(-MAX_DETUNE_CENTS, MAX_DETUNE_CENTS)
        } else {
            0.0
        };
        match device.set_detune(handle, cents) {
            Ok(()) => {}
            Err(AudioError::Unsupported(_)) => {
                let base = self.base_rate.unwrap_or(1.0);
                device.set_rate(handle, base * cents_to_rate(cents))?;
            }
            Err(e) => return Err(e),
        }
        self.detune_cents = cents;
        Ok(())
    }

    /// Ramp the pitch offset, replacing any running detune ramp
    pub fn tween_detune(
        &mut self,
        device: &mut dyn AudioDevice,
        handle: SoundHandle,
        to_cents: f32,
        duration_ms: f32,
    ) -> Result<(), AudioError> {
        self.detune_tween = None;
        if duration_ms.is_nan() || duration_ms <= 0.0 {
            return self.set_detune(device, handle, to_cents);
        }
        let to = to_cents.clamp(-MAX_DETUNE_CENTS, MAX_DETUNE_CENTS);
        self.detune_tween = Some(Tween::new(self.detune_cents, to, duration_ms));
        Ok(())
    }

    /// Drop running ramps, leaving parameters where they are
    pub fn cancel_tweens(&mut self) {
        self.lowpass_tween = None;
        self.detune_tween = None;
    }

    /// Step running ramps by `delta_ms`
    pub fn advance(&mut self, device: &mut dyn AudioDevice, handle: SoundHandle, delta_ms: f32) -> Result<(), AudioError> {
        if let Some(mut tween) = self.lowpass_tween.take() {
            let hz = tween.advance(delta_ms);
            self.set_lowpass(device, handle, hz)?;
            if !tween.is_finished() {
                self.lowpass_tween = Some(tween);
            }
        }
        if let Some(mut tween) = self.detune_tween.take() {
            let cents = tween.advance(delta_ms);
            self.set_detune(device, handle, cents)?;
            if !tween.is_finished() {
                self.detune_tween = Some(tween);
            }
        }
        Ok(())
    }

    /// Restore direct output, then release the filter nodes
    pub fn detach(&mut self, device: &mut dyn AudioDevice, handle: SoundHandle) {
        self.cancel_tweens();
        let filters = self.filters();
        if filters.is_empty() {
            return;
        }
        if let Err(e) = device.route_through(handle, &[]) {
            log::trace!("Could not restore direct output before detaching filters: {e}");
        }
        for filter in filters {
            device.destroy_filter(filter);
        }
        self.lowpass = None;
        self.highpass = None;
    }
}
