// DSP utilities - audio hygiene for the output callback and click synthesis

use std::f32::consts::PI;

/// Flush denormals to zero
///
/// Values this small are far below 32-bit noise and can stall some CPUs.
#[inline]
pub fn flush_denormals_to_zero(x: f32) -> f32 {
    if x.abs() < 1e-15 { 0.0 } else { x }
}

/// Soft clipping (tanh saturation) keeping the mix inside [-1, 1]
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

/// 1-pole smoother for parameter changes
///
/// y[n] = y[n-1] + a * (x[n] - y[n-1])
#[derive(Debug, Clone)]
pub struct OnePoleSmoother {
    current: f32,
    coefficient: f32,
}

impl OnePoleSmoother {
    /// `time_constant_ms`: time to reach ~63% of the target
    pub fn new(initial_value: f32, time_constant_ms: f32, sample_rate: f32) -> Self {
        let time_constant_samples = time_constant_ms * 0.001 * sample_rate;
        let coefficient = if time_constant_samples > 1.0 {
            1.0 / time_constant_samples
        } else {
            1.0
        };

        Self {
            current: initial_value,
            coefficient,
        }
    }

    #[inline]
    pub fn process(&mut self, target: f32) -> f32 {
        self.current += self.coefficient * (target - self.current);
        self.current = flush_denormals_to_zero(self.current);
        self.current
    }

    #[inline]
    pub fn reset(&mut self, value: f32) {
        self.current = value;
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.current
    }
}

/// State-variable high-pass filter (Chamberlin topology, 2-pole)
///
/// Used to shape the noise burst of the click.
#[derive(Debug, Clone)]
pub struct HighPass {
    f: f32,
    q: f32,
    low: f32,
    band: f32,
}

impl HighPass {
    pub fn new(cutoff_hz: f32, sample_rate: f32) -> Self {
        // The Chamberlin form is only stable well below Nyquist
        let cutoff = cutoff_hz.clamp(20.0, sample_rate / 12.0);
        Self {
            f: 2.0 * (PI * cutoff / sample_rate).sin(),
            q: std::f32::consts::SQRT_2,
            low: 0.0,
            band: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        self.low += self.f * self.band;
        let high = input - self.low - self.q * self.band;
        self.band += self.f * high;

        self.low = flush_denormals_to_zero(self.low);
        self.band = flush_denormals_to_zero(self.band);
        high
    }

    pub fn reset(&mut self) {
        self.low = 0.0;
        self.band = 0.0;
    }
}
