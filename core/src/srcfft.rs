//! Sample-rate-converting FFT analyzer shared by every frequency-domain
//! demodulator (FSK, FSK-clk, OOK, PSK-clk). Owns a windowed-sinc resampler
//! feeding a real-to-complex FFT, and folds the FFT's useful bins down into
//! a smaller, caller-chosen bin count.

use std::f64::consts::PI;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{ModemError, Result};

/// Half-width (in input samples) of the windowed-sinc interpolation kernel.
const SINC_HALF_TAPS: i64 = 8;

fn windowed_sinc(x: f64, half_width: f64) -> f64 {
    if x.abs() >= half_width {
        return 0.0;
    }
    let sinc = if x.abs() < 1e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    };
    let window = 0.5 * (1.0 + (PI * x / half_width).cos());
    sinc * window
}

/// A fixed-quality windowed-sinc rate converter. `ratio` is output
/// samples produced per input sample.
struct SincResampler {
    ratio: f64,
    buffer: Vec<f64>,
    base_index: i64,
    pos: f64,
}

impl SincResampler {
    fn new(ratio: f64) -> Self {
        Self { ratio, buffer: Vec::new(), base_index: 0, pos: 0.0 }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.base_index = 0;
        self.pos = 0.0;
    }

    fn process(&mut self, input: &[f64]) -> Vec<f64> {
        self.buffer.extend_from_slice(input);
        let taps = SINC_HALF_TAPS;
        let mut out = Vec::new();
        loop {
            let center_floor = self.pos.floor() as i64;
            let lo = center_floor - taps + 1;
            let hi = center_floor + taps;
            if hi >= self.base_index + self.buffer.len() as i64 || lo < self.base_index {
                break;
            }
            let mut acc = 0.0;
            for k in lo..=hi {
                let idx = (k - self.base_index) as usize;
                let d = self.pos - k as f64;
                acc += self.buffer[idx] * windowed_sinc(d, taps as f64);
            }
            out.push(acc);
            self.pos += 1.0 / self.ratio;
        }
        let keep_from = (self.pos.floor() as i64 - taps).max(self.base_index);
        let trim = (keep_from - self.base_index) as usize;
        if trim > 0 {
            let trim = trim.min(self.buffer.len());
            self.buffer.drain(0..trim);
            self.base_index += trim as i64;
        }
        out
    }
}

/// Whether `SrcFft` reports bins crossing an absolute magnitude threshold
/// or a threshold normalized against the frame's own peak.
#[derive(Debug, Clone, Copy)]
enum Threshold {
    None,
    Absolute(f64),
    Normalized(f64),
}

/// One reduced spectral frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub mag: Vec<f64>,
    pub norm: Vec<f64>,
    pub ang: Vec<f64>,
    pub maxbin: usize,
    pub maxmag: f64,
    pub minbin: usize,
    pub minmag: f64,
    pub avgmag: f64,
    pub detect: Vec<usize>,
}

pub enum ProcessOutcome {
    Frame(Frame),
    NeedMore,
}

pub struct SrcFft {
    input_block: usize,
    output_bins: usize,
    fft_block: usize,
    resampler: SincResampler,
    input_ring: Vec<f64>,
    post_resample: Vec<f64>,
    pending_skip: usize,
    ratio: f64,
    threshold: Threshold,
    r2c: Arc<dyn RealToComplex<f64>>,
    used_samples: usize,
}

impl SrcFft {
    pub fn new(
        input_samplerate: usize,
        input_block: usize,
        output_bandwidth: usize,
        mut output_bins: usize,
    ) -> Result<Self> {
        if output_bandwidth == 0 || output_bandwidth > input_samplerate / 2 {
            return Err(ModemError::ConfigError(format!(
                "output_bandwidth {} exceeds Nyquist for samplerate {}",
                output_bandwidth, input_samplerate
            )));
        }
        let ratio = (2 * output_bandwidth) as f64 / input_samplerate as f64;
        let fft_block = (input_block as f64 * ratio).floor() as usize;
        if output_bins == 0 {
            output_bins = fft_block / 2;
        }
        if fft_block == 0 || fft_block < 2 * output_bins {
            return Err(ModemError::ConfigError(format!(
                "fft block {} too small for {} output bins",
                fft_block, output_bins
            )));
        }

        let mut planner = RealFftPlanner::<f64>::new();
        let r2c = planner.plan_fft_forward(fft_block);

        Ok(Self {
            input_block,
            output_bins,
            fft_block,
            resampler: SincResampler::new(ratio),
            input_ring: Vec::new(),
            post_resample: Vec::new(),
            pending_skip: 0,
            ratio,
            threshold: Threshold::None,
            r2c,
            used_samples: 0,
        })
    }

    pub fn reset(&mut self) {
        self.resampler.reset();
        self.input_ring.clear();
        self.post_resample.clear();
        self.pending_skip = 0;
        self.used_samples = 0;
    }

    pub fn set_thresh(&mut self, t: f64) {
        self.threshold = Threshold::Absolute(t);
    }

    pub fn set_norm_thresh(&mut self, t: f64) {
        self.threshold = Threshold::Normalized(t);
    }

    /// Discard `skip_sampleslen` input-rate samples' worth of resampled
    /// output before they reach the FFT, to realign frame boundaries.
    pub fn sync(&mut self, skip_sampleslen: usize) {
        self.pending_skip += (skip_sampleslen as f64 * self.ratio).round() as usize;
    }

    pub fn used_samples(&self) -> usize {
        self.used_samples
    }

    pub fn output_bins(&self) -> usize {
        self.output_bins
    }

    pub fn fft_block(&self) -> usize {
        self.fft_block
    }

    pub fn process(&mut self, samples: &[f64]) -> Result<ProcessOutcome> {
        let old_len = self.input_ring.len();
        self.input_ring.extend_from_slice(samples);
        let mut consumed = 0usize;

        while self.input_ring.len() >= self.input_block {
            let chunk: Vec<f64> = self.input_ring.drain(0..self.input_block).collect();
            consumed += self.input_block;
            let mut resampled = self.resampler.process(&chunk);

            if self.pending_skip > 0 {
                let drop = self.pending_skip.min(resampled.len());
                resampled.drain(0..drop);
                self.pending_skip -= drop;
            }
            self.post_resample.extend(resampled);

            if self.post_resample.len() >= self.fft_block {
                let block: Vec<f64> = self.post_resample.drain(0..self.fft_block).collect();
                // Of the samples drained so far, only the portion beyond what was
                // already queued before this call came from `samples` itself.
                self.used_samples = consumed.saturating_sub(old_len);
                return self.run_fft(block);
            }
        }
        self.used_samples = samples.len();
        Ok(ProcessOutcome::NeedMore)
    }

    fn run_fft(&mut self, mut block: Vec<f64>) -> Result<ProcessOutcome> {
        let mut spectrum = self.r2c.make_output_vec();
        if let Err(e) = self.r2c.process(&mut block, &mut spectrum) {
            log::debug!("fft failed, resetting analyzer: {:?}", e);
            self.reset();
            return Err(ModemError::FrameError(format!("fft failed: {:?}", e)));
        }

        let useful_bins = self.fft_block / 2;
        let mut mag_sum = vec![0.0f64; self.output_bins];
        let mut ang = vec![0.0f64; self.output_bins];

        for i in 0..useful_bins {
            let c = spectrum[i];
            let mag = (c.re * c.re + c.im * c.im).sqrt();
            if mag.is_nan() || mag.is_infinite() {
                log::debug!("non-finite magnitude at useful bin {}, resetting analyzer", i);
                self.reset();
                return Err(ModemError::FrameError("non-finite magnitude in frame".into()));
            }
            let binidx = i * self.output_bins / useful_bins;
            mag_sum[binidx] += mag;

            let mut a = c.im.atan2(c.re) + ang[binidx];
            if a.is_nan() || a.is_infinite() {
                log::debug!("non-finite angle at output bin {}, resetting analyzer", binidx);
                self.reset();
                return Err(ModemError::FrameError("non-finite angle in frame".into()));
            }
            while a < 0.0 {
                a += 2.0 * PI;
            }
            while a >= 2.0 * PI {
                a -= 2.0 * PI;
            }
            ang[binidx] = a;
        }

        let mut maxbin = 0usize;
        let mut maxmag = mag_sum[0];
        let mut minbin = 0usize;
        let mut minmag = mag_sum[0];
        let mut total = 0.0f64;
        for (b, &m) in mag_sum.iter().enumerate() {
            if m > maxmag {
                maxmag = m;
                maxbin = b;
            }
            if m < minmag {
                minmag = m;
                minbin = b;
            }
            total += m;
        }
        let avgmag = total / self.output_bins as f64;

        let norm: Vec<f64> = if maxmag > 0.0 {
            mag_sum.iter().map(|&m| m / maxmag).collect()
        } else {
            vec![0.0; self.output_bins]
        };

        let detect: Vec<usize> = match self.threshold {
            Threshold::None => Vec::new(),
            Threshold::Absolute(t) => mag_sum
                .iter()
                .enumerate()
                .filter(|(_, &m)| m >= t)
                .map(|(b, _)| b)
                .collect(),
            Threshold::Normalized(t) => norm
                .iter()
                .enumerate()
                .filter(|(_, &n)| n >= t)
                .map(|(b, _)| b)
                .collect(),
        };

        Ok(ProcessOutcome::Frame(Frame {
            mag: mag_sum,
            norm,
            ang,
            maxbin,
            maxmag,
            minbin,
            minmag,
            avgmag,
            detect,
        }))
    }
}

/// Synthesizer helper used by the calibrator and by tests: produces
/// `count` samples of a pure tone at `freq` Hz, `samplerate`, starting at
/// sample offset `phase_offset`, scaled by `amplitude`.
pub fn synth_tone(freq: f64, samplerate: usize, amplitude: f64, phase_offset: usize, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| amplitude * (2.0 * PI * freq * (phase_offset + i) as f64 / samplerate as f64).sin())
        .collect()
}

/// Like [`synth_tone`] but with an explicit starting phase in radians
/// instead of a continuous-phase sample offset; used by PSK-clk to emit a
/// discrete phase jump at each half-symbol boundary.
pub fn synth_tone_phase(freq: f64, samplerate: usize, amplitude: f64, phase0: f64, count: usize) -> Vec<f64> {
    (0..count)
        .map(|i| amplitude * (2.0 * PI * freq * i as f64 / samplerate as f64 + phase0).sin())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bandwidth_above_nyquist() {
        assert!(SrcFft::new(8000, 256, 5000, 32).is_err());
    }

    #[test]
    fn produces_frame_once_enough_samples_queued() {
        let mut sf = SrcFft::new(8000, 256, 4000, 32).unwrap();
        let tone = synth_tone(1000.0, 8000, 0.5, 0, 2000);
        let mut got_frame = false;
        for chunk in tone.chunks(64) {
            if let ProcessOutcome::Frame(_) = sf.process(chunk).unwrap() {
                got_frame = true;
                break;
            }
        }
        assert!(got_frame);
    }

    #[test]
    fn used_samples_reports_partial_consumption_when_frame_completes_early() {
        let mut sf = SrcFft::new(8000, 256, 4000, 16).unwrap();
        // Far more samples than needed to complete a single frame; the
        // analyzer should report back less than the full slice length.
        let tone = synth_tone(1200.0, 8000, 0.5, 0, 4000);
        match sf.process(&tone).unwrap() {
            ProcessOutcome::Frame(_) => assert!(sf.used_samples() < tone.len()),
            ProcessOutcome::NeedMore => panic!("expected a frame from this much input"),
        }
    }

    #[test]
    fn used_samples_equals_input_len_when_more_is_needed() {
        let mut sf = SrcFft::new(8000, 256, 4000, 16).unwrap();
        let tone = synth_tone(1200.0, 8000, 0.5, 0, 4);
        match sf.process(&tone).unwrap() {
            ProcessOutcome::NeedMore => assert_eq!(sf.used_samples(), tone.len()),
            ProcessOutcome::Frame(_) => panic!("should not have enough samples yet"),
        }
    }

    #[test]
    fn split_blocks_reach_same_frame_count() {
        let tone = synth_tone(1200.0, 8000, 0.5, 0, 4000);
        let mut a = SrcFft::new(8000, 256, 4000, 16).unwrap();
        let mut b = SrcFft::new(8000, 256, 4000, 16).unwrap();

        let mut frames_a = 0;
        for chunk in tone.chunks(256) {
            if let ProcessOutcome::Frame(_) = a.process(chunk).unwrap() {
                frames_a += 1;
            }
        }
        let mut frames_b = 0;
        for chunk in tone.chunks(37) {
            if let ProcessOutcome::Frame(_) = b.process(chunk).unwrap() {
                frames_b += 1;
            }
        }
        assert_eq!(frames_a, frames_b);
    }
}
