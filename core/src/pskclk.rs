//! Differential PSK with an embedded clock: every symbol period is split
//! into a reference half-symbol (phase 0) followed by a data half-symbol
//! (phase offset `2*pi*sym/N`); the receiver recovers `sym` from the phase
//! difference between the two halves, measured at a single FFT bin tuned to
//! the carrier frequency.

use std::f64::consts::PI;

use crate::bitcursor::BitAccumulator;
use crate::error::{ModemError, Result};
use crate::srcfft::{synth_tone, synth_tone_phase, ProcessOutcome, SrcFft};

/// Stop accumulating carrier wavelengths into one FFT block once fewer than
/// this many such blocks would fit in a half-symbol.
const OVERSAMPLE: usize = 4;

#[derive(Debug, Clone)]
pub struct PskClkParams {
    pub samplerate: usize,
    pub bitrate: usize,
    pub frequency: f64,
    pub bandwidth: usize,
    pub symbols: usize,
    pub percent_thresh: f64,
}

fn bits_for_symbols(requested: usize) -> usize {
    let requested = requested.max(2);
    let mut k = 0;
    while (1usize << k) < requested {
        k += 1;
    }
    k
}

fn angle_diff(a: f64, b: f64) -> f64 {
    let mut d = a - b;
    while d > PI {
        d -= 2.0 * PI;
    }
    while d < -PI {
        d += 2.0 * PI;
    }
    d
}

#[derive(Debug, Clone, Copy)]
enum State {
    BaseSearch,
    BaseAcquire { base_ang: f64 },
    BaseDetected { base_ang: f64, fft_count: usize },
    DataSearch { base_ang: f64 },
    DataAcquire { base_ang: f64, data_ang: f64 },
    DataDetected { base_ang: f64, data_ang: f64, fft_count: usize },
}

pub struct PskClkDemodulator {
    srcfft: SrcFft,
    k: usize,
    symbol_count: usize,
    fftbin: usize,
    fft_per_halfsym: usize,
    state: State,
    bits: BitAccumulator,
}

impl PskClkDemodulator {
    pub fn new(params: &PskClkParams) -> Result<Self> {
        if params.bitrate == 0 {
            return Err(ModemError::ConfigError("bitrate must be >= 1".into()));
        }
        if params.frequency * 2.0 > params.bandwidth as f64 {
            return Err(ModemError::ConfigError("carrier frequency must be below half the bandwidth".into()));
        }
        let k = bits_for_symbols(params.symbols);
        let symbol_count = 1usize << k;
        let symbol_rate = params.bitrate as f64 / k as f64;
        let samples_per_symbol = (params.samplerate as f64 / symbol_rate).round() as usize;
        let half = (samples_per_symbol / 2).max(1);

        // Measure the carrier by accumulating whole wavelengths into one FFT
        // block until fewer than OVERSAMPLE such blocks fit in a half-symbol.
        let wavelength = params.samplerate as f64 / params.frequency;
        let mut demod_samp_per_fft = 0usize;
        let fft_per_halfsym;
        loop {
            demod_samp_per_fft = ((demod_samp_per_fft as f64) + wavelength) as usize;
            if demod_samp_per_fft == 0 {
                return Err(ModemError::ConfigError("carrier frequency too high for this samplerate".into()));
            }
            let count = half / demod_samp_per_fft;
            if count <= OVERSAMPLE {
                fft_per_halfsym = count;
                break;
            }
        }
        if fft_per_halfsym < 1 {
            return Err(ModemError::ConfigError(
                "carrier frequency yields fewer than one FFT block per half-symbol".into(),
            ));
        }

        let mut srcfft = SrcFft::new(params.samplerate, demod_samp_per_fft, params.bandwidth, 0)?;
        let fftbin = (params.frequency * srcfft.output_bins() as f64 / params.bandwidth as f64) as usize;

        let mut offset = 0usize;
        let calib_frame = loop {
            let chunk = synth_tone(params.frequency, params.samplerate, 1.0, offset, srcfft.fft_block().max(1));
            offset += chunk.len();
            match srcfft.process(&chunk)? {
                ProcessOutcome::Frame(f) => break f,
                ProcessOutcome::NeedMore => continue,
            }
        };
        srcfft.set_thresh(calib_frame.mag[fftbin] * params.percent_thresh);
        srcfft.reset();

        Ok(Self {
            srcfft,
            k,
            symbol_count,
            fftbin,
            fft_per_halfsym,
            state: State::BaseSearch,
            bits: BitAccumulator::new(),
        })
    }

    pub fn demodulate(&mut self, samples: &[f64]) -> Result<Vec<u8>> {
        let mut frame = self.srcfft.process(samples)?;
        loop {
            match frame {
                ProcessOutcome::Frame(f) => self.handle_frame(&f),
                ProcessOutcome::NeedMore => break,
            }
            frame = self.srcfft.process(&[])?;
        }
        Ok(self.bits.drain_bytes())
    }

    fn tolerance(&self) -> f64 {
        2.0 * PI / self.symbol_count as f64
    }

    fn handle_frame(&mut self, frame: &crate::srcfft::Frame) {
        let tol = self.tolerance();
        let tone_detected = frame.detect.contains(&self.fftbin);
        let ang = frame.ang[self.fftbin];

        self.state = match self.state {
            State::BaseSearch => {
                if tone_detected {
                    State::BaseAcquire { base_ang: ang }
                } else {
                    State::BaseSearch
                }
            }
            State::BaseAcquire { base_ang } => {
                if !tone_detected || angle_diff(ang, base_ang).abs() > tol {
                    State::BaseSearch
                } else {
                    State::BaseDetected { base_ang, fft_count: 2 }
                }
            }
            State::BaseDetected { base_ang, fft_count } => {
                if fft_count >= self.fft_per_halfsym {
                    State::DataSearch { base_ang }
                } else if tone_detected && angle_diff(ang, base_ang).abs() > tol {
                    log::trace!("psk-clk premature phase change while measuring base tone");
                    State::DataAcquire { base_ang, data_ang: ang }
                } else {
                    State::BaseDetected { base_ang, fft_count: fft_count + 1 }
                }
            }
            State::DataSearch { base_ang } => {
                if tone_detected {
                    State::DataAcquire { base_ang, data_ang: ang }
                } else {
                    State::DataSearch { base_ang }
                }
            }
            State::DataAcquire { base_ang, data_ang } => {
                if !tone_detected || angle_diff(ang, data_ang).abs() > tol {
                    log::trace!("psk-clk lost carrier or phase jumped during data acquire, back to base search");
                    State::BaseSearch
                } else {
                    let diff = angle_diff(data_ang, base_ang).rem_euclid(2.0 * PI);
                    let sym = ((diff * self.symbol_count as f64 / (2.0 * PI)).round() as usize) % self.symbol_count;
                    self.bits.push_symbol(sym as u32, self.k);
                    State::DataDetected { base_ang, data_ang, fft_count: 2 }
                }
            }
            State::DataDetected { base_ang, data_ang, fft_count } => {
                if fft_count >= self.fft_per_halfsym {
                    State::BaseSearch
                } else if tone_detected && angle_diff(ang, data_ang).abs() > tol {
                    log::trace!("psk-clk premature phase change while measuring data tone");
                    State::BaseAcquire { base_ang: ang }
                } else {
                    State::DataDetected { base_ang, data_ang, fft_count: fft_count + 1 }
                }
            }
        };
    }
}

pub struct PskClkModulator {
    params: PskClkParams,
    k: usize,
    half_samples: usize,
}

impl PskClkModulator {
    pub fn new(params: PskClkParams) -> Result<Self> {
        if params.bitrate == 0 {
            return Err(ModemError::ConfigError("bitrate must be >= 1".into()));
        }
        let k = bits_for_symbols(params.symbols);
        let symbol_rate = params.bitrate as f64 / k as f64;
        let samples_per_symbol = (params.samplerate as f64 / symbol_rate).round() as usize;
        let half_samples = (samples_per_symbol / 2).max(1);
        Ok(Self { params, k, half_samples })
    }

    pub fn modulate(&mut self, data: &[u8]) -> Result<Vec<f64>> {
        let symbol_count = 1usize << self.k;
        let mut out = Vec::new();
        let total_bits = data.len() * 8;
        let mut bit_pos = 0usize;
        while bit_pos < total_bits {
            let sym = crate::bitcursor::get(data, bit_pos, self.k) as usize % symbol_count;
            bit_pos += self.k;

            let reference = synth_tone_phase(self.params.frequency, self.params.samplerate, 0.8, 0.0, self.half_samples);
            out.extend(reference);

            let phase = 2.0 * PI * sym as f64 / symbol_count as f64;
            let data_half = synth_tone_phase(self.params.frequency, self.params.samplerate, 0.8, phase, self.half_samples);
            out.extend(data_half);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PskClkParams {
        PskClkParams { samplerate: 8000, bitrate: 100, frequency: 1000.0, bandwidth: 2000, symbols: 4, percent_thresh: 0.3 }
    }

    #[test]
    fn constructs_with_valid_params() {
        let p = params();
        assert!(PskClkDemodulator::new(&p).is_ok());
        assert!(PskClkModulator::new(p).is_ok());
    }

    #[test]
    fn modulate_produces_nonempty_waveform() {
        let p = params();
        let mut modulator = PskClkModulator::new(p).unwrap();
        let samples = modulator.modulate(&[0b1011_0001]).unwrap();
        assert!(!samples.is_empty());
    }

    #[test]
    fn rejects_carrier_above_half_bandwidth() {
        let mut p = params();
        p.frequency = 1500.0;
        assert!(PskClkDemodulator::new(&p).is_err());
    }
}
