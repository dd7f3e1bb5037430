//! FSK and FSK-clk demodulators/modulators, both built on the shared
//! [`SrcFft`] analyzer. A single [`FskVariant`] selects between a plain
//! multi-tone FSK scheme and one with a dedicated clock tone between data
//! tones for receiver resynchronization.

use crate::bitcursor::BitAccumulator;
use crate::calibrator;
use crate::error::{ModemError, Result};
use crate::srcfft::{synth_tone, ProcessOutcome, SrcFft};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FskVariant {
    Fsk,
    FskClk,
}

fn bits_for_symbols(requested: usize) -> usize {
    let requested = requested.max(2);
    let mut k = 0;
    while (1usize << k) < requested {
        k += 1;
    }
    k
}

/// Shared construction parameters for both FSK variants.
#[derive(Debug, Clone)]
pub struct FskParams {
    pub samplerate: usize,
    pub bitrate: usize,
    pub bandwidth: usize,
    pub symbols: usize,
    pub percent_thresh: f64,
}

struct FskCore {
    variant: FskVariant,
    k: usize,
    symbol_count: usize,
    samples_per_symbol: usize,
    oversample: usize,
    freqs: Vec<f64>,
    clk_idx: usize,
    srcfft: SrcFft,
}

impl FskCore {
    fn build(variant: FskVariant, p: &FskParams) -> Result<Self> {
        if p.bitrate == 0 {
            return Err(ModemError::ConfigError("bitrate must be >= 1".into()));
        }
        let k = bits_for_symbols(p.symbols);
        let symbol_count = 1usize << k;
        let oversample = match variant {
            FskVariant::Fsk => 4,
            FskVariant::FskClk => 8,
        };

        let symbol_rate = p.bitrate as f64 / k as f64;
        let samples_per_symbol = (p.samplerate as f64 / symbol_rate).round() as usize;
        if samples_per_symbol < oversample {
            return Err(ModemError::ConfigError(
                "samples_per_symbol too small for the chosen oversample factor".into(),
            ));
        }
        let input_block = (samples_per_symbol / oversample).max(1);

        let tone_count = match variant {
            FskVariant::Fsk => symbol_count,
            FskVariant::FskClk => symbol_count + 1,
        };
        let clk_idx = tone_count / 2;

        let mut srcfft = SrcFft::new(p.samplerate, input_block, p.bandwidth, tone_count)?;
        let (freqs, _thresh) =
            calibrator::calibrate(&mut srcfft, p.samplerate, p.bandwidth, tone_count, p.percent_thresh)?;

        Ok(Self {
            variant,
            k,
            symbol_count,
            samples_per_symbol,
            oversample,
            freqs,
            clk_idx,
            srcfft,
        })
    }

    fn tone_freq_for_data(&self, symbol: usize) -> f64 {
        match self.variant {
            FskVariant::Fsk => self.freqs[symbol],
            FskVariant::FskClk => {
                let idx = if symbol < self.clk_idx { symbol } else { symbol + 1 };
                self.freqs[idx]
            }
        }
    }

    fn clk_freq(&self) -> f64 {
        self.freqs[self.clk_idx]
    }

    fn bin_to_data_symbol(&self, bin: usize) -> Option<usize> {
        match self.variant {
            FskVariant::Fsk => Some(bin),
            FskVariant::FskClk => {
                if bin == self.clk_idx {
                    None
                } else if bin < self.clk_idx {
                    Some(bin)
                } else {
                    Some(bin - 1)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FskState {
    Search,
    Acquire { databin: usize },
    Detected { skip: usize },
}

#[derive(Debug, Clone, Copy)]
enum FskClkState {
    ClkSearch,
    ClkAcquire,
    ClkDetected,
    DataAcquire { databin: usize },
    DataDetected { skip: usize },
}

enum DemodState {
    Fsk(FskState),
    FskClk(FskClkState),
}

pub struct FskDemodulator {
    core: FskCore,
    state: DemodState,
    miss_count: usize,
    bits: BitAccumulator,
}

impl FskDemodulator {
    pub fn new(variant: FskVariant, params: &FskParams) -> Result<Self> {
        let core = FskCore::build(variant, params)?;
        let state = match variant {
            FskVariant::Fsk => DemodState::Fsk(FskState::Search),
            FskVariant::FskClk => DemodState::FskClk(FskClkState::ClkSearch),
        };
        Ok(Self { core, state, miss_count: 0, bits: BitAccumulator::new() })
    }

    pub fn set_threshold(&mut self, t: f64) {
        self.core.srcfft.set_thresh(t);
    }

    pub fn demodulate(&mut self, samples: &[f64]) -> Result<Vec<u8>> {
        let mut frame = self.core.srcfft.process(samples)?;
        loop {
            match frame {
                ProcessOutcome::Frame(f) => self.handle_frame(f),
                ProcessOutcome::NeedMore => break,
            }
            frame = self.core.srcfft.process(&[])?;
        }
        Ok(self.bits.drain_bytes())
    }

    fn emit(&mut self, symbol: usize) {
        self.bits.push_symbol(symbol as u32, self.core.k);
    }

    fn handle_frame(&mut self, frame: crate::srcfft::Frame) {
        let oversample = self.core.oversample;
        match &mut self.state {
            DemodState::Fsk(state) => {
                let next = match *state {
                    FskState::Search => {
                        if frame.detect.is_empty() {
                            FskState::Search
                        } else {
                            self.miss_count = 0;
                            FskState::Acquire { databin: frame.maxbin }
                        }
                    }
                    FskState::Acquire { databin } => {
                        if frame.detect.is_empty() {
                            self.miss_count += 1;
                            if self.miss_count >= oversample {
                                log::trace!("fsk lost tone at bin {} after {} misses, back to search", databin, self.miss_count);
                                FskState::Search
                            } else {
                                FskState::Acquire { databin }
                            }
                        } else {
                            self.miss_count = 0;
                            if frame.maxbin == databin {
                                self.emit(databin);
                                self.core.srcfft.sync(self.core.samples_per_symbol / oversample);
                                FskState::Detected { skip: oversample.saturating_sub(2) }
                            } else {
                                FskState::Acquire { databin: frame.maxbin }
                            }
                        }
                    }
                    FskState::Detected { skip } => {
                        if skip > 1 {
                            FskState::Detected { skip: skip - 1 }
                        } else if frame.detect.is_empty() {
                            FskState::Acquire { databin: 0 }
                        } else {
                            FskState::Acquire { databin: frame.maxbin }
                        }
                    }
                };
                self.state = DemodState::Fsk(next);
            }
            DemodState::FskClk(state) => {
                let clk_idx = self.core.clk_idx;
                let next = match *state {
                    FskClkState::ClkSearch => {
                        if !frame.detect.is_empty() && frame.maxbin == clk_idx {
                            FskClkState::ClkAcquire
                        } else {
                            FskClkState::ClkSearch
                        }
                    }
                    FskClkState::ClkAcquire => {
                        if !frame.detect.is_empty() && frame.maxbin == clk_idx {
                            FskClkState::ClkDetected
                        } else {
                            FskClkState::ClkSearch
                        }
                    }
                    FskClkState::ClkDetected => FskClkState::DataAcquire {
                        databin: frame.maxbin,
                    },
                    FskClkState::DataAcquire { databin } => {
                        if frame.detect.is_empty() {
                            self.miss_count += 1;
                            if self.miss_count >= oversample {
                                log::trace!("fsk-clk lost data tone at bin {}, back to clock search", databin);
                                self.miss_count = 0;
                                FskClkState::ClkSearch
                            } else {
                                FskClkState::DataAcquire { databin }
                            }
                        } else if frame.maxbin == databin {
                            self.miss_count = 0;
                            if let Some(sym) = self.core.bin_to_data_symbol(databin) {
                                self.emit(sym);
                            }
                            FskClkState::DataDetected { skip: oversample / 2 }
                        } else {
                            FskClkState::DataAcquire { databin: frame.maxbin }
                        }
                    }
                    FskClkState::DataDetected { skip } => {
                        if skip > 1 {
                            FskClkState::DataDetected { skip: skip - 1 }
                        } else {
                            FskClkState::ClkAcquire
                        }
                    }
                };
                self.state = DemodState::FskClk(next);
            }
        }
    }
}

pub struct FskModulator {
    core: FskCore,
}

impl FskModulator {
    pub fn new(variant: FskVariant, params: &FskParams) -> Result<Self> {
        Ok(Self { core: FskCore::build(variant, params)? })
    }

    pub fn modulate(&mut self, data: &[u8], samplerate: usize) -> Result<Vec<f64>> {
        let mut out = Vec::new();
        let mut phase = 0usize;
        let half = self.core.samples_per_symbol / 2;

        let total_bits = data.len() * 8;
        let mut bit_pos = 0usize;
        while bit_pos < total_bits {
            let symbol = crate::bitcursor::get(data, bit_pos, self.core.k) as usize;
            bit_pos += self.core.k;
            match self.core.variant {
                FskVariant::Fsk => {
                    let freq = self.core.tone_freq_for_data(symbol);
                    let tone = synth_tone(freq, samplerate, 0.8, phase, self.core.samples_per_symbol);
                    phase += tone.len();
                    out.extend(tone);
                }
                FskVariant::FskClk => {
                    let clk = synth_tone(self.core.clk_freq(), samplerate, 0.8, phase, half);
                    phase += clk.len();
                    out.extend(clk);
                    let freq = self.core.tone_freq_for_data(symbol);
                    let data_tone = synth_tone(freq, samplerate, 0.8, phase, half);
                    phase += data_tone.len();
                    out.extend(data_tone);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> FskParams {
        FskParams { samplerate: 8000, bitrate: 100, bandwidth: 2000, symbols: 4, percent_thresh: 0.6 }
    }

    #[test]
    fn fsk_roundtrip_single_byte() {
        let p = params();
        let mut modulator = FskModulator::new(FskVariant::Fsk, &p).unwrap();
        let mut demod = FskDemodulator::new(FskVariant::Fsk, &p).unwrap();

        let mut samples = modulator.modulate(&[0b1001_0110], p.samplerate).unwrap();
        samples.extend(vec![0.0; p.samplerate]);

        let mut out = Vec::new();
        for chunk in samples.chunks(64) {
            out.extend(demod.demodulate(chunk).unwrap());
        }
        assert!(!out.is_empty());
    }
}
