//! On-off keying: a single carrier tone gated by the data bit, framed with
//! an idle/start preamble and a stop bit, recovered by run-length decoding
//! the detected/not-detected sequence.

use crate::error::{ModemError, Result};
use crate::srcfft::{synth_tone, ProcessOutcome, SrcFft};

const OVERSAMPLE: usize = 5;

#[derive(Debug, Clone)]
pub struct OokParams {
    pub samplerate: usize,
    pub bitrate: usize,
    pub frequency: f64,
    pub bandwidth: usize,
    pub percent_thresh: f64,
}

#[derive(Debug, Clone, Copy)]
enum State {
    Search,
    IdleAcquire,
    IdleDetected,
    StartAcquire,
    Capture,
}

pub struct OokDemodulator {
    srcfft: SrcFft,
    state: State,
    capture: Vec<bool>,
}

impl OokDemodulator {
    pub fn new(params: &OokParams) -> Result<Self> {
        if params.bitrate == 0 {
            return Err(ModemError::ConfigError("bitrate must be >= 1".into()));
        }
        let samples_per_symbol = (params.samplerate as f64 / params.bitrate as f64).round() as usize;
        let input_block = (samples_per_symbol / OVERSAMPLE).max(1);
        let mut srcfft = SrcFft::new(params.samplerate, input_block, params.bandwidth, 1)?;

        let mut offset = 0usize;
        let frame = loop {
            let chunk = synth_tone(params.frequency, params.samplerate, params.percent_thresh, offset, srcfft.fft_block().max(1));
            offset += chunk.len();
            match srcfft.process(&chunk)? {
                ProcessOutcome::Frame(f) => break f,
                ProcessOutcome::NeedMore => continue,
            }
        };
        srcfft.set_thresh(params.percent_thresh * frame.maxmag);
        srcfft.reset();

        Ok(Self { srcfft, state: State::Search, capture: Vec::new() })
    }

    pub fn set_threshold(&mut self, t: f64) {
        self.srcfft.set_thresh(t);
    }

    pub fn demodulate_samples(&mut self, samples: &[f64]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut frame = self.srcfft.process(samples)?;
        loop {
            match frame {
                ProcessOutcome::Frame(f) => {
                    let carrier_present = !f.detect.is_empty();
                    self.advance(carrier_present, &mut out);
                }
                ProcessOutcome::NeedMore => break,
            }
            frame = self.srcfft.process(&[])?;
        }
        Ok(out)
    }

    fn advance(&mut self, carrier: bool, out: &mut Vec<u8>) {
        match self.state {
            State::Search => {
                if carrier {
                    self.state = State::IdleAcquire;
                }
            }
            State::IdleAcquire => {
                self.state = if carrier { State::IdleDetected } else { State::Search };
            }
            State::IdleDetected => {
                self.state = if !carrier { State::StartAcquire } else { State::IdleDetected };
            }
            State::StartAcquire => {
                if !carrier {
                    self.state = State::Capture;
                    self.capture.clear();
                    self.capture.push(false);
                } else {
                    self.state = State::IdleDetected;
                }
            }
            State::Capture => {
                self.capture.push(carrier);
                if self.capture.len() >= 10 * OVERSAMPLE {
                    if let Some(byte) = Self::decode_runs(&self.capture) {
                        out.push(byte);
                    }
                    self.capture.clear();
                    self.state = if carrier { State::IdleDetected } else { State::Search };
                }
            }
        }
    }

    fn decode_runs(samples: &[bool]) -> Option<u8> {
        // Group consecutive equal samples; each run of length g contributes
        // round(g / OVERSAMPLE) bits of that polarity, least-significant
        // sample first (the idle->start transition supplies bit 0 = start).
        let mut bits = Vec::new();
        let mut run_val = samples[0];
        let mut run_len = 0usize;
        for &s in samples {
            if s == run_val {
                run_len += 1;
            } else {
                let count = ((run_len as f64) / OVERSAMPLE as f64).round() as usize;
                bits.extend(std::iter::repeat(run_val).take(count.max(1)));
                run_val = s;
                run_len = 1;
            }
        }
        let count = ((run_len as f64) / OVERSAMPLE as f64).round() as usize;
        bits.extend(std::iter::repeat(run_val).take(count.max(1)));

        if bits.len() < 10 {
            return None;
        }
        // bits[0] is the start bit (must be low/false = carrier absent
        // during the asynchronous start symbol), bits[1..=8] data LSB
        // first, bits[9] stop (carrier present).
        if bits[0] {
            return None;
        }
        // carrier present -> data bit 0, silent -> data bit 1.
        let mut byte = 0u8;
        for i in 0..8 {
            if !bits[1 + i] {
                byte |= 1 << i;
            }
        }
        if !bits[9] {
            return None;
        }
        Some(byte)
    }
}

pub struct OokModulator {
    params: OokParams,
    samples_per_symbol: usize,
}

impl OokModulator {
    pub fn new(params: OokParams) -> Result<Self> {
        if params.bitrate == 0 {
            return Err(ModemError::ConfigError("bitrate must be >= 1".into()));
        }
        let samples_per_symbol = (params.samplerate as f64 / params.bitrate as f64).round() as usize;
        Ok(Self { params, samples_per_symbol })
    }

    pub fn modulate(&mut self, data: &[u8]) -> Result<Vec<f64>> {
        let mut out = Vec::new();
        let mut phase = 0usize;
        let emit_symbol = |carrier: bool, phase: &mut usize, out: &mut Vec<f64>| {
            let samples = if carrier {
                synth_tone(self.params.frequency, self.params.samplerate, 0.8, *phase, self.samples_per_symbol)
            } else {
                vec![0.0; self.samples_per_symbol]
            };
            *phase += samples.len();
            out.extend(samples);
        };

        emit_symbol(true, &mut phase, &mut out);
        for &byte in data {
            emit_symbol(false, &mut phase, &mut out);
            for bit in 0..8 {
                emit_symbol((byte >> bit) & 1 == 0, &mut phase, &mut out);
            }
            emit_symbol(true, &mut phase, &mut out);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> OokParams {
        OokParams { samplerate: 8000, bitrate: 100, frequency: 1000.0, bandwidth: 2000, percent_thresh: 0.5 }
    }

    #[test]
    fn ook_roundtrip() {
        let p = params();
        let mut modulator = OokModulator::new(p.clone()).unwrap();
        let mut demod = OokDemodulator::new(&p).unwrap();

        let mut samples = modulator.modulate(&[0xA5]).unwrap();
        samples.extend(vec![0.0; p.samplerate]);

        let mut out = Vec::new();
        for chunk in samples.chunks(64) {
            out.extend(demod.demodulate_samples(chunk).unwrap());
        }
        assert!(out.contains(&0xA5));
    }
}
