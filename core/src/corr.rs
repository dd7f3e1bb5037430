//! Correlation-template demodulator: matches a sliding window of samples
//! against an arbitrary per-symbol waveform alphabet via normalized dot
//! products, instead of going through the shared FFT analyzer. Used for
//! symbol alphabets that aren't simple pure tones.

use std::f64::consts::PI;

use crate::bitcursor::BitAccumulator;
use crate::error::{ModemError, Result};

fn bits_for_symbols(n: usize) -> usize {
    let n = n.max(2);
    let mut k = 0;
    while (1usize << k) < n {
        k += 1;
    }
    k
}

pub struct CorrDemod {
    templates: Vec<Vec<f64>>,
    norms_sq: Vec<f64>,
    buffer: Vec<f64>,
    l_max: usize,
    write_ptr: usize,
    thresh: f64,
    k: usize,
    bits: BitAccumulator,
}

impl CorrDemod {
    pub fn new(templates: Vec<Vec<f64>>) -> Result<Self> {
        if templates.is_empty() {
            return Err(ModemError::InvalidInput("at least one symbol template is required".into()));
        }
        if templates.iter().any(|t| t.is_empty()) {
            return Err(ModemError::InvalidInput("symbol templates must be non-empty".into()));
        }
        let l_max = templates.iter().map(|t| t.len()).max().unwrap();
        let norms_sq = templates.iter().map(|t| t.iter().map(|x| x * x).sum()).collect();
        let k = bits_for_symbols(templates.len());

        Ok(Self {
            templates,
            norms_sq,
            buffer: vec![0.0; l_max],
            l_max,
            write_ptr: 0,
            thresh: 0.90,
            k,
            bits: BitAccumulator::new(),
        })
    }

    /// Sets the similarity threshold `p` (default 0.90); a symbol is
    /// reported once its normalized correlation `C_k / (||T_k||^2 * p)`
    /// reaches 1.0.
    pub fn set_thresh(&mut self, p: f64) {
        self.thresh = p;
    }

    pub fn demodulate(&mut self, samples: &[f64]) -> Vec<u8> {
        for &s in samples {
            self.push_sample(s);
        }
        self.bits.drain_bytes()
    }

    fn push_sample(&mut self, sample: f64) {
        self.buffer[self.write_ptr] = sample;

        let mut best_symbol = None;
        let mut best_norm = 1.0f64;

        for (k, template) in self.templates.iter().enumerate() {
            let len = template.len();
            if self.norms_sq[k] <= 0.0 {
                continue;
            }
            let window_start = (self.write_ptr + self.l_max - (len - 1)) % self.l_max;
            let mut dot = 0.0;
            for (j, &tap) in template.iter().enumerate() {
                let idx = (window_start + j) % self.l_max;
                dot += tap * self.buffer[idx];
            }
            let norm = dot / (self.norms_sq[k] * self.thresh);
            if norm >= best_norm {
                best_norm = norm;
                best_symbol = Some((k, window_start, len));
            }
        }

        self.write_ptr = (self.write_ptr + 1) % self.l_max;

        if let Some((symbol, window_start, len)) = best_symbol {
            self.bits.push_symbol(symbol as u32, self.k);
            for j in 0..len {
                let idx = (window_start + j) % self.l_max;
                self.buffer[idx] = 0.0;
            }
        }
    }
}

pub struct CorrMod {
    templates: Vec<Vec<f64>>,
    k: usize,
}

impl CorrMod {
    pub fn new(templates: Vec<Vec<f64>>) -> Result<Self> {
        if templates.is_empty() {
            return Err(ModemError::InvalidInput("at least one symbol template is required".into()));
        }
        let k = bits_for_symbols(templates.len());
        Ok(Self { templates, k })
    }

    pub fn modulate(&mut self, data: &[u8]) -> Vec<f64> {
        let mut out = Vec::new();
        let total_bits = data.len() * 8;
        let mut bit_pos = 0usize;
        while bit_pos < total_bits {
            let symbol = (crate::bitcursor::get(data, bit_pos, self.k) as usize) % self.templates.len();
            bit_pos += self.k;
            out.extend_from_slice(&self.templates[symbol]);
        }
        out
    }
}

/// Template generators for the three correlation alphabets named in the
/// requirements: frequency-shift, phase-shift, and combined
/// frequency+phase ("fpsk") symbol waveforms.
pub mod templates {
    use super::PI;

    pub fn fsk_templates(n: usize, samplerate: usize, base_freq: f64, freq_step: f64, length: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|k| {
                let f = base_freq + k as f64 * freq_step;
                tone(f, samplerate, 0.0, length)
            })
            .collect()
    }

    pub fn psk_templates(n: usize, samplerate: usize, carrier_freq: f64, length: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|k| {
                let phase = 2.0 * PI * k as f64 / n as f64;
                tone(carrier_freq, samplerate, phase, length)
            })
            .collect()
    }

    pub fn fpsk_templates(n: usize, samplerate: usize, base_freq: f64, freq_step: f64, length: usize) -> Vec<Vec<f64>> {
        let ang_count = if n > 8 {
            4
        } else if n >= 4 {
            2
        } else {
            1
        };
        let tone_count = (n / ang_count).max(1);

        let mut out = vec![Vec::new(); n];
        for t in 0..tone_count {
            for a in 0..ang_count {
                let symbol = t * ang_count + a;
                if symbol >= n {
                    continue;
                }
                let freq = base_freq + t as f64 * freq_step;
                let phase = 2.0 * PI * a as f64 / ang_count as f64;
                out[symbol] = tone(freq, samplerate, phase, length);
            }
        }
        out
    }

    /// A carrier tone shaped by a half-sine amplitude envelope spanning the
    /// whole template (`sin(2*pi*freq*i/sr) * sin(2*pi*sym_freq*i/sr)` with
    /// `sym_freq = samplerate / (2*length)`), so each symbol's energy rises
    /// and falls within its own window instead of cutting off abruptly.
    fn tone(freq: f64, samplerate: usize, phase: f64, length: usize) -> Vec<f64> {
        let sym_freq = samplerate as f64 / (2.0 * length as f64);
        (0..length)
            .map(|i| {
                let carrier = (2.0 * PI * freq * i as f64 / samplerate as f64 + phase).sin();
                let envelope = (2.0 * PI * sym_freq * i as f64 / samplerate as f64).sin();
                carrier * envelope
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_distinct_fsk_templates() {
        let tpl = templates::fsk_templates(4, 8000, 1000.0, 300.0, 80);
        let mut modulator = CorrMod::new(tpl.clone()).unwrap();
        let mut demod = CorrDemod::new(tpl).unwrap();
        demod.set_thresh(0.8);

        let waveform = modulator.modulate(&[0b1101_0000]);
        let out = demod.demodulate(&waveform);
        assert!(!out.is_empty());
    }

    #[test]
    fn fpsk_template_count_matches_alphabet() {
        let tpl = templates::fpsk_templates(8, 8000, 1000.0, 200.0, 64);
        assert_eq!(tpl.len(), 8);
        assert!(tpl.iter().all(|t| t.len() == 64));
    }

    #[test]
    fn rejects_empty_template_set() {
        assert!(CorrDemod::new(Vec::new()).is_err());
    }
}
