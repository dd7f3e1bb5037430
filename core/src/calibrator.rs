//! Per-bin transmit frequency calibration for the FSK family: finds the
//! 1 Hz-resolution frequency inside each target FFT bin that lands the
//! most energy in that bin, then derives a global detection threshold from
//! the weakest of those per-bin peaks.

use crate::error::{ModemError, Result};
use crate::srcfft::{synth_tone, ProcessOutcome, SrcFft};

/// Runs the sweep described in §4.3 and applies the resulting threshold to
/// `srcfft` directly (mirroring the calibration routine's side effect on
/// the analyzer it's handed). Returns the calibrated tone table and the
/// chosen absolute threshold.
pub fn calibrate(
    srcfft: &mut SrcFft,
    samplerate: usize,
    bandwidth: usize,
    tone_count: usize,
    percent_thresh: f64,
) -> Result<(Vec<f64>, f64)> {
    if tone_count == 0 {
        return Err(ModemError::ConfigError("tone_count must be >= 1".into()));
    }
    if bandwidth < 2 {
        return Err(ModemError::ConfigError("bandwidth must be >= 2".into()));
    }

    let freq_step = bandwidth as f64 / tone_count as f64;
    let mut freqs = vec![0.0f64; tone_count];
    let mut thresh_mag: Option<f64> = None;

    for bin in 0..tone_count {
        let min_freq = (bin as f64 * freq_step + 1.0).ceil() as i64;
        let max_freq = ((bin + 1) as f64 * freq_step - 1.0).floor() as i64;

        let mut best_freq = 0.0f64;
        let mut best_mag = 0.0f64;

        let mut f = min_freq;
        while f <= max_freq {
            srcfft.reset();
            let frame = sweep_one_frequency(srcfft, f as f64, samplerate, percent_thresh)?;
            if frame.maxbin == bin && frame.maxmag > best_mag {
                best_mag = frame.maxmag;
                best_freq = f as f64;
            }
            f += 1;
        }

        if best_freq == 0.0 {
            return Err(ModemError::CalibrationError(format!(
                "no frequency in [{}, {}] Hz landed its peak in bin {}",
                min_freq, max_freq, bin
            )));
        }

        freqs[bin] = best_freq;
        thresh_mag = Some(match thresh_mag {
            None => best_mag,
            Some(cur) if best_mag < cur => best_mag,
            Some(cur) => cur,
        });
    }

    let threshold = percent_thresh * thresh_mag.unwrap_or(0.0);
    srcfft.set_thresh(threshold);
    srcfft.reset();
    Ok((freqs, threshold))
}

fn sweep_one_frequency(
    srcfft: &mut SrcFft,
    freq: f64,
    samplerate: usize,
    amplitude: f64,
) -> Result<crate::srcfft::Frame> {
    let mut offset = 0usize;
    loop {
        let samples = synth_tone(freq, samplerate, amplitude, offset, srcfft.fft_block().max(1));
        offset += samples.len();
        if let ProcessOutcome::Frame(frame) = srcfft.process(&samples)? {
            return Ok(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibrates_distinct_bins_to_distinct_frequencies() {
        let mut sf = SrcFft::new(8000, 256, 4000, 4).unwrap();
        let (freqs, thresh) = calibrate(&mut sf, 8000, 4000, 4, 0.5).unwrap();
        assert_eq!(freqs.len(), 4);
        assert!(thresh > 0.0);
        let mut sorted = freqs.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(freqs, sorted);
    }
}
