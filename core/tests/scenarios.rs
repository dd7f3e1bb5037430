//! End-to-end scenarios exercising each physical-layer scheme and the
//! packet framer through the public `Modem` facade.

use rand::{Rng, SeedableRng};
use tonecast_core::corr;
use tonecast_core::fsk::FskParams;
use tonecast_core::ook::OokParams;
use tonecast_core::pskclk::PskClkParams;
use tonecast_core::{Modem, ModemParams, PktFramer};

fn trailing_silence(samplerate: usize) -> Vec<f64> {
    vec![0.0; samplerate]
}

fn demod_all(modem: &mut Modem, samples: &[f64]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in samples.chunks(64) {
        out.extend(modem.demodulate(chunk).unwrap());
    }
    out
}

fn contains_subsequence(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

// Scenario A: FSK round-trip of "Hello".
#[test]
fn scenario_a_fsk_hello_roundtrip() {
    let params = FskParams { samplerate: 8000, bitrate: 200, bandwidth: 2000, symbols: 4, percent_thresh: 0.6 };
    let mut modem = Modem::new(ModemParams::Fsk(params.clone())).unwrap();

    let message = b"Hello".to_vec();
    let mut samples = modem.modulate(&message).unwrap();
    samples.extend(trailing_silence(params.samplerate));

    let out = demod_all(&mut modem, &samples);
    assert!(contains_subsequence(&out, &message));
}

// Scenario B: FSK-clk with a packet framer (redundancy 3), 512 random
// bytes (seeded), under uniform 0.1-amplitude noise.
#[test]
fn scenario_b_fskclk_packet_with_noise() {
    let params = FskParams { samplerate: 8000, bitrate: 400, bandwidth: 2000, symbols: 4, percent_thresh: 0.6 };
    let mut modem = Modem::new(ModemParams::FskClk(params.clone())).unwrap();
    modem.attach_packet_framer(PktFramer::new(vec![0xC9, 0x3F], vec![0x5A, 0xA5], 3).unwrap());

    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let payload: Vec<u8> = (0..512).map(|_| rng.gen()).collect();

    let mut samples = modem.modulate(&payload).unwrap();
    samples.extend(trailing_silence(params.samplerate));

    let mut noise_rng = rand::rngs::StdRng::seed_from_u64(2);
    for s in samples.iter_mut() {
        *s += noise_rng.gen_range(-0.1..=0.1);
    }

    let out = demod_all(&mut modem, &samples);
    assert!(contains_subsequence(&out, &payload));
}

// Scenario C: OOK asynchronous round-trip, no noise.
#[test]
fn scenario_c_ook_async_roundtrip() {
    let params = OokParams { samplerate: 8000, bitrate: 100, frequency: 1000.0, bandwidth: 2000, percent_thresh: 0.5 };
    let mut modem = Modem::new(ModemParams::Ook(params.clone())).unwrap();

    let message = vec![0xDE, 0xAD, 0xBE, 0xEF];
    let mut samples = modem.modulate(&message).unwrap();
    samples.extend(trailing_silence(params.samplerate));

    let out = demod_all(&mut modem, &samples);
    assert!(contains_subsequence(&out, &message));
}

// Scenario D: PSK-clk, 4-symbol alphabet, 3-byte round-trip.
#[test]
fn scenario_d_pskclk_roundtrip() {
    let params = PskClkParams { samplerate: 8000, bitrate: 200, frequency: 1000.0, bandwidth: 2000, symbols: 4, percent_thresh: 0.3 };
    let mut modem = Modem::new(ModemParams::PskClk(params.clone())).unwrap();

    let message = vec![0x5A, 0xC3, 0x0F];
    let mut samples = modem.modulate(&message).unwrap();
    samples.extend(trailing_silence(params.samplerate));

    let out = demod_all(&mut modem, &samples);
    assert!(contains_subsequence(&out, &message));
}

// Scenario E: correlation demodulator over custom FSK-style templates
// ("Bell").
#[test]
fn scenario_e_correlation_fsk_bell_roundtrip() {
    let samplerate = 8000;
    let length = 80;
    let templates = corr::templates::fsk_templates(4, samplerate, 1000.0, 300.0, length);
    let mut modem = Modem::new(ModemParams::Corr(templates)).unwrap();

    let message = b"Bell".to_vec();
    let samples = modem.modulate(&message).unwrap();
    let out = demod_all(&mut modem, &samples);
    assert!(contains_subsequence(&out, &message));
}

// Scenario F: packet framer sync discovery, exact wire-byte check.
#[test]
fn scenario_f_framer_sync_discovery_exact_bytes() {
    let framer = PktFramer::new(vec![0xC9, 0x3F], vec![0x5A, 0xA5], 1).unwrap();
    let payload = vec![0x01, 0x02, 0x03];
    let wire = framer.tx(&payload).unwrap();

    // sync (0xC9 0x3F) + length (0x0003) unmasked at the bit level, XORed
    // with the mask starting at the first post-sync bit.
    assert_eq!(&wire[0..2], &[0xC9, 0x3F]);
    let masked_len = [(0x00u8) ^ 0x5A, (0x03u8) ^ 0xA5];
    assert_eq!(&wire[2..4], &masked_len);

    let mut rx = PktFramer::new(vec![0xC9, 0x3F], vec![0x5A, 0xA5], 1).unwrap();
    let packets = rx.rx_bits(&wire, wire.len() * 8);
    assert_eq!(packets, vec![payload]);
}
