use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tonecast_core::corr;
use tonecast_core::fsk::FskParams;
use tonecast_core::ook::OokParams;
use tonecast_core::pskclk::PskClkParams;
use tonecast_core::{Modem, ModemError, ModemParams, PktFramer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    Fsk,
    FskClk,
    Ook,
    PskClk,
    CorrFsk,
    CorrPsk,
    CorrFpsk,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Encode,
    Decode,
}

#[derive(Parser, Debug)]
#[command(name = "tonecast", about = "Audio-band software modem")]
struct Cli {
    #[arg(value_enum)]
    variant: Variant,

    #[arg(value_enum)]
    mode: Mode,

    /// Sample rate in Hz.
    #[arg(short = 's', long, default_value_t = 44100)]
    samplerate: usize,

    /// Data rate in bits per second.
    #[arg(short = 'r', long, default_value_t = 300)]
    bitrate: usize,

    /// Analysis bandwidth in Hz.
    #[arg(long, default_value_t = 8000)]
    bandwidth: usize,

    /// Symbol alphabet size (rounded up to a power of two).
    #[arg(short = 'c', long, default_value_t = 4)]
    symbols: usize,

    /// Carrier / base frequency in Hz (OOK, PSK-clk, correlation schemes).
    #[arg(short = 'f', long, default_value_t = 1200.0)]
    frequency: f64,

    /// Attach a packet framer around the chosen scheme.
    #[arg(short = 'p', long, default_value_t = false)]
    pkt: bool,

    /// Bit-repetition redundancy used by the packet framer (must be odd).
    #[arg(long, default_value_t = 1)]
    redundancy: usize,

    /// Amplitude of uniform noise injected into the modulated waveform,
    /// for testing demodulator robustness. Has no effect on decode.
    #[arg(short = 'n', long, default_value_t = 0.0)]
    noise: f64,

    /// Input WAV file (decode) or input byte file (encode).
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Output WAV file (encode) or output byte file (decode); stdout if omitted.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Inline message to encode, instead of --input.
    #[arg(short = 'm', long)]
    message: Option<String>,

    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

fn build_modem(cli: &Cli) -> Result<Modem, ModemError> {
    let thresh = 0.5;
    let params = match cli.variant {
        Variant::Fsk => ModemParams::Fsk(FskParams {
            samplerate: cli.samplerate,
            bitrate: cli.bitrate,
            bandwidth: cli.bandwidth,
            symbols: cli.symbols,
            percent_thresh: thresh,
        }),
        Variant::FskClk => ModemParams::FskClk(FskParams {
            samplerate: cli.samplerate,
            bitrate: cli.bitrate,
            bandwidth: cli.bandwidth,
            symbols: cli.symbols,
            percent_thresh: thresh,
        }),
        Variant::Ook => ModemParams::Ook(OokParams {
            samplerate: cli.samplerate,
            bitrate: cli.bitrate,
            frequency: cli.frequency,
            bandwidth: cli.bandwidth,
            percent_thresh: thresh,
        }),
        Variant::PskClk => ModemParams::PskClk(PskClkParams {
            samplerate: cli.samplerate,
            bitrate: cli.bitrate,
            frequency: cli.frequency,
            bandwidth: cli.bandwidth,
            symbols: cli.symbols,
            percent_thresh: thresh,
        }),
        Variant::CorrFsk | Variant::CorrPsk | Variant::CorrFpsk => {
            let length = cli.samplerate / cli.bitrate.max(1);
            let tpl = match cli.variant {
                Variant::CorrFsk => corr::templates::fsk_templates(cli.symbols, cli.samplerate, cli.frequency, 200.0, length),
                Variant::CorrPsk => corr::templates::psk_templates(cli.symbols, cli.samplerate, cli.frequency, length),
                Variant::CorrFpsk => corr::templates::fpsk_templates(cli.symbols, cli.samplerate, cli.frequency, 200.0, length),
                _ => unreachable!(),
            };
            ModemParams::Corr(tpl)
        }
    };
    Modem::new(params)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut modem = build_modem(&cli)?;
    if cli.pkt {
        let framer = PktFramer::new(vec![0xC9, 0x3F], vec![0x5A, 0xA5], cli.redundancy)?;
        modem.attach_packet_framer(framer);
    }

    match cli.mode {
        Mode::Encode => encode(&cli, &mut modem),
        Mode::Decode => decode(&cli, &mut modem),
    }
}

fn encode(cli: &Cli, modem: &mut Modem) -> Result<(), Box<dyn std::error::Error>> {
    let data = if let Some(msg) = &cli.message {
        msg.clone().into_bytes()
    } else if let Some(path) = &cli.input {
        let mut buf = Vec::new();
        File::open(path)?.read_to_end(&mut buf)?;
        buf
    } else {
        return Err("encode requires --message or --input".into());
    };

    let mut samples = modem.modulate(&data)?;
    if cli.noise > 0.0 {
        inject_noise(&mut samples, cli.noise);
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: cli.samplerate as u32,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let out_path = cli.output.clone().ok_or("encode requires --output")?;
    let mut writer = hound::WavWriter::create(&out_path, spec)?;
    for s in samples {
        let clamped = s.max(-1.0).min(1.0);
        writer.write_sample((clamped * i16::MAX as f64) as i16)?;
    }
    writer.finalize()?;

    log::debug!("wrote waveform to {}", out_path.display());
    Ok(())
}

fn decode(cli: &Cli, modem: &mut Modem) -> Result<(), Box<dyn std::error::Error>> {
    let in_path = cli.input.clone().ok_or("decode requires --input")?;
    let mut reader = hound::WavReader::open(&in_path)?;
    let spec = reader.spec();

    let samples: Vec<f64> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.map(|v| v as f64 / i16::MAX as f64))
            .collect::<Result<_, _>>()?,
        hound::SampleFormat::Float => reader.samples::<f32>().map(|s| s.map(|v| v as f64)).collect::<Result<_, _>>()?,
    };

    let mut out = Vec::new();
    for chunk in samples.chunks(1024) {
        out.extend(modem.demodulate(chunk)?);
    }

    match &cli.output {
        Some(path) => std::fs::write(path, &out)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&out)?;
        }
    }
    Ok(())
}

fn inject_noise(samples: &mut [f64], amplitude: f64) {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    for s in samples.iter_mut() {
        *s += rng.gen_range(-amplitude..=amplitude);
    }
}

fn main() {
    let cli = Cli::parse();
    if cli.verbose {
        env_logger::Builder::from_default_env().filter_level(log::LevelFilter::Debug).init();
    } else {
        env_logger::init();
    }

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
