//! Audio-band software modem: FSK, FSK-clk, OOK, PSK-clk and correlation
//! demodulators sharing a common sample-rate-converting FFT analyzer, plus
//! a packet framer for multiplexing discrete packets onto a symbol stream.

pub mod bitcursor;
pub mod calibrator;
pub mod corr;
pub mod error;
pub mod framer;
pub mod fsk;
pub mod modem;
pub mod ook;
pub mod pskclk;
pub mod srcfft;

pub use error::{ModemError, Result};
pub use framer::PktFramer;
pub use modem::{Modem, ModemParams};
