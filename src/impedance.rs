//! Decoding of the words the amplifier reports in impedance mode.
//!
//! Each channel reports its electrode impedance in kΩ. The display range
//! tops out at 255, which the amplifier also uses for an open or
//! disconnected electrode; such channels are shown as `Inf`.

use std::fmt;

use crate::buffer::SampleBuffer;

/// Largest displayable impedance (kΩ); also the "open electrode" marker.
pub const OPEN_KILOHMS: u32 = 255;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImpedanceReading {
    KiloOhms(u8),
    Open,
}

impl ImpedanceReading {
    /// Clamps a raw word into the display range.
    pub fn from_raw(raw: u32) -> Self {
        if raw >= OPEN_KILOHMS {
            Self::Open
        } else {
            Self::KiloOhms(raw as u8)
        }
    }

    /// Display level in `0..=255`, e.g. for indexing a 256-entry colour map.
    pub fn level(self) -> u8 {
        match self {
            Self::KiloOhms(k) => k,
            Self::Open => OPEN_KILOHMS as u8,
        }
    }

    pub fn is_below(self, limit_kilohms: u8) -> bool {
        matches!(self, Self::KiloOhms(k) if k < limit_kilohms)
    }
}

impl fmt::Display for ImpedanceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KiloOhms(k) => f.pad(&k.to_string()),
            Self::Open => f.pad("Inf"),
        }
    }
}

/// Latest impedance per hardware channel, copied out of the sample buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImpedanceFrame {
    raw: Vec<u32>,
}

impl ImpedanceFrame {
    pub fn from_buffer(buffer: &SampleBuffer) -> Self {
        Self::from_raw(buffer.latest().to_vec())
    }

    pub fn from_raw(raw: Vec<u32>) -> Self {
        Self { raw }
    }

    pub fn raw(&self) -> &[u32] {
        &self.raw
    }

    pub fn channel_count(&self) -> usize {
        self.raw.len()
    }

    /// Reading for a 1-based hardware channel, `None` for 0 or out of range.
    pub fn channel(&self, hardware_channel: usize) -> Option<ImpedanceReading> {
        let index = hardware_channel.checked_sub(1)?;
        self.raw.get(index).copied().map(ImpedanceReading::from_raw)
    }

    pub fn readings(&self) -> impl Iterator<Item = ImpedanceReading> + '_ {
        self.raw.iter().copied().map(ImpedanceReading::from_raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_words_clamp_to_display_range() {
        assert_eq!(ImpedanceReading::from_raw(0), ImpedanceReading::KiloOhms(0));
        assert_eq!(ImpedanceReading::from_raw(254), ImpedanceReading::KiloOhms(254));
        assert_eq!(ImpedanceReading::from_raw(255), ImpedanceReading::Open);
        assert_eq!(ImpedanceReading::from_raw(70_000), ImpedanceReading::Open);
        assert_eq!(ImpedanceReading::Open.level(), 255);
    }

    #[test]
    fn open_electrodes_display_as_inf() {
        assert_eq!(ImpedanceReading::Open.to_string(), "Inf");
        assert_eq!(ImpedanceReading::KiloOhms(12).to_string(), "12");
        assert_eq!(format!("{:>4}", ImpedanceReading::Open), " Inf");
        assert!(ImpedanceReading::KiloOhms(4).is_below(5));
        assert!(!ImpedanceReading::Open.is_below(255));
    }

    #[test]
    fn hardware_channels_are_one_based() {
        let frame = ImpedanceFrame::from_raw(vec![7, 300, 20]);
        assert_eq!(frame.channel(0), None);
        assert_eq!(frame.channel(1), Some(ImpedanceReading::KiloOhms(7)));
        assert_eq!(frame.channel(2), Some(ImpedanceReading::Open));
        assert_eq!(frame.channel(4), None);
        assert_eq!(frame.readings().filter(|r| *r == ImpedanceReading::Open).count(), 1);
    }

    #[test]
    fn frame_takes_the_first_word_of_each_channel() {
        let mut buffer = SampleBuffer::allocate(3, 2).unwrap();
        buffer.as_mut_slice().copy_from_slice(&[9, 10, 1, 2, 3, 4]);
        buffer.record_read(24);
        let frame = ImpedanceFrame::from_buffer(&buffer);
        assert_eq!(frame.raw(), &[9, 10]);
        assert_eq!(frame.channel_count(), 2);
    }
}
