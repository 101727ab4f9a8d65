use crate::error::DriverError;
use crate::sdk::SAMPLE_WIDTH_BYTES;

/// Raw sample storage handed to `GetSamples`.
///
/// Sized once per mode switch from the sample count the SDK settled on, so
/// `len_bytes() == samples_per_channel * channels * 4` always holds.
#[derive(Debug)]
pub struct SampleBuffer {
    words: Vec<u32>,
    channels: usize,
    samples_per_channel: usize,
    // Words the last read wrote; anything past this is from an older block.
    filled: usize,
}

impl SampleBuffer {
    pub fn allocate(samples_per_channel: u32, channels: u32) -> Result<Self, DriverError> {
        let samples_per_channel = samples_per_channel as usize;
        let channels = channels as usize;
        let len = samples_per_channel.checked_mul(channels).ok_or(
            DriverError::Allocation { bytes: usize::MAX },
        )?;
        let bytes = len
            .checked_mul(SAMPLE_WIDTH_BYTES)
            .ok_or(DriverError::Allocation { bytes: usize::MAX })?;
        if bytes == 0 || u32::try_from(bytes).is_err() {
            return Err(DriverError::Allocation { bytes });
        }
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| DriverError::Allocation { bytes })?;
        words.resize(len, 0);
        Ok(Self {
            words,
            channels,
            samples_per_channel,
            filled: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples_per_channel
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * SAMPLE_WIDTH_BYTES
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    /// Storage for the next read. Forgets what the previous read wrote until
    /// [`SampleBuffer::record_read`] is called.
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        self.filled = 0;
        &mut self.words
    }

    /// Marks the first `bytes` of the buffer as written by the last read.
    pub fn record_read(&mut self, bytes: usize) {
        self.filled = (bytes / SAMPLE_WIDTH_BYTES).min(self.words.len());
    }

    /// The leading sample frame of the last block read: one word per channel
    /// in hardware order. A short read yields fewer than `channels` words.
    pub fn latest(&self) -> &[u32] {
        &self.words[..self.channels.min(self.filled)]
    }
}
