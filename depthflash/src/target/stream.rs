//! Block-streaming update family.
//!
//! These devices have no sector concept. The image is pushed through an
//! extension unit in fixed 512-byte blocks, then the device burns it on its
//! own while the host polls a result record:
//!
//! ```text
//! host                                  device
//!  |  command {INIT, padded size, len}   |
//!  |------------------------------------>|
//!  |  result (drained, not inspected)    |
//!  |<------------------------------------|
//!  |  data block x N (512 bytes each)    |
//!  |------------------------------------>|
//!  |  command {START, padded size}       |
//!  |------------------------------------>|
//!  |  result, once per second            |
//!  |<------------------------------------|  00 00 00 00 -> done
//!  |                                     |  80 / 82     -> fault
//! ```

use crate::check_interrupted;
use crate::error::{Error, Result};
use crate::port::Channel;
use crate::progress::Progress;
use crate::target::{DeviceFamily, FlashUpdater, UpdateMode, update_session};
use crate::transport::CommandTransport;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use std::thread;
use std::time::Duration;

/// Transfer block size.
pub const BLOCK_SIZE: usize = 512;

/// Protocol tag of the init record.
pub const INIT_TAG: u32 = 0x0003_0001;

/// Protocol tag of the start record.
pub const START_TAG: u32 = 0x0003_0101;

/// First result byte: the device does not support the command.
pub const FAULT_UNSUPPORTED_COMMAND: u8 = 0x80;

/// First result byte: burning the image failed.
pub const FAULT_BURN_IMAGE: u8 = 0x82;

/// Extension-unit selector for command records.
pub const SELECTOR_COMMAND: u8 = 1;

/// Extension-unit selector for result records.
pub const SELECTOR_RESULT: u8 = 2;

/// Extension-unit selector for data blocks.
pub const SELECTOR_DATA: u8 = 3;

/// Size of an encoded command record.
pub const RECORD_SIZE: usize = 16;

/// Timing of the completion poll.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StreamConfig {
    /// Sleep before each poll.
    pub poll_interval: Duration,
    /// Polls before giving up.
    pub max_polls: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 600,
        }
    }
}

impl StreamConfig {
    /// Set the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the poll ceiling.
    #[must_use]
    pub fn with_max_polls(mut self, polls: u32) -> Self {
        self.max_polls = polls;
        self
    }
}

/// Command record sent to the update unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlRecord {
    /// Protocol tag.
    pub p1: u32,
    /// Padded transfer size.
    pub p2: u32,
    /// Image length.
    pub p3: u32,
    /// Reserved.
    pub p4: u32,
}

impl ControlRecord {
    /// Init record for an image of `len` bytes.
    pub fn init(len: u32) -> Self {
        Self {
            p1: INIT_TAG,
            p2: padded_size(len),
            p3: len,
            p4: 0,
        }
    }

    /// Start record for an image of `len` bytes.
    pub fn start(len: u32) -> Self {
        Self {
            p1: START_TAG,
            p2: padded_size(len),
            p3: 0,
            p4: 0,
        }
    }

    /// Encode as four little-endian words.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        LittleEndian::write_u32_into(&[self.p1, self.p2, self.p3, self.p4], &mut buf);
        buf
    }

    /// Decode four little-endian words.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_SIZE {
            return Err(Error::Protocol(format!(
                "command record needs {RECORD_SIZE} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            p1: LittleEndian::read_u32(&data[0..4]),
            p2: LittleEndian::read_u32(&data[4..8]),
            p3: LittleEndian::read_u32(&data[8..12]),
            p4: LittleEndian::read_u32(&data[12..16]),
        })
    }
}

/// Result record read back from the update unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRecord {
    status: [u8; 4],
}

impl ResultRecord {
    /// Decode a raw result; only the leading status bytes matter.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let status = data
            .get(..4)
            .ok_or_else(|| {
                Error::Protocol(format!("result record of {} bytes is too short", data.len()))
            })?;
        Ok(Self {
            status: [status[0], status[1], status[2], status[3]],
        })
    }

    /// Build a record from its status bytes.
    pub fn from_status(status: [u8; 4]) -> Self {
        Self { status }
    }

    /// Burn finished.
    pub fn is_complete(&self) -> bool {
        self.status == [0; 4]
    }

    /// Fault sentinel, if any.
    pub fn fault(&self) -> Option<u8> {
        match self.status[0] {
            code @ (FAULT_UNSUPPORTED_COMMAND | FAULT_BURN_IMAGE) => Some(code),
            _ => None,
        }
    }
}

/// Device side of the streaming protocol.
pub trait UpdateUnit {
    /// Send a command record.
    fn set_command(&self, record: &ControlRecord) -> Result<()>;

    /// Read the current result record.
    fn get_result(&self) -> Result<ResultRecord>;

    /// Send one data block of exactly [`BLOCK_SIZE`] bytes.
    fn write_block(&self, block: &[u8]) -> Result<()>;
}

impl<C: Channel> UpdateUnit for CommandTransport<C> {
    fn set_command(&self, record: &ControlRecord) -> Result<()> {
        let mut request = Vec::with_capacity(1 + RECORD_SIZE);
        request.push(SELECTOR_COMMAND);
        request.extend_from_slice(&record.encode());
        self.send_receive_raw(&request).map(|_| ())
    }

    fn get_result(&self) -> Result<ResultRecord> {
        let response = self.send_receive_raw(&[SELECTOR_RESULT])?;
        ResultRecord::parse(&response)
    }

    fn write_block(&self, block: &[u8]) -> Result<()> {
        let mut request = Vec::with_capacity(1 + block.len());
        request.push(SELECTOR_DATA);
        request.extend_from_slice(block);
        self.send_receive_raw(&request).map(|_| ())
    }
}

/// Image length rounded up to a whole block.
pub fn padded_size(len: u32) -> u32 {
    len.div_ceil(BLOCK_SIZE as u32) * BLOCK_SIZE as u32
}

/// Stream `image` into `unit` and wait for the burn to finish.
///
/// A fault sentinel aborts at once with [`Error::DeviceFault`]; running out
/// of polls is [`Error::Timeout`].
pub fn stream_update<U: UpdateUnit + ?Sized>(
    unit: &U,
    config: &StreamConfig,
    image: &[u8],
    progress: &mut Progress<'_>,
) -> Result<()> {
    if image.is_empty() {
        return Err(Error::InvalidImage("image is empty".into()));
    }
    let len = u32::try_from(image.len())
        .map_err(|_| Error::InvalidImage(format!("image of {} bytes is too large", image.len())))?;

    info!("Streaming {len} bytes ({} blocks)", image.len().div_ceil(BLOCK_SIZE));
    unit.set_command(&ControlRecord::init(len))?;
    let status = unit.get_result()?;
    debug!("Init status: {status:?}");

    let total = image.len().div_ceil(BLOCK_SIZE);
    for (index, chunk) in image.chunks(BLOCK_SIZE).enumerate() {
        check_interrupted()?;

        if chunk.len() == BLOCK_SIZE {
            unit.write_block(chunk)?;
        } else {
            let mut block = [0u8; BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            unit.write_block(&block)?;
        }

        progress.report((index + 1) as f32 / total as f32);
    }

    unit.set_command(&ControlRecord::start(len))?;
    wait_for_burn(unit, config)?;

    progress.finish();
    Ok(())
}

fn wait_for_burn<U: UpdateUnit + ?Sized>(unit: &U, config: &StreamConfig) -> Result<()> {
    for poll in 1..=config.max_polls {
        thread::sleep(config.poll_interval);
        check_interrupted()?;

        let result = unit.get_result()?;
        if result.is_complete() {
            info!("Burn complete after {poll} polls");
            return Ok(());
        }
        if let Some(code) = result.fault() {
            return Err(Error::DeviceFault(code));
        }
        debug!("Burn in progress (poll {poll}/{}): {result:?}", config.max_polls);
    }

    Err(Error::Timeout(format!(
        "burn did not complete after {} polls",
        config.max_polls
    )))
}

/// Block-streaming updater.
pub struct StreamUpdater<'a, C: Channel> {
    transport: &'a CommandTransport<C>,
    config: &'a StreamConfig,
}

impl<'a, C: Channel> StreamUpdater<'a, C> {
    /// Create an updater over a transport.
    pub fn new(transport: &'a CommandTransport<C>, config: &'a StreamConfig) -> Self {
        Self { transport, config }
    }
}

impl<C: Channel> FlashUpdater for StreamUpdater<'_, C> {
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Stream
    }

    fn update_flash(
        &self,
        image: &[u8],
        mode: UpdateMode,
        progress: &mut Progress<'_>,
    ) -> Result<()> {
        if mode != UpdateMode::StreamFull {
            return Err(Error::InvalidMode(mode.raw()));
        }
        if image.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }

        update_session(self.transport, progress, |progress| {
            stream_update(self.transport, self.config, image, progress)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockUnit {
        commands: RefCell<Vec<ControlRecord>>,
        blocks: RefCell<Vec<Vec<u8>>>,
        results: RefCell<VecDeque<[u8; 4]>>,
        polls: RefCell<u32>,
    }

    impl MockUnit {
        fn with_results(results: &[[u8; 4]]) -> Self {
            let unit = Self::default();
            unit.results.borrow_mut().extend(results.iter().copied());
            unit
        }
    }

    impl UpdateUnit for MockUnit {
        fn set_command(&self, record: &ControlRecord) -> Result<()> {
            self.commands.borrow_mut().push(*record);
            Ok(())
        }

        fn get_result(&self) -> Result<ResultRecord> {
            *self.polls.borrow_mut() += 1;
            let status = self
                .results
                .borrow_mut()
                .pop_front()
                .unwrap_or([1, 0, 0, 0]);
            Ok(ResultRecord::from_status(status))
        }

        fn write_block(&self, block: &[u8]) -> Result<()> {
            self.blocks.borrow_mut().push(block.to_vec());
            Ok(())
        }
    }

    fn quick(max_polls: u32) -> StreamConfig {
        StreamConfig::default()
            .with_poll_interval(Duration::ZERO)
            .with_max_polls(max_polls)
    }

    #[test]
    fn test_blocks_are_padded() {
        // drain, then complete on the first poll
        let unit = MockUnit::with_results(&[[9, 9, 9, 9], [0, 0, 0, 0]]);
        let image: Vec<u8> = (0..1300u32).map(|i| (i % 200 + 1) as u8).collect();

        let mut seen = Vec::new();
        let mut sink = |v: f32| seen.push(v);
        stream_update(&unit, &quick(600), &image, &mut Progress::new(Some(&mut sink))).unwrap();

        let blocks = unit.blocks.borrow();
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.len() == BLOCK_SIZE));
        assert_eq!(&blocks[2][..276], &image[1024..]);
        assert!(blocks[2][276..].iter().all(|&b| b == 0));

        let commands = unit.commands.borrow();
        assert_eq!(commands[0], ControlRecord {
            p1: INIT_TAG,
            p2: 1536,
            p3: 1300,
            p4: 0
        });
        assert_eq!(commands[1].p1, START_TAG);
        assert_eq!(commands[1].p2, 1536);

        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_exact_multiple_needs_no_padding() {
        let unit = MockUnit::with_results(&[[0; 4], [0; 4]]);
        stream_update(&unit, &quick(10), &[7u8; 1024], &mut Progress::none()).unwrap();
        assert_eq!(unit.blocks.borrow().len(), 2);
        assert_eq!(unit.commands.borrow()[0].p2, 1024);
    }

    #[test]
    fn test_completion_stops_polling() {
        let unit = MockUnit::with_results(&[[0; 4], [1, 0, 0, 0], [0, 2, 0, 0], [0; 4]]);
        stream_update(&unit, &quick(600), &[1u8; 10], &mut Progress::none()).unwrap();
        // one drain plus three polls
        assert_eq!(*unit.polls.borrow(), 4);
    }

    #[test]
    fn test_fault_sentinel_aborts() {
        for code in [FAULT_UNSUPPORTED_COMMAND, FAULT_BURN_IMAGE] {
            let unit = MockUnit::with_results(&[[0; 4], [1, 0, 0, 0], [code, 0, 0, 0]]);
            let err = stream_update(&unit, &quick(600), &[1u8; 10], &mut Progress::none()).unwrap_err();
            assert!(matches!(err, Error::DeviceFault(c) if c == code));
            assert_eq!(*unit.polls.borrow(), 3);
        }
    }

    #[test]
    fn test_poll_exhaustion_is_timeout() {
        let unit = MockUnit::with_results(&[[0; 4]]);
        let err = stream_update(&unit, &quick(5), &[1u8; 10], &mut Progress::none()).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(*unit.polls.borrow(), 6);
    }

    #[test]
    fn test_empty_image_rejected() {
        let unit = MockUnit::default();
        let err = stream_update(&unit, &quick(5), &[], &mut Progress::none()).unwrap_err();
        assert!(matches!(err, Error::InvalidImage(_)));
        assert!(unit.commands.borrow().is_empty());
    }

    #[test]
    fn test_record_encoding() {
        let record = ControlRecord::init(1300);
        let bytes = record.encode();
        assert_eq!(&bytes[0..4], &[0x01, 0x00, 0x03, 0x00]);
        assert_eq!(ControlRecord::decode(&bytes).unwrap(), record);
        assert!(ResultRecord::parse(&[0, 0]).is_err());
    }
}
