//! Simulated camera shared by the integration tests.

#![allow(dead_code)]

use depthflash::image::flash::{INFO_HEADER_SIZE, TABLE_CRC, TABLE_HEADER_SIZE};
use depthflash::protocol::command::{MAX_RESPONSE_DATA, encode_response, encode_status};
use depthflash::target::stream::{ControlRecord, START_TAG};
use depthflash::{Channel, Command, Error, FlashLayout, Opcode, Result};

/// Route library logs through the test harness; `RUST_LOG` picks the level.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const CALIBRATION_TABLE: u16 = 0x00A0;
pub const CALIBRATION_OFFSET: u32 = 0x17_0000;
pub const CALIBRATION_LEN: usize = 256;

/// Camera speaking both the monitor command set and the streaming unit.
pub struct SimCamera {
    pub flash: Vec<u8>,
    pub identity: Vec<u8>,
    pub opcodes: Vec<Opcode>,
    pub records: Vec<ControlRecord>,
    pub streamed: Vec<u8>,
    pub power: Vec<bool>,
    burn_polls: u32,
    burning: Option<u32>,
    fault: Option<u8>,
}

impl SimCamera {
    pub fn new(flash: Vec<u8>) -> Self {
        Self {
            flash,
            identity: vec![0; MAX_RESPONSE_DATA],
            opcodes: Vec::new(),
            records: Vec::new(),
            streamed: Vec::new(),
            power: Vec::new(),
            burn_polls: 2,
            burning: None,
            fault: None,
        }
    }

    pub fn with_identity(mut self, identity: Vec<u8>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_fault(mut self, code: u8) -> Self {
        self.fault = Some(code);
        self
    }

    fn monitor(&mut self, cmd: &Command) -> Vec<u8> {
        let [p1, p2, _, _] = cmd.params();
        let (p1, p2) = (p1 as usize, p2 as usize);
        match cmd.opcode() {
            Opcode::Frb => encode_response(Opcode::Frb, &self.flash[p1..p1 + p2]),
            Opcode::Fes => {
                self.flash[p1 * 4096..(p1 + p2) * 4096].fill(0xFF);
                encode_response(Opcode::Fes, &[])
            },
            Opcode::Fwb => {
                self.flash[p1..p1 + p2].copy_from_slice(cmd.data());
                encode_response(Opcode::Fwb, &[])
            },
            Opcode::Gvd => {
                let len = self.identity.len().min(MAX_RESPONSE_DATA);
                encode_response(Opcode::Gvd, &self.identity[..len])
            },
            opcode => encode_response(opcode, &[]),
        }
    }

    fn unit(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        match request.first() {
            Some(1) => {
                let record = ControlRecord::decode(&request[1..])?;
                if record.p1 == START_TAG {
                    self.burning = Some(0);
                }
                self.records.push(record);
                Ok(Vec::new())
            },
            Some(2) => {
                let Some(polls) = self.burning.as_mut() else {
                    return Ok(vec![0x10, 0, 0, 0]);
                };
                *polls += 1;
                if let Some(code) = self.fault {
                    return Ok(vec![code, 0, 0, 0]);
                }
                if *polls >= self.burn_polls {
                    Ok(vec![0; 4])
                } else {
                    Ok(vec![0x01, 0, 0, 0])
                }
            },
            Some(3) => {
                self.streamed.extend_from_slice(&request[1..]);
                Ok(Vec::new())
            },
            _ => Ok(encode_status(-1)),
        }
    }
}

impl Channel for SimCamera {
    fn send(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        match Command::parse(request) {
            Ok(cmd) => {
                self.opcodes.push(cmd.opcode());
                Ok(self.monitor(&cmd))
            },
            Err(Error::Protocol(_)) => self.unit(request),
            Err(e) => Err(e),
        }
    }

    fn set_power(&mut self, on: bool) -> Result<()> {
        self.power.push(on);
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }
}

fn put_table(image: &mut [u8], offset: u32, table_type: u16, data: &[u8]) {
    let at = offset as usize;
    image[at..at + 2].copy_from_slice(&table_type.to_le_bytes());
    image[at + 2..at + 4].copy_from_slice(&1u16.to_le_bytes());
    image[at + 4..at + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
    image[at + 8..at + 12].fill(0);
    image[at + 12..at + 16].copy_from_slice(&TABLE_CRC.checksum(data).to_le_bytes());
    image[at + TABLE_HEADER_SIZE..at + TABLE_HEADER_SIZE + data.len()].copy_from_slice(data);
}

fn put_toc(image: &mut [u8], offset: u32, links: &[(u16, u32)]) {
    let mut data = Vec::new();
    for &(table_type, table_offset) in links {
        data.extend_from_slice(&table_type.to_le_bytes());
        data.extend_from_slice(&((table_offset >> 8) as u16).to_le_bytes());
    }
    put_table(image, offset, 0xFFF0, &data);
}

/// Filler byte pattern seeded by `seed`.
pub fn pattern(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed))
        .collect()
}

/// A 2 MiB image: read-write section at 1 MiB, read-only at 1.5 MiB.
pub fn build_image(seed: u8, version: [u8; 4]) -> Vec<u8> {
    let layout = FlashLayout::default();
    let mut image = pattern(seed, layout.flash_size as usize);

    put_table(
        &mut image,
        CALIBRATION_OFFSET,
        CALIBRATION_TABLE,
        &pattern(seed ^ 0x5A, CALIBRATION_LEN),
    );
    put_toc(&mut image, layout.rw_toc_offset, &[(CALIBRATION_TABLE, CALIBRATION_OFFSET)]);
    put_toc(&mut image, layout.ro_toc_offset, &[]);

    let header_at = layout.header_offset as usize;
    for (i, value) in [0x0000_D5D5u32, 0x10_0000, 0x8_0000, 0x18_0000, 0x8_0000]
        .into_iter()
        .enumerate()
    {
        let at = header_at + i * 4;
        image[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
    let at = header_at + INFO_HEADER_SIZE;
    image[at..at + 4].copy_from_slice(&version);

    image
}

/// Bytes of the read-write calibration table, header included.
pub fn calibration(flash: &[u8]) -> &[u8] {
    let at = CALIBRATION_OFFSET as usize;
    &flash[at..at + TABLE_HEADER_SIZE + CALIBRATION_LEN]
}
