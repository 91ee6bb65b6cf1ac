//! AVCC stream → Annex-B access units
//!
//! The capture tools write each encoded picture as a run of length-prefixed
//! NAL units. An access unit is closed after its first VCL NAL; parameter
//! sets and SEI preceding a slice travel with it.

use crate::error::{MediaError, MediaResult};
use sfurtc_core::h264::START_CODE;
use sfurtc_core::{AccessUnit, NalType};
use std::io::{ErrorKind, Read};

/// Largest NAL unit accepted from a capture process
pub const MAX_NAL_SIZE: usize = 16 * 1024 * 1024;

/// Reads access units from an AVCC byte stream
#[derive(Debug)]
pub struct AvccReader<R> {
    reader: R,
    nal_buf: Vec<u8>,
    nals_read: u64,
}

impl<R: Read> AvccReader<R> {
    /// Wrap a byte stream
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            nal_buf: Vec::new(),
            nals_read: 0,
        }
    }

    /// NAL units consumed so far
    pub fn nals_read(&self) -> u64 {
        self.nals_read
    }

    /// Next NAL unit without prefix; `None` at a clean end of stream
    pub fn next_nal(&mut self) -> MediaResult<Option<&[u8]>> {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        if len == 0 || len > MAX_NAL_SIZE {
            return Err(MediaError::CaptureProtocol {
                reason: format!("invalid NAL length {}", len),
            });
        }
        self.nal_buf.resize(len, 0);
        self.reader.read_exact(&mut self.nal_buf).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                MediaError::CaptureProtocol {
                    reason: "stream ended inside a NAL unit".to_string(),
                }
            } else {
                MediaError::from(e)
            }
        })?;
        self.nals_read += 1;
        Ok(Some(self.nal_buf.as_slice()))
    }

    /// Next complete access unit in Annex-B form
    ///
    /// Non-VCL units left over at end of stream are discarded.
    pub fn next_access_unit(&mut self) -> MediaResult<Option<AccessUnit>> {
        let mut data = Vec::new();
        let mut is_keyframe = false;
        loop {
            let Some(nal) = self.next_nal()? else {
                return Ok(None);
            };
            let nal_type = NalType::from_header(nal[0]);
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(nal);
            if nal_type == NalType::Idr {
                is_keyframe = true;
            }
            if nal_type.is_vcl() {
                return Ok(Some(AccessUnit {
                    data,
                    timestamp: 0,
                    is_keyframe,
                }));
            }
        }
    }
}

impl<R: Read> Iterator for AvccReader<R> {
    type Item = MediaResult<AccessUnit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_access_unit().transpose()
    }
}
