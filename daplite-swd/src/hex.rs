// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Intel-HEX streaming decoder
//!
//! Converts ASCII hex records, delivered in arbitrary-sized chunks, into
//! contiguous binary runs with their target addresses.  The caller feeds
//! bytes as they arrive and writes out each run the decoder emits - records
//! are merged into one run for as long as their addresses are contiguous.
//!
//! A record whose address breaks the run cannot be emitted in the same call
//! as the run it breaks: it is latched and replayed as the first thing
//! processed on the next call.  [`HexDecoder::reset()`] clears all of this
//! between files.

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use alloc::vec::Vec;
use serde::Serialize;

// Largest record payload accepted.  Real toolchains emit 16 or 32 byte
// records; anything larger overruns the line scratch.
const MAX_RECORD_DATA: usize = 32;

// Non-payload bytes per record: count, two address bytes, type, checksum
const RECORD_OVERHEAD: usize = 5;

// Run length at which a contiguous image is flushed anyway, so streaming a
// large file uses bounded memory.  Checked per completed record, which keeps
// one-call and byte-by-byte decoding identical.
const MAX_RUN: usize = 512;

// Record types
const RECTYPE_DATA: u8 = 0x00;
const RECTYPE_EOF: u8 = 0x01;
const RECTYPE_EXT_SEGMENT: u8 = 0x02;
const RECTYPE_EXT_LINEAR: u8 = 0x04;

/// Decode status, returned with every call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStatus {
    /// Input consumed, run still accumulating.  Nothing to write yet.
    Ok,
    /// End-of-file record seen.  The final run accompanies this status.
    Eof,
    /// The run was broken - by an address gap or an extended-address
    /// record.  Write the accompanying run, then keep feeding input.
    Unaligned,
    /// A record failed its checksum, or contained a non-hex character.
    ChecksumFail,
    /// A record declared a payload too large for the line scratch.
    LineOverrun,
}

/// One decode step's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    /// Status of this step
    pub status: DecodeStatus,
    /// Input bytes consumed.  Resume feeding from this offset.
    pub consumed: usize,
    /// Target address of `data`
    pub address: u32,
    /// Contiguous binary run, empty if nothing was flushed
    pub data: Vec<u8>,
}

// A completed data record held back for the next call
#[derive(Debug, Clone, Copy)]
struct DataRecord {
    address: u32,
    len: u8,
    data: [u8; MAX_RECORD_DATA],
}

// Per-line scratch, reset by every ':'
#[derive(Debug)]
struct LineScratch {
    // Between ':' and record completion
    active: bool,
    // High nibble of a half-accumulated byte
    high_nibble: Option<u8>,
    // Raw record bytes: count, address, type, payload, checksum
    raw: [u8; MAX_RECORD_DATA + RECORD_OVERHEAD],
    raw_len: usize,
    // Running sum of raw bytes for the checksum
    sum: u32,
}

// Manual impl: the scratch array is longer than Default covers
impl Default for LineScratch {
    fn default() -> Self {
        Self {
            active: false,
            high_nibble: None,
            raw: [0; MAX_RECORD_DATA + RECORD_OVERHEAD],
            raw_len: 0,
            sum: 0,
        }
    }
}

/// Intel-HEX streaming decoder
///
/// All cross-call state lives here - create one per file transfer, or call
/// [`Self::reset()`] between files.
#[derive(Debug, Default)]
pub struct HexDecoder {
    // Upper address bits from the last extended-address record
    base: u32,
    // Address the next data record must start at to extend the run
    next_address: u32,
    // Data record latched for replay after a run break
    replay: Option<DataRecord>,
    line: LineScratch,
    // The accumulating run
    run: Vec<u8>,
    run_start: u32,
}

impl HexDecoder {
    /// Creates a decoder ready for the start of a file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears all state for a new file.  Nothing from the previous file -
    /// buffered run, latched record, address base - survives.
    pub fn reset(&mut self) {
        trace!("Exec:  Hex decoder reset");
        *self = Self::default();
    }

    /// Decodes a chunk of input.
    ///
    /// Returns after the first event that produces output (or an error),
    /// which may leave input unconsumed - call again from
    /// [`DecodeResult::consumed`] until the chunk is used up.  A chunk
    /// fully consumed without an event returns [`DecodeStatus::Ok`] with
    /// the run retained for the next call.
    ///
    /// Arguments:
    /// - `input`: The next bytes of the hex file.
    ///
    /// Returns:
    /// - [`DecodeResult`]: status, consumed count, and any flushed run.
    pub fn decode(&mut self, input: &[u8]) -> DecodeResult {
        // A record latched by a run break replays first.  The run was
        // flushed when it was latched, so this starts the new run.
        if let Some(record) = self.replay.take() {
            self.start_run(&record);
        }

        let mut consumed = 0;
        for &ch in input {
            consumed += 1;
            if let Some(status) = self.consume_char(ch) {
                return self.flush(status, consumed);
            }
        }

        DecodeResult {
            status: DecodeStatus::Ok,
            consumed,
            address: 0,
            data: Vec::new(),
        }
    }

    // Returns the accumulated run and clears it.
    fn flush(&mut self, status: DecodeStatus, consumed: usize) -> DecodeResult {
        let data = core::mem::take(&mut self.run);
        trace!(
            "Value: Hex flush {status:?}, {} bytes at 0x{:08X}",
            data.len(),
            self.run_start
        );

        DecodeResult {
            status,
            consumed,
            address: self.run_start,
            data,
        }
    }

    // Feeds one character through the line state machine.  `Some` means a
    // flush event.
    fn consume_char(&mut self, ch: u8) -> Option<DecodeStatus> {
        if ch == b':' {
            self.line = LineScratch {
                active: true,
                ..LineScratch::default()
            };
            return None;
        }

        if !self.line.active {
            // Whitespace and line endings between records
            return None;
        }

        let Some(nibble) = hex_nibble(ch) else {
            // A non-hex character inside a record means the record is
            // corrupt or truncated
            warn!("Non-hex character 0x{ch:02X} inside record");
            self.line.active = false;
            return Some(DecodeStatus::ChecksumFail);
        };

        match self.line.high_nibble.take() {
            None => {
                self.line.high_nibble = Some(nibble);
                None
            }
            Some(high) => self.push_byte((high << 4) | nibble),
        }
    }

    // Accumulates one completed byte of the record.
    fn push_byte(&mut self, byte: u8) -> Option<DecodeStatus> {
        let line = &mut self.line;
        line.raw[line.raw_len] = byte;
        line.raw_len += 1;
        line.sum = line.sum.wrapping_add(byte as u32);

        if line.raw_len == 1 {
            // Byte count is the first field - check it fits before
            // accumulating the rest
            if byte as usize > MAX_RECORD_DATA {
                warn!("Record payload {byte} exceeds line scratch");
                line.active = false;
                return Some(DecodeStatus::LineOverrun);
            }
            return None;
        }

        let total = line.raw[0] as usize + RECORD_OVERHEAD;
        if line.raw_len < total {
            return None;
        }

        line.active = false;
        self.dispatch()
    }

    // Validates and applies a completed record.
    fn dispatch(&mut self) -> Option<DecodeStatus> {
        if self.line.sum % 256 != 0 {
            warn!("Record checksum mismatch");
            return Some(DecodeStatus::ChecksumFail);
        }

        let count = self.line.raw[0] as usize;
        let address = u16::from_be_bytes([self.line.raw[1], self.line.raw[2]]);
        let rectype = self.line.raw[3];
        let mut payload = [0u8; MAX_RECORD_DATA];
        payload[..count].copy_from_slice(&self.line.raw[4..4 + count]);

        match rectype {
            RECTYPE_DATA => {
                let addr = self.base.wrapping_add(address as u32);

                if !self.run.is_empty() && addr != self.next_address {
                    // Address gap: flush the run, hold this record back
                    // for the next call
                    trace!(
                        "Value: Hex gap, 0x{addr:08X} != 0x{:08X}",
                        self.next_address
                    );
                    self.replay = Some(DataRecord {
                        address: addr,
                        len: count as u8,
                        data: payload,
                    });
                    return Some(DecodeStatus::Unaligned);
                }

                if self.run.is_empty() {
                    self.run_start = addr;
                }
                self.run.extend_from_slice(&payload[..count]);
                self.next_address = addr.wrapping_add(count as u32);

                if self.run.len() >= MAX_RUN {
                    // Bound the run - the next record continues seamlessly
                    return Some(DecodeStatus::Unaligned);
                }
                None
            }
            RECTYPE_EOF => Some(DecodeStatus::Eof),
            RECTYPE_EXT_SEGMENT => {
                // Anything buffered belongs to the old base
                let value = u16::from_be_bytes([payload[0], payload[1]]);
                self.base = (value as u32) << 4;
                Some(DecodeStatus::Unaligned)
            }
            RECTYPE_EXT_LINEAR => {
                let value = u16::from_be_bytes([payload[0], payload[1]]);
                self.base = (value as u32) << 16;
                Some(DecodeStatus::Unaligned)
            }
            _ => {
                // Start-address record types carry no data to program
                trace!("Value: Ignoring record type 0x{rectype:02X}");
                None
            }
        }
    }

    // Starts a fresh run from a replayed record.
    fn start_run(&mut self, record: &DataRecord) {
        self.run_start = record.address;
        self.run
            .extend_from_slice(&record.data[..record.len as usize]);
        self.next_address = record.address.wrapping_add(record.len as u32);
    }
}

fn hex_nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    // ELA 0x0800, two contiguous data records, a gapped record, EOF
    const FILE: &[u8] = b":020000040800F2\n\
                          :04000000DEADBEEFC4\n\
                          :0400040001020304EE\n\
                          :02001000AA55EF\n\
                          :00000001FF\n";

    // Drives a whole input through the decoder, collecting every non-empty
    // run, until Eof, an error, or the input is exhausted.
    fn collect(decoder: &mut HexDecoder, input: &[u8]) -> (Vec<(u32, Vec<u8>)>, DecodeStatus) {
        let mut runs = Vec::new();
        let mut offset = 0;

        loop {
            let result = decoder.decode(&input[offset..]);
            offset += result.consumed;

            if !result.data.is_empty() {
                runs.push((result.address, result.data));
            }

            match result.status {
                DecodeStatus::Ok if offset >= input.len() => return (runs, DecodeStatus::Ok),
                DecodeStatus::Ok | DecodeStatus::Unaligned => {}
                status => return (runs, status),
            }
        }
    }

    #[test]
    fn contiguous_records_merge_into_one_run() {
        let mut decoder = HexDecoder::new();
        let (runs, status) = collect(&mut decoder, FILE);

        assert_eq!(status, DecodeStatus::Eof);
        assert_eq!(
            runs,
            vec![
                (
                    0x0800_0000,
                    vec![0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]
                ),
                (0x0800_0010, vec![0xAA, 0x55]),
            ]
        );
    }

    #[test]
    fn byte_by_byte_matches_single_call() {
        let mut whole = HexDecoder::new();
        let (expected, expected_status) = collect(&mut whole, FILE);

        // Same file, fed one byte at a time, until Eof as `collect` does
        let mut decoder = HexDecoder::new();
        let mut runs = Vec::new();
        let mut status = DecodeStatus::Ok;
        'file: for &ch in FILE {
            let mut offset = 0;
            while offset < 1 {
                let result = decoder.decode(&[ch][offset..]);
                offset += result.consumed;
                if !result.data.is_empty() {
                    runs.push((result.address, result.data));
                }
                status = result.status;
                if status == DecodeStatus::Eof {
                    break 'file;
                }
            }
        }

        assert_eq!(runs, expected);
        assert_eq!(status, expected_status);
    }

    #[test]
    fn gap_latches_record_for_next_call() {
        let mut decoder = HexDecoder::new();
        let input: &[u8] = b":04000000DEADBEEFC4\n:02001000AA55EF\n";

        let result = decoder.decode(input);
        assert_eq!(result.status, DecodeStatus::Unaligned);
        assert_eq!(result.address, 0);
        assert_eq!(result.data, vec![0xDE, 0xAD, 0xBE, 0xEF]);
        // The gapped record was not consumed into the flushed run
        assert_eq!(result.consumed, input.len() - 1);

        // It replays at the start of the next call
        let result = decoder.decode(&input[result.consumed..]);
        assert_eq!(result.status, DecodeStatus::Ok);
        let result = decoder.decode(b":00000001FF\n");
        assert_eq!(result.status, DecodeStatus::Eof);
        assert_eq!(result.address, 0x0000_0010);
        assert_eq!(result.data, vec![0xAA, 0x55]);
    }

    #[test]
    fn extended_linear_address_rebases() {
        let mut decoder = HexDecoder::new();

        let result = decoder.decode(b":020000040800F2\n");
        assert_eq!(result.status, DecodeStatus::Unaligned);
        assert!(result.data.is_empty());

        let (runs, status) =
            collect(&mut decoder, b":04000000DEADBEEFC4\n:00000001FF\n");
        assert_eq!(status, DecodeStatus::Eof);
        assert_eq!(runs, vec![(0x0800_0000, vec![0xDE, 0xAD, 0xBE, 0xEF])]);
    }

    #[test]
    fn extended_segment_address_rebases() {
        let mut decoder = HexDecoder::new();

        // Segment 0x1000 puts the next record at 0x10000
        let (runs, status) = collect(
            &mut decoder,
            b":020000021000EC\n:04000000DEADBEEFC4\n:00000001FF\n",
        );
        assert_eq!(status, DecodeStatus::Eof);
        assert_eq!(runs, vec![(0x0001_0000, vec![0xDE, 0xAD, 0xBE, 0xEF])]);
    }

    #[test]
    fn single_byte_mutation_fails_checksum() {
        // Corrupt one payload character: DE -> DF
        let mut decoder = HexDecoder::new();
        let (_, status) = collect(
            &mut decoder,
            b":04000000DFADBEEFC4\n:00000001FF\n",
        );
        assert_eq!(status, DecodeStatus::ChecksumFail);

        // And one address character
        let mut decoder = HexDecoder::new();
        let (_, status) = collect(
            &mut decoder,
            b":04010000DEADBEEFC4\n:00000001FF\n",
        );
        assert_eq!(status, DecodeStatus::ChecksumFail);
    }

    // Formats a valid data record, checksum included.
    fn data_record(addr: u16, payload: &[u8]) -> alloc::string::String {
        use core::fmt::Write;

        let mut sum = payload.len() as u32 + (addr >> 8) as u32 + (addr & 0xFF) as u32;
        for &byte in payload {
            sum += byte as u32;
        }
        let checksum = (0x100 - (sum & 0xFF)) & 0xFF;

        let mut line = alloc::string::String::new();
        let _ = write!(line, ":{:02X}{addr:04X}00", payload.len());
        for &byte in payload {
            let _ = write!(line, "{byte:02X}");
        }
        let _ = write!(line, "{checksum:02X}\n");
        line
    }

    #[test]
    fn long_contiguous_image_flushes_in_bounded_runs() {
        // 768 contiguous bytes in 16-byte records
        let image: Vec<u8> = (0..768u32).map(|i| i as u8).collect();
        let mut file = alloc::string::String::new();
        for (i, chunk) in image.chunks(16).enumerate() {
            file.push_str(&data_record((i * 16) as u16, chunk));
        }
        file.push_str(":00000001FF\n");

        let mut decoder = HexDecoder::new();
        let (runs, status) = collect(&mut decoder, file.as_bytes());
        assert_eq!(status, DecodeStatus::Eof);

        // Two runs: one at the length bound, the remainder at EOF, and they
        // reassemble to the original image
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], (0, image[..512].to_vec()));
        assert_eq!(runs[1], (512, image[512..].to_vec()));
    }

    #[test]
    fn maximum_payload_record_accepted() {
        // A 32 byte payload fills the line scratch exactly
        let payload: Vec<u8> = (0..32u8).collect();
        let mut file = data_record(0x0040, &payload);
        file.push_str(":00000001FF\n");

        let mut decoder = HexDecoder::new();
        let (runs, status) = collect(&mut decoder, file.as_bytes());
        assert_eq!(status, DecodeStatus::Eof);
        assert_eq!(runs, vec![(0x0000_0040, payload)]);
    }

    #[test]
    fn oversized_record_is_line_overrun() {
        let mut decoder = HexDecoder::new();
        let result = decoder.decode(b":FF000000");
        assert_eq!(result.status, DecodeStatus::LineOverrun);
    }

    #[test]
    fn reset_isolates_files() {
        let mut decoder = HexDecoder::new();

        // Abandon a file mid-run, with a record latched
        let result = decoder.decode(b":020000040800F2\n:04000000DEADBEEFC4\n:02001000AA55EF\n");
        assert_eq!(result.status, DecodeStatus::Unaligned);
        decoder.reset();

        // The second file sees neither the base nor the latched record
        let (runs, status) =
            collect(&mut decoder, b":040020001122334432\n:00000001FF\n");
        assert_eq!(status, DecodeStatus::Eof);
        assert_eq!(runs, vec![(0x0000_0020, vec![0x11, 0x22, 0x33, 0x44])]);
    }
}
