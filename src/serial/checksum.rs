//! CRC-16 used by the dongle's binary frames.
//!
//! Standard X-25 checksum, byte-swapped. The swapped value is what goes on the
//! wire, big-endian.

use crc::{Crc, CRC_16_IBM_SDLC};

/// CRC-16/X-25: poly 0x1021 reflected (0x8408), init 0xFFFF, final complement
const X25: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_SDLC);

/// Compute the frame checksum over `data`
pub fn crc16(data: &[u8]) -> u16 {
    X25.checksum(data).swap_bytes()
}
