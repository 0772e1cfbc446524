//! CRC-8 over logical bus bytes, polynomial 0x9B
//! (x^8 + x^7 + x^4 + x^3 + x + 1), initial value 0.
//!
//! The checksum is defined over the escaped wire form: a logical SYN or ESC
//! byte contributes `ESC` followed by its escape code, exactly as it travels
//! on the line.

use crate::frame::{ESC, ESC_CODE_ESC, ESC_CODE_SYN, SYN};

const POLYNOMIAL: u8 = 0x9b;

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u8; 256] = build_table();

#[inline]
fn fold(crc: u8, byte: u8) -> u8 {
    CRC_TABLE[crc as usize] ^ byte
}

/// Fold one logical byte into a running checksum.
#[inline]
pub fn crc8_update(crc: u8, byte: u8) -> u8 {
    match byte {
        SYN => fold(fold(crc, ESC), ESC_CODE_SYN),
        ESC => fold(fold(crc, ESC), ESC_CODE_ESC),
        other => fold(crc, other),
    }
}

pub fn crc8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |crc, &byte| crc8_update(crc, byte))
}
