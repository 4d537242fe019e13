//! VNC authentication (RFB security type 2).
//!
//! The server sends a 16-byte challenge; the client encrypts it with DES
//! in ECB mode using the password as key. The password is truncated or
//! zero-padded to 8 bytes and every key byte has its bits mirrored.

use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockEncrypt, KeyInit};

pub const CHALLENGE_LEN: usize = 16;

fn vnc_key(password: &[u8]) -> [u8; 8] {
    let mut key = [0u8; 8];
    for (k, b) in key.iter_mut().zip(password) {
        *k = b.reverse_bits();
    }
    key
}

fn des_encrypt(key: [u8; 8], data: &[u8; CHALLENGE_LEN]) -> [u8; CHALLENGE_LEN] {
    let cipher = Des::new(&key.into());
    let mut out = *data;
    for block in out.chunks_exact_mut(8) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
    out
}

/// Response to a VNC authentication challenge.
pub fn encrypt_challenge(password: &str, challenge: &[u8; CHALLENGE_LEN]) -> [u8; CHALLENGE_LEN] {
    des_encrypt(vnc_key(password.as_bytes()), challenge)
}
