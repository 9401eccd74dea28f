use chrono::{DateTime, Utc};

use crate::Hostname;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encodes a batch timestamp and a slot index as a short lowercase base-36 string.
///
/// The index occupies the low 32 bits, so no `(now, index)` pair collides with another one,
/// within a batch or across batches started at different milliseconds.
pub fn encode(now: DateTime<Utc>, index: u32) -> String {
    let millis = now.timestamp_millis().max(0) as u128;
    let mut value = (millis << 32) | index as u128;
    let mut digits = vec![];
    loop {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
        if value == 0 {
            break;
        }
    }
    digits.iter().rev().map(|&d| d as char).collect()
}

pub fn generate_hostname(
    cell: &str,
    partition: &str,
    domain: &str,
    now: DateTime<Utc>,
    index: u32,
) -> Hostname {
    format!("{cell}-{partition}-{}.{domain}", encode(now, index))
}

/// Hostnames for all slots of a batch, assigned before any host is created.
pub fn batch_hostnames(
    cell: &str,
    partition: &str,
    domain: &str,
    now: DateTime<Utc>,
    count: u32,
) -> Vec<Hostname> {
    (0..count)
        .map(|index| generate_hostname(cell, partition, domain, now, index))
        .collect()
}
