// Copyright (c) 2021 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fmt;

use rand::RngCore;

use crate::{Error, Result};

/// Prefix of virtio-blk drive names in the guest.
const VIRT_DRIVE_PREFIX: &str = "vd";
const DISK_LETTERS: u64 = 26;
/// Linux names at most 18278 (26 + 26^2 + 26^3) disks per prefix.
const MAX_DRIVE_INDEX: u64 = 18277;
const SCSI_TARGETS_PER_CONTROLLER: u64 = 256;

pub struct HexSlice<'a>(&'a [u8]);

impl<'a> HexSlice<'a> {
    pub fn new<T>(data: &'a T) -> HexSlice<'a>
    where
        T: ?Sized + AsRef<[u8]> + 'a,
    {
        HexSlice(data.as_ref())
    }
}

impl<'a> fmt::LowerHex for HexSlice<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Returns `len` random bytes encoded as lower case hex.
pub fn generate_random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{:x}", HexSlice::new(&bytes))
}

/// Builds `<prefix>-<id>` truncated to `max_len` characters.
pub fn make_name_id(prefix: &str, id: &str, max_len: usize) -> String {
    let mut name = format!("{}-{}", prefix, id);
    name.truncate(max_len);
    name
}

/// Guest drive name for a virtio-blk index, following the kernel's disk naming:
/// 0 -> vda, 25 -> vdz, 26 -> vdaa, 701 -> vdzz, 702 -> vdaaa.
pub fn get_virt_drive_name(index: u64) -> Result<String> {
    if index > MAX_DRIVE_INDEX {
        return Err(Error::InvalidDeviceInfo(format!(
            "drive index {} out of range",
            index
        )));
    }

    let mut letters = Vec::new();
    let mut i = index as i64;
    while i >= 0 {
        letters.push(b'a' + (i as u64 % DISK_LETTERS) as u8);
        i = i / DISK_LETTERS as i64 - 1;
    }
    letters.reverse();

    Ok(format!(
        "{}{}",
        VIRT_DRIVE_PREFIX,
        String::from_utf8_lossy(&letters)
    ))
}

/// SCSI address "<target>:<lun>" for a block index.
pub fn get_scsi_address(index: u64) -> String {
    format!(
        "{}:{}",
        index / SCSI_TARGETS_PER_CONTROLLER,
        index % SCSI_TARGETS_PER_CONTROLLER
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_virt_drive_name() {
        let data = vec![
            (0, "vda"),
            (25, "vdz"),
            (26, "vdaa"),
            (27, "vdab"),
            (701, "vdzz"),
            (702, "vdaaa"),
            (18277, "vdzzz"),
        ];
        for (index, expected) in data.into_iter() {
            assert_eq!(get_virt_drive_name(index).unwrap(), expected);
        }
        assert!(get_virt_drive_name(18278).is_err());
    }

    #[test]
    fn test_get_scsi_address() {
        assert_eq!(get_scsi_address(0), "0:0");
        assert_eq!(get_scsi_address(255), "0:255");
        assert_eq!(get_scsi_address(256), "1:0");
        assert_eq!(get_scsi_address(513), "2:1");
    }

    #[test]
    fn test_make_name_id() {
        assert_eq!(make_name_id("drive", "abc", 31), "drive-abc");
        let id = "0123456789abcdef0123456789abcdef";
        let name = make_name_id("drive", id, 31);
        assert_eq!(name.len(), 31);
        assert!(name.starts_with("drive-0123"));
    }

    #[test]
    fn test_generate_random_hex() {
        let id = generate_random_hex(8);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_random_hex(8));
        assert_eq!(format!("{:x}", HexSlice::new(&[0x0au8, 0xff])), "0aff");
    }
}
