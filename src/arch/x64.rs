//! x86_64 architecture backend

use super::Architecture;
use crate::decode::{BoundaryScan, InstructionDecoder};

/// x86_64 (64-bit) architecture
pub struct X64;

impl Architecture for X64 {
    fn scan_patch_region(address: usize, bytes: &[u8], required: usize) -> BoundaryScan {
        InstructionDecoder::x64().scan_patch_region(address, bytes, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_through_trait() {
        // push rbp; mov rbp, rsp; sub rsp, 0x28
        let prologue = [0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x28];
        assert_eq!(
            X64::scan_patch_region(0x1000, &prologue, 5),
            BoundaryScan::Boundary(8)
        );
    }
}
