//! x86 (32-bit) architecture backend

use super::Architecture;
use crate::decode::{BoundaryScan, InstructionDecoder};

/// x86 (32-bit) architecture
pub struct X86;

impl Architecture for X86 {
    fn scan_patch_region(address: usize, bytes: &[u8], required: usize) -> BoundaryScan {
        InstructionDecoder::x86().scan_patch_region(address, bytes, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_through_trait() {
        // push ebp; mov ebp, esp; sub esp, 0x28
        let prologue = [0x55, 0x89, 0xE5, 0x83, 0xEC, 0x28];
        assert_eq!(
            X86::scan_patch_region(0x1000, &prologue, 5),
            BoundaryScan::Boundary(6)
        );
    }
}
