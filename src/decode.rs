//! Instruction-length decoding using iced-x86
//!
//! Walks a target function instruction by instruction to find the first
//! boundary at or past the size of the redirect that will be written.
//! Splitting mid-instruction would leave a half-instruction live in the
//! origin stub, so the boundary is always an exact instruction count.

use iced_x86::{Decoder, DecoderOptions, FlowControl, Instruction, Mnemonic};

/// coarse classification of an instruction, as far as patching cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    /// unconditional jump (any encoding) - the target was already redirected
    Jump,
    /// int3 breakpoint - the target is instrumented or deliberately guarded
    Trap,
    /// return - the function ends here
    Return,
    /// anything else, safe to copy into the origin stub
    Other,
}

/// a decoded instruction with the metadata boundary scanning needs
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    /// instruction length in bytes
    pub length: usize,
    /// classification for the re-entrancy guard
    pub kind: InstructionKind,
}

/// outcome of scanning a target's entry for a safe patch boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryScan {
    /// boundary found: this many bytes cover the redirect exactly at an
    /// instruction boundary
    Boundary(usize),
    /// a jump or trap sits before the boundary; refuse to hook
    Unsafe,
    /// the function returned (or decoding failed) before enough bytes
    /// accumulated
    Incomplete,
}

/// instruction decoder pinned to one bitness
pub struct InstructionDecoder {
    bitness: u32,
}

impl InstructionDecoder {
    /// create decoder for the current architecture
    #[cfg(target_arch = "x86_64")]
    pub fn native() -> Self {
        Self { bitness: 64 }
    }

    #[cfg(target_arch = "x86")]
    pub fn native() -> Self {
        Self { bitness: 32 }
    }

    /// create 64-bit decoder
    pub fn x64() -> Self {
        Self { bitness: 64 }
    }

    /// create 32-bit decoder
    pub fn x86() -> Self {
        Self { bitness: 32 }
    }

    /// decode a single instruction at the given address
    pub fn decode_at(&self, address: usize, bytes: &[u8]) -> Option<DecodedInstruction> {
        if bytes.is_empty() {
            return None;
        }

        let mut decoder = Decoder::with_ip(self.bitness, bytes, address as u64, DecoderOptions::NONE);
        if !decoder.can_decode() {
            return None;
        }

        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return None;
        }

        Some(DecodedInstruction {
            length: instruction.len(),
            kind: classify(&instruction),
        })
    }

    /// find a safe patch boundary at or past `required` bytes
    ///
    /// accumulates instruction lengths from the start of `bytes`, rejecting
    /// targets that already contain a jump or trap in the patch region and
    /// targets that end before `required` bytes are covered.
    pub fn scan_patch_region(&self, address: usize, bytes: &[u8], required: usize) -> BoundaryScan {
        let mut decoder = Decoder::with_ip(self.bitness, bytes, address as u64, DecoderOptions::NONE);
        let mut total = 0usize;

        while decoder.can_decode() {
            let instruction = decoder.decode();
            if instruction.is_invalid() {
                return BoundaryScan::Incomplete;
            }

            match classify(&instruction) {
                InstructionKind::Jump | InstructionKind::Trap => return BoundaryScan::Unsafe,
                InstructionKind::Return => return BoundaryScan::Incomplete,
                InstructionKind::Other => {}
            }

            total += instruction.len();
            if total >= required {
                return BoundaryScan::Boundary(total);
            }
        }

        BoundaryScan::Incomplete
    }
}

/// classify one instruction for the re-entrancy guard
///
/// only unconditional jumps and int3 reject a target; conditional jumps and
/// calls are fine to copy verbatim into the origin stub since their
/// displacements stay meaningful when the stub tail-jumps back.
fn classify(instruction: &Instruction) -> InstructionKind {
    if instruction.mnemonic() == Mnemonic::Jmp {
        return InstructionKind::Jump;
    }
    if instruction.mnemonic() == Mnemonic::Int3 {
        return InstructionKind::Trap;
    }
    if instruction.flow_control() == FlowControl::Return {
        return InstructionKind::Return;
    }
    InstructionKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_nop() {
        let decoder = InstructionDecoder::x64();
        let nop = [0x90u8];
        let decoded = decoder.decode_at(0x1000, &nop).unwrap();

        assert_eq!(decoded.length, 1);
        assert_eq!(decoded.kind, InstructionKind::Other);
    }

    #[test]
    fn test_classify_jmp_rel32() {
        let decoder = InstructionDecoder::x64();
        let jmp = [0xE9, 0x00, 0x01, 0x00, 0x00];
        let decoded = decoder.decode_at(0x1000, &jmp).unwrap();

        assert_eq!(decoded.length, 5);
        assert_eq!(decoded.kind, InstructionKind::Jump);
    }

    #[test]
    fn test_classify_jmp_short() {
        let decoder = InstructionDecoder::x64();
        let jmp = [0xEB, 0x10];
        let decoded = decoder.decode_at(0x1000, &jmp).unwrap();

        assert_eq!(decoded.length, 2);
        assert_eq!(decoded.kind, InstructionKind::Jump);
    }

    #[test]
    fn test_classify_int3() {
        let decoder = InstructionDecoder::x64();
        let decoded = decoder.decode_at(0x1000, &[0xCC]).unwrap();
        assert_eq!(decoded.kind, InstructionKind::Trap);
    }

    #[test]
    fn test_classify_ret() {
        let decoder = InstructionDecoder::x64();
        let decoded = decoder.decode_at(0x1000, &[0xC3]).unwrap();
        assert_eq!(decoded.kind, InstructionKind::Return);
    }

    #[test]
    fn test_conditional_jump_is_not_rejected() {
        let decoder = InstructionDecoder::x64();
        // jz +0x10 (short)
        let decoded = decoder.decode_at(0x1000, &[0x74, 0x10]).unwrap();
        assert_eq!(decoded.kind, InstructionKind::Other);
    }

    #[test]
    fn test_call_is_not_rejected() {
        let decoder = InstructionDecoder::x64();
        let decoded = decoder
            .decode_at(0x1000, &[0xE8, 0x00, 0x00, 0x00, 0x00])
            .unwrap();
        assert_eq!(decoded.kind, InstructionKind::Other);
    }

    #[test]
    fn test_scan_typical_prologue() {
        let decoder = InstructionDecoder::x64();
        // push rbp; mov rbp, rsp; sub rsp, 0x28
        let prologue = [0x55, 0x48, 0x89, 0xE5, 0x48, 0x83, 0xEC, 0x28];

        match decoder.scan_patch_region(0x1000, &prologue, 5) {
            BoundaryScan::Boundary(len) => {
                // push(1) + mov(3) + sub(4) = 8; boundary after sub
                assert_eq!(len, 8);
            }
            other => panic!("expected boundary, got {other:?}"),
        }
    }

    #[test]
    fn test_scan_exact_five_bytes() {
        let decoder = InstructionDecoder::x64();
        // mov eax, edi (2) + add eax, 1 (3) = exactly 5
        let code = [0x89, 0xF8, 0x83, 0xC0, 0x01, 0xC3];

        assert_eq!(
            decoder.scan_patch_region(0x1000, &code, 5),
            BoundaryScan::Boundary(5)
        );
    }

    #[test]
    fn test_scan_rejects_leading_jmp() {
        let decoder = InstructionDecoder::x64();
        let code = [0xE9, 0x00, 0x00, 0x00, 0x00, 0x90, 0x90, 0x90];

        assert_eq!(decoder.scan_patch_region(0x1000, &code, 5), BoundaryScan::Unsafe);
    }

    #[test]
    fn test_scan_rejects_embedded_int3() {
        let decoder = InstructionDecoder::x64();
        // push rbp; int3; ...
        let code = [0x55, 0xCC, 0x90, 0x90, 0x90, 0x90];

        assert_eq!(decoder.scan_patch_region(0x1000, &code, 5), BoundaryScan::Unsafe);
    }

    #[test]
    fn test_scan_too_short_function() {
        let decoder = InstructionDecoder::x64();
        // xor eax, eax; ret - only 3 bytes before the return
        let code = [0x31, 0xC0, 0xC3, 0x90, 0x90, 0x90];

        assert_eq!(
            decoder.scan_patch_region(0x1000, &code, 5),
            BoundaryScan::Incomplete
        );
    }

    #[test]
    fn test_scan_x86_bitness() {
        let decoder = InstructionDecoder::x86();
        // push ebp; mov ebp, esp; sub esp, 0x28
        let prologue = [0x55, 0x89, 0xE5, 0x83, 0xEC, 0x28];

        match decoder.scan_patch_region(0x1000, &prologue, 5) {
            BoundaryScan::Boundary(len) => assert_eq!(len, 6),
            other => panic!("expected boundary, got {other:?}"),
        }
    }
}
