//! EVM opcode definitions and their static metadata.
//!
//! A single const table drives the bytecode iterator, the block analyzer
//! and the schedule validator: per opcode it records the display name, the
//! static gas cost, stack inputs/outputs, immediate width and whether the
//! opcode terminates a basic block.

use core::fmt;

/// A defined EVM opcode byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct OpCode(u8);

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}

impl OpCode {
    /// Instantiate from a byte; `None` for undefined bytes.
    #[inline]
    pub const fn new(opcode: u8) -> Option<Self> {
        match opcode_info_raw(opcode) {
            Some(_) => Some(Self(opcode)),
            None => None,
        }
    }

    /// The opcode byte.
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn info(self) -> OpInfo {
        match opcode_info_raw(self.0) {
            Some(info) => info,
            // Unreachable: construction is gated on a defined byte.
            None => UNKNOWN_OPCODE_INFO,
        }
    }

    /// Name as listed in the info table.
    #[inline]
    pub const fn as_str(self) -> &'static str {
        self.info().name
    }

    #[inline]
    pub const fn is_push(self) -> bool {
        self.0 >= PUSH0 && self.0 <= PUSH32
    }

    #[inline]
    pub const fn is_jumpdest(self) -> bool {
        self.0 == JUMPDEST
    }
}

/// Static information about one opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    /// Static gas cost charged for the opcode itself. Dynamic portions
    /// (memory expansion, cold access, value transfer) are handler
    /// territory and not part of block gas.
    pub gas: u16,
    /// Stack items read.
    pub inputs: u8,
    /// Stack items present after execution, counting the untouched reads.
    /// DUPn is `n -> n+1`, SWAPn is `n+1 -> n+1`.
    pub outputs: u8,
    /// Immediate bytes following the opcode in the bytecode.
    pub immediate: u8,
    /// Whether execution cannot fall through this opcode.
    pub terminating: bool,
}

impl OpInfo {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            gas: 0,
            inputs: 0,
            outputs: 0,
            immediate: 0,
            terminating: false,
        }
    }

    /// Net stack growth.
    #[allow(clippy::as_conversions, clippy::arithmetic_side_effects)]
    pub const fn io_diff(&self) -> i16 {
        // Both operands are u8, the difference always fits an i16.
        self.outputs as i16 - self.inputs as i16
    }
}

/// Effects assumed for bytes with no table entry: a conservative flat cost
/// and no stack traffic. Execution faults when such a byte is reached.
pub const UNKNOWN_OPCODE_INFO: OpInfo = OpInfo {
    name: "UNKNOWN",
    gas: 6,
    inputs: 0,
    outputs: 0,
    immediate: 0,
    terminating: false,
};

const fn gas<const G: u16>(mut info: OpInfo) -> OpInfo {
    info.gas = G;
    info
}

const fn stack_io<const I: u8, const O: u8>(mut info: OpInfo) -> OpInfo {
    info.inputs = I;
    info.outputs = O;
    info
}

/// Immediate bytes after the opcode.
const fn imm<const N: u8>(mut info: OpInfo) -> OpInfo {
    info.immediate = N;
    info
}

const fn terminating(mut info: OpInfo) -> OpInfo {
    info.terminating = true;
    info
}

macro_rules! opcodes {
    ($($val:literal => $name:ident => $($modifier:ident $(<$($num:literal),*>)?),*);* $(;)?) => {
        // Byte constants for each opcode.
        $(
            #[doc = concat!("The `", stringify!($val), "` (\"", stringify!($name), "\") opcode.")]
            pub const $name: u8 = $val;
        )*
        impl OpCode {$(
            #[doc = concat!("The `", stringify!($val), "` (\"", stringify!($name), "\") opcode.")]
            pub const $name: Self = Self($val);
        )*}

        /// Static info for every defined opcode, indexed by byte.
        pub const OPCODE_INFO: [Option<OpInfo>; 256] = {
            let mut map = [None; 256];
            let mut prev: u8 = 0;
            $(
                let val: u8 = $val;
                assert!(val == 0 || val > prev, "opcodes must be sorted in ascending order");
                prev = val;
                let info = OpInfo::new(stringify!($name));
                $(let info = $modifier$(::<$($num),*>)?(info);)*
                map[$val] = Some(info);
            )*
            let _ = prev;
            map
        };
    };
}

opcodes! {
    0x00 => STOP => gas<0>, stack_io<0, 0>, terminating;

    0x01 => ADD        => gas<3>,  stack_io<2, 1>;
    0x02 => MUL        => gas<5>,  stack_io<2, 1>;
    0x03 => SUB        => gas<3>,  stack_io<2, 1>;
    0x04 => DIV        => gas<5>,  stack_io<2, 1>;
    0x05 => SDIV       => gas<5>,  stack_io<2, 1>;
    0x06 => MOD        => gas<5>,  stack_io<2, 1>;
    0x07 => SMOD       => gas<5>,  stack_io<2, 1>;
    0x08 => ADDMOD     => gas<8>,  stack_io<3, 1>;
    0x09 => MULMOD     => gas<8>,  stack_io<3, 1>;
    0x0A => EXP        => gas<10>, stack_io<2, 1>;
    0x0B => SIGNEXTEND => gas<5>,  stack_io<2, 1>;

    0x10 => LT     => gas<3>, stack_io<2, 1>;
    0x11 => GT     => gas<3>, stack_io<2, 1>;
    0x12 => SLT    => gas<3>, stack_io<2, 1>;
    0x13 => SGT    => gas<3>, stack_io<2, 1>;
    0x14 => EQ     => gas<3>, stack_io<2, 1>;
    0x15 => ISZERO => gas<3>, stack_io<1, 1>;
    0x16 => AND    => gas<3>, stack_io<2, 1>;
    0x17 => OR     => gas<3>, stack_io<2, 1>;
    0x18 => XOR    => gas<3>, stack_io<2, 1>;
    0x19 => NOT    => gas<3>, stack_io<1, 1>;
    0x1A => BYTE   => gas<3>, stack_io<2, 1>;
    0x1B => SHL    => gas<3>, stack_io<2, 1>;
    0x1C => SHR    => gas<3>, stack_io<2, 1>;
    0x1D => SAR    => gas<3>, stack_io<2, 1>;

    0x20 => KECCAK256 => gas<30>, stack_io<2, 1>;

    0x30 => ADDRESS        => gas<2>,   stack_io<0, 1>;
    0x31 => BALANCE        => gas<100>, stack_io<1, 1>;
    0x32 => ORIGIN         => gas<2>,   stack_io<0, 1>;
    0x33 => CALLER         => gas<2>,   stack_io<0, 1>;
    0x34 => CALLVALUE      => gas<2>,   stack_io<0, 1>;
    0x35 => CALLDATALOAD   => gas<3>,   stack_io<1, 1>;
    0x36 => CALLDATASIZE   => gas<2>,   stack_io<0, 1>;
    0x37 => CALLDATACOPY   => gas<3>,   stack_io<3, 0>;
    0x38 => CODESIZE       => gas<2>,   stack_io<0, 1>;
    0x39 => CODECOPY       => gas<3>,   stack_io<3, 0>;
    0x3A => GASPRICE       => gas<2>,   stack_io<0, 1>;
    0x3B => EXTCODESIZE    => gas<100>, stack_io<1, 1>;
    0x3C => EXTCODECOPY    => gas<100>, stack_io<4, 0>;
    0x3D => RETURNDATASIZE => gas<2>,   stack_io<0, 1>;
    0x3E => RETURNDATACOPY => gas<3>,   stack_io<3, 0>;
    0x3F => EXTCODEHASH    => gas<100>, stack_io<1, 1>;
    0x40 => BLOCKHASH      => gas<20>,  stack_io<1, 1>;
    0x41 => COINBASE       => gas<2>,   stack_io<0, 1>;
    0x42 => TIMESTAMP      => gas<2>,   stack_io<0, 1>;
    0x43 => NUMBER         => gas<2>,   stack_io<0, 1>;
    0x44 => PREVRANDAO     => gas<2>,   stack_io<0, 1>;
    0x45 => GASLIMIT       => gas<2>,   stack_io<0, 1>;
    0x46 => CHAINID        => gas<2>,   stack_io<0, 1>;
    0x47 => SELFBALANCE    => gas<5>,   stack_io<0, 1>;
    0x48 => BASEFEE        => gas<2>,   stack_io<0, 1>;
    0x49 => BLOBHASH       => gas<3>,   stack_io<1, 1>;
    0x4A => BLOBBASEFEE    => gas<2>,   stack_io<0, 1>;

    0x50 => POP      => gas<2>,   stack_io<1, 0>;
    0x51 => MLOAD    => gas<3>,   stack_io<1, 1>;
    0x52 => MSTORE   => gas<3>,   stack_io<2, 0>;
    0x53 => MSTORE8  => gas<3>,   stack_io<2, 0>;
    0x54 => SLOAD    => gas<100>, stack_io<1, 1>;
    0x55 => SSTORE   => gas<100>, stack_io<2, 0>;
    0x56 => JUMP     => gas<8>,   stack_io<1, 0>;
    0x57 => JUMPI    => gas<10>,  stack_io<2, 0>;
    0x58 => PC       => gas<2>,   stack_io<0, 1>;
    0x59 => MSIZE    => gas<2>,   stack_io<0, 1>;
    0x5A => GAS      => gas<2>,   stack_io<0, 1>;
    0x5B => JUMPDEST => gas<1>,   stack_io<0, 0>;
    0x5C => TLOAD    => gas<100>, stack_io<1, 1>;
    0x5D => TSTORE   => gas<100>, stack_io<2, 0>;
    0x5E => MCOPY    => gas<3>,   stack_io<3, 0>;

    0x5F => PUSH0  => gas<2>, stack_io<0, 1>;
    0x60 => PUSH1  => gas<3>, stack_io<0, 1>, imm<1>;
    0x61 => PUSH2  => gas<3>, stack_io<0, 1>, imm<2>;
    0x62 => PUSH3  => gas<3>, stack_io<0, 1>, imm<3>;
    0x63 => PUSH4  => gas<3>, stack_io<0, 1>, imm<4>;
    0x64 => PUSH5  => gas<3>, stack_io<0, 1>, imm<5>;
    0x65 => PUSH6  => gas<3>, stack_io<0, 1>, imm<6>;
    0x66 => PUSH7  => gas<3>, stack_io<0, 1>, imm<7>;
    0x67 => PUSH8  => gas<3>, stack_io<0, 1>, imm<8>;
    0x68 => PUSH9  => gas<3>, stack_io<0, 1>, imm<9>;
    0x69 => PUSH10 => gas<3>, stack_io<0, 1>, imm<10>;
    0x6A => PUSH11 => gas<3>, stack_io<0, 1>, imm<11>;
    0x6B => PUSH12 => gas<3>, stack_io<0, 1>, imm<12>;
    0x6C => PUSH13 => gas<3>, stack_io<0, 1>, imm<13>;
    0x6D => PUSH14 => gas<3>, stack_io<0, 1>, imm<14>;
    0x6E => PUSH15 => gas<3>, stack_io<0, 1>, imm<15>;
    0x6F => PUSH16 => gas<3>, stack_io<0, 1>, imm<16>;
    0x70 => PUSH17 => gas<3>, stack_io<0, 1>, imm<17>;
    0x71 => PUSH18 => gas<3>, stack_io<0, 1>, imm<18>;
    0x72 => PUSH19 => gas<3>, stack_io<0, 1>, imm<19>;
    0x73 => PUSH20 => gas<3>, stack_io<0, 1>, imm<20>;
    0x74 => PUSH21 => gas<3>, stack_io<0, 1>, imm<21>;
    0x75 => PUSH22 => gas<3>, stack_io<0, 1>, imm<22>;
    0x76 => PUSH23 => gas<3>, stack_io<0, 1>, imm<23>;
    0x77 => PUSH24 => gas<3>, stack_io<0, 1>, imm<24>;
    0x78 => PUSH25 => gas<3>, stack_io<0, 1>, imm<25>;
    0x79 => PUSH26 => gas<3>, stack_io<0, 1>, imm<26>;
    0x7A => PUSH27 => gas<3>, stack_io<0, 1>, imm<27>;
    0x7B => PUSH28 => gas<3>, stack_io<0, 1>, imm<28>;
    0x7C => PUSH29 => gas<3>, stack_io<0, 1>, imm<29>;
    0x7D => PUSH30 => gas<3>, stack_io<0, 1>, imm<30>;
    0x7E => PUSH31 => gas<3>, stack_io<0, 1>, imm<31>;
    0x7F => PUSH32 => gas<3>, stack_io<0, 1>, imm<32>;

    0x80 => DUP1  => gas<3>, stack_io<1, 2>;
    0x81 => DUP2  => gas<3>, stack_io<2, 3>;
    0x82 => DUP3  => gas<3>, stack_io<3, 4>;
    0x83 => DUP4  => gas<3>, stack_io<4, 5>;
    0x84 => DUP5  => gas<3>, stack_io<5, 6>;
    0x85 => DUP6  => gas<3>, stack_io<6, 7>;
    0x86 => DUP7  => gas<3>, stack_io<7, 8>;
    0x87 => DUP8  => gas<3>, stack_io<8, 9>;
    0x88 => DUP9  => gas<3>, stack_io<9, 10>;
    0x89 => DUP10 => gas<3>, stack_io<10, 11>;
    0x8A => DUP11 => gas<3>, stack_io<11, 12>;
    0x8B => DUP12 => gas<3>, stack_io<12, 13>;
    0x8C => DUP13 => gas<3>, stack_io<13, 14>;
    0x8D => DUP14 => gas<3>, stack_io<14, 15>;
    0x8E => DUP15 => gas<3>, stack_io<15, 16>;
    0x8F => DUP16 => gas<3>, stack_io<16, 17>;

    0x90 => SWAP1  => gas<3>, stack_io<2, 2>;
    0x91 => SWAP2  => gas<3>, stack_io<3, 3>;
    0x92 => SWAP3  => gas<3>, stack_io<4, 4>;
    0x93 => SWAP4  => gas<3>, stack_io<5, 5>;
    0x94 => SWAP5  => gas<3>, stack_io<6, 6>;
    0x95 => SWAP6  => gas<3>, stack_io<7, 7>;
    0x96 => SWAP7  => gas<3>, stack_io<8, 8>;
    0x97 => SWAP8  => gas<3>, stack_io<9, 9>;
    0x98 => SWAP9  => gas<3>, stack_io<10, 10>;
    0x99 => SWAP10 => gas<3>, stack_io<11, 11>;
    0x9A => SWAP11 => gas<3>, stack_io<12, 12>;
    0x9B => SWAP12 => gas<3>, stack_io<13, 13>;
    0x9C => SWAP13 => gas<3>, stack_io<14, 14>;
    0x9D => SWAP14 => gas<3>, stack_io<15, 15>;
    0x9E => SWAP15 => gas<3>, stack_io<16, 16>;
    0x9F => SWAP16 => gas<3>, stack_io<17, 17>;

    0xA0 => LOG0 => gas<375>,  stack_io<2, 0>;
    0xA1 => LOG1 => gas<750>,  stack_io<3, 0>;
    0xA2 => LOG2 => gas<1125>, stack_io<4, 0>;
    0xA3 => LOG3 => gas<1500>, stack_io<5, 0>;
    0xA4 => LOG4 => gas<1875>, stack_io<6, 0>;

    0xF0 => CREATE       => gas<32000>, stack_io<3, 1>;
    0xF1 => CALL         => gas<100>,   stack_io<7, 1>;
    0xF2 => CALLCODE     => gas<100>,   stack_io<7, 1>;
    0xF3 => RETURN       => gas<0>,     stack_io<2, 0>, terminating;
    0xF4 => DELEGATECALL => gas<100>,   stack_io<6, 1>;
    0xF5 => CREATE2      => gas<32000>, stack_io<4, 1>;
    0xFA => STATICCALL   => gas<100>,   stack_io<6, 1>;
    0xFD => REVERT       => gas<0>,     stack_io<2, 0>, terminating;
    0xFE => INVALID      => gas<0>,     stack_io<0, 0>, terminating;
    0xFF => SELFDESTRUCT => gas<5000>,  stack_io<1, 0>, terminating;
}

#[allow(clippy::as_conversions, clippy::indexing_slicing)]
const fn opcode_info_raw(byte: u8) -> Option<OpInfo> {
    // A u8 index cannot leave the 256-entry table.
    OPCODE_INFO[byte as usize]
}

/// Info for a raw byte, falling back to [`UNKNOWN_OPCODE_INFO`].
#[inline]
pub fn opcode_info(byte: u8) -> OpInfo {
    opcode_info_raw(byte).unwrap_or(UNKNOWN_OPCODE_INFO)
}

/// Display name for a raw byte.
#[inline]
pub fn opcode_name(byte: u8) -> &'static str {
    opcode_info(byte).name
}

/// Immediate bytes following a PUSH opcode; zero for everything else
/// including PUSH0.
#[inline]
#[allow(clippy::as_conversions, clippy::arithmetic_side_effects)]
pub const fn push_immediate_size(byte: u8) -> usize {
    if byte > PUSH0 && byte <= PUSH32 {
        // PUSH1 = 0x60 pushes 1 byte, PUSH32 = 0x7f pushes 32 bytes.
        (byte - PUSH0) as usize
    } else {
        0
    }
}

/// Whether a byte ends a basic block: an unconditional control transfer,
/// a halt, or a fault.
#[inline]
pub const fn is_block_terminator(byte: u8) -> bool {
    matches!(
        byte,
        STOP | JUMP | JUMPI | RETURN | REVERT | INVALID | SELFDESTRUCT
    )
}
