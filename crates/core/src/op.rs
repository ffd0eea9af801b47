//! Opcode and platform-call byte values.
//!
//! An instruction is one opcode byte followed by zero or more little-endian
//! immediates with fixed widths (u8, u16, i32, u32, i64 or f32). Opcodes are
//! grouped in category blocks; gaps are reserved for future instructions.

use std::fmt;

/// Instruction opcodes understood by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Literal loads.
    LoadLitInt = 0x10,      // i32 immediate
    LoadLitIntSmall = 0x11, // u8 immediate
    LoadLitInt0 = 0x12,
    LoadLitInt1 = 0x13,
    LoadLitLong = 0x14,   // i64 immediate
    LoadLitFloat = 0x15,  // f32 immediate
    LoadLitString = 0x16, // u32 literal index
    LoadLitIp = 0x17,     // u32 instruction offset

    // Stack frame.
    StackAlloc = 0x20,      // u16 slot count
    StackAllocSmall = 0x21, // u8 slot count
    StackStore = 0x22,      // u16 slot
    StackStoreSmall = 0x23, // u8 slot
    StackLoad = 0x24,       // u16 slot
    StackLoadSmall = 0x25,  // u8 slot
    Dup = 0x26,
    Pop = 0x27,
    Swap = 0x28,

    // Int32 arithmetic and logic.
    AddInt = 0x30,
    SubInt = 0x31,
    MulInt = 0x32,
    DivInt = 0x33,
    RemInt = 0x34,
    NegInt = 0x35,
    ShiftLeftInt = 0x36,
    ShiftRightInt = 0x37,
    AndInt = 0x38,
    OrInt = 0x39,
    XorInt = 0x3A,
    InvInt = 0x3B,
    LogicInvInt = 0x3C,

    // Int64 arithmetic and logic.
    AddLong = 0x40,
    SubLong = 0x41,
    MulLong = 0x42,
    DivLong = 0x43,
    RemLong = 0x44,
    NegLong = 0x45,
    ShiftLeftLong = 0x46,
    ShiftRightLong = 0x47,
    AndLong = 0x48,
    OrLong = 0x49,
    XorLong = 0x4A,
    InvLong = 0x4B,

    // Float32 arithmetic.
    AddFloat = 0x50,
    SubFloat = 0x51,
    MulFloat = 0x52,
    DivFloat = 0x53,
    ModFloat = 0x54,
    PowFloat = 0x55,
    SqrtFloat = 0x56,
    SinFloat = 0x57,
    CosFloat = 0x58,
    TanFloat = 0x59,
    ASinFloat = 0x5A,
    ACosFloat = 0x5B,
    ATanFloat = 0x5C,
    ATan2Float = 0x5D,
    NegFloat = 0x5E,

    // String operations.
    AddString = 0x60,
    CombineChar = 0x61,
    AppendChar = 0x62,
    LengthString = 0x63,
    IndexString = 0x64,
    SliceString = 0x65,

    // Comparisons, all produce 0 / 1 as int.
    CheckEqInt = 0x70,
    CheckEqLong = 0x71,
    CheckEqFloat = 0x72,
    CheckEqString = 0x73,
    CheckEqIp = 0x74,
    CheckEqCallDynTgt = 0x75,
    CheckGtInt = 0x76,
    CheckGtLong = 0x77,
    CheckGtFloat = 0x78,
    CheckLeInt = 0x79,
    CheckLeLong = 0x7A,
    CheckLeFloat = 0x7B,
    CheckStructNull = 0x7C,

    // Conversions.
    ConvIntLong = 0x80,
    ConvIntFloat = 0x81,
    ConvLongInt = 0x82,
    ConvLongFloat = 0x83,
    ConvFloatInt = 0x84,
    ConvIntString = 0x85,
    ConvLongString = 0x86,
    ConvFloatString = 0x87,
    ConvCharString = 0x88,
    ConvIntChar = 0x89,
    ConvLongChar = 0x8A,
    ConvFloatChar = 0x8B,
    ConvFloatLong = 0x8C,

    // Structs.
    MakeStruct = 0x90, // u8 field count
    MakeNullStruct = 0x91,
    StructLoadField = 0x92,  // u8 field index
    StructStoreField = 0x93, // u8 field index

    // Atomics.
    MakeAtomic = 0xA0,        // i32 initial value
    AtomicLoad = 0xA1,
    AtomicCompareSwap = 0xA2, // i32 expected, i32 desired
    AtomicBlock = 0xA3,       // i32 expected

    // Control flow.
    Jump = 0xB0,   // u32 target
    JumpIf = 0xB1, // u32 target
    Call = 0xB2,   // u8 arg count, u32 target
    CallTail = 0xB3,
    CallForked = 0xB4,
    CallDyn = 0xB5, // u8 arg count, target popped from stack
    CallDynTail = 0xB6,
    CallDynForked = 0xB7,
    Ret = 0xB8,

    // Futures.
    FutureWaitNano = 0xC0,
    FutureBlock = 0xC1,

    // Platform calls.
    PCall = 0xD0, // u8 pcall code

    Fail = 0xFF,
}

impl OpCode {
    /// Decode an opcode byte, `None` for bytes outside the instruction set.
    pub fn from_byte(byte: u8) -> Option<OpCode> {
        use OpCode::*;
        Some(match byte {
            0x10 => LoadLitInt,
            0x11 => LoadLitIntSmall,
            0x12 => LoadLitInt0,
            0x13 => LoadLitInt1,
            0x14 => LoadLitLong,
            0x15 => LoadLitFloat,
            0x16 => LoadLitString,
            0x17 => LoadLitIp,
            0x20 => StackAlloc,
            0x21 => StackAllocSmall,
            0x22 => StackStore,
            0x23 => StackStoreSmall,
            0x24 => StackLoad,
            0x25 => StackLoadSmall,
            0x26 => Dup,
            0x27 => Pop,
            0x28 => Swap,
            0x30 => AddInt,
            0x31 => SubInt,
            0x32 => MulInt,
            0x33 => DivInt,
            0x34 => RemInt,
            0x35 => NegInt,
            0x36 => ShiftLeftInt,
            0x37 => ShiftRightInt,
            0x38 => AndInt,
            0x39 => OrInt,
            0x3A => XorInt,
            0x3B => InvInt,
            0x3C => LogicInvInt,
            0x40 => AddLong,
            0x41 => SubLong,
            0x42 => MulLong,
            0x43 => DivLong,
            0x44 => RemLong,
            0x45 => NegLong,
            0x46 => ShiftLeftLong,
            0x47 => ShiftRightLong,
            0x48 => AndLong,
            0x49 => OrLong,
            0x4A => XorLong,
            0x4B => InvLong,
            0x50 => AddFloat,
            0x51 => SubFloat,
            0x52 => MulFloat,
            0x53 => DivFloat,
            0x54 => ModFloat,
            0x55 => PowFloat,
            0x56 => SqrtFloat,
            0x57 => SinFloat,
            0x58 => CosFloat,
            0x59 => TanFloat,
            0x5A => ASinFloat,
            0x5B => ACosFloat,
            0x5C => ATanFloat,
            0x5D => ATan2Float,
            0x5E => NegFloat,
            0x60 => AddString,
            0x61 => CombineChar,
            0x62 => AppendChar,
            0x63 => LengthString,
            0x64 => IndexString,
            0x65 => SliceString,
            0x70 => CheckEqInt,
            0x71 => CheckEqLong,
            0x72 => CheckEqFloat,
            0x73 => CheckEqString,
            0x74 => CheckEqIp,
            0x75 => CheckEqCallDynTgt,
            0x76 => CheckGtInt,
            0x77 => CheckGtLong,
            0x78 => CheckGtFloat,
            0x79 => CheckLeInt,
            0x7A => CheckLeLong,
            0x7B => CheckLeFloat,
            0x7C => CheckStructNull,
            0x80 => ConvIntLong,
            0x81 => ConvIntFloat,
            0x82 => ConvLongInt,
            0x83 => ConvLongFloat,
            0x84 => ConvFloatInt,
            0x85 => ConvIntString,
            0x86 => ConvLongString,
            0x87 => ConvFloatString,
            0x88 => ConvCharString,
            0x89 => ConvIntChar,
            0x8A => ConvLongChar,
            0x8B => ConvFloatChar,
            0x8C => ConvFloatLong,
            0x90 => MakeStruct,
            0x91 => MakeNullStruct,
            0x92 => StructLoadField,
            0x93 => StructStoreField,
            0xA0 => MakeAtomic,
            0xA1 => AtomicLoad,
            0xA2 => AtomicCompareSwap,
            0xA3 => AtomicBlock,
            0xB0 => Jump,
            0xB1 => JumpIf,
            0xB2 => Call,
            0xB3 => CallTail,
            0xB4 => CallForked,
            0xB5 => CallDyn,
            0xB6 => CallDynTail,
            0xB7 => CallDynForked,
            0xB8 => Ret,
            0xC0 => FutureWaitNano,
            0xC1 => FutureBlock,
            0xD0 => PCall,
            0xFF => Fail,
            _ => return None,
        })
    }
}

/// Platform-call codes, dispatched by the `PCall` opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PCallCode {
    // Stream lifecycle.
    StreamOpenFile = 0x10,
    StreamOpenConsole = 0x11,
    StreamCheckValid = 0x12,
    StreamReadString = 0x13,
    StreamReadChar = 0x14,
    StreamWriteString = 0x15,
    StreamWriteChar = 0x16,
    StreamFlush = 0x17,
    StreamSetOptions = 0x18,
    StreamUnsetOptions = 0x19,

    // File management.
    FileRemove = 0x20,

    // Terminal.
    TermSetOptions = 0x30,
    TermUnsetOptions = 0x31,

    // Environment.
    GetEnvArg = 0x40,
    GetEnvArgCount = 0x41,
    GetEnvVar = 0x42,

    // Time.
    ClockMicroSinceEpoch = 0x50,
    ClockNanoSteady = 0x51,

    // Scheduling.
    SleepNano = 0x60,

    // Integrity.
    Assert = 0x61,

    // TCP sockets.
    TcpOpenCon = 0x70,
    TcpStartServer = 0x71,
    TcpAcceptCon = 0x72,
    IpLookupAddress = 0x73,

    // Child processes.
    ProcessStart = 0x80,
    ProcessBlock = 0x81,
    ProcessOpenStream = 0x82,

    // Version reporting.
    VersionRt = 0x90,
}

impl PCallCode {
    pub fn from_byte(byte: u8) -> Option<PCallCode> {
        use PCallCode::*;
        Some(match byte {
            0x10 => StreamOpenFile,
            0x11 => StreamOpenConsole,
            0x12 => StreamCheckValid,
            0x13 => StreamReadString,
            0x14 => StreamReadChar,
            0x15 => StreamWriteString,
            0x16 => StreamWriteChar,
            0x17 => StreamFlush,
            0x18 => StreamSetOptions,
            0x19 => StreamUnsetOptions,
            0x20 => FileRemove,
            0x30 => TermSetOptions,
            0x31 => TermUnsetOptions,
            0x40 => GetEnvArg,
            0x41 => GetEnvArgCount,
            0x42 => GetEnvVar,
            0x50 => ClockMicroSinceEpoch,
            0x51 => ClockNanoSteady,
            0x60 => SleepNano,
            0x61 => Assert,
            0x70 => TcpOpenCon,
            0x71 => TcpStartServer,
            0x72 => TcpAcceptCon,
            0x73 => IpLookupAddress,
            0x80 => ProcessStart,
            0x81 => ProcessBlock,
            0x82 => ProcessOpenStream,
            0x90 => VersionRt,
            _ => return None,
        })
    }
}

impl fmt::Display for PCallCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PCallCode::StreamOpenFile => "stream-open-file",
            PCallCode::StreamOpenConsole => "stream-open-console",
            PCallCode::StreamCheckValid => "stream-check-valid",
            PCallCode::StreamReadString => "stream-read-string",
            PCallCode::StreamReadChar => "stream-read-char",
            PCallCode::StreamWriteString => "stream-write-string",
            PCallCode::StreamWriteChar => "stream-write-char",
            PCallCode::StreamFlush => "stream-flush",
            PCallCode::StreamSetOptions => "stream-set-options",
            PCallCode::StreamUnsetOptions => "stream-unset-options",
            PCallCode::FileRemove => "file-remove",
            PCallCode::TermSetOptions => "term-set-options",
            PCallCode::TermUnsetOptions => "term-unset-options",
            PCallCode::GetEnvArg => "get-env-arg",
            PCallCode::GetEnvArgCount => "get-env-arg-count",
            PCallCode::GetEnvVar => "get-env-var",
            PCallCode::ClockMicroSinceEpoch => "clock-micro-since-epoch",
            PCallCode::ClockNanoSteady => "clock-nano-steady",
            PCallCode::SleepNano => "sleep-nano",
            PCallCode::Assert => "assert",
            PCallCode::TcpOpenCon => "tcp-open-con",
            PCallCode::TcpStartServer => "tcp-start-server",
            PCallCode::TcpAcceptCon => "tcp-accept-con",
            PCallCode::IpLookupAddress => "ip-lookup-address",
            PCallCode::ProcessStart => "process-start",
            PCallCode::ProcessBlock => "process-block",
            PCallCode::ProcessOpenStream => "process-open-stream",
            PCallCode::VersionRt => "version-rt",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = OpCode::from_byte(byte) {
                assert_eq!(op as u8, byte);
            }
        }
        assert_eq!(OpCode::from_byte(OpCode::Ret as u8), Some(OpCode::Ret));
        assert_eq!(OpCode::from_byte(0x00), None);
    }

    #[test]
    fn pcall_bytes_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(code) = PCallCode::from_byte(byte) {
                assert_eq!(code as u8, byte);
            }
        }
        assert_eq!(PCallCode::from_byte(0xEE), None);
    }
}
