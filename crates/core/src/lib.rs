//! Novus assembly foundation.
//!
//! Everything the rest of the toolchain agrees on lives here: the opcode
//! and platform-call byte values, the byte-level [`Assembler`] that turns
//! label-based programs into flat instruction buffers, and the
//! [`Executable`] image with its on-disk container format.
//!
//! The compiler emits through [`Assembler`]; the runtime consumes
//! [`Executable`]. Neither depends on the other.

pub mod assembler;
pub mod executable;
pub mod op;

pub use assembler::{AsmError, Assembler, CallMode};
pub use executable::{DecodeError, Executable, deserialize, serialize};
pub use op::{OpCode, PCallCode};
