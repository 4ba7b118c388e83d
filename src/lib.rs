//! TinyVM: a small register machine for a toy, script-driven shell
//!
//! TinyScript source is assembled into flat bytecode ([`assembler`]), which
//! the [`vm`] runs until it halts or asks for the next program. Everything a
//! program can do to the host goes through the capability adapters in
//! [`disk`] and [`net`], with file names checked by the [`sandbox`] first.
//! The [`host`] module ties it together into the boot-and-exec loop.

pub mod assembler;
pub mod config;
pub mod console;
pub mod disk;
pub mod host;
pub mod net;
pub mod opcode;
pub mod region;
pub mod sandbox;
pub mod vm;

#[cfg(test)]
mod test_utils;
