//! SPIR-V module parsing and shader reflection.
//!
//! This crate is the reflection oracle of the backend: it decodes a SPIR-V
//! word stream once, keeps enough bookkeeping to answer questions about entry
//! points, descriptor resources and specialization constants, and supports
//! renaming entry points in place (needed to disambiguate modules that all
//! export the canonical `main`).
#[macro_use]
extern crate log;

mod decode;
mod inst;
pub mod reflect;

use std::fmt;

pub use self::decode::{DecodedInstruction, RawInstruction};
pub use self::inst::*;
pub use self::reflect::{
    AccessQualifier, EntryPoint, Reflection, ResourceBinding, ShaderResource, ShaderResourceType,
    SpecializationConstant, PUSH_CONSTANT_SET,
};

/// Error that can happen when parsing.
#[derive(Debug, Clone)]
pub enum ParseError {
    MissingHeader,
    WrongHeader,
    IncompleteInstruction,
    UnknownConstant(&'static str, u32),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::MissingHeader => write!(f, "missing SPIR-V header"),
            ParseError::WrongHeader => write!(f, "wrong SPIR-V magic number"),
            ParseError::IncompleteInstruction => write!(f, "truncated SPIR-V instruction"),
            ParseError::UnknownConstant(kind, v) => {
                write!(f, "unknown SPIR-V constant ({}): {}", kind, v)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// A SPIR-V module held as a vector of 32-bit words.
#[derive(Debug, Clone)]
pub struct Module {
    pub data: Vec<u32>,
    pub version: (u8, u8),
    pub bound: u32,
}

/// Offset in words of the first instruction after the header.
pub const HEADER_WORDS: usize = 5;

const MAGIC: u32 = 0x0723_0203;

impl Module {
    /// Parses a module from raw bytes, handling both endiannesses.
    pub fn from_bytes(data: &[u8]) -> Result<Module, ParseError> {
        if data.len() < 20 {
            return Err(ParseError::MissingHeader);
        }

        // the magic number tells us whether the words need swapping
        let words = if data[0] == 0x07 && data[1] == 0x23 && data[2] == 0x02 && data[3] == 0x03 {
            // big endian
            data.chunks(4)
                .map(|c| {
                    ((c[0] as u32) << 24)
                        | ((c[1] as u32) << 16)
                        | ((c[2] as u32) << 8)
                        | c[3] as u32
                })
                .collect::<Vec<_>>()
        } else if data[3] == 0x07 && data[2] == 0x23 && data[1] == 0x02 && data[0] == 0x03 {
            // little endian
            data.chunks(4)
                .map(|c| {
                    ((c[3] as u32) << 24)
                        | ((c[2] as u32) << 16)
                        | ((c[1] as u32) << 8)
                        | c[0] as u32
                })
                .collect::<Vec<_>>()
        } else {
            return Err(ParseError::MissingHeader);
        };

        Self::from_words(&words)
    }

    /// Parses a module from words whose endianness has already been handled.
    pub fn from_words(i: &[u32]) -> Result<Module, ParseError> {
        if i.len() < HEADER_WORDS {
            return Err(ParseError::MissingHeader);
        }
        if i[0] != MAGIC {
            return Err(ParseError::WrongHeader);
        }

        let version = (
            ((i[1] & 0x00ff_0000) >> 16) as u8,
            ((i[1] & 0x0000_ff00) >> 8) as u8,
        );

        Ok(Module {
            version,
            bound: i[3],
            data: i.to_vec(),
        })
    }

    /// Iterates over the raw instructions of the module.
    pub fn raw_instructions(&self) -> RawInstructions {
        RawInstructions {
            i: &self.data[HEADER_WORDS..],
            offset: HEADER_WORDS,
        }
    }

    /// Iterates over all instructions with the opcode of `T`, decoded.
    pub fn filter_opcodes<'m, T: DecodedInstruction<'m>>(&'m self) -> impl Iterator<Item = T> + 'm {
        self.raw_instructions().filter_map(|inst| {
            if inst.opcode == T::OPCODE as u16 {
                T::decode(inst.operands).ok()
            } else {
                None
            }
        })
    }

    /// Replaces the instruction starting at word offset `at` with `words`.
    ///
    /// `at` must point at an instruction boundary, as returned by
    /// `RawInstruction::offset`.
    pub(crate) fn splice_instruction(&mut self, at: usize, words: Vec<u32>) {
        let word_count = (self.data[at] >> 16) as usize;
        debug!(
            "splicing instruction at word {} ({} -> {} words)",
            at,
            word_count,
            words.len()
        );
        self.data.splice(at..at + word_count, words);
    }
}

/// Iterator over the raw instructions of a module.
pub struct RawInstructions<'m> {
    i: &'m [u32],
    offset: usize,
}

impl<'m> Iterator for RawInstructions<'m> {
    type Item = RawInstruction<'m>;

    fn next(&mut self) -> Option<RawInstruction<'m>> {
        if self.i.is_empty() {
            return None;
        }
        match decode::decode_raw_instruction(self.i, self.offset) {
            Ok((inst, rest)) => {
                self.offset += inst.word_count as usize;
                self.i = rest;
                Some(inst)
            }
            Err(_) => {
                // a truncated trailing instruction ends the iteration;
                // the reflection pass reports the error separately
                self.i = &[];
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_garbage() {
        assert!(Module::from_words(&[0xdead_beef, 0, 0, 0, 0]).is_err());
        assert!(Module::from_words(&[MAGIC]).is_err());
        assert!(Module::from_bytes(&[1, 2, 3]).is_err());
    }

    #[test]
    fn header_version() {
        let m = Module::from_words(&[MAGIC, 0x0001_0300, 0, 42, 0]).unwrap();
        assert_eq!(m.version, (1, 3));
        assert_eq!(m.bound, 42);
        assert_eq!(m.raw_instructions().count(), 0);
    }

    #[test]
    fn endian_swap() {
        let words = [MAGIC, 0x0001_0000, 0, 8, 0];
        let mut be = Vec::new();
        for w in &words {
            be.extend_from_slice(&w.to_be_bytes());
        }
        let m = Module::from_bytes(&be).unwrap();
        assert_eq!(m.data, &words[..]);
    }
}
