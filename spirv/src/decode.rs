//! Raw instruction decoding.
use crate::ParseError;
use num_traits::FromPrimitive;
use spirv_headers::Op;

/// An undecoded instruction: opcode plus operand words.
pub struct RawInstruction<'m> {
    pub opcode: u16,
    pub word_count: u16,
    /// Word offset of the instruction from the start of the module.
    pub offset: usize,
    pub operands: &'m [u32],
}

pub(crate) fn decode_raw_instruction(
    i: &[u32],
    offset: usize,
) -> Result<(RawInstruction, &[u32]), ParseError> {
    assert!(!i.is_empty());

    let word_count = (i[0] >> 16) as usize;
    if word_count < 1 || i.len() < word_count {
        return Err(ParseError::IncompleteInstruction);
    }
    let opcode = (i[0] & 0xffff) as u16;

    let raw_inst = RawInstruction {
        opcode,
        word_count: word_count as u16,
        offset,
        operands: &i[1..word_count],
    };

    Ok((raw_inst, &i[word_count..]))
}

/// A typed view over the operands of one instruction kind.
pub trait DecodedInstruction<'m>: Sized + 'm {
    const OPCODE: Op;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError>;
}

pub(crate) fn operand(operands: &[u32], index: usize) -> Result<u32, ParseError> {
    operands
        .get(index)
        .copied()
        .ok_or(ParseError::IncompleteInstruction)
}

pub(crate) fn constant<T: FromPrimitive>(
    kind: &'static str,
    value: u32,
) -> Result<T, ParseError> {
    T::from_u32(value).ok_or(ParseError::UnknownConstant(kind, value))
}

/// Decodes a nul-terminated UTF-8 string packed in words; returns the string
/// and the words following it.
pub(crate) fn decode_string(data: &[u32]) -> Result<(String, &[u32]), ParseError> {
    let bytes = data
        .iter()
        .flat_map(|&n| {
            [
                (n & 0xff) as u8,
                ((n >> 8) & 0xff) as u8,
                ((n >> 16) & 0xff) as u8,
                ((n >> 24) & 0xff) as u8,
            ]
        })
        .take_while(|&b| b != 0)
        .collect::<Vec<u8>>();

    let consumed = 1 + bytes.len() / 4;
    if consumed > data.len() {
        return Err(ParseError::IncompleteInstruction);
    }
    let s = String::from_utf8(bytes).map_err(|_| ParseError::IncompleteInstruction)?;
    Ok((s, &data[consumed..]))
}

/// Encodes a string in the SPIR-V packed format (nul-terminated, padded).
pub(crate) fn encode_string(s: &str, out: &mut Vec<u32>) {
    let bytes = s.as_bytes();
    let mut word = 0u32;
    let mut shift = 0;
    for &b in bytes {
        word |= (b as u32) << shift;
        shift += 8;
        if shift == 32 {
            out.push(word);
            word = 0;
            shift = 0;
        }
    }
    // the terminating nul is the remainder of the current word,
    // or a full zero word if the string filled it exactly
    out.push(word);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        for s in ["", "a", "main", "mainmain", "entry_point_name"] {
            let mut words = Vec::new();
            encode_string(s, &mut words);
            let (decoded, rest) = decode_string(&words).unwrap();
            assert_eq!(decoded, s);
            assert!(rest.is_empty());
        }
    }

    #[test]
    fn string_keeps_trailing_operands() {
        let mut words = Vec::new();
        encode_string("vs", &mut words);
        words.push(7);
        words.push(8);
        let (s, rest) = decode_string(&words).unwrap();
        assert_eq!(s, "vs");
        assert_eq!(rest, &[7, 8]);
    }
}
