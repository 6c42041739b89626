//! Typed views over the instructions the reflection pass cares about.
use crate::decode::{constant, decode_string, encode_string, operand, DecodedInstruction};
use crate::ParseError;
use spirv_headers::{Decoration, Dim, ExecutionModel, ImageFormat, Op, StorageClass};

#[derive(Debug, Clone)]
pub struct IName {
    pub target_id: u32,
    pub name: String,
}

impl<'m> DecodedInstruction<'m> for IName {
    const OPCODE: Op = Op::Name;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IName {
            target_id: operand(operands, 0)?,
            name: decode_string(&operands[1..])?.0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IMemberName {
    pub target_id: u32,
    pub member: u32,
    pub name: String,
}

impl<'m> DecodedInstruction<'m> for IMemberName {
    const OPCODE: Op = Op::MemberName;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IMemberName {
            target_id: operand(operands, 0)?,
            member: operand(operands, 1)?,
            name: decode_string(&operands[2..])?.0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IEntryPoint<'m> {
    pub execution: ExecutionModel,
    pub id: u32,
    pub name: String,
    pub interface: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for IEntryPoint<'m> {
    const OPCODE: Op = Op::EntryPoint;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        let (name, interface) = decode_string(&operands[2..])?;
        Ok(IEntryPoint {
            execution: constant::<ExecutionModel>("ExecutionModel", operand(operands, 0)?)?,
            id: operand(operands, 1)?,
            name,
            interface,
        })
    }
}

impl<'m> IEntryPoint<'m> {
    /// Re-encodes this entry point as a full instruction (opcode word included)
    /// with a new name.
    pub fn encode_renamed(&self, name: &str) -> Vec<u32> {
        let mut words = vec![0, self.execution as u32, self.id];
        encode_string(name, &mut words);
        words.extend_from_slice(self.interface);
        words[0] = ((words.len() as u32) << 16) | Op::EntryPoint as u32;
        words
    }
}

#[derive(Debug, Clone)]
pub struct IDecorate<'m> {
    pub target_id: u32,
    pub decoration: Decoration,
    pub params: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for IDecorate<'m> {
    const OPCODE: Op = Op::Decorate;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IDecorate {
            target_id: operand(operands, 0)?,
            decoration: constant::<Decoration>("Decoration", operand(operands, 1)?)?,
            params: &operands[2..],
        })
    }
}

#[derive(Debug, Clone)]
pub struct IMemberDecorate<'m> {
    pub target_id: u32,
    pub member: u32,
    pub decoration: Decoration,
    pub params: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for IMemberDecorate<'m> {
    const OPCODE: Op = Op::MemberDecorate;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IMemberDecorate {
            target_id: operand(operands, 0)?,
            member: operand(operands, 1)?,
            decoration: constant::<Decoration>("Decoration", operand(operands, 2)?)?,
            params: &operands[3..],
        })
    }
}

#[derive(Debug, Clone)]
pub struct IVariable {
    pub result_type_id: u32,
    pub result_id: u32,
    pub storage_class: StorageClass,
    pub initializer: Option<u32>,
}

impl<'m> DecodedInstruction<'m> for IVariable {
    const OPCODE: Op = Op::Variable;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IVariable {
            result_type_id: operand(operands, 0)?,
            result_id: operand(operands, 1)?,
            storage_class: constant::<StorageClass>("StorageClass", operand(operands, 2)?)?,
            initializer: operands.get(3).copied(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypePointer {
    pub result_id: u32,
    pub storage_class: StorageClass,
    pub type_id: u32,
}

impl<'m> DecodedInstruction<'m> for ITypePointer {
    const OPCODE: Op = Op::TypePointer;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypePointer {
            result_id: operand(operands, 0)?,
            storage_class: constant::<StorageClass>("StorageClass", operand(operands, 1)?)?,
            type_id: operand(operands, 2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeStruct<'m> {
    pub result_id: u32,
    pub member_types: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for ITypeStruct<'m> {
    const OPCODE: Op = Op::TypeStruct;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeStruct {
            result_id: operand(operands, 0)?,
            member_types: &operands[1..],
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeImage {
    pub result_id: u32,
    pub sampled_type_id: u32,
    pub dim: Dim,
    pub arrayed: bool,
    pub ms: bool,
    /// 1 = used with a sampler, 2 = storage image, 0 = unknown at compile time.
    pub sampled: u32,
    pub format: ImageFormat,
    pub access: Option<spirv_headers::AccessQualifier>,
}

impl<'m> DecodedInstruction<'m> for ITypeImage {
    const OPCODE: Op = Op::TypeImage;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeImage {
            result_id: operand(operands, 0)?,
            sampled_type_id: operand(operands, 1)?,
            dim: constant::<Dim>("Dim", operand(operands, 2)?)?,
            arrayed: operand(operands, 4)? != 0,
            ms: operand(operands, 5)? != 0,
            sampled: operand(operands, 6)?,
            format: constant::<ImageFormat>("ImageFormat", operand(operands, 7)?)?,
            access: match operands.get(8) {
                Some(&v) => Some(constant::<spirv_headers::AccessQualifier>(
                    "AccessQualifier",
                    v,
                )?),
                None => None,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeSampler {
    pub result_id: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeSampler {
    const OPCODE: Op = Op::TypeSampler;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeSampler {
            result_id: operand(operands, 0)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeSampledImage {
    pub result_id: u32,
    pub image_type_id: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeSampledImage {
    const OPCODE: Op = Op::TypeSampledImage;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeSampledImage {
            result_id: operand(operands, 0)?,
            image_type_id: operand(operands, 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeArray {
    pub result_id: u32,
    pub type_id: u32,
    pub length_id: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeArray {
    const OPCODE: Op = Op::TypeArray;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeArray {
            result_id: operand(operands, 0)?,
            type_id: operand(operands, 1)?,
            length_id: operand(operands, 2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeRuntimeArray {
    pub result_id: u32,
    pub type_id: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeRuntimeArray {
    const OPCODE: Op = Op::TypeRuntimeArray;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeRuntimeArray {
            result_id: operand(operands, 0)?,
            type_id: operand(operands, 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeInt {
    pub result_id: u32,
    pub width: u32,
    pub signedness: bool,
}

impl<'m> DecodedInstruction<'m> for ITypeInt {
    const OPCODE: Op = Op::TypeInt;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeInt {
            result_id: operand(operands, 0)?,
            width: operand(operands, 1)?,
            signedness: operand(operands, 2)? != 0,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeFloat {
    pub result_id: u32,
    pub width: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeFloat {
    const OPCODE: Op = Op::TypeFloat;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeFloat {
            result_id: operand(operands, 0)?,
            width: operand(operands, 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeVector {
    pub result_id: u32,
    pub component_id: u32,
    pub count: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeVector {
    const OPCODE: Op = Op::TypeVector;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeVector {
            result_id: operand(operands, 0)?,
            component_id: operand(operands, 1)?,
            count: operand(operands, 2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ITypeMatrix {
    pub result_id: u32,
    pub column_type_id: u32,
    pub column_count: u32,
}

impl<'m> DecodedInstruction<'m> for ITypeMatrix {
    const OPCODE: Op = Op::TypeMatrix;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ITypeMatrix {
            result_id: operand(operands, 0)?,
            column_type_id: operand(operands, 1)?,
            column_count: operand(operands, 2)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IConstant<'m> {
    pub result_type_id: u32,
    pub result_id: u32,
    pub data: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for IConstant<'m> {
    const OPCODE: Op = Op::Constant;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(IConstant {
            result_type_id: operand(operands, 0)?,
            result_id: operand(operands, 1)?,
            data: &operands[2..],
        })
    }
}

#[derive(Debug, Clone)]
pub struct ISpecConstant<'m> {
    pub result_type_id: u32,
    pub result_id: u32,
    pub data: &'m [u32],
}

impl<'m> DecodedInstruction<'m> for ISpecConstant<'m> {
    const OPCODE: Op = Op::SpecConstant;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ISpecConstant {
            result_type_id: operand(operands, 0)?,
            result_id: operand(operands, 1)?,
            data: &operands[2..],
        })
    }
}

#[derive(Debug, Clone)]
pub struct ISpecConstantTrue {
    pub result_type_id: u32,
    pub result_id: u32,
}

impl<'m> DecodedInstruction<'m> for ISpecConstantTrue {
    const OPCODE: Op = Op::SpecConstantTrue;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ISpecConstantTrue {
            result_type_id: operand(operands, 0)?,
            result_id: operand(operands, 1)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ISpecConstantFalse {
    pub result_type_id: u32,
    pub result_id: u32,
}

impl<'m> DecodedInstruction<'m> for ISpecConstantFalse {
    const OPCODE: Op = Op::SpecConstantFalse;
    fn decode(operands: &'m [u32]) -> Result<Self, ParseError> {
        Ok(ISpecConstantFalse {
            result_type_id: operand(operands, 0)?,
            result_id: operand(operands, 1)?,
        })
    }
}
