//! Shader reflection: entry points, descriptor resources, specialization
//! constants.
//!
//! The pass walks the instruction stream once and folds everything it sees
//! into id-keyed tables, then classifies every global variable whose storage
//! class can back a descriptor. No callback plumbing: callers get slices of
//! structured records.
use crate::decode::DecodedInstruction;
use crate::inst::*;
use crate::{Module, ParseError};
use fxhash::FxHashMap;
use spirv_headers::{Decoration, Dim, ExecutionModel, StorageClass};

/// Set index reserved for push constants in binding paths.
pub const PUSH_CONSTANT_SET: u32 = 0xffff;

/// The canonical entry point name emitted by most compilers.
pub const CANONICAL_ENTRY_POINT: &str = "main";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ShaderResourceType {
    UniformBuffer,
    UniformTexelBuffer,
    StorageBuffer,
    StorageTexelBuffer,
    SubpassInput,
    StorageImage,
    SampledImage,
    PushConstantBuffer,
    Sampler,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AccessQualifier {
    None,
    Read,
    ReadWrite,
    Write,
}

/// A (set, binding) pair.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceBinding {
    pub set: u32,
    pub binding: u32,
}

/// One shader interface resource.
#[derive(Clone, Debug)]
pub struct ShaderResource {
    pub ty: ShaderResourceType,
    pub binding: ResourceBinding,
    /// Lowest member offset for buffer-like resources, zero otherwise.
    pub byte_offset: u32,
    /// Span in bytes covering the members, zero for images and samplers.
    pub byte_size: u32,
    pub name: String,
    pub access: AccessQualifier,
    /// Declared array length; 1 for non-arrayed resources, 0 for unsized.
    pub array_length: u32,
}

#[derive(Clone, Debug)]
pub struct SpecializationConstant {
    /// Position in enumeration order.
    pub index: usize,
    pub constant_id: u32,
    pub name: String,
}

#[derive(Clone, Debug)]
pub struct EntryPoint {
    pub name: String,
    pub execution: ExecutionModel,
    pub id: u32,
    /// Word offset of the OpEntryPoint instruction, for in-place renames.
    word_offset: usize,
}

/// Reflection data for one module.
///
/// Resources are enumerated module-wide; the active entry point scopes the
/// execution model reported to pipeline construction (descriptor variables
/// are not listed in OpEntryPoint interfaces before SPIR-V 1.4, so per-entry
/// usage scoping is not available from the words alone).
pub struct Reflection {
    module: Module,
    entry_points: Vec<EntryPoint>,
    active: usize,
    resources: Vec<ShaderResource>,
    spec_constants: Vec<SpecializationConstant>,
}

impl Reflection {
    pub fn new(module: Module) -> Result<Reflection, ParseError> {
        let mut r = Reflection {
            module,
            entry_points: Vec::new(),
            active: 0,
            resources: Vec::new(),
            spec_constants: Vec::new(),
        };
        r.gather()?;
        Ok(r)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Reflection, ParseError> {
        Reflection::new(Module::from_bytes(data)?)
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Entry point names, in module order.
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.entry_points.iter().map(|ep| ep.name.as_str())
    }

    /// Scopes subsequent queries to the named entry point.
    pub fn set_active_entry_point(&mut self, name: &str) -> bool {
        match self.entry_points.iter().position(|ep| ep.name == name) {
            Some(i) => {
                self.active = i;
                true
            }
            None => false,
        }
    }

    pub fn active_entry_point(&self) -> &EntryPoint {
        &self.entry_points[self.active]
    }

    pub fn execution_model(&self) -> ExecutionModel {
        self.entry_points[self.active].execution
    }

    /// Renames an entry point in the underlying words.
    ///
    /// Instruction offsets shift when the new name has a different padded
    /// length, so the bookkeeping is rebuilt afterwards.
    pub fn rename_entry_point(&mut self, from: &str, to: &str) -> Result<(), ParseError> {
        let (offset, words) = {
            let ep = self
                .entry_points
                .iter()
                .find(|ep| ep.name == from)
                .ok_or(ParseError::UnknownConstant("entry point", 0))?;
            let raw = self
                .module
                .raw_instructions()
                .find(|i| i.offset == ep.word_offset)
                .ok_or(ParseError::IncompleteInstruction)?;
            let decoded = IEntryPoint::decode(raw.operands)?;
            (ep.word_offset, decoded.encode_renamed(to))
        };
        let active_name = self.entry_points[self.active].name.clone();
        self.module.splice_instruction(offset, words);
        self.gather()?;
        // keep the same entry point active across the rename
        let active_name = if active_name == from {
            to.to_owned()
        } else {
            active_name
        };
        self.set_active_entry_point(&active_name);
        Ok(())
    }

    /// Renames the canonical `main` entry point.
    pub fn rename_main_to(&mut self, name: &str) -> Result<(), ParseError> {
        self.rename_entry_point(CANONICAL_ENTRY_POINT, name)
    }

    /// All descriptor-backed resources of the module.
    pub fn resources(&self) -> &[ShaderResource] {
        &self.resources
    }

    pub fn specialization_constants(&self) -> &[SpecializationConstant] {
        &self.spec_constants
    }

    //----------------------------------------------------------------------------------------------

    fn gather(&mut self) -> Result<(), ParseError> {
        let tables = Tables::build(&self.module)?;

        self.entry_points = self
            .module
            .raw_instructions()
            .filter(|i| i.opcode == spirv_headers::Op::EntryPoint as u16)
            .map(|i| {
                let ep = IEntryPoint::decode(i.operands)?;
                Ok(EntryPoint {
                    name: ep.name,
                    execution: ep.execution,
                    id: ep.id,
                    word_offset: i.offset,
                })
            })
            .collect::<Result<Vec<_>, ParseError>>()?;
        if self.entry_points.is_empty() {
            warn!("SPIR-V module has no entry points");
        }
        if self.active >= self.entry_points.len() {
            self.active = 0;
        }

        self.resources = tables.classify_variables(&self.module)?;
        // stable order: (set, binding) ascending, push constants last
        self.resources
            .sort_by_key(|r| (r.binding.set, r.binding.binding));

        self.spec_constants = tables.spec_constants(&self.module);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------

#[derive(Clone, Debug)]
enum Ty {
    Int { width: u32 },
    Float { width: u32 },
    Vector { component: u32, count: u32 },
    Matrix { column: u32, count: u32 },
    Struct { members: Vec<u32> },
    Image(ITypeImage),
    Sampler,
    SampledImage { image: u32 },
    Array { element: u32, length_id: u32 },
    RuntimeArray { element: u32 },
    Pointer { storage: StorageClass, pointee: u32 },
    Other,
}

#[derive(Default, Clone)]
struct IdDecorations {
    set: Option<u32>,
    binding: Option<u32>,
    block: bool,
    buffer_block: bool,
    non_writable: bool,
    non_readable: bool,
    spec_id: Option<u32>,
    array_stride: Option<u32>,
}

#[derive(Default, Clone)]
struct MemberDecorations {
    offset: Option<u32>,
    matrix_stride: Option<u32>,
    non_writable: bool,
    non_readable: bool,
}

#[derive(Default)]
struct Tables {
    names: FxHashMap<u32, String>,
    member_names: FxHashMap<(u32, u32), String>,
    decorations: FxHashMap<u32, IdDecorations>,
    member_decorations: FxHashMap<(u32, u32), MemberDecorations>,
    types: FxHashMap<u32, Ty>,
    int_constants: FxHashMap<u32, u32>,
}

impl Tables {
    fn build(module: &Module) -> Result<Tables, ParseError> {
        let mut t = Tables::default();

        for n in module.filter_opcodes::<IName>() {
            t.names.insert(n.target_id, n.name);
        }
        for n in module.filter_opcodes::<IMemberName>() {
            t.member_names.insert((n.target_id, n.member), n.name);
        }
        for d in module.filter_opcodes::<IDecorate>() {
            let e = t.decorations.entry(d.target_id).or_default();
            match d.decoration {
                Decoration::DescriptorSet => e.set = d.params.first().copied(),
                Decoration::Binding => e.binding = d.params.first().copied(),
                Decoration::Block => e.block = true,
                Decoration::BufferBlock => e.buffer_block = true,
                Decoration::NonWritable => e.non_writable = true,
                Decoration::NonReadable => e.non_readable = true,
                Decoration::SpecId => e.spec_id = d.params.first().copied(),
                Decoration::ArrayStride => e.array_stride = d.params.first().copied(),
                _ => {}
            }
        }
        for d in module.filter_opcodes::<IMemberDecorate>() {
            let e = t
                .member_decorations
                .entry((d.target_id, d.member))
                .or_default();
            match d.decoration {
                Decoration::Offset => e.offset = d.params.first().copied(),
                Decoration::MatrixStride => e.matrix_stride = d.params.first().copied(),
                Decoration::NonWritable => e.non_writable = true,
                Decoration::NonReadable => e.non_readable = true,
                _ => {}
            }
        }

        // types can be processed in order: "a parameterizing operand in a
        // type must be defined before being used"
        for i in module.raw_instructions() {
            use spirv_headers::Op;
            let op = i.opcode;
            if op == Op::TypeInt as u16 {
                let d = ITypeInt::decode(i.operands)?;
                t.types.insert(d.result_id, Ty::Int { width: d.width });
            } else if op == Op::TypeFloat as u16 {
                let d = ITypeFloat::decode(i.operands)?;
                t.types.insert(d.result_id, Ty::Float { width: d.width });
            } else if op == Op::TypeVector as u16 {
                let d = ITypeVector::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::Vector {
                        component: d.component_id,
                        count: d.count,
                    },
                );
            } else if op == Op::TypeMatrix as u16 {
                let d = ITypeMatrix::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::Matrix {
                        column: d.column_type_id,
                        count: d.column_count,
                    },
                );
            } else if op == Op::TypeStruct as u16 {
                let d = ITypeStruct::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::Struct {
                        members: d.member_types.to_vec(),
                    },
                );
            } else if op == Op::TypeImage as u16 {
                let d = ITypeImage::decode(i.operands)?;
                t.types.insert(d.result_id, Ty::Image(d));
            } else if op == Op::TypeSampler as u16 {
                let d = ITypeSampler::decode(i.operands)?;
                t.types.insert(d.result_id, Ty::Sampler);
            } else if op == Op::TypeSampledImage as u16 {
                let d = ITypeSampledImage::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::SampledImage {
                        image: d.image_type_id,
                    },
                );
            } else if op == Op::TypeArray as u16 {
                let d = ITypeArray::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::Array {
                        element: d.type_id,
                        length_id: d.length_id,
                    },
                );
            } else if op == Op::TypeRuntimeArray as u16 {
                let d = ITypeRuntimeArray::decode(i.operands)?;
                t.types.insert(d.result_id, Ty::RuntimeArray { element: d.type_id });
            } else if op == Op::TypePointer as u16 {
                let d = ITypePointer::decode(i.operands)?;
                t.types.insert(
                    d.result_id,
                    Ty::Pointer {
                        storage: d.storage_class,
                        pointee: d.type_id,
                    },
                );
            }
        }

        for c in module.filter_opcodes::<IConstant>() {
            if let Some(&v) = c.data.first() {
                t.int_constants.insert(c.result_id, v);
            }
        }

        Ok(t)
    }

    fn spec_constants(&self, module: &Module) -> Vec<SpecializationConstant> {
        let mut out = Vec::new();
        let mut push = |result_id: u32| {
            if let Some(deco) = self.decorations.get(&result_id) {
                if let Some(constant_id) = deco.spec_id {
                    out.push(SpecializationConstant {
                        index: out.len(),
                        constant_id,
                        name: self.names.get(&result_id).cloned().unwrap_or_default(),
                    });
                }
            }
        };
        for i in module.raw_instructions() {
            use spirv_headers::Op;
            if i.opcode == Op::SpecConstant as u16 {
                if let Ok(d) = ISpecConstant::decode(i.operands) {
                    push(d.result_id);
                }
            } else if i.opcode == Op::SpecConstantTrue as u16 {
                if let Ok(d) = ISpecConstantTrue::decode(i.operands) {
                    push(d.result_id);
                }
            } else if i.opcode == Op::SpecConstantFalse as u16 {
                if let Ok(d) = ISpecConstantFalse::decode(i.operands) {
                    push(d.result_id);
                }
            }
        }
        out
    }

    /// Estimated size in bytes of a type, using the explicit layout
    /// decorations where present.
    fn byte_size(&self, type_id: u32) -> u32 {
        match self.types.get(&type_id) {
            Some(Ty::Int { width }) | Some(Ty::Float { width }) => width / 8,
            Some(Ty::Vector { component, count }) => self.byte_size(*component) * count,
            Some(Ty::Matrix { column, count }) => {
                // column stride rounds up to 16 under std140
                let col = self.byte_size(*column);
                let stride = (col + 15) & !15;
                stride * count
            }
            Some(Ty::Array { element, length_id }) => {
                let len = self.int_constants.get(length_id).copied().unwrap_or(0);
                let stride = self
                    .decorations
                    .get(&type_id)
                    .and_then(|d| d.array_stride)
                    .unwrap_or_else(|| self.byte_size(*element));
                stride * len
            }
            Some(Ty::RuntimeArray { .. }) => 0,
            Some(Ty::Struct { members }) => members
                .iter()
                .enumerate()
                .map(|(m, &mty)| {
                    let off = self
                        .member_decorations
                        .get(&(type_id, m as u32))
                        .and_then(|d| d.offset)
                        .unwrap_or(0);
                    off + self.byte_size(mty)
                })
                .max()
                .unwrap_or(0),
            _ => 0,
        }
    }

    /// Byte range of a block: lowest member offset and span over all members.
    fn block_range(&self, struct_id: u32) -> (u32, u32) {
        let members = match self.types.get(&struct_id) {
            Some(Ty::Struct { members }) => members,
            _ => return (0, 0),
        };
        let mut min = u32::max_value();
        let mut max = 0u32;
        for (m, &mty) in members.iter().enumerate() {
            let off = self
                .member_decorations
                .get(&(struct_id, m as u32))
                .and_then(|d| d.offset)
                .unwrap_or(0);
            min = min.min(off);
            max = max.max(off + self.byte_size(mty));
        }
        if members.is_empty() {
            (0, 0)
        } else {
            (min, max - min)
        }
    }

    /// Access derived from per-member NonWritable/NonReadable decorations.
    fn member_access(&self, struct_id: u32) -> AccessQualifier {
        let members = match self.types.get(&struct_id) {
            Some(Ty::Struct { members }) => members,
            _ => return AccessQualifier::ReadWrite,
        };
        if members.is_empty() {
            return AccessQualifier::ReadWrite;
        }
        let all = |f: fn(&MemberDecorations) -> bool| {
            (0..members.len() as u32).all(|m| {
                self.member_decorations
                    .get(&(struct_id, m))
                    .map(f)
                    .unwrap_or(false)
            })
        };
        if all(|d| d.non_writable) {
            AccessQualifier::Read
        } else if all(|d| d.non_readable) {
            AccessQualifier::Write
        } else {
            AccessQualifier::ReadWrite
        }
    }

    /// Peels array wrappers off a descriptor type, returning the element type
    /// id and the declared array length (1 = not arrayed, 0 = unsized).
    fn peel_array(&self, type_id: u32) -> (u32, u32) {
        match self.types.get(&type_id) {
            Some(Ty::Array { element, length_id }) => {
                let len = self.int_constants.get(length_id).copied().unwrap_or(0);
                (*element, len)
            }
            Some(Ty::RuntimeArray { element }) => (*element, 0),
            _ => (type_id, 1),
        }
    }

    fn classify_variables(&self, module: &Module) -> Result<Vec<ShaderResource>, ParseError> {
        let mut out = Vec::new();

        for var in module.filter_opcodes::<IVariable>() {
            let (storage, pointee) = match self.types.get(&var.result_type_id) {
                Some(Ty::Pointer { storage, pointee }) => (*storage, *pointee),
                _ => continue,
            };
            match storage {
                StorageClass::Uniform
                | StorageClass::UniformConstant
                | StorageClass::StorageBuffer
                | StorageClass::PushConstant => {}
                _ => continue,
            }

            let deco = self.decorations.get(&var.result_id).cloned().unwrap_or_default();
            let name = self.names.get(&var.result_id).cloned().unwrap_or_default();
            let (elem, array_length) = self.peel_array(pointee);

            if storage == StorageClass::PushConstant {
                self.push_constant_members(elem, &name, &mut out);
                continue;
            }

            let binding = ResourceBinding {
                set: deco.set.unwrap_or(0),
                binding: deco.binding.unwrap_or(0),
            };

            let var_access = if deco.non_writable {
                AccessQualifier::Read
            } else if deco.non_readable {
                AccessQualifier::Write
            } else {
                AccessQualifier::ReadWrite
            };

            let resource = match self.types.get(&elem) {
                Some(Ty::Struct { .. }) => {
                    let type_deco = self.decorations.get(&elem).cloned().unwrap_or_default();
                    let (byte_offset, byte_size) = self.block_range(elem);
                    let is_storage =
                        storage == StorageClass::StorageBuffer || type_deco.buffer_block;
                    let (ty, access) = if is_storage {
                        let access = if deco.non_writable || deco.non_readable {
                            var_access
                        } else {
                            self.member_access(elem)
                        };
                        (ShaderResourceType::StorageBuffer, access)
                    } else {
                        (ShaderResourceType::UniformBuffer, AccessQualifier::Read)
                    };
                    ShaderResource {
                        ty,
                        binding,
                        byte_offset,
                        byte_size,
                        name,
                        access,
                        array_length,
                    }
                }
                Some(Ty::Image(img)) => {
                    let (ty, access) = self.classify_image(img, var_access);
                    ShaderResource {
                        ty,
                        binding,
                        byte_offset: 0,
                        byte_size: 0,
                        name,
                        access,
                        array_length,
                    }
                }
                Some(Ty::SampledImage { image }) => {
                    let ty = match self.types.get(image) {
                        Some(Ty::Image(img)) if img.dim == Dim::DimBuffer => {
                            ShaderResourceType::UniformTexelBuffer
                        }
                        _ => ShaderResourceType::SampledImage,
                    };
                    ShaderResource {
                        ty,
                        binding,
                        byte_offset: 0,
                        byte_size: 0,
                        name,
                        access: AccessQualifier::Read,
                        array_length,
                    }
                }
                Some(Ty::Sampler) => ShaderResource {
                    ty: ShaderResourceType::Sampler,
                    binding,
                    byte_offset: 0,
                    byte_size: 0,
                    name,
                    access: AccessQualifier::None,
                    array_length,
                },
                _ => {
                    trace!("skipping variable %{} with unhandled type", var.result_id);
                    continue;
                }
            };
            out.push(resource);
        }

        Ok(out)
    }

    fn classify_image(
        &self,
        img: &ITypeImage,
        var_access: AccessQualifier,
    ) -> (ShaderResourceType, AccessQualifier) {
        if img.dim == Dim::DimSubpassData {
            return (ShaderResourceType::SubpassInput, AccessQualifier::Read);
        }
        let is_storage = img.sampled == 2;
        if img.dim == Dim::DimBuffer {
            return if is_storage {
                (ShaderResourceType::StorageTexelBuffer, var_access)
            } else {
                (ShaderResourceType::UniformTexelBuffer, AccessQualifier::Read)
            };
        }
        if is_storage {
            // the declared qualifier wins over variable decorations
            let access = match img.access {
                Some(spirv_headers::AccessQualifier::ReadOnly) => AccessQualifier::Read,
                Some(spirv_headers::AccessQualifier::WriteOnly) => AccessQualifier::Write,
                Some(spirv_headers::AccessQualifier::ReadWrite) => AccessQualifier::ReadWrite,
                None => var_access,
            };
            (ShaderResourceType::StorageImage, access)
        } else {
            (ShaderResourceType::SampledImage, AccessQualifier::Read)
        }
    }

    fn push_constant_members(&self, struct_id: u32, block_name: &str, out: &mut Vec<ShaderResource>) {
        let members = match self.types.get(&struct_id) {
            Some(Ty::Struct { members }) => members.clone(),
            _ => return,
        };
        for (m, &mty) in members.iter().enumerate() {
            let offset = self
                .member_decorations
                .get(&(struct_id, m as u32))
                .and_then(|d| d.offset)
                .unwrap_or(0);
            let name = self
                .member_names
                .get(&(struct_id, m as u32))
                .cloned()
                .unwrap_or_else(|| format!("{}_{}", block_name, m));
            out.push(ShaderResource {
                ty: ShaderResourceType::PushConstantBuffer,
                binding: ResourceBinding {
                    set: PUSH_CONSTANT_SET,
                    binding: m as u32,
                },
                byte_offset: offset,
                byte_size: self.byte_size(mty),
                name,
                access: AccessQualifier::Read,
                array_length: 1,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spirv_headers::Op;

    fn inst(op: Op, operands: &[u32]) -> Vec<u32> {
        let mut v = vec![(((operands.len() + 1) as u32) << 16) | op as u32];
        v.extend_from_slice(operands);
        v
    }

    fn str_operands(s: &str) -> Vec<u32> {
        let mut v = Vec::new();
        crate::decode::encode_string(s, &mut v);
        v
    }

    struct ModuleBuilder {
        words: Vec<u32>,
    }

    impl ModuleBuilder {
        fn new() -> ModuleBuilder {
            ModuleBuilder {
                words: vec![0x0723_0203, 0x0001_0000, 0, 100, 0],
            }
        }

        fn push(&mut self, op: Op, operands: &[u32]) -> &mut Self {
            self.words.extend(inst(op, operands));
            self
        }

        fn push_str(&mut self, op: Op, pre: &[u32], s: &str, post: &[u32]) -> &mut Self {
            let mut operands = pre.to_vec();
            operands.extend(str_operands(s));
            operands.extend_from_slice(post);
            self.push(op, &operands)
        }

        fn build(&self) -> Module {
            Module::from_words(&self.words).unwrap()
        }
    }

    // ids used by the fixture
    const MAIN_FN: u32 = 1;
    const TY_FLOAT: u32 = 10;
    const TY_VEC4: u32 = 11;
    const TY_UBO: u32 = 12;
    const TY_PTR_UBO: u32 = 13;
    const VAR_UBO: u32 = 14;
    const TY_IMG: u32 = 15;
    const TY_SIMG: u32 = 16;
    const TY_PTR_SIMG: u32 = 17;
    const VAR_SIMG: u32 = 18;
    const TY_SSBO: u32 = 19;
    const TY_PTR_SSBO: u32 = 20;
    const VAR_SSBO: u32 = 21;
    const TY_PC: u32 = 22;
    const TY_PTR_PC: u32 = 23;
    const VAR_PC: u32 = 24;
    const TY_UINT: u32 = 25;
    const SPEC_C: u32 = 26;

    fn fixture() -> Module {
        let mut b = ModuleBuilder::new();
        b.push_str(
            Op::EntryPoint,
            &[ExecutionModel::Fragment as u32, MAIN_FN],
            "main",
            &[],
        );
        // names
        b.push_str(Op::Name, &[VAR_UBO], "globals", &[]);
        b.push_str(Op::Name, &[VAR_SIMG], "albedo", &[]);
        b.push_str(Op::Name, &[VAR_SSBO], "particles", &[]);
        b.push_str(Op::Name, &[SPEC_C], "sample_count", &[]);
        b.push_str(Op::MemberName, &[TY_PC, 0], "transform", &[]);
        // decorations
        b.push(Op::Decorate, &[TY_UBO, Decoration::Block as u32]);
        b.push(Op::Decorate, &[VAR_UBO, Decoration::DescriptorSet as u32, 0]);
        b.push(Op::Decorate, &[VAR_UBO, Decoration::Binding as u32, 1]);
        b.push(Op::Decorate, &[VAR_SIMG, Decoration::DescriptorSet as u32, 1]);
        b.push(Op::Decorate, &[VAR_SIMG, Decoration::Binding as u32, 2]);
        b.push(Op::Decorate, &[TY_SSBO, Decoration::BufferBlock as u32]);
        b.push(Op::Decorate, &[VAR_SSBO, Decoration::DescriptorSet as u32, 0]);
        b.push(Op::Decorate, &[VAR_SSBO, Decoration::Binding as u32, 3]);
        b.push(Op::Decorate, &[SPEC_C, Decoration::SpecId as u32, 7]);
        b.push(Op::MemberDecorate, &[TY_UBO, 0, Decoration::Offset as u32, 0]);
        b.push(Op::MemberDecorate, &[TY_UBO, 1, Decoration::Offset as u32, 16]);
        b.push(
            Op::MemberDecorate,
            &[TY_SSBO, 0, Decoration::Offset as u32, 0],
        );
        b.push(
            Op::MemberDecorate,
            &[TY_SSBO, 0, Decoration::NonWritable as u32],
        );
        b.push(Op::MemberDecorate, &[TY_PC, 0, Decoration::Offset as u32, 0]);
        // types
        b.push(Op::TypeFloat, &[TY_FLOAT, 32]);
        b.push(Op::TypeInt, &[TY_UINT, 32, 0]);
        b.push(Op::TypeVector, &[TY_VEC4, TY_FLOAT, 4]);
        b.push(Op::TypeStruct, &[TY_UBO, TY_VEC4, TY_VEC4]);
        b.push(
            Op::TypePointer,
            &[TY_PTR_UBO, StorageClass::Uniform as u32, TY_UBO],
        );
        // sampled image: Dim2D, not depth, not arrayed, single sampled, sampled=1
        b.push(
            Op::TypeImage,
            &[
                TY_IMG,
                TY_FLOAT,
                Dim::Dim2D as u32,
                0,
                0,
                0,
                1,
                spirv_headers::ImageFormat::Unknown as u32,
            ],
        );
        b.push(Op::TypeSampledImage, &[TY_SIMG, TY_IMG]);
        b.push(
            Op::TypePointer,
            &[TY_PTR_SIMG, StorageClass::UniformConstant as u32, TY_SIMG],
        );
        b.push(Op::TypeStruct, &[TY_SSBO, TY_VEC4]);
        b.push(
            Op::TypePointer,
            &[TY_PTR_SSBO, StorageClass::Uniform as u32, TY_SSBO],
        );
        b.push(Op::TypeStruct, &[TY_PC, TY_VEC4]);
        b.push(
            Op::TypePointer,
            &[TY_PTR_PC, StorageClass::PushConstant as u32, TY_PC],
        );
        // spec constant
        b.push(Op::SpecConstant, &[TY_UINT, SPEC_C, 4]);
        // variables
        b.push(Op::Variable, &[TY_PTR_UBO, VAR_UBO, StorageClass::Uniform as u32]);
        b.push(
            Op::Variable,
            &[TY_PTR_SIMG, VAR_SIMG, StorageClass::UniformConstant as u32],
        );
        b.push(
            Op::Variable,
            &[TY_PTR_SSBO, VAR_SSBO, StorageClass::Uniform as u32],
        );
        b.push(
            Op::Variable,
            &[TY_PTR_PC, VAR_PC, StorageClass::PushConstant as u32],
        );
        b.build()
    }

    #[test]
    fn entry_points_and_resources() {
        let r = Reflection::new(fixture()).unwrap();
        assert_eq!(r.entry_points().collect::<Vec<_>>(), vec!["main"]);
        assert_eq!(r.execution_model(), ExecutionModel::Fragment);

        let find = |name: &str| {
            r.resources()
                .iter()
                .find(|res| res.name == name)
                .unwrap_or_else(|| panic!("no resource named {}", name))
        };

        let ubo = find("globals");
        assert_eq!(ubo.ty, ShaderResourceType::UniformBuffer);
        assert_eq!(ubo.binding, ResourceBinding { set: 0, binding: 1 });
        assert_eq!(ubo.byte_offset, 0);
        assert_eq!(ubo.byte_size, 32);
        assert_eq!(ubo.access, AccessQualifier::Read);

        let img = find("albedo");
        assert_eq!(img.ty, ShaderResourceType::SampledImage);
        assert_eq!(img.binding, ResourceBinding { set: 1, binding: 2 });
        assert_eq!(img.byte_size, 0);

        let ssbo = find("particles");
        assert_eq!(ssbo.ty, ShaderResourceType::StorageBuffer);
        assert_eq!(ssbo.access, AccessQualifier::Read); // all members non-writable

        let pc = find("transform");
        assert_eq!(pc.ty, ShaderResourceType::PushConstantBuffer);
        assert_eq!(pc.binding.set, PUSH_CONSTANT_SET);
        assert_eq!(pc.byte_offset, 0);
        assert_eq!(pc.byte_size, 16);
    }

    #[test]
    fn resources_sorted_by_set_then_binding() {
        let r = Reflection::new(fixture()).unwrap();
        let keys: Vec<(u32, u32)> = r
            .resources()
            .iter()
            .map(|res| (res.binding.set, res.binding.binding))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn spec_constants() {
        let r = Reflection::new(fixture()).unwrap();
        assert_eq!(r.specialization_constants().len(), 1);
        let sc = &r.specialization_constants()[0];
        assert_eq!(sc.index, 0);
        assert_eq!(sc.constant_id, 7);
        assert_eq!(sc.name, "sample_count");
    }

    #[test]
    fn rename_entry_point() {
        let mut r = Reflection::new(fixture()).unwrap();
        r.rename_main_to("fs_shade").unwrap();
        assert_eq!(r.entry_points().collect::<Vec<_>>(), vec!["fs_shade"]);
        assert_eq!(r.active_entry_point().name, "fs_shade");
        // resources survive the splice
        assert_eq!(r.resources().len(), 4);
        // renaming again with a shorter name shrinks the instruction
        r.rename_entry_point("fs_shade", "fs").unwrap();
        assert_eq!(r.entry_points().collect::<Vec<_>>(), vec!["fs"]);
        assert_eq!(r.resources().len(), 4);
    }

    #[test]
    fn missing_entry_point_is_not_fatal() {
        let mut r = Reflection::new(fixture()).unwrap();
        assert!(!r.set_active_entry_point("nonexistent"));
        assert!(r.rename_entry_point("nonexistent", "x").is_err());
    }
}
