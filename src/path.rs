//! Packed binding paths.
//!
//! A binding path identifies a shader resource location in 64 bits:
//! set in the high 16 bits, binding below it, array index in the low 32.
//! The reserved set `0xffff` addresses push constants; the reserved binding
//! `0xffff` addresses a whole argument-buffer descriptor set rather than a
//! specific binding inside it.
use std::fmt;

/// Set index reserved for push constants.
pub const PUSH_CONSTANT_SET: u16 = 0xffff;
/// Binding index denoting "the argument buffer's descriptor set itself".
pub const ARGUMENT_BUFFER_BINDING: u16 = 0xffff;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BindingPath(u64);

impl BindingPath {
    pub fn pack(set: u16, binding: u16, array_index: u32) -> BindingPath {
        BindingPath(((set as u64) << 48) | ((binding as u64) << 32) | array_index as u64)
    }

    /// A path addressing the descriptor set of an argument buffer bound at
    /// `set`.
    pub fn argument_buffer(set: u16) -> BindingPath {
        BindingPath::pack(set, ARGUMENT_BUFFER_BINDING, 0)
    }

    pub fn push_constant(binding: u16) -> BindingPath {
        BindingPath::pack(PUSH_CONSTANT_SET, binding, 0)
    }

    pub fn from_raw(raw: u64) -> BindingPath {
        BindingPath(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn set(self) -> u16 {
        (self.0 >> 48) as u16
    }

    pub fn binding(self) -> u16 {
        (self.0 >> 32) as u16
    }

    pub fn array_index(self) -> u32 {
        self.0 as u32
    }

    pub fn is_push_constant(self) -> bool {
        self.set() == PUSH_CONSTANT_SET
    }

    pub fn is_argument_buffer(self) -> bool {
        self.binding() == ARGUMENT_BUFFER_BINDING
    }

    /// Rebases the path onto another argument buffer's set, keeping binding
    /// and array index.
    pub fn with_set(self, set: u16) -> BindingPath {
        BindingPath::pack(set, self.binding(), self.array_index())
    }

    pub fn with_array_index(self, array_index: u32) -> BindingPath {
        BindingPath::pack(self.set(), self.binding(), array_index)
    }

    /// Key used by the sorted lookup table of a pipeline reflection.
    pub fn sort_key(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BindingPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_push_constant() {
            write!(f, "BindingPath(push constant #{})", self.binding())
        } else if self.is_argument_buffer() {
            write!(f, "BindingPath(set {}, argument buffer)", self.set())
        } else {
            write!(
                f,
                "BindingPath(set {}, binding {}, index {})",
                self.set(),
                self.binding(),
                self.array_index()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_layout() {
        let p = BindingPath::pack(2, 5, 7);
        assert_eq!(p.raw(), 0x0002_0005_0000_0007);
        assert_eq!(p.set(), 2);
        assert_eq!(p.binding(), 5);
        assert_eq!(p.array_index(), 7);
    }

    #[test]
    fn round_trip() {
        for &(s, b, a) in &[(0u16, 0u16, 0u32), (1, 2, 3), (0xfffe, 0xfffe, 0xffff_ffff)] {
            let p = BindingPath::pack(s, b, a);
            assert_eq!((p.set(), p.binding(), p.array_index()), (s, b, a));
            assert_eq!(BindingPath::from_raw(p.raw()), p);
        }
    }

    #[test]
    fn sentinels() {
        let ab = BindingPath::argument_buffer(3);
        assert!(ab.is_argument_buffer());
        assert_eq!(ab.set(), 3);
        assert_eq!(ab.binding(), 0xffff);

        let pc = BindingPath::push_constant(1);
        assert!(pc.is_push_constant());
        assert_eq!(pc.set(), PUSH_CONSTANT_SET);
    }

    #[test]
    fn rebase_set() {
        let p = BindingPath::pack(4, 9, 2);
        let q = p.with_set(6);
        assert_eq!((q.set(), q.binding(), q.array_index()), (6, 9, 2));
    }
}
