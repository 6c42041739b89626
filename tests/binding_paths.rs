//! Binding path packing across the public API.
use vkgraph::BindingPath;

#[test]
fn packing_literals() {
    let p = BindingPath::pack(2, 5, 7);
    assert_eq!(p.raw(), 0x0002_0005_0000_0007);
    let (s, b, a) = (p.set(), p.binding(), p.array_index());
    assert_eq!((s, b, a), (2, 5, 7));
}

#[test]
fn argument_buffer_sentinel() {
    let ab = BindingPath::argument_buffer(3);
    assert!(ab.is_argument_buffer());
    assert_eq!(ab.binding(), 0xffff);
    assert_eq!(ab.set(), 3);
}

#[test]
fn push_constant_sentinel() {
    let pc = BindingPath::push_constant(0);
    assert!(pc.is_push_constant());
    assert_eq!(pc.set(), vkgraph::PUSH_CONSTANT_SET);
}

#[test]
fn round_trip_via_raw() {
    for &(s, b, a) in &[
        (0u16, 0u16, 0u32),
        (2, 5, 7),
        (0x1234, 0x5678, 0x9abc_def0),
        (0xffff, 0xffff, 0xffff_ffff),
    ] {
        let p = BindingPath::pack(s, b, a);
        let q = BindingPath::from_raw(p.raw());
        assert_eq!(p, q);
        assert_eq!((q.set(), q.binding(), q.array_index()), (s, b, a));
    }
}

#[test]
fn set_substitution_preserves_binding_and_index() {
    let original = BindingPath::pack(1, 4, 9);
    let target = BindingPath::argument_buffer(6);
    let rebased = original.with_set(target.set());
    assert_eq!((rebased.set(), rebased.binding(), rebased.array_index()), (6, 4, 9));
}
