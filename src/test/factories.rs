//! Module factories.

use crate::abc::{
    builder::AbcBuilder,
    constants::ConstantKind,
    info::{ClassInfo, InstanceInfo, MethodInfo, Trait},
    opcodes::*,
};

/// One public class `Foo` with a field `x`, its constructor and class initializer, and a
/// script that defines it.
///
/// Methods are 0 = script init, 1 = constructor, 2 = class init, with one body each in that
/// order. The script init jumps over a `nop`; the constructor calls `super()` and then sets
/// `x`. The module ends with the last body's `returnvoid` and its empty exception and trait
/// tables.
pub fn sample_module() -> Vec<u8> {
    let mut builder = AbcBuilder::new();
    let ns = builder.namespace(ConstantKind::PackageNamespace, "");
    let foo = builder.qname(ns, "Foo");
    let x = builder.qname(ns, "x");

    let init = builder.method(MethodInfo::default());
    let iinit = builder.method(MethodInfo::default());
    let cinit = builder.method(MethodInfo::default());

    let mut instance = InstanceInfo::new(foo, 0, iinit);
    instance.traits = vec![Trait::slot(x, 0)];
    let class = builder.class(
        instance,
        ClassInfo {
            cinit,
            traits: Vec::new(),
        },
    );
    builder.script(init, vec![Trait::class(foo, 1, class)]);

    builder.body(
        init,
        &[GETLOCAL0, PUSHSCOPE, JUMP, 0x01, 0x00, 0x00, NOP, RETURNVOID],
    );
    builder.body(
        iinit,
        &[
            GETLOCAL0,
            PUSHSCOPE,
            GETLOCAL0,
            CONSTRUCTSUPER,
            0,
            GETLOCAL0,
            PUSHBYTE,
            5,
            SETPROPERTY,
            x as u8,
            RETURNVOID,
        ],
    );
    builder.body(cinit, &[GETLOCAL0, PUSHSCOPE, RETURNVOID]);
    builder.build()
}

/// A module whose only method pushes and pops each of `strings` in order.
pub fn string_module(strings: &[&str]) -> Vec<u8> {
    let mut builder = AbcBuilder::new();
    let mut code = Vec::new();
    for string in strings {
        let index = builder.string(string);
        code.extend_from_slice(&[PUSHSTRING, index as u8, POP]);
    }
    code.push(RETURNVOID);

    let init = builder.method(MethodInfo::default());
    builder.script(init, Vec::new());
    builder.body(init, &code);
    builder.build()
}

/// A module with a single script initializer running `code`.
///
/// The pool holds the package namespace `""` (namespace 1, string 1) and the names `a`
/// (multiname 1, string 2) and `b` (multiname 2, string 3). Nothing references them outside
/// of `code`, so the merged pool numbers them in the order `code` first uses them.
pub fn code_module(code: &[u8]) -> Vec<u8> {
    let mut builder = AbcBuilder::new();
    let ns = builder.namespace(ConstantKind::PackageNamespace, "");
    builder.qname(ns, "a");
    builder.qname(ns, "b");

    let init = builder.method(MethodInfo::default());
    builder.script(init, Vec::new());
    builder.body(init, code);
    builder.build()
}
