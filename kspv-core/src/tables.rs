//! Insertion-ordered type and constant tables, and the value map.
//!
//! The order in which types and constants are first recorded decides the ids
//! they receive, so both tables keep insertion order.

use std::collections::HashMap;

use indexmap::IndexSet;
use kir::{Constant, Type};
use spirv::Word;

/// Anything in the input module that can be referenced by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Constant(Constant),
    Global(String),
    Function(String),
    /// Parameter or instruction result, keyed by function index.
    Local(usize, String),
    Block(usize, String),
}

impl ValueKey {
    pub fn local(function: usize, name: &str) -> ValueKey {
        ValueKey::Local(function, name.to_string())
    }

    pub fn block(function: usize, label: &str) -> ValueKey {
        ValueKey::Block(function, label.to_string())
    }
}

#[derive(Debug, Default)]
pub struct TypeTable {
    order: IndexSet<Type>,
    ids: HashMap<Type, Word>,
}

impl TypeTable {
    pub fn contains(&self, ty: &Type) -> bool {
        self.order.contains(ty)
    }

    /// Records `ty`; returns false if it was already present.
    pub fn insert(&mut self, ty: Type) -> bool {
        self.order.insert(ty)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Type> {
        self.order.get_index(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Type> {
        self.order.iter()
    }

    pub fn id(&self, ty: &Type) -> Option<Word> {
        self.ids.get(ty).copied()
    }

    pub fn set_id(&mut self, ty: Type, id: Word) {
        self.ids.insert(ty, id);
    }
}

#[derive(Debug, Default)]
pub struct ConstantTable {
    order: IndexSet<Constant>,
}

impl ConstantTable {
    pub fn contains(&self, constant: &Constant) -> bool {
        self.order.contains(constant)
    }

    pub fn insert(&mut self, constant: Constant) -> bool {
        self.order.insert(constant)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.order.iter()
    }
}

#[derive(Debug, Default)]
pub struct ValueMap {
    ids: HashMap<ValueKey, Word>,
}

impl ValueMap {
    pub fn get(&self, key: &ValueKey) -> Option<Word> {
        self.ids.get(key).copied()
    }

    pub fn contains(&self, key: &ValueKey) -> bool {
        self.ids.contains_key(key)
    }

    pub fn insert(&mut self, key: ValueKey, id: Word) {
        self.ids.insert(key, id);
    }

    pub fn constant(&self, constant: &Constant) -> Option<Word> {
        self.ids.get(&ValueKey::Constant(constant.clone())).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_table_keeps_first_insertion_order() {
        let mut types = TypeTable::default();
        assert!(types.insert(Type::f32()));
        assert!(types.insert(Type::i32()));
        assert!(!types.insert(Type::f32()));
        let order: Vec<&Type> = types.iter().collect();
        assert_eq!(order, vec![&Type::f32(), &Type::i32()]);
    }

    #[test]
    fn test_constants_distinguish_width() {
        let mut constants = ConstantTable::default();
        assert!(constants.insert(Constant::i32(0)));
        assert!(constants.insert(Constant::int(8, 0)));
        assert_eq!(constants.len(), 2);
    }
}
