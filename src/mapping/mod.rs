//! Row mapping: compiled readers that turn raw rows into entities, scalars, dynamic rows and
//! split tuples.

pub mod convert;
pub mod dynamic_row;
pub mod entity;
pub mod enums;
mod macros;
pub mod row;
pub mod split;

pub use convert::{FromDbValue, ListElement, ToDbValue};
pub use dynamic_row::DynamicRow;
pub use entity::{
    CtorArgs, Entity, EntityMember, ErasedTypeMap, MemberKind, TypeMap, TypeMapBuilder,
    compile_entity, type_map,
};
pub use enums::{SqlEnum, enum_from_db_value};
pub use row::{FromRow, RowReader, compile_scalar};
pub use split::{DEFAULT_SPLIT_ON, SplitTuple, split_ranges};
