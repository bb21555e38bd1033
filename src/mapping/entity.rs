//! Type maps for plain structs: which members exist, how to reach them and how to construct
//! the type.
//!
//! A [`TypeMap`] is built once per type from function pointers and cached for the life of the
//! process. Row readers, the parameter binder and output write-back all work from it.

use std::any::{Any, TypeId, type_name};
use std::cell::Cell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::Range;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use tracing::trace;

use crate::error::{ConversionError, DeserializationError, SqlMapperError};
use crate::executor::Column;
use crate::mapping::convert::FromDbValue;
use crate::mapping::row::{RowReader, conversion_error, value_at};
use crate::params::{ParamEntry, ParamValue, ToParam};
use crate::settings::Settings;
use crate::types::DbValue;

/// A plain struct the mapper can materialize and bind.
///
/// Usually implemented through [`crate::map_entity!`] or [`crate::impl_entity!`]; implement it
/// by hand for constructor-only types or renamed members.
pub trait Entity: Sized + Send + Sync + 'static {
    fn describe(map: TypeMapBuilder<Self>) -> TypeMapBuilder<Self>;
}

/// How a field type registers itself on its owner's type map.
pub trait EntityMember: Sized + Send + Sync + 'static {
    fn register<T: Entity>(
        builder: TypeMapBuilder<T>,
        name: &'static str,
        get: fn(&T) -> &Self,
        get_mut: fn(&mut T) -> &mut Self,
    ) -> TypeMapBuilder<T>;
}

macro_rules! impl_scalar_member {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EntityMember for $ty {
                fn register<T: Entity>(
                    builder: TypeMapBuilder<T>,
                    name: &'static str,
                    get: fn(&T) -> &Self,
                    get_mut: fn(&mut T) -> &mut Self,
                ) -> TypeMapBuilder<T> {
                    builder.field(name, get, get_mut)
                }
            }
        )*
    };
}

impl_scalar_member!(
    u8, i8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool, char, String,
    Vec<u8>, chrono::NaiveDateTime, chrono::NaiveDate, serde_json::Value, DbValue,
);

impl<F> EntityMember for Option<F>
where
    F: FromDbValue + ToParam + Send + Sync + 'static,
{
    fn register<T: Entity>(
        builder: TypeMapBuilder<T>,
        name: &'static str,
        get: fn(&T) -> &Self,
        get_mut: fn(&mut T) -> &mut Self,
    ) -> TypeMapBuilder<T> {
        builder.field(name, get, get_mut)
    }
}

macro_rules! impl_list_member {
    ($($ty:ty),* $(,)?) => {
        $(
            impl EntityMember for Vec<$ty> {
                fn register<T: Entity>(
                    builder: TypeMapBuilder<T>,
                    name: &'static str,
                    get: fn(&T) -> &Self,
                    _get_mut: fn(&mut T) -> &mut Self,
                ) -> TypeMapBuilder<T> {
                    builder.read_only(name, get)
                }
            }
        )*
    };
}

impl_list_member!(
    i8, i16, u16, i32, u32, i64, u64, isize, usize, f32, f64, bool, char, String,
    chrono::NaiveDateTime, chrono::NaiveDate, DbValue,
);

/// What a member can take part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Readable and writable scalar: mapped from columns and bound as a parameter.
    Scalar,
    /// Another entity; reachable through member paths, never bound directly.
    Nested,
    /// Bound as a parameter only (lists, computed values).
    ReadOnly,
}

pub(crate) trait MemberAccess<T>: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> MemberKind;
    fn type_name(&self) -> &'static str;
    fn read(&self, target: &T) -> ParamValue;

    fn assign(&self, _target: &mut T, _value: &DbValue) -> Result<(), ConversionError> {
        Err(ConversionError::new(
            self.type_name(),
            "value",
            format!("member {} is not assignable", self.name()),
        ))
    }

    fn nested_map(&self) -> Option<Arc<dyn ErasedTypeMap>> {
        None
    }

    fn nested_ref<'a>(&self, _target: &'a T) -> Option<&'a dyn Any> {
        None
    }

    fn nested_mut<'a>(&self, _target: &'a mut T) -> Option<&'a mut dyn Any> {
        None
    }
}

struct ScalarField<T, F> {
    name: &'static str,
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
}

impl<T, F> MemberAccess<T> for ScalarField<T, F>
where
    T: Send + Sync + 'static,
    F: FromDbValue + ToParam + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> MemberKind {
        MemberKind::Scalar
    }

    fn type_name(&self) -> &'static str {
        type_name::<F>()
    }

    fn read(&self, target: &T) -> ParamValue {
        (self.get)(target).to_param()
    }

    fn assign(&self, target: &mut T, value: &DbValue) -> Result<(), ConversionError> {
        *(self.get_mut)(target) = F::from_db_value(value)?;
        Ok(())
    }
}

struct ReadOnlyField<T, F> {
    name: &'static str,
    get: fn(&T) -> &F,
}

impl<T, F> MemberAccess<T> for ReadOnlyField<T, F>
where
    T: Send + Sync + 'static,
    F: ToParam + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> MemberKind {
        MemberKind::ReadOnly
    }

    fn type_name(&self) -> &'static str {
        type_name::<F>()
    }

    fn read(&self, target: &T) -> ParamValue {
        (self.get)(target).to_param()
    }
}

struct NestedField<T, N> {
    name: &'static str,
    get: fn(&T) -> &N,
    get_mut: fn(&mut T) -> &mut N,
}

impl<T, N> MemberAccess<T> for NestedField<T, N>
where
    T: Send + Sync + 'static,
    N: Entity,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> MemberKind {
        MemberKind::Nested
    }

    fn type_name(&self) -> &'static str {
        type_name::<N>()
    }

    fn read(&self, _target: &T) -> ParamValue {
        ParamValue::unsupported::<N>()
    }

    fn nested_map(&self) -> Option<Arc<dyn ErasedTypeMap>> {
        Some(type_map::<N>() as Arc<dyn ErasedTypeMap>)
    }

    fn nested_ref<'a>(&self, target: &'a T) -> Option<&'a dyn Any> {
        Some((self.get)(target) as &dyn Any)
    }

    fn nested_mut<'a>(&self, target: &'a mut T) -> Option<&'a mut dyn Any> {
        Some((self.get_mut)(target) as &mut dyn Any)
    }
}

/// Constructor arguments handed to a registered constructor, in declaration order.
///
/// Parameters without a matching column read as the target type's null value.
pub struct CtorArgs<'r> {
    row: &'r [DbValue],
    slots: &'r [Option<usize>],
    failed: Cell<Option<usize>>,
}

impl CtorArgs<'_> {
    /// Read argument `index` as `F`.
    ///
    /// # Errors
    /// Returns [`ConversionError`] when the column value does not fit `F`.
    pub fn get<F: FromDbValue>(&self, index: usize) -> Result<F, ConversionError> {
        match self.slots.get(index).copied().flatten() {
            Some(ordinal) => F::from_db_value(value_at(self.row, ordinal)).inspect_err(|_| {
                self.failed.set(Some(index));
            }),
            None => Ok(F::null_value()),
        }
    }
}

type CtorFn<T> = fn(&CtorArgs<'_>) -> Result<T, ConversionError>;

struct ConstructorDef<T> {
    params: Vec<&'static str>,
    build: CtorFn<T>,
}

/// Member and constructor descriptors for `T`.
pub struct TypeMap<T> {
    type_name: &'static str,
    default_factory: Option<fn() -> T>,
    members: Vec<Box<dyn MemberAccess<T>>>,
    constructors: Vec<ConstructorDef<T>>,
    explicit: Option<ConstructorDef<T>>,
}

impl<T: Entity> TypeMap<T> {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Names of every registered member, in registration order.
    #[must_use]
    pub fn member_names(&self) -> Vec<&'static str> {
        self.members.iter().map(|m| m.name()).collect()
    }

    /// One parameter entry per member; nested members surface as unsupported values.
    #[must_use]
    pub fn entries(&self, value: &T) -> Vec<ParamEntry> {
        self.members
            .iter()
            .map(|member| ParamEntry::new(member.name(), member.read(value)))
            .collect()
    }

    fn find_assignable(&self, column: &str, underscores: bool) -> Option<usize> {
        find_by_name(
            self.members
                .iter()
                .enumerate()
                .filter(|(_, m)| m.kind() == MemberKind::Scalar)
                .map(|(i, m)| (i, m.name())),
            column,
            underscores,
        )
    }
}

/// Exact match first, then case-insensitive, then (optionally) ignoring underscores.
fn find_by_name<'a, I>(candidates: I, wanted: &str, underscores: bool) -> Option<usize>
where
    I: Iterator<Item = (usize, &'a str)> + Clone,
{
    if let Some((i, _)) = candidates.clone().find(|(_, name)| *name == wanted) {
        return Some(i);
    }
    if let Some((i, _)) = candidates
        .clone()
        .find(|(_, name)| name.eq_ignore_ascii_case(wanted))
    {
        return Some(i);
    }
    if underscores {
        let normalized = wanted.replace('_', "");
        return candidates
            .clone()
            .find(|(_, name)| name.replace('_', "").eq_ignore_ascii_case(&normalized))
            .map(|(i, _)| i);
    }
    None
}

/// Fluent builder handed to [`Entity::describe`].
pub struct TypeMapBuilder<T> {
    map: TypeMap<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Default for TypeMapBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> TypeMapBuilder<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: TypeMap {
                type_name: type_name::<T>(),
                default_factory: None,
                members: Vec::new(),
                constructors: Vec::new(),
                explicit: None,
            },
            _marker: PhantomData,
        }
    }

    /// Factory used when no constructor applies; members are assigned afterwards.
    #[must_use]
    pub fn default_factory(mut self, factory: fn() -> T) -> Self {
        self.map.default_factory = Some(factory);
        self
    }

    /// Register a scalar member, mapped from columns and bound as a parameter.
    #[must_use]
    pub fn field<F>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self
    where
        F: FromDbValue + ToParam + Send + Sync + 'static,
    {
        self.map
            .members
            .push(Box::new(ScalarField { name, get, get_mut }));
        self
    }

    /// Register a member that is bound as a parameter but never assigned from a column.
    #[must_use]
    pub fn read_only<F>(mut self, name: &'static str, get: fn(&T) -> &F) -> Self
    where
        F: ToParam + Send + Sync + 'static,
    {
        self.map.members.push(Box::new(ReadOnlyField { name, get }));
        self
    }

    /// Register a member that is itself an entity.
    #[must_use]
    pub fn nested<N: Entity>(
        mut self,
        name: &'static str,
        get: fn(&T) -> &N,
        get_mut: fn(&mut T) -> &mut N,
    ) -> Self {
        self.map
            .members
            .push(Box::new(NestedField { name, get, get_mut }));
        self
    }

    /// Register a member through its type's [`EntityMember`] impl.
    #[must_use]
    pub fn member<F: EntityMember>(
        self,
        name: &'static str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        F::register(self, name, get, get_mut)
    }

    /// Register a constructor taking the named columns, in order.
    #[must_use]
    pub fn constructor(mut self, params: &[&'static str], build: CtorFn<T>) -> Self {
        self.map.constructors.push(ConstructorDef {
            params: params.to_vec(),
            build,
        });
        self
    }

    /// Register the constructor that always wins. Missing columns read as null values and
    /// columns not consumed by it are assigned to members afterwards.
    #[must_use]
    pub fn explicit_constructor(mut self, params: &[&'static str], build: CtorFn<T>) -> Self {
        self.map.explicit = Some(ConstructorDef {
            params: params.to_vec(),
            build,
        });
        self
    }

    #[must_use]
    pub fn build(self) -> TypeMap<T> {
        self.map
    }
}

lazy_static! {
    static ref TYPE_MAPS: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>> =
        RwLock::new(HashMap::new());
}

/// The process-wide type map for `T`, built on first use.
#[must_use]
pub fn type_map<T: Entity>() -> Arc<TypeMap<T>> {
    let key = TypeId::of::<T>();
    {
        let maps = match TYPE_MAPS.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = maps
            .get(&key)
            .and_then(|m| Arc::clone(m).downcast::<TypeMap<T>>().ok())
        {
            return existing;
        }
    }

    let built = Arc::new(T::describe(TypeMapBuilder::new()).build());
    trace!(target_type = built.type_name, members = built.members.len(), "built type map");
    let mut maps = match TYPE_MAPS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let entry = maps
        .entry(key)
        .or_insert_with(|| Arc::clone(&built) as Arc<dyn Any + Send + Sync>);
    Arc::clone(entry).downcast::<TypeMap<T>>().unwrap_or(built)
}

/// Type-erased view of a [`TypeMap`], used to walk member paths through nested entities.
pub trait ErasedTypeMap: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn find_member(&self, name: &str) -> Option<usize>;
    fn member_name(&self, index: usize) -> Option<&'static str>;
    fn member_kind(&self, index: usize) -> Option<MemberKind>;
    fn nested_map(&self, index: usize) -> Option<Arc<dyn ErasedTypeMap>>;
    fn nested_ref<'a>(&self, target: &'a dyn Any, index: usize) -> Option<&'a dyn Any>;
    fn nested_mut<'a>(&self, target: &'a mut dyn Any, index: usize) -> Option<&'a mut dyn Any>;
    fn read(&self, target: &dyn Any, index: usize) -> Option<ParamValue>;

    /// # Errors
    /// Returns [`ConversionError`] when the target has the wrong type or the value does not fit.
    fn assign(
        &self,
        target: &mut dyn Any,
        index: usize,
        value: &DbValue,
    ) -> Result<(), ConversionError>;
}

impl<T: Entity> ErasedTypeMap for TypeMap<T> {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn find_member(&self, name: &str) -> Option<usize> {
        find_by_name(
            self.members.iter().enumerate().map(|(i, m)| (i, m.name())),
            name,
            false,
        )
    }

    fn member_name(&self, index: usize) -> Option<&'static str> {
        self.members.get(index).map(|m| m.name())
    }

    fn member_kind(&self, index: usize) -> Option<MemberKind> {
        self.members.get(index).map(|m| m.kind())
    }

    fn nested_map(&self, index: usize) -> Option<Arc<dyn ErasedTypeMap>> {
        self.members.get(index).and_then(|m| m.nested_map())
    }

    fn nested_ref<'a>(&self, target: &'a dyn Any, index: usize) -> Option<&'a dyn Any> {
        let target = target.downcast_ref::<T>()?;
        self.members.get(index)?.nested_ref(target)
    }

    fn nested_mut<'a>(&self, target: &'a mut dyn Any, index: usize) -> Option<&'a mut dyn Any> {
        let target = target.downcast_mut::<T>()?;
        self.members.get(index)?.nested_mut(target)
    }

    fn read(&self, target: &dyn Any, index: usize) -> Option<ParamValue> {
        let target = target.downcast_ref::<T>()?;
        Some(self.members.get(index)?.read(target))
    }

    fn assign(
        &self,
        target: &mut dyn Any,
        index: usize,
        value: &DbValue,
    ) -> Result<(), ConversionError> {
        let member = self.members.get(index).ok_or_else(|| {
            ConversionError::new(self.type_name, "value", format!("no member at index {index}"))
        })?;
        let target = target.downcast_mut::<T>().ok_or_else(|| {
            ConversionError::new(self.type_name, "object", "target has a different type")
        })?;
        member.assign(target, value)
    }
}

enum Construction<T> {
    Constructor {
        build: CtorFn<T>,
        params: Vec<&'static str>,
        slots: Vec<Option<usize>>,
    },
    Default(fn() -> T),
}

struct Assignment {
    ordinal: usize,
    column: String,
    member: usize,
}

fn column_for(
    columns: &[Column],
    range: &Range<usize>,
    param: &str,
    underscores: bool,
) -> Option<usize> {
    find_by_name(
        columns[range.clone()]
            .iter()
            .map(|c| (c.ordinal, c.name.as_str())),
        param,
        underscores,
    )
}

/// Compile a reader that materializes `T` from `columns[range]`.
///
/// Construction precedence: the explicit constructor, then the first constructor whose
/// parameters all have a matching column, then the default factory plus member assignment.
///
/// # Errors
/// Returns [`DeserializationError::NoColumns`] for an empty range and
/// [`DeserializationError::NoConstructor`] when none of the strategies applies.
pub fn compile_entity<T: Entity>(
    columns: &[Column],
    range: Range<usize>,
) -> Result<RowReader<T>, SqlMapperError> {
    if range.is_empty() || range.end > columns.len() {
        return Err(DeserializationError::NoColumns.into());
    }
    let map = type_map::<T>();
    let underscores = Settings::match_names_with_underscores();
    let slots_for = |params: &[&'static str]| -> Vec<Option<usize>> {
        params
            .iter()
            .map(|p| column_for(columns, &range, p, underscores))
            .collect()
    };

    let explicit = map.explicit.as_ref();
    let (construction, consumed): (Construction<T>, Vec<usize>) = if let Some(explicit) = explicit {
        let slots = slots_for(&explicit.params);
        let consumed = slots.iter().flatten().copied().collect();
        (
            Construction::Constructor {
                build: explicit.build,
                params: explicit.params.clone(),
                slots,
            },
            consumed,
        )
    } else if let Some((ctor, slots)) = map
        .constructors
        .iter()
        .map(|ctor| (ctor, slots_for(&ctor.params)))
        .find(|(_, slots)| slots.iter().all(Option::is_some))
    {
        // A matching constructor owns construction; no member assignment follows.
        let consumed = columns[range.clone()].iter().map(|c| c.ordinal).collect();
        (
            Construction::Constructor {
                build: ctor.build,
                params: ctor.params.clone(),
                slots,
            },
            consumed,
        )
    } else if let Some(factory) = map.default_factory {
        (Construction::Default(factory), Vec::new())
    } else {
        let signature = columns[range.clone()]
            .iter()
            .map(|c| format!("{} {}", c.name, c.provider_type).trim_end().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(DeserializationError::NoConstructor {
            type_name: map.type_name,
            columns: signature,
        }
        .into());
    };

    let assignments: Vec<Assignment> = columns[range.clone()]
        .iter()
        .filter(|c| !consumed.contains(&c.ordinal))
        .filter_map(|c| {
            map.find_assignable(&c.name, underscores).map(|member| Assignment {
                ordinal: c.ordinal,
                column: c.name.clone(),
                member,
            })
        })
        .collect();
    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    Ok(RowReader::new(move |row| {
        let mut target = match &construction {
            Construction::Default(factory) => factory(),
            Construction::Constructor {
                build,
                params,
                slots,
            } => {
                let args = CtorArgs {
                    row,
                    slots,
                    failed: Cell::new(None),
                };
                build(&args).map_err(|err| {
                    let failed = args.failed.get();
                    let ordinal = failed.and_then(|i| slots.get(i).copied().flatten()).unwrap_or(0);
                    let param = failed
                        .and_then(|i| params.get(i).copied())
                        .unwrap_or("constructor");
                    conversion_error(
                        ordinal,
                        column_names.get(ordinal).map_or("", String::as_str),
                        value_at(row, ordinal),
                        format!("{}({param})", map.type_name),
                        err,
                    )
                })?
            }
        };
        for assignment in &assignments {
            let value = value_at(row, assignment.ordinal);
            if value.is_null() {
                continue;
            }
            if let Some(member) = map.members.get(assignment.member) {
                member.assign(&mut target, value).map_err(|err| {
                    conversion_error(
                        assignment.ordinal,
                        &assignment.column,
                        value,
                        format!("{}.{}", map.type_name, member.name()),
                        err,
                    )
                })?;
            }
        }
        Ok(target)
    }))
}
