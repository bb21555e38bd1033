/// Declare a plain struct and register it as an [`Entity`](crate::mapping::Entity).
///
/// Every field becomes a member named after the field. Scalar fields are mapped from columns and
/// bound as parameters, entity fields are nested members and `Vec` fields of scalars bind as
/// expandable lists. The struct must implement `Default`.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// sql_mapper::map_entity! {
///     #[derive(Debug, Default, Clone, PartialEq)]
///     pub struct User {
///         pub id: i64,
///         pub name: String,
///         pub email: Option<String>,
///     }
/// }
///
/// let members = sql_mapper::mapping::type_map::<User>().member_names();
/// assert_eq!(members, vec!["id", "name", "email"]);
/// ```
#[macro_export]
macro_rules! map_entity {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $fty ),*
        }

        $crate::impl_entity!($name { $( $field : $fty ),* });
    };
}

/// Register an existing `Default` struct as an entity, listing the mapped fields.
#[macro_export]
macro_rules! impl_entity {
    ($name:ident { $( $field:ident : $fty:ty ),* $(,)? }) => {
        impl $crate::mapping::Entity for $name {
            fn describe(
                map: $crate::mapping::TypeMapBuilder<Self>,
            ) -> $crate::mapping::TypeMapBuilder<Self> {
                let map = map.default_factory(<$name as ::core::default::Default>::default);
                $(
                    let map = {
                        fn get(target: &$name) -> &$fty {
                            &target.$field
                        }
                        fn get_mut(target: &mut $name) -> &mut $fty {
                            &mut target.$field
                        }
                        map.member::<$fty>(stringify!($field), get, get_mut)
                    };
                )*
                map
            }
        }

        $crate::impl_entity_traits!($name);
    };
}

/// Row mapping, parameter and nesting impls for a type with a hand-written `Entity` impl.
#[macro_export]
macro_rules! impl_entity_traits {
    ($name:ident) => {
        impl $crate::mapping::FromRow for $name {
            fn compile(
                columns: &[$crate::executor::Column],
                range: ::core::ops::Range<usize>,
            ) -> ::core::result::Result<$crate::mapping::RowReader<Self>, $crate::SqlMapperError>
            {
                $crate::mapping::compile_entity::<Self>(columns, range)
            }
        }

        impl $crate::params::ParamSource for $name {
            fn shape(&self) -> ::core::option::Option<::std::any::TypeId> {
                ::core::option::Option::Some(::std::any::TypeId::of::<Self>())
            }

            fn entries(
                &self,
            ) -> ::core::result::Result<
                ::std::vec::Vec<$crate::params::ParamEntry>,
                $crate::SqlMapperError,
            > {
                ::core::result::Result::Ok($crate::mapping::type_map::<Self>().entries(self))
            }
        }

        impl $crate::mapping::EntityMember for $name {
            fn register<T: $crate::mapping::Entity>(
                builder: $crate::mapping::TypeMapBuilder<T>,
                name: &'static str,
                get: fn(&T) -> &Self,
                get_mut: fn(&mut T) -> &mut Self,
            ) -> $crate::mapping::TypeMapBuilder<T> {
                builder.nested(name, get, get_mut)
            }
        }
    };
}

/// Declare a fieldless enum stored as its integer value.
///
/// The enum must derive `Clone`, `Copy` and `Default`; the default variant is used for null
/// columns. Parameters bind as 32-bit integers.
///
/// ```rust
/// sql_mapper::sql_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
///     pub enum Status {
///         #[default]
///         Active = 1,
///         Suspended = 2,
///     }
/// }
/// ```
#[macro_export]
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $( $(#[$vmeta])* $variant = $value ),+
        }

        impl $crate::mapping::SqlEnum for $name {
            fn to_underlying(self) -> i64 {
                self as i64
            }

            fn from_underlying(value: i64) -> ::core::option::Option<Self> {
                $(
                    if value == $value {
                        return ::core::option::Option::Some($name::$variant);
                    }
                )+
                ::core::option::Option::None
            }

            fn variant_name(self) -> &'static str {
                match self {
                    $( $name::$variant => stringify!($variant), )+
                }
            }

            fn from_name(name: &str) -> ::core::option::Option<Self> {
                $(
                    if name.eq_ignore_ascii_case(stringify!($variant)) {
                        return ::core::option::Option::Some($name::$variant);
                    }
                )+
                ::core::option::Option::None
            }
        }

        impl $crate::mapping::FromDbValue for $name {
            fn from_db_value(
                value: &$crate::DbValue,
            ) -> ::core::result::Result<Self, $crate::ConversionError> {
                match value {
                    $crate::DbValue::Null => ::core::result::Result::Ok(
                        <Self as $crate::mapping::FromDbValue>::null_value(),
                    ),
                    other => $crate::mapping::enum_from_db_value::<Self>(other),
                }
            }

            fn null_value() -> Self {
                <$name as ::core::default::Default>::default()
            }
        }

        impl $crate::mapping::ToDbValue for $name {
            fn to_db_value(&self) -> $crate::DbValue {
                $crate::DbValue::Int(<$name as $crate::mapping::SqlEnum>::to_underlying(*self))
            }
        }

        impl $crate::mapping::ListElement for $name {}

        impl $crate::params::ToParam for $name {
            fn to_param(&self) -> $crate::params::ParamValue {
                $crate::params::ParamValue::Scalar {
                    value: <$name as $crate::mapping::ToDbValue>::to_db_value(self),
                    type_id: ::std::any::TypeId::of::<i32>(),
                    type_name: ::std::any::type_name::<$name>(),
                }
            }
        }

        impl $crate::params::ToParam for ::std::vec::Vec<$name> {
            fn to_param(&self) -> $crate::params::ParamValue {
                $crate::params::ParamValue::List {
                    values: self
                        .iter()
                        .map(<$name as $crate::mapping::ToDbValue>::to_db_value)
                        .collect(),
                    element: ::std::any::TypeId::of::<i32>(),
                    element_name: ::std::any::type_name::<$name>(),
                }
            }
        }

        impl $crate::mapping::FromRow for $name {
            fn compile(
                columns: &[$crate::executor::Column],
                range: ::core::ops::Range<usize>,
            ) -> ::core::result::Result<$crate::mapping::RowReader<Self>, $crate::SqlMapperError>
            {
                $crate::mapping::compile_scalar::<Self>(columns, range)
            }
        }

        impl $crate::mapping::EntityMember for $name {
            fn register<T: $crate::mapping::Entity>(
                builder: $crate::mapping::TypeMapBuilder<T>,
                name: &'static str,
                get: fn(&T) -> &Self,
                get_mut: fn(&mut T) -> &mut Self,
            ) -> $crate::mapping::TypeMapBuilder<T> {
                builder.field(name, get, get_mut)
            }
        }
    };
}

/// Build [`DynamicParameters`](crate::params::DynamicParameters) from `name => value` pairs.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let params = sql_mapper::params! { "id" => 5_i32, "names" => vec!["a", "b"] };
/// assert_eq!(params.parameter_names(), vec!["id", "names"]);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::params::DynamicParameters::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut parameters = $crate::params::DynamicParameters::new();
        $( parameters.add($name, $value); )+
        parameters
    }};
}
