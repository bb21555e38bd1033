use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::{BindingError, SqlMapperError};
use crate::mapping::{Entity, ErasedTypeMap, MemberKind, type_map};
use crate::params::ParamValue;
use crate::types::DbValue;

struct Step {
    map: Arc<dyn ErasedTypeMap>,
    member: usize,
}

/// A dotted path (`Address.Name`) from an entity down to a scalar member.
///
/// Resolved once against the entity's type maps; every segment but the last must be a nested
/// entity and the last must be an assignable scalar.
pub struct MemberPath {
    path: String,
    param_name: String,
    steps: Vec<Step>,
}

impl fmt::Debug for MemberPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberPath")
            .field("path", &self.path)
            .field("param_name", &self.param_name)
            .finish_non_exhaustive()
    }
}

impl MemberPath {
    /// Resolve `path` against `T`.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidMemberPath`] for empty segments, unknown members, or a
    /// path that does not end at a scalar member.
    pub fn resolve<T: Entity>(path: &str) -> Result<Self, BindingError> {
        let invalid = |reason: String| BindingError::InvalidMemberPath {
            path: path.to_string(),
            reason,
        };
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("empty member name".to_string()));
        }

        let mut map: Arc<dyn ErasedTypeMap> = type_map::<T>();
        let mut steps = Vec::with_capacity(segments.len());
        let mut param_name = String::new();
        for (i, segment) in segments.iter().enumerate() {
            let member = map
                .find_member(segment)
                .ok_or_else(|| invalid(format!("{} has no member {segment}", map.type_name())))?;
            let last = i + 1 == segments.len();
            let kind = map.member_kind(member);
            param_name.push_str(map.member_name(member).unwrap_or(segment));

            let next = match (last, kind) {
                (true, Some(MemberKind::Scalar)) => None,
                (true, _) => {
                    return Err(invalid(format!(
                        "{segment} is not an assignable scalar member"
                    )));
                }
                (false, Some(MemberKind::Nested)) => map.nested_map(member),
                (false, _) => {
                    return Err(invalid(format!("{segment} is not a nested entity")));
                }
            };
            steps.push(Step {
                map: Arc::clone(&map),
                member,
            });
            if let Some(next) = next {
                map = next;
            }
        }

        Ok(Self {
            path: path.to_string(),
            param_name,
            steps,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Parameter name derived from the path: member names concatenated (`AddressName`).
    #[must_use]
    pub fn param_name(&self) -> &str {
        &self.param_name
    }

    fn split_last(&self) -> Result<(&[Step], &Step), SqlMapperError> {
        self.steps
            .split_last()
            .map(|(last, parents)| (parents, last))
            .ok_or_else(|| {
                BindingError::InvalidMemberPath {
                    path: self.path.clone(),
                    reason: "empty path".to_string(),
                }
                .into()
            })
    }

    fn broken(&self) -> SqlMapperError {
        BindingError::InvalidMemberPath {
            path: self.path.clone(),
            reason: "target does not match the resolved type".to_string(),
        }
        .into()
    }

    /// Current value at the end of the path.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidMemberPath`] when `target` is not the resolved type.
    pub fn read(&self, target: &dyn Any) -> Result<ParamValue, SqlMapperError> {
        let (parents, last) = self.split_last()?;
        let mut current = target;
        for step in parents {
            current = step
                .map
                .nested_ref(current, step.member)
                .ok_or_else(|| self.broken())?;
        }
        last.map
            .read(current, last.member)
            .ok_or_else(|| self.broken())
    }

    /// Assign `value` to the member at the end of the path.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidMemberPath`] when `target` is not the resolved type and
    /// a deserialization error when the value does not fit the member.
    pub fn write(&self, target: &mut dyn Any, value: &DbValue) -> Result<(), SqlMapperError> {
        let (parents, last) = self.split_last()?;
        let mut current = target;
        for step in parents {
            current = step
                .map
                .nested_mut(current, step.member)
                .ok_or_else(|| self.broken())?;
        }
        last.map
            .assign(current, last.member, value)
            .map_err(|err| {
                crate::error::DeserializationError::Conversion {
                    ordinal: 0,
                    column: self.param_name.clone(),
                    value: value.to_string(),
                    value_type: value.type_name(),
                    member: self.path.clone(),
                    reason: err.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::map_entity! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Address {
            name: String,
            zip: i32,
        }
    }

    crate::map_entity! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Customer {
            id: i64,
            address: Address,
        }
    }

    #[test]
    fn nested_path_reads_and_writes() {
        let path = MemberPath::resolve::<Customer>("address.name").unwrap();
        assert_eq!(path.param_name(), "addressname");

        let mut customer = Customer::default();
        path.write(&mut customer, &DbValue::Text("Main St".into()))
            .unwrap();
        assert_eq!(customer.address.name, "Main St");
        assert!(matches!(
            path.read(&customer).unwrap(),
            ParamValue::Scalar { value: DbValue::Text(ref s), .. } if s == "Main St"
        ));
    }

    #[test]
    fn path_must_end_at_a_scalar() {
        let err = MemberPath::resolve::<Customer>("address").unwrap_err();
        assert!(matches!(err, BindingError::InvalidMemberPath { .. }));
    }

    #[test]
    fn intermediate_segments_must_be_entities() {
        assert!(MemberPath::resolve::<Customer>("id.value").is_err());
        assert!(MemberPath::resolve::<Customer>("address..zip").is_err());
        assert!(MemberPath::resolve::<Customer>("missing").is_err());
    }

    #[test]
    fn wrong_target_type_is_rejected() {
        let path = MemberPath::resolve::<Customer>("id").unwrap();
        let mut other = Address::default();
        assert!(path.write(&mut other, &DbValue::Int(1)).is_err());
    }
}
