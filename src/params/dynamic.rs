use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::error::{BindingError, SqlMapperError};
use crate::executor::{OutputValues, output_value};
use crate::mapping::{Entity, FromDbValue};
use crate::params::{MemberPath, ParamEntry, ParamSource, ParamValue, ToParam};
use crate::types::{DbType, DbValue, ParameterDirection};

/// Descriptor overrides for one parameter added through [`DynamicParameters::add_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamOptions {
    pub direction: ParameterDirection,
    pub db_type: Option<DbType>,
    pub size: Option<i32>,
    pub precision: Option<u8>,
    pub scale: Option<u8>,
}

impl ParamOptions {
    #[must_use]
    pub fn direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    #[must_use]
    pub fn size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }
}

type WriteBack = Box<dyn Fn(&DbValue) -> Result<(), SqlMapperError> + Send + Sync>;

struct OutputTarget {
    param_name: String,
    write: WriteBack,
}

/// An explicit bag of named parameters with descriptors, templates and output wiring.
///
/// Unlike entity parameters, members the SQL does not reference are kept unless
/// [`remove_unused`](Self::remove_unused) is set.
///
/// ```rust
/// use sql_mapper::prelude::*;
///
/// let mut params = DynamicParameters::new();
/// params.add("id", 5_i32);
/// params.add_with(
///     "total",
///     DbValue::Null,
///     ParamOptions::default().direction(ParameterDirection::Output).db_type(DbType::Int64),
/// );
/// assert_eq!(params.get::<i32>("id").unwrap(), 5);
/// ```
pub struct DynamicParameters {
    parameters: Vec<ParamEntry>,
    outputs: Vec<OutputTarget>,
    values: RwLock<OutputValues>,
    remove_unused: bool,
}

impl Default for DynamicParameters {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DynamicParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicParameters")
            .field("parameters", &self.parameters)
            .field("outputs", &self.outputs.len())
            .field("remove_unused", &self.remove_unused)
            .finish()
    }
}

impl Clone for DynamicParameters {
    /// Clones the parameter descriptors; output targets and returned values are not carried.
    fn clone(&self) -> Self {
        Self {
            parameters: self.parameters.clone(),
            outputs: Vec::new(),
            values: RwLock::new(OutputValues::new()),
            remove_unused: self.remove_unused,
        }
    }
}

impl DynamicParameters {
    #[must_use]
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
            outputs: Vec::new(),
            values: RwLock::new(OutputValues::new()),
            remove_unused: false,
        }
    }

    /// Drop parameters the SQL never references, as entity parameters do.
    pub fn remove_unused(&mut self, enabled: bool) -> &mut Self {
        self.remove_unused = enabled;
        self
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.parameters
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }

    fn upsert(&mut self, entry: ParamEntry) {
        match self.position(&entry.name) {
            Some(idx) => self.parameters[idx] = entry,
            None => self.parameters.push(entry),
        }
    }

    /// Add an input parameter, replacing any parameter with the same name.
    pub fn add<V: ToParam>(&mut self, name: &str, value: V) -> &mut Self {
        self.upsert(ParamEntry::new(ParamEntry::clean_name(name), value.to_param()));
        self
    }

    /// Add a parameter with explicit direction, type, size, precision and scale.
    pub fn add_with<V: ToParam>(
        &mut self,
        name: &str,
        value: V,
        options: ParamOptions,
    ) -> &mut Self {
        let mut entry = ParamEntry::new(ParamEntry::clean_name(name), value.to_param());
        entry.direction = options.direction;
        entry.db_type = options.db_type;
        entry.size = options.size;
        entry.precision = options.precision;
        entry.scale = options.scale;
        self.upsert(entry);
        self
    }

    /// Merge every parameter of `template`. Names already present are kept.
    ///
    /// # Errors
    /// Propagates any error raised while the template produces its entries.
    pub fn add_dynamic_params<P: ParamSource + ?Sized>(
        &mut self,
        template: &P,
    ) -> Result<&mut Self, SqlMapperError> {
        for entry in template.entries()? {
            if self.position(&entry.name).is_none() {
                self.parameters.push(entry);
            }
        }
        Ok(self)
    }

    /// Parameter names in the order they were added.
    #[must_use]
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.iter().map(|p| p.name.as_str()).collect()
    }

    /// Value of a parameter: the value returned by the last execution for output parameters,
    /// otherwise the value that was added.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidParameter`] for unknown names or list values, and a
    /// conversion error when the value does not fit `T`.
    pub fn get<T: FromDbValue>(&self, name: &str) -> Result<T, SqlMapperError> {
        let name = ParamEntry::clean_name(name);
        {
            let values = match self.values.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(value) = output_value(&values, name) {
                return T::from_db_value(value).map_err(|err| conversion(name, value, &err));
            }
        }
        let idx = self.position(name).ok_or_else(|| BindingError::InvalidParameter {
            name: name.to_string(),
            reason: "no parameter with this name was added".to_string(),
        })?;
        match &self.parameters[idx].value {
            ParamValue::Scalar { value, .. } => {
                T::from_db_value(value).map_err(|err| conversion(name, value, &err))
            }
            other => Err(BindingError::InvalidParameter {
                name: name.to_string(),
                reason: format!("a {} value cannot be read back", other.type_name()),
            }
            .into()),
        }
    }

    /// Bind the member at `path` of `target` as an input-output parameter and write the
    /// returned value back into it once the command completes. Returns the parameter name.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidMemberPath`] when the path does not resolve to a scalar
    /// member of `T`.
    pub fn output<T: Entity>(
        &mut self,
        target: &Arc<Mutex<T>>,
        path: &str,
    ) -> Result<String, SqlMapperError> {
        self.output_with(target, path, ParamOptions::default())
    }

    /// [`output`](Self::output) with explicit type, size and precision. An `Input` direction
    /// is promoted to `InputOutput`.
    ///
    /// # Errors
    /// Returns [`BindingError::InvalidMemberPath`] when the path does not resolve.
    pub fn output_with<T: Entity>(
        &mut self,
        target: &Arc<Mutex<T>>,
        path: &str,
        options: ParamOptions,
    ) -> Result<String, SqlMapperError> {
        let member_path = MemberPath::resolve::<T>(path)?;
        let param_name = member_path.param_name().to_string();
        let current = {
            let guard = match target.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            member_path.read(&*guard)?
        };

        let direction = match options.direction {
            ParameterDirection::Input => ParameterDirection::InputOutput,
            other => other,
        };
        self.add_with(&param_name, current, ParamOptions { direction, ..options });

        let target = Arc::clone(target);
        self.outputs.push(OutputTarget {
            param_name: param_name.clone(),
            write: Box::new(move |value| {
                let mut guard = match target.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                member_path.write(&mut *guard, value)
            }),
        });
        Ok(param_name)
    }
}

fn conversion(
    name: &str,
    value: &DbValue,
    err: &crate::error::ConversionError,
) -> SqlMapperError {
    crate::error::DeserializationError::Conversion {
        ordinal: 0,
        column: name.to_string(),
        value: value.to_string(),
        value_type: value.type_name(),
        member: name.to_string(),
        reason: err.reason.clone(),
    }
    .into()
}

impl ParamSource for DynamicParameters {
    fn shape(&self) -> Option<TypeId> {
        None
    }

    fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
        Ok(self.parameters.clone())
    }

    fn filters_unused(&self) -> bool {
        self.remove_unused
    }

    fn on_completed(&self, outputs: &OutputValues) -> Result<(), SqlMapperError> {
        {
            let mut values = match self.values.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (name, value) in outputs {
                values.insert(ParamEntry::clean_name(name).to_string(), value.clone());
            }
        }
        for target in &self.outputs {
            if let Some(value) = output_value(outputs, &target.param_name)
                .or_else(|| output_value(outputs, &format!("@{}", target.param_name)))
            {
                debug!(parameter = %target.param_name, "writing output value back");
                (target.write)(value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::map_entity! {
        #[derive(Debug, Default, Clone, PartialEq)]
        struct Order {
            id: i64,
            total: f64,
        }
    }

    #[test]
    fn later_adds_replace_earlier_ones() {
        let mut params = DynamicParameters::new();
        params.add("@id", 1_i32).add("id", 2_i32);
        assert_eq!(params.parameter_names(), vec!["id"]);
        assert_eq!(params.get::<i32>("id").unwrap(), 2);
    }

    #[test]
    fn templates_do_not_override_explicit_values() {
        let mut params = DynamicParameters::new();
        params.add("id", 9_i64);
        params
            .add_dynamic_params(&Order { id: 1, total: 2.5 })
            .unwrap();
        assert_eq!(params.parameter_names(), vec!["id", "total"]);
        assert_eq!(params.get::<i64>("id").unwrap(), 9);
    }

    #[test]
    fn outputs_write_back_after_completion_only() {
        let order = Arc::new(Mutex::new(Order { id: 3, total: 0.0 }));
        let mut params = DynamicParameters::new();
        let name = params.output(&order, "total").unwrap();
        assert_eq!(name, "total");
        assert_eq!(params.entries().unwrap()[0].direction, ParameterDirection::InputOutput);
        assert!((order.lock().unwrap().total - 0.0).abs() < f64::EPSILON);

        let mut outputs = OutputValues::new();
        outputs.insert("@total".to_string(), DbValue::Float(41.5));
        params.on_completed(&outputs).unwrap();
        assert!((order.lock().unwrap().total - 41.5).abs() < f64::EPSILON);
        assert!((params.get::<f64>("total").unwrap() - 41.5).abs() < f64::EPSILON);
    }

    #[test]
    fn bad_output_path_fails_at_registration() {
        let order = Arc::new(Mutex::new(Order::default()));
        let mut params = DynamicParameters::new();
        assert!(matches!(
            params.output(&order, "missing"),
            Err(SqlMapperError::Binding(BindingError::InvalidMemberPath { .. }))
        ));
    }

    #[test]
    fn unknown_names_are_reported() {
        let params = DynamicParameters::new();
        assert!(params.get::<i32>("nope").is_err());
    }
}
