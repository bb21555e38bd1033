use std::collections::HashSet;

use crate::error::{BindingError, SqlMapperError};
use crate::executor::{Command, Parameter};
use crate::params::db_string::default_string_size;
use crate::params::{ParamSource, ParamValue};
use crate::rewrite::{expand_list, literal_names, referenced_parameters, replace_literals};
use crate::settings::Settings;
use crate::types::CommandKind;

/// What the SQL text references, computed once per cached command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamPlan {
    referenced: HashSet<String>,
    literals: Vec<String>,
}

impl ParamPlan {
    #[must_use]
    pub fn analyze(sql: &str) -> Self {
        Self {
            referenced: referenced_parameters(sql),
            literals: literal_names(sql),
        }
    }

    /// True when `[@:?]name` appears as a standalone placeholder.
    #[must_use]
    pub fn references(&self, name: &str) -> bool {
        self.referenced.contains(&name.to_ascii_lowercase())
    }

    #[must_use]
    pub fn literals(&self) -> &[String] {
        &self.literals
    }
}

/// Build a [`Command`] from SQL and a parameter source.
///
/// Text commands drop members the SQL never mentions (unless the source opts out); stored
/// procedures bind every member. Lists are expanded, custom parameters add themselves and
/// `{=name}` literals are substituted last.
///
/// # Errors
/// Returns [`BindingError::UnsupportedType`] for a referenced member with no parameter form,
/// [`SqlMapperError::MissingLiteral`] for a literal with no value, and any error raised by the
/// source or a custom parameter.
pub fn bind(
    sql: &str,
    kind: CommandKind,
    source: Option<&dyn ParamSource>,
    plan: &ParamPlan,
) -> Result<Command, SqlMapperError> {
    let mut command = Command::new(sql);
    command.kind = kind;

    let Some(source) = source else {
        if let Some(name) = plan.literals().first() {
            return Err(SqlMapperError::MissingLiteral(name.clone()));
        }
        return Ok(command);
    };

    let entries = source.entries()?;
    let filter = kind == CommandKind::Text && source.filters_unused();
    let mut text = sql.to_string();

    for entry in &entries {
        if filter && !entry.direction.reads_back() && !plan.references(&entry.name) {
            continue;
        }
        match &entry.value {
            ParamValue::Scalar { value, type_id, .. } => {
                command.add_parameter(Parameter {
                    name: entry.name.clone(),
                    direction: entry.direction,
                    db_type: entry.db_type.or_else(|| Settings::lookup_db_type(*type_id)),
                    size: entry.size.or_else(|| default_string_size(value)),
                    precision: entry.precision,
                    scale: entry.scale,
                    value: value.clone(),
                });
            }
            ParamValue::List {
                values, element, ..
            } => {
                let (rewritten, parameters) = expand_list(&text, &entry.name, values, *element);
                text = rewritten;
                command.parameters.extend(parameters);
            }
            ParamValue::Custom(custom) => custom.add_parameter(&mut command, &entry.name)?,
            ParamValue::Unsupported { type_name } => {
                return Err(BindingError::UnsupportedType {
                    member: entry.name.clone(),
                    type_name,
                }
                .into());
            }
        }
    }

    if !plan.literals().is_empty() {
        text = replace_literals(&text, &entries)?;
    }
    command.sql = text;
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamEntry, ToParam};
    use crate::settings::test_lock;
    use crate::types::{DbType, DbValue};
    use std::any::TypeId;

    struct Probe(Vec<ParamEntry>);

    impl ParamSource for Probe {
        fn shape(&self) -> Option<TypeId> {
            None
        }

        fn entries(&self) -> Result<Vec<ParamEntry>, SqlMapperError> {
            Ok(self.0.clone())
        }
    }

    fn probe() -> Probe {
        Probe(vec![
            ParamEntry::new("id", 7_i32.to_param()),
            ParamEntry::new("name", "bob".to_param()),
            ParamEntry::new("owner", ParamValue::Unsupported { type_name: "User" }),
        ])
    }

    #[test]
    fn unreferenced_members_are_skipped() {
        let _guard = test_lock::lock();
        Settings::reset();
        let sql = "select * from t where id = @id";
        let command =
            bind(sql, CommandKind::Text, Some(&probe()), &ParamPlan::analyze(sql)).unwrap();
        assert_eq!(command.parameters.len(), 1);
        let id = &command.parameters[0];
        assert_eq!(id.value, DbValue::Int(7));
        assert_eq!(id.db_type, Some(DbType::Int32));
    }

    #[test]
    fn referenced_unsupported_member_fails() {
        let sql = "select * from t where owner = @owner";
        let err =
            bind(sql, CommandKind::Text, Some(&probe()), &ParamPlan::analyze(sql)).unwrap_err();
        assert!(matches!(
            err,
            SqlMapperError::Binding(BindingError::UnsupportedType { ref member, .. })
                if member == "owner"
        ));
    }

    #[test]
    fn stored_procedures_bind_everything() {
        let source = Probe(vec![
            ParamEntry::new("id", 7_i32.to_param()),
            ParamEntry::new("name", "bob".to_param()),
        ]);
        let command = bind(
            "get_user",
            CommandKind::StoredProcedure,
            Some(&source),
            &ParamPlan::analyze("get_user"),
        )
        .unwrap();
        assert_eq!(command.parameters.len(), 2);
        assert_eq!(command.parameter("name").unwrap().size, Some(4000));
    }

    #[test]
    fn literals_are_substituted_after_binding() {
        let sql = "select * from t where id = {=id}";
        let command =
            bind(sql, CommandKind::Text, Some(&probe()), &ParamPlan::analyze(sql)).unwrap();
        assert_eq!(command.sql, "select * from t where id = 7");
        assert!(command.parameters.is_empty());
    }

    #[test]
    fn literal_without_source_is_missing() {
        let sql = "select {=x}";
        let err = bind(sql, CommandKind::Text, None, &ParamPlan::analyze(sql)).unwrap_err();
        assert!(matches!(err, SqlMapperError::MissingLiteral(name) if name == "x"));
    }
}
