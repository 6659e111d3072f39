//! Positional parameter substitution for prepared statements.
//!
//! The remote service takes literal PartiQL text, so `?` placeholders are
//! interpolated client-side. Placeholders inside single-quoted string
//! literals are left alone; string parameters are escaped by doubling
//! embedded quotes.

use dynosql_client::AttributeValue;

use crate::error::DriverError;
use crate::error::Result;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    I64(i64),
    F64(f64),
    Bool(bool),
    Null,
}

impl ParamValue {
    fn render(&self) -> String {
        match self {
            ParamValue::Str(text) => format!("'{}'", text.replace('\'', "''")),
            ParamValue::I64(value) => value.to_string(),
            ParamValue::F64(value) => value.to_string(),
            ParamValue::Bool(value) => value.to_string(),
            ParamValue::Null => "NULL".to_string(),
        }
    }
}

/// Replace each `?` outside string literals with the matching parameter.
///
/// Errors when the placeholder and parameter counts disagree.
pub fn substitute_params(sql: &str, params: &[ParamValue]) -> Result<String> {
    let mut output = String::with_capacity(sql.len() + params.len() * 8);
    let mut next_param = 0usize;
    let mut in_string = false;

    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                output.push(ch);
            }
            '?' if !in_string => {
                let param = params.get(next_param).ok_or_else(|| {
                    DriverError::Validation {
                        message: format!(
                            "statement has more placeholders than the {} bound parameter(s)",
                            params.len()
                        ),
                    }
                })?;
                output.push_str(&param.render());
                next_param += 1;
            }
            _ => output.push(ch),
        }
    }

    if next_param != params.len() {
        return Err(DriverError::Validation {
            message: format!(
                "{} parameter(s) bound but statement has {next_param} placeholder(s)",
                params.len()
            ),
        });
    }
    Ok(output)
}

/// Render an attribute value as a PartiQL literal, for synthesized DML.
///
/// Binary values and sets have no portable literal form and are rejected.
pub fn attribute_literal(value: &AttributeValue) -> Result<String> {
    match value {
        AttributeValue::S(text) => Ok(format!("'{}'", text.replace('\'', "''"))),
        AttributeValue::N(number) => Ok(number.clone()),
        AttributeValue::Bool(flag) => Ok(flag.to_string()),
        AttributeValue::Null => Ok("NULL".to_string()),
        AttributeValue::L(values) => {
            let rendered: Result<Vec<String>> = values.iter().map(attribute_literal).collect();
            Ok(format!("[{}]", rendered?.join(", ")))
        }
        AttributeValue::M(map) => {
            let mut entries = Vec::with_capacity(map.len());
            for (name, value) in map {
                entries.push(format!(
                    "'{}': {}",
                    name.replace('\'', "''"),
                    attribute_literal(value)?
                ));
            }
            Ok(format!("{{{}}}", entries.join(", ")))
        }
        AttributeValue::B(_)
        | AttributeValue::Bs(_)
        | AttributeValue::Ss(_)
        | AttributeValue::Ns(_) => Err(DriverError::unsupported(format!(
            "cannot render a {} value as a PartiQL literal",
            value.tag()
        ))),
    }
}
