//! `%s` placeholder substitution.
//!
//! A template uses `%s` for each positional argument and `%%` for a literal
//! percent sign. Any other `%` sequence is rejected. Substitution is purely
//! textual: a `%s` inside a quoted literal in the template is still a
//! placeholder.

use moar_core::{Error, MalformedQueryError, Result, Value};

/// Count the `%s` placeholders in a template.
pub fn count_placeholders(template: &str) -> Result<usize> {
    let mut count = 0;
    let mut chars = template.char_indices();
    while let Some((pos, ch)) = chars.next() {
        if ch != '%' {
            continue;
        }
        match chars.next() {
            Some((_, 's')) => count += 1,
            Some((_, '%')) => {}
            Some((_, other)) => {
                return Err(malformed(
                    template,
                    None,
                    0,
                    format!("unsupported placeholder '%{other}' at byte {pos}"),
                ));
            }
            None => {
                return Err(malformed(
                    template,
                    None,
                    0,
                    "template ends with a lone '%'".to_string(),
                ));
            }
        }
    }
    Ok(count)
}

/// Check that `args` fills the template's placeholders exactly.
pub fn check_arguments(template: &str, args: &[Value]) -> Result<()> {
    let placeholders = count_placeholders(template).map_err(|err| match err {
        Error::Malformed(mut m) => {
            m.arguments = args.len();
            Error::Malformed(m)
        }
        other => other,
    })?;
    if placeholders != args.len() {
        return Err(malformed(
            template,
            Some(placeholders),
            args.len(),
            format!(
                "query has {} placeholder(s) but {} argument(s) were supplied",
                placeholders,
                args.len()
            ),
        ));
    }
    Ok(())
}

/// Substitute every `%s` in `template` with the rendered argument.
///
/// `NULL` and booleans are rendered directly; everything else goes through
/// `escape`. The placeholder count must match `args.len()` exactly.
pub fn prepare_query<F>(template: &str, args: &[Value], escape: F) -> Result<String>
where
    F: Fn(&Value) -> String,
{
    check_arguments(template, args)?;

    let mut result = String::with_capacity(template.len() + args.len() * 16);
    let mut args = args.iter();
    let mut chars = template.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            result.push(ch);
            continue;
        }
        match chars.next() {
            Some('s') => {
                if let Some(arg) = args.next() {
                    result.push_str(&render(arg, &escape));
                }
            }
            Some('%') => result.push('%'),
            // count_placeholders already rejected anything else
            _ => {}
        }
    }
    Ok(result)
}

fn render<F>(value: &Value, escape: &F) -> String
where
    F: Fn(&Value) -> String,
{
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => "0".to_string(),
        other => escape(other),
    }
}

fn malformed(
    template: &str,
    placeholders: Option<usize>,
    arguments: usize,
    message: String,
) -> Error {
    Error::Malformed(MalformedQueryError {
        template: template.to_string(),
        placeholders,
        arguments,
        message,
    })
}
