// Casters - per-cell value conversions used by `cast_values`

use std::rc::Rc;

use chrono::{NaiveDate, NaiveDateTime};

use crate::domain::Value;
use crate::error::{AppError, Result};

/// Converts one cell
pub type Caster = Rc<dyn Fn(&Value) -> Result<Value>>;

fn caster(f: impl Fn(&Value) -> Result<Value> + 'static) -> Caster {
    Rc::new(f)
}

fn text_of<'v>(value: &'v Value, caster: &str) -> Result<&'v str> {
    value.as_text().map(str::trim).ok_or_else(|| {
        AppError::Data(format!("{} expects text, got {:?}", caster, value))
    })
}

/// Parse text as a date, trying each format in turn
///
/// Dates pass through unchanged, date-times are truncated to their date.
pub fn to_date(formats: &[&str]) -> Caster {
    let formats: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
    caster(move |value: &Value| match value {
        Value::Date(d) => Ok(Value::Date(*d)),
        Value::DateTime(dt) => Ok(Value::Date(dt.date())),
        other => {
            let text = text_of(other, "to_date")?;
            formats
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
                .map(Value::Date)
                .ok_or_else(|| {
                    let tried: Vec<String> = formats.iter().map(|f| format!("'{}'", f)).collect();
                    AppError::Data(format!(
                        "time data '{}' does not match any of the formats {}",
                        text,
                        tried.join(", ")
                    ))
                })
        }
    })
}

/// Parse text as a date-time with the first matching format
pub fn to_datetime(formats: &[&str]) -> Caster {
    let formats: Vec<String> = formats.iter().map(|f| f.to_string()).collect();
    caster(move |value: &Value| match value {
        Value::DateTime(dt) => Ok(Value::DateTime(*dt)),
        other => {
            let text = text_of(other, "to_datetime")?;
            formats
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .map(Value::DateTime)
                .ok_or_else(|| {
                    AppError::Data(format!("'{}' does not match any date-time format", text))
                })
        }
    })
}

/// Render a date or date-time as text
pub fn from_date(format: &str) -> Caster {
    let format = format.to_string();
    caster(move |value: &Value| match value {
        Value::Date(d) => Ok(Value::Text(d.format(&format).to_string())),
        Value::DateTime(dt) => Ok(Value::Text(dt.format(&format).to_string())),
        other => Err(AppError::Data(format!("from_date expects a date, got {:?}", other))),
    })
}

/// `"£1,234.50"` -> `1234.5`
pub fn from_gbp() -> Caster {
    caster(|value: &Value| match value {
        Value::Integer(i) => Ok(Value::Decimal(*i as f64)),
        Value::Decimal(d) => Ok(Value::Decimal(*d)),
        other => {
            let cleaned = text_of(other, "from_gbp")?.replace(['£', ','], "");
            cleaned
                .trim()
                .parse::<f64>()
                .map(Value::Decimal)
                .map_err(|_| AppError::Data(format!("'{}' is not an amount in GBP", cleaned)))
        }
    })
}

pub fn to_integer() -> Caster {
    caster(|value: &Value| match value {
        Value::Integer(i) => Ok(Value::Integer(*i)),
        other => {
            let text = text_of(other, "to_integer")?;
            text.parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| AppError::Data(format!("'{}' is not an integer", text)))
        }
    })
}

pub fn to_decimal() -> Caster {
    caster(|value: &Value| match value {
        Value::Integer(i) => Ok(Value::Decimal(*i as f64)),
        Value::Decimal(d) => Ok(Value::Decimal(*d)),
        other => {
            let text = text_of(other, "to_decimal")?;
            text.parse::<f64>()
                .map(Value::Decimal)
                .map_err(|_| AppError::Data(format!("'{}' is not a decimal", text)))
        }
    })
}

/// Apply `caster` unless the value is null or blank, which becomes `Null`
pub fn cast_if_not_empty(inner: Caster) -> Caster {
    caster(move |value: &Value| {
        if value.is_empty() {
            Ok(Value::Null)
        } else {
            inner(value)
        }
    })
}

/// Undo the E-notation a spreadsheet applies to account numbers
///
/// An account number like `3142E24` is read as a number and rendered as
/// `3.142e+27`. The mantissa is multiplied by a thousand and the exponent
/// lowered by three to get the original text back. Values without `e+` are
/// returned trimmed.
pub fn fix_account_number() -> Caster {
    caster(|value: &Value| {
        let text = text_of(value, "fix_account_number")?;
        let lowered = text.to_lowercase();
        let Some((base, exponent)) = lowered.split_once("e+") else {
            return Ok(Value::text(text));
        };

        let invalid = || {
            AppError::Data(format!(
                "scientific notation account number '{}' was not originally 7 digits long",
                text
            ))
        };
        let base: f64 = base.parse().map_err(|_| invalid())?;
        let exponent: i64 = exponent.parse().map_err(|_| invalid())?;

        let first_part = base * 1000.0;
        let second_part = exponent - 3;
        if first_part.floor() != first_part || second_part < 10 {
            return Err(invalid());
        }
        Ok(Value::Text(format!("{:.0}E{}", first_part, second_part)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Value {
        Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_to_date_tries_formats_in_order() {
        let cast = to_date(&["%d/%m/%Y", "%Y-%m-%d"]);
        assert_eq!(cast(&Value::text("01/03/2016")).unwrap(), date(2016, 3, 1));
        assert_eq!(cast(&Value::text(" 2016-03-02 ")).unwrap(), date(2016, 3, 2));

        let err = cast(&Value::text("March 1st")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Data error: time data 'March 1st' does not match any of the formats '%d/%m/%Y', '%Y-%m-%d'"
        );
    }

    #[test]
    fn test_from_date() {
        let cast = from_date("%d %b %Y");
        assert_eq!(cast(&date(2016, 3, 1)).unwrap(), Value::text("01 Mar 2016"));
        assert!(cast(&Value::text("2016-03-01")).is_err());
    }

    #[test]
    fn test_from_gbp() {
        let cast = from_gbp();
        assert_eq!(cast(&Value::text("£1,234.50")).unwrap(), Value::Decimal(1234.5));
        assert_eq!(cast(&Value::Integer(3)).unwrap(), Value::Decimal(3.0));
        assert!(cast(&Value::text("n/a")).is_err());
    }

    #[test]
    fn test_numbers() {
        assert_eq!(to_integer()(&Value::text(" 42 ")).unwrap(), Value::Integer(42));
        assert!(to_integer()(&Value::text("4.2")).is_err());
        assert_eq!(to_decimal()(&Value::text("4.25")).unwrap(), Value::Decimal(4.25));
    }

    #[test]
    fn test_cast_if_not_empty() {
        let cast = cast_if_not_empty(to_integer());
        assert_eq!(cast(&Value::text("  ")).unwrap(), Value::Null);
        assert_eq!(cast(&Value::Null).unwrap(), Value::Null);
        assert_eq!(cast(&Value::text("7")).unwrap(), Value::Integer(7));
    }

    #[test]
    fn test_fix_account_number() {
        let fix = fix_account_number();
        assert_eq!(fix(&Value::text("3.142e+27")).unwrap(), Value::text("3142E24"));
        assert_eq!(fix(&Value::text("3.142E+27")).unwrap(), Value::text("3142E24"));
        assert_eq!(fix(&Value::text(" 00123456 ")).unwrap(), Value::text("00123456"));
        assert!(fix(&Value::text("3.1425e+27")).is_err());
        assert!(fix(&Value::text("3.142e+12")).is_err());
    }
}
