//! JSON <-> MessagePack conversion for the command line.

use eshet::{Payload, Value};

/// Parse a JSON argument into a payload.
pub fn parse_arg(arg: &str) -> anyhow::Result<Payload> {
    let json: serde_json::Value =
        serde_json::from_str(arg).map_err(|e| anyhow::anyhow!("bad JSON argument {arg:?}: {e}"))?;
    Ok(json_to_payload(json))
}

pub fn json_to_payload(json: serde_json::Value) -> Payload {
    Payload::from(json_to_value(json))
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::from(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                Value::from(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::from(s),
        serde_json::Value::Array(items) => {
            Value::Array(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(key, value)| (Value::from(key), json_to_value(value)))
                .collect(),
        ),
    }
}

/// Render a payload as a JSON line.
pub fn payload_to_string(payload: &Payload) -> String {
    value_to_json(payload.value()).to_string()
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::from(*b),
        Value::Integer(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::from(u)
            } else {
                float_to_json(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::F32(x) => float_to_json(f64::from(*x)),
        Value::F64(x) => float_to_json(*x),
        Value::String(s) => match s.as_str() {
            Some(s) => serde_json::Value::from(s),
            None => serde_json::Value::from(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        },
        Value::Binary(bytes) => serde_json::Value::Array(
            bytes.iter().map(|&b| serde_json::Value::from(b)).collect(),
        ),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(key, value)| {
                    let key = match key {
                        Value::String(s) if s.as_str().is_some() => {
                            s.as_str().unwrap_or_default().to_owned()
                        }
                        other => other.to_string(),
                    };
                    (key, value_to_json(value))
                })
                .collect(),
        ),
        Value::Ext(tag, data) => serde_json::Value::Array(vec![
            serde_json::Value::from(*tag),
            serde_json::Value::Array(data.iter().map(|&b| serde_json::Value::from(b)).collect()),
        ]),
    }
}

fn float_to_json(x: f64) -> serde_json::Value {
    serde_json::Number::from_f64(x)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        for json in ["null", "true", "5", "-3", "2.5", "\"hi\""] {
            let payload = parse_arg(json).unwrap();
            assert_eq!(payload_to_string(&payload), json);
        }
    }

    #[test]
    fn containers_round_trip() {
        let json = r#"[1,"two",{"three":3}]"#;
        let payload = parse_arg(json).unwrap();
        assert_eq!(payload_to_string(&payload), json);
    }

    #[test]
    fn bad_json_is_an_error() {
        assert!(parse_arg("{nope").is_err());
    }
}
