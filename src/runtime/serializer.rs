//! Renders values in Vesper literal syntax. `print` uses the unquoted
//! form (a top-level string prints bare); `serialize` quotes strings so the
//! output parses back through the language pipeline.

use crate::runtime::value::Value;

pub fn serialize(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, false);
    out
}

pub fn serialize_quoted(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value, true);
    out
}

fn write_value(out: &mut String, value: &Value, quote_strings: bool) {
    match value {
        Value::Int(v) => out.push_str(&v.to_string()),
        Value::Float(v) => write_float(out, *v),
        Value::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
        Value::String(v) => {
            if quote_strings {
                write_quoted(out, v);
            } else {
                out.push_str(v);
            }
        }
        Value::List(list) => {
            out.push('[');
            for (i, element) in list.borrow().elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, element, true);
            }
            out.push(']');
        }
        Value::Hash(hash) => {
            out.push('{');
            for (i, (key, entry)) in hash.borrow().entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_quoted(out, key);
                out.push_str(": ");
                write_value(out, entry, true);
            }
            out.push('}');
        }
        Value::Object(obj) => {
            let obj = obj.borrow();
            match &obj.identifier {
                Some(id) => out.push_str(&format!("<object {} ({id})>", obj.class_name)),
                None => out.push_str(&format!("<object {}>", obj.class_name)),
            }
        }
        Value::ClassRef(name) => out.push_str(&format!("<class {name}>")),
        Value::LambdaRef(id) => out.push_str(&format!("<lambda {id}>")),
    }
}

// A whole float keeps one fractional digit so the text re-parses as a
// float, not an integer.
fn write_float(out: &mut String, value: f64) {
    if value.fract() == 0.0 && value.is_finite() {
        out.push_str(&format!("{value:.1}"));
    } else {
        out.push_str(&value.to_string());
    }
}

fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn top_level_strings_print_bare_but_serialize_quoted() {
        let value = Value::String("hi".into());
        assert_eq!(serialize(&value), "hi");
        assert_eq!(serialize_quoted(&value), "\"hi\"");
    }

    #[test]
    fn lists_and_hashes_render_in_literal_syntax() {
        let list = Value::list(vec![
            Value::Int(1),
            Value::String("two".into()),
            Value::Bool(true),
        ]);
        assert_eq!(serialize(&list), "[1, \"two\", true]");

        let mut entries = IndexMap::new();
        entries.insert("b".to_string(), Value::Int(1));
        entries.insert("a".to_string(), Value::list(vec![Value::Int(2)]));
        let hash = Value::hash(entries);
        assert_eq!(serialize(&hash), "{\"b\": 1, \"a\": [2]}");
    }

    #[test]
    fn whole_floats_keep_a_fractional_digit() {
        assert_eq!(serialize(&Value::Float(2.0)), "2.0");
        assert_eq!(serialize(&Value::Float(2.5)), "2.5");
    }

    #[test]
    fn string_escapes_round_trip() {
        let value = Value::String("a\"b\\c\n".into());
        assert_eq!(serialize_quoted(&value), "\"a\\\"b\\\\c\\n\"");
    }
}
