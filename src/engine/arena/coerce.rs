//! Type conversions and comparisons on engine values
//!
//! These follow the usual script conversion rules closely enough for the
//! dialect: `ToBoolean`, `ToNumber`, `ToString`, strict and loose equality.

use super::builtins::Native;
use super::heap::Arena;
use super::object::{ObjectClass, CLOSURE_CODE, NATIVE_ID};
use super::value::Slot;

/// Render a number the way scripts print it.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{:.0}", n)
    } else {
        format!("{}", n)
    }
}

/// Parse a string the way `Number(text)` does.
pub(crate) fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // Rust accepts these spellings, scripts do not
        "inf" | "+inf" | "-inf" | "infinity" | "NaN" | "nan" => f64::NAN,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

impl Arena {
    pub(crate) fn to_boolean(&self, slot: Slot) -> bool {
        match slot {
            Slot::Undefined | Slot::Null => false,
            Slot::Bool(b) => b,
            Slot::Number(n) => n != 0.0 && !n.is_nan(),
            Slot::Str(ptr) => !self.string_bytes(ptr).is_empty(),
            Slot::Obj(_) => true,
        }
    }

    pub(crate) fn to_number(&self, slot: Slot) -> f64 {
        match slot {
            Slot::Undefined => f64::NAN,
            Slot::Null => 0.0,
            Slot::Bool(b) => b as u8 as f64,
            Slot::Number(n) => n,
            Slot::Str(ptr) => parse_number(&self.read_string(ptr)),
            Slot::Obj(obj) => match self.object_class(obj) {
                ObjectClass::Array => parse_number(&self.to_display(slot)),
                _ => f64::NAN,
            },
        }
    }

    /// `ToString`
    pub(crate) fn to_display(&self, slot: Slot) -> String {
        self.display_at_depth(slot, 0)
    }

    fn display_at_depth(&self, slot: Slot, depth: usize) -> String {
        match slot {
            Slot::Undefined => "undefined".to_string(),
            Slot::Null => "null".to_string(),
            Slot::Bool(b) => b.to_string(),
            Slot::Number(n) => format_number(n),
            Slot::Str(ptr) => self.read_string(ptr),
            Slot::Obj(obj) => match self.object_class(obj) {
                ObjectClass::Array if depth < 8 => (0..self.array_len(obj))
                    .map(|i| match self.array_get(obj, i) {
                        Slot::Undefined | Slot::Null => String::new(),
                        element => self.display_at_depth(element, depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                ObjectClass::Array => String::new(),
                ObjectClass::Error => self.error_text(obj),
                ObjectClass::Closure => self.read_string(self.aux(obj, CLOSURE_CODE)),
                ObjectClass::Native => {
                    let name = Native::from_id(self.aux(obj, NATIVE_ID)).map_or("", |n| n.name());
                    format!("function {}() {{ [native code] }}", name)
                }
                ObjectClass::Plain | ObjectClass::Scope => "[object Object]".to_string(),
            },
        }
    }

    /// `Name: message` rendering of an error object
    pub(crate) fn error_text(&self, obj: u32) -> String {
        let name = match self.get_own(obj, "name") {
            Some(Slot::Str(ptr)) => self.read_string(ptr),
            _ => "Error".to_string(),
        };
        match self.get_own(obj, "message") {
            Some(Slot::Str(ptr)) if !self.string_bytes(ptr).is_empty() => {
                format!("{}: {}", name, self.read_string(ptr))
            }
            _ => name,
        }
    }

    pub(crate) fn type_name(&self, slot: Slot) -> &'static str {
        match slot {
            Slot::Undefined => "undefined",
            Slot::Null => "object",
            Slot::Bool(_) => "boolean",
            Slot::Number(_) => "number",
            Slot::Str(_) => "string",
            Slot::Obj(obj) if self.object_class(obj).is_callable() => "function",
            Slot::Obj(_) => "object",
        }
    }

    /// `===`
    pub(crate) fn strict_equal(&self, a: Slot, b: Slot) -> bool {
        match (a, b) {
            (Slot::Undefined, Slot::Undefined) | (Slot::Null, Slot::Null) => true,
            (Slot::Bool(x), Slot::Bool(y)) => x == y,
            (Slot::Number(x), Slot::Number(y)) => x == y,
            (Slot::Str(x), Slot::Str(y)) => self.strings_equal(x, y),
            (Slot::Obj(x), Slot::Obj(y)) => x == y,
            _ => false,
        }
    }

    /// `==`
    pub(crate) fn loose_equal(&self, a: Slot, b: Slot) -> bool {
        match (a, b) {
            (Slot::Undefined | Slot::Null, Slot::Undefined | Slot::Null) => true,
            (Slot::Undefined | Slot::Null, _) | (_, Slot::Undefined | Slot::Null) => false,
            (Slot::Number(_), Slot::Str(_)) | (Slot::Str(_), Slot::Number(_)) => {
                self.to_number(a) == self.to_number(b)
            }
            (Slot::Bool(_), _) => self.loose_equal(Slot::Number(self.to_number(a)), b),
            (_, Slot::Bool(_)) => self.loose_equal(a, Slot::Number(self.to_number(b))),
            (Slot::Obj(_), Slot::Str(_) | Slot::Number(_)) => {
                self.to_display(a) == self.to_display(b)
            }
            (Slot::Str(_) | Slot::Number(_), Slot::Obj(_)) => {
                self.to_display(a) == self.to_display(b)
            }
            _ => self.strict_equal(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e20), "100000000000000000000");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number(""), 0.0);
        assert_eq!(parse_number("0x10"), 16.0);
        assert!(parse_number("12px").is_nan());
        assert!(parse_number("inf").is_nan());
        assert_eq!(parse_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_equality() {
        let mut arena = Arena::new(64 * 1024);
        arena.format();
        let one = Slot::Str(arena.alloc_string("1").unwrap());
        let other_one = Slot::Str(arena.alloc_string("1").unwrap());
        assert!(arena.strict_equal(one, other_one));
        assert!(!arena.strict_equal(one, Slot::Number(1.0)));
        assert!(arena.loose_equal(one, Slot::Number(1.0)));
        assert!(arena.loose_equal(Slot::Null, Slot::Undefined));
        assert!(!arena.loose_equal(Slot::Null, Slot::Number(0.0)));
        assert!(arena.loose_equal(Slot::Bool(true), Slot::Number(1.0)));
        assert!(!arena.strict_equal(Slot::Number(f64::NAN), Slot::Number(f64::NAN)));
    }
}
