//! Runtime type descriptors and boxed values used to move arguments across
//! plugin boundaries.
//!
//! Plugins describe event and service signatures with C-like type strings
//! (`"uint32"`, `"char*"`, `"double"`, ...). Each string resolves to a
//! closed set of [`TypeKind`]s; anything the host cannot represent is
//! [`TypeKind::Unknown`] and is carried as an opaque value.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Machine-portable kinds a type string can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Unknown,
    None,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    IntPtr,
    UIntPtr,
    Float,
    Double,
    String,
    WString,
}

impl TypeKind {
    /// Resolves a C-like type string.
    ///
    /// Qualifiers such as `const` are ignored. Integer types may not be
    /// pointers; `char*` is a string and `wchar_t*` a wide string; `void` is
    /// the empty type. Everything else, including pointers to floats or to
    /// `void`, resolves to `Unknown`.
    pub fn from_type_str(type_str: &str) -> TypeKind {
        let stars = type_str.matches('*').count();
        let words: Vec<&str> = type_str
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|w| !w.is_empty() && *w != "const" && *w != "volatile")
            .collect();
        let has = |word: &str| words.contains(&word);

        if has("void") {
            return if stars == 0 { TypeKind::None } else { TypeKind::Unknown };
        }
        if has("float") {
            return if stars == 0 { TypeKind::Float } else { TypeKind::Unknown };
        }
        if has("double") {
            return if stars == 0 { TypeKind::Double } else { TypeKind::Unknown };
        }
        if has("wchar_t") {
            return if stars == 1 { TypeKind::WString } else { TypeKind::Unknown };
        }
        if has("char") {
            return match stars {
                0 if has("unsigned") => TypeKind::UInt8,
                0 => TypeKind::Int8,
                1 => TypeKind::String,
                _ => TypeKind::Unknown,
            };
        }

        let Some(int_word) = words.iter().copied().find(|w| is_integer_word(w)) else {
            return TypeKind::Unknown;
        };
        if stars > 0 {
            return TypeKind::Unknown;
        }

        let unsigned = int_word.starts_with('u') || has("unsigned");
        if int_word.contains("intptr") {
            return if unsigned { TypeKind::UIntPtr } else { TypeKind::IntPtr };
        }

        match (integer_width(int_word), unsigned) {
            (8, false) => TypeKind::Int8,
            (8, true) => TypeKind::UInt8,
            (16, false) => TypeKind::Int16,
            (16, true) => TypeKind::UInt16,
            (64, false) => TypeKind::Int64,
            (64, true) => TypeKind::UInt64,
            (_, false) => TypeKind::Int32,
            (_, true) => TypeKind::UInt32,
        }
    }

    /// Canonical type string for this kind.
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::Unknown => "unknown",
            TypeKind::None => "void",
            TypeKind::Int8 => "int8",
            TypeKind::UInt8 => "uint8",
            TypeKind::Int16 => "int16",
            TypeKind::UInt16 => "uint16",
            TypeKind::Int32 => "int32",
            TypeKind::UInt32 => "uint32",
            TypeKind::Int64 => "int64",
            TypeKind::UInt64 => "uint64",
            TypeKind::IntPtr => "intptr",
            TypeKind::UIntPtr => "uintptr",
            TypeKind::Float => "float",
            TypeKind::Double => "double",
            TypeKind::String => "char*",
            TypeKind::WString => "wchar_t*",
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn is_integer_word(word: &str) -> bool {
    let stem = word.strip_prefix('u').unwrap_or(word);
    let stem = stem.strip_suffix("_t").unwrap_or(stem);
    matches!(word, "unsigned" | "signed")
        || stem == "int"
        || stem == "intptr"
        || stem
            .strip_prefix("int")
            .is_some_and(|bits| matches!(bits, "8" | "16" | "32" | "64"))
}

fn integer_width(word: &str) -> u32 {
    ["64", "32", "16", "8"]
        .iter()
        .find(|bits| word.contains(*bits))
        .and_then(|bits| bits.parse().ok())
        .unwrap_or(32)
}

/// A resolved type together with the text it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    kind: TypeKind,
    text: String,
}

impl TypeSpec {
    pub fn parse(text: &str) -> Self {
        Self {
            kind: TypeKind::from_type_str(text),
            text: text.trim().to_string(),
        }
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Two specs are compatible when their kinds agree. Opaque types must
    /// additionally name the same type, ignoring whitespace.
    pub fn compatible_with(&self, other: &TypeSpec) -> bool {
        if self.kind != other.kind {
            return false;
        }
        self.kind != TypeKind::Unknown || normalized(&self.text) == normalized(&other.text)
    }
}

impl fmt::Display for TypeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn normalized(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Parses a list of type strings.
pub fn parse_types(types: &[&str]) -> Vec<TypeSpec> {
    types.iter().map(|t| TypeSpec::parse(t)).collect()
}

/// Why two signatures or an argument list failed to line up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeMismatch {
    Arity { expected: usize, found: usize },
    Return { expected: String, found: String },
    Argument { index: usize, expected: String, found: String },
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeMismatch::Arity { expected, found } => {
                write!(f, "expected {expected} arguments, found {found}")
            }
            TypeMismatch::Return { expected, found } => {
                write!(f, "return type is {expected}, not {found}")
            }
            TypeMismatch::Argument {
                index,
                expected,
                found,
            } => write!(f, "argument {index} is {expected}, not {found}"),
        }
    }
}

/// Compares a declared argument vector against a requested one, position by position.
pub fn check_signature(declared: &[TypeSpec], requested: &[TypeSpec]) -> Result<(), TypeMismatch> {
    if declared.len() != requested.len() {
        return Err(TypeMismatch::Arity {
            expected: declared.len(),
            found: requested.len(),
        });
    }
    for (index, (d, r)) in declared.iter().zip(requested).enumerate() {
        if !d.compatible_with(r) {
            return Err(TypeMismatch::Argument {
                index,
                expected: d.text().to_string(),
                found: r.text().to_string(),
            });
        }
    }
    Ok(())
}

/// Checks that boxed values match a declared argument vector.
pub fn check_arguments(declared: &[TypeSpec], args: &ArgumentList) -> Result<(), TypeMismatch> {
    if declared.len() != args.len() {
        return Err(TypeMismatch::Arity {
            expected: declared.len(),
            found: args.len(),
        });
    }
    for (index, (spec, value)) in declared.iter().zip(args.iter()).enumerate() {
        if spec.kind() != value.kind() {
            return Err(TypeMismatch::Argument {
                index,
                expected: spec.text().to_string(),
                found: value.kind().name().to_string(),
            });
        }
    }
    Ok(())
}

/// A boxed value of one [`TypeKind`].
#[derive(Clone)]
pub enum Value {
    None,
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    IntPtr(isize),
    UIntPtr(usize),
    Float(f32),
    Double(f64),
    String(String),
    WString(Vec<u16>),
    /// Carrier for types the host cannot represent
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::None,
            Value::Int8(_) => TypeKind::Int8,
            Value::UInt8(_) => TypeKind::UInt8,
            Value::Int16(_) => TypeKind::Int16,
            Value::UInt16(_) => TypeKind::UInt16,
            Value::Int32(_) => TypeKind::Int32,
            Value::UInt32(_) => TypeKind::UInt32,
            Value::Int64(_) => TypeKind::Int64,
            Value::UInt64(_) => TypeKind::UInt64,
            Value::IntPtr(_) => TypeKind::IntPtr,
            Value::UIntPtr(_) => TypeKind::UIntPtr,
            Value::Float(_) => TypeKind::Float,
            Value::Double(_) => TypeKind::Double,
            Value::String(_) => TypeKind::String,
            Value::WString(_) => TypeKind::WString,
            Value::Opaque(_) => TypeKind::Unknown,
        }
    }

    /// Converts text into a value of `kind`. Returns `None` when the text is
    /// not a valid literal or the kind cannot be built from text.
    pub fn parse(kind: TypeKind, text: &str) -> Option<Value> {
        let t = text.trim();
        let value = match kind {
            TypeKind::Int8 => Value::Int8(t.parse().ok()?),
            TypeKind::UInt8 => Value::UInt8(t.parse().ok()?),
            TypeKind::Int16 => Value::Int16(t.parse().ok()?),
            TypeKind::UInt16 => Value::UInt16(t.parse().ok()?),
            TypeKind::Int32 => Value::Int32(t.parse().ok()?),
            TypeKind::UInt32 => Value::UInt32(t.parse().ok()?),
            TypeKind::Int64 => Value::Int64(t.parse().ok()?),
            TypeKind::UInt64 => Value::UInt64(t.parse().ok()?),
            TypeKind::IntPtr => Value::IntPtr(t.parse().ok()?),
            TypeKind::UIntPtr => Value::UIntPtr(t.parse().ok()?),
            TypeKind::Float => Value::Float(t.parse().ok()?),
            TypeKind::Double => Value::Double(t.parse().ok()?),
            TypeKind::String => Value::String(text.to_string()),
            TypeKind::WString => Value::WString(text.encode_utf16().collect()),
            TypeKind::None | TypeKind::Unknown => return None,
        };
        Some(value)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any integer value to `i64`, if it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int8(v) => Some(v.into()),
            Value::UInt8(v) => Some(v.into()),
            Value::Int16(v) => Some(v.into()),
            Value::UInt16(v) => Some(v.into()),
            Value::Int32(v) => Some(v.into()),
            Value::UInt32(v) => Some(v.into()),
            Value::Int64(v) => Some(v),
            Value::UInt64(v) => i64::try_from(v).ok(),
            Value::IntPtr(v) => i64::try_from(v).ok(),
            Value::UIntPtr(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(v) => Some(v.into()),
            Value::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(inner) => inner.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Int8(v) => write!(f, "Int8({v})"),
            Value::UInt8(v) => write!(f, "UInt8({v})"),
            Value::Int16(v) => write!(f, "Int16({v})"),
            Value::UInt16(v) => write!(f, "UInt16({v})"),
            Value::Int32(v) => write!(f, "Int32({v})"),
            Value::UInt32(v) => write!(f, "UInt32({v})"),
            Value::Int64(v) => write!(f, "Int64({v})"),
            Value::UInt64(v) => write!(f, "UInt64({v})"),
            Value::IntPtr(v) => write!(f, "IntPtr({v})"),
            Value::UIntPtr(v) => write!(f, "UIntPtr({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Double(v) => write!(f, "Double({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::WString(v) => write!(f, "WString({:?})", String::from_utf16_lossy(v)),
            Value::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_value_from! {
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    isize => IntPtr,
    usize => UIntPtr,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

/// An ordered list of boxed arguments.
#[derive(Debug, Clone, Default)]
pub struct ArgumentList {
    values: Vec<Value>,
}

impl ArgumentList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, value: impl Into<Value>) -> &mut Self {
        self.values.push(value.into());
        self
    }

    /// Builder variant of [`push`](Self::push).
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.values
    }
}

impl From<Vec<Value>> for ArgumentList {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<Value> for ArgumentList {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_types() {
        assert_eq!(TypeKind::from_type_str("int"), TypeKind::Int32);
        assert_eq!(TypeKind::from_type_str("int8"), TypeKind::Int8);
        assert_eq!(TypeKind::from_type_str("uint8_t"), TypeKind::UInt8);
        assert_eq!(TypeKind::from_type_str("int16_t"), TypeKind::Int16);
        assert_eq!(TypeKind::from_type_str("uint32"), TypeKind::UInt32);
        assert_eq!(TypeKind::from_type_str("int64"), TypeKind::Int64);
        assert_eq!(TypeKind::from_type_str("uint64_t"), TypeKind::UInt64);
        assert_eq!(TypeKind::from_type_str("unsigned int"), TypeKind::UInt32);
        assert_eq!(TypeKind::from_type_str("intptr_t"), TypeKind::IntPtr);
        assert_eq!(TypeKind::from_type_str("uintptr_t"), TypeKind::UIntPtr);
        assert_eq!(TypeKind::from_type_str("const int32_t"), TypeKind::Int32);
    }

    #[test]
    fn test_pointer_rules() {
        assert_eq!(TypeKind::from_type_str("int*"), TypeKind::Unknown);
        assert_eq!(TypeKind::from_type_str("char*"), TypeKind::String);
        assert_eq!(TypeKind::from_type_str("const char *"), TypeKind::String);
        assert_eq!(TypeKind::from_type_str("char**"), TypeKind::Unknown);
        assert_eq!(TypeKind::from_type_str("char"), TypeKind::Int8);
        assert_eq!(TypeKind::from_type_str("unsigned char"), TypeKind::UInt8);
        assert_eq!(TypeKind::from_type_str("wchar_t*"), TypeKind::WString);
        assert_eq!(TypeKind::from_type_str("wchar_t"), TypeKind::Unknown);
        assert_eq!(TypeKind::from_type_str("float"), TypeKind::Float);
        assert_eq!(TypeKind::from_type_str("double*"), TypeKind::Unknown);
        assert_eq!(TypeKind::from_type_str("void"), TypeKind::None);
        assert_eq!(TypeKind::from_type_str("void*"), TypeKind::Unknown);
        assert_eq!(TypeKind::from_type_str("struct point_t*"), TypeKind::Unknown);
    }

    #[test]
    fn test_unknown_specs_compare_by_text() {
        let a = TypeSpec::parse("struct map_t*");
        let b = TypeSpec::parse("struct map_t *");
        let c = TypeSpec::parse("struct tile_t*");
        assert!(a.compatible_with(&b));
        assert!(!a.compatible_with(&c));
        assert!(TypeSpec::parse("int").compatible_with(&TypeSpec::parse("int32_t")));
    }

    #[test]
    fn test_check_signature() {
        let declared = parse_types(&["uint32", "double", "char*"]);
        assert!(check_signature(&declared, &parse_types(&["uint32", "double", "char*"])).is_ok());
        assert_eq!(
            check_signature(&declared, &parse_types(&["uint32", "float", "char*"])),
            Err(TypeMismatch::Argument {
                index: 1,
                expected: "double".into(),
                found: "float".into()
            })
        );
        assert!(matches!(
            check_signature(&declared, &parse_types(&["uint32", "double"])),
            Err(TypeMismatch::Arity { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn test_check_arguments() {
        let declared = parse_types(&["uint32", "char*"]);
        let good = ArgumentList::new().with(7u32).with("seven");
        assert!(check_arguments(&declared, &good).is_ok());

        let wrong_width = ArgumentList::new().with(7u64).with("seven");
        assert!(matches!(
            check_arguments(&declared, &wrong_width),
            Err(TypeMismatch::Argument { index: 0, .. })
        ));
    }

    #[test]
    fn test_value_parse() {
        assert!(matches!(Value::parse(TypeKind::Int8, "-12"), Some(Value::Int8(-12))));
        assert!(Value::parse(TypeKind::UInt8, "300").is_none());
        assert!(Value::parse(TypeKind::Int32, "12abc").is_none());
        assert!(matches!(Value::parse(TypeKind::Double, " 2.5 "), Some(Value::Double(v)) if v == 2.5));
        assert_eq!(
            Value::parse(TypeKind::String, "hello").unwrap().as_str(),
            Some("hello")
        );
        assert!(Value::parse(TypeKind::None, "").is_none());
        assert!(Value::parse(TypeKind::Unknown, "0x1234").is_none());
    }

    #[test]
    fn test_opaque_values() {
        #[derive(Debug, PartialEq)]
        struct Map(u32);

        let value = Value::Opaque(Arc::new(Map(3)));
        assert_eq!(value.kind(), TypeKind::Unknown);
        assert_eq!(value.downcast_ref::<Map>(), Some(&Map(3)));
        assert_eq!(value.downcast_ref::<u32>(), None);
    }
}
