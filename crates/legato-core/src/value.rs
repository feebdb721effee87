//! Dynamically typed values carried by events, plus the value transform service.
//!
//! A [`Value`] is a tagged union over the scalar kinds controls exchange, a
//! string, a weak reference to a control (for "value changed" notifications),
//! a property-change record and an opaque boxed payload. [`Value::convert`] is
//! the transform service used by dispatch to coerce an incoming value to a
//! receiver's native [`ValueType`].

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::control::WeakControl;
use crate::controls::prop::PropChange;

/// Identity of an opaque boxed payload type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxedType {
    id: TypeId,
    name: &'static str,
}

impl BoxedType {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for BoxedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Char,
    UChar,
    Int,
    UInt,
    Long,
    ULong,
    Int64,
    UInt64,
    Float,
    Double,
    String,
    Control,
    PropChange,
    Boxed(BoxedType),
}

impl ValueType {
    pub fn boxed<T: Any>() -> Self {
        ValueType::Boxed(BoxedType::of::<T>())
    }

    /// Bool and every integer and floating point kind.
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, ValueType::Float | ValueType::Double)
    }

    /// Bool counts as an integer kind.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueType::Bool
                | ValueType::Char
                | ValueType::UChar
                | ValueType::Int
                | ValueType::UInt
                | ValueType::Long
                | ValueType::ULong
                | ValueType::Int64
                | ValueType::UInt64
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Char => "char",
            ValueType::UChar => "uchar",
            ValueType::Int => "int",
            ValueType::UInt => "uint",
            ValueType::Long => "long",
            ValueType::ULong => "ulong",
            ValueType::Int64 => "int64",
            ValueType::UInt64 => "uint64",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::String => "string",
            ValueType::Control => "control",
            ValueType::PropChange => "prop-change",
            ValueType::Boxed(ty) => return write!(f, "boxed<{}>", ty.name),
        };
        f.write_str(name)
    }
}

/// Shared opaque payload. Clones share the same allocation.
#[derive(Clone)]
pub struct BoxedValue {
    ty: BoxedType,
    data: Arc<dyn Any + Send + Sync>,
}

impl BoxedValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            ty: BoxedType::of::<T>(),
            data: Arc::new(value),
        }
    }

    pub fn boxed_type(&self) -> BoxedType {
        self.ty
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxedValue<{}>", self.ty.name)
    }
}

impl PartialEq for BoxedValue {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && Arc::ptr_eq(&self.data, &other.data)
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Char(i8),
    UChar(u8),
    Int(i32),
    UInt(u32),
    Long(i64),
    ULong(u64),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// Payload of a "value changed" event: the control whose value changed.
    Control(WeakControl),
    PropChange(Arc<PropChange>),
    Boxed(BoxedValue),
}

// Intermediate numeric representation used for casts.
#[derive(Clone, Copy)]
enum Num {
    I(i64),
    U(u64),
    F(f64),
}

impl Value {
    pub fn boxed<T: Any + Send + Sync>(value: T) -> Self {
        Value::Boxed(BoxedValue::new(value))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Char(_) => ValueType::Char,
            Value::UChar(_) => ValueType::UChar,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Long(_) => ValueType::Long,
            Value::ULong(_) => ValueType::ULong,
            Value::Int64(_) => ValueType::Int64,
            Value::UInt64(_) => ValueType::UInt64,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Control(_) => ValueType::Control,
            Value::PropChange(_) => ValueType::PropChange,
            Value::Boxed(b) => ValueType::Boxed(b.ty),
        }
    }

    /// Zero value of a scalar or string type.
    pub fn default_for(ty: ValueType) -> Option<Value> {
        match ty {
            ValueType::String => Some(Value::String(String::new())),
            _ => Value::from_f64(ty, 0.0),
        }
    }

    /// Cast a float into a numeric type.
    pub fn from_f64(ty: ValueType, v: f64) -> Option<Value> {
        Self::from_num(ty, Num::F(v))
    }

    pub fn as_f64(&self) -> Option<f64> {
        Some(match self.as_num()? {
            Num::I(v) => v as f64,
            Num::U(v) => v as f64,
            Num::F(v) => v,
        })
    }

    pub fn as_i64(&self) -> Option<i64> {
        Some(match self.as_num()? {
            Num::I(v) => v,
            Num::U(v) => v as i64,
            Num::F(v) => v as i64,
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Boxed(b) => b.downcast_ref::<T>(),
            _ => None,
        }
    }

    fn as_num(&self) -> Option<Num> {
        Some(match *self {
            Value::Bool(v) => Num::I(v as i64),
            Value::Char(v) => Num::I(v as i64),
            Value::UChar(v) => Num::I(v as i64),
            Value::Int(v) => Num::I(v as i64),
            Value::UInt(v) => Num::I(v as i64),
            Value::Long(v) | Value::Int64(v) => Num::I(v),
            Value::ULong(v) | Value::UInt64(v) => Num::U(v),
            Value::Float(v) => Num::F(v as f64),
            Value::Double(v) => Num::F(v),
            _ => return None,
        })
    }

    fn from_num(ty: ValueType, n: Num) -> Option<Value> {
        macro_rules! cast {
            ($t:ty) => {
                match n {
                    Num::I(v) => v as $t,
                    Num::U(v) => v as $t,
                    Num::F(v) => v as $t,
                }
            };
        }
        Some(match ty {
            ValueType::Bool => Value::Bool(match n {
                Num::I(v) => v != 0,
                Num::U(v) => v != 0,
                Num::F(v) => v != 0.0,
            }),
            ValueType::Char => Value::Char(cast!(i8)),
            ValueType::UChar => Value::UChar(cast!(u8)),
            ValueType::Int => Value::Int(cast!(i32)),
            ValueType::UInt => Value::UInt(cast!(u32)),
            ValueType::Long => Value::Long(cast!(i64)),
            ValueType::ULong => Value::ULong(cast!(u64)),
            ValueType::Int64 => Value::Int64(cast!(i64)),
            ValueType::UInt64 => Value::UInt64(cast!(u64)),
            ValueType::Float => Value::Float(cast!(f32)),
            ValueType::Double => Value::Double(cast!(f64)),
            _ => return None,
        })
    }

    /// Convert to `to`, or `None` when no transform exists between the two types.
    ///
    /// Numeric casts follow C semantics (wrap on narrowing integers, truncate
    /// floats toward zero). Strings parse into numbers leniently: the longest
    /// numeric prefix is used and garbage yields zero.
    pub fn convert(&self, to: ValueType) -> Option<Value> {
        if self.value_type() == to {
            return Some(self.clone());
        }
        if let Some(n) = self.as_num() {
            if to == ValueType::String {
                return Some(Value::String(match self {
                    Value::Bool(b) => b.to_string(),
                    Value::Float(v) => v.to_string(),
                    Value::Double(v) => v.to_string(),
                    _ => match n {
                        Num::I(v) => v.to_string(),
                        Num::U(v) => v.to_string(),
                        Num::F(v) => v.to_string(),
                    },
                }));
            }
            return Self::from_num(to, n);
        }
        match (self, to) {
            (Value::String(_), ValueType::Bool) => None,
            (Value::String(s), t) if t.is_integer() => Self::from_num(t, Num::I(parse_int(s))),
            (Value::String(s), ValueType::Float | ValueType::Double) => {
                Self::from_num(to, Num::F(parse_float(s)))
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::UChar(a), Value::UChar(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::UInt(a), Value::UInt(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::ULong(a), Value::ULong(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Control(a), Value::Control(b)) => a.ptr_eq(b),
            (Value::PropChange(a), Value::PropChange(b)) => a == b,
            (Value::Boxed(a), Value::Boxed(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(v)
            }
        })*
    };
}

impl_from! {
    bool => Bool,
    i8 => Char,
    u8 => UChar,
    i32 => Int,
    u32 => UInt,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float,
    f64 => Double,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

/// Base-10 integer prefix parse with `strtol` leniency.
fn parse_int(s: &str) -> i64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return 0;
    }
    // Saturate like strtol does on overflow.
    s[..end].parse::<i64>().unwrap_or(if bytes[0] == b'-' {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn parse_float(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return v;
    }
    let prefix_len = s
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .count();
    (1..=prefix_len)
        .rev()
        .find_map(|len| s[..len].parse::<f64>().ok())
        .unwrap_or(0.0)
}
