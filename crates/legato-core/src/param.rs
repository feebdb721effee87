//! Parameter descriptors and the numeric limits service.
//!
//! A [`ParamSpec`] describes the legal range of a control's value. Specs move
//! between value types with [`ParamSpec::convert`] (limits are cast into the
//! new kind) or [`ParamSpec::transform`] (limits are mapped through the same
//! function a connection applies to its values).

use serde::{Deserialize, Serialize};

use crate::event::TransformFn;
use crate::value::{Value, ValueType};
use crate::{Error, Result};

/// Descriptor kind, one per scalar value type plus an opaque catch-all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
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
    Opaque,
}

impl ParamKind {
    pub fn from_value_type(ty: ValueType) -> Self {
        match ty {
            ValueType::Bool => ParamKind::Bool,
            ValueType::Char => ParamKind::Char,
            ValueType::UChar => ParamKind::UChar,
            ValueType::Int => ParamKind::Int,
            ValueType::UInt => ParamKind::UInt,
            ValueType::Long => ParamKind::Long,
            ValueType::ULong => ParamKind::ULong,
            ValueType::Int64 => ParamKind::Int64,
            ValueType::UInt64 => ParamKind::UInt64,
            ValueType::Float => ParamKind::Float,
            ValueType::Double => ParamKind::Double,
            ValueType::String => ParamKind::String,
            ValueType::Control | ValueType::PropChange | ValueType::Boxed(_) => ParamKind::Opaque,
        }
    }

    /// Value type described by this kind. `Opaque` has none.
    pub fn value_type(self) -> Option<ValueType> {
        Some(match self {
            ParamKind::Bool => ValueType::Bool,
            ParamKind::Char => ValueType::Char,
            ParamKind::UChar => ValueType::UChar,
            ParamKind::Int => ValueType::Int,
            ParamKind::UInt => ValueType::UInt,
            ParamKind::Long => ValueType::Long,
            ParamKind::ULong => ValueType::ULong,
            ParamKind::Int64 => ValueType::Int64,
            ParamKind::UInt64 => ValueType::UInt64,
            ParamKind::Float => ValueType::Float,
            ParamKind::Double => ValueType::Double,
            ParamKind::String => ValueType::String,
            ParamKind::Opaque => return None,
        })
    }

    pub fn has_limits(self) -> bool {
        !matches!(self, ParamKind::String | ParamKind::Opaque)
    }

    /// Kinds whose limits can be mapped through a transform function.
    pub fn transformable(self) -> bool {
        self.has_limits()
    }

    pub fn is_int(self) -> bool {
        !matches!(
            self,
            ParamKind::Float | ParamKind::Double | ParamKind::String | ParamKind::Opaque
        )
    }

    fn natural_range(self) -> (f64, f64) {
        match self {
            ParamKind::Bool => (0.0, 1.0),
            ParamKind::Char => (i8::MIN as f64, i8::MAX as f64),
            ParamKind::UChar => (0.0, u8::MAX as f64),
            ParamKind::Int => (i32::MIN as f64, i32::MAX as f64),
            ParamKind::UInt => (0.0, u32::MAX as f64),
            ParamKind::Long | ParamKind::Int64 => (i64::MIN as f64, i64::MAX as f64),
            ParamKind::ULong | ParamKind::UInt64 => (0.0, u64::MAX as f64),
            ParamKind::Float => (-(f32::MAX as f64), f32::MAX as f64),
            ParamKind::Double => (-f64::MAX, f64::MAX),
            ParamKind::String | ParamKind::Opaque => (0.0, 0.0),
        }
    }

    // Round-trip through the kind's storage type so integer kinds truncate.
    fn cast(self, v: f64) -> f64 {
        self.value_type()
            .and_then(|ty| Value::from_f64(ty, v))
            .and_then(|v| v.as_f64())
            .unwrap_or(v)
    }
}

/// Numeric limits of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
    pub default: f64,
    pub is_int: bool,
}

/// Typed description of a control's value range, default and unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
    min: f64,
    max: f64,
    default: f64,
    unit: Option<u16>,
    float_digits: u8,
    readable: bool,
    writable: bool,
}

impl ParamSpec {
    /// Spec covering the kind's full natural range, default 0, read-write.
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        let (min, max) = kind.natural_range();
        Self {
            name: name.into(),
            kind,
            min,
            max,
            default: 0.0_f64.clamp(min, max),
            unit: None,
            float_digits: if kind.is_int() { 0 } else { 2 },
            readable: true,
            writable: true,
        }
    }

    pub fn int(name: impl Into<String>, min: i32, max: i32, default: i32) -> Self {
        Self::ranged(name, ParamKind::Int, min as f64, max as f64, default as f64)
    }

    pub fn float(name: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self::ranged(name, ParamKind::Float, min as f64, max as f64, default as f64)
    }

    pub fn double(name: impl Into<String>, min: f64, max: f64, default: f64) -> Self {
        Self::ranged(name, ParamKind::Double, min, max, default)
    }

    pub fn boolean(name: impl Into<String>, default: bool) -> Self {
        Self::ranged(name, ParamKind::Bool, 0.0, 1.0, default as u8 as f64)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    fn ranged(name: impl Into<String>, kind: ParamKind, min: f64, max: f64, default: f64) -> Self {
        let mut spec = Self::new(name, kind);
        spec.min = min.min(max);
        spec.max = max.max(min);
        spec.default = default.clamp(spec.min, spec.max);
        spec
    }

    pub fn with_unit(mut self, unit: u16) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn with_float_digits(mut self, digits: u8) -> Self {
        self.float_digits = digits;
        self
    }

    pub fn with_access(mut self, readable: bool, writable: bool) -> Self {
        self.readable = readable;
        self.writable = writable;
        self
    }

    pub fn read_only(self) -> Self {
        self.with_access(true, false)
    }

    pub fn write_only(self) -> Self {
        self.with_access(false, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.kind.value_type()
    }

    pub fn unit(&self) -> Option<u16> {
        self.unit
    }

    pub fn float_digits(&self) -> u8 {
        self.float_digits
    }

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn has_limits(&self) -> bool {
        self.kind.has_limits()
    }

    pub fn limits(&self) -> Option<Limits> {
        self.has_limits().then_some(Limits {
            min: self.min,
            max: self.max,
            default: self.default,
            is_int: self.kind.is_int(),
        })
    }

    /// Set new limits, cast into the spec's kind. The default is clamped into range.
    pub fn set_limits(&mut self, min: f64, max: f64, default: f64) -> Result<()> {
        if !self.has_limits() {
            return Err(Error::InvalidParam(format!(
                "{:?} spec '{}' has no numeric limits",
                self.kind, self.name
            )));
        }
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::InvalidParam(format!(
                "min {} / max {} for '{}'",
                min, max, self.name
            )));
        }
        self.min = self.kind.cast(min);
        self.max = self.kind.cast(max);
        self.default = self.kind.cast(default.clamp(min, max));
        Ok(())
    }

    /// Default value as a typed [`Value`].
    pub fn default_value(&self) -> Option<Value> {
        let ty = self.value_type()?;
        if self.has_limits() {
            Value::from_f64(ty, self.default)
        } else {
            Value::default_for(ty)
        }
    }

    /// Copy of this spec re-kinded for `to`.
    ///
    /// Limits, unit and float digits are copied (float digits drop to 0 for
    /// integer kinds). Fails when the kinds differ and either side has no
    /// numeric limits.
    pub fn convert(&self, to: ValueType) -> Result<ParamSpec> {
        let kind = ParamKind::from_value_type(to);
        if kind == self.kind {
            return Ok(self.clone());
        }
        if !self.has_limits() || !kind.has_limits() {
            return Err(Error::SpecConversion {
                kind: self.kind,
                to,
            });
        }
        Ok(self.rekind(kind, self.min, self.max, self.default))
    }

    /// Map this spec's limits through `func`, producing a spec for `to`
    /// (or the same kind when `to` is `None`).
    pub fn transform(&self, to: Option<ValueType>, func: &TransformFn) -> Result<ParamSpec> {
        let kind = to.map(ParamKind::from_value_type).unwrap_or(self.kind);
        let failed = || Error::SpecConversion {
            kind: self.kind,
            to: to.or(self.value_type()).unwrap_or(ValueType::Double),
        };
        if !self.kind.transformable() || !kind.transformable() {
            return Err(failed());
        }
        let map = |v: f64| func(&Value::Double(v)).as_f64().ok_or_else(failed);
        let (a, b) = (map(self.min)?, map(self.max)?);
        let default = map(self.default)?;
        Ok(self.rekind(kind, a.min(b), a.max(b), default))
    }

    fn rekind(&self, kind: ParamKind, min: f64, max: f64, default: f64) -> ParamSpec {
        ParamSpec {
            name: self.name.clone(),
            kind,
            min: kind.cast(min),
            max: kind.cast(max),
            default: kind.cast(default.clamp(min, max)),
            unit: self.unit,
            float_digits: if kind.is_int() { 0 } else { self.float_digits },
            readable: self.readable,
            writable: self.writable,
        }
    }
}
