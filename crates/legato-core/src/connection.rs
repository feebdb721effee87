//! Connection flags, priorities, transforms and the mirrored edge entries.
//!
//! A logical connection is stored twice: an [`OutputConn`] on the source
//! (destination, priority, transform, destroy hook) and an [`InputConn`] on
//! the destination (weak back-reference to the source). Both are installed
//! and removed under the same pair of control locks.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::control::{Control, WeakControl};
use crate::event::TransformFn;
use crate::value::Value;

/// Connection flag bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ConnectFlags(u8);

impl ConnectFlags {
    pub const NONE: Self = Self(0);
    /// Entry is the input side of a connection.
    pub const INPUT: Self = Self(1 << 0);
    /// Entry is the output side of a connection.
    pub const OUTPUT: Self = Self(1 << 1);
    /// Deliver the source's current value once at connect time.
    pub const INIT: Self = Self(1 << 2);
    /// Also connect destination back to source.
    pub const BIDIR: Self = Self(1 << 3);
    /// Derive the destination's parameter spec from the source's.
    pub const SPEC: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for ConnectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnectFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for ConnectFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::INPUT, "INPUT"),
            (Self::OUTPUT, "OUTPUT"),
            (Self::INIT, "INIT"),
            (Self::BIDIR, "BIDIR"),
            (Self::SPEC, "SPEC"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "ConnectFlags({})", set.join(" | "))
    }
}

/// Output firing priority. `Default` ranks the same as `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    #[default]
    Default = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl Priority {
    /// Comparison rank; higher fires first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 1,
            Priority::Default | Priority::Medium => 2,
            Priority::High => 3,
        }
    }

    /// Priority from the low two bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            1 => Priority::Low,
            2 => Priority::Medium,
            3 => Priority::High,
            _ => Priority::Default,
        }
    }
}

/// Side of a control's connection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Input,
    Output,
}

pub(crate) type DestroyFn = Box<dyn FnOnce() + Send + Sync>;

/// A value transform with an optional destroy hook.
///
/// The hook runs exactly once: when the connection carrying the transform is
/// torn down or the transform is replaced, or when the transform is dropped
/// without being installed (a rejected connect, say).
pub struct Transform {
    func: Arc<TransformFn>,
    destroy: Option<DestroyFn>,
}

impl Transform {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            destroy: None,
        }
    }

    /// Transform scaling numeric values by `factor`, producing doubles.
    pub fn scale(factor: f64) -> Self {
        Self::new(move |v| match v.as_f64() {
            Some(x) => Value::Double(x * factor),
            None => v.clone(),
        })
    }

    pub fn on_destroy<F>(mut self, destroy: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.destroy = Some(Box::new(destroy));
        self
    }

    pub fn func(&self) -> &Arc<TransformFn> {
        &self.func
    }

    /// Hand the hook over to the installed connection.
    pub(crate) fn into_parts(mut self) -> (Arc<TransformFn>, Option<DestroyFn>) {
        let destroy = self.destroy.take();
        (self.func.clone(), destroy)
    }
}

impl Drop for Transform {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            destroy();
        }
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("has_destroy", &self.destroy.is_some())
            .finish()
    }
}

/// Options for [`Control::connect`].
#[derive(Debug, Default)]
pub struct ConnectOptions {
    pub(crate) flags: ConnectFlags,
    pub(crate) priority: Priority,
    pub(crate) transform_out: Option<Transform>,
    pub(crate) transform_in: Option<Transform>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(mut self, flags: ConnectFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn init(self) -> Self {
        self.flags(ConnectFlags::INIT)
    }

    pub fn bidirectional(self) -> Self {
        self.flags(ConnectFlags::BIDIR)
    }

    pub fn spec(self) -> Self {
        self.flags(ConnectFlags::SPEC)
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Transform applied to values flowing source to destination.
    pub fn transform(mut self, transform: Transform) -> Self {
        self.transform_out = Some(transform);
        self
    }

    /// Transform applied on the reverse edge of a bidirectional connection.
    pub fn transform_in(mut self, transform: Transform) -> Self {
        self.transform_in = Some(transform);
        self
    }
}

impl From<ConnectFlags> for ConnectOptions {
    fn from(flags: ConnectFlags) -> Self {
        Self::new().flags(flags)
    }
}

impl From<Priority> for ConnectOptions {
    fn from(priority: Priority) -> Self {
        Self::new().priority(priority)
    }
}

/// Output-side entry. Dropping it runs the destroy hook, so entries removed
/// under a control lock must be dropped after the lock is released.
///
/// The destination is held weakly: edges never keep a control alive, so a
/// bidirectional pair is freed once its owners let go.
pub(crate) struct OutputConn {
    pub dest: WeakControl,
    pub flags: ConnectFlags,
    pub priority: Priority,
    pub transform: Option<Arc<TransformFn>>,
    pub destroy: Option<DestroyFn>,
}

impl OutputConn {
    pub fn new(
        dest: &Control,
        flags: ConnectFlags,
        priority: Priority,
        transform: Option<Transform>,
    ) -> Self {
        let (transform, destroy) = match transform.map(Transform::into_parts) {
            Some((func, destroy)) => (Some(func), destroy),
            None => (None, None),
        };
        Self {
            dest: dest.downgrade(),
            flags: flags.without(ConnectFlags::INPUT) | ConnectFlags::OUTPUT,
            priority,
            transform,
            destroy,
        }
    }
}

impl Drop for OutputConn {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            destroy();
        }
    }
}

/// Input-side entry.
pub(crate) struct InputConn {
    pub src: WeakControl,
    pub flags: ConnectFlags,
}

/// Insert `conn` after every entry of equal or higher rank.
pub(crate) fn insert_by_priority(outputs: &mut Vec<OutputConn>, conn: OutputConn) {
    let rank = conn.priority.rank();
    let pos = outputs
        .iter()
        .position(|c| c.priority.rank() < rank)
        .unwrap_or(outputs.len());
    outputs.insert(pos, conn);
}
