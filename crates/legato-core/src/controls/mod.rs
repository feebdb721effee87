//! Control variants built on the core [`Control`](crate::Control).

pub(crate) mod func;
pub(crate) mod hub;
pub(crate) mod prop;
pub(crate) mod value;

pub use func::{FuncCallbacks, FuncControl, GetFn, SetFn};
pub use prop::{OriginToken, PropChange, PropControl, PropertyObject};
pub use value::{ValueControl, ValueDestroyFn};
