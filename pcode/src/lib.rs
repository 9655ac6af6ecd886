mod display;
mod helpers;
mod ops;

pub use display::{DisplayWrapper, PcodeDisplay};
pub use helpers::mask;
pub use ops::{Op, PcodeOp, Space, VarNode, VarSize};
