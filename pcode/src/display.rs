use crate::{Op, PcodeOp, VarNode};

pub trait PcodeDisplay<T>: Sized {
    fn fmt(&self, f: &mut std::fmt::Formatter, ctx: &T) -> std::fmt::Result;
    fn display<'a>(&'a self, ctx: &'a T) -> DisplayWrapper<'a, T, Self> {
        DisplayWrapper { ctx, value: self }
    }
}

pub struct DisplayWrapper<'a, T, U> {
    ctx: &'a T,
    value: &'a U,
}

impl<'a, T, U> std::fmt::Display for DisplayWrapper<'a, T, U>
where
    U: PcodeDisplay<T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f, self.ctx)
    }
}

impl<'a, T, U> std::fmt::Debug for DisplayWrapper<'a, T, U>
where
    U: PcodeDisplay<T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f, self.ctx)
    }
}

impl PcodeDisplay<()> for VarNode {
    fn fmt(&self, f: &mut std::fmt::Formatter, _: &()) -> std::fmt::Result {
        write!(f, "({},{:#x},{})", self.space.name(), self.offset, self.size)
    }
}

impl PcodeDisplay<()> for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter, _: &()) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl PcodeDisplay<()> for PcodeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter, ctx: &()) -> std::fmt::Result {
        if let Some(out) = &self.output {
            write!(f, "{} = ", out.display(ctx))?;
        }
        write!(f, "{}", self.op.display(ctx))?;
        for (i, input) in self.inputs.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{}", input.display(ctx))?;
        }
        Ok(())
    }
}
