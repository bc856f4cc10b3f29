//! Test harness routines
//!
//! Every lowered test ends by jumping to the runtime's pass handler through
//! `passed_addr`. The batch also carries three shared routines:
//! `test_setup` and `test_cleanup` jump straight to the pass handler, and
//! `local_test_failed` gives generated code a local target that jumps to
//! the failure handler through `failed_addr`.

use super::transformer::Routine;
use crate::context::LoweringContext;
use crate::isa::{regs, Instruction};
use crate::plan::Xlen;
use crate::Result;

/// Name of the shared setup routine
pub const TEST_SETUP: &str = "test_setup";
/// Name of the shared cleanup routine
pub const TEST_CLEANUP: &str = "test_cleanup";
/// Name of the local failure target
pub const LOCAL_TEST_FAILED: &str = "local_test_failed";

/// `<test>_passed:` followed by the jump to the pass handler
pub fn test_passed(test: &str, ctx: &LoweringContext) -> Result<Vec<Instruction>> {
    let label = format!("{}_passed", test);
    let mut out = vec![Instruction::label(&label, &label, false)];
    out.extend(jump_through(&ctx.options.passed_addr_symbol, &label, ctx)?);
    Ok(out)
}

/// Setup, cleanup and local failure routines in emission order
pub fn harness_routines(ctx: &LoweringContext) -> Result<Vec<Routine>> {
    let passed = ctx.options.passed_addr_symbol.as_str();
    let failed = ctx.options.failed_addr_symbol.as_str();
    [
        (TEST_SETUP, passed),
        (TEST_CLEANUP, passed),
        (LOCAL_TEST_FAILED, failed),
    ]
    .into_iter()
    .map(|(name, symbol)| -> Result<Routine> {
        let mut instructions = vec![Instruction::label(name, name, false)];
        instructions.extend(jump_through(symbol, name, ctx)?);
        Ok(Routine {
            name: name.to_string(),
            instructions,
        })
    })
    .collect()
}

/// `li t0, <symbol>; ld t1, 0(t0); jalr ra, 0(t1)`
fn jump_through(symbol: &str, owner: &str, ctx: &LoweringContext) -> Result<Vec<Instruction>> {
    let desc = "harness jump";

    let mut li = ctx.instruction("li")?.with_id(format!("{}_addr", owner));
    li.require_destination(desc)?.set_register(regs::T0);
    li.require_immediate(desc)?.set_symbol(symbol);

    let load = match ctx.env.xlen {
        Xlen::Rv64 => "ld",
        Xlen::Rv32 => "lw",
    };
    let mut ld = ctx.instruction(load)?.with_id(format!("{}_target", owner));
    ld.require_destination(desc)?.set_register(regs::T1);
    ld.require_source("rs1", desc)?.set_register(regs::T0);
    ld.require_immediate(desc)?.set_imm(0);

    let mut jalr = ctx.instruction("jalr")?.with_id(format!("{}_jump", owner));
    jalr.require_destination(desc)?.set_register(regs::RA);
    jalr.require_source("rs1", desc)?.set_register(regs::T1);
    jalr.require_immediate(desc)?.set_imm(0);

    Ok(vec![li, ld, jalr])
}
