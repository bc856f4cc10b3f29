//! Batch orchestration
//!
//! [`Transformer::transform_tests`] is the pipeline entry point. It owns the
//! order of the passes:
//!
//! 1. canonicalize every test against one [`LoweringContext`];
//! 2. lower each lifted function and record what it clobbers;
//! 3. reserve the CSR storage page and one stack page per test;
//! 4. lower each test body and wrap it in stack setup and CSR save/restore,
//!    ending in the jump to the pass handler;
//! 5. emit the shared harness routines.

use super::allocator;
use super::canonicalizer::canonicalize;
use super::elaborator::elaborate;
use super::expander::expand;
use super::harness::{harness_routines, test_passed};
use super::legalizer::legalize;
use crate::action::csr::csr_api_instruction;
use crate::action::{Action, ActionRegistry, DiscreteTest};
use crate::config::LoweringOptions;
use crate::context::LoweringContext;
use crate::isa::{regs, CsrApiCall, Instruction, InstructionCatalog, InstructionForm, Register};
use crate::memory::{CodePage, DataPage};
use crate::plan::{MemorySpec, PageFlags, TestEnv, TestScenario, Xlen};
use crate::Result;
use std::fmt;

/// Named, fully allocated instruction sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    /// Test name or canonical code id
    pub name: String,
    /// Instructions in program order, labels included
    pub instructions: Vec<Instruction>,
}

impl Routine {
    /// Mnemonics in order, labels and directives included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instructions.iter().map(|i| i.name.as_str())
    }
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for instr in &self.instructions {
            if instr.is_label() {
                writeln!(f, "{}", instr)?;
            } else {
                writeln!(f, "    {}", instr)?;
            }
        }
        Ok(())
    }
}

/// Output of one batch
#[derive(Debug, Clone, Default)]
pub struct LoweredProgram {
    /// One routine per test, in input order
    pub tests: Vec<Routine>,
    /// Lifted functions, callees before callers
    pub functions: Vec<Routine>,
    /// `test_setup`, `test_cleanup` and `local_test_failed`
    pub harness: Vec<Routine>,
    /// Data pages in registration order
    pub data_pages: Vec<DataPage>,
    /// Code pages in registration order
    pub code_pages: Vec<CodePage>,
}

impl LoweredProgram {
    /// Test routine by name
    pub fn test(&self, name: &str) -> Option<&Routine> {
        self.tests.iter().find(|r| r.name == name)
    }

    /// Function routine by canonical code id
    pub fn function(&self, name: &str) -> Option<&Routine> {
        self.functions.iter().find(|r| r.name == name)
    }
}

/// Pipeline driver for one catalog and option set
pub struct Transformer<'a> {
    catalog: &'a dyn InstructionCatalog,
    registry: ActionRegistry,
    options: LoweringOptions,
}

impl<'a> Transformer<'a> {
    /// Driver with the default step registry
    pub fn new(catalog: &'a dyn InstructionCatalog, options: LoweringOptions) -> Self {
        Self::with_registry(catalog, ActionRegistry::default(), options)
    }

    /// Driver with a custom step registry
    pub fn with_registry(
        catalog: &'a dyn InstructionCatalog,
        registry: ActionRegistry,
        options: LoweringOptions,
    ) -> Self {
        Self {
            catalog,
            registry,
            options,
        }
    }

    /// Build actions for every scenario and lower the batch
    pub fn transform_tests(&self, scenarios: &[TestScenario], env: TestEnv) -> Result<LoweredProgram> {
        let tests = scenarios
            .iter()
            .map(|s| self.registry.build_test(s))
            .collect::<Result<Vec<_>>>()?;
        self.lower(tests, env)
    }

    /// Lower already-built tests
    pub fn lower(&self, tests: Vec<DiscreteTest>, env: TestEnv) -> Result<LoweredProgram> {
        let mut ctx = LoweringContext::new(self.catalog, env, self.options.clone());
        tracing::debug!(tests = tests.len(), seed = self.options.seed, ?env, "lowering batch");

        let batch = canonicalize(tests, &mut ctx)?;

        let mut functions = Vec::with_capacity(batch.functions.len());
        for function in batch.functions {
            let name = function.id.clone();
            let instructions = lower_routine(vec![function], &mut ctx)?;
            let clobbers = clobbered_registers(&instructions, &ctx);
            tracing::debug!(function = %name, instructions = instructions.len(), clobbers = clobbers.len(), "lowered function");
            ctx.function_clobbers.insert(name.clone(), clobbers);
            functions.push(Routine { name, instructions });
        }

        let storage = self.options.csr_storage_name.clone();
        ctx.memory.allocate_data(&storage, &self.stack_spec())?;

        let mut routines = Vec::with_capacity(batch.tests.len());
        for test in batch.tests {
            let stack = format!("{}_stack", test.name);
            ctx.memory.allocate_data(&stack, &self.stack_spec())?;

            let body = lower_routine(test.actions, &mut ctx)?;
            let csrs = api_csrs(&body);
            let mut instructions = vec![Instruction::label(ctx.new_label(), &test.name, false)];
            instructions.extend(save_csrs(&csrs, &storage, &ctx)?);
            instructions.extend(initialize_stack(&stack, &ctx)?);
            instructions.extend(body);
            instructions.extend(restore_csrs(&csrs, &storage, &ctx)?);
            instructions.extend(test_passed(&test.name, &ctx)?);

            tracing::debug!(test = %test.name, instructions = instructions.len(), saved_csrs = csrs.len(), "lowered test");
            routines.push(Routine {
                name: test.name,
                instructions,
            });
        }

        Ok(LoweredProgram {
            tests: routines,
            functions,
            harness: harness_routines(&ctx)?,
            data_pages: ctx.memory.data_pages().to_vec(),
            code_pages: ctx.memory.code_pages().to_vec(),
        })
    }

    fn stack_spec(&self) -> MemorySpec {
        MemorySpec::new(self.options.stack_page_size, PageFlags::READ | PageFlags::WRITE)
    }
}

/// Lower a batch with the built-in driver
pub fn transform_tests(
    scenarios: &[TestScenario],
    env: TestEnv,
    catalog: &dyn InstructionCatalog,
    options: LoweringOptions,
) -> Result<LoweredProgram> {
    Transformer::new(catalog, options).transform_tests(scenarios, env)
}

/// expand, elaborate, legalize, allocate
fn lower_routine(actions: Vec<Action>, ctx: &mut LoweringContext) -> Result<Vec<Instruction>> {
    let actions = expand(actions, ctx)?;
    let instrs = elaborate(actions, ctx)?;
    let instrs = legalize(instrs, ctx)?;
    allocator::allocate(instrs, ctx)
}

/// Written registers plus explicit and callee clobbers
fn clobbered_registers(instrs: &[Instruction], ctx: &LoweringContext) -> Vec<Register> {
    let mut clobbers: Vec<Register> = Vec::new();
    let mut add = |reg: Register| {
        if !clobbers.contains(&reg) {
            clobbers.push(reg);
        }
    };
    for instr in instrs {
        if let Some(reg) = instr.destination.as_ref().and_then(|d| d.register()) {
            add(reg);
        }
        instr.clobbers.iter().copied().for_each(&mut add);
        if let InstructionForm::Call { target } = &instr.form {
            if let Some(callee) = ctx.function_clobbers.get(target) {
                callee.iter().copied().for_each(&mut add);
            }
        }
    }
    clobbers
}

/// CSRs touched through the runtime API, first use first
fn api_csrs(body: &[Instruction]) -> Vec<String> {
    let mut csrs: Vec<String> = Vec::new();
    for instr in body {
        if let InstructionForm::CsrApi { csr, .. } = &instr.form {
            if !csrs.contains(csr) {
                csrs.push(csr.clone());
            }
        }
    }
    csrs
}

fn li_symbol(rd: Register, symbol: &str, ctx: &LoweringContext) -> Result<Instruction> {
    let mut li = ctx.instruction("li")?.with_id(format!("li_{}", symbol));
    li.require_destination("routine setup")?.set_register(rd);
    li.require_immediate("routine setup")?.set_symbol(symbol);
    Ok(li)
}

fn storage_access(load: bool, offset: i64, ctx: &LoweringContext) -> Result<Instruction> {
    let name = match (ctx.env.xlen, load) {
        (Xlen::Rv64, true) => "ld",
        (Xlen::Rv64, false) => "sd",
        (Xlen::Rv32, true) => "lw",
        (Xlen::Rv32, false) => "sw",
    };
    let mut instr = ctx.instruction(name)?;
    if load {
        instr.require_destination("csr restore")?.set_register(regs::T2);
    } else {
        instr.require_source("rs2", "csr save")?.set_register(regs::T2);
    }
    instr.require_source("rs1", "csr storage")?.set_register(regs::SP);
    instr.require_immediate("csr storage")?.set_imm(offset);
    Ok(instr)
}

/// `sp` points at the storage page; each CSR gets one slot
fn save_csrs(csrs: &[String], storage: &str, ctx: &LoweringContext) -> Result<Vec<Instruction>> {
    if csrs.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = vec![li_symbol(regs::SP, storage, ctx)?];
    for (k, csr) in csrs.iter().enumerate() {
        out.push(csr_api_instruction(csr, CsrApiCall::Read, false));
        out.push(storage_access(false, k as i64 * ctx.register_bytes(), ctx)?);
    }
    Ok(out)
}

fn restore_csrs(csrs: &[String], storage: &str, ctx: &LoweringContext) -> Result<Vec<Instruction>> {
    if csrs.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = vec![li_symbol(regs::SP, storage, ctx)?];
    for (k, csr) in csrs.iter().enumerate() {
        out.push(storage_access(true, k as i64 * ctx.register_bytes(), ctx)?);
        out.push(csr_api_instruction(csr, CsrApiCall::Write, false));
    }
    Ok(out)
}

/// `sp` = 16-byte aligned top of the test's stack page
fn initialize_stack(stack: &str, ctx: &LoweringContext) -> Result<Vec<Instruction>> {
    let size = ctx.memory.get_data_page(stack)?.spec.size;

    let mut li_size = ctx.instruction("li")?.with_id(format!("{}_size", stack));
    li_size.require_destination("stack setup")?.set_register(regs::T0);
    li_size.require_immediate("stack setup")?.set_imm(size as i64);

    let mut add = ctx.instruction("add")?.with_id(format!("{}_top", stack));
    add.require_destination("stack setup")?.set_register(regs::SP);
    add.require_source("rs1", "stack setup")?.set_register(regs::SP);
    add.require_source("rs2", "stack setup")?.set_register(regs::T0);

    let mut andi = ctx.instruction("andi")?.with_id(format!("{}_align", stack));
    andi.require_destination("stack setup")?.set_register(regs::SP);
    andi.require_source("rs1", "stack setup")?.set_register(regs::SP);
    andi.require_immediate("stack setup")?.set_imm(-16);

    Ok(vec![li_symbol(regs::SP, stack, ctx)?, li_size, add, andi])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::TemplateCatalog;
    use crate::plan::{PrivilegeMode, Step, StepKind};

    fn rv64() -> TemplateCatalog {
        TemplateCatalog::builtin(Xlen::Rv64).unwrap()
    }

    #[test]
    fn test_test_routine_layout() {
        let catalog = rv64();
        let scenario = TestScenario::new(
            "t0",
            vec![Step::new("a", StepKind::Arithmetic { op: Some("add".into()) })],
        );
        let program = transform_tests(&[scenario], TestEnv::default(), &catalog, LoweringOptions::default()).unwrap();
        let routine = program.test("t0").unwrap();
        let text: Vec<String> = routine.instructions.iter().map(|i| i.to_string()).collect();
        assert_eq!(text[0], "t0:");
        assert_eq!(text[1], "li sp, t0_stack");
        assert_eq!(text[2], "li t0, 4096");
        assert_eq!(text[3], "add sp, sp, t0");
        assert_eq!(text[4], "andi sp, sp, -16");
        assert!(routine.instructions.iter().all(Instruction::is_fully_allocated));

        let names: Vec<_> = program.data_pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["tp_csr_storage", "t0_stack"]);
    }

    #[test]
    fn test_api_csrs_are_saved_and_restored() {
        let catalog = rv64();
        let env = TestEnv {
            priv_mode: PrivilegeMode::Supervisor,
            ..TestEnv::default()
        };
        let scenario = TestScenario::new(
            "csr",
            vec![Step::new(
                "w",
                StepKind::CsrWrite {
                    csr_name: "mscratch".into(),
                    value: Some(3),
                    set_mask: None,
                    clear_mask: None,
                    direct_write: false,
                },
            )],
        );
        let program = transform_tests(&[scenario], env, &catalog, LoweringOptions::default()).unwrap();
        let text: Vec<String> = program.tests[0].instructions.iter().map(|i| i.to_string()).collect();
        assert_eq!(text[1], "li sp, tp_csr_storage");
        assert_eq!(text[2], ";#csr_rw(mscratch, read, false)");
        assert_eq!(text[3], "sd t2, sp, 0");
        assert_eq!(text[4], "li sp, csr_stack");

        let n = text.len() - 4;
        assert_eq!(text[n - 3], "li sp, tp_csr_storage");
        assert_eq!(text[n - 2], "ld t2, sp, 0");
        assert_eq!(text[n - 1], ";#csr_rw(mscratch, write, false)");
        assert_eq!(text[n], "csr_passed:");
    }

    #[test]
    fn test_every_test_ends_in_pass_jump() {
        let catalog = rv64();
        let scenarios: Vec<_> = ["a", "b"]
            .iter()
            .map(|name| {
                TestScenario::new(
                    *name,
                    vec![Step::new("x", StepKind::Arithmetic { op: Some("sub".into()) })],
                )
            })
            .collect();
        let program = transform_tests(&scenarios, TestEnv::default(), &catalog, LoweringOptions::default()).unwrap();
        for routine in &program.tests {
            let text: Vec<String> = routine.instructions.iter().map(|i| i.to_string()).collect();
            let tail = &text[text.len() - 4..];
            assert_eq!(tail[0], format!("{}_passed:", routine.name));
            assert_eq!(&tail[1..], ["li t0, passed_addr", "ld t1, t0, 0", "jalr ra, t1, 0"]);
        }
        let harness: Vec<_> = program.harness.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(harness, vec!["test_setup", "test_cleanup", "local_test_failed"]);
    }

    #[test]
    fn test_function_clobbers_recorded() {
        let catalog = rv64();
        let scenario = TestScenario::new(
            "call",
            vec![
                Step::new("fn", StepKind::CodePage(MemorySpec::default())).with_code(vec![Step::new(
                    "x",
                    StepKind::Arithmetic { op: Some("add".into()) },
                )]),
                Step::new("c", StepKind::Call).with_inputs(["fn"]),
            ],
        );
        let program = transform_tests(&[scenario], TestEnv::default(), &catalog, LoweringOptions::default()).unwrap();
        assert_eq!(program.functions.len(), 1);
        let function = &program.functions[0];
        assert_eq!(function.instructions[0].to_string(), format!("{}:", function.name));
        assert_eq!(function.names().last(), Some("ret"));
        assert_eq!(program.code_pages.len(), 1);
        assert!(program.tests[0].names().any(|n| n == "jalr"));
    }
}
