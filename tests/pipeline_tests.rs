//! End-to-end lowering tests
//!
//! Each test lowers a small scenario through the full pipeline and checks
//! the shape of the resulting routine:
//! 1. Undefined sources are materialized, produced values are not
//! 2. Out-of-range offsets and CSR values are folded through `li`
//! 3. Register pressure spills instead of failing
//! 4. The same seed always produces the same program

use rvplan::action::ActionKind;
use rvplan::isa::{Instruction, InstructionForm, OperandValue};
use rvplan::plan::{ExceptionCause, StepInput};
use rvplan::transform::canonicalize;
use rvplan::{
    transform_tests, ActionRegistry, LoweredProgram, LoweringContext, LoweringOptions, MemorySpec,
    PrivilegeMode, Routine, Step, StepKind, TemplateCatalog, TestEnv, TestScenario, Xlen,
};

/// Label plus the four stack setup instructions
const PROLOGUE: usize = 5;
/// Pass label plus the three-instruction jump to the pass handler
const EPILOGUE: usize = 4;

fn lower(scenarios: &[TestScenario], env: TestEnv, seed: u64) -> LoweredProgram {
    let catalog = TemplateCatalog::builtin(env.xlen).unwrap();
    transform_tests(scenarios, env, &catalog, LoweringOptions::with_seed(seed))
        .unwrap_or_else(|e| panic!("lowering failed: {}", e))
}

fn body(routine: &Routine) -> &[Instruction] {
    &routine.instructions[PROLOGUE..routine.instructions.len() - EPILOGUE]
}

fn imm(instr: &Instruction) -> Option<i64> {
    match instr.immediate().map(|o| &o.value) {
        Some(OperandValue::Imm(v)) => Some(*v),
        _ => None,
    }
}

fn assert_allocated(program: &LoweredProgram) {
    for routine in program.tests.iter().chain(program.functions.iter()) {
        for instr in &routine.instructions {
            assert!(instr.is_fully_allocated(), "{}: '{}' has placeholders", routine.name, instr);
        }
    }
}

fn add(id: &str) -> Step {
    Step::new(id, StepKind::Arithmetic { op: Some("add".into()) })
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn test_arithmetic_dag_materializes_only_open_sources() {
    let scenario = TestScenario::new(
        "dag",
        vec![add("a"), add("b"), add("c").with_inputs(["a", "b"])],
    );
    let program = lower(&[scenario], TestEnv::default(), 1);
    assert_allocated(&program);

    let body = body(&program.tests[0]);
    let names: Vec<_> = body.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names.iter().filter(|n| **n == "li").count(), 4, "{:?}", names);
    assert_eq!(names.iter().filter(|n| **n == "add").count(), 3);
    assert_eq!(names.last(), Some(&"add"));
}

#[test]
fn test_large_load_offset_is_folded() {
    let scenario = TestScenario::new(
        "far_load",
        vec![Step::new(
            "ld",
            StepKind::Load {
                offset: 5000,
                access_size: None,
                op: Some("ld".into()),
            },
        )],
    );
    let program = lower(&[scenario], TestEnv::default(), 2);
    assert_allocated(&program);

    let body = body(&program.tests[0]);
    let load = body.iter().position(|i| i.name == "ld").unwrap();
    assert_eq!(imm(&body[load]), Some(0));

    let before = &body[..load];
    assert_eq!(before.iter().filter(|i| i.name == "li" && imm(i) == Some(5000)).count(), 1);
    assert_eq!(before.iter().filter(|i| i.name == "add").count(), 1);
    assert_eq!(before.last().map(|i| i.name.as_str()), Some("add"));
    assert_eq!(program.data_pages.len(), 3);
}

#[test]
fn test_machine_csr_write_loads_value_first() {
    let scenario = TestScenario::new(
        "csr_write",
        vec![Step::new(
            "w",
            StepKind::CsrWrite {
                csr_name: "mscratch".into(),
                value: Some(100),
                set_mask: None,
                clear_mask: None,
                direct_write: false,
            },
        )],
    );
    let program = lower(&[scenario], TestEnv::default(), 3);
    assert_allocated(&program);

    let body = body(&program.tests[0]);
    let write = body.iter().position(|i| i.name == "csrrw").unwrap();
    assert_eq!(body.iter().filter(|i| imm(i) == Some(100)).count(), 1);
    assert_eq!(body[write - 1].name, "li");
    assert_eq!(imm(&body[write - 1]), Some(100));
    assert!(body.iter().all(|i| !i.to_string().starts_with(";#csr_rw")));
}

#[test]
fn test_register_pressure_spills() {
    let mut steps: Vec<Step> = (0..32).map(|n| add(&format!("v{}", n))).collect();
    steps.push(add("s1").with_inputs(["v0", "v1"]));
    for n in 2..32 {
        steps.push(add(&format!("s{}", n)).with_inputs([format!("s{}", n - 1).as_str(), format!("v{}", n).as_str()]));
    }
    let program = lower(&[TestScenario::new("pressure", steps)], TestEnv::default(), 4);
    assert_allocated(&program);

    let routine = &program.tests[0];
    assert!(routine.instructions.iter().any(|i| i.id.ends_with(".spill")));
    assert!(routine.instructions.iter().any(|i| i.id.ends_with(".reload")));
    let open = routine.instructions.iter().find(|i| i.id == "spill_frame_open").unwrap();
    assert!(imm(open).unwrap() < 0);
}

#[test]
fn test_float_consumer_gets_cast_end_to_end() {
    let scenario = TestScenario::new(
        "cast",
        vec![
            add("i"),
            Step::new("f", StepKind::Arithmetic { op: Some("fadd.s".into()) }).with_inputs(["i", "i"]),
        ],
    );
    let program = lower(&[scenario], TestEnv::default(), 5);
    assert_allocated(&program);
    assert!(program.tests[0].names().any(|n| n.starts_with("fmv.")));
}

// =============================================================================
// FUNCTIONS, ASSERTIONS, PAGES
// =============================================================================

#[test]
fn test_call_excludes_callee_clobbers_across_call() {
    let scenario = TestScenario::new(
        "calls",
        vec![
            add("keep"),
            Step::new("fn", StepKind::CodePage(MemorySpec::default()))
                .with_code(vec![add("x"), add("y").with_inputs(["x", "x"])]),
            Step::new("c", StepKind::Call).with_inputs(["fn"]),
            add("after").with_inputs(["keep", "keep"]),
        ],
    );
    let program = lower(&[scenario], TestEnv::default(), 6);
    assert_allocated(&program);

    let function = &program.functions[0];
    let written: Vec<_> = function
        .instructions
        .iter()
        .filter_map(|i| i.destination.as_ref().and_then(|d| d.register()))
        .collect();

    let last = body(&program.tests[0]).last().unwrap();
    let keep = last.source("rs1").and_then(|o| o.register()).unwrap();
    assert!(!written.contains(&keep), "{} survives a call that writes it", keep);
}

#[test]
fn test_assertions_and_exceptions_lower() {
    let scenario = TestScenario::new(
        "asserts",
        vec![
            add("a"),
            add("b"),
            Step::new("eq", StepKind::AssertEqual).with_inputs(["a", "b"]),
            Step::new("ex", StepKind::AssertException { cause: ExceptionCause::IllegalInstruction })
                .with_code(vec![Step::new("bad", StepKind::System { instruction: "ecall".into() })]),
        ],
    );
    let program = lower(&[scenario], TestEnv::default(), 7);
    assert_allocated(&program);

    let text: Vec<String> = program.tests[0].instructions.iter().map(|i| i.to_string()).collect();
    assert!(text.iter().any(|t| t.starts_with("OS_SETUP_CHECK_EXCP 2, ")), "{:#?}", text);
    assert!(text.iter().any(|t| t.starts_with("jr ")));
    let ecall = text.iter().position(|t| t == "ecall").unwrap();
    assert!(program.tests[0].instructions[ecall - 1].is_label());
}

#[test]
fn test_function_label_is_entry_point() {
    let scenario = TestScenario::new(
        "entry",
        vec![
            Step::new("fn", StepKind::CodePage(MemorySpec::default()))
                .with_code(vec![add("x"), add("y").with_inputs(["x", "x"])]),
            Step::new("c", StepKind::Call).with_inputs(["fn"]),
        ],
    );
    let program = lower(&[scenario], TestEnv::default(), 12);
    assert_allocated(&program);

    let function = &program.functions[0];
    let text: Vec<String> = function.instructions.iter().map(|i| i.to_string()).collect();
    assert_eq!(text[0], format!("{}:", function.name), "{:#?}", text);
    assert_eq!(text.iter().filter(|t| t.ends_with(':')).count(), 1);
    assert_eq!(function.names().filter(|n| *n == "li").count(), 2);
}

#[test]
fn test_pass_branch_target_precedes_materialized_sources() {
    let scenario = TestScenario::new(
        "branch",
        vec![
            add("a"),
            add("b"),
            Step::new("eq", StepKind::AssertEqual).with_inputs(["a", "b"]),
            add("after"),
        ],
    );
    let program = lower(&[scenario], TestEnv::default(), 13);
    assert_allocated(&program);

    let body = body(&program.tests[0]);
    let branch = body.iter().position(|i| i.name == "beq").unwrap();
    let target = body[branch].to_string().rsplit(", ").next().unwrap().to_string();
    let label = body.iter().position(|i| i.to_string() == format!("{}:", target)).unwrap();
    let jr = body.iter().position(|i| i.name == "jr").unwrap();
    assert!(jr < label);
    // the last add reads two values nothing defines; their li runs after the target
    let names: Vec<_> = body[label + 1..].iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["li", "li", "add"], "{:#?}", body);
}

#[test]
fn test_supervisor_csr_read_goes_through_api() {
    let env = TestEnv {
        priv_mode: PrivilegeMode::Supervisor,
        ..TestEnv::default()
    };
    let scenario = TestScenario::new(
        "csr_read",
        vec![
            Step::new(
                "r",
                StepKind::CsrRead {
                    csr_name: "mstatus".into(),
                    direct_read: false,
                },
            ),
            add("use").with_inputs(["r", "r"]),
        ],
    );
    let program = lower(&[scenario], env, 8);
    assert_allocated(&program);

    let text: Vec<String> = program.tests[0].instructions.iter().map(|i| i.to_string()).collect();
    let reads = text.iter().filter(|t| *t == ";#csr_rw(mstatus, read, false)").count();
    assert_eq!(reads, 2, "{:#?}", text);
    assert!(text.iter().any(|t| t == ";#csr_rw(mstatus, write, false)"));
}

#[test]
fn test_rv32_uses_word_accesses() {
    let env = TestEnv {
        xlen: Xlen::Rv32,
        ..TestEnv::default()
    };
    let scenario = TestScenario::new(
        "narrow",
        vec![Step::new(
            "ld",
            StepKind::Load {
                offset: 8,
                access_size: None,
                op: None,
            },
        )],
    );
    let program = lower(&[scenario], env, 9);
    assert_allocated(&program);
    assert!(program.tests[0].names().all(|n| n != "ld" && n != "sd"));
}

// =============================================================================
// BATCH PROPERTIES
// =============================================================================

fn mixed_batch() -> Vec<TestScenario> {
    let json = r#"[
        {
            "name": "t_load_add",
            "steps": [
                {"id": "mem", "kind": "memory", "size": 8192},
                {"id": "ld", "kind": "load", "offset": 16, "inputs": ["mem"]},
                {"id": "sum", "kind": "arithmetic", "inputs": ["ld", 5]},
                {"id": "st", "kind": "store", "offset": 3000, "inputs": ["sum", "mem"]}
            ]
        },
        {
            "name": "t_call",
            "steps": [
                {"id": "fn", "kind": "code_page", "code": [
                    {"id": "x", "kind": "arithmetic"},
                    {"id": "note", "kind": "comment", "text": "inside fn"}
                ]},
                {"id": "call", "kind": "call", "inputs": ["fn"]},
                {"id": "y", "kind": "arithmetic", "op": "add"},
                {"id": "z", "kind": "arithmetic", "op": "addi", "inputs": ["y", 7]},
                {"id": "ne", "kind": "assert_not_equal", "inputs": ["y", "z"]}
            ]
        }
    ]"#;
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_same_seed_same_program() {
    let batch = mixed_batch();
    let a = lower(&batch, TestEnv::default(), 42);
    let b = lower(&batch, TestEnv::default(), 42);
    assert_eq!(a.tests, b.tests);
    assert_eq!(a.functions, b.functions);
    assert_eq!(a.data_pages, b.data_pages);
}

#[test]
fn test_json_batch_lowers() -> anyhow::Result<()> {
    let catalog = TemplateCatalog::builtin(Xlen::Rv64)?;
    let program = transform_tests(&mixed_batch(), TestEnv::default(), &catalog, LoweringOptions::from_json(r#"{"seed": 11}"#)?)?;
    assert_allocated(&program);
    assert_eq!(program.tests.len(), 2);
    assert_eq!(program.functions.len(), 1);
    assert_eq!(program.code_pages.len(), 1);
    assert!(program
        .test("t_call")
        .unwrap()
        .instructions
        .iter()
        .any(|i| matches!(i.form, InstructionForm::Call { .. })));

    let pages: Vec<_> = program.data_pages.iter().map(|p| p.name.as_str()).collect();
    assert!(pages.contains(&"tp_csr_storage"));
    assert!(pages.contains(&"t_load_add_stack"));
    assert!(pages.contains(&"t_call_stack"));
    Ok(())
}

#[test]
fn test_canonical_ids_after_renaming() {
    let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
    let mut ctx = LoweringContext::new(&catalog, TestEnv::default(), LoweringOptions::default());
    let registry = ActionRegistry::default();
    let tests = mixed_batch()
        .iter()
        .map(|s| registry.build_test(s))
        .collect::<rvplan::Result<Vec<_>>>()
        .unwrap();
    let batch = canonicalize(tests, &mut ctx).unwrap();

    let canonical = |id: &str| {
        ["r", "mem", "code_mem"]
            .iter()
            .any(|p| id.strip_prefix(p).map_or(false, |n| n.parse::<u64>().is_ok()))
    };
    for action in batch.tests.iter().flat_map(|t| t.actions.iter()).chain(batch.functions.iter()) {
        assert!(canonical(&action.id), "{}", action.id);
        for id in action.field_ids() {
            assert!(canonical(&id), "{} in {}", id, action.describe());
        }
        assert!(!matches!(action.kind, ActionKind::Memory(_)));
    }
}

#[test]
fn test_bad_input_is_content_error() {
    let catalog = TemplateCatalog::builtin(Xlen::Rv64).unwrap();
    let scenario = TestScenario::new(
        "bad",
        vec![add("a").with_inputs(vec![StepInput::Imm(1), StepInput::Imm(2)])],
    );
    let err = transform_tests(&[scenario], TestEnv::default(), &catalog, LoweringOptions::default()).unwrap_err();
    assert_eq!(err.classify(), rvplan::ErrorKind::Content);
}
