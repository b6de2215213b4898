use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use ariadne::{Color, Label, Report, ReportKind, Source};
use clap::{Parser as ClapParser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use coral_compiler::{Compiler, Constant, SymbolTable};
use coral_parser::{ParseError, Parser, Program};
use coral_vm::{Value, NULL, VM};

/// Coral - a small bytecode-compiled expression language
#[derive(ClapParser)]
#[command(name = "coral")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Coral source file
    Run {
        /// Path to the Coral source file
        file: PathBuf,
    },

    /// Start an interactive REPL
    Repl,

    /// Check a file for errors without running
    Check {
        /// Path to the Coral source file
        file: PathBuf,
    },

    /// Disassemble a file to show bytecode
    Disasm {
        /// Path to the Coral source file
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { file }) => run_file(&file),
        Some(Commands::Repl) => run_repl(),
        Some(Commands::Check { file }) => check_file(&file),
        Some(Commands::Disasm { file }) => disasm_file(&file),
        None => run_repl(), // Default to REPL if no command given
    }
}

fn read_source(path: &PathBuf) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading file '{}': {}", path.display(), e);
        ExitCode::FAILURE
    })
}

/// Parse a source file, reporting any errors.
fn parse_source(filename: &str, source: &str) -> Result<Program, ExitCode> {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    if parser.has_errors() {
        report_parse_errors(filename, source, parser.errors());
        return Err(ExitCode::FAILURE);
    }
    Ok(program)
}

/// Run a Coral source file
fn run_file(path: &PathBuf) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy().to_string();

    let program = match parse_source(&filename, &source) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(&program) {
        eprintln!("Compile error: {}", e);
        return ExitCode::FAILURE;
    }

    let mut vm = VM::new(compiler.bytecode());
    if let Err(e) = vm.run() {
        eprintln!("Runtime error: {}", e);
        return ExitCode::FAILURE;
    }

    let result = vm.last_popped();
    if *result != NULL {
        println!("{}", result);
    }

    ExitCode::SUCCESS
}

/// Check a file for errors without running
fn check_file(path: &PathBuf) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy().to_string();

    let program = match parse_source(&filename, &source) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(&program) {
        eprintln!("Compile error: {}", e);
        return ExitCode::FAILURE;
    }

    println!("No errors found in '{}'", path.display());
    ExitCode::SUCCESS
}

/// Disassemble a file to show bytecode
fn disasm_file(path: &PathBuf) -> ExitCode {
    let source = match read_source(path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy().to_string();

    let program = match parse_source(&filename, &source) {
        Ok(p) => p,
        Err(code) => return code,
    };

    let mut compiler = Compiler::new();
    if let Err(e) = compiler.compile(&program) {
        eprintln!("Compile error: {}", e);
        return ExitCode::FAILURE;
    }

    let bytecode = compiler.bytecode();
    println!("== instructions ==");
    print!("{}", bytecode.instructions);
    println!("== constants ==");
    for (i, constant) in bytecode.constants.iter().enumerate() {
        println!("{:04} {}", i, constant);
    }

    ExitCode::SUCCESS
}

/// Run the interactive REPL
fn run_repl() -> ExitCode {
    println!("Coral {} - Interactive REPL", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl+D to quit.\n");

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error initializing REPL: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Load history
    let history_path = history_path();
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    // bindings, constants and globals survive across turns
    let mut symbol_table = SymbolTable::new();
    let mut constants: Vec<Constant> = Vec::new();
    let mut globals = vec![NULL; coral_vm::GLOBALS_SIZE];

    loop {
        let readline = rl.readline(">> ");
        match readline {
            Ok(line) => {
                let line = line.trim();

                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    "exit" | "quit" => break,
                    "reset" => {
                        symbol_table = SymbolTable::new();
                        constants = Vec::new();
                        globals = vec![NULL; coral_vm::GLOBALS_SIZE];
                        println!("State reset.");
                        continue;
                    }
                    _ => {}
                }

                let (table, consts, result) =
                    eval_repl_input(line, symbol_table, constants, &mut globals);
                symbol_table = table;
                constants = consts;
                if let Some(value) = result {
                    if value != NULL {
                        println!("{}", value);
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    // Save history
    if let Some(ref path) = history_path {
        let _ = rl.save_history(path);
    }

    ExitCode::SUCCESS
}

/// Evaluate one REPL line, threading compiler state and globals through.
fn eval_repl_input(
    line: &str,
    symbol_table: SymbolTable,
    constants: Vec<Constant>,
    globals: &mut Vec<Value>,
) -> (SymbolTable, Vec<Constant>, Option<Value>) {
    let mut parser = Parser::new(line);
    let program = parser.parse_program();
    if parser.has_errors() {
        report_parse_errors("<repl>", line, parser.errors());
        return (symbol_table, constants, None);
    }

    let mut compiler = Compiler::with_state(symbol_table, constants);
    let compiled = compiler.compile(&program);
    let bytecode = compiler.bytecode();
    let (symbol_table, constants) = compiler.into_state();

    if let Err(e) = compiled {
        eprintln!("Compile error: {}", e);
        return (symbol_table, constants, None);
    }

    let mut vm = VM::with_globals_store(bytecode, std::mem::take(globals));
    let ran = vm.run();
    let result = vm.last_popped().clone();
    *globals = vm.into_globals_store();

    if let Err(e) = ran {
        eprintln!("Runtime error: {}", e);
        return (symbol_table, constants, None);
    }

    (symbol_table, constants, Some(result))
}

/// Get path for REPL history file
fn history_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|mut p| {
        p.push("coral");
        let _ = std::fs::create_dir_all(&p);
        p.push("history.txt");
        p
    })
}

// ---
// Error reporting with ariadne
// ---

fn report_parse_errors(filename: &str, source: &str, errors: &[ParseError]) {
    for error in errors {
        let span = error.span();
        let start = span.start as usize;
        let end = span.end as usize;

        Report::<(&str, std::ops::Range<usize>)>::build(ReportKind::Error, filename, start)
            .with_message("Parse error")
            .with_label(
                Label::new((filename, start..end))
                    .with_message(format!("{}", error))
                    .with_color(Color::Red),
            )
            .finish()
            .print((filename, Source::from(source)))
            .unwrap();
    }
}
