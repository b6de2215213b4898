use coral_parser::ast::{Block, Expr, InfixOp, PrefixOp, Program, Statement};

use crate::bytecode::{make, Bytecode, Constant, Instructions, OpCode};
use crate::symbol_table::SymbolTable;

/// Compilation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompileError {
    #[error("undefined variable {0}")]
    UndefinedVariable(String),
    #[error("too many constants in one compilation unit")]
    TooManyConstants,
}

/// Operand value emitted for forward jumps before their target is known.
const PLACEHOLDER_TARGET: usize = 9999;

/// The opcode and position of an instruction the compiler emitted.
#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: OpCode,
    position: usize,
}

/// The Coral bytecode compiler.
///
/// Walks the syntax tree and emits a flat instruction stream plus a
/// constant pool. Forward jumps are emitted with a placeholder target
/// and back-patched once the target offset is known.
pub struct Compiler {
    instructions: Instructions,
    constants: Vec<Constant>,
    // two-instruction lookback, enough for trailing-pop elimination
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
    symbol_table: SymbolTable,
}

impl Compiler {
    /// Create a fresh compiler.
    pub fn new() -> Self {
        Self::with_state(SymbolTable::new(), Vec::new())
    }

    /// Create a compiler seeded with prior bindings and constants, so a
    /// REPL can carry state across compile-run turns.
    pub fn with_state(symbol_table: SymbolTable, constants: Vec<Constant>) -> Self {
        Self {
            instructions: Instructions::new(),
            constants,
            last_instruction: None,
            previous_instruction: None,
            symbol_table,
        }
    }

    /// Compile a program into the instruction stream.
    pub fn compile(&mut self, program: &Program) -> Result<(), CompileError> {
        for statement in &program.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    /// The assembled bytecode.
    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    /// Hand back the symbol table and constant pool for the next turn.
    pub fn into_state(self) -> (SymbolTable, Vec<Constant>) {
        (self.symbol_table, self.constants)
    }

    // ---
    // Lowerings
    // ---

    fn compile_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Expression(expr) => {
                self.compile_expr(expr)?;
                // every statement leaves the stack at its prior depth
                self.emit(OpCode::Pop, &[]);
            }
            Statement::Let { name, value } => {
                self.compile_expr(value)?;
                let symbol = self.symbol_table.define(name);
                self.emit(OpCode::SetGlobal, &[symbol.index]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), CompileError> {
        for statement in &block.statements {
            self.compile_statement(statement)?;
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Integer(value) => {
                let index = self.add_constant(Constant::Int(*value))?;
                self.emit(OpCode::Constant, &[index]);
            }
            Expr::Str(value) => {
                let index = self.add_constant(Constant::Str(value.clone()))?;
                self.emit(OpCode::Constant, &[index]);
            }
            Expr::Boolean(true) => {
                self.emit(OpCode::True, &[]);
            }
            Expr::Boolean(false) => {
                self.emit(OpCode::False, &[]);
            }
            Expr::Identifier(name) => {
                let index = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?
                    .index;
                self.emit(OpCode::GetGlobal, &[index]);
            }
            Expr::Prefix { op, right } => {
                self.compile_expr(right)?;
                match op {
                    PrefixOp::Neg => self.emit(OpCode::Minus, &[]),
                    PrefixOp::Not => self.emit(OpCode::Bang, &[]),
                };
            }
            Expr::Infix { op, left, right } => self.compile_infix(*op, left, right)?,
            Expr::If {
                condition,
                consequence,
                alternative,
            } => self.compile_if(condition, consequence, alternative.as_ref())?,
            Expr::Array(elements) => {
                for element in elements {
                    self.compile_expr(element)?;
                }
                self.emit(OpCode::Array, &[elements.len()]);
            }
            Expr::Hash(pairs) => {
                // deterministic emission order: sort keys by printed form
                let mut pairs: Vec<&(Expr, Expr)> = pairs.iter().collect();
                pairs.sort_by_key(|(key, _)| key.to_string());
                for (key, value) in &pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(OpCode::Hash, &[pairs.len() * 2]);
            }
            Expr::Index { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(OpCode::Index, &[]);
            }
        }
        Ok(())
    }

    fn compile_infix(&mut self, op: InfixOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        // `<` is lowered as the mirrored `>`: only one ordering opcode exists
        if op == InfixOp::Lt {
            self.compile_expr(right)?;
            self.compile_expr(left)?;
            self.emit(OpCode::GreaterThan, &[]);
            return Ok(());
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        let opcode = match op {
            InfixOp::Add => OpCode::Add,
            InfixOp::Sub => OpCode::Sub,
            InfixOp::Mul => OpCode::Mul,
            InfixOp::Div => OpCode::Div,
            InfixOp::Eq => OpCode::Equal,
            InfixOp::NotEq => OpCode::NotEqual,
            InfixOp::Gt | InfixOp::Lt => OpCode::GreaterThan,
        };
        self.emit(opcode, &[]);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expr,
        consequence: &Block,
        alternative: Option<&Block>,
    ) -> Result<(), CompileError> {
        self.compile_expr(condition)?;

        let jump_not_truthy_pos = self.emit(OpCode::JumpNotTruthy, &[PLACEHOLDER_TARGET]);

        self.compile_block(consequence)?;
        // the branch value is the if-expression's result; drop the Pop the
        // trailing expression statement emitted
        if self.last_instruction_is(OpCode::Pop) {
            self.remove_last_pop();
        }

        let jump_pos = self.emit(OpCode::Jump, &[PLACEHOLDER_TARGET]);

        let after_consequence = self.instructions.len();
        self.change_operand(jump_not_truthy_pos, after_consequence);

        match alternative {
            None => {
                self.emit(OpCode::Null, &[]);
            }
            Some(alternative) => {
                self.compile_block(alternative)?;
                if self.last_instruction_is(OpCode::Pop) {
                    self.remove_last_pop();
                }
            }
        }

        let after_alternative = self.instructions.len();
        self.change_operand(jump_pos, after_alternative);
        Ok(())
    }

    // ---
    // Emission
    // ---

    fn add_constant(&mut self, constant: Constant) -> Result<usize, CompileError> {
        if self.constants.len() > u16::MAX as usize {
            return Err(CompileError::TooManyConstants);
        }
        self.constants.push(constant);
        Ok(self.constants.len() - 1)
    }

    fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let instruction = make(op, operands);
        let position = self.instructions.append(&instruction);
        self.previous_instruction = self.last_instruction;
        self.last_instruction = Some(EmittedInstruction { opcode: op, position });
        position
    }

    fn last_instruction_is(&self, op: OpCode) -> bool {
        matches!(self.last_instruction, Some(last) if last.opcode == op)
    }

    fn remove_last_pop(&mut self) {
        if let Some(last) = self.last_instruction {
            self.instructions.truncate(last.position);
            self.last_instruction = self.previous_instruction;
        }
    }

    /// Rewrite the operand of the instruction at `position` in place.
    /// Relies on operand width being a pure function of the opcode.
    fn change_operand(&mut self, position: usize, operand: usize) {
        if let Ok(op) = OpCode::try_from(self.instructions.as_bytes()[position]) {
            let instruction = make(op, &[operand]);
            self.instructions.replace(position, &instruction);
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::read_operands;
    use coral_parser::Parser;

    fn compile(input: &str) -> Bytecode {
        let mut parser = Parser::new(input);
        let program = parser.parse_program();
        assert!(
            parser.errors().is_empty(),
            "parse errors for {:?}: {:?}",
            input,
            parser.errors()
        );
        let mut compiler = Compiler::new();
        compiler.compile(&program).expect("compile error");
        compiler.bytecode()
    }

    fn assert_instructions(input: &str, expected: &[Vec<u8>]) {
        let bytecode = compile(input);
        let concatted: Vec<u8> = expected.concat();
        assert_eq!(
            bytecode.instructions.as_bytes(),
            &concatted[..],
            "wrong instructions for {:?}, got:\n{}",
            input,
            bytecode.instructions
        );
    }

    fn assert_constants(input: &str, expected: &[Constant]) {
        let bytecode = compile(input);
        assert_eq!(bytecode.constants, expected, "wrong constants for {:?}", input);
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_instructions(
            "1 + 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
        assert_constants("1 + 2", &[Constant::Int(1), Constant::Int(2)]);

        assert_instructions(
            "1; 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Pop, &[]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "1 - 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Sub, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "1 * 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Mul, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "2 / 1",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Div, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "-1",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Minus, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_boolean_expressions() {
        assert_instructions("true", &[make(OpCode::True, &[]), make(OpCode::Pop, &[])]);
        assert_instructions("false", &[make(OpCode::False, &[]), make(OpCode::Pop, &[])]);

        assert_instructions(
            "1 > 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::GreaterThan, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "1 == 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Equal, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "1 != 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::NotEqual, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "true == false",
            &[
                make(OpCode::True, &[]),
                make(OpCode::False, &[]),
                make(OpCode::Equal, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "!true",
            &[
                make(OpCode::True, &[]),
                make(OpCode::Bang, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_less_than_is_mirrored_greater_than() {
        // `1 < 2` swaps the operand order and reuses OpGreaterThan
        assert_instructions(
            "1 < 2",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::GreaterThan, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
        assert_constants("1 < 2", &[Constant::Int(2), Constant::Int(1)]);

        let lt = compile("1 < 2");
        let gt = compile("2 > 1");
        assert_eq!(lt.instructions, gt.instructions);
        assert_eq!(lt.constants, gt.constants);
    }

    #[test]
    fn test_conditional_without_alternative() {
        assert_instructions(
            "if (true) { 10 }; 3333;",
            &[
                // 0000
                make(OpCode::True, &[]),
                // 0001
                make(OpCode::JumpNotTruthy, &[10]),
                // 0004
                make(OpCode::Constant, &[0]),
                // 0007
                make(OpCode::Jump, &[11]),
                // 0010
                make(OpCode::Null, &[]),
                // 0011
                make(OpCode::Pop, &[]),
                // 0012
                make(OpCode::Constant, &[1]),
                // 0015
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_conditional_with_alternative() {
        assert_instructions(
            "if (true) { 10 } else { 20 }; 3333;",
            &[
                // 0000
                make(OpCode::True, &[]),
                // 0001
                make(OpCode::JumpNotTruthy, &[10]),
                // 0004
                make(OpCode::Constant, &[0]),
                // 0007
                make(OpCode::Jump, &[13]),
                // 0010
                make(OpCode::Constant, &[1]),
                // 0013
                make(OpCode::Pop, &[]),
                // 0014
                make(OpCode::Constant, &[2]),
                // 0017
                make(OpCode::Pop, &[]),
            ],
        );
        assert_constants(
            "if (true) { 10 } else { 20 }; 3333;",
            &[Constant::Int(10), Constant::Int(20), Constant::Int(3333)],
        );
    }

    #[test]
    fn test_jump_targets_land_on_instruction_boundaries() {
        let bytecode = compile("if (true) { 10 }; 3333;");
        let bytes = bytecode.instructions.as_bytes();

        // walk the stream collecting instruction boundaries and jump targets
        let mut boundaries = Vec::new();
        let mut targets = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            boundaries.push(i);
            let op = OpCode::try_from(bytes[i]).expect("valid opcode");
            let (operands, read) = read_operands(op.definition(), &bytes[i + 1..]);
            if matches!(op, OpCode::Jump | OpCode::JumpNotTruthy) {
                targets.push(operands[0]);
            }
            i += 1 + read;
        }
        boundaries.push(bytes.len());

        assert!(!targets.is_empty());
        for target in targets {
            assert!(
                boundaries.contains(&target),
                "jump target {} lands mid-instruction",
                target
            );
        }
    }

    #[test]
    fn test_global_let_statements() {
        assert_instructions(
            "let one = 1; let two = 2;",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::SetGlobal, &[1]),
            ],
        );

        assert_instructions(
            "let one = 1; one;",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "let one = 1; let two = one; two;",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::SetGlobal, &[0]),
                make(OpCode::GetGlobal, &[0]),
                make(OpCode::SetGlobal, &[1]),
                make(OpCode::GetGlobal, &[1]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_undefined_variable() {
        let mut parser = Parser::new("undefinedVariable");
        let program = parser.parse_program();
        let mut compiler = Compiler::new();
        let err = compiler.compile(&program).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedVariable(name) if name == "undefinedVariable"));
    }

    #[test]
    fn test_string_expressions() {
        assert_instructions(
            r#""coral""#,
            &[make(OpCode::Constant, &[0]), make(OpCode::Pop, &[])],
        );
        assert_constants(r#""coral""#, &[Constant::Str("coral".to_string())]);
    }

    #[test]
    fn test_array_literals() {
        assert_instructions("[]", &[make(OpCode::Array, &[0]), make(OpCode::Pop, &[])]);

        assert_instructions(
            "[1, 2, 3]",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Array, &[3]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "[1 + 2, 3 - 4, 5 * 6]",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Add, &[]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Sub, &[]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Constant, &[5]),
                make(OpCode::Mul, &[]),
                make(OpCode::Array, &[3]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_hash_literals() {
        assert_instructions("{}", &[make(OpCode::Hash, &[0]), make(OpCode::Pop, &[])]);

        assert_instructions(
            "{1: 2, 3: 4, 5: 6}",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Constant, &[5]),
                make(OpCode::Hash, &[6]),
                make(OpCode::Pop, &[]),
            ],
        );
        assert_constants(
            "{1: 2, 3: 4, 5: 6}",
            &[
                Constant::Int(1),
                Constant::Int(2),
                Constant::Int(3),
                Constant::Int(4),
                Constant::Int(5),
                Constant::Int(6),
            ],
        );

        assert_instructions(
            "{1: 2 + 3, 4: 5 * 6}",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Add, &[]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Constant, &[5]),
                make(OpCode::Mul, &[]),
                make(OpCode::Hash, &[4]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_hash_literal_keys_sorted_by_printed_form() {
        // keys sort as "1" < "23" < "4": emission order is deterministic
        // regardless of source order
        assert_constants(
            "{23: 0, 4: 0, 1: 0}",
            &[
                Constant::Int(1),
                Constant::Int(0),
                Constant::Int(23),
                Constant::Int(0),
                Constant::Int(4),
                Constant::Int(0),
            ],
        );
    }

    #[test]
    fn test_index_expressions() {
        assert_instructions(
            "[1, 2, 3][1 + 1]",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Array, &[3]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Constant, &[4]),
                make(OpCode::Add, &[]),
                make(OpCode::Index, &[]),
                make(OpCode::Pop, &[]),
            ],
        );

        assert_instructions(
            "{1: 2}[2 - 1]",
            &[
                make(OpCode::Constant, &[0]),
                make(OpCode::Constant, &[1]),
                make(OpCode::Hash, &[2]),
                make(OpCode::Constant, &[2]),
                make(OpCode::Constant, &[3]),
                make(OpCode::Sub, &[]),
                make(OpCode::Index, &[]),
                make(OpCode::Pop, &[]),
            ],
        );
    }

    #[test]
    fn test_pop_per_expression_statement() {
        let bytecode = compile("1; 2; 3;");
        let pops = bytecode
            .instructions
            .as_bytes()
            .iter()
            .filter(|&&b| b == OpCode::Pop as u8)
            .count();
        assert_eq!(pops, 3);
    }

    #[test]
    fn test_with_state_carries_bindings() {
        let mut parser = Parser::new("let a = 5;");
        let program = parser.parse_program();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let (symbol_table, constants) = compiler.into_state();
        assert_eq!(constants.len(), 1);

        let mut parser = Parser::new("a + 1");
        let program = parser.parse_program();
        let mut compiler = Compiler::with_state(symbol_table, constants);
        compiler.compile(&program).unwrap();
        let bytecode = compiler.bytecode();

        // the prior constant pool is preserved and extended
        assert_eq!(bytecode.constants, vec![Constant::Int(5), Constant::Int(1)]);
        let expected: Vec<u8> = [
            make(OpCode::GetGlobal, &[0]),
            make(OpCode::Constant, &[1]),
            make(OpCode::Add, &[]),
            make(OpCode::Pop, &[]),
        ]
        .concat();
        assert_eq!(bytecode.instructions.as_bytes(), &expected[..]);
    }

    #[test]
    fn test_deterministic_recompilation() {
        let input = "let a = 1; if (a < 2) { a } else { 0 }; [{1: 2, 3: 4}];";
        let first = compile(input);
        let second = compile(input);
        assert_eq!(first.instructions, second.instructions);
        assert_eq!(first.constants, second.constants);
    }
}
