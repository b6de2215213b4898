use std::rc::Rc;

use coral_compiler::bytecode::{read_u16, Bytecode, Instructions, OpCode};
use rustc_hash::FxHashMap;

use crate::value::{Value, ValueKind, FALSE, NULL, TRUE};

/// Operand stack capacity.
pub const STACK_SIZE: usize = 2048;
/// Globals vector capacity.
pub const GLOBALS_SIZE: usize = 65536;

/// VM execution errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("unsupported types for binary operation: {left} {right}")]
    UnsupportedBinaryOperands { left: ValueKind, right: ValueKind },
    #[error("unsupported type for negation: {0}")]
    UnsupportedNegation(ValueKind),
    #[error("unknown operator: {op} ({left} {right})")]
    UnknownOperator {
        op: OpCode,
        left: ValueKind,
        right: ValueKind,
    },
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(ValueKind),
    #[error("index operator not supported: {0}")]
    UnsupportedIndex(ValueKind),
    #[error("undefined opcode {0}")]
    UndefinedOpcode(u8),
    #[error("opcode {0} not implemented")]
    Unimplemented(OpCode),
}

/// The Coral virtual machine.
///
/// Executes one bytecode artifact against a fixed-capacity operand
/// stack and a globals vector. The globals vector can be threaded
/// through successive VMs to keep bindings alive across REPL turns.
pub struct VM {
    constants: Vec<Value>,
    instructions: Instructions,
    stack: Vec<Value>,
    /// Next free stack slot; the top of the stack is at sp - 1.
    sp: usize,
    globals: Vec<Value>,
}

impl VM {
    /// Create a VM for the given bytecode with a fresh globals store.
    pub fn new(bytecode: Bytecode) -> Self {
        Self::with_globals_store(bytecode, vec![NULL; GLOBALS_SIZE])
    }

    /// Create a VM that reuses an existing globals store.
    pub fn with_globals_store(bytecode: Bytecode, globals: Vec<Value>) -> Self {
        let constants = bytecode.constants.iter().map(Value::from).collect();
        Self {
            constants,
            instructions: bytecode.instructions,
            stack: vec![NULL; STACK_SIZE],
            sp: 0,
            globals,
        }
    }

    /// Hand the globals store back for the next run.
    pub fn into_globals_store(self) -> Vec<Value> {
        self.globals
    }

    /// The value most recently popped off the stack.
    ///
    /// Pop does not clear the vacated slot, so after a program's final
    /// OpPop this reads the completed expression's result.
    pub fn last_popped(&self) -> &Value {
        &self.stack[self.sp]
    }

    /// Run the fetch-decode-execute loop to completion.
    ///
    /// The first error aborts execution; the VM is left inspectable and
    /// globals written before the error persist.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        let mut ip = 0;
        while ip < self.instructions.len() {
            let byte = self.instructions.as_bytes()[ip];
            let op = OpCode::try_from(byte).map_err(|_| RuntimeError::UndefinedOpcode(byte))?;
            ip += 1;

            match op {
                OpCode::Constant => {
                    let index = self.read_operand_u16(ip);
                    ip += 2;
                    let constant = self.constants[index].clone();
                    self.push(constant)?;
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    self.execute_binary_operation(op)?;
                }
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::True => self.push(TRUE)?,
                OpCode::False => self.push(FALSE)?,
                OpCode::Null => self.push(NULL)?,
                OpCode::Equal | OpCode::NotEqual | OpCode::GreaterThan => {
                    self.execute_comparison(op)?;
                }
                OpCode::Minus => self.execute_minus_operator()?,
                OpCode::Bang => self.execute_bang_operator()?,
                OpCode::JumpNotTruthy => {
                    let target = self.read_operand_u16(ip);
                    ip += 2;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        ip = target;
                    }
                }
                OpCode::Jump => {
                    ip = self.read_operand_u16(ip);
                }
                OpCode::SetGlobal => {
                    let index = self.read_operand_u16(ip);
                    ip += 2;
                    let value = self.pop()?;
                    self.globals[index] = value;
                }
                OpCode::GetGlobal => {
                    let index = self.read_operand_u16(ip);
                    ip += 2;
                    let value = self.globals[index].clone();
                    self.push(value)?;
                }
                OpCode::Array => {
                    let count = self.read_operand_u16(ip);
                    ip += 2;
                    let array = self.build_array(count);
                    self.push(array)?;
                }
                OpCode::Hash => {
                    let count = self.read_operand_u16(ip);
                    ip += 2;
                    let hash = self.build_hash(count)?;
                    self.push(hash)?;
                }
                OpCode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }
                OpCode::Call
                | OpCode::ReturnValue
                | OpCode::Return
                | OpCode::SetLocal
                | OpCode::GetLocal
                | OpCode::GetBuiltin
                | OpCode::Closure => {
                    return Err(RuntimeError::Unimplemented(op));
                }
            }
        }
        Ok(())
    }

    // ---
    // Stack operations
    // ---

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        if self.sp == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        self.sp -= 1;
        // the slot keeps its value so last_popped() can observe it
        Ok(self.stack[self.sp].clone())
    }

    fn read_operand_u16(&self, ip: usize) -> usize {
        read_u16(&self.instructions.as_bytes()[ip..]) as usize
    }

    // ---
    // Handlers
    // ---

    fn execute_binary_operation(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;
        match (&left, &right) {
            (Value::Int(left), Value::Int(right)) => {
                self.execute_integer_binary_operation(op, *left, *right)
            }
            _ => Err(RuntimeError::UnsupportedBinaryOperands {
                left: left.kind(),
                right: right.kind(),
            }),
        }
    }

    fn execute_integer_binary_operation(
        &mut self,
        op: OpCode,
        left: i64,
        right: i64,
    ) -> Result<(), RuntimeError> {
        let result = match op {
            OpCode::Add => left + right,
            OpCode::Sub => left - right,
            OpCode::Mul => left * right,
            OpCode::Div => {
                if right == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                left / right
            }
            _ => {
                return Err(RuntimeError::UnknownOperator {
                    op,
                    left: ValueKind::Integer,
                    right: ValueKind::Integer,
                })
            }
        };
        self.push(Value::Int(result))
    }

    fn execute_comparison(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        let right = self.pop()?;
        let left = self.pop()?;

        if let (Value::Int(left), Value::Int(right)) = (&left, &right) {
            let result = match op {
                OpCode::Equal => left == right,
                OpCode::NotEqual => left != right,
                OpCode::GreaterThan => left > right,
                _ => {
                    return Err(RuntimeError::UnknownOperator {
                        op,
                        left: ValueKind::Integer,
                        right: ValueKind::Integer,
                    })
                }
            };
            return self.push(Value::from_bool(result));
        }

        // non-integers: canonical booleans and null compare by value,
        // which is exactly the interned-singleton identity shortcut
        match op {
            OpCode::Equal => self.push(Value::from_bool(left == right)),
            OpCode::NotEqual => self.push(Value::from_bool(left != right)),
            _ => Err(RuntimeError::UnknownOperator {
                op,
                left: left.kind(),
                right: right.kind(),
            }),
        }
    }

    fn execute_bang_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop()?;
        let result = match operand {
            Value::Bool(true) => FALSE,
            Value::Bool(false) => TRUE,
            Value::Null => TRUE,
            _ => FALSE,
        };
        self.push(result)
    }

    fn execute_minus_operator(&mut self) -> Result<(), RuntimeError> {
        let operand = self.pop()?;
        match operand {
            Value::Int(value) => self.push(Value::Int(-value)),
            _ => Err(RuntimeError::UnsupportedNegation(operand.kind())),
        }
    }

    fn build_array(&mut self, count: usize) -> Value {
        let elements = self.stack[self.sp - count..self.sp].to_vec();
        self.sp -= count;
        Value::Array(Rc::new(elements))
    }

    fn build_hash(&mut self, count: usize) -> Result<Value, RuntimeError> {
        let mut pairs = FxHashMap::default();
        let mut i = self.sp - count;
        while i < self.sp {
            let key = &self.stack[i];
            let value = self.stack[i + 1].clone();
            let key = key
                .hash_key()
                .ok_or(RuntimeError::UnusableHashKey(key.kind()))?;
            pairs.insert(key, value);
            i += 2;
        }
        self.sp -= count;
        Ok(Value::Hash(Rc::new(pairs)))
    }

    fn execute_index_expression(&mut self, left: Value, index: Value) -> Result<(), RuntimeError> {
        match (&left, &index) {
            (Value::Array(elements), Value::Int(i)) => {
                let value = if *i < 0 || *i as usize >= elements.len() {
                    NULL
                } else {
                    elements[*i as usize].clone()
                };
                self.push(value)
            }
            (Value::Hash(pairs), _) => {
                let key = index
                    .hash_key()
                    .ok_or(RuntimeError::UnusableHashKey(index.kind()))?;
                let value = pairs.get(&key).cloned().unwrap_or(NULL);
                self.push(value)
            }
            _ => Err(RuntimeError::UnsupportedIndex(left.kind())),
        }
    }
}
