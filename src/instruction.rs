//! Process instruction set: opcodes, random program generation, and the
//! user-facing mini-language parser.
//!
//! Variables and memory words are unsigned 16-bit; arithmetic saturates into
//! `[0, 65535]`. `READ`/`WRITE` operate on 2-byte little-endian words at
//! virtual addresses inside the owning process's address space.

use rand::rngs::SmallRng;
use rand::Rng;

use crate::error::{Error, Result};
use crate::types::VirtAddr;

/// Maximum statements accepted in a user-supplied program.
pub const MAX_USER_INSTRUCTIONS: usize = 50;

/// One process instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Log a message; occurrences of `$ident` are substituted with the
    /// variable's current value at execution time.
    Print(String),
    /// Bind a variable to a constant.
    Declare(String, u16),
    /// `dst = a + b`, saturating.
    Add(String, String, String),
    /// `dst = a - b`, saturating.
    Subtract(String, String, String),
    /// Yield for one tick. The argument is retained but does not extend the
    /// execution cost.
    Sleep(u16),
    /// Begin a counted loop with the given iteration count.
    ForStart(u16),
    /// Close the innermost counted loop.
    ForEnd,
    /// Load the 16-bit word at the address into a variable.
    Read(String, VirtAddr),
    /// Store a variable's value as a 16-bit word at the address.
    Write(VirtAddr, String),
}

/// Generate a random program of length uniform in `[min_ins, max_ins]`.
///
/// Opcode kinds are drawn uniformly. A `FOR` pick emits the
/// `ForStart`/`Print`/`ForEnd` triple when at least two positions remain,
/// and degrades to a plain `Print` otherwise. `READ`/`WRITE` addresses are
/// 2-byte aligned and uniform in `[0, mem_required)`.
pub fn generate_program(
    rng: &mut SmallRng,
    name: &str,
    min_ins: u32,
    max_ins: u32,
    mem_required: usize,
) -> Vec<Instruction> {
    let target = rng.gen_range(min_ins..=max_ins) as usize;
    let greeting = format!("Hello world from {name}!");
    let mut program = Vec::with_capacity(target);

    let mut i = 0;
    while i < target {
        match rng.gen_range(0..8u32) {
            0 => {
                program.push(Instruction::Print(greeting.clone()));
                i += 1;
            }
            1 => {
                program.push(Instruction::Declare(format!("var{i}"), rng.gen_range(1..=100)));
                i += 1;
            }
            2 => {
                let dst = format!("var{}", i % 3);
                let src = format!("var{}", (i + 1) % 3);
                program.push(Instruction::Add(dst.clone(), dst, src));
                i += 1;
            }
            3 => {
                let dst = format!("var{}", i % 3);
                let src = format!("var{}", (i + 1) % 3);
                program.push(Instruction::Subtract(dst.clone(), dst, src));
                i += 1;
            }
            4 => {
                program.push(Instruction::Sleep(rng.gen_range(1..=10)));
                i += 1;
            }
            5 => {
                if i + 2 < target {
                    let iterations = rng.gen_range(2..=5);
                    program.push(Instruction::ForStart(iterations));
                    program.push(Instruction::Print(greeting.clone()));
                    program.push(Instruction::ForEnd);
                    i += 3;
                } else {
                    program.push(Instruction::Print(greeting.clone()));
                    i += 1;
                }
            }
            6 => {
                program.push(Instruction::Read(format!("var{}", i % 32), random_addr(rng, mem_required)));
                i += 1;
            }
            _ => {
                program.push(Instruction::Write(random_addr(rng, mem_required), format!("var{}", i % 32)));
                i += 1;
            }
        }
    }

    program
}

/// A 2-byte-aligned uniform address in `[0, mem_required)`.
fn random_addr(rng: &mut SmallRng, mem_required: usize) -> VirtAddr {
    let words = (mem_required / 2).max(1);
    (rng.gen_range(0..words) * 2) as VirtAddr
}

/// Parse a user program: semicolon-separated statements.
///
/// Accepted statements: `DECLARE v k`, `ADD d a b`, `SUBTRACT d a b`,
/// `READ v addr`, `WRITE addr v`, `PRINT (msg)`. Addresses are decimal or
/// `0x` hex. Programs must contain 1..=50 instructions.
pub fn parse_program(src: &str) -> Result<Vec<Instruction>> {
    let mut program = Vec::new();

    for stmt in src.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }

        if let Some(rest) = stmt.strip_prefix("PRINT") {
            program.push(parse_print(rest.trim())?);
            continue;
        }

        let tokens: Vec<&str> = stmt.split_whitespace().collect();
        let instr = match tokens.as_slice() {
            ["DECLARE", var, value] => {
                Instruction::Declare(parse_ident(var)?, parse_u16_clamped(value)?)
            }
            ["ADD", dst, a, b] => {
                Instruction::Add(parse_ident(dst)?, parse_ident(a)?, parse_ident(b)?)
            }
            ["SUBTRACT", dst, a, b] => {
                Instruction::Subtract(parse_ident(dst)?, parse_ident(a)?, parse_ident(b)?)
            }
            ["READ", var, addr] => Instruction::Read(parse_ident(var)?, parse_addr(addr)?),
            ["WRITE", addr, var] => Instruction::Write(parse_addr(addr)?, parse_ident(var)?),
            _ => return Err(Error::rejected(format!("invalid statement: {stmt:?}"))),
        };
        program.push(instr);
    }

    if program.is_empty() {
        return Err(Error::rejected("program has no instructions"));
    }
    if program.len() > MAX_USER_INSTRUCTIONS {
        return Err(Error::rejected(format!(
            "program has {} instructions, maximum is {MAX_USER_INSTRUCTIONS}",
            program.len()
        )));
    }
    Ok(program)
}

fn parse_print(rest: &str) -> Result<Instruction> {
    let inner = rest
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::rejected(format!("PRINT expects (msg), got {rest:?}")))?;
    // Surrounding double quotes are presentation, not payload.
    let inner = inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(inner);
    Ok(Instruction::Print(inner.to_string()))
}

fn parse_ident(s: &str) -> Result<String> {
    let mut chars = s.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(s.to_string())
    } else {
        Err(Error::rejected(format!("invalid identifier: {s:?}")))
    }
}

fn parse_u16_clamped(s: &str) -> Result<u16> {
    let value: i64 = s
        .parse()
        .map_err(|_| Error::rejected(format!("invalid value: {s:?}")))?;
    Ok(value.clamp(0, u16::MAX as i64) as u16)
}

fn parse_addr(s: &str) -> Result<VirtAddr> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        VirtAddr::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| Error::rejected(format!("invalid address: {s:?}")))
}
