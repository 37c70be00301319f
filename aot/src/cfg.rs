// cfg.rs - Control flow recovery
//
// Discovers function bodies, block boundaries and the set of functions
// reachable from the program entry through JSR. Everything here is analysis
// only; nothing touches the IR module.

use crate::disasm::{Decoder, Instruction};
use crate::error::DecodeError;
use crate::memory::Memory;
use log::debug;
use std::collections::{BTreeSet, VecDeque};

/// Order in which the function walk visits pending addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    DepthFirst,
    BreadthFirst,
}

/// Instruction addresses of the function starting at `entry`.
///
/// Follows fallthrough, branch and jump edges; stops at returns and jumps;
/// never enters a callee.
pub fn identify_function<M: Memory>(
    entry: u16,
    decoder: &Decoder<M>,
) -> Result<BTreeSet<u16>, DecodeError> {
    walk_function(entry, decoder, Visit::DepthFirst)
}

fn walk_function<M: Memory>(
    entry: u16,
    decoder: &Decoder<M>,
    order: Visit,
) -> Result<BTreeSet<u16>, DecodeError> {
    let mut visited = BTreeSet::new();
    let mut worklist = VecDeque::from([entry]);

    loop {
        let next = match order {
            Visit::DepthFirst => worklist.pop_back(),
            Visit::BreadthFirst => worklist.pop_front(),
        };
        let Some(addr) = next else { break };
        if visited.contains(&addr) {
            continue;
        }

        let inst = decoder.decode(addr)?;
        visited.insert(addr);
        worklist.extend(inst.successors());
    }

    Ok(visited)
}

/// Block start addresses of a function.
///
/// Always contains `entry`. Every branch contributes its target and its
/// fallthrough, every jump its target.
pub fn identify_blocks<M: Memory>(
    entry: u16,
    function: &BTreeSet<u16>,
    decoder: &Decoder<M>,
) -> Result<BTreeSet<u16>, DecodeError> {
    let mut blocks = BTreeSet::from([entry]);

    for &addr in function {
        let inst = decoder.decode(addr)?;
        if inst.is_branch() {
            blocks.insert(inst.following());
        }
        if let Some(target) = inst.branch_target().or(inst.jump_target()) {
            blocks.insert(target);
        }
    }

    Ok(blocks)
}

/// Entry addresses of every function reachable from `entry` through calls
pub fn find_reachable_functions<M: Memory>(
    entry: u16,
    decoder: &Decoder<M>,
) -> Result<BTreeSet<u16>, DecodeError> {
    let mut functions = BTreeSet::new();
    let mut worklist = vec![entry];

    while let Some(addr) = worklist.pop() {
        if !functions.insert(addr) {
            continue;
        }

        let body = identify_function(addr, decoder)?;
        debug!("Function {:04X}: {} instructions", addr, body.len());

        for &inst_addr in &body {
            if let Some(target) = decoder.decode(inst_addr)?.call_target() {
                if !functions.contains(&target) {
                    worklist.push(target);
                }
            }
        }
    }

    Ok(functions)
}

/// Decoded instructions of a function in address order
pub fn instructions<M: Memory>(
    function: &BTreeSet<u16>,
    decoder: &Decoder<M>,
) -> Result<Vec<Instruction>, DecodeError> {
    function.iter().map(|&addr| decoder.decode(addr)).collect()
}

/// Disassembly listing of one function. Lines that start a block are
/// marked with `--`.
pub fn listing<M: Memory>(entry: u16, decoder: &Decoder<M>) -> Result<String, DecodeError> {
    let function = identify_function(entry, decoder)?;
    let blocks = identify_blocks(entry, &function, decoder)?;

    let mut out = String::new();
    out.push_str(&format!("f_{:04X}:\n", entry));
    for inst in instructions(&function, decoder)? {
        let marker = if blocks.contains(&inst.location) {
            "-- "
        } else {
            "   "
        };
        out.push_str(&format!("{}{}\n", marker, inst));
    }
    Ok(out)
}
