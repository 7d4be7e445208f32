//! Control flow simplifications run on MIR before it is lowered

use hashbrown::{HashMap, HashSet};

use super::{BlockId, Function};

/// Both passes converge after a handful of rounds in practice
const MAX_ITERATIONS: usize = 32;

pub fn optimize_function(function: &mut Function) {
    // Fixed per-block overhead so that removing a block always lowers the size
    let block_weight = function
        .blocks
        .values()
        .map(|block| block.statements.len())
        .max()
        .unwrap_or(0)
        + 1;

    let mut size_history: HashSet<usize> =
        HashSet::from([function_size(function, block_weight)]);

    for _ in 0..MAX_ITERATIONS {
        eliminate_unreachable_blocks(function);
        join_sequential_blocks(function);

        if !size_history.insert(function_size(function, block_weight)) {
            break;
        }
    }

    tracing::trace!(
        function = %function.name,
        blocks = function.blocks.len(),
        "optimized mir"
    );
}

fn function_size(function: &Function, block_weight: usize) -> usize {
    function.blocks.len() * block_weight + function.statement_count()
}

fn predecessor_counts(function: &Function) -> HashMap<BlockId, usize> {
    let mut counts = HashMap::new();

    for block in function.blocks.values() {
        for successor in block.terminator.successors() {
            *counts.entry(successor).or_default() += 1;
        }
    }

    counts
}

/// Removes blocks nothing jumps to, except the entry
fn eliminate_unreachable_blocks(function: &mut Function) {
    let predecessors = predecessor_counts(function);
    let entry = function.entry;

    function
        .blocks
        .retain(|id, _| *id == entry || predecessors.contains_key(id));
}

/// Fuses `a -> b` when that edge is the only way out of `a` and the only way
/// into `b`
fn join_sequential_blocks(function: &mut Function) {
    while let Some((first, second)) = find_sequential_pair(function) {
        let Some(absorbed) = function.blocks.remove(&second) else {
            return;
        };

        if let Some(block) = function.blocks.get_mut(&first) {
            block.statements.extend(absorbed.statements);
            block.terminator = absorbed.terminator;
        }

        if function.exit == second {
            function.exit = first;
        }
    }
}

fn find_sequential_pair(function: &Function) -> Option<(BlockId, BlockId)> {
    let predecessors = predecessor_counts(function);

    function.blocks.values().find_map(|block| {
        let [successor] = block.terminator.successors()[..] else {
            return None;
        };

        let fusible = successor != block.id
            && successor != function.entry
            && predecessors.get(&successor) == Some(&1);

        fusible.then_some((block.id, successor))
    })
}
