// Control flow analysis for structured kernel functions: dominators and
// natural loops, used to place merge instructions.

use std::collections::{HashMap, HashSet};

use kir::Function;

use crate::bail_internal;
use crate::error::Result;

/// Basic block identifier (index into `Function::blocks`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// Loop blocks in reverse post-order; the header comes first.
    pub blocks: Vec<BlockId>,
    /// Blocks inside the loop that branch back to the header.
    pub latches: Vec<BlockId>,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    pub fn is_latch(&self, block: BlockId) -> bool {
        self.latches.contains(&block)
    }

    /// The latch, when the loop has exactly one.
    pub fn latch(&self) -> Option<BlockId> {
        match self.latches.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The single block outside the loop that loop blocks branch to.
    pub fn exit_block(&self, cfg: &ControlFlow) -> Option<BlockId> {
        let mut exit = None;
        for &block in &self.blocks {
            for &succ in cfg.successors(block) {
                if self.contains(succ) {
                    continue;
                }
                match exit {
                    None => exit = Some(succ),
                    Some(existing) if existing == succ => {}
                    Some(_) => return None,
                }
            }
        }
        exit
    }
}

#[derive(Debug, Clone)]
pub struct ControlFlow {
    succs: Vec<Vec<BlockId>>,
    preds: Vec<Vec<BlockId>>,
    rpo: Vec<BlockId>,
    rpo_index: Vec<Option<usize>>,
    idom: Vec<Option<BlockId>>,
    loops: Vec<NaturalLoop>,
}

impl ControlFlow {
    pub fn build(func: &Function) -> Result<ControlFlow> {
        let index: HashMap<&str, usize> = func
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.label.as_str(), i))
            .collect();

        let n = func.blocks.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (i, block) in func.blocks.iter().enumerate() {
            for label in block.terminator.successors() {
                let Some(&target) = index.get(label) else {
                    bail_internal!("branch to unknown block '{}' in @{}", label, func.name);
                };
                succs[i].push(BlockId(target));
                preds[target].push(BlockId(i));
            }
        }

        let mut cfg = ControlFlow {
            succs,
            preds,
            rpo: Vec::new(),
            rpo_index: vec![None; n],
            idom: vec![None; n],
            loops: Vec::new(),
        };
        if n > 0 {
            cfg.compute_rpo();
            cfg.compute_dominators();
            cfg.compute_loops();
        }
        Ok(cfg)
    }

    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        &self.succs[block.0]
    }

    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.0]
    }

    fn compute_rpo(&mut self) {
        let n = self.succs.len();
        let mut visited = vec![false; n];
        let mut post = Vec::with_capacity(n);
        // Iterative DFS: (block, next successor index)
        let mut stack = vec![(BlockId(0), 0usize)];
        visited[0] = true;
        while let Some((block, next)) = stack.last_mut() {
            let block = *block;
            if let Some(&succ) = self.succs[block.0].get(*next) {
                *next += 1;
                if !visited[succ.0] {
                    visited[succ.0] = true;
                    stack.push((succ, 0));
                }
            } else {
                post.push(block);
                stack.pop();
            }
        }
        post.reverse();
        for (i, b) in post.iter().enumerate() {
            self.rpo_index[b.0] = Some(i);
        }
        self.rpo = post;
    }

    // Cooper, Harvey and Kennedy's iterative algorithm.
    fn compute_dominators(&mut self) {
        let entry = self.rpo[0];
        self.idom[entry.0] = Some(entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in &self.preds[block.0] {
                    if self.idom[pred.0].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if new_idom.is_some() && self.idom[block.0] != new_idom {
                    self.idom[block.0] = new_idom;
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        let order = |x: BlockId| self.rpo_index[x.0].unwrap_or(usize::MAX);
        while a != b {
            while order(a) > order(b) {
                a = self.idom[a.0].unwrap_or(self.rpo[0]);
            }
            while order(b) > order(a) {
                b = self.idom[b.0].unwrap_or(self.rpo[0]);
            }
        }
        a
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index[block.0].is_some()
    }

    /// Does `a` dominate `b`? Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur.0] {
                Some(parent) if parent != cur => cur = parent,
                _ => return false,
            }
        }
    }

    fn compute_loops(&mut self) {
        let mut latches_by_header: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for &block in &self.rpo {
            for &succ in &self.succs[block.0] {
                if self.dominates(succ, block) {
                    match latches_by_header.iter_mut().find(|(h, _)| *h == succ) {
                        Some((_, latches)) => latches.push(block),
                        None => latches_by_header.push((succ, vec![block])),
                    }
                }
            }
        }

        for (header, latches) in latches_by_header {
            let mut body: HashSet<BlockId> = HashSet::new();
            body.insert(header);
            let mut worklist: Vec<BlockId> = latches.clone();
            while let Some(block) = worklist.pop() {
                if !body.insert(block) {
                    continue;
                }
                for &pred in &self.preds[block.0] {
                    if self.is_reachable(pred) && !body.contains(&pred) {
                        worklist.push(pred);
                    }
                }
            }
            let mut blocks: Vec<BlockId> = body.into_iter().collect();
            blocks.sort_by_key(|b| self.rpo_index[b.0]);
            self.loops.push(NaturalLoop {
                header,
                blocks,
                latches,
            });
        }
    }

    pub fn is_loop_header(&self, block: BlockId) -> bool {
        self.loops.iter().any(|l| l.header == block)
    }

    pub fn loop_for_header(&self, header: BlockId) -> Option<&NaturalLoop> {
        self.loops.iter().find(|l| l.header == header)
    }

    pub fn loops(&self) -> &[NaturalLoop] {
        &self.loops
    }
}
