//! A fully programmable [`SourceParser`] used by the pipeline's tests. Units
//! are described as plain cursor arenas; the parser replays them on demand
//! and records every parse call so tests can assert on ordering and on the
//! exact argument vectors the pipeline produced.

use crate::parser::{Cursor, Inclusion, ParsedUnit, SourceParser};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;
use symdex_core::{CursorKind, Location, Result, SymdexError};

/// One AST node in a scripted unit. Cross-references (`referenced`,
/// `definition`, `semantic_parent`, `children`) are arena indices.
#[derive(Debug, Clone)]
pub struct CursorNode {
    pub kind: CursorKind,
    pub spelling: String,
    pub display_name: String,
    pub location: Option<Location>,
    pub is_definition: bool,
    pub referenced: Option<usize>,
    pub definition: Option<usize>,
    pub semantic_parent: Option<usize>,
    pub children: Vec<usize>,
}

impl CursorNode {
    pub fn new(kind: CursorKind) -> Self {
        Self {
            kind,
            spelling: String::new(),
            display_name: String::new(),
            location: None,
            is_definition: false,
            referenced: None,
            definition: None,
            semantic_parent: None,
            children: Vec::new(),
        }
    }

    /// Sets the spelling, and the display name too when none was given yet.
    pub fn spelling(mut self, spelling: &str) -> Self {
        if self.display_name.is_empty() {
            self.display_name = spelling.to_string();
        }
        self.spelling = spelling.to_string();
        self
    }

    pub fn display(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    pub fn at(mut self, path: &str, offset: u32) -> Self {
        self.location = Some(Location::new(path, offset));
        self
    }

    pub fn definition(mut self) -> Self {
        self.is_definition = true;
        self
    }

    pub fn refers(mut self, node: usize) -> Self {
        self.referenced = Some(node);
        self
    }

    pub fn defined_by(mut self, node: usize) -> Self {
        self.definition = Some(node);
        self
    }

    pub fn parent(mut self, node: usize) -> Self {
        self.semantic_parent = Some(node);
        self
    }
}

/// A replayable translation unit: cursor arena, inclusion record and PCH
/// save behavior.
#[derive(Debug, Clone, Default)]
pub struct ScriptedUnit {
    pub inclusions: Vec<Inclusion>,
    nodes: Vec<CursorNode>,
    roots: Vec<usize>,
    fail_save: bool,
}

impl ScriptedUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level cursor (a direct child of the TU root).
    pub fn add(&mut self, node: CursorNode) -> usize {
        let id = self.push(node);
        self.roots.push(id);
        id
    }

    /// Adds a cursor below `parent` in the traversal tree.
    pub fn add_child(&mut self, parent: usize, node: CursorNode) -> usize {
        let id = self.push(node);
        self.nodes[parent].children.push(id);
        id
    }

    /// Adds a cursor that other nodes can point at but that the traversal
    /// never visits (an out-of-tree referent, e.g. a collapsed declaration).
    pub fn detached(&mut self, node: CursorNode) -> usize {
        self.push(node)
    }

    fn push(&mut self, node: CursorNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn include(&mut self, file: &str, stack: &[&str]) {
        self.inclusions.push(Inclusion {
            file: file.to_string(),
            stack: stack.iter().map(|s| s.to_string()).collect(),
        });
    }

    pub fn fail_save(&mut self) {
        self.fail_save = true;
    }

    pub fn link_reference(&mut self, from: usize, to: usize) {
        self.nodes[from].referenced = Some(to);
    }
}

impl ParsedUnit for ScriptedUnit {
    fn inclusions(&self) -> Vec<Inclusion> {
        self.inclusions.clone()
    }

    fn visit<'u>(&'u self, visitor: &mut dyn FnMut(&dyn Cursor<'u>)) {
        fn walk<'u>(unit: &'u ScriptedUnit, idx: usize, visitor: &mut dyn FnMut(&dyn Cursor<'u>)) {
            visitor(&ScriptedCursor { unit, idx });
            for &child in &unit.nodes[idx].children {
                walk(unit, child, visitor);
            }
        }
        for &root in &self.roots {
            walk(self, root, visitor);
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        if self.fail_save {
            return Err(SymdexError::PchSave(format!(
                "scripted save failure for {}",
                path.display()
            )));
        }
        std::fs::write(path, b"scripted-pch")?;
        Ok(())
    }
}

struct ScriptedCursor<'u> {
    unit: &'u ScriptedUnit,
    idx: usize,
}

impl<'u> ScriptedCursor<'u> {
    fn node(&self) -> &'u CursorNode {
        &self.unit.nodes[self.idx]
    }

    fn jump(&self, idx: Option<usize>) -> Option<Box<dyn Cursor<'u> + 'u>> {
        idx.map(|idx| {
            Box::new(ScriptedCursor {
                unit: self.unit,
                idx,
            }) as Box<dyn Cursor<'u> + 'u>
        })
    }
}

impl<'u> Cursor<'u> for ScriptedCursor<'u> {
    fn kind(&self) -> CursorKind {
        self.node().kind
    }

    fn spelling(&self) -> String {
        self.node().spelling.clone()
    }

    fn display_name(&self) -> String {
        self.node().display_name.clone()
    }

    fn location(&self) -> Option<Location> {
        self.node().location.clone()
    }

    fn referenced(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        self.jump(self.node().referenced)
    }

    fn definition(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        self.jump(self.node().definition)
    }

    fn semantic_parent(&self) -> Option<Box<dyn Cursor<'u> + 'u>> {
        self.jump(self.node().semantic_parent)
    }

    fn is_definition(&self) -> bool {
        self.node().is_definition
    }

    fn raw_id(&self) -> u64 {
        self.idx as u64
    }
}

/// A parse call observed by the scripted parser, in admission order.
#[derive(Debug, Clone)]
pub struct ParseCall {
    pub seq: usize,
    pub input: String,
    pub args: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedParser {
    units: Mutex<HashMap<String, VecDeque<ScriptedUnit>>>,
    failures: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<ParseCall>>,
}

impl ScriptedParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next unit for `input`. Calling this repeatedly queues
    /// units: each parse consumes one, and the last queued unit keeps
    /// replaying once the queue is down to it.
    pub fn unit(&self, input: &str, unit: ScriptedUnit) {
        self.units
            .lock()
            .entry(input.to_string())
            .or_default()
            .push_back(unit);
    }

    /// Make parsing `input` fail (the front end returns no unit).
    pub fn fail(&self, input: &str) {
        self.failures.lock().insert(input.to_string());
    }

    /// Hold each parse of `input` for `delay`, to force job overlap.
    pub fn delay(&self, input: &str, delay: Duration) {
        self.delays.lock().insert(input.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<ParseCall> {
        self.calls.lock().clone()
    }

    /// Parse calls for one input, in order.
    pub fn calls_for(&self, input: &str) -> Vec<ParseCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.input == input)
            .cloned()
            .collect()
    }
}

impl SourceParser for ScriptedParser {
    fn parse(&self, input: &str, args: &[String]) -> Result<Box<dyn ParsedUnit + '_>> {
        {
            let mut calls = self.calls.lock();
            let seq = calls.len();
            calls.push(ParseCall {
                seq,
                input: input.to_string(),
                args: args.to_vec(),
            });
        }
        let delay = self.delays.lock().get(input).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.failures.lock().contains(input) {
            return Err(SymdexError::Parse(format!("no translation unit: {input}")));
        }
        let mut units = self.units.lock();
        let queue = units
            .get_mut(input)
            .ok_or_else(|| SymdexError::Parse(format!("no translation unit: {input}")))?;
        let unit = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| SymdexError::Parse(format!("no translation unit: {input}")))?
        };
        Ok(Box::new(unit))
    }
}
