//! One indexing job: gate on in-flight PCH producers, parse the translation
//! unit, walk inclusions and the AST, resolve intra-unit references, save the
//! PCH artifact when producing one, and submit the resulting deltas to the
//! accumulator and the coordinator.

use crate::coordinator::{CoordinatorEvent, Inner};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use symdex_clang::{same_cursor, Cursor, ParsedUnit};
use symdex_core::{paths, CursorKind, DependencyMap, Location, SymbolMap, SymbolNameMap};
use tracing::{error, info};

/// Artifact path for a PCH produced from `header`: the project storage
/// directory plus the hex SHA-256 of the canonical header path. Hashing the
/// path, not the contents, makes the name stable across rebuilds.
pub(crate) fn pch_artifact_path(project: &Path, header: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(header.as_bytes());
    project.join(format!("{:x}", hasher.finalize()))
}

pub(crate) struct ParseJob {
    id: i32,
    project_path: PathBuf,
    input: String,
    args: Vec<String>,
    is_pch: bool,
    symbols: SymbolMap,
    symbol_names: SymbolNameMap,
    paths: HashSet<String>,
    references: HashMap<Location, (Location, bool)>,
    dependencies: DependencyMap,
    pch_dependencies: BTreeSet<String>,
}

impl ParseJob {
    pub fn new(id: i32, project_path: PathBuf, input: String, args: Vec<String>) -> Self {
        Self {
            id,
            project_path,
            input,
            args,
            is_pch: false,
            symbols: SymbolMap::new(),
            symbol_names: SymbolNameMap::new(),
            paths: HashSet::new(),
            references: HashMap::new(),
            dependencies: DependencyMap::new(),
            pch_dependencies: BTreeSet::new(),
        }
    }

    pub fn run(mut self, inner: &Arc<Inner>) {
        let started = Instant::now();

        let mut args = self.args.clone();
        args.extend(inner.default_args.read().iter().cloned());
        canonicalize_pch_values(&mut args);
        let pch_headers = extract_pch_headers(&args);

        // Gate: do not parse while any needed PCH is still being produced.
        // Headers whose production failed lose their -include-pch pair.
        if !pch_headers.is_empty() {
            let mut state = inner.state.lock();
            loop {
                let mut wait = false;
                for header in &pch_headers {
                    if state.pch_header_error.contains(header) {
                        strip_pch_pair(&mut args, header);
                    } else if state.indexing.contains(header) {
                        wait = true;
                        break;
                    }
                }
                if !wait {
                    break;
                }
                inner.pch_cond.wait(&mut state);
            }
        }
        let waited_for_pch = started.elapsed().as_millis();

        let clang_args = self.rewrite_args(&args);

        let mut pch_error = false;
        match inner.parser.parse(&self.input, &clang_args) {
            Err(e) => {
                pch_error = self.is_pch;
                error!("got no translation unit for {}: {e}", self.input);
            }
            Ok(unit) => {
                let default_args = inner.default_args.read().clone();
                self.visit_inclusions(unit.as_ref(), &default_args);
                for header in &pch_headers {
                    for dep in inner.deps.pch_dependencies(header) {
                        self.dependencies
                            .entry(dep)
                            .or_default()
                            .insert(self.input.clone());
                    }
                }
                let _ = inner
                    .events_tx
                    .send(CoordinatorEvent::Dependencies(self.dependencies.clone()));

                self.visit_ast(unit.as_ref());

                if self.is_pch {
                    let artifact = pch_artifact_path(&self.project_path, &self.input);
                    if let Err(e) = unit.save(&artifact) {
                        error!("couldn't save pch file for {}: {e}", self.input);
                        pch_error = true;
                    }
                }
                drop(unit);

                self.resolve_references();
                self.prune();
                self.add_file_markers();

                inner.accumulator.add_symbols(std::mem::take(&mut self.symbols));
                inner
                    .accumulator
                    .add_symbol_names(std::mem::take(&mut self.symbol_names));
                inner
                    .accumulator
                    .add_file_information(self.input.clone(), self.args.clone());
                if self.is_pch {
                    inner
                        .deps
                        .set_pch_dependencies(&self.input, std::mem::take(&mut self.pch_dependencies));
                }
            }
        }

        if self.is_pch {
            let mut state = inner.state.lock();
            if pch_error {
                state.pch_header_error.insert(self.input.clone());
            } else {
                state.pch_header_error.remove(&self.input);
            }
        }

        let _ = inner.events_tx.send(CoordinatorEvent::JobDone {
            id: self.id,
            input: self.input.clone(),
        });
        if waited_for_pch > 0 {
            info!(
                "visited {} in {} ms (waited {waited_for_pch} ms for pch)",
                self.input,
                started.elapsed().as_millis()
            );
        } else {
            info!("visited {} in {} ms", self.input, started.elapsed().as_millis());
        }
    }

    /// Replace each `-include-pch` value with its artifact path and detect
    /// whether this job produces a PCH itself.
    fn rewrite_args(&mut self, args: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        let mut next_is_pch = false;
        let mut next_is_x = false;
        for arg in args {
            if arg.is_empty() {
                continue;
            }
            if next_is_pch {
                next_is_pch = false;
                out.push(
                    pch_artifact_path(&self.project_path, arg)
                        .to_string_lossy()
                        .into_owned(),
                );
                continue;
            }
            if next_is_x {
                next_is_x = false;
                self.is_pch = arg == "c++-header" || arg == "c-header";
            }
            out.push(arg.clone());
            if arg == "-include-pch" {
                next_is_pch = true;
            } else if arg == "-x" {
                next_is_x = true;
            }
        }
        out
    }

    /// Record dependency edges for every interesting included file. System
    /// headers outside /usr/home and files named by the default args are
    /// skipped.
    fn visit_inclusions(&mut self, unit: &dyn ParsedUnit, default_args: &[String]) {
        for inclusion in unit.inclusions() {
            let path = inclusion.file;
            if path.starts_with("/usr/") && !path.starts_with("/usr/home/") {
                continue;
            }
            if default_args.iter().any(|arg| arg.contains(path.as_str())) {
                continue;
            }
            for frame in &inclusion.stack {
                self.dependencies
                    .entry(path.clone())
                    .or_default()
                    .insert(frame.clone());
            }
            if inclusion.stack.is_empty() {
                self.dependencies
                    .entry(path.clone())
                    .or_default()
                    .insert(path.clone());
            }
            if self.is_pch {
                self.pch_dependencies.insert(path);
            }
        }
    }

    fn visit_ast(&mut self, unit: &dyn ParsedUnit) {
        unit.visit(&mut |cursor| self.visit_cursor(cursor));
    }

    fn visit_cursor(&mut self, cursor: &dyn Cursor<'_>) {
        let kind = cursor.kind();
        if kind == CursorKind::CxxAccessSpecifier {
            return;
        }
        let Some(location) = cursor.location() else {
            return;
        };
        self.paths.insert(location.path.clone());

        // A cursor referencing itself without being a definition collapses
        // to its definition when one is visible.
        let mut referenced = cursor.referenced();
        if let Some(r) = referenced.take() {
            if same_cursor(cursor, r.as_ref()) && !r.is_definition() {
                referenced = r.definition();
            } else {
                referenced = Some(r);
            }
        }
        let ref_kind = referenced.as_ref().map(|r| r.kind());

        {
            let info = self.symbols.entry(location.clone()).or_default();
            if kind == CursorKind::CallExpr && ref_kind == Some(CursorKind::CxxMethod) {
                return;
            } else if info.symbol_length == 0 {
                info.kind = kind;
            } else if info.kind == CursorKind::Constructor && kind == CursorKind::TypeRef {
                return;
            }
            if info.symbol_length == 0 {
                let spelling = if kind.is_reference() {
                    referenced
                        .as_ref()
                        .map(|r| r.spelling())
                        .unwrap_or_default()
                } else {
                    cursor.spelling()
                };
                info.symbol_length = spelling.len() as u32;
            }
        }

        if cursor.is_definition() || kind == CursorKind::FunctionDecl {
            self.add_name_permutations(cursor, &location);
        }

        if let Some(r) = referenced {
            if !same_cursor(cursor, r.as_ref()) {
                let Some(ref_location) = r.location() else {
                    return;
                };
                self.paths.insert(ref_location.path.clone());
                if let Some(info) = self.symbols.get_mut(&location) {
                    info.target = Some(ref_location.clone());
                }
                let is_member_function =
                    ref_kind == Some(kind) && kind.is_member_function();
                self.references
                    .insert(location, (ref_location, is_member_function));
            }
        }
    }

    /// Emit every qualified-name prefix of `cursor` into the symbol-name
    /// map, in both paren-included and paren-stripped form.
    fn add_name_permutations(&mut self, cursor: &dyn Cursor<'_>, location: &Location) {
        let mut chain = Vec::new();
        collect_display_names(cursor, &mut chain);

        let mut with_params = String::new();
        let mut without_params = String::new();
        for name in chain {
            if with_params.is_empty() {
                without_params = match name.find('(') {
                    Some(paren) => name[..paren].to_string(),
                    None => name.clone(),
                };
                with_params = name;
            } else {
                with_params = format!("{name}::{with_params}");
                without_params = format!("{name}::{without_params}");
            }
            self.symbol_names
                .entry(with_params.clone())
                .or_default()
                .insert(location.clone());
            if with_params != without_params {
                self.symbol_names
                    .entry(without_params.clone())
                    .or_default()
                    .insert(location.clone());
            }
        }
    }

    /// Wire recorded reference edges into the local symbol map. Member
    /// function edges (override/base pairs) share their reference sets and
    /// establish a canonical definition link; plain references just land in
    /// the target's set.
    fn resolve_references(&mut self) {
        let references = std::mem::take(&mut self.references);
        for (source, (target, is_member_function)) in references {
            if !self.symbols.contains_key(&target) {
                continue;
            }
            if is_member_function {
                let source_references = self
                    .symbols
                    .get(&source)
                    .map(|info| info.references.clone())
                    .unwrap_or_default();
                let merged = match self.symbols.get_mut(&target) {
                    Some(target_info) => {
                        target_info.references.extend(source_references);
                        target_info.references.clone()
                    }
                    None => continue,
                };
                let source_info = self.symbols.entry(source.clone()).or_default();
                let source_had_no_target = source_info.target.is_none();
                source_info.references = merged;
                if source_had_no_target {
                    if let Some(target_info) = self.symbols.get_mut(&target) {
                        target_info.target = Some(source);
                    }
                }
            } else if let Some(target_info) = self.symbols.get_mut(&target) {
                target_info.references.insert(source);
            }
        }
    }

    /// Symbols with no definition link and no references carry no query
    /// value; drop them before submission.
    fn prune(&mut self) {
        self.symbols.retain(|_, info| !info.is_empty());
    }

    /// Synthetic head-of-file locations so path and basename lookups through
    /// the symbol-name table resolve.
    fn add_file_markers(&mut self) {
        for path in &self.paths {
            let location = Location::new(path.clone(), 1);
            self.symbol_names
                .entry(path.clone())
                .or_default()
                .insert(location.clone());
            self.symbol_names
                .entry(paths::file_name(path).to_string())
                .or_default()
                .insert(location);
        }
    }
}

fn collect_display_names(cursor: &dyn Cursor<'_>, out: &mut Vec<String>) {
    if cursor.kind() == CursorKind::TranslationUnit {
        return;
    }
    let name = cursor.display_name();
    if name.is_empty() {
        return;
    }
    out.push(name);
    if let Some(parent) = cursor.semantic_parent() {
        collect_display_names(parent.as_ref(), out);
    }
}

/// Canonicalize the value following every `-include-pch` so the gate, the
/// error set and the artifact hash all agree on one spelling of the header.
fn canonicalize_pch_values(args: &mut [String]) {
    let mut next_is_pch = false;
    for arg in args.iter_mut() {
        if next_is_pch {
            next_is_pch = false;
            *arg = paths::canonical_str(arg);
        } else if arg == "-include-pch" {
            next_is_pch = true;
        }
    }
}

fn extract_pch_headers(args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut next_is_pch = false;
    for arg in args {
        if arg.is_empty() {
            continue;
        }
        if next_is_pch {
            next_is_pch = false;
            out.push(arg.clone());
        } else if arg == "-include-pch" {
            next_is_pch = true;
        }
    }
    out
}

/// Remove `-include-pch <header>` pairs from the argument vector.
fn strip_pch_pair(args: &mut Vec<String>, header: &str) {
    while let Some(idx) = args.iter().position(|arg| arg == header) {
        if idx > 0 && args[idx - 1] == "-include-pch" {
            args.drain(idx - 1..=idx);
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_strips_pch_pairs() {
        let mut args: Vec<String> = ["-x", "c++", "-include-pch", "/p/pch.h", "-I/inc"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(extract_pch_headers(&args), vec!["/p/pch.h".to_string()]);

        strip_pch_pair(&mut args, "/p/pch.h");
        assert_eq!(
            args,
            vec!["-x".to_string(), "c++".to_string(), "-I/inc".to_string()]
        );
    }

    #[test]
    fn member_function_references_are_shared_bidirectionally() {
        let base = Location::new("/p/base.h", 10);
        let derived = Location::new("/p/derived.cpp", 20);
        let caller = Location::new("/p/main.cpp", 40);

        let mut job = ParseJob::new(0, PathBuf::from("/storage"), "/p/derived.cpp".into(), vec![]);
        job.symbols.insert(
            base.clone(),
            symdex_core::CursorInfo {
                kind: CursorKind::CxxMethod,
                symbol_length: 3,
                target: None,
                references: BTreeSet::new(),
            },
        );
        job.symbols.insert(
            derived.clone(),
            symdex_core::CursorInfo {
                kind: CursorKind::CxxMethod,
                symbol_length: 3,
                target: Some(base.clone()),
                references: BTreeSet::new(),
            },
        );
        job.symbols.insert(
            caller.clone(),
            symdex_core::CursorInfo {
                kind: CursorKind::CallExpr,
                symbol_length: 3,
                target: Some(derived.clone()),
                references: BTreeSet::new(),
            },
        );

        // Plain reference lands in the derived method's set first...
        job.references
            .insert(caller.clone(), (derived.clone(), false));
        job.resolve_references();
        // ...then the override edge shares the sets between base and derived.
        job.references.insert(derived.clone(), (base.clone(), true));
        job.resolve_references();

        let base_info = &job.symbols[&base];
        let derived_info = &job.symbols[&derived];
        assert_eq!(base_info.references, BTreeSet::from([caller.clone()]));
        assert_eq!(derived_info.references, BTreeSet::from([caller.clone()]));
        // The derived site already had a target, so no backlink was forged.
        assert!(base_info.target.is_none());

        job.prune();
        assert!(job.symbols.contains_key(&base));
        assert!(job.symbols.contains_key(&derived));
    }

    #[test]
    fn unreferenced_symbols_are_pruned() {
        let mut job = ParseJob::new(0, PathBuf::from("/storage"), "/p/a.cpp".into(), vec![]);
        job.symbols
            .insert(Location::new("/p/a.cpp", 4), Default::default());
        job.symbols.insert(
            Location::new("/p/a.cpp", 9),
            symdex_core::CursorInfo {
                kind: CursorKind::CallExpr,
                symbol_length: 1,
                target: Some(Location::new("/p/a.cpp", 4)),
                references: BTreeSet::new(),
            },
        );
        job.prune();
        assert!(!job.symbols.contains_key(&Location::new("/p/a.cpp", 4)));
        assert!(job.symbols.contains_key(&Location::new("/p/a.cpp", 9)));
    }

    #[test]
    fn name_permutations_cover_every_scope_prefix() {
        use symdex_clang::scripted::{CursorNode, ScriptedUnit};

        let mut unit = ScriptedUnit::new();
        let namespace = unit.detached(
            CursorNode::new(CursorKind::Namespace)
                .spelling("ns")
                .at("/p/a.h", 0),
        );
        let class = unit.detached(
            CursorNode::new(CursorKind::ClassDecl)
                .spelling("Foo")
                .at("/p/a.h", 12)
                .parent(namespace),
        );
        unit.add(
            CursorNode::new(CursorKind::CxxMethod)
                .spelling("bar")
                .display("bar(int)")
                .at("/p/a.h", 30)
                .definition()
                .parent(class),
        );

        let mut job = ParseJob::new(0, PathBuf::from("/storage"), "/p/a.h".into(), vec![]);
        job.visit_ast(&unit);

        let location = Location::new("/p/a.h", 30);
        for name in [
            "bar(int)",
            "bar",
            "Foo::bar(int)",
            "Foo::bar",
            "ns::Foo::bar(int)",
            "ns::Foo::bar",
        ] {
            let locations = job
                .symbol_names
                .get(name)
                .unwrap_or_else(|| panic!("missing permutation {name}"));
            assert!(locations.contains(&location), "{name} lacks the location");
        }
    }

    #[test]
    fn artifact_name_is_path_hash() {
        let a = pch_artifact_path(Path::new("/storage"), "/p/pch.h");
        let b = pch_artifact_path(Path::new("/storage"), "/p/pch.h");
        let c = pch_artifact_path(Path::new("/storage"), "/p/other.h");
        assert_eq!(a, b);
        assert_ne!(a, c);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name.len(), 64);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
