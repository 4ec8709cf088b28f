use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use syn::visit::Visit;

use crate::error::Error;

/// A resolved callable identity selected for instrumentation.
///
/// `function` is the in-file name the rewriter matches against: bare for
/// top-level functions, "Type::method" for impl methods and trait defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceTarget {
    /// Stable identity token, assigned in expansion order.
    pub id: u32,
    /// The expanded spec this target came from, e.g. "walker:Walker.walk".
    pub spec: String,
    /// Source file holding the function.
    pub file: PathBuf,
    /// Qualified function name within the file.
    pub function: String,
}

/// Expand one spec containing brace-alternation groups `{a,b,...}` into the
/// cross-product of all alternatives, leftmost group varying slowest.
/// Groups nest; a `{` without a matching `}` is an error.
pub fn expand_braces(spec: &str) -> Result<Vec<String>, Error> {
    let bytes = spec.as_bytes();
    let open = match bytes.iter().position(|&b| b == b'{') {
        Some(i) => i,
        None => return Ok(vec![spec.to_string()]),
    };

    // Find the matching close brace and the depth-0 comma positions inside.
    let mut depth = 0usize;
    let mut close = None;
    let mut cuts = Vec::new();
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            b',' if depth == 1 => cuts.push(i),
            _ => {}
        }
    }
    let close = close.ok_or_else(|| Error::InvalidSpec {
        spec: spec.to_string(),
        reason: "unbalanced braces".to_string(),
    })?;

    let prefix = &spec[..open];
    let suffix = &spec[close + 1..];
    let mut alternatives = Vec::with_capacity(cuts.len() + 1);
    let mut start = open + 1;
    for cut in cuts {
        alternatives.push(&spec[start..cut]);
        start = cut + 1;
    }
    alternatives.push(&spec[start..close]);

    let mut out = Vec::new();
    for alt in alternatives {
        out.extend(expand_braces(&format!("{prefix}{alt}{suffix}"))?);
    }
    Ok(out)
}

/// Expand a comma-joined selection string into an ordered, deduplicated
/// (first occurrence wins) list of plain specs.
pub fn expand_selection(selection: &str) -> Result<Vec<String>, Error> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for part in split_top_level(selection) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        for spec in expand_braces(part)? {
            if seen.insert(spec.clone()) {
                out.push(spec);
            }
        }
    }
    if out.is_empty() {
        return Err(Error::InvalidSpec {
            spec: selection.to_string(),
            reason: "empty selection".to_string(),
        });
    }
    Ok(out)
}

/// Split at commas outside brace groups. Commas inside `{...}` belong to the
/// alternation, not the spec list.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Resolve a selection string against the source tree rooted at `src_dir`.
///
/// Each spec has the form `module.path:attribute.chain`. The module path maps
/// to `src/<path>.rs` or `src/<path>/mod.rs`; the attribute chain maps to a
/// qualified function name ("Type::method"). Resolution is all-or-nothing:
/// any unresolvable spec fails the whole selection and no target set is
/// produced.
pub fn resolve_selection(src_dir: &Path, selection: &str) -> Result<Vec<TraceTarget>, Error> {
    let specs = expand_selection(selection)?;

    let mut file_functions: HashMap<PathBuf, Vec<String>> = HashMap::new();
    let mut targets = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let (module, attr) = spec.split_once(':').ok_or_else(|| Error::InvalidSpec {
            spec: spec.clone(),
            reason: "expected 'module.path:function'".to_string(),
        })?;
        if module.is_empty() || attr.is_empty() {
            return Err(Error::InvalidSpec {
                spec: spec.clone(),
                reason: "expected 'module.path:function'".to_string(),
            });
        }

        let file = module_file(src_dir, module)?;
        let function = attr.replace('.', "::");

        if !file_functions.contains_key(&file) {
            let source = std::fs::read_to_string(&file).map_err(|source| Error::ReadError {
                path: file.clone(),
                source,
            })?;
            let functions = collect_functions(&source, &file)?;
            file_functions.insert(file.clone(), functions);
        }
        let known = &file_functions[&file];
        if !known.iter().any(|f| f == &function) {
            return Err(Error::FunctionNotFound {
                function,
                path: file,
            });
        }

        targets.push(TraceTarget {
            id: index as u32,
            spec: spec.clone(),
            file,
            function,
        });
    }

    Ok(targets)
}

/// Map a dotted module path to its source file. `main` and `lib` resolve to
/// the crate root files through the plain `<path>.rs` candidate.
fn module_file(src_dir: &Path, module: &str) -> Result<PathBuf, Error> {
    let mut rel = PathBuf::new();
    for segment in module.split('.') {
        rel.push(segment);
    }
    let plain = src_dir.join(rel.with_extension("rs"));
    if plain.is_file() {
        return Ok(plain);
    }
    let dir_mod = src_dir.join(&rel).join("mod.rs");
    if dir_mod.is_file() {
        return Ok(dir_mod);
    }
    Err(Error::ModuleNotFound {
        module: module.to_string(),
        candidates: (plain, dir_mod),
    })
}

/// Whether a function signature can carry line checkpoints. `const fn` cannot
/// call into the runtime and `extern` entry points are left untouched.
pub fn is_instrumentable(sig: &syn::Signature) -> bool {
    sig.constness.is_none() && sig.abi.is_none()
}

/// Parse a source file and collect all qualified function names.
fn collect_functions(source: &str, path: &Path) -> Result<Vec<String>, Error> {
    let syntax = syn::parse_file(source).map_err(|source| Error::ParseError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut collector = FnCollector::default();
    collector.visit_file(&syntax);
    Ok(collector.functions)
}

/// AST visitor collecting function names: bare for top-level fns, qualified
/// by type for impl methods, by trait for default trait methods.
#[derive(Default)]
struct FnCollector {
    functions: Vec<String>,
    scope: Option<String>,
}

impl FnCollector {
    fn push(&mut self, ident: &syn::Ident) {
        let name = match &self.scope {
            Some(owner) => format!("{owner}::{ident}"),
            None => ident.to_string(),
        };
        self.functions.push(name);
    }

    fn scoped(&mut self, owner: String, f: impl FnOnce(&mut Self)) {
        let prev = self.scope.replace(owner);
        f(self);
        self.scope = prev;
    }
}

impl<'ast> Visit<'ast> for FnCollector {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        if is_instrumentable(&node.sig) {
            let prev = self.scope.take();
            self.push(&node.sig.ident);
            self.scope = prev;
        }
        syn::visit::visit_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let owner = type_name(&node.self_ty);
        self.scoped(owner, |v| syn::visit::visit_item_impl(v, node));
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        if is_instrumentable(&node.sig) {
            self.push(&node.sig.ident);
        }
        syn::visit::visit_impl_item_fn(self, node);
    }

    fn visit_item_trait(&mut self, node: &'ast syn::ItemTrait) {
        let owner = node.ident.to_string();
        self.scoped(owner, |v| syn::visit::visit_item_trait(v, node));
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        // Only default bodies exist in this file; required methods live in impls.
        if node.default.is_some() && is_instrumentable(&node.sig) {
            self.push(&node.sig.ident);
        }
        syn::visit::visit_trait_item_fn(self, node);
    }
}

/// Best-effort type name for qualifying methods.
fn type_name(ty: &syn::Type) -> String {
    match ty {
        syn::Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|seg| seg.ident.to_string())
            .unwrap_or_else(|| "_".to_string()),
        _ => "_".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn expansion_cross_product_order() {
        let out = expand_braces("{a,b}-{1,2}").unwrap();
        assert_eq!(
            out,
            ["a-1", "a-2", "b-1", "b-2"],
            "leftmost group varies slowest"
        );
    }

    #[test]
    fn expansion_handles_nesting() {
        let out = expand_braces("x{a,b{1,2}}y").unwrap();
        assert_eq!(out, ["xay", "xb1y", "xb2y"]);
    }

    #[test]
    fn expansion_without_braces_is_identity() {
        assert_eq!(expand_braces("walker:walk").unwrap(), ["walker:walk"]);
    }

    #[test]
    fn expansion_rejects_unbalanced_braces() {
        let err = expand_braces("{a,b").unwrap_err();
        assert!(
            err.to_string().contains("unbalanced"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn selection_dedups_first_occurrence_wins() {
        let out = expand_selection("m:{f,g},m:f").unwrap();
        assert_eq!(out, ["m:f", "m:g"], "repeat of m:f must not reappear");
    }

    #[test]
    fn selection_splits_outside_braces_only() {
        let out = expand_selection("a:{x,y},b:z").unwrap();
        assert_eq!(out, ["a:x", "a:y", "b:z"]);
    }

    fn create_test_project(dir: &Path) {
        let src = dir.join("src");
        fs::create_dir_all(src.join("walker")).unwrap();

        fs::write(src.join("main.rs"), "fn main() { walk(); }\nfn setup() {}\n").unwrap();

        fs::write(
            src.join("resolver.rs"),
            "\
struct Resolver;
impl Resolver {
    pub fn resolve(&self) -> bool { true }
}
fn helper() {}
const fn table_size() -> usize { 16 }
",
        )
        .unwrap();

        fs::write(
            src.join("walker").join("mod.rs"),
            "pub fn walk_dir() {}\nfn scan() {}\n",
        )
        .unwrap();
    }

    #[test]
    fn resolves_plain_file_module() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let targets = resolve_selection(&tmp.path().join("src"), "resolver:helper").unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].function, "helper");
        assert!(targets[0].file.ends_with("src/resolver.rs"));
    }

    #[test]
    fn resolves_directory_module_and_method_chain() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());
        let src = tmp.path().join("src");

        let targets = resolve_selection(&src, "walker:walk_dir,resolver:Resolver.resolve").unwrap();
        assert_eq!(targets.len(), 2);
        assert!(targets[0].file.ends_with("walker/mod.rs"));
        assert_eq!(targets[1].function, "Resolver::resolve");
        assert_eq!(targets[0].id, 0);
        assert_eq!(targets[1].id, 1);
    }

    #[test]
    fn resolves_main_module_to_crate_root() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let targets = resolve_selection(&tmp.path().join("src"), "main:setup").unwrap();
        assert!(targets[0].file.ends_with("src/main.rs"));
    }

    #[test]
    fn expanded_selection_resolves_every_alternative() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let targets =
            resolve_selection(&tmp.path().join("src"), "walker:{walk_dir,scan}").unwrap();
        let functions: Vec<&str> = targets.iter().map(|t| t.function.as_str()).collect();
        assert_eq!(functions, ["walk_dir", "scan"]);
    }

    #[test]
    fn unknown_module_fails_whole_selection() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let result = resolve_selection(&tmp.path().join("src"), "walker:walk_dir,ghost:f");
        assert!(result.is_err(), "one bad spec must fail the selection");
        assert!(result.unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn unknown_function_fails_whole_selection() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let result = resolve_selection(&tmp.path().join("src"), "resolver:missing");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("missing"), "unexpected error: {err}");
    }

    #[test]
    fn const_fn_is_not_a_target() {
        let tmp = TempDir::new().unwrap();
        create_test_project(tmp.path());

        let result = resolve_selection(&tmp.path().join("src"), "resolver:table_size");
        assert!(result.is_err(), "const fn cannot carry checkpoints");
    }
}
