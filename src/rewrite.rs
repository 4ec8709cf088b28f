use proc_macro2::Literal;
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::visit_mut::VisitMut;

use crate::resolve::{TraceTarget, is_instrumentable};

/// Captured source metadata for one instrumented routine, registered in the
/// binary at startup so the runtime can render line text without file access.
#[derive(Debug, Clone)]
pub struct UnitSource {
    pub id: u32,
    /// Display name, taken from the resolved spec.
    pub name: String,
    /// 1-based line of the routine's first source line.
    pub first_line: u32,
    /// Verbatim source text of the routine.
    pub text: String,
}

/// Result of instrumenting one source file.
pub struct InstrumentResult {
    pub source: String,
    pub units: Vec<UnitSource>,
}

/// Rewrite `source` so that every function named by `targets` gets an RAII
/// frame guard as its first statement and a line checkpoint before every
/// original statement, at every block nesting depth.
///
/// Line numbers are read from the parse spans of the original text, before
/// unparsing reformats the file, so checkpoints report the lines the user
/// sees in their editor. Closures, async blocks, and nested functions are
/// separate call contexts and are left untouched unless targeted themselves.
pub fn instrument_source(
    source: &str,
    targets: &[TraceTarget],
) -> Result<InstrumentResult, syn::Error> {
    let file: syn::File = syn::parse_str(source)?;

    let mut capture = SourceCapture {
        targets,
        lines: source.lines().collect(),
        scope: None,
        units: Vec::new(),
    };
    capture.visit_file(&file);
    let units = capture.units;

    let mut file = file;
    let mut injector = CheckpointInjector {
        targets,
        scope: None,
    };
    injector.visit_file_mut(&mut file);

    Ok(InstrumentResult {
        source: prettyplease::unparse(&file),
        units,
    })
}

fn find_target<'a>(targets: &'a [TraceTarget], function: &str) -> Option<&'a TraceTarget> {
    targets.iter().find(|t| t.function == function)
}

fn qualified(scope: &Option<String>, ident: &syn::Ident) -> String {
    match scope {
        Some(owner) => format!("{owner}::{ident}"),
        None => ident.to_string(),
    }
}

/// Pre-mutation pass: record each targeted routine's start line and verbatim
/// text while the parse spans still point into the original file.
struct SourceCapture<'a> {
    targets: &'a [TraceTarget],
    lines: Vec<&'a str>,
    scope: Option<String>,
    units: Vec<UnitSource>,
}

impl SourceCapture<'_> {
    fn capture(&mut self, target: &TraceTarget, start: proc_macro2::Span, body: &syn::Block) {
        if self.units.iter().any(|u| u.id == target.id) {
            return;
        }
        let first_line = start.start().line;
        let last_line = body.brace_token.span.close().end().line;
        if first_line == 0 || last_line < first_line || last_line > self.lines.len() {
            return;
        }
        let text = self.lines[first_line - 1..last_line].join("\n");
        self.units.push(UnitSource {
            id: target.id,
            name: target.spec.clone(),
            first_line: first_line as u32,
            text,
        });
    }
}

impl<'ast> Visit<'ast> for SourceCapture<'_> {
    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        let name = node.sig.ident.to_string();
        if let Some(target) = find_target(self.targets, &name) {
            self.capture(target, node.span(), &node.block);
        }
        syn::visit::visit_item_fn(self, node);
    }

    fn visit_item_impl(&mut self, node: &'ast syn::ItemImpl) {
        let prev = self.scope.replace(impl_type_name(&node.self_ty));
        syn::visit::visit_item_impl(self, node);
        self.scope = prev;
    }

    fn visit_impl_item_fn(&mut self, node: &'ast syn::ImplItemFn) {
        let name = qualified(&self.scope, &node.sig.ident);
        if let Some(target) = find_target(self.targets, &name) {
            self.capture(target, node.span(), &node.block);
        }
        syn::visit::visit_impl_item_fn(self, node);
    }

    fn visit_item_trait(&mut self, node: &'ast syn::ItemTrait) {
        let prev = self.scope.replace(node.ident.to_string());
        syn::visit::visit_item_trait(self, node);
        self.scope = prev;
    }

    fn visit_trait_item_fn(&mut self, node: &'ast syn::TraitItemFn) {
        if let Some(block) = &node.default {
            let name = qualified(&self.scope, &node.sig.ident);
            if let Some(target) = find_target(self.targets, &name) {
                self.capture(target, node.span(), block);
            }
        }
        syn::visit::visit_trait_item_fn(self, node);
    }
}

/// Mutation pass: inject the frame guard and line checkpoints into every
/// targeted function body.
struct CheckpointInjector<'a> {
    targets: &'a [TraceTarget],
    scope: Option<String>,
}

impl CheckpointInjector<'_> {
    fn instrument(&self, sig: &syn::Signature, name: &str, block: &mut syn::Block) {
        let Some(target) = find_target(self.targets, name) else {
            return;
        };
        if !is_instrumentable(sig) {
            return;
        }
        LinePass { id: target.id }.process_block(block);
        let id = Literal::u32_unsuffixed(target.id);
        let guard: syn::Stmt = syn::parse_quote! {
            let _takt_frame = takt_runtime::enter(#id);
        };
        block.stmts.insert(0, guard);
    }
}

impl VisitMut for CheckpointInjector<'_> {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        let name = node.sig.ident.to_string();
        let sig = node.sig.clone();
        self.instrument(&sig, &name, &mut node.block);
        syn::visit_mut::visit_item_fn_mut(self, node);
    }

    fn visit_item_impl_mut(&mut self, node: &mut syn::ItemImpl) {
        let prev = self.scope.replace(impl_type_name(&node.self_ty));
        syn::visit_mut::visit_item_impl_mut(self, node);
        self.scope = prev;
    }

    fn visit_impl_item_fn_mut(&mut self, node: &mut syn::ImplItemFn) {
        let name = qualified(&self.scope, &node.sig.ident);
        let sig = node.sig.clone();
        self.instrument(&sig, &name, &mut node.block);
        syn::visit_mut::visit_impl_item_fn_mut(self, node);
    }

    fn visit_item_trait_mut(&mut self, node: &mut syn::ItemTrait) {
        let prev = self.scope.replace(node.ident.to_string());
        syn::visit_mut::visit_item_trait_mut(self, node);
        self.scope = prev;
    }

    fn visit_trait_item_fn_mut(&mut self, node: &mut syn::TraitItemFn) {
        let name = qualified(&self.scope, &node.sig.ident);
        let sig = node.sig.clone();
        if let Some(block) = &mut node.default {
            self.instrument(&sig, &name, block);
        }
        syn::visit_mut::visit_trait_item_fn_mut(self, node);
    }
}

/// Recursive checkpoint insertion for one routine. Each original statement
/// gets `takt_runtime::line(id, lineno)` placed immediately before it, so
/// the elapsed time since the previous checkpoint lands on the previous
/// statement's line.
struct LinePass {
    id: u32,
}

impl LinePass {
    fn process_block(&mut self, block: &mut syn::Block) {
        let mut out = Vec::with_capacity(block.stmts.len() * 2);
        for mut stmt in block.stmts.drain(..) {
            let lineno = stmt.span().start().line as u32;
            // Recurse into control-flow sub-blocks first; their statements
            // still carry original spans.
            self.visit_stmt_mut(&mut stmt);
            if lineno > 0 {
                let id = Literal::u32_unsuffixed(self.id);
                let line = Literal::u32_unsuffixed(lineno);
                let checkpoint: syn::Stmt = syn::parse_quote! {
                    takt_runtime::line(#id, #line);
                };
                out.push(checkpoint);
            }
            out.push(stmt);
        }
        block.stmts = out;
    }
}

impl VisitMut for LinePass {
    fn visit_block_mut(&mut self, block: &mut syn::Block) {
        self.process_block(block);
    }

    // Closures execute on their own schedule, not in this frame's line flow.
    fn visit_expr_closure_mut(&mut self, _: &mut syn::ExprClosure) {}
    // Async blocks execute outside this frame.
    fn visit_expr_async_mut(&mut self, _: &mut syn::ExprAsync) {}
    // Nested fn items get their own guard if targeted.
    fn visit_item_fn_mut(&mut self, _: &mut syn::ItemFn) {}
}

/// Inject the startup preamble at the top of `fn main`: one
/// `takt_runtime::register_unit(...)` per instrumented routine, then the
/// environment-gated session whose drop prints the report.
pub fn inject_startup(source: &str, units: &[UnitSource]) -> Result<String, syn::Error> {
    let mut file: syn::File = syn::parse_str(source)?;
    let mut injector = StartupInjector { units };
    injector.visit_file_mut(&mut file);
    Ok(prettyplease::unparse(&file))
}

struct StartupInjector<'a> {
    units: &'a [UnitSource],
}

impl VisitMut for StartupInjector<'_> {
    fn visit_item_fn_mut(&mut self, node: &mut syn::ItemFn) {
        if node.sig.ident == "main" {
            let session: syn::Stmt = syn::parse_quote! {
                let _takt_session = takt_runtime::session_from_env();
            };
            node.block.stmts.insert(0, session);
            for unit in self.units.iter().rev() {
                let id = Literal::u32_unsuffixed(unit.id);
                let name = &unit.name;
                let first_line = Literal::u32_unsuffixed(unit.first_line);
                let text = &unit.text;
                let stmt: syn::Stmt = syn::parse_quote! {
                    takt_runtime::register_unit(#id, #name, #first_line, #text);
                };
                node.block.stmts.insert(0, stmt);
            }
        }
        syn::visit_mut::visit_item_fn_mut(self, node);
    }
}

/// Extract the type name from an impl block's self type for qualified names.
fn impl_type_name(ty: &syn::Type) -> String {
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
