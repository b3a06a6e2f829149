//! Qualified name resolution by scope analysis
//!
//! Every tracked module is parsed and walked twice per scope: first the names
//! bound in the scope are collected (definitions, parameters, assignment
//! targets, imports), then every identifier and attribute is resolved against
//! the chain of enclosing scopes. Class scopes are only visible from their own
//! body, as in Python.

use super::FactKind;
use super::FactValue;
use super::MetadataProvider;
use super::NodeAnnotation;
use super::ProviderOutput;
use super::ProviderScope;
use super::read_source;
use crate::error::ProviderError;
use crate::facts::NameOrigin;
use crate::facts::QualifiedName;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use tracing::warn;
use typescope_ast::NodeKind;
use typescope_ast::PythonParser;
use typescope_ast::SyntaxId;
use typescope_ast::SyntaxTree;

const PROVIDER_ID: &str = "qualified-names";

const BUILTINS: &[&str] = &[
    "abs", "aiter", "all", "anext", "any", "ascii", "bin", "bool", "breakpoint", "bytearray",
    "bytes", "callable", "chr", "classmethod", "compile", "complex", "delattr", "dict", "dir",
    "divmod", "enumerate", "eval", "exec", "filter", "float", "format", "frozenset", "getattr",
    "globals", "hasattr", "hash", "help", "hex", "id", "input", "int", "isinstance",
    "issubclass", "iter", "len", "list", "locals", "map", "max", "memoryview", "min", "next",
    "object", "oct", "open", "ord", "pow", "print", "property", "range", "repr", "reversed",
    "round", "set", "setattr", "slice", "sorted", "staticmethod", "str", "sum", "super",
    "tuple", "type", "vars", "zip", "__import__", "__name__", "__file__", "__doc__",
    "NotImplemented", "Ellipsis", "BaseException", "Exception", "ArithmeticError",
    "AssertionError", "AttributeError", "ImportError", "IndexError", "KeyError",
    "KeyboardInterrupt", "LookupError", "NameError", "NotImplementedError", "OSError",
    "RuntimeError", "StopIteration", "SyntaxError", "TypeError", "ValueError",
    "ZeroDivisionError",
];

/// Resolves identifiers and attribute chains to fully qualified names.
#[derive(Debug, Default)]
pub struct QualifiedNameProvider {
    parser: PythonParser,
}

impl QualifiedNameProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Annotations for one module's source.
    pub fn analyze(&self, path: &str, source: &str) -> Result<Vec<NodeAnnotation>, ProviderError> {
        let tree = self
            .parser
            .parse_module(source)
            .map_err(|e| ProviderError::failed(PROVIDER_ID, format!("{path}: {e}")))?;
        let (module, is_package) = module_name(path);
        Ok(ModuleAnalyzer::new(&tree, &module, is_package).run())
    }
}

impl MetadataProvider for QualifiedNameProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn fact(&self) -> FactKind {
        FactKind::QualifiedName
    }

    fn scope(&self) -> ProviderScope {
        ProviderScope::Repository
    }

    fn compute(&self, root: &Path, paths: &[String]) -> Result<ProviderOutput, ProviderError> {
        let mut output = ProviderOutput::default();
        for path in paths {
            let Some(source) = read_source(PROVIDER_ID, root, path) else {
                continue;
            };
            match self.analyze(path, &source) {
                Ok(annotations) => {
                    output.files.insert(path.clone(), annotations);
                }
                Err(e) => warn!(path = %path, error = %e, "skipping unparsable module"),
            }
        }
        debug!(files = output.files.len(), "resolved qualified names");
        Ok(output)
    }
}

/// Dotted module name for a `/`-separated source path, and whether the path is
/// a package `__init__`.
pub fn module_name(path: &str) -> (String, bool) {
    let stem = path
        .strip_suffix(".pyi")
        .or_else(|| path.strip_suffix(".py"))
        .unwrap_or(path);
    let mut parts: Vec<&str> = stem.split('/').filter(|part| !part.is_empty()).collect();
    let is_package = parts.last() == Some(&"__init__");
    if is_package {
        parts.pop();
    }
    (parts.join("."), is_package)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Module,
    Class,
    Function,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    /// Prefix for names bound in this scope, e.g. `pkg.mod.f.<locals>`.
    prefix: String,
    parent: Option<usize>,
    bindings: HashMap<String, BTreeSet<QualifiedName>>,
    globals: HashSet<String>,
}

#[derive(Default)]
struct Collected {
    bindings: Vec<(String, QualifiedName)>,
    globals: HashSet<String>,
    nonlocals: HashSet<String>,
}

impl Collected {
    fn bind(&mut self, name: &str, qualified: QualifiedName) {
        self.bindings.push((name.to_string(), qualified));
    }
}

struct ModuleAnalyzer<'a> {
    tree: &'a SyntaxTree,
    module: &'a str,
    is_package: bool,
    scopes: Vec<Scope>,
    annotations: Vec<NodeAnnotation>,
}

impl<'a> ModuleAnalyzer<'a> {
    fn new(tree: &'a SyntaxTree, module: &'a str, is_package: bool) -> Self {
        Self {
            tree,
            module,
            is_package,
            scopes: Vec::new(),
            annotations: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<NodeAnnotation> {
        let tree = self.tree;
        let Some(root) = tree.root() else {
            return Vec::new();
        };
        let module_scope = self.new_scope(
            ScopeKind::Module,
            self.module.to_string(),
            None,
            None,
            tree.children(root),
        );
        for child in tree.children(root) {
            self.visit(*child, module_scope);
        }
        self.annotations
    }

    fn new_scope(
        &mut self,
        kind: ScopeKind,
        prefix: String,
        parent: Option<usize>,
        parameters: Option<SyntaxId>,
        body: &[SyntaxId],
    ) -> usize {
        let mut collected = Collected::default();
        if let Some(parameters) = parameters {
            for parameter in self.tree.children(parameters) {
                self.collect_parameter(*parameter, &prefix, &mut collected);
            }
        }
        for id in body {
            self.collect(*id, &prefix, &mut collected);
        }

        let mut bindings: HashMap<String, BTreeSet<QualifiedName>> = HashMap::new();
        for (name, qualified) in collected.bindings {
            if collected.nonlocals.contains(&name) {
                continue;
            }
            if collected.globals.contains(&name) {
                if kind != ScopeKind::Module
                    && let Some(module_scope) = self.scopes.first_mut()
                {
                    let global = QualifiedName::local(format!("{}.{name}", self.module));
                    module_scope.bindings.entry(name).or_default().insert(global);
                }
                continue;
            }
            bindings.entry(name).or_default().insert(qualified);
        }

        self.scopes.push(Scope {
            kind,
            prefix,
            parent,
            bindings,
            globals: collected.globals,
        });
        self.scopes.len() - 1
    }

    fn collect(&self, id: SyntaxId, prefix: &str, out: &mut Collected) {
        let tree = self.tree;
        match tree.node(id).kind {
            NodeKind::FunctionDefinition | NodeKind::ClassDefinition => {
                if let Some(name) = tree.child_by_field(id, "name") {
                    out.bind(tree.text(name), local(prefix, tree.text(name)));
                }
                return;
            }
            NodeKind::Lambda | NodeKind::FutureImportStatement => return,
            NodeKind::ImportStatement => {
                self.collect_import(id, out);
                return;
            }
            NodeKind::ImportFromStatement => {
                self.collect_import_from(id, out);
                return;
            }
            NodeKind::GlobalStatement | NodeKind::NonlocalStatement => {
                let declared = if tree.node(id).kind == NodeKind::GlobalStatement {
                    &mut out.globals
                } else {
                    &mut out.nonlocals
                };
                for child in tree.children(id) {
                    declared.insert(tree.text(*child).to_string());
                }
                return;
            }
            NodeKind::Assignment
            | NodeKind::AugmentedAssignment
            | NodeKind::ForStatement
            | NodeKind::ForInClause => {
                if let Some(left) = tree.child_by_field(id, "left") {
                    self.collect_targets(left, prefix, out);
                }
            }
            NodeKind::NamedExpression => {
                if let Some(name) = tree.child_by_field(id, "name") {
                    self.collect_targets(name, prefix, out);
                }
            }
            NodeKind::AsPatternTarget => {
                for child in tree.children(id) {
                    self.collect_targets(*child, prefix, out);
                }
            }
            _ => {}
        }
        for child in tree.children(id) {
            self.collect(*child, prefix, out);
        }
    }

    fn collect_targets(&self, id: SyntaxId, prefix: &str, out: &mut Collected) {
        let tree = self.tree;
        match tree.node(id).kind {
            NodeKind::Identifier => out.bind(tree.text(id), local(prefix, tree.text(id))),
            NodeKind::PatternList
            | NodeKind::TuplePattern
            | NodeKind::ListPattern
            | NodeKind::Tuple
            | NodeKind::List
            | NodeKind::ExpressionList
            | NodeKind::ParenthesizedExpression
            | NodeKind::ListSplatPattern
            | NodeKind::ListSplat => {
                for child in tree.children(id) {
                    self.collect_targets(*child, prefix, out);
                }
            }
            _ => {}
        }
    }

    fn collect_parameter(&self, id: SyntaxId, prefix: &str, out: &mut Collected) {
        let tree = self.tree;
        match tree.node(id).kind {
            NodeKind::Identifier => out.bind(tree.text(id), local(prefix, tree.text(id))),
            NodeKind::DefaultParameter
            | NodeKind::TypedParameter
            | NodeKind::TypedDefaultParameter
            | NodeKind::ListSplatPattern
            | NodeKind::DictionarySplatPattern
            | NodeKind::TuplePattern => {
                for child in tree.children(id) {
                    if !matches!(tree.node(*child).field, Some("type" | "value")) {
                        self.collect_parameter(*child, prefix, out);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_import(&self, id: SyntaxId, out: &mut Collected) {
        let tree = self.tree;
        for name in tree.children_by_field(id, "name") {
            match tree.node(name).kind {
                NodeKind::DottedName => {
                    // `import a.b` binds `a`.
                    let dotted = self.dotted(name);
                    let head = dotted.split('.').next().unwrap_or_default();
                    out.bind(head, QualifiedName::import(head));
                }
                NodeKind::AliasedImport => {
                    if let Some((alias, target)) = self.aliased(name) {
                        out.bind(tree.text(alias), QualifiedName::import(target));
                    }
                }
                _ => {}
            }
        }
    }

    fn collect_import_from(&self, id: SyntaxId, out: &mut Collected) {
        let tree = self.tree;
        let Some(module) = self.imported_module(id) else {
            return;
        };
        for name in tree.children_by_field(id, "name") {
            match tree.node(name).kind {
                NodeKind::DottedName => {
                    let imported = self.dotted(name);
                    out.bind(&imported, QualifiedName::import(join(&module, &imported)));
                }
                NodeKind::AliasedImport => {
                    if let Some((alias, target)) = self.aliased(name) {
                        out.bind(tree.text(alias), QualifiedName::import(join(&module, &target)));
                    }
                }
                _ => {}
            }
        }
    }

    /// Module named by a `from ... import` statement, with relative imports
    /// resolved against the current package.
    fn imported_module(&self, id: SyntaxId) -> Option<String> {
        let tree = self.tree;
        let module = tree.child_by_field(id, "module_name")?;
        match tree.node(module).kind {
            NodeKind::DottedName => Some(self.dotted(module)),
            NodeKind::RelativeImport => {
                let mut dots = 0;
                let mut rest = String::new();
                for child in tree.children(module) {
                    match tree.node(*child).kind {
                        NodeKind::ImportPrefix => {
                            dots = tree.text(*child).matches('.').count();
                        }
                        NodeKind::DottedName => rest = self.dotted(*child),
                        _ => {}
                    }
                }
                let mut package: Vec<&str> =
                    self.module.split('.').filter(|part| !part.is_empty()).collect();
                if !self.is_package {
                    package.pop();
                }
                for _ in 1..dots {
                    package.pop();
                }
                Some(join(&package.join("."), &rest))
            }
            _ => None,
        }
    }

    fn aliased(&self, id: SyntaxId) -> Option<(SyntaxId, String)> {
        let alias = self.tree.child_by_field(id, "alias")?;
        let target = self.tree.child_by_field(id, "name")?;
        Some((alias, self.dotted(target)))
    }

    fn dotted(&self, id: SyntaxId) -> String {
        let tree = self.tree;
        if tree.node(id).kind != NodeKind::DottedName {
            return tree.text(id).to_string();
        }
        tree.children(id)
            .iter()
            .map(|part| tree.text(*part))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn lookup(&self, name: &str, scope: usize) -> Vec<QualifiedName> {
        let mut current = Some(scope);
        let mut innermost = true;
        while let Some(idx) = current {
            let scope = &self.scopes[idx];
            if scope.globals.contains(name) {
                return match self.scopes[0].bindings.get(name) {
                    Some(found) => found.iter().cloned().collect(),
                    None => builtin(name),
                };
            }
            if (innermost || scope.kind != ScopeKind::Class)
                && let Some(found) = scope.bindings.get(name)
            {
                return found.iter().cloned().collect();
            }
            innermost = false;
            current = scope.parent;
        }
        builtin(name)
    }

    fn annotate(&mut self, id: SyntaxId, names: &[QualifiedName]) {
        let node = self.tree.node(id);
        if names.is_empty() || node.range.is_degenerate() {
            return;
        }
        self.annotations.push(NodeAnnotation {
            range: node.range,
            kind: Some(node.kind.as_str().to_string()),
            value: FactValue::QualifiedNames(names.to_vec()),
        });
    }

    /// Resolve names below `id`; returns the names `id` itself resolves to.
    fn visit(&mut self, id: SyntaxId, scope: usize) -> Vec<QualifiedName> {
        let tree = self.tree;
        match tree.node(id).kind {
            NodeKind::Identifier => {
                let names = self.lookup(tree.text(id), scope);
                self.annotate(id, &names);
                return names;
            }
            NodeKind::Attribute => {
                let object = match tree.child_by_field(id, "object") {
                    Some(object) => self.visit(object, scope),
                    None => Vec::new(),
                };
                let Some(attribute) = tree.child_by_field(id, "attribute") else {
                    return Vec::new();
                };
                let names: Vec<QualifiedName> = object
                    .iter()
                    .map(|base| {
                        QualifiedName::new(format!("{}.{}", base.name, tree.text(attribute)), base.origin)
                    })
                    .collect();
                self.annotate(id, &names);
                return names;
            }
            NodeKind::FunctionDefinition => {
                let name = tree
                    .child_by_field(id, "name")
                    .map_or("<unknown>", |name| tree.text(name));
                let prefix = format!("{}.{name}.<locals>", self.scopes[scope].prefix);
                self.visit_function_like(id, scope, prefix);
            }
            NodeKind::Lambda => {
                let prefix = format!("{}.<lambda>.<locals>", self.scopes[scope].prefix);
                self.visit_function_like(id, scope, prefix);
            }
            NodeKind::ClassDefinition => {
                let name = tree
                    .child_by_field(id, "name")
                    .map_or("<unknown>", |name| tree.text(name));
                let prefix = format!("{}.{name}", self.scopes[scope].prefix);
                let body: Vec<SyntaxId> = tree.children_by_field(id, "body").collect();
                let inner = self.new_scope(ScopeKind::Class, prefix, Some(scope), None, &body);
                for child in tree.children(id) {
                    let target = if tree.node(*child).field == Some("body") {
                        inner
                    } else {
                        scope
                    };
                    self.visit(*child, target);
                }
            }
            NodeKind::KeywordArgument => {
                if let Some(value) = tree.child_by_field(id, "value") {
                    self.visit(value, scope);
                }
            }
            NodeKind::ImportStatement | NodeKind::ImportFromStatement => self.annotate_import(id),
            NodeKind::FutureImportStatement => {}
            _ => {
                for child in tree.children(id) {
                    self.visit(*child, scope);
                }
            }
        }
        Vec::new()
    }

    fn visit_function_like(&mut self, id: SyntaxId, scope: usize, prefix: String) {
        let tree = self.tree;
        let parameters = tree.child_by_field(id, "parameters");
        let body: Vec<SyntaxId> = tree.children_by_field(id, "body").collect();
        let inner = self.new_scope(ScopeKind::Function, prefix, Some(scope), parameters, &body);
        for child in tree.children(id) {
            match tree.node(*child).field {
                Some("parameters") => {
                    for parameter in tree.children(*child) {
                        self.visit_parameter(*parameter, scope, inner);
                    }
                }
                Some("body") => {
                    self.visit(*child, inner);
                }
                _ => {
                    self.visit(*child, scope);
                }
            }
        }
    }

    /// Parameter names resolve in the function scope; annotations and default
    /// values are evaluated in the enclosing one.
    fn visit_parameter(&mut self, id: SyntaxId, outer: usize, inner: usize) {
        let tree = self.tree;
        match tree.node(id).kind {
            NodeKind::Identifier => {
                self.visit(id, inner);
            }
            NodeKind::DefaultParameter
            | NodeKind::TypedParameter
            | NodeKind::TypedDefaultParameter
            | NodeKind::ListSplatPattern
            | NodeKind::DictionarySplatPattern
            | NodeKind::TuplePattern => {
                for child in tree.children(id) {
                    if matches!(tree.node(*child).field, Some("type" | "value")) {
                        self.visit(*child, outer);
                    } else {
                        self.visit_parameter(*child, outer, inner);
                    }
                }
            }
            _ => {}
        }
    }

    fn annotate_import(&mut self, id: SyntaxId) {
        let tree = self.tree;
        let module = match tree.node(id).kind {
            NodeKind::ImportFromStatement => match self.imported_module(id) {
                Some(module) => Some(module),
                None => return,
            },
            _ => None,
        };
        let names: Vec<SyntaxId> = tree.children_by_field(id, "name").collect();
        for name in names {
            match tree.node(name).kind {
                NodeKind::DottedName => {
                    let dotted = self.dotted(name);
                    let target = module
                        .as_deref()
                        .map_or_else(|| dotted.clone(), |module| join(module, &dotted));
                    self.annotate(name, &[QualifiedName::import(target)]);
                }
                NodeKind::AliasedImport => {
                    if let Some((alias, target)) = self.aliased(name) {
                        let target = module
                            .as_deref()
                            .map_or_else(|| target.clone(), |module| join(module, &target));
                        let qualified = [QualifiedName::import(target)];
                        self.annotate(alias, &qualified);
                        if let Some(original) = tree.child_by_field(name, "name") {
                            self.annotate(original, &qualified);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

fn local(prefix: &str, name: &str) -> QualifiedName {
    QualifiedName::new(join(prefix, name), NameOrigin::Local)
}

fn join(prefix: &str, name: &str) -> String {
    match (prefix.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{prefix}.{name}"),
    }
}

fn builtin(name: &str) -> Vec<QualifiedName> {
    if BUILTINS.contains(&name) {
        vec![QualifiedName::builtin(format!("builtins.{name}"))]
    } else {
        Vec::new()
    }
}
