//! ES module syntax to CommonJS
//!
//! Runs on codegen output, so the input is plain JavaScript. Each top-level
//! `import`/`export` statement is replaced in place by its `require`/`exports`
//! equivalent; everything else is copied through untouched.

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Declaration, ExportDefaultDeclarationKind, ImportDeclarationSpecifier, ModuleExportName,
    Statement,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

use super::{TranspileError, TranspileResult, describe_errors};

const INTEROP_PRELUDE: &str = concat!(
    "Object.defineProperty(exports, \"__esModule\", { value: true });\n",
    "function __rwtraDefault(m) { return m && m.__esModule ? m.default : m; }\n",
    "function __rwtraExportStar(target, source) {\n",
    "  if (source && (typeof source === \"object\" || typeof source === \"function\")) {\n",
    "    for (const key of Object.keys(source)) {\n",
    "      if (key !== \"default\" && !(key in target)) target[key] = source[key];\n",
    "    }\n",
    "  }\n",
    "}\n",
);

/// Accumulated replacements for one module.
#[derive(Default)]
struct Rewrite {
    /// `(start, end, replacement)` in source order
    edits: Vec<(u32, u32, String)>,
    /// Assignments that must run before the body (hoisted function exports)
    hoisted: Vec<String>,
    /// Assignments that must run after the body (`export { a, b }`)
    trailing: Vec<String>,
    imports: usize,
}

impl Rewrite {
    fn next_binding(&mut self) -> String {
        let name = format!("__rwtra_m{}", self.imports);
        self.imports += 1;
        name
    }

    fn replace(&mut self, span: Span, replacement: String) {
        self.edits.push((span.start, span.end, replacement));
    }
}

fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

fn slice(code: &str, span: Span) -> &str {
    &code[span.start as usize..span.end as usize]
}

fn export_name(name: &ModuleExportName) -> String {
    name.name().to_string()
}

/// Rewrite ES module syntax in `code` into CommonJS. Code without any module
/// syntax is returned unchanged.
pub fn to_commonjs(code: &str) -> TranspileResult<String> {
    let allocator = Allocator::default();
    let parser_return = Parser::new(&allocator, code, SourceType::mjs()).parse();

    if !parser_return.errors.is_empty() {
        return Err(TranspileError::ModuleSyntax(describe_errors(
            "module output",
            &parser_return.errors,
        )));
    }

    let mut rewrite = Rewrite::default();

    for statement in &parser_return.program.body {
        match statement {
            Statement::ImportDeclaration(decl) => {
                let binding = rewrite.next_binding();
                let mut text = format!("const {} = require({});", binding, quote(&decl.source.value));
                for specifier in decl.specifiers.iter().flatten() {
                    let line = match specifier {
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            format!(" const {} = __rwtraDefault({});", s.local.name, binding)
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            format!(" const {} = {};", s.local.name, binding)
                        }
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            let imported = export_name(&s.imported);
                            if imported == "default" {
                                format!(" const {} = __rwtraDefault({});", s.local.name, binding)
                            } else {
                                format!(" const {} = {}[{}];", s.local.name, binding, quote(&imported))
                            }
                        }
                    };
                    text.push_str(&line);
                }
                rewrite.replace(decl.span, text);
            }
            Statement::ExportNamedDeclaration(decl) => {
                if let Some(declaration) = &decl.declaration {
                    let mut text = slice(code, declaration.span()).to_string();
                    match declaration {
                        Declaration::VariableDeclaration(var) => {
                            for declarator in &var.declarations {
                                for id in declarator.id.get_binding_identifiers() {
                                    text.push_str(&format!(" exports.{0} = {0};", id.name));
                                }
                            }
                        }
                        Declaration::FunctionDeclaration(func) => {
                            if let Some(id) = &func.id {
                                rewrite.hoisted.push(format!("exports.{0} = {0};", id.name));
                            }
                        }
                        other => {
                            if let Some(id) = other.id() {
                                text.push_str(&format!(" exports.{0} = {0};", id.name));
                            }
                        }
                    }
                    rewrite.replace(decl.span, text);
                } else if let Some(source) = &decl.source {
                    let binding = rewrite.next_binding();
                    let mut text = format!("const {} = require({});", binding, quote(&source.value));
                    for specifier in &decl.specifiers {
                        let local = export_name(&specifier.local);
                        let exported = quote(&export_name(&specifier.exported));
                        if local == "default" {
                            text.push_str(&format!(" exports[{}] = __rwtraDefault({});", exported, binding));
                        } else {
                            text.push_str(&format!(" exports[{}] = {}[{}];", exported, binding, quote(&local)));
                        }
                    }
                    rewrite.replace(decl.span, text);
                } else {
                    for specifier in &decl.specifiers {
                        rewrite.trailing.push(format!(
                            "exports[{}] = {};",
                            quote(&export_name(&specifier.exported)),
                            export_name(&specifier.local)
                        ));
                    }
                    rewrite.replace(decl.span, String::new());
                }
            }
            Statement::ExportDefaultDeclaration(decl) => {
                let text = match &decl.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                        let body = slice(code, func.span);
                        match &func.id {
                            Some(id) => {
                                rewrite.hoisted.push(format!("exports.default = {};", id.name));
                                body.to_string()
                            }
                            None => format!("exports.default = {};", body),
                        }
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                        let body = slice(code, class.span);
                        match &class.id {
                            Some(id) => format!("{} exports.default = {};", body, id.name),
                            None => format!("exports.default = {};", body),
                        }
                    }
                    ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => String::new(),
                    expression => {
                        format!("exports.default = {};", slice(code, expression.span()))
                    }
                };
                rewrite.replace(decl.span, text);
            }
            Statement::ExportAllDeclaration(decl) => {
                let text = match &decl.exported {
                    Some(name) => format!(
                        "exports[{}] = require({});",
                        quote(&export_name(name)),
                        quote(&decl.source.value)
                    ),
                    None => format!("__rwtraExportStar(exports, require({}));", quote(&decl.source.value)),
                };
                rewrite.replace(decl.span, text);
            }
            _ => {}
        }
    }

    if rewrite.edits.is_empty() {
        return Ok(code.to_string());
    }

    let mut output = String::with_capacity(code.len() + INTEROP_PRELUDE.len() + 256);
    output.push_str(INTEROP_PRELUDE);
    for line in &rewrite.hoisted {
        output.push_str(line);
        output.push('\n');
    }

    let mut cursor = 0usize;
    for (start, end, replacement) in &rewrite.edits {
        output.push_str(&code[cursor..*start as usize]);
        output.push_str(replacement);
        cursor = *end as usize;
    }
    output.push_str(&code[cursor..]);

    for line in &rewrite.trailing {
        output.push('\n');
        output.push_str(line);
    }
    output.push('\n');

    Ok(output)
}
