//! Host that reads unit sources from a [`VirtualFileSystem`].
//!
//! A unit's declarative prologue is written as directive comments; every
//! other line is ignored outside of a `@code` block.
//!
//! ```text
//! // @import ./lib/a.js
//! // @import environments=background ./worker-only.js
//! // @namespace app.util
//! // @code constants=SL_DIRECTORY guard=global:app.enabled
//! loaded from {{SL_DIRECTORY}}
//! // @set app.ready true
//! // @end
//! ```
//!
//! Executing a block renders its body lines, substituting `{{NAME}}` with
//! the bound constant (or `undefined`), into the host's [`Transcript`], and
//! applies its `@set` lines to the global scope.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::config::Environment;
use crate::constants::Bindings;
use crate::context::{ImportOptions, UnitContext};
use crate::error::{BlockError, FetchError};
use crate::host::{Delivery, FetchCompletion, FetchOutcome, FetchRequest, UnitHost};
use crate::namespace::GlobalScope;
use crate::path::VirtualPath;
use crate::unit::CodeBlock;
use crate::vfs::VirtualFileSystem;

const DIRECTIVE_PREFIX: &str = "// @";

/// One executed script block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub unit: VirtualPath,
    pub index: usize,
    pub output: String,
}

/// Shared log of executed script blocks, in execution order.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Arc<Mutex<Vec<Evaluation>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Evaluation>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        }
    }

    fn push(&self, evaluation: Evaluation) {
        self.lock().push(evaluation);
    }

    pub fn entries(&self) -> Vec<Evaluation> {
        self.lock().clone()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.output.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum GuardExpr {
    /// Holds when the global value at the path exists and is neither
    /// `null` nor `false`.
    Global(String),
    /// Holds when the session environment matches the tag.
    Env(String),
    Invalid(String),
}

impl GuardExpr {
    fn parse(raw: &str) -> Self {
        match raw.split_once(':') {
            Some(("global", path)) if !path.is_empty() => GuardExpr::Global(path.to_string()),
            Some(("env", tag)) if !tag.is_empty() => GuardExpr::Env(tag.to_string()),
            _ => GuardExpr::Invalid(raw.to_string()),
        }
    }

    fn evaluate(&self, global: &GlobalScope, environment: Environment) -> Result<bool, BlockError> {
        match self {
            GuardExpr::Global(path) => Ok(!matches!(
                global.get(path),
                None | Some(Value::Null) | Some(Value::Bool(false))
            )),
            GuardExpr::Env(tag) => tag
                .parse::<Environment>()
                .map(|tag| tag == environment)
                .map_err(|err| BlockError::new(err.to_string())),
            GuardExpr::Invalid(raw) => Err(BlockError::new(format!("unsupported guard {:?}", raw))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ScriptBlock {
    environments: Option<Vec<Environment>>,
    constants: Vec<String>,
    guard: Option<GuardExpr>,
    lines: Vec<String>,
    assignments: Vec<(String, Value)>,
}

impl ScriptBlock {
    /// Text written into exported bundles.
    fn source(&self) -> String {
        let body: Vec<&str> = self
            .lines
            .iter()
            .map(String::as_str)
            .filter(|line| !line.trim().is_empty())
            .collect();
        format!("function({}){{\n{}\n}}", self.constants.join(","), body.join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Directive {
    Import {
        reference: String,
        environments: Option<Vec<Environment>>,
    },
    Namespace(String),
    Code(ScriptBlock),
}

fn malformed(line: usize, message: impl Into<String>) -> FetchError {
    FetchError::Malformed {
        line,
        message: message.into(),
    }
}

fn parse_environments(line: usize, raw: &str) -> Result<Vec<Environment>, FetchError> {
    raw.split(',')
        .map(|tag| {
            tag.parse::<Environment>()
                .map_err(|err| malformed(line, err.to_string()))
        })
        .collect()
}

#[derive(Default)]
struct Options {
    environments: Option<Vec<Environment>>,
    constants: Vec<String>,
    guard: Option<GuardExpr>,
    positional: Vec<String>,
}

fn parse_options(line: usize, rest: &str, allowed: &[&str]) -> Result<Options, FetchError> {
    let mut options = Options::default();
    for token in rest.split_whitespace() {
        let Some((name, value)) = token.split_once('=') else {
            options.positional.push(token.to_string());
            continue;
        };
        if !allowed.contains(&name) {
            return Err(malformed(line, format!("unknown option {:?}", name)));
        }
        match name {
            "environments" => options.environments = Some(parse_environments(line, value)?),
            "constants" => {
                options.constants = value
                    .split(',')
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            "guard" => options.guard = Some(GuardExpr::parse(value)),
            _ => return Err(malformed(line, format!("unknown option {:?}", name))),
        }
    }
    Ok(options)
}

fn parse_assignment(line: usize, rest: &str) -> Result<(String, Value), FetchError> {
    let rest = rest.trim();
    let (path, raw) = rest
        .split_once(char::is_whitespace)
        .ok_or_else(|| malformed(line, "@set needs a path and a value"))?;
    let value = serde_json::from_str(raw.trim())
        .map_err(|err| malformed(line, format!("invalid @set value: {}", err)))?;
    Ok((path.to_string(), value))
}

fn parse_script(source: &str) -> Result<Vec<Directive>, FetchError> {
    let mut directives = Vec::new();
    let mut open: Option<(usize, ScriptBlock)> = None;

    for (index, raw_line) in source.lines().enumerate() {
        let line = index + 1;
        let Some(directive) = raw_line.trim_start().strip_prefix(DIRECTIVE_PREFIX) else {
            if let Some((_, block)) = open.as_mut() {
                block.lines.push(raw_line.to_string());
            }
            continue;
        };
        let (name, rest) = directive
            .split_once(char::is_whitespace)
            .unwrap_or((directive, ""));

        if open.is_some() {
            match name {
                "end" => {
                    if let Some((_, block)) = open.take() {
                        directives.push(Directive::Code(block));
                    }
                }
                "set" => {
                    let assignment = parse_assignment(line, rest)?;
                    if let Some((_, block)) = open.as_mut() {
                        block.assignments.push(assignment);
                    }
                }
                other => {
                    return Err(malformed(line, format!("@{} inside a @code block", other)));
                }
            }
            continue;
        }

        match name {
            "import" => {
                let mut options = parse_options(line, rest, &["environments"])?;
                if options.positional.len() != 1 {
                    return Err(malformed(line, "@import takes exactly one reference"));
                }
                directives.push(Directive::Import {
                    reference: options.positional.remove(0),
                    environments: options.environments,
                });
            }
            "namespace" => {
                let names: Vec<&str> = rest.split_whitespace().collect();
                let [name] = names.as_slice() else {
                    return Err(malformed(line, "@namespace takes exactly one name"));
                };
                directives.push(Directive::Namespace(name.to_string()));
            }
            "code" => {
                let options = parse_options(line, rest, &["environments", "constants", "guard"])?;
                if !options.positional.is_empty() {
                    return Err(malformed(line, "@code only takes name=value options"));
                }
                open = Some((
                    line,
                    ScriptBlock {
                        environments: options.environments,
                        constants: options.constants,
                        guard: options.guard,
                        lines: Vec::new(),
                        assignments: Vec::new(),
                    },
                ));
            }
            "end" => return Err(malformed(line, "@end without @code")),
            "set" => return Err(malformed(line, "@set outside of a @code block")),
            other => return Err(malformed(line, format!("unknown directive @{}", other))),
        }
    }

    if let Some((line, _)) = open {
        return Err(malformed(line, "unterminated @code block"));
    }
    Ok(directives)
}

/// Replaces every `{{NAME}}` with the bound value, or `undefined`.
fn render(line: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = rest[start + 2..start + 2 + len].trim();
        match bindings.get(name) {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str("undefined"),
        }
        rest = &rest[start + 2 + len + 2..];
    }
    out.push_str(rest);
    out
}

#[derive(Clone)]
pub struct ScriptHost {
    fs: Arc<dyn VirtualFileSystem>,
    global: GlobalScope,
    transcript: Transcript,
    delivery: Delivery,
}

impl ScriptHost {
    pub fn new(fs: Arc<dyn VirtualFileSystem>, global: GlobalScope) -> Self {
        Self {
            fs,
            global,
            transcript: Transcript::new(),
            delivery: Delivery::default(),
        }
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn global(&self) -> &GlobalScope {
        &self.global
    }

    fn serve(&self, request: &FetchRequest, cx: &UnitContext) -> FetchOutcome {
        let path = request
            .location
            .split_once('?')
            .map_or(request.location.as_str(), |(path, _)| path);
        let source = self.fs.read_to_string(&VirtualPath::from(path))?;
        let directives = parse_script(&source)?;

        let environment = cx.environment();
        let mut index = 0;
        for directive in directives {
            match directive {
                Directive::Import {
                    reference,
                    environments: None,
                } => cx.import(&reference)?,
                Directive::Import {
                    reference,
                    environments: Some(environments),
                } => {
                    cx.import_with(&reference, ImportOptions::environments(environments))?;
                }
                Directive::Namespace(name) => {
                    if let Err(err) = cx.namespace(&name) {
                        if !cx.is_open() {
                            return Err(err.into());
                        }
                        tracing::warn!("{}: {}", request.key, err);
                    }
                }
                Directive::Code(block) => {
                    cx.code(self.code_block(request.key.clone(), index, block, environment))?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    fn code_block(
        &self,
        unit: VirtualPath,
        index: usize,
        block: ScriptBlock,
        environment: Environment,
    ) -> CodeBlock {
        let source = block.source();
        let global = self.global.clone();
        let transcript = self.transcript.clone();
        let ScriptBlock {
            environments,
            constants,
            guard,
            lines,
            assignments,
        } = block;

        let body_global = global.clone();
        let mut code = CodeBlock::new(source, move |bindings: &Bindings| {
            let output = lines
                .iter()
                .map(|line| render(line, bindings))
                .collect::<Vec<_>>()
                .join("\n");
            for (path, value) in assignments {
                body_global
                    .set(&path, value)
                    .map_err(|err| BlockError::new(err.to_string()))?;
            }
            transcript.push(Evaluation {
                unit,
                index,
                output,
            });
            Ok(())
        })
        .with_constants(constants);

        if let Some(environments) = environments {
            code = code.in_environments(environments);
        }
        if let Some(expr) = guard {
            code = code.guarded(move || expr.evaluate(&global, environment));
        }
        code
    }
}

impl UnitHost for ScriptHost {
    fn fetch_unit(&self, request: FetchRequest, cx: UnitContext, completion: FetchCompletion) {
        tracing::debug!("reading {}", request.location);
        match self.delivery {
            Delivery::Immediate => completion.complete(self.serve(&request, &cx)),
            Delivery::Deferred => match Handle::try_current() {
                Ok(handle) => {
                    let host = self.clone();
                    handle.spawn_blocking(move || {
                        completion.complete(host.serve(&request, &cx));
                    });
                }
                Err(_) => {
                    tracing::warn!("no tokio runtime, serving {} immediately", request.key);
                    completion.complete(self.serve(&request, &cx));
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ConstantSource;
    use crate::unit::Unit;
    use crate::vfs::InMemoryFileSystem;
    use serde_json::json;

    #[test]
    fn parses_directives_in_order() {
        let source = "\
// @import ./a.js
// @import environments=background ./worker.js
// @namespace app.util
plain text is ignored
// @code constants=SL_DIRECTORY,SL_GLOBAL guard=env:window
hello {{SL_DIRECTORY}}
// @set app.ready true
// @end
";
        let directives = parse_script(source).unwrap();
        assert_eq!(directives.len(), 4);
        assert_eq!(
            directives[1],
            Directive::Import {
                reference: "./worker.js".to_string(),
                environments: Some(vec![Environment::Background]),
            }
        );
        let Directive::Code(block) = &directives[3] else {
            panic!("expected a code block");
        };
        assert_eq!(block.constants, vec!["SL_DIRECTORY", "SL_GLOBAL"]);
        assert_eq!(block.guard, Some(GuardExpr::Env("window".to_string())));
        assert_eq!(block.lines, vec!["hello {{SL_DIRECTORY}}"]);
        assert_eq!(block.assignments, vec![("app.ready".to_string(), json!(true))]);
        assert_eq!(
            block.source(),
            "function(SL_DIRECTORY,SL_GLOBAL){\nhello {{SL_DIRECTORY}}\n}"
        );
    }

    #[test]
    fn malformed_directives_report_line() {
        let cases = [
            ("// @import\n", 1),
            ("// @import a.js b.js\n", 1),
            ("\n// @code\nbody\n", 2),
            ("// @end\n", 1),
            ("// @code\n// @import x.js\n// @end\n", 2),
            ("// @import environments=mars a.js\n", 1),
            ("// @frobnicate\n", 1),
            ("// @code\n// @set app.x {oops\n// @end\n", 2),
        ];
        for (source, expected) in cases {
            match parse_script(source) {
                Err(FetchError::Malformed { line, .. }) => assert_eq!(line, expected, "{source:?}"),
                other => panic!("expected malformed for {source:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn guard_expressions() {
        let global = GlobalScope::new();
        global.set("app.on", json!(true)).unwrap();
        global.set("app.off", json!(false)).unwrap();

        let fg = Environment::Foreground;
        assert_eq!(GuardExpr::parse("global:app.on").evaluate(&global, fg), Ok(true));
        assert_eq!(GuardExpr::parse("global:app.off").evaluate(&global, fg), Ok(false));
        assert_eq!(GuardExpr::parse("global:app.none").evaluate(&global, fg), Ok(false));
        assert_eq!(GuardExpr::parse("env:window").evaluate(&global, fg), Ok(true));
        assert_eq!(GuardExpr::parse("env:worker").evaluate(&global, fg), Ok(false));
        assert!(GuardExpr::parse("env:mars").evaluate(&global, fg).is_err());
        assert!(GuardExpr::parse("global:").evaluate(&global, fg).is_err());
        assert!(GuardExpr::parse("always").evaluate(&global, fg).is_err());
    }

    #[test]
    fn render_substitutes_bound_constants() {
        let unit = Unit::new("/app/a.js".parse().unwrap());
        let global = GlobalScope::new();
        let bindings = ConstantSource {
            unit: &unit,
            environment: Environment::Background,
            global: &global,
        }
        .bind(&["SL_DIRECTORY".to_string(), "SL_WORKER".to_string()]);

        assert_eq!(
            render("dir={{SL_DIRECTORY}} worker={{ SL_WORKER }} x={{SL_NOPE}}", &bindings),
            "dir=/app/ worker=true x=undefined"
        );
        assert_eq!(render("no {{ closing", &bindings), "no {{ closing");
    }

    #[test]
    fn serve_declares_into_context() {
        let fs = InMemoryFileSystem::new()
            .with_file(
                "/app/main.js",
                "// @import ./lib.js\n// @namespace app\n// @code\nmain\n// @end\n",
            )
            .unwrap();
        let host = ScriptHost::new(Arc::new(fs), GlobalScope::new());
        let key = VirtualPath::from("/app/main.js");
        let cx = UnitContext::open(key.clone(), key.directory(), Environment::Background);
        let request = FetchRequest {
            unit: crate::unit::UnitId(0),
            key,
            location: "/app/main.js?_sl_t1".to_string(),
        };

        host.serve(&request, &cx).unwrap();
        let discovery = cx.seal();
        assert_eq!(discovery.imports, vec!["./lib.js"]);
        assert_eq!(discovery.namespaces, vec!["app"]);
        assert_eq!(discovery.blocks.len(), 1);
        assert_eq!(discovery.blocks[0].source, "function(){\nmain\n}");
    }

    #[test]
    fn missing_source_is_a_fetch_error() {
        let host = ScriptHost::new(Arc::new(InMemoryFileSystem::new()), GlobalScope::new());
        let key = VirtualPath::from("/nope.js");
        let cx = UnitContext::open(key.clone(), key.directory(), Environment::Background);
        let request = FetchRequest {
            unit: crate::unit::UnitId(0),
            key,
            location: "/nope.js".to_string(),
        };
        assert!(matches!(host.serve(&request, &cx), Err(FetchError::Fs(_))));
    }

    #[test]
    fn deferred_delivery_without_runtime_serves_inline() {
        let fs = InMemoryFileSystem::new()
            .with_file("/a.js", "// @import ./b.js
")
            .unwrap();
        let host = ScriptHost::new(Arc::new(fs), GlobalScope::new()).with_delivery(Delivery::Deferred);
        let key = VirtualPath::from("/a.js");
        let cx = UnitContext::open(key.clone(), key.directory(), Environment::Foreground);
        let request = FetchRequest {
            unit: crate::unit::UnitId(0),
            key,
            location: "/a.js".to_string(),
        };
        let (completion, mut receiver) = FetchCompletion::channel();
        host.fetch_unit(request, cx.clone(), completion);

        assert!(matches!(receiver.try_recv(), Ok(Ok(()))));
        assert_eq!(cx.seal().imports, vec!["./b.js"]);
    }
}
