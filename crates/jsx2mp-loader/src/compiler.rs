use std::{
    collections::BTreeMap,
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use annotate_snippets::{Level, Renderer, Snippet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sourcemap::SourceMap;

use crate::CompilerOptions;

/// A location in the compiled source, as reported by the compiler.
///
/// `line` is 1-based, `column` is 0-based (in characters).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// Error raised by a [`Compiler`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    /// Present when the compiler could attribute the error to a syntax node.
    #[serde(default)]
    pub loc: Option<Position>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            loc: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.loc = Some(Position { line, column });
        self
    }

    /// Byte offset of `loc` inside `source`.
    fn offset_in(&self, source: &str) -> Option<usize> {
        let loc = self.loc?;
        let line_start = if loc.line <= 1 {
            0
        } else {
            source
                .match_indices('\n')
                .nth(loc.line - 2)
                .map(|(idx, _)| idx + 1)?
        };
        let line = source[line_start..].split('\n').next().unwrap_or_default();
        let column = line
            .char_indices()
            .nth(loc.column)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len());
        Some(line_start + column)
    }

    /// Renders the error with an annotated excerpt of `source`.
    ///
    /// Returns `None` when the error carries no position or the position lies
    /// outside of `source`.
    pub fn render_snippet(&self, source: &str, origin: &Path) -> Option<String> {
        let start = self.offset_in(source)?;
        let end = source[start..]
            .chars()
            .next()
            .map(|c| start + c.len_utf8())
            .unwrap_or(start);
        let origin = origin.display().to_string();
        let msg = Level::Error.title(&self.message).snippet(
            Snippet::source(source)
                .origin(&origin)
                .fold(true)
                .annotation(Level::Error.span(start..end).label(&self.message)),
        );
        let rendered = Renderer::styled().render(msg).to_string();
        Some(rendered)
    }
}

/// Output of a [`Compiler`] run.
#[derive(Clone, Debug, Default)]
pub struct TransformResult {
    pub code: String,
    pub map: Option<SourceMap>,
    /// Stylesheets referenced by the source, in import order.
    pub css_files: Vec<PathBuf>,
    /// Modules that must be imported for their side effects only.
    pub imported: BTreeMap<String, bool>,
    /// Extracted style, attached after style processing.
    pub style: Option<String>,
    /// Assets referenced by the extracted style, attached after style processing.
    pub assets: Vec<PathBuf>,
}

/// A JSX to mini-program compiler.
pub trait Compiler: Send + Sync {
    fn transform(
        &self,
        source: &str,
        options: &CompilerOptions,
    ) -> Result<TransformResult, CompileError>;
}

impl<F> Compiler for F
where
    F: Fn(&str, &CompilerOptions) -> Result<TransformResult, CompileError> + Send + Sync,
{
    fn transform(
        &self,
        source: &str,
        options: &CompilerOptions,
    ) -> Result<TransformResult, CompileError> {
        self(source, options)
    }
}

#[derive(Serialize)]
struct Request<'a> {
    source: &'a str,
    options: &'a CompilerOptions,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    code: String,
    #[serde(default)]
    map: Option<Value>,
    #[serde(default)]
    css_files: Vec<PathBuf>,
    #[serde(default)]
    imported: BTreeMap<String, bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Response {
    Failure { error: CompileError },
    Success(WireResult),
}

impl TryFrom<WireResult> for TransformResult {
    type Error = CompileError;

    fn try_from(wire: WireResult) -> Result<Self, Self::Error> {
        let map = match wire.map {
            None | Some(Value::Null) => None,
            Some(map) => {
                let bytes = serde_json::to_vec(&map)
                    .map_err(|e| CompileError::new(format!("invalid source map: {e}")))?;
                let map = SourceMap::from_slice(&bytes)
                    .map_err(|e| CompileError::new(format!("invalid source map: {e}")))?;
                Some(map)
            }
        };
        Ok(Self {
            code: wire.code,
            map,
            css_files: wire.css_files,
            imported: wire.imported,
            ..Default::default()
        })
    }
}

/// A compiler running as an external process.
///
/// The request `{ "source", "options" }` is written as JSON to the standard
/// input. The process answers on its standard output with either
/// `{ "code", "map", "cssFiles", "imported" }` or `{ "error": { "message", "loc" } }`.
#[derive(Clone, Debug)]
pub struct CommandCompiler {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Compiler for CommandCompiler {
    fn transform(
        &self,
        source: &str,
        options: &CompilerOptions,
    ) -> Result<TransformResult, CompileError> {
        let request = serde_json::to_vec(&Request { source, options })
            .map_err(|e| CompileError::new(format!("failed to encode request: {e}")))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                CompileError::new(format!("failed to run `{}`: {e}", self.program.display()))
            })?;

        // stdin is fed from its own thread so that a compiler streaming its
        // answer before reading the whole source cannot fill both pipes.
        let stdin = child.stdin.take();
        let request = &request;
        let (sent, output) = thread::scope(|scope| {
            let sender = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(request),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let sent = sender
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("source writer panicked")));
            (sent, output)
        });

        let output =
            output.map_err(|e| CompileError::new(format!("compiler process failed: {e}")))?;

        match serde_json::from_slice::<Response>(&output.stdout) {
            Ok(Response::Failure { error }) => Err(error),
            Ok(Response::Success(wire)) if output.status.success() => wire.try_into(),
            _ => Err(match sent {
                Err(e) => CompileError::new(format!(
                    "failed to send source to `{}`: {e}",
                    self.program.display()
                )),
                Ok(()) => CompileError::new(format!(
                    "`{}` exited with {} without a valid result",
                    self.program.display(),
                    output.status
                )),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_points_at_location() {
        let source = "const a = 1;\nconst b = <App;\n";
        let err = CompileError::new("Unexpected token").at(2, 14);
        assert_eq!(err.offset_in(source), Some(27));

        let rendered = err.render_snippet(source, Path::new("src/app.js")).unwrap();
        assert!(rendered.contains("Unexpected token"));
        assert!(rendered.contains("src/app.js"));
    }

    #[test]
    fn snippet_requires_location() {
        let err = CompileError::new("boom");
        assert!(err.render_snippet("x", Path::new("a.js")).is_none());

        let err = CompileError::new("boom").at(10, 0);
        assert!(err.render_snippet("one line", Path::new("a.js")).is_none());
    }

    #[test]
    fn decode_success_response() {
        let response: Response = serde_json::from_str(
            r#"{
                "code": "App({});",
                "map": { "version": 3, "sources": ["app.js"], "names": [], "mappings": "AAAA" },
                "cssFiles": ["./app.css"],
                "imported": { "./util": true, "rax-app": false }
            }"#,
        )
        .unwrap();
        let Response::Success(wire) = response else {
            panic!("expected a success response");
        };
        let result = TransformResult::try_from(wire).unwrap();
        assert_eq!(result.code, "App({});");
        assert_eq!(result.map.unwrap().get_source(0), Some("app.js"));
        assert_eq!(result.css_files, vec![PathBuf::from("./app.css")]);
        assert_eq!(result.imported.len(), 2);
        assert!(result.style.is_none());
    }

    #[test]
    fn decode_failure_response() {
        let response: Response = serde_json::from_str(
            r#"{ "error": { "message": "Unexpected token", "loc": { "line": 3, "column": 4 } } }"#,
        )
        .unwrap();
        let Response::Failure { error } = response else {
            panic!("expected a failure response");
        };
        assert_eq!(error, CompileError::new("Unexpected token").at(3, 4));
    }

    #[test]
    fn closures_are_compilers() {
        let compiler = |source: &str, _: &CompilerOptions| -> Result<_, CompileError> {
            Ok(TransformResult {
                code: source.to_uppercase(),
                ..Default::default()
            })
        };
        fn assert_compiler(_: &impl Compiler) {}
        assert_compiler(&compiler);
    }

    fn app_options() -> CompilerOptions {
        CompilerOptions::merge(
            &Default::default(),
            crate::RunOptions {
                resource_path: "/p/src/app.js".into(),
                output_path: "/p/dist".into(),
                source_path: "/p/src".into(),
                platform: crate::PlatformDescriptor::ali(),
                disable_copy_npm: false,
                turn_off_source_map: false,
            },
        )
    }

    #[cfg(unix)]
    #[test]
    fn large_source_with_streaming_compiler() {
        // answers with 200 KB of code before reading its input
        let compiler = CommandCompiler::new("/bin/sh").arg("-c").arg(
            r#"printf '{"code":"'; head -c 200000 /dev/zero | tr '\0' x; printf '"}'; cat > /dev/null"#,
        );
        let source = "x".repeat(200_000);
        let result = compiler.transform(&source, &app_options()).unwrap();
        assert_eq!(result.code.len(), 200_000);
    }

    #[cfg(unix)]
    #[test]
    fn compiler_ignoring_its_input() {
        let compiler = CommandCompiler::new("/bin/sh")
            .arg("-c")
            .arg(r#"echo '{"code":"ok"}'"#);
        let source = "x".repeat(200_000);
        let result = compiler.transform(&source, &app_options()).unwrap();
        assert_eq!(result.code, "ok");
    }

    #[test]
    fn missing_program_is_a_compile_error() {
        let compiler = CommandCompiler::new("/nonexistent/jsx-compiler-bin");
        let err = compiler.transform("<App/>", &app_options()).unwrap_err();
        assert!(err.loc.is_none());
        assert!(err.message.contains("failed to run"));
    }
}
