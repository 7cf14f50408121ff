#![cfg_attr(not(test), allow(dead_code, unused_imports))]

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use jsx2mp_loader::{
    failure_banner, AppLoader, ArtifactKind, BaseOptions, CompileError, CompilerOptions, Error,
    Implementation, LoaderContext, LoaderOptions, Mode, PlatformDescriptor, RegistryResolver,
    ResolveError, SourceMap, StyleError, StyleOutput, StyleProcessor, TransformResult,
    COMPILER_PACKAGE, DEFAULT_STYLE,
};
use serde_json::json;
use tempfile::TempDir;

/// A style processor that ignores its inputs.
struct StubStyles(StyleOutput);

#[async_trait]
impl StyleProcessor for StubStyles {
    async fn process(&self, _: &[PathBuf], _: &Path) -> Result<StyleOutput, StyleError> {
        Ok(self.0.clone())
    }
}

/// Sources and options received by a compiler.
type Calls = Arc<Mutex<Vec<(String, CompilerOptions)>>>;

fn compiler_returning(result: Result<TransformResult, CompileError>) -> (Implementation, Calls) {
    let calls = Calls::default();
    let seen = calls.clone();
    let implementation = Implementation::new(
        move |source: &str, options: &CompilerOptions| -> Result<TransformResult, CompileError> {
            seen.lock()
                .unwrap()
                .push((source.to_string(), options.clone()));
            result.clone()
        },
    );
    (implementation, calls)
}

fn transformed(code: &str, imported: &[&str]) -> TransformResult {
    TransformResult {
        code: code.to_string(),
        imported: imported.iter().map(|m| (m.to_string(), true)).collect(),
        ..Default::default()
    }
}

fn loader_with(implementation: Implementation, style: &str) -> AppLoader {
    let mut registry = RegistryResolver::new();
    registry.register(COMPILER_PACKAGE, 0, implementation);
    AppLoader::new(registry).set_style_processor(StubStyles(StyleOutput {
        style: style.to_string(),
        assets: Vec::new(),
    }))
}

fn context(root: &Path, platform: PlatformDescriptor, mode: Mode) -> LoaderContext {
    LoaderContext::new(
        root.join("src/app.js"),
        root,
        LoaderOptions {
            entry_path: PathBuf::from("src/app"),
            output_path: root.join("dist"),
            platform,
            mode,
            disable_copy_npm: false,
            turn_off_source_map: false,
        },
    )
}

fn test_platform() -> PlatformDescriptor {
    PlatformDescriptor::new("Test Platform", ".css")
}

fn banner(ctx: &LoaderContext) -> String {
    format!(
        "/* Generated by JSX2MP AppLoader, sourceFile: {}. */",
        ctx.resource_path().display()
    )
}

#[tokio::test]
async fn app_end_to_end() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Ok(transformed("X", &["./util"])));
    let loader = loader_with(implementation, "");
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let module = loader.run(&ctx, "<App/>").await.unwrap();

    let lines = module.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0], banner(&ctx));
    assert!(lines[0].contains(&*ctx.resource_path().to_string_lossy()));
    assert_eq!(lines[1], "import './util';");

    let dist = root.path().join("dist");
    assert_eq!(fs::read_to_string(dist.join("app.js")).unwrap(), "X");
    assert_eq!(fs::read_to_string(dist.join("app.css")).unwrap(), DEFAULT_STYLE);
}

#[tokio::test]
async fn one_import_per_dependency() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Ok(transformed("X", &["./b", "./a"])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let module = loader_with(implementation, "").run(&ctx, "").await.unwrap();

    let imports = module.lines().skip(1).collect::<Vec<_>>();
    assert_eq!(imports, ["import './a';", "import './b';"]);
}

#[tokio::test]
async fn no_dependencies() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Ok(transformed("X", &[])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let module = loader_with(implementation, "").run(&ctx, "").await.unwrap();
    assert_eq!(module, format!("{}\n", banner(&ctx)));
}

#[tokio::test]
async fn dependency_paths_are_escaped() {
    let root = TempDir::new().unwrap();
    let (implementation, _) =
        compiler_returning(Ok(transformed("X", &[r"C:\proj\node_modules\rax"])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let module = loader_with(implementation, "").run(&ctx, "").await.unwrap();
    assert!(module.ends_with(r"import 'C:\\proj\\node_modules\\rax';"));
}

#[tokio::test]
async fn output_directory_creation_is_idempotent() {
    let root = TempDir::new().unwrap();
    let (implementation, calls) = compiler_returning(Ok(transformed("X", &[])));
    let loader = loader_with(implementation, "");
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    assert!(!root.path().join("dist").exists());
    loader.run(&ctx, "").await.unwrap();
    loader.run(&ctx, "").await.unwrap();
    assert!(root.path().join("dist").is_dir());
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn compiler_receives_merged_options() {
    let root = TempDir::new().unwrap();
    let (implementation, calls) = compiler_returning(Ok(transformed("X", &[])));
    let implementation = implementation.with_base_options(
        BaseOptions::new()
            .with("type", "component")
            .with("constantDir", json!(["src/constants"])),
    );
    let ctx = context(root.path(), PlatformDescriptor::ali(), Mode::Build);

    loader_with(implementation, "").run(&ctx, "").await.unwrap();

    let calls = calls.lock().unwrap();
    let (_, options) = &calls[0];
    assert_eq!(options.kind, ArtifactKind::App);
    assert_eq!(options.resource_path, root.path().join("src/app.js"));
    assert_eq!(options.source_file_name, options.resource_path);
    assert_eq!(options.source_path, root.path().join("src/app"));
    assert_eq!(options.output_path, root.path().join("dist"));
    assert_eq!(options.platform, PlatformDescriptor::ali());
    assert_eq!(options.extra["constantDir"], json!(["src/constants"]));
    assert!(!options.extra.contains_key("type"));
}

#[tokio::test]
async fn compiler_receives_eliminated_source() {
    let root = TempDir::new().unwrap();
    let (implementation, calls) = compiler_returning(Ok(transformed("X", &[])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);
    let raw = "import { isWeb } from 'universal-env';\nimport './app.css';\n\nif (false) {\n  init();\n}\nexport default App;\n";

    loader_with(implementation, "").run(&ctx, raw).await.unwrap();

    let calls = calls.lock().unwrap();
    let (source, _) = &calls[0];
    assert!(!source.contains("universal-env"));
    assert!(!source.contains("init()"));
    assert!(source.contains("import './app.css';"));
    assert!(source.contains("export default App;"));
}

#[tokio::test]
async fn extracted_style_follows_default_style() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Ok(transformed("X", &[])));
    let ctx = context(root.path(), PlatformDescriptor::ali(), Mode::Watch);

    loader_with(implementation, ".app { color: red; }")
        .run(&ctx, "")
        .await
        .unwrap();

    let css = fs::read_to_string(root.path().join("dist/app.acss")).unwrap();
    assert_eq!(css, format!("{DEFAULT_STYLE}.app {{ color: red; }}"));
    assert!(!root.path().join("dist/app.css").exists());
}

#[tokio::test]
async fn watch_mode_inlines_source_map() {
    let root = TempDir::new().unwrap();
    let map = SourceMap::from_slice(
        br#"{"version":3,"sources":["app.js"],"names":[],"mappings":"AAAA"}"#,
    )
    .unwrap();
    let (implementation, _) = compiler_returning(Ok(TransformResult {
        map: Some(map),
        ..transformed("App({});", &[])
    }));
    let loader = loader_with(implementation, "");

    let ctx = context(root.path(), test_platform(), Mode::Watch);
    loader.run(&ctx, "<App/>").await.unwrap();
    let code = fs::read_to_string(root.path().join("dist/app.js")).unwrap();
    assert!(code.starts_with(
        "App({});\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,"
    ));

    let ctx = context(root.path(), test_platform(), Mode::Build);
    loader.run(&ctx, "<App/>").await.unwrap();
    let code = fs::read_to_string(root.path().join("dist/app.js")).unwrap();
    assert_eq!(code, "App({});");
}

/// Formatted log output captured by a test subscriber.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn compile_failure_logs_banner() {
    for (debug, error) in [
        (false, CompileError::new("boom")),
        (false, CompileError::new("Unexpected token").at(1, 1)),
        (true, CompileError::new("boom")),
        (true, CompileError::new("Unexpected token").at(1, 1)),
    ] {
        let logs = LogBuffer::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let root = TempDir::new().unwrap();
        let (implementation, _) = compiler_returning(Err(error));
        let ctx = context(root.path(), PlatformDescriptor::wechat(), Mode::Watch);

        loader_with(implementation, "")
            .set_debug(debug)
            .run(&ctx, "<App/>")
            .await
            .unwrap_err();

        let banner = failure_banner(&PlatformDescriptor::wechat(), ctx.resource_path());
        assert!(logs.contents().contains(&banner), "debug = {debug}");
    }
}

#[tokio::test]
async fn successful_run_logs_no_banner() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Ok(transformed("X", &[])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);
    loader_with(implementation, "").run(&ctx, "").await.unwrap();

    assert!(!logs.contents().contains("Error occured"));
}

#[tokio::test]
async fn debug_mode_propagates_compiler_error() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Err(CompileError::new("boom")));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let err = loader_with(implementation, "")
        .set_debug(true)
        .run(&ctx, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompileError(e) if e == CompileError::new("boom")));
}

#[tokio::test]
async fn unknown_compile_error_is_sanitized() {
    let root = TempDir::new().unwrap();
    let (implementation, _) = compiler_returning(Err(CompileError::new("boom")));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let err = loader_with(implementation, "")
        .run(&ctx, "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CompileFailed(_)));
    assert_eq!(
        err.to_string(),
        format!(
            "Unknown compile error! please check your code at {}",
            ctx.resource_path().display()
        )
    );
    assert!(!root.path().join("dist/app.js").exists());
}

#[tokio::test]
async fn located_compile_error_keeps_message() {
    let root = TempDir::new().unwrap();
    let (implementation, _) =
        compiler_returning(Err(CompileError::new("Unexpected token").at(1, 5)));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let err = loader_with(implementation, "")
        .run(&ctx, "<App")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Unexpected token\nat {}", ctx.resource_path().display())
    );
}

#[tokio::test]
async fn missing_compiler_package() {
    let root = TempDir::new().unwrap();
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let err = AppLoader::new(RegistryResolver::new())
        .run(&ctx, "<App/>")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ResolveError(ResolveError::PackageNotFound(name, dir))
            if name == COMPILER_PACKAGE && dir == root.path()
    ));
    assert!(root.path().join("dist").is_dir());
}

#[tokio::test]
async fn run_file_reads_resource() {
    let root = TempDir::new().unwrap();
    fs::create_dir_all(root.path().join("src")).unwrap();
    fs::write(root.path().join("src/app.js"), "<App/>").unwrap();
    let (implementation, calls) = compiler_returning(Ok(transformed("X", &[])));
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    loader_with(implementation, "").run_file(&ctx).await.unwrap();
    assert_eq!(calls.lock().unwrap()[0].0, "<App/>");

    let missing = context(&root.path().join("nowhere"), test_platform(), Mode::Watch);
    let err = loader_with(compiler_returning(Ok(transformed("X", &[]))).0, "")
        .run_file(&missing)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReadSource(..)));
}

/// Installs an executable compiler package answering with a fixed result.
#[cfg(unix)]
fn install_compiler(dir: &Path, version: &str, response: &str) {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir.join("bin")).unwrap();
    fs::write(
        dir.join("package.json"),
        format!(
            r#"{{ "name": "jsx-compiler", "version": "{version}", "bin": "bin/compile" }}"#
        ),
    )
    .unwrap();
    let script = dir.join("bin/compile");
    fs::write(&script, format!("#!/bin/sh\ncat > /dev/null\necho '{response}'\n")).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn package_compiler_end_to_end() {
    let root = TempDir::new().unwrap();
    let node_modules = root.path().join("node_modules");
    install_compiler(
        &node_modules.join("jsx-compiler"),
        "0.4.0",
        r#"{ "code": "old", "imported": {} }"#,
    );
    install_compiler(
        &node_modules.join("jsx2mp-loader/node_modules/jsx-compiler"),
        "0.4.2",
        r#"{ "code": "App({});", "cssFiles": [], "imported": { "rax": false } }"#,
    );
    let ctx = context(root.path(), PlatformDescriptor::wechat(), Mode::Build);

    let module = AppLoader::new(jsx2mp_loader::PackageResolver::new())
        .set_style_processor(StubStyles(StyleOutput::default()))
        .run(&ctx, "<App/>")
        .await
        .unwrap();

    assert_eq!(module, format!("{}\nimport 'rax';", banner(&ctx)));
    assert_eq!(
        fs::read_to_string(root.path().join("dist/app.js")).unwrap(),
        "App({});"
    );
    assert!(root.path().join("dist/app.wxss").is_file());
}

#[cfg(unix)]
#[tokio::test]
async fn package_compiler_failure() {
    let root = TempDir::new().unwrap();
    install_compiler(
        &root.path().join("node_modules/jsx-compiler"),
        "1.0.0",
        r#"{ "error": { "message": "Unexpected token", "loc": { "line": 1, "column": 4 } } }"#,
    );
    let ctx = context(root.path(), test_platform(), Mode::Watch);

    let err = AppLoader::new(jsx2mp_loader::PackageResolver::new())
        .set_style_processor(StubStyles(StyleOutput::default()))
        .run(&ctx, "<App")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Unexpected token\nat {}", ctx.resource_path().display())
    );
}

#[test]
fn loader_options_from_host_config() {
    let options: LoaderOptions = serde_json::from_value(json!({
        "entryPath": "src/app",
        "outputPath": "/p/dist",
        "platform": { "name": "Alibaba MiniApp", "type": "ali", "extension": { "css": ".acss" } },
        "mode": "build",
        "disableCopyNpm": true,
    }))
    .unwrap();
    assert_eq!(options.platform, PlatformDescriptor::ali());
    assert_eq!(options.mode, Mode::Build);
    assert!(options.disable_copy_npm);
    assert!(!options.turn_off_source_map);
}
