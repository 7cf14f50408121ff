use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use tracing::{debug, error};

use crate::{
    failure_banner, merge_style, CompileError, CompilerOptions, CompilerResolver,
    DeadCodeEliminator, Eliminator, Error, FileStyleProcessor, FsOutputWriter, LoaderOptions,
    OutputArtifacts, OutputOptions, OutputPaths, OutputWriter, RunOptions, StyleOutput,
    StyleProcessor,
};

/// Name of the compiler package looked up by default.
pub const COMPILER_PACKAGE: &str = "jsx-compiler";

/// Stem of the emitted code and stylesheet files.
const APP_STEM: &str = "app";

/// State of one loader invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct LoaderContext {
    resource_path: PathBuf,
    root_context: PathBuf,
    options: LoaderOptions,
}

impl LoaderContext {
    /// `resource_path` is the absolute path of the app module, `root_context`
    /// the project root.
    pub fn new(
        resource_path: impl Into<PathBuf>,
        root_context: impl Into<PathBuf>,
        options: LoaderOptions,
    ) -> Self {
        Self {
            resource_path: resource_path.into(),
            root_context: root_context.into(),
            options,
        }
    }

    pub fn resource_path(&self) -> &Path {
        &self.resource_path
    }

    pub fn root_context(&self) -> &Path {
        &self.root_context
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Absolute path of the app entry.
    pub fn source_path(&self) -> PathBuf {
        self.root_context.join(&self.options.entry_path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Propagate compiler errors untouched instead of sanitized messages.
    pub debug: bool,
    /// Package the compiler implementation is resolved from.
    pub compiler_package: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            debug: false,
            compiler_package: COMPILER_PACKAGE.to_string(),
        }
    }
}

/// Compiles the root module of a mini-program app.
///
/// A run goes through dead code elimination, compilation, style extraction and
/// artifact output, then returns the text of a module that imports every
/// dependency of the compiled app for its side effects.
pub struct AppLoader {
    resolver: Box<dyn CompilerResolver>,
    eliminator: Box<dyn Eliminator>,
    styles: Box<dyn StyleProcessor>,
    writer: Box<dyn OutputWriter>,
    config: LoaderConfig,
}

impl AppLoader {
    /// A loader with the default eliminator, style processor and output writer.
    pub fn new(resolver: impl CompilerResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            eliminator: Box::new(DeadCodeEliminator),
            styles: Box::new(FileStyleProcessor),
            writer: Box::new(FsOutputWriter),
            config: LoaderConfig::default(),
        }
    }

    pub fn set_eliminator(mut self, eliminator: impl Eliminator + 'static) -> Self {
        self.eliminator = Box::new(eliminator);
        self
    }

    pub fn set_style_processor(mut self, styles: impl StyleProcessor + 'static) -> Self {
        self.styles = Box::new(styles);
        self
    }

    pub fn set_output_writer(mut self, writer: impl OutputWriter + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    pub fn set_config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Reads the resource from disk, then [`Self::run`]s it.
    pub async fn run_file(&self, ctx: &LoaderContext) -> Result<String, Error> {
        let raw = tokio::fs::read_to_string(ctx.resource_path())
            .await
            .map_err(|e| Error::ReadSource(ctx.resource_path().to_path_buf(), e))?;
        self.run(ctx, &raw).await
    }

    /// Runs the loader on the raw source of `ctx`'s resource.
    pub async fn run(&self, ctx: &LoaderContext, raw: &str) -> Result<String, Error> {
        let options = ctx.options();

        fs::create_dir_all(&options.output_path)
            .map_err(|e| Error::OutputDir(options.output_path.clone(), e))?;

        let source_path = ctx.source_path();

        let implementation = self
            .resolver
            .resolve(&self.config.compiler_package, ctx.root_context())?;
        debug!(
            package = %self.config.compiler_package,
            version = implementation.version.as_deref().unwrap_or("unknown"),
            "resolved compiler"
        );

        let processed = self.eliminator.eliminate(raw);

        let compiler_options = CompilerOptions::merge(
            &implementation.base_options,
            RunOptions {
                resource_path: ctx.resource_path().to_path_buf(),
                output_path: options.output_path.clone(),
                source_path: source_path.clone(),
                platform: options.platform.clone(),
                disable_copy_npm: options.disable_copy_npm,
                turn_off_source_map: options.turn_off_source_map,
            },
        );

        let mut transformed = implementation
            .compiler
            .transform(&processed, &compiler_options)
            .map_err(|e| self.compile_failure(ctx, &processed, e))?;

        let StyleOutput { style, assets } = self
            .styles
            .process(&transformed.css_files, &source_path)
            .await?;
        transformed.style = (!style.is_empty()).then_some(style);
        transformed.assets = assets;
        debug!(assets = transformed.assets.len(), "processed styles");

        let output_options = OutputOptions {
            output_path: OutputPaths {
                code: options.output_path.join(format!("{APP_STEM}.js")),
                css: options
                    .output_path
                    .join(options.platform.css_file_name(APP_STEM)),
            },
            mode: options.mode,
            is_typescript: is_typescript_file(ctx.resource_path()),
        };
        let artifacts = OutputArtifacts {
            css: merge_style(transformed.style.as_deref()),
            code: transformed.code,
            map: transformed.map,
        };
        self.writer.write(artifacts, raw, &output_options)?;

        Ok(format!(
            "/* Generated by JSX2MP AppLoader, sourceFile: {}. */\n{}",
            ctx.resource_path().display(),
            generate_dependencies(&transformed.imported)
        ))
    }

    /// Logs the failure banner and turns a compiler error into the error
    /// reported to the host.
    fn compile_failure(&self, ctx: &LoaderContext, processed: &str, err: CompileError) -> Error {
        let resource = ctx.resource_path();
        error!("{}", failure_banner(&ctx.options().platform, resource));

        if self.config.debug {
            if let Some(snippet) = err.render_snippet(processed, resource) {
                error!("{snippet}");
            }
            Error::CompileError(err)
        } else if err.loc.is_some() {
            Error::CompileFailed(format!("{}\nat {}", err.message, resource.display()))
        } else {
            Error::CompileFailed(format!(
                "Unknown compile error! please check your code at {}",
                resource.display()
            ))
        }
    }
}

/// Escapes backslashes so that a path stays valid inside a string literal.
pub fn double_backslash(path: &str) -> String {
    path.replace('\\', "\\\\")
}

/// A side-effect import of `req`, e.g. `import './util';`.
pub fn create_import_statement(req: &str) -> String {
    format!("import '{}';", double_backslash(req))
}

/// One import statement per dependency, in the mapping's order.
pub fn generate_dependencies(dependencies: &BTreeMap<String, bool>) -> String {
    dependencies
        .keys()
        .map(|module| create_import_statement(module))
        .format("\n")
        .to_string()
}

pub fn is_typescript_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "ts" || ext == "tsx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_statements() {
        assert_eq!(create_import_statement("./util"), "import './util';");
        assert_eq!(
            create_import_statement(r"C:\app\node_modules\rax"),
            r"import 'C:\\app\\node_modules\\rax';"
        );
    }

    #[test]
    fn dependencies_are_unique_lines() {
        let deps = BTreeMap::from([
            ("./b".to_string(), true),
            ("./a".to_string(), false),
        ]);
        assert_eq!(
            generate_dependencies(&deps),
            "import './a';\nimport './b';"
        );
        assert_eq!(generate_dependencies(&BTreeMap::new()), "");
    }

    #[test]
    fn typescript_detection() {
        assert!(is_typescript_file(Path::new("/p/src/app.ts")));
        assert!(is_typescript_file(Path::new("/p/src/app.tsx")));
        assert!(!is_typescript_file(Path::new("/p/src/app.js")));
        assert!(!is_typescript_file(Path::new("/p/src/app.d")));
        assert!(!is_typescript_file(Path::new("/p/src/ts")));
    }

    #[test]
    fn context_source_path() {
        let ctx = LoaderContext::new(
            "/p/src/app.js",
            "/p",
            LoaderOptions {
                entry_path: "src/app".into(),
                output_path: "/p/dist".into(),
                platform: crate::PlatformDescriptor::ali(),
                mode: crate::Mode::Watch,
                disable_copy_npm: false,
                turn_off_source_map: false,
            },
        );
        assert_eq!(ctx.source_path(), PathBuf::from("/p/src/app"));
    }
}
