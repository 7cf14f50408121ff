mod compiler;
mod dce;
mod error;
mod loader;
mod options;
mod output;
mod platform;
mod resolve;
mod style;

pub use compiler::{CommandCompiler, CompileError, Compiler, Position, TransformResult};

pub use dce::{eliminate_dead_code, DeadCodeEliminator, Eliminator};

pub use error::{failure_banner, Error};

pub use loader::{
    create_import_statement, double_backslash, generate_dependencies, is_typescript_file,
    AppLoader, LoaderConfig, LoaderContext, COMPILER_PACKAGE,
};

pub use options::{ArtifactKind, BaseOptions, CompilerOptions, LoaderOptions, Mode, RunOptions};

pub use output::{
    FsOutputWriter, OutputArtifacts, OutputError, OutputOptions, OutputPaths, OutputWriter,
};

pub use platform::{merge_style, Extension, PlatformDescriptor, DEFAULT_STYLE};

pub use resolve::{
    CompilerResolver, Implementation, PackageResolver, RegistryResolver, ResolveError,
};

pub use style::{FileStyleProcessor, StyleError, StyleOutput, StyleProcessor};

pub use sourcemap::SourceMap;
