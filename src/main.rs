//! The command-line interface of the jsx2mp app loader.

use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use jsx2mp_loader::{
    eliminate_dead_code, AppLoader, LoaderConfig, LoaderContext, LoaderOptions, Mode,
    PackageResolver, PlatformDescriptor, COMPILER_PACKAGE,
};
use tracing::{debug, error, level_filters::LevelFilter};
use tracing_subscriber::{
    filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

#[derive(Parser)]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    /// main command
    #[command(subcommand)]
    command: Command,
    /// log every pipeline step
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// compile the root module of an app, print the generated module to stdout
    App(AppArgs),
    /// eliminate dead code from a source file and print the result to stdout
    Dce(DceArgs),
}

#[derive(Args)]
struct AppArgs {
    /// app root module
    input: PathBuf,
    /// project root, where the compiler package is looked up
    #[arg(long, default_value = ".")]
    root: PathBuf,
    /// loader options as a JSON file; replaces the individual option flags
    #[arg(long, conflicts_with_all = ["entry", "output", "platform", "mode"])]
    config: Option<PathBuf>,
    /// app entry, relative to the project root
    #[arg(long, default_value = "src/app")]
    entry: PathBuf,
    /// output directory
    #[arg(long, default_value = "dist")]
    output: PathBuf,
    /// target platform
    #[arg(long, default_value = "ali")]
    platform: String,
    #[arg(long, value_enum, default_value_t = ModeArg::Watch)]
    mode: ModeArg,
    /// compiler package name
    #[arg(long, default_value = COMPILER_PACKAGE)]
    compiler: String,
    /// report compiler errors as raised (also enabled by `DEBUG=true`)
    #[arg(long)]
    debug: bool,
}

#[derive(Args)]
struct DceArgs {
    /// source file
    input: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Build,
    Watch,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Build => Mode::Build,
            ModeArg::Watch => Mode::Watch,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Loader(#[from] jsx2mp_loader::Error),
    #[error("invalid loader config `{}`: {}", .0.display(), .1)]
    Config(PathBuf, String),
    #[error("unknown platform `{0}`")]
    UnknownPlatform(String),
    #[error("failed to read `{}`: {}", .0.display(), .1)]
    Read(PathBuf, std::io::Error),
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let targets = Targets::new()
        .with_default(LevelFilter::WARN)
        .with_target("jsx2mp", level)
        .with_target("jsx2mp_loader", level);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(targets);
    tracing_subscriber::registry().with(stderr_layer).init();
}

/// Debug mode is only switched on by the exact value `true`.
fn debug_requested(flag: bool, env: Option<&str>) -> bool {
    flag || env == Some("true")
}

fn read_options(args: &AppArgs, root: &Path) -> Result<LoaderOptions, CliError> {
    if let Some(config) = &args.config {
        let text =
            fs::read_to_string(config).map_err(|e| CliError::Read(config.clone(), e))?;
        let mut options: LoaderOptions = serde_json::from_str(&text)
            .map_err(|e| CliError::Config(config.clone(), e.to_string()))?;
        options.output_path = root.join(&options.output_path);
        return Ok(options);
    }

    let platform = PlatformDescriptor::from_type(&args.platform)
        .ok_or_else(|| CliError::UnknownPlatform(args.platform.clone()))?;
    Ok(LoaderOptions {
        entry_path: args.entry.clone(),
        output_path: root.join(&args.output),
        platform,
        mode: args.mode.into(),
        disable_copy_npm: false,
        turn_off_source_map: false,
    })
}

async fn run_app(args: &AppArgs) -> Result<String, CliError> {
    let root = std::path::absolute(&args.root).map_err(|e| CliError::Read(args.root.clone(), e))?;
    let resource =
        std::path::absolute(&args.input).map_err(|e| CliError::Read(args.input.clone(), e))?;
    let options = read_options(args, &root)?;
    debug!(platform = %options.platform, mode = %options.mode, "loading app");

    let loader = AppLoader::new(PackageResolver::new()).set_config(LoaderConfig {
        debug: debug_requested(args.debug, std::env::var("DEBUG").ok().as_deref()),
        compiler_package: args.compiler.clone(),
    });
    let ctx = LoaderContext::new(resource, root, options);
    Ok(loader.run_file(&ctx).await?)
}

fn run_dce(args: &DceArgs) -> Result<String, CliError> {
    let source =
        fs::read_to_string(&args.input).map_err(|e| CliError::Read(args.input.clone(), e))?;
    Ok(eliminate_dead_code(&source))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let res = match &cli.command {
        Command::App(args) => run_app(args).await,
        Command::Dce(args) => run_dce(args),
    };

    match res {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn options_from_flags() {
        let cli = Cli::parse_from(["jsx2mp", "app", "src/app.js", "--platform", "wechat"]);
        let Command::App(args) = cli.command else {
            panic!("expected the app command");
        };
        let options = read_options(&args, Path::new("/p")).unwrap();
        assert_eq!(options.platform, PlatformDescriptor::wechat());
        assert_eq!(options.output_path, PathBuf::from("/p/dist"));
        assert_eq!(options.entry_path, PathBuf::from("src/app"));
        assert_eq!(options.mode, Mode::Watch);
    }

    #[test]
    fn debug_environment_value() {
        assert!(debug_requested(false, Some("true")));
        assert!(debug_requested(true, None));
        assert!(!debug_requested(false, Some("1")));
        assert!(!debug_requested(false, Some("TRUE")));
        assert!(!debug_requested(false, Some("")));
        assert!(!debug_requested(false, None));
    }

    #[test]
    fn unknown_platform() {
        let cli = Cli::parse_from(["jsx2mp", "app", "src/app.js", "--platform", "web"]);
        let Command::App(args) = cli.command else {
            panic!("expected the app command");
        };
        assert!(matches!(
            read_options(&args, Path::new("/p")),
            Err(CliError::UnknownPlatform(p)) if p == "web"
        ));
    }
}
