use std::path::PathBuf;

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::PlatformDescriptor;

/// Build mode requested by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Production build: no source maps, compacted stylesheets.
    #[display("build")]
    Build,
    /// Incremental development build: source maps are inlined.
    #[default]
    #[display("watch")]
    Watch,
}

/// Configuration record supplied by the host build tool for one loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderOptions {
    /// Path of the app entry, relative to the project root.
    pub entry_path: PathBuf,
    /// Directory receiving the emitted artifacts.
    pub output_path: PathBuf,
    pub platform: PlatformDescriptor,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub disable_copy_npm: bool,
    #[serde(default)]
    pub turn_off_source_map: bool,
}

/// Kind of artifact the compiler is asked to produce. The app loader only
/// ever builds the app entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    #[display("app")]
    App,
}

/// Default options shipped by a compiler implementation.
///
/// This is an open record: keys unknown to the loader are forwarded to the
/// compiler untouched.
#[derive(Clone, Debug, Default, PartialEq, Deref, From, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseOptions(Map<String, Value>);

impl BaseOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

/// The fields a single loader run imposes on the compiler, regardless of its
/// base options.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOptions {
    pub resource_path: PathBuf,
    pub output_path: PathBuf,
    pub source_path: PathBuf,
    pub platform: PlatformDescriptor,
    pub disable_copy_npm: bool,
    pub turn_off_source_map: bool,
}

/// Options handed to [`crate::Compiler::transform`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerOptions {
    pub resource_path: PathBuf,
    pub output_path: PathBuf,
    pub source_path: PathBuf,
    pub platform: PlatformDescriptor,
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    /// Canonical file name reported in diagnostics and source maps.
    pub source_file_name: PathBuf,
    pub disable_copy_npm: bool,
    pub turn_off_source_map: bool,
    /// Base options that no run-specific field overrides.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CompilerOptions {
    /// Wire names of the run-specific fields. A base option with one of these
    /// keys is always shadowed.
    pub const RUN_KEYS: [&'static str; 8] = [
        "resourcePath",
        "outputPath",
        "sourcePath",
        "platform",
        "type",
        "sourceFileName",
        "disableCopyNpm",
        "turnOffSourceMap",
    ];

    /// Merges compiler defaults with the run-specific fields of an app build.
    pub fn merge(base: &BaseOptions, run: RunOptions) -> Self {
        let mut extra = base.0.clone();
        for key in Self::RUN_KEYS {
            extra.remove(key);
        }

        Self {
            source_file_name: run.resource_path.clone(),
            resource_path: run.resource_path,
            output_path: run.output_path,
            source_path: run.source_path,
            platform: run.platform,
            kind: ArtifactKind::App,
            disable_copy_npm: run.disable_copy_npm,
            turn_off_source_map: run.turn_off_source_map,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run() -> RunOptions {
        RunOptions {
            resource_path: PathBuf::from("/proj/src/app.js"),
            output_path: PathBuf::from("/proj/dist"),
            source_path: PathBuf::from("/proj/src"),
            platform: PlatformDescriptor::ali(),
            disable_copy_npm: true,
            turn_off_source_map: false,
        }
    }

    #[test]
    fn run_fields_win() {
        let base = BaseOptions::new()
            .with("type", "component")
            .with("outputPath", "/elsewhere")
            .with("turnOffSourceMap", true)
            .with("constantDir", json!(["src/constants"]));

        let options = CompilerOptions::merge(&base, run());
        assert_eq!(options.kind, ArtifactKind::App);
        assert_eq!(options.output_path, PathBuf::from("/proj/dist"));
        assert!(!options.turn_off_source_map);
        assert_eq!(options.source_file_name, options.resource_path);
        assert_eq!(options.extra.len(), 1);
        assert_eq!(options.extra["constantDir"], json!(["src/constants"]));
    }

    #[test]
    fn serialized_options_have_no_duplicate_keys() {
        let base = BaseOptions::new().with("platform", "wechat").with("x", 1);
        let value = serde_json::to_value(CompilerOptions::merge(&base, run())).unwrap();
        assert_eq!(value["type"], "app");
        assert_eq!(value["platform"]["type"], "ali");
        assert_eq!(value["disableCopyNpm"], true);
        assert_eq!(value["x"], 1);
        assert!(serde_json::from_value::<ArtifactKind>(json!("page")).is_err());
    }

    #[test]
    fn loader_options_defaults() {
        let options: LoaderOptions = serde_json::from_value(json!({
            "entryPath": "src/app",
            "outputPath": "dist",
            "platform": { "name": "WeChat MiniProgram", "extension": { "css": ".wxss" } },
        }))
        .unwrap();
        assert_eq!(options.mode, Mode::Watch);
        assert!(!options.disable_copy_npm);
        assert!(!options.turn_off_source_map);

        let mode: Mode = serde_json::from_value(json!("build")).unwrap();
        assert_eq!(mode, Mode::Build);
        assert_eq!(mode.to_string(), "build");
    }
}
