use std::{
    fs,
    path::{Path, PathBuf},
};

use base64::Engine;
use sourcemap::SourceMap;
use tracing::debug;

use crate::{Mode, DEFAULT_STYLE};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("failed to write `{}`: {}", .0.display(), .1)]
    Write(PathBuf, String),
    #[error("failed to encode source map: {0}")]
    SourceMap(String),
}

/// The files produced by one loader run.
#[derive(Clone, Debug)]
pub struct OutputArtifacts {
    pub code: String,
    pub map: Option<SourceMap>,
    /// Never empty: starts with the platform default stylesheet.
    pub css: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputPaths {
    pub code: PathBuf,
    pub css: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputOptions {
    pub output_path: OutputPaths,
    pub mode: Mode,
    /// The original resource is a TypeScript module.
    pub is_typescript: bool,
}

/// Persists loader artifacts.
pub trait OutputWriter: Send + Sync {
    fn write(
        &self,
        artifacts: OutputArtifacts,
        raw: &str,
        options: &OutputOptions,
    ) -> Result<(), OutputError>;
}

impl<T: OutputWriter + ?Sized> OutputWriter for Box<T> {
    fn write(
        &self,
        artifacts: OutputArtifacts,
        raw: &str,
        options: &OutputOptions,
    ) -> Result<(), OutputError> {
        (**self).write(artifacts, raw, options)
    }
}

/// Writes artifacts to the filesystem.
///
/// * `build` mode drops the source map and strips comments and blank lines
///   from the stylesheet. A leading [`DEFAULT_STYLE`] is written as is.
/// * `watch` mode inlines the source map at the end of the code, with the raw
///   original source embedded as its content.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsOutputWriter;

impl FsOutputWriter {
    pub fn new() -> Self {
        Self
    }

    fn write_file(path: &Path, contents: &str) -> Result<(), OutputError> {
        let err = |e: std::io::Error| OutputError::Write(path.to_path_buf(), e.to_string());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(err)?;
        }
        debug!(path = %path.display(), bytes = contents.len(), "writing artifact");
        fs::write(path, contents).map_err(err)
    }
}

impl OutputWriter for FsOutputWriter {
    fn write(
        &self,
        artifacts: OutputArtifacts,
        raw: &str,
        options: &OutputOptions,
    ) -> Result<(), OutputError> {
        let OutputArtifacts { mut code, map, css } = artifacts;

        let css = match options.mode {
            Mode::Build => match css.strip_prefix(DEFAULT_STYLE) {
                Some(style) => format!("{DEFAULT_STYLE}{}", compact_css(style)),
                None => compact_css(&css),
            },
            Mode::Watch => css,
        };

        if let (Mode::Watch, Some(mut map)) = (options.mode, map) {
            embed_sources(&mut map, raw, options.is_typescript);
            code.push_str(&inline_source_map(&map)?);
        }

        Self::write_file(&options.output_path.code, &code)?;
        Self::write_file(&options.output_path.css, &css)
    }
}

/// Fills the map's sources content with the raw original source.
///
/// The compiler of a TypeScript resource only ever sees stripped text, so its
/// sources content is always replaced. Otherwise only missing content is filled.
fn embed_sources(map: &mut SourceMap, raw: &str, is_typescript: bool) {
    for idx in 0..map.get_source_count() {
        if is_typescript || map.get_source_contents(idx).is_none() {
            map.set_source_contents(idx, Some(raw));
        }
    }
}

fn inline_source_map(map: &SourceMap) -> Result<String, OutputError> {
    let mut json = Vec::new();
    map.to_writer(&mut json)
        .map_err(|e| OutputError::SourceMap(e.to_string()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
    Ok(format!(
        "\n//# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded}"
    ))
}

/// Strips comments and blank lines from a stylesheet.
fn compact_css(css: &str) -> String {
    let mut stripped = String::with_capacity(css.len());
    let mut rest = css;
    while let Some(start) = rest.find("/*") {
        stripped.push_str(&rest[..start]);
        rest = match rest[start + 2..].find("*/") {
            Some(end) => &rest[start + 2 + end + 2..],
            None => "",
        };
    }
    stripped.push_str(rest);

    stripped
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAP: &[u8] =
        br#"{"version":3,"sources":["app.tsx"],"sourcesContent":["stripped"],"names":[],"mappings":"AAAA"}"#;

    fn options(dir: &Path, mode: Mode, is_typescript: bool) -> OutputOptions {
        OutputOptions {
            output_path: OutputPaths {
                code: dir.join("dist/app.js"),
                css: dir.join("dist/app.acss"),
            },
            mode,
            is_typescript,
        }
    }

    fn decode_inline(code: &str) -> SourceMap {
        let (_, encoded) = code.split_once(";base64,").unwrap();
        let json = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        SourceMap::from_slice(&json).unwrap()
    }

    #[test]
    fn watch_mode_inlines_map() {
        let dir = TempDir::new().unwrap();
        let artifacts = OutputArtifacts {
            code: "App({});".to_string(),
            map: Some(SourceMap::from_slice(MAP).unwrap()),
            css: ".a {}\n".to_string(),
        };
        FsOutputWriter::new()
            .write(artifacts, "raw ts source", &options(dir.path(), Mode::Watch, true))
            .unwrap();

        let code = fs::read_to_string(dir.path().join("dist/app.js")).unwrap();
        assert!(code.starts_with("App({});\n//# sourceMappingURL=data:application/json"));
        let map = decode_inline(&code);
        assert_eq!(map.get_source_contents(0), Some("raw ts source"));
        assert_eq!(
            fs::read_to_string(dir.path().join("dist/app.acss")).unwrap(),
            ".a {}\n"
        );
    }

    #[test]
    fn javascript_keeps_compiler_contents() {
        let mut map = SourceMap::from_slice(MAP).unwrap();
        embed_sources(&mut map, "raw", false);
        assert_eq!(map.get_source_contents(0), Some("stripped"));
        embed_sources(&mut map, "raw", true);
        assert_eq!(map.get_source_contents(0), Some("raw"));
    }

    #[test]
    fn build_mode_drops_map() {
        let dir = TempDir::new().unwrap();
        let artifacts = OutputArtifacts {
            code: "App({});".to_string(),
            map: Some(SourceMap::from_slice(MAP).unwrap()),
            css: "/* base */\n.a {\n  color: red;\n}\n\n".to_string(),
        };
        FsOutputWriter::new()
            .write(artifacts, "", &options(dir.path(), Mode::Build, false))
            .unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("dist/app.js")).unwrap(),
            "App({});"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("dist/app.acss")).unwrap(),
            ".a {\ncolor: red;\n}"
        );
    }

    #[test]
    fn build_mode_keeps_default_style() {
        let dir = TempDir::new().unwrap();
        let artifacts = OutputArtifacts {
            code: String::new(),
            map: None,
            css: format!("{DEFAULT_STYLE}/* app */\n.app {{\n  color: red;\n}}\n"),
        };
        FsOutputWriter::new()
            .write(artifacts, "", &options(dir.path(), Mode::Build, false))
            .unwrap();

        let css = fs::read_to_string(dir.path().join("dist/app.acss")).unwrap();
        assert!(css.starts_with(DEFAULT_STYLE));
        assert_eq!(&css[DEFAULT_STYLE.len()..], ".app {\ncolor: red;\n}");
    }

    #[test]
    fn compact_unterminated_comment() {
        assert_eq!(compact_css(".a {}\n/* open"), ".a {}");
    }
}
