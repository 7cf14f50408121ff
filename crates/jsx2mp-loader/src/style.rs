use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use itertools::Itertools;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StyleError {
    #[error("failed to read stylesheet `{}`: {}", .0.display(), .1)]
    Read(PathBuf, String),
}

/// Merged style extracted from the stylesheets an app imports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StyleOutput {
    pub style: String,
    /// Local files referenced by the style (images, fonts).
    pub assets: Vec<PathBuf>,
}

/// Reads and merges the stylesheets referenced by a compiled module.
#[async_trait]
pub trait StyleProcessor: Send + Sync {
    async fn process(
        &self,
        css_files: &[PathBuf],
        source_path: &Path,
    ) -> Result<StyleOutput, StyleError>;
}

#[async_trait]
impl<T: StyleProcessor + ?Sized> StyleProcessor for Box<T> {
    async fn process(
        &self,
        css_files: &[PathBuf],
        source_path: &Path,
    ) -> Result<StyleOutput, StyleError> {
        (**self).process(css_files, source_path).await
    }
}

#[async_trait]
impl<T: StyleProcessor + ?Sized> StyleProcessor for Arc<T> {
    async fn process(
        &self,
        css_files: &[PathBuf],
        source_path: &Path,
    ) -> Result<StyleOutput, StyleError> {
        (**self).process(css_files, source_path).await
    }
}

/// Concatenates stylesheets read from disk, in order.
///
/// Relative stylesheet paths are resolved against the source directory. Every
/// local `url(..)` reference is reported as an asset, resolved against the
/// directory of the stylesheet that contains it.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileStyleProcessor;

impl FileStyleProcessor {
    pub fn new() -> Self {
        Self
    }

    async fn base_dir(source_path: &Path) -> PathBuf {
        match tokio::fs::metadata(source_path).await {
            Ok(meta) if meta.is_dir() => source_path.to_path_buf(),
            _ => source_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl StyleProcessor for FileStyleProcessor {
    async fn process(
        &self,
        css_files: &[PathBuf],
        source_path: &Path,
    ) -> Result<StyleOutput, StyleError> {
        let base = Self::base_dir(source_path).await;
        let mut sheets = Vec::with_capacity(css_files.len());
        let mut assets = Vec::new();

        for file in css_files {
            let path = base.join(file);
            debug!(stylesheet = %path.display(), "reading stylesheet");
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| StyleError::Read(path.clone(), e.to_string()))?;

            let dir = path.parent().unwrap_or(&base);
            assets.extend(asset_urls(&text).map(|url| dir.join(url)));
            sheets.push(text);
        }

        Ok(StyleOutput {
            style: sheets.join("\n"),
            assets: assets.into_iter().unique().collect(),
        })
    }
}

/// Local `url(..)` references of a stylesheet.
fn asset_urls(css: &str) -> impl Iterator<Item = &str> {
    css.match_indices("url(").filter_map(move |(idx, _)| {
        let rest = &css[idx + 4..];
        let end = rest.find(')')?;
        let url = rest[..end].trim().trim_matches(['"', '\'']).trim();
        let remote = ["data:", "http:", "https:", "//", "#"]
            .iter()
            .any(|prefix| url.starts_with(prefix));
        (!url.is_empty() && !remote).then_some(url)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use tempfile::TempDir;

    #[test]
    fn local_urls_only() {
        let css = r#".a { background: url("./img/a.png"); }
.b { background: url( 'b.png' ) }
.c { background: url(https://cdn.example.com/c.png) }
.d { background: url(data:image/png;base64,AAAA) }
.e { mask: url(#shape) }"#;
        assert_eq!(asset_urls(css).collect_vec(), ["./img/a.png", "b.png"]);
    }

    #[tokio::test]
    async fn merges_files_in_order() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join("styles")).unwrap();
        std::fs::write(src.join("app.css"), ".app { background: url(./bg.png); }").unwrap();
        std::fs::write(
            src.join("styles/theme.css"),
            ".theme { background: url(../bg.png); }",
        )
        .unwrap();

        let output = FileStyleProcessor::new()
            .process(
                &[PathBuf::from("app.css"), PathBuf::from("styles/theme.css")],
                &src.join("app"),
            )
            .await
            .unwrap();

        assert_eq!(
            output.style,
            ".app { background: url(./bg.png); }\n.theme { background: url(../bg.png); }"
        );
        assert_eq!(
            output.assets,
            vec![src.join("./bg.png"), src.join("styles/../bg.png")]
        );
    }

    #[tokio::test]
    async fn no_files_no_style() {
        let output = FileStyleProcessor::new()
            .process(&[], Path::new("/nowhere/app"))
            .await
            .unwrap();
        assert_eq!(output, StyleOutput::default());
    }

    #[tokio::test]
    async fn missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FileStyleProcessor::new()
            .process(&[PathBuf::from("missing.css")], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, StyleError::Read(path, _) if path == dir.path().join("missing.css")));
    }
}
