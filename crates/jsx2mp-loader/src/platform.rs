use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Baseline rules that every emitted app stylesheet starts with.
///
/// Components compiled to mini-program templates rely on these classes being
/// present even when the app declares no style of its own.
pub const DEFAULT_STYLE: &str = r#".__rax-view {
  border: 0 solid black;
  display: flex;
  flex-direction: column;
  align-content: flex-start;
  flex-shrink: 0;
  box-sizing: border-box;
}
"#;

/// File extensions used by a target platform for its emitted artifacts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    /// Stylesheet extension, including the leading dot (e.g. `.acss`).
    pub css: String,
}

/// Identifies a compilation target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    /// Human-readable name, used in diagnostics.
    pub name: String,
    /// Short platform identifier (e.g. `ali`, `wechat`).
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub extension: Extension,
}

impl PlatformDescriptor {
    pub fn new(name: impl Into<String>, css_extension: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            extension: Extension {
                css: css_extension.into(),
            },
        }
    }

    fn known(kind: &str, name: &str, css: &str) -> Self {
        Self {
            kind: Some(kind.to_string()),
            ..Self::new(name, css)
        }
    }

    pub fn ali() -> Self {
        Self::known("ali", "Alibaba MiniApp", ".acss")
    }

    pub fn wechat() -> Self {
        Self::known("wechat", "WeChat MiniProgram", ".wxss")
    }

    pub fn bytedance() -> Self {
        Self::known("bytedance", "ByteDance MicroApp", ".ttss")
    }

    pub fn baidu() -> Self {
        Self::known("baidu", "Baidu SmartProgram", ".css")
    }

    pub fn quickapp() -> Self {
        Self::known("quickapp", "QuickApp", ".css")
    }

    /// Looks up one of the built-in platforms by its short identifier.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "ali" => Some(Self::ali()),
            "wechat" => Some(Self::wechat()),
            "bytedance" => Some(Self::bytedance()),
            "baidu" => Some(Self::baidu()),
            "quickapp" => Some(Self::quickapp()),
            _ => None,
        }
    }

    /// The stylesheet artifact name for a given file stem, e.g. `app.acss`.
    pub fn css_file_name(&self, stem: &str) -> String {
        format!("{stem}{}", self.extension.css)
    }
}

impl Display for PlatformDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Concatenates the default stylesheet with the extracted app style, if any.
///
/// The result always starts with [`DEFAULT_STYLE`].
pub fn merge_style(style: Option<&str>) -> String {
    match style {
        Some(style) if !style.is_empty() => format!("{DEFAULT_STYLE}{style}"),
        _ => DEFAULT_STYLE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_style_keeps_default() {
        assert_eq!(merge_style(None), DEFAULT_STYLE);
        assert_eq!(merge_style(Some("")), DEFAULT_STYLE);

        let merged = merge_style(Some(".a { color: red; }"));
        assert!(merged.starts_with(DEFAULT_STYLE));
        assert!(merged.ends_with(".a { color: red; }"));
    }

    #[test]
    fn known_platforms() {
        let ali = PlatformDescriptor::from_type("ali").unwrap();
        assert_eq!(ali.css_file_name("app"), "app.acss");
        assert_eq!(
            PlatformDescriptor::from_type("wechat").unwrap().extension.css,
            ".wxss"
        );
        assert!(PlatformDescriptor::from_type("symbian").is_none());
    }

    #[test]
    fn deserialize_host_record() {
        let platform: PlatformDescriptor = serde_json::from_str(
            r#"{ "name": "Alibaba MiniApp", "type": "ali", "extension": { "css": ".acss", "xml": ".axml" } }"#,
        )
        .unwrap();
        assert_eq!(platform, PlatformDescriptor::ali());
        assert_eq!(platform.to_string(), "Alibaba MiniApp");
    }
}
