use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use tracing::debug;

use crate::{BaseOptions, CommandCompiler, Compiler};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("cannot find package `{}` from `{}`", .0, .1.display())]
    PackageNotFound(String, PathBuf),
    #[error("invalid package manifest `{}`: {}", .0.display(), .1)]
    InvalidManifest(PathBuf, String),
    #[error("package `{0}` does not declare an executable")]
    NoExecutable(String),
}

/// A compiler selected by a [`CompilerResolver`], with its default options.
#[derive(Clone)]
pub struct Implementation {
    pub compiler: Arc<dyn Compiler>,
    pub base_options: BaseOptions,
    /// Version of the selected package, when known.
    pub version: Option<String>,
}

impl Implementation {
    pub fn new(compiler: impl Compiler + 'static) -> Self {
        Self {
            compiler: Arc::new(compiler),
            base_options: BaseOptions::default(),
            version: None,
        }
    }

    pub fn with_base_options(mut self, base_options: BaseOptions) -> Self {
        self.base_options = base_options;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Picks the compiler implementation to use among possibly duplicated
/// installations of a package.
pub trait CompilerResolver: Send + Sync {
    /// Returns the applicable implementation of `name` with the highest priority,
    /// searching from `root_dir`.
    fn resolve(&self, name: &str, root_dir: &Path) -> Result<Implementation, ResolveError>;
}

impl<T: CompilerResolver + ?Sized> CompilerResolver for Box<T> {
    fn resolve(&self, name: &str, root_dir: &Path) -> Result<Implementation, ResolveError> {
        (**self).resolve(name, root_dir)
    }
}

impl<T: CompilerResolver + ?Sized> CompilerResolver for Arc<T> {
    fn resolve(&self, name: &str, root_dir: &Path) -> Result<Implementation, ResolveError> {
        (**self).resolve(name, root_dir)
    }
}

struct Candidate {
    priority: u32,
    scope: Option<PathBuf>,
    implementation: Implementation,
}

/// An in-memory registry of compiler implementations.
///
/// Each implementation is registered under a package name with a priority and,
/// optionally, a scope directory: a scoped implementation only applies to root
/// directories inside its scope. Ties are broken by registration order.
#[derive(Default)]
pub struct RegistryResolver {
    packages: HashMap<String, Vec<Candidate>>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, name: &str, priority: u32, implementation: Implementation) {
        self.push(name, priority, None, implementation);
    }

    pub fn register_scoped(
        &mut self,
        name: &str,
        priority: u32,
        scope: impl Into<PathBuf>,
        implementation: Implementation,
    ) {
        self.push(name, priority, Some(scope.into()), implementation);
    }

    fn push(
        &mut self,
        name: &str,
        priority: u32,
        scope: Option<PathBuf>,
        implementation: Implementation,
    ) {
        self.packages
            .entry(name.to_string())
            .or_default()
            .push(Candidate {
                priority,
                scope,
                implementation,
            });
    }
}

impl CompilerResolver for RegistryResolver {
    fn resolve(&self, name: &str, root_dir: &Path) -> Result<Implementation, ResolveError> {
        self.packages
            .get(name)
            .into_iter()
            .flatten()
            .filter(|candidate| {
                candidate
                    .scope
                    .as_ref()
                    .map_or(true, |scope| root_dir.starts_with(scope))
            })
            .rev()
            .max_by_key(|candidate| candidate.priority)
            .map(|candidate| candidate.implementation.clone())
            .ok_or_else(|| ResolveError::PackageNotFound(name.to_string(), root_dir.to_path_buf()))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum Bin {
    Single(String),
    Named(BTreeMap<String, String>),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    bin: Option<Bin>,
    #[serde(default)]
    base_options: BaseOptions,
}

impl Manifest {
    fn read(dir: &Path) -> Result<Self, ResolveError> {
        let path = dir.join("package.json");
        let text = fs::read_to_string(&path)
            .map_err(|e| ResolveError::InvalidManifest(path.clone(), e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ResolveError::InvalidManifest(path, e.to_string()))
    }

    fn executable(&self) -> Option<&str> {
        match self.bin.as_ref()? {
            Bin::Single(bin) => Some(bin.as_str()),
            Bin::Named(bins) => bins
                .get(&self.name)
                .or_else(|| bins.values().next())
                .map(String::as_str),
        }
    }
}

/// Semantic version, ordered by precedence. Build metadata is ignored.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    /// `true` for releases, which take precedence over pre-releases.
    release: bool,
}

impl Version {
    fn parse(version: &str) -> Option<Self> {
        let version = version.trim().trim_start_matches('v');
        let version = version.split('+').next()?;
        let (core, pre) = match version.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (version, None),
        };
        let mut parts = core.split('.').map(|n| n.parse::<u64>().ok());
        let major = parts.next()??;
        let minor = parts.next()??;
        let patch = parts.next()??;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            major,
            minor,
            patch,
            release: pre.is_none(),
        })
    }
}

/// Resolves a compiler package installed in `node_modules`.
///
/// Looks at `<root>/node_modules/<name>` and at the copies nested one level
/// deeper in `<root>/node_modules/*/node_modules/<name>`, then keeps the
/// installation with the highest version. The top-level installation wins on
/// equal versions. The selected package runs through a [`CommandCompiler`]
/// pointing at its `bin` entry.
#[derive(Clone, Debug, Default)]
pub struct PackageResolver;

impl PackageResolver {
    pub fn new() -> Self {
        Self
    }

    fn candidate_dirs(name: &str, root_dir: &Path) -> Vec<PathBuf> {
        let node_modules = root_dir.join("node_modules");
        let mut dirs = vec![node_modules.join(name)];

        let Ok(entries) = fs::read_dir(&node_modules) else {
            return dirs;
        };
        let mut nested = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .flat_map(|path| {
                if path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with('@'))
                {
                    fs::read_dir(&path)
                        .into_iter()
                        .flatten()
                        .filter_map(|entry| entry.ok())
                        .map(|entry| entry.path())
                        .collect()
                } else {
                    vec![path]
                }
            })
            .map(|path| path.join("node_modules").join(name))
            .collect::<Vec<_>>();
        nested.sort();
        dirs.extend(nested);
        dirs
    }
}

impl CompilerResolver for PackageResolver {
    fn resolve(&self, name: &str, root_dir: &Path) -> Result<Implementation, ResolveError> {
        let mut best: Option<(Option<Version>, PathBuf, Manifest)> = None;

        for dir in Self::candidate_dirs(name, root_dir) {
            if !dir.join("package.json").is_file() {
                continue;
            }
            let manifest = Manifest::read(&dir)?;
            let version = Version::parse(&manifest.version);
            debug!(package = name, version = %manifest.version, dir = %dir.display(), "found compiler candidate");

            let better = match &best {
                None => true,
                Some((best_version, _, _)) => version.cmp(best_version) == Ordering::Greater,
            };
            if better {
                best = Some((version, dir, manifest));
            }
        }

        let (_, dir, manifest) =
            best.ok_or_else(|| ResolveError::PackageNotFound(name.to_string(), root_dir.to_path_buf()))?;
        let bin = manifest
            .executable()
            .ok_or_else(|| ResolveError::NoExecutable(manifest.name.clone()))?;

        Ok(Implementation {
            compiler: Arc::new(CommandCompiler::new(dir.join(bin))),
            base_options: manifest.base_options.clone(),
            version: Some(manifest.version.clone()),
        })
    }
}
