//! Backend options and the `basalt.toml` project file.
//!
//! ```toml
//! input = "idl/geometry.idl"
//!
//! [[target]]
//! language = "python"
//! output-dir = "gen/py"
//! package = "geometry"
//! file-naming = "snake"
//! emit-server = true
//! ```

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::{
    generators::{CodeGenerator, create_generator},
    naming,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid project file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("the project file declares no [[target]] sections")]
    NoTargets,

    #[error("unknown target language '{0}' (expected 'python' or 'rust')")]
    UnknownLanguage(String),

    #[error("unknown file naming '{0}' (expected 'snake', 'lower' or 'pascal')")]
    UnknownFileNaming(String),
}

/// How generated module files are named after their namespace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileNaming {
    /// `acme.Geometry` -> `acme_geometry`
    #[default]
    Snake,
    /// `acme.Geometry` -> `acmegeometry`
    Lower,
    /// `acme.Geometry` -> `AcmeGeometry`
    Pascal,
}

impl FileNaming {
    pub fn apply(&self, name: &str) -> String {
        match self {
            FileNaming::Snake => naming::to_snake_case(name),
            FileNaming::Lower => naming::to_flat_lowercase(name),
            FileNaming::Pascal => naming::to_pascal_case(name),
        }
    }
}

impl FromStr for FileNaming {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snake" => Ok(FileNaming::Snake),
            "lower" => Ok(FileNaming::Lower),
            "pascal" => Ok(FileNaming::Pascal),
            other => Err(ConfigError::UnknownFileNaming(other.to_string())),
        }
    }
}

impl fmt::Display for FileNaming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileNaming::Snake => write!(f, "snake"),
            FileNaming::Lower => write!(f, "lower"),
            FileNaming::Pascal => write!(f, "pascal"),
        }
    }
}

/// Settings shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// Directory the generated files are written under.
    pub output_dir: PathBuf,
    /// Name of the generated package; the root namespace when unset.
    pub package: Option<String>,
    pub file_naming: FileNaming,
    /// Whether server skeletons are generated.
    pub emit_server: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            output_dir: PathBuf::from("."),
            package: None,
            file_naming: FileNaming::default(),
            emit_server: true,
        }
    }
}

impl GeneratorOptions {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        GeneratorOptions {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn with_file_naming(mut self, file_naming: FileNaming) -> Self {
        self.file_naming = file_naming;
        self
    }

    pub fn with_emit_server(mut self, emit_server: bool) -> Self {
        self.emit_server = emit_server;
        self
    }
}

/// The languages bindings can be generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Rust,
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "python" | "py" => Ok(Language::Python),
            "rust" | "rs" => Ok(Language::Rust),
            _ => Err(ConfigError::UnknownLanguage(s.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Rust => write!(f, "rust"),
        }
    }
}

fn default_emit_server() -> bool {
    true
}

/// One `[[target]]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TargetConfig {
    pub language: Language,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub file_naming: FileNaming,
    #[serde(default = "default_emit_server")]
    pub emit_server: bool,
}

impl TargetConfig {
    pub fn options(&self) -> GeneratorOptions {
        GeneratorOptions {
            output_dir: self.output_dir.clone(),
            package: self.package.clone(),
            file_naming: self.file_naming,
            emit_server: self.emit_server,
        }
    }

    pub fn build_generator(&self) -> Box<dyn CodeGenerator> {
        create_generator(self.language, self.options())
    }
}

/// A parsed `basalt.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// The root IDL document.
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(rename = "target", default)]
    pub targets: Vec<TargetConfig>,
}

impl ProjectConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: ProjectConfig = toml::from_str(text)?;
        if config.targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(config)
    }

    /// Reads a project file. Relative paths in it are taken relative to the
    /// directory the file is in.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;

        let base = path.parent().unwrap_or(Path::new(""));
        config.input = config.input.map(|input| base.join(input));
        for target in &mut config.targets {
            target.output_dir = base.join(&target.output_dir);
        }
        Ok(config)
    }

    pub fn generators(&self) -> Vec<Box<dyn CodeGenerator>> {
        self.targets.iter().map(TargetConfig::build_generator).collect()
    }
}
