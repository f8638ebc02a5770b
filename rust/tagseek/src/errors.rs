use std::fmt::Display;
use std::path::PathBuf;

/// Problems with the search configuration or the catalog it describes.
///
/// These are fatal: they are reported once and no search is performed.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    CatalogOverflow {
        max_types: usize,
    },
    DecorationOverflow {
        max_decorations: usize,
    },
    InvalidTolerance {
        field: &'static str,
        value: f64,
    },
    InvalidValue {
        field: &'static str,
        context: String,
    },
    UnknownMandatoryModification {
        name: String,
    },
    InvalidModification {
        name: String,
        context: String,
    },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CatalogOverflow { max_types } => {
                write!(f, "Too many modification types (max {})", max_types)
            }
            Self::DecorationOverflow { max_decorations } => write!(
                f,
                "Modification budget produces more than {} decorations",
                max_decorations
            ),
            Self::InvalidTolerance { field, value } => {
                write!(f, "Invalid tolerance for {}: {}", field, value)
            }
            Self::InvalidValue { field, context } => {
                write!(f, "Invalid value for {}: {}", field, context)
            }
            Self::UnknownMandatoryModification { name } => {
                write!(f, "Mandatory modification '{}' is not in the catalog", name)
            }
            Self::InvalidModification { name, context } => {
                write!(f, "Invalid modification '{}': {}", name, context)
            }
        }
    }
}

/// Errors that abort the database scan for the current block.
#[derive(Debug)]
pub enum ScanError {
    BufferOutOfBounds {
        index: usize,
        len: usize,
        context: &'static str,
    },
    Read {
        source: std::io::Error,
    },
}

impl Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BufferOutOfBounds {
                index,
                len,
                context,
            } => write!(
                f,
                "Database buffer index {} out of bounds (len {}): {}",
                index, len, context
            ),
            Self::Read { source } => write!(f, "Error reading database: {}", source),
        }
    }
}

#[derive(Debug)]
pub enum CatalogError {
    MalformedRecord { record: usize, context: String },
    NameTooLong { name: String, max: usize },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
pub enum TagSeekError {
    Config(ConfigError),
    Catalog(CatalogError),
    Scan(ScanError),
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
    ParseError {
        msg: String,
    },
}

impl Display for TagSeekError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Catalog(e) => write!(f, "Catalog error: {}", e),
            Self::Scan(e) => write!(f, "Scan error: {}", e),
            Self::Io { source, path } => match path {
                Some(path) => write!(f, "Error reading file {}: {}", path.display(), source),
                None => write!(f, "I/O error: {}", source),
            },
            Self::ParseError { msg } => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for TagSeekError {}

pub type Result<T> = std::result::Result<T, TagSeekError>;

impl TagSeekError {
    pub fn io_at(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}

impl From<ConfigError> for TagSeekError {
    fn from(x: ConfigError) -> Self {
        Self::Config(x)
    }
}

impl From<CatalogError> for TagSeekError {
    fn from(x: CatalogError) -> Self {
        Self::Catalog(x)
    }
}

impl From<ScanError> for TagSeekError {
    fn from(x: ScanError) -> Self {
        Self::Scan(x)
    }
}

impl From<std::io::Error> for TagSeekError {
    fn from(x: std::io::Error) -> Self {
        Self::Io {
            source: x,
            path: None,
        }
    }
}

impl From<serde_json::Error> for TagSeekError {
    fn from(val: serde_json::Error) -> Self {
        TagSeekError::ParseError {
            msg: val.to_string(),
        }
    }
}

impl From<std::io::Error> for ScanError {
    fn from(source: std::io::Error) -> Self {
        ScanError::Read { source }
    }
}
