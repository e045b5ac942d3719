//! Repository context
//!
//! Materializes the structural view a review needs: the file census, the
//! repo-type classification, and the rendered file map that goes into
//! reviewer prompts.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::config::FixConfig;
use crate::domain::RepoType;

/// Directories never worth reviewing
const SKIP_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    "dist",
    "build",
    ".venv",
    "__pycache__",
    "vendor",
];

/// Cap on files listed in the prompt map
const MAX_MAP_ENTRIES: usize = 400;

/// What a review request points at
#[derive(Debug, Clone)]
pub enum ReviewSource {
    /// A checked-out repository directory
    Dir(PathBuf),
    /// An explicit file list (paths relative to a root directory)
    Files { root: PathBuf, files: Vec<String> },
}

impl ReviewSource {
    /// The root directory of the source
    pub fn root(&self) -> &Path {
        match self {
            Self::Dir(dir) => dir,
            Self::Files { root, .. } => root,
        }
    }
}

/// Structural view of the repository under review
#[derive(Debug, Clone)]
pub struct RepoContext {
    /// Root directory
    pub root: PathBuf,

    /// Relative file paths, sorted
    pub files: Vec<String>,

    pub repo_type: RepoType,

    /// Monorepo path prefix restricting the review, when requested
    pub workspace_path: Option<String>,
}

impl RepoContext {
    /// Build the context by walking the source
    pub fn build(source: &ReviewSource, workspace_path: Option<String>, fix_config: &FixConfig) -> std::io::Result<Self> {
        let root = source.root().to_path_buf();
        let mut files = match source {
            ReviewSource::Dir(dir) => walk_files(dir)?,
            ReviewSource::Files { files, .. } => files.clone(),
        };

        if let Some(prefix) = &workspace_path {
            files.retain(|f| f.starts_with(prefix.as_str()));
        }
        files.sort();

        let repo_type = detect_repo_type(&files, fix_config);
        debug!(root = %root.display(), files = files.len(), repo_type = %repo_type, "Built repo context");

        Ok(Self {
            root,
            files,
            repo_type,
            workspace_path,
        })
    }

    /// File listing for reviewer prompts, truncated past the cap
    pub fn file_map(&self) -> String {
        let mut map: String = self
            .files
            .iter()
            .take(MAX_MAP_ENTRIES)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if self.files.len() > MAX_MAP_ENTRIES {
            map.push_str(&format!("\n... and {} more files", self.files.len() - MAX_MAP_ENTRIES));
        }
        map
    }
}

fn walk_files(root: &Path) -> std::io::Result<Vec<String>> {
    let mut files = Vec::new();
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !(entry.file_type().is_dir() && (SKIP_DIRS.contains(&name.as_ref()) || name.starts_with('.')))
    });

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(files)
}

/// Classify by extension census: backend-only, frontend-only, both, or neither
pub fn detect_repo_type(files: &[String], fix_config: &FixConfig) -> RepoType {
    let mut backend = 0usize;
    let mut frontend = 0usize;

    for file in files {
        let Some(ext) = Path::new(file).extension().and_then(|e| e.to_str()) else {
            continue;
        };
        let ext = ext.to_lowercase();
        if fix_config.backend_extensions.iter().any(|e| *e == ext) {
            backend += 1;
        } else if fix_config.frontend_extensions.iter().any(|e| *e == ext) {
            frontend += 1;
        }
    }

    match (backend > 0, frontend > 0) {
        (true, true) => RepoType::Fullstack,
        (true, false) => RepoType::Backend,
        (false, true) => RepoType::Frontend,
        (false, false) => RepoType::Other,
    }
}
