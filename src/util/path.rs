use eyre::{eyre, Error, Result};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(try_from = "PathBuf")]
/// A path that must be absolute and free of `..` components.
/// Use `AbsolutePath::try_from` to construct.
pub struct AbsolutePath(PathBuf);

impl TryFrom<PathBuf> for AbsolutePath {
    type Error = Error;

    fn try_from(path: PathBuf) -> Result<Self> {
        if !path.is_absolute() {
            return Err(eyre!("Path must be absolute: {:?}", path));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(eyre!("Path must not contain '..' components: {:?}", path));
        }
        Ok(Self(path))
    }
}

impl From<AbsolutePath> for PathBuf {
    fn from(p: AbsolutePath) -> PathBuf {
        p.0
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl PartialEq<AbsolutePath> for PathBuf {
    fn eq(&self, other: &AbsolutePath) -> bool {
        *self == *other.0
    }
}
