use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::JudgeError;

/// Private scratch directory for one judging run
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub async fn create(root: &Path) -> Result<Self, JudgeError> {
        let path = root.join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(JudgeError::Workspace)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(JudgeError::Workspace)?;
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write_file(&self, name: &str, contents: &str) -> Result<PathBuf, JudgeError> {
        let file = self.path.join(name);
        tokio::fs::write(&file, contents)
            .await
            .map_err(JudgeError::Workspace)?;
        Ok(file)
    }

    pub async fn remove(self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.path).await {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove workspace");
        }
    }
}
