use std::path::{Path, PathBuf};
use tracing::info;

/// Per-agent file namespace plus a flat shared workspace.
///
/// Every operation reports its outcome as text; missing files and folders
/// produce a not-found outcome instead of an error. Nothing here panics or
/// propagates I/O failures past the boundary.
pub struct Workspace {
    root: PathBuf,
}

const SHARED: &str = "shared";

impl Workspace {
    /// Open (or create) the workspace root and the shared area.
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(SHARED))?;
        Ok(Self { root })
    }

    /// Create the private directory for an agent.
    pub fn add_agent(&self, agent: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(self.root.join(agent))
    }

    /// Reject names that escape the workspace.
    fn safe_join(&self, agent: &str, name: &str) -> Option<PathBuf> {
        if name.is_empty()
            || Path::new(name).is_absolute()
            || name.split(['/', '\\']).any(|part| part == "..")
        {
            return None;
        }
        Some(self.root.join(agent).join(name))
    }

    pub fn create_file(&self, agent: &str, file_name: &str, content: &str) -> String {
        let Some(path) = self.safe_join(agent, file_name) else {
            return format!("Invalid file name: {}", file_name);
        };
        match std::fs::write(&path, content) {
            Ok(()) => {
                info!(agent = %agent, file = %file_name, "created workspace file");
                format!("{} created file: {}", agent, file_name)
            }
            Err(e) => format!("Could not create {}: {}", file_name, e),
        }
    }

    pub fn read_file(&self, agent: &str, file_name: &str) -> Option<String> {
        let path = self.safe_join(agent, file_name)?;
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(_) => {
                info!(agent = %agent, file = %file_name, "file not found in workspace");
                None
            }
        }
    }

    pub fn update_file(&self, agent: &str, file_name: &str, content: &str) -> String {
        let Some(path) = self.safe_join(agent, file_name) else {
            return format!("Invalid file name: {}", file_name);
        };
        if !path.exists() {
            return format!("File not found in {}'s workspace: {}", agent, file_name);
        }
        match std::fs::write(&path, content) {
            Ok(()) => format!("{} updated file: {}", agent, file_name),
            Err(e) => format!("Could not update {}: {}", file_name, e),
        }
    }

    pub fn delete_file(&self, agent: &str, file_name: &str) -> String {
        let Some(path) = self.safe_join(agent, file_name) else {
            return format!("Invalid file name: {}", file_name);
        };
        match std::fs::remove_file(&path) {
            Ok(()) => format!("{} deleted file: {}", agent, file_name),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                format!("File not found in {}'s workspace: {}", agent, file_name)
            }
            Err(e) => format!("Could not delete {}: {}", file_name, e),
        }
    }

    pub fn create_folder(&self, agent: &str, folder_name: &str) -> String {
        let Some(path) = self.safe_join(agent, folder_name) else {
            return format!("Invalid folder name: {}", folder_name);
        };
        match std::fs::create_dir_all(&path) {
            Ok(()) => format!("{} created folder: {}", agent, folder_name),
            Err(e) => format!("Could not create folder {}: {}", folder_name, e),
        }
    }

    /// List the entries of an agent folder; `None` when it does not exist.
    pub fn list_folder(&self, agent: &str, folder_name: &str) -> Option<Vec<String>> {
        let path = self.safe_join(agent, folder_name)?;
        let entries = std::fs::read_dir(&path).ok()?;
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Some(names)
    }

    /// List the files directly inside an agent's workspace.
    pub fn list_files(&self, agent: &str) -> Vec<String> {
        self.list_folder(agent, ".").unwrap_or_default()
    }

    /// Write a file into the flat shared workspace.
    pub fn save_shared_file(&self, file_name: &str, content: &str) -> String {
        self.create_file(SHARED, file_name, content)
    }

    /// Read a file from the flat shared workspace.
    pub fn read_shared_file(&self, file_name: &str) -> Option<String> {
        self.read_file(SHARED, file_name)
    }
}
