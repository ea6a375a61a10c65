//! Builtin developer skills available to simulated agents.
//!
//! Each skill wraps a small local capability (HTTP fetch, file edits,
//! git, cargo) behind the `Skill` trait so the dispatcher can invoke
//! them by name with positional arguments.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Skill, SkillError, SkillRegistry};

/// Register every builtin skill into the registry.
pub fn register_all(registry: &mut SkillRegistry) {
    registry.register(Arc::new(ScrapeWebpage::new()));
    registry.register(Arc::new(SaveFile));
    registry.register(Arc::new(EditFile));
    registry.register(Arc::new(SearchFiles));
    registry.register(Arc::new(GitClone));
    registry.register(Arc::new(GitPull));
    registry.register(Arc::new(GitPush));
    registry.register(Arc::new(AnalyzeCode));
    registry.register(Arc::new(InstallDependencies));
    registry.register(Arc::new(GenerateDocumentation));
    registry.register(Arc::new(RunUnitTests));
}

/// Run a local command and fold stdout/stderr into a single outcome string.
fn run_command(program: &str, args: &[&str], cwd: Option<&str>) -> Result<String, SkillError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|e| SkillError::Failed(format!("failed to launch {}: {}", program, e)))?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if output.status.success() {
        Ok(if stdout.trim().is_empty() {
            format!("{} {} completed", program, args.join(" "))
        } else {
            stdout.trim().to_string()
        })
    } else {
        warn!(%program, status = %output.status, "command failed");
        Ok(format!(
            "{} {} failed ({}): {}",
            program,
            args.join(" "),
            output.status,
            stderr.trim()
        ))
    }
}

/// Fetch a webpage and return its body text.
pub struct ScrapeWebpage {
    client: reqwest::Client,
}

impl ScrapeWebpage {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for ScrapeWebpage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for ScrapeWebpage {
    fn name(&self) -> &str {
        "scrape_webpage"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return the page body"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let url = args
            .first()
            .ok_or(SkillError::Usage("scrape_webpage <url>"))?;
        info!(%url, "scraping webpage");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SkillError::Failed(format!("request to {} failed: {}", url, e)))?;
        let status = resp.status();
        if !status.is_success() {
            return Ok(format!(
                "Failed to scrape webpage. Status code: {}",
                status.as_u16()
            ));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| SkillError::Failed(format!("reading body from {} failed: {}", url, e)))?;
        Ok(body)
    }
}

/// Write content to a file, creating parent directories as needed.
pub struct SaveFile;

#[async_trait]
impl Skill for SaveFile {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Write content to a file path"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let [path, content] = match args {
            [p, c] => [p, c],
            _ => return Err(SkillError::Usage("save_file <path> <content>")),
        };
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(format!("Saved {}", path))
    }
}

/// Replace the first occurrence of a string in a file.
pub struct EditFile;

#[async_trait]
impl Skill for EditFile {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace text inside an existing file"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let [path, old, new] = match args {
            [p, o, n] => [p, o, n],
            _ => return Err(SkillError::Usage("edit_file <path> <old> <new>")),
        };
        let content = std::fs::read_to_string(path)?;
        if !content.contains(old.as_str()) {
            return Ok(format!("No occurrence of '{}' in {}", old, path));
        }
        let updated = content.replacen(old.as_str(), new, 1);
        std::fs::write(path, updated)?;
        Ok(format!("Edited {}", path))
    }
}

/// Recursively search a directory for files whose contents match a keyword.
pub struct SearchFiles;

impl SearchFiles {
    fn walk(dir: &Path, keyword: &str, hits: &mut Vec<String>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, keyword, hits)?;
            } else if let Ok(content) = std::fs::read_to_string(&path) {
                if content.contains(keyword) {
                    hits.push(path.display().to_string());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Skill for SearchFiles {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Find files under a directory containing a keyword"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let [dir, keyword] = match args {
            [d, k] => [d, k],
            _ => return Err(SkillError::Usage("search_files <dir> <keyword>")),
        };
        let mut hits = Vec::new();
        Self::walk(Path::new(dir), keyword, &mut hits)?;
        if hits.is_empty() {
            Ok(format!("No files under {} contain '{}'", dir, keyword))
        } else {
            Ok(hits.join("\n"))
        }
    }
}

/// Clone a git repository.
pub struct GitClone;

#[async_trait]
impl Skill for GitClone {
    fn name(&self) -> &str {
        "git_clone"
    }

    fn description(&self) -> &str {
        "Clone a git repository into a directory"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let url = args.first().ok_or(SkillError::Usage("git_clone <url> [dir]"))?;
        let mut cmd_args = vec!["clone", url.as_str()];
        if let Some(dir) = args.get(1) {
            cmd_args.push(dir);
        }
        run_command("git", &cmd_args, None)
    }
}

/// Pull the current branch in a repository directory.
pub struct GitPull;

#[async_trait]
impl Skill for GitPull {
    fn name(&self) -> &str {
        "git_pull"
    }

    fn description(&self) -> &str {
        "Pull the latest changes in a repository"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let dir = args.first().ok_or(SkillError::Usage("git_pull <dir>"))?;
        run_command("git", &["pull"], Some(dir))
    }
}

/// Stage, commit, and push changes in a repository directory.
pub struct GitPush;

#[async_trait]
impl Skill for GitPush {
    fn name(&self) -> &str {
        "git_push"
    }

    fn description(&self) -> &str {
        "Commit all changes and push them upstream"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let [dir, message] = match args {
            [d, m] => [d, m],
            _ => return Err(SkillError::Usage("git_push <dir> <message>")),
        };
        let add = run_command("git", &["add", "-A"], Some(dir))?;
        let commit = run_command("git", &["commit", "-m", message], Some(dir))?;
        let push = run_command("git", &["push"], Some(dir))?;
        Ok(format!("{}\n{}\n{}", add, commit, push))
    }
}

/// Static analysis over a project directory, lint findings in the
/// outcome text.
pub struct AnalyzeCode;

#[async_trait]
impl Skill for AnalyzeCode {
    fn name(&self) -> &str {
        "analyze_code"
    }

    fn description(&self) -> &str {
        "Run static analysis over a project and report lint findings"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let dir = args.first().ok_or(SkillError::Usage("analyze_code <dir>"))?;
        run_command("cargo", &["clippy", "--message-format", "short"], Some(dir))
    }
}

/// Fetch crate dependencies for a project directory.
pub struct InstallDependencies;

#[async_trait]
impl Skill for InstallDependencies {
    fn name(&self) -> &str {
        "install_dependencies"
    }

    fn description(&self) -> &str {
        "Fetch dependencies for a project"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let dir = args
            .first()
            .ok_or(SkillError::Usage("install_dependencies <dir>"))?;
        run_command("cargo", &["fetch"], Some(dir))
    }
}

/// Build API documentation for a project directory.
pub struct GenerateDocumentation;

#[async_trait]
impl Skill for GenerateDocumentation {
    fn name(&self) -> &str {
        "generate_documentation"
    }

    fn description(&self) -> &str {
        "Generate API documentation for a project"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let dir = args
            .first()
            .ok_or(SkillError::Usage("generate_documentation <dir>"))?;
        run_command("cargo", &["doc", "--no-deps"], Some(dir))
    }
}

/// Run a project's test suite.
pub struct RunUnitTests;

#[async_trait]
impl Skill for RunUnitTests {
    fn name(&self) -> &str {
        "run_unit_tests"
    }

    fn description(&self) -> &str {
        "Run the unit tests of a project"
    }

    async fn invoke(&self, args: &[String]) -> Result<String, SkillError> {
        let dir = args
            .first()
            .ok_or(SkillError::Usage("run_unit_tests <dir>"))?;
        run_command("cargo", &["test", "--quiet"], Some(dir))
    }
}
