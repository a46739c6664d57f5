//! 沙箱文件系统工具
//!
//! SafeFs 绑定 root_dir，所有路径先做词法归一化（拒绝绝对路径与 ../ 逃逸），
//! 已存在的路径再经 canonicalize 校验符号链接不指向根外。
//! read_file / write_file / list_directory 基于 SafeFs。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::registry::args_schema;
use crate::tools::{Tool, ToolRegistry};

/// 沙箱文件系统：绑定根目录，防止路径逃逸
#[derive(Debug, Clone)]
pub struct SafeFs {
    root_dir: PathBuf,
}

impl SafeFs {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// 解析相对路径到根目录下；不要求目标已存在
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let mut relative = PathBuf::new();
        for component in Path::new(path.trim()).components() {
            match component {
                Component::Normal(part) => relative.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !relative.pop() {
                        return Err(format!("Path escapes sandbox: {}", path));
                    }
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(format!("Absolute paths are not allowed: {}", path));
                }
            }
        }
        let full = self.root_dir.join(&relative);
        if let (Ok(canonical), Ok(root)) = (full.canonicalize(), self.root_dir.canonicalize()) {
            if !canonical.starts_with(&root) {
                return Err(format!("Path escapes sandbox: {}", path)); // 符号链接指向根外
            }
        }
        Ok(full)
    }

    pub async fn read_file(&self, path: &str) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("Read failed for {}: {}", path, e))
    }

    /// 写入（或追加）文件，自动创建父目录
    pub async fn write_file(&self, path: &str, text: &str, append: bool) -> Result<String, String> {
        let resolved = self.resolve(path)?;
        if resolved == self.root_dir {
            return Err("A file name is required".to_string());
        }
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("Create directory failed: {}", e))?;
        }
        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&resolved)
                .await
                .map_err(|e| format!("Open failed for {}: {}", path, e))?;
            file.write_all(text.as_bytes())
                .await
                .map_err(|e| format!("Write failed for {}: {}", path, e))?;
        } else {
            tokio::fs::write(&resolved, text)
                .await
                .map_err(|e| format!("Write failed for {}: {}", path, e))?;
        }
        Ok(format!("File written successfully to {}.", path))
    }

    pub async fn list_dir(&self, path: &str) -> Result<Vec<String>, String> {
        let base = self.resolve(path)?;
        let mut reader = tokio::fs::read_dir(&base)
            .await
            .map_err(|e| format!("List failed for {}: {}", path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| format!("List failed: {}", e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();
        Ok(entries)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// Path of the file, relative to the sandbox
    pub file_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WriteFileArgs {
    /// Path of the file, relative to the sandbox
    pub file_path: String,
    /// Text to write
    pub text: String,
    /// Append instead of overwrite
    #[serde(default)]
    pub append: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirectoryArgs {
    /// Subdirectory to list, defaults to the sandbox root
    #[serde(default)]
    pub dir_path: Option<String>,
}

fn parse<T: for<'de> Deserialize<'de>>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("Invalid arguments: {}", e))
}

pub struct ReadFileTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file from disk"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ReadFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ReadFileArgs = parse(args)?;
        tracing::info!(path = %args.file_path, "read_file tool execute");
        self.fs.read_file(&args.file_path).await
    }
}

pub struct WriteFileTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write file to disk"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<WriteFileArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: WriteFileArgs = parse(args)?;
        tracing::info!(path = %args.file_path, append = args.append, "write_file tool execute");
        self.fs
            .write_file(&args.file_path, &args.text, args.append)
            .await
    }
}

pub struct ListDirectoryTool {
    fs: SafeFs,
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories in a specified folder"
    }

    fn parameters_schema(&self) -> Value {
        args_schema::<ListDirectoryArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: ListDirectoryArgs = parse(args)?;
        let path = args.dir_path.unwrap_or_else(|| ".".to_string());
        tracing::info!(path = %path, "list_directory tool execute");
        let entries = self.fs.list_dir(&path).await?;
        if entries.is_empty() {
            Ok(format!("No files found in directory {}", path))
        } else {
            Ok(entries.join("\n"))
        }
    }
}

/// 文件工具集（三者共享同一沙箱根）
pub fn file_toolkit(root_dir: impl AsRef<Path>) -> ToolRegistry {
    let fs = SafeFs::new(root_dir);
    let mut registry = ToolRegistry::new();
    registry.register(ReadFileTool { fs: fs.clone() });
    registry.register(WriteFileTool { fs: fs.clone() });
    registry.register(ListDirectoryTool { fs });
    registry
}
