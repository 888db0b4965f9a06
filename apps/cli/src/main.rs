use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use infinitenotes_vault::{
    ActionDispatcher, FileSystem, FileType, SessionConfig, StdFileSystem, TreeNode, Vault,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const STATE_DIR: &str = ".infinitenotes";
const REGISTRY_FILE: &str = "vaults.json";
const CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(
    name = "infinitenotes-cli",
    about = "Manage Infinite Notes vaults from the command line",
    author,
    version
)]
struct Cli {
    /// 狀態資料夾所在目錄；預設為目前目錄。 / Directory holding `.infinitenotes/` state (defaults to current directory).
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 管理已登錄的保管庫。 / Manage registered vaults.
    #[command(subcommand)]
    Vault(VaultCommand),
    /// 顯示目前保管庫的檔案樹。 / Print the file tree of the current vault.
    Tree,
    /// 以範本建立新檔案。 / Create a file from its template.
    NewFile(NewFileArgs),
    /// 建立資料夾。 / Create a folder.
    NewFolder(NewFolderArgs),
    /// 重新命名檔案或資料夾。 / Rename a file or folder.
    Rename(RenameArgs),
    /// 刪除檔案或資料夾。 / Delete a file or folder.
    Delete(PathArgs),
    /// 在同一資料夾複製檔案。 / Copy a file next to itself.
    Copy(RenameArgs),
    /// 開啟檔案並寫入新內容。 / Open a file, replace its contents and save.
    Write(WriteArgs),
}

#[derive(Subcommand)]
enum VaultCommand {
    /// 登錄新的保管庫資料夾。 / Register a vault folder (created if missing).
    Add(VaultAddArgs),
    /// 列出所有保管庫。 / List registered vaults.
    List,
    /// 切換目前的保管庫。 / Make a vault current.
    Switch(VaultRefArgs),
    /// 移除保管庫登錄（不刪除資料夾）。 / Forget a vault; its folder is kept.
    Remove(VaultRefArgs),
}

#[derive(Args)]
struct VaultAddArgs {
    /// 保管庫顯示名稱。 / Display name of the vault.
    name: String,
    /// 保管庫資料夾。 / Vault folder.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// 登錄後立即切換。 / Switch to the vault after registering it.
    #[arg(long)]
    switch: bool,
}

#[derive(Args)]
struct VaultRefArgs {
    /// 保管庫 ID 或名稱。 / Vault id or name.
    #[arg(value_name = "VAULT")]
    vault: String,
}

#[derive(Args)]
struct NewFileArgs {
    /// 檔名；未含副檔名時自動補上。 / File name; the type's extension is appended when missing.
    name: String,
    /// 檔案類型。 / File type.
    #[arg(long = "type", value_enum, default_value_t = FileTypeChoice::Note)]
    file_type: FileTypeChoice,
    /// 上層資料夾（相對於保管庫根目錄）。 / Parent folder relative to the vault root.
    #[arg(long, value_name = "DIR")]
    parent: Option<PathBuf>,
}

#[derive(Args)]
struct NewFolderArgs {
    /// 資料夾名稱。 / Folder name.
    name: String,
    /// 上層資料夾（相對於保管庫根目錄）。 / Parent folder relative to the vault root.
    #[arg(long, value_name = "DIR")]
    parent: Option<PathBuf>,
}

#[derive(Args)]
struct RenameArgs {
    /// 來源路徑（相對於保管庫根目錄）。 / Source path relative to the vault root.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// 新名稱。 / New name.
    new_name: String,
}

#[derive(Args)]
struct PathArgs {
    /// 目標路徑（相對於保管庫根目錄）。 / Target path relative to the vault root.
    #[arg(value_name = "PATH")]
    path: PathBuf,
}

#[derive(Args)]
struct WriteArgs {
    /// 檔案路徑（相對於保管庫根目錄）。 / File path relative to the vault root.
    #[arg(value_name = "PATH")]
    path: PathBuf,
    /// 新內容；略過時從標準輸入讀取。 / New contents; read from stdin when omitted.
    #[arg(long)]
    content: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FileTypeChoice {
    #[value(alias = "md")]
    Note,
    #[value(alias = "mm")]
    Canvas,
    Image,
    #[value(alias = "txt")]
    Base,
}

impl From<FileTypeChoice> for FileType {
    fn from(choice: FileTypeChoice) -> Self {
        match choice {
            FileTypeChoice::Note => FileType::Note,
            FileTypeChoice::Canvas => FileType::Canvas,
            FileTypeChoice::Image => FileType::Image,
            FileTypeChoice::Base => FileType::Base,
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();
    let Cli { home, command } = Cli::parse();
    let state_dir = resolve_home(home)?.join(STATE_DIR);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(execute(command, &state_dir))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_home(home: Option<PathBuf>) -> Result<PathBuf> {
    match home {
        Some(path) => Ok(path),
        None => std::env::current_dir().context("failed to determine current directory"),
    }
}

async fn execute(command: Commands, state_dir: &Path) -> Result<()> {
    let config_path = state_dir.join(CONFIG_FILE);
    let config = SessionConfig::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let fs: Arc<dyn FileSystem> = Arc::new(StdFileSystem::new());
    let mut dispatcher = ActionDispatcher::start(fs, state_dir.join(REGISTRY_FILE), config)
        .await
        .context("failed to restore vault registry")?;
    debug!(state = %state_dir.display(), "dispatcher ready");

    match command {
        Commands::Vault(subcommand) => execute_vault_command(&mut dispatcher, subcommand).await,
        Commands::Tree => print_tree(&dispatcher),
        Commands::NewFile(args) => {
            let parent = args
                .parent
                .map(|parent| vault_path(&dispatcher, &parent))
                .transpose()?;
            let created = dispatcher
                .create_file(parent.as_deref(), &args.name, args.file_type.into())
                .await?;
            dispatcher.shutdown().await?;
            println!("Created {}", display_relative(&dispatcher, &created));
            Ok(())
        }
        Commands::NewFolder(args) => {
            let parent = args
                .parent
                .map(|parent| vault_path(&dispatcher, &parent))
                .transpose()?;
            let created = dispatcher.create_folder(parent.as_deref(), &args.name).await?;
            println!("Created {}", display_relative(&dispatcher, &created));
            Ok(())
        }
        Commands::Rename(args) => {
            let source = vault_path(&dispatcher, &args.path)?;
            let renamed = dispatcher.rename(&source, &args.new_name).await?;
            println!("Renamed to {}", display_relative(&dispatcher, &renamed));
            Ok(())
        }
        Commands::Delete(args) => {
            let target = vault_path(&dispatcher, &args.path)?;
            dispatcher.delete_item(&target).await?;
            println!("Deleted {}", args.path.display());
            Ok(())
        }
        Commands::Copy(args) => {
            let source = vault_path(&dispatcher, &args.path)?;
            let copy = dispatcher.copy_item(&source, &args.new_name).await?;
            println!("Copied to {}", display_relative(&dispatcher, &copy));
            Ok(())
        }
        Commands::Write(args) => {
            let target = vault_path(&dispatcher, &args.path)?;
            let content = match args.content {
                Some(content) => content,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("failed to read stdin")?;
                    buffer
                }
            };
            dispatcher.open_file(&target).await?;
            dispatcher.edit(content)?;
            dispatcher.shutdown().await?;
            println!("Saved {}", args.path.display());
            Ok(())
        }
    }
}

async fn execute_vault_command(
    dispatcher: &mut ActionDispatcher,
    command: VaultCommand,
) -> Result<()> {
    match command {
        VaultCommand::Add(args) => {
            let path = absolute(&args.path)?;
            let vault = dispatcher.add_vault(&args.name, path).await?;
            if args.switch {
                dispatcher.switch_vault(&vault.id).await?;
            }
            println!("Added vault '{}' ({})", vault.name, vault.id);
            Ok(())
        }
        VaultCommand::List => {
            let current = dispatcher.registry().current().map(|vault| vault.id.clone());
            if dispatcher.registry().vaults().is_empty() {
                println!("No vaults registered.");
            }
            for vault in dispatcher.registry().vaults() {
                let marker = if Some(&vault.id) == current.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}\t{}\t{}",
                    vault.name,
                    vault.path.display(),
                    vault.id
                );
            }
            Ok(())
        }
        VaultCommand::Switch(args) => {
            let vault = find_vault(dispatcher, &args.vault)?;
            dispatcher.switch_vault(&vault.id).await?;
            println!("Switched to vault '{}'", vault.name);
            Ok(())
        }
        VaultCommand::Remove(args) => {
            let vault = find_vault(dispatcher, &args.vault)?;
            let removed = dispatcher.remove_vault(&vault.id).await?;
            println!("Removed vault '{}'", removed.name);
            Ok(())
        }
    }
}

fn find_vault(dispatcher: &ActionDispatcher, key: &str) -> Result<Vault> {
    dispatcher
        .registry()
        .vaults()
        .iter()
        .find(|vault| vault.id.as_str() == key || vault.name == key)
        .cloned()
        .ok_or_else(|| anyhow!("no vault matches '{key}'"))
}

fn print_tree(dispatcher: &ActionDispatcher) -> Result<()> {
    let session = dispatcher
        .session()
        .ok_or_else(|| anyhow!("no vault is open; run `vault switch` first"))?;
    let root = session
        .tree()
        .root()
        .ok_or_else(|| anyhow!("vault tree is not loaded"))?;
    println!("{}/", session.vault().name);
    print_children(root, 1);
    Ok(())
}

fn print_children(node: &TreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    for child in node.children() {
        match child {
            TreeNode::Folder(folder) => {
                println!("{indent}{}/", folder.name);
                print_children(child, depth + 1);
            }
            TreeNode::File(file) => println!("{indent}{} [{}]", file.name, file.file_type),
            TreeNode::Root { .. } => {}
        }
    }
}

/// Resolves a vault-relative path against the current vault root.
fn vault_path(dispatcher: &ActionDispatcher, relative: &Path) -> Result<PathBuf> {
    let session = dispatcher
        .session()
        .ok_or_else(|| anyhow!("no vault is open; run `vault switch` first"))?;
    if relative.is_absolute() {
        bail!("paths must be relative to the vault root: {}", relative.display());
    }
    let root = &session.vault().path;
    if relative.as_os_str().is_empty() || relative == Path::new(".") {
        return Ok(root.clone());
    }
    Ok(root.join(relative))
}

fn display_relative(dispatcher: &ActionDispatcher, path: &Path) -> String {
    dispatcher
        .session()
        .and_then(|session| path.strip_prefix(&session.vault().path).ok())
        .unwrap_or(path)
        .display()
        .to_string()
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    Ok(cwd.join(path))
}
