use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ewptool_project::{EncodeOptions, EwpDocument, EwpStore, FileEntry, PATH_SEPARATOR};
use log::{debug, info};

#[derive(Parser)]
#[command(
    name = "ewptool-cli",
    about = "Inspect and edit IAR Embedded Workbench project files",
    author,
    version
)]
struct Cli {
    /// 顯示除錯訊息。 / Print debug logging (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 列出專案中的檔案。 / List the files of a project.
    List(ListArgs),
    /// 以排序方式加入檔案。 / Add a file, keeping the file list sorted.
    Add(AddArgs),
    /// 檢查檔案是否已在專案中。 / Check whether a file is part of a project.
    Contains(ContainsArgs),
    /// 以一致的縮排重寫專案檔。 / Rewrite a project with normalised indentation.
    Format(FormatArgs),
}

#[derive(Args)]
struct ListArgs {
    /// `.ewp` 專案檔。 / Project file.
    project: PathBuf,
}

#[derive(Args)]
struct AddArgs {
    /// `.ewp` 專案檔。 / Project file.
    project: PathBuf,
    /// 相對於專案目錄的路徑。 / Path relative to the project directory.
    name: String,
    /// 排除此檔案的組態，可重複指定。 / Configuration to exclude the file from (repeatable).
    #[arg(long = "exclude", value_name = "CONFIG")]
    exclusions: Vec<String>,
}

#[derive(Args)]
struct ContainsArgs {
    /// `.ewp` 專案檔。 / Project file.
    project: PathBuf,
    /// 相對於專案目錄的路徑。 / Path relative to the project directory.
    name: String,
}

#[derive(Args)]
struct FormatArgs {
    /// `.ewp` 專案檔。 / Project file.
    project: PathBuf,
    /// 每層縮排的空白數。 / Spaces per indentation level.
    #[arg(long, default_value_t = 4, conflicts_with = "tabs")]
    indent: usize,
    /// 使用 Tab 縮排。 / Indent with tabs.
    #[arg(long)]
    tabs: bool,
    /// 輸出路徑；預設覆寫原檔。 / Output path; the project is rewritten in place when omitted.
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        }
    }
}

fn run() -> Result<i32> {
    let Cli { verbose, command } = Cli::parse();
    init_logging(verbose);
    match command {
        Commands::List(args) => execute_list(args),
        Commands::Add(args) => execute_add(args),
        Commands::Contains(args) => execute_contains(args),
        Commands::Format(args) => execute_format(args),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

fn execute_list(args: ListArgs) -> Result<i32> {
    let document = load_project(&args.project)?;
    for file in &document.files {
        match file.exclusions.as_deref() {
            Some(names) if !names.is_empty() => {
                println!("{} (excluded: {})", file.path, names.join(", "));
            }
            _ => println!("{}", file.path),
        }
    }
    Ok(0)
}

fn execute_add(args: AddArgs) -> Result<i32> {
    let store = EwpStore::new(&args.project);
    let mut document = load_project(&args.project)?;
    let entry = FileEntry::in_project_dir(&toolchain_path(&args.name), args.exclusions);

    if document.contains(&entry) {
        println!("{} is already part of {}", entry.path, args.project.display());
        return Ok(0);
    }

    info!("adding {} to {}", entry.path, args.project.display());
    let path = entry.path.clone();
    document.insert_file(entry);
    store
        .save(&document, &EncodeOptions::default())
        .with_context(|| format!("failed to write {}", args.project.display()))?;
    println!("Added {path}");
    Ok(0)
}

fn execute_contains(args: ContainsArgs) -> Result<i32> {
    let document = load_project(&args.project)?;
    let entry = FileEntry::in_project_dir(&toolchain_path(&args.name), Vec::<String>::new());
    if document.contains(&entry) {
        println!("yes");
        Ok(0)
    } else {
        println!("no");
        Ok(1)
    }
}

fn execute_format(args: FormatArgs) -> Result<i32> {
    if args.indent == 0 && !args.tabs {
        bail!("--indent must be at least 1");
    }
    let document = load_project(&args.project)?;
    let options = if args.tabs {
        EncodeOptions::tabs()
    } else {
        EncodeOptions {
            indent_char: b' ',
            indent_size: args.indent,
        }
    };
    let output = args.output.unwrap_or_else(|| args.project.clone());
    debug!("formatting {} into {}", args.project.display(), output.display());
    EwpStore::new(&output)
        .save(&document, &options)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("Formatted {}", output.display());
    Ok(0)
}

fn load_project(path: &Path) -> Result<EwpDocument> {
    if !path.exists() {
        bail!("project file '{}' does not exist", path.display());
    }
    EwpStore::new(path)
        .load()
        .with_context(|| format!("failed to load {}", path.display()))
}

/// Converts host-style separators so `src/app.c` and `src\app.c` name the
/// same project file.
fn toolchain_path(name: &str) -> String {
    name.replace('/', &PATH_SEPARATOR.to_string())
}
