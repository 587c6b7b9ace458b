use std::path::{Path, PathBuf};
use anyhow::{anyhow, Result};
use log::{debug, info};
use walkdir::WalkDir;
use crate::config::Credentials;
use crate::job::JobDescriptor;

/// File name of the FileMaker data migration tool
pub const TOOL_NAME: &str = if cfg!(windows) { "FMDataMigration.exe" } else { "FMDataMigration" };

/// Where to get the tool when it cannot be found
pub const TOOL_DOWNLOAD_URL: &str =
    "https://community.claris.com/en/s/article/FileMaker-data-migration-tool";

/// Mask shown instead of the password in rendered command lines
const PASSWORD_MASK: &str = "**********";

/// Locate the migration tool.
///
/// An explicit path wins and must exist. Otherwise the working directory and
/// then its parent are searched recursively for [`TOOL_NAME`].
pub fn find_tool(explicit: Option<&Path>) -> Result<PathBuf> {
    find_tool_in(explicit, &[Path::new("."), Path::new("..")])
}

pub fn find_tool_in(explicit: Option<&Path>, search_roots: &[&Path]) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            info!("Using migration tool at {}", path.display());
            return Ok(path.to_path_buf());
        }
        return Err(anyhow!("Configured migration tool does not exist: {}", path.display()));
    }

    for root in search_roots {
        debug!("Searching for {} under {}", TOOL_NAME, root.display());
        let found = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == TOOL_NAME);

        if let Some(entry) = found {
            info!("Found migration tool at {}", entry.path().display());
            return Ok(entry.into_path());
        }
    }

    Err(anyhow!(
        "Failed to find {}. Please download the FileMaker data migration tool: {}",
        TOOL_NAME,
        TOOL_DOWNLOAD_URL
    ))
}

/// Escape the double quotes of a value for the tool's command line syntax,
/// where a literal quote inside a quoted value is written as `"""`
pub fn escape_quotes(raw: &str) -> String {
    raw.replace('"', "\"\"\"")
}

/// Quote one value for a single-string command line
pub fn quote_arg(raw: &str) -> String {
    format!("\"{}\"", escape_quotes(raw))
}

/// Split the operator's extra-argument string into tokens.
///
/// Tokens are separated by whitespace; a double-quoted segment may contain
/// whitespace and its quotes are dropped. Everything else is kept verbatim.
pub fn split_extra_args(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in raw.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }

    args
}

/// Builds the argument vector of one migration tool invocation
pub struct CommandBuilder<'a> {
    credentials: &'a Credentials,
    extra_args: &'a [String],
}

impl<'a> CommandBuilder<'a> {
    pub fn new(credentials: &'a Credentials, extra_args: &'a [String]) -> Self {
        CommandBuilder { credentials, extra_args }
    }

    /// Fixed source/clone/target and account flags, `-v`, then the extra
    /// arguments untouched.
    ///
    /// Every value is its own argv element, so a quote or space inside a path
    /// or password cannot move an argument boundary.
    pub fn build_migration_command(&self, descriptor: &JobDescriptor) -> Vec<String> {
        let mut args = Vec::with_capacity(15 + self.extra_args.len());

        args.push("-src_path".to_string());
        args.push(descriptor.source_path.to_string_lossy().to_string());
        args.push("-clone_path".to_string());
        args.push(descriptor.clone_path.to_string_lossy().to_string());
        args.push("-target_path".to_string());
        args.push(descriptor.target_path.to_string_lossy().to_string());

        args.push("-src_account".to_string());
        args.push(self.credentials.account.clone());
        args.push("-src_pwd".to_string());
        args.push(self.credentials.password.clone());
        args.push("-clone_account".to_string());
        args.push(self.credentials.account.clone());
        args.push("-clone_pwd".to_string());
        args.push(self.credentials.password.clone());

        args.push("-v".to_string());
        args.extend(self.extra_args.iter().cloned());

        args
    }

    /// Single-line rendering for logs: values quoted and escaped, passwords
    /// masked, extra arguments verbatim
    pub fn render(&self, tool: &Path, args: &[String]) -> String {
        let mut line = quote_arg(&tool.to_string_lossy());
        let fixed = args.len().saturating_sub(self.extra_args.len());

        let mut iter = args.iter().enumerate().peekable();
        while let Some((i, arg)) = iter.next() {
            line.push(' ');
            if i >= fixed || !arg.starts_with('-') {
                line.push_str(arg);
                continue;
            }
            line.push_str(arg);
            if arg == "-v" {
                continue;
            }
            if let Some((_, value)) = iter.next() {
                line.push(' ');
                if arg.ends_with("_pwd") {
                    line.push_str(&quote_arg(PASSWORD_MASK));
                } else {
                    line.push_str(&quote_arg(value));
                }
            }
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> JobDescriptor {
        JobDescriptor {
            base_name: "My \"Big\" DB".to_string(),
            source_path: PathBuf::from("source/My \"Big\" DB.fmp12"),
            clone_path: PathBuf::from("clone/My \"Big\" DB Clone.fmp12"),
            target_path: PathBuf::from("target/My \"Big\" DB.fmp12"),
            index: 0,
            source_size: 1,
        }
    }

    fn credentials() -> Credentials {
        Credentials { account: "ad\"min".to_string(), password: "p\"w d".to_string() }
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape_quotes("plain"), "plain");
        assert_eq!(escape_quotes("a\"b"), "a\"\"\"b");
        assert_eq!(quote_arg("a\"b"), "\"a\"\"\"b\"");
    }

    #[test]
    fn test_split_extra_args() {
        assert!(split_extra_args("").is_empty());
        assert!(split_extra_args("   ").is_empty());
        assert_eq!(split_extra_args("-force  -ignore_fonts"), vec!["-force", "-ignore_fonts"]);
        assert_eq!(
            split_extra_args("-src_key \"my key\" -q"),
            vec!["-src_key", "my key", "-q"]
        );
        assert_eq!(split_extra_args("-clone_key \"\""), vec!["-clone_key", ""]);
    }

    #[test]
    fn test_build_keeps_values_as_single_arguments() {
        let creds = credentials();
        let extra = vec!["-force".to_string(), "-ignore_valuelists".to_string()];
        let builder = CommandBuilder::new(&creds, &extra);
        let args = builder.build_migration_command(&descriptor());

        assert_eq!(args.len(), 17);
        assert_eq!(args[0], "-src_path");
        assert_eq!(args[1], "source/My \"Big\" DB.fmp12");
        assert_eq!(args[7], "ad\"min");
        assert_eq!(args[9], "p\"w d");
        assert_eq!(args[13], "p\"w d");
        assert_eq!(args[14], "-v");
        assert_eq!(&args[15..], &extra[..]);
    }

    #[test]
    fn test_render_masks_password_and_escapes_quotes() {
        let creds = credentials();
        let extra = vec!["-force".to_string()];
        let builder = CommandBuilder::new(&creds, &extra);
        let args = builder.build_migration_command(&descriptor());
        let line = builder.render(Path::new("/opt/FMDataMigration"), &args);

        assert!(!line.contains("p\"w d"));
        assert!(line.contains("-src_pwd \"**********\""));
        assert!(line.contains("-src_account \"ad\"\"\"min\""));
        assert!(line.contains("-src_path \"source/My \"\"\"Big\"\"\" DB.fmp12\""));
        assert!(line.starts_with("\"/opt/FMDataMigration\" -src_path"));
        assert!(line.ends_with("-v -force"));
    }

    #[test]
    fn test_find_tool_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("custom-dmt");
        std::fs::write(&tool, b"").unwrap();

        assert_eq!(find_tool_in(Some(&tool), &[]).unwrap(), tool);
        assert!(find_tool_in(Some(&dir.path().join("missing")), &[]).is_err());
    }

    #[test]
    fn test_find_tool_searches_roots_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("tools/dmt/bin");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(TOOL_NAME), b"").unwrap();

        let empty = tempfile::tempdir().unwrap();
        let found = find_tool_in(None, &[empty.path(), dir.path()]).unwrap();
        assert_eq!(found, nested.join(TOOL_NAME));

        let err = find_tool_in(None, &[empty.path()]).unwrap_err();
        assert!(err.to_string().contains(TOOL_DOWNLOAD_URL));
    }
}
