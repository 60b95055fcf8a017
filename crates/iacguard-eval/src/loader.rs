use crate::error::EvalError;
use crate::scope::Scope;
use iacguard_fs::FileSystem;
use iacguard_hcl::{Block, Value, dedupe_blocks, parse_file};
use iacguard_types::RepoPath;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const CONFIG_SUFFIX: &str = ".tf";
pub const DEFAULT_VAR_FILE: &str = "terraform.tfvars";
pub const AUTO_VAR_FILE_SUFFIX: &str = ".auto.tfvars";

/// Blocks of every configuration file directly inside one directory.
#[derive(Clone, Debug, Default)]
pub struct LoadedModule {
    pub files: Vec<RepoPath>,
    pub blocks: Vec<Block>,
}

pub fn is_config_file(path: &RepoPath) -> bool {
    let name = path.file_name();
    name.ends_with(CONFIG_SUFFIX) && name.len() > CONFIG_SUFFIX.len()
}

/// Parses the module in `dir`. Files that fail to parse are logged and skipped.
pub fn load_module(fs: &dyn FileSystem, dir: &RepoPath) -> Result<LoadedModule, EvalError> {
    let entries = fs.read_dir(dir).map_err(|source| EvalError::ReadModule {
        path: dir.clone(),
        source,
    })?;

    let mut loaded = LoadedModule::default();
    for entry in entries {
        if entry.is_dir || !is_config_file(&entry.path) {
            continue;
        }
        let text = match fs.read_to_string(&entry.path) {
            Ok(text) => text,
            Err(e) => {
                warn!("skipping unreadable file {}: {}", entry.path, e);
                continue;
            }
        };
        match parse_file(&entry.path, &text) {
            Ok(file) => {
                debug!("parsed {} ({} blocks)", entry.path, file.blocks.len());
                loaded.blocks.extend(file.blocks);
                loaded.files.push(entry.path);
            }
            Err(e) => warn!("skipping file: {}", e),
        }
    }

    loaded.blocks = dedupe_blocks(loaded.blocks);
    Ok(loaded)
}

/// Reads a variable definitions file. Values are evaluated without any module context.
pub fn load_var_file(fs: &dyn FileSystem, path: &RepoPath) -> Option<BTreeMap<String, Value>> {
    let text = match fs.read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("skipping unreadable variable file {}: {}", path, e);
            return None;
        }
    };
    let file = match parse_file(path, &text) {
        Ok(file) => file,
        Err(e) => {
            warn!("skipping variable file: {}", e);
            return None;
        }
    };

    let scope = Scope::empty();
    Some(
        file.attributes
            .iter()
            .map(|attr| (attr.name.clone(), scope.eval(&attr.expr)))
            .collect(),
    )
}

/// `terraform.tfvars` then `*.auto.tfvars` in name order; later files override earlier ones.
pub fn auto_var_files(fs: &dyn FileSystem, dir: &RepoPath) -> Vec<RepoPath> {
    let Ok(entries) = fs.read_dir(dir) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    let default = dir.join(DEFAULT_VAR_FILE);
    if fs.is_file(&default) {
        files.push(default);
    }
    files.extend(
        entries
            .into_iter()
            .filter(|e| !e.is_dir && e.path.file_name().ends_with(AUTO_VAR_FILE_SUFFIX))
            .map(|e| e.path),
    );
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_fs::MemFs;

    #[test]
    fn loads_only_config_files_of_one_directory() {
        let fs = MemFs::from_files([
            ("main.tf", "resource \"aws_s3_bucket\" \"a\" {}\n"),
            ("vars.tf", "variable \"x\" {}\n"),
            ("notes.md", "resource"),
            ("nested/main.tf", "resource \"aws_s3_bucket\" \"b\" {}\n"),
        ]);
        let loaded = load_module(&fs, &RepoPath::root()).expect("load");
        assert_eq!(loaded.files.len(), 2);
        assert_eq!(loaded.blocks.len(), 2);
    }

    #[test]
    fn broken_files_are_skipped() {
        let fs = MemFs::from_files([
            ("good.tf", "resource \"aws_s3_bucket\" \"a\" {}\n"),
            ("bad.tf", "resource \"aws_s3_bucket\" {\n"),
        ]);
        let loaded = load_module(&fs, &RepoPath::root()).expect("load");
        assert_eq!(loaded.files, vec![RepoPath::new("good.tf")]);
    }

    #[test]
    fn duplicate_blocks_keep_the_first() {
        let fs = MemFs::from_files([
            ("a.tf", "resource \"aws_s3_bucket\" \"a\" { bucket = \"first\" }\n"),
            ("b.tf", "resource \"aws_s3_bucket\" \"a\" { bucket = \"second\" }\n"),
        ]);
        let loaded = load_module(&fs, &RepoPath::root()).expect("load");
        assert_eq!(loaded.blocks.len(), 1);
        assert_eq!(loaded.blocks[0].range.filename, RepoPath::new("a.tf"));
    }

    #[test]
    fn var_files_in_precedence_order() {
        let fs = MemFs::from_files([
            ("env/main.tf", ""),
            ("env/terraform.tfvars", "region = \"eu-west-1\"\n"),
            ("env/b.auto.tfvars", "region = \"us-east-1\"\n"),
            ("env/a.auto.tfvars", "size = 3\n"),
        ]);
        let files = auto_var_files(&fs, &RepoPath::new("env"));
        let names: Vec<&str> = files.iter().map(|p| p.file_name()).collect();
        assert_eq!(names, vec!["terraform.tfvars", "a.auto.tfvars", "b.auto.tfvars"]);

        let vars = load_var_file(&fs, &RepoPath::new("env/a.auto.tfvars")).expect("vars");
        assert_eq!(vars.get("size"), Some(&Value::Number(3.0)));
    }
}
