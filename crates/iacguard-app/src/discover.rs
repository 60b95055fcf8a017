//! Root module discovery.

use iacguard_eval::{Scope, is_config_file, load_module};
use iacguard_fs::FileSystem;
use iacguard_modules::ModuleSource;
use iacguard_types::RepoPath;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Directory holding modules fetched by `init`; never a root of its own.
const FETCHED_MODULES_DIR: &str = ".terraform";

/// Directories among `files` that hold configuration and are not called as a local
/// module by another such directory. When every directory is called by another one
/// (a cycle), all of them are roots.
pub fn find_root_modules(fs: &dyn FileSystem, files: &[RepoPath]) -> Vec<RepoPath> {
    let dirs: BTreeSet<RepoPath> = files
        .iter()
        .filter(|f| is_config_file(f))
        .map(RepoPath::parent)
        .filter(|dir| !inside_fetched_modules(dir))
        .collect();

    let mut called = BTreeSet::new();
    for dir in &dirs {
        called.extend(local_module_calls(fs, dir));
    }

    let roots: Vec<RepoPath> = dirs.iter().filter(|d| !called.contains(*d)).cloned().collect();
    if roots.is_empty() && !dirs.is_empty() {
        warn!("every configuration directory is called as a module; scanning all of them");
        return dirs.into_iter().collect();
    }
    debug!("found {} root module(s) among {} directories", roots.len(), dirs.len());
    roots
}

fn inside_fetched_modules(dir: &RepoPath) -> bool {
    dir.as_str().split('/').any(|segment| segment == FETCHED_MODULES_DIR)
}

/// Directories referenced by literal local `source` attributes of `module` blocks in `dir`.
fn local_module_calls(fs: &dyn FileSystem, dir: &RepoPath) -> Vec<RepoPath> {
    let module = match load_module(fs, dir) {
        Ok(module) => module,
        Err(e) => {
            warn!("skipping {dir} during root discovery: {e}");
            return Vec::new();
        }
    };

    let scope = Scope::empty();
    module
        .blocks
        .iter()
        .filter(|b| b.kind == "module")
        .filter_map(|block| {
            let source = scope.eval(&block.attribute("source")?.expr);
            match ModuleSource::parse(source.as_str()?) {
                Ok(ModuleSource::Local { path }) => Some(dir.join(&path)),
                _ => None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_fs::MemFs;
    use iacguard_types::CancellationToken;

    fn roots(files: &[(&str, &str)]) -> Vec<String> {
        let fs = MemFs::from_files(files.iter().copied());
        let all = fs.walk(&RepoPath::root(), &CancellationToken::new()).expect("walk");
        find_root_modules(&fs, &all)
            .into_iter()
            .map(|p| p.as_str().to_string())
            .collect()
    }

    #[test]
    fn called_directories_are_not_roots() {
        let found = roots(&[
            ("envs/prod/main.tf", r#"module "net" { source = "../../modules/net" }"#),
            ("envs/dev/main.tf", r#"module "net" { source = "../../modules/net" }"#),
            ("modules/net/main.tf", r#"resource "aws_vpc" "this" {}"#),
            ("docs/readme.md", ""),
        ]);
        assert_eq!(found, vec!["envs/dev", "envs/prod"]);
    }

    #[test]
    fn remote_sources_do_not_hide_directories() {
        let found = roots(&[
            ("main.tf", r#"module "vpc" { source = "terraform-aws-modules/vpc/aws" }"#),
            ("vpc/main.tf", ""),
        ]);
        assert_eq!(found, vec![".", "vpc"]);
    }

    #[test]
    fn fetched_modules_are_not_roots() {
        let found = roots(&[
            ("main.tf", ""),
            (".terraform/modules/vpc/main.tf", ""),
        ]);
        assert_eq!(found, vec!["."]);
    }

    #[test]
    fn mutual_calls_fall_back_to_every_directory() {
        let found = roots(&[
            ("a/main.tf", r#"module "b" { source = "../b" }"#),
            ("b/main.tf", r#"module "a" { source = "../a" }"#),
        ]);
        assert_eq!(found, vec!["a", "b"]);
    }
}
