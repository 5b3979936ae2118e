//! Recursive helpers built purely on the capability contract.

use std::future::Future;
use std::pin::Pin;

use globset::GlobBuilder;

use crate::backend::Filesystem;
use crate::error::{VfsError, VfsResult};
use crate::info::InfoRecord;

type BoxedWalk<'a> = Pin<Box<dyn Future<Output = VfsResult<Vec<InfoRecord>>> + Send + 'a>>;

/// Every record below `root`, depth-first. `max_depth` of 1 lists only
/// direct children; `None` walks the whole tree.
pub async fn walk<F>(fs: &F, root: &str, max_depth: Option<usize>) -> VfsResult<Vec<InfoRecord>>
where
    F: Filesystem + ?Sized,
{
    if max_depth == Some(0) {
        return Ok(Vec::new());
    }
    boxed_walk(fs, root.to_string(), max_depth).await
}

fn boxed_walk<F>(fs: &F, root: String, max_depth: Option<usize>) -> BoxedWalk<'_>
where
    F: Filesystem + ?Sized,
{
    Box::pin(async move {
        let mut out = Vec::new();
        for record in fs.list(&root).await? {
            let descend = record.is_dir()
                && !same_path(&record.name, &root)
                && max_depth.map_or(true, |d| d > 1);
            let name = record.name.clone();
            out.push(record);
            if descend {
                out.extend(boxed_walk(fs, name, max_depth.map(|d| d - 1)).await?);
            }
        }
        Ok(out)
    })
}

/// Recursively remove a directory and its contents
pub async fn remove_tree<F>(fs: &F, path: &str) -> VfsResult<()>
where
    F: Filesystem + ?Sized,
{
    if !fs.exists(path).await? {
        return Ok(());
    }
    if fs.is_dir(path).await? {
        let mut entries = walk(fs, path, None).await?;
        // children before parents
        entries.sort_by_key(|r| std::cmp::Reverse(r.name.matches('/').count()));
        for entry in entries {
            fs.remove(&entry.name).await?;
        }
    }
    fs.remove(path).await
}

/// Default glob: walk below the pattern's literal prefix and match.
pub async fn glob<F>(fs: &F, pattern: &str) -> VfsResult<Vec<InfoRecord>>
where
    F: Filesystem + ?Sized,
{
    let (prefix, depth) = split_pattern(pattern);
    let Some(depth) = depth else {
        // no wildcards: the pattern names at most one entry
        return match fs.info(pattern).await {
            Ok(info) => Ok(vec![info]),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        };
    };

    let matcher = GlobBuilder::new(pattern.trim_start_matches('/'))
        .literal_separator(true)
        .build()
        .map_err(|e| VfsError::invalid_path(format!("{pattern}: {e}")))?
        .compile_matcher();

    let candidates = match walk(fs, &prefix, depth).await {
        Ok(records) => records,
        Err(e) if e.is_not_found() => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(candidates
        .into_iter()
        .filter(|r| matcher.is_match(r.name.trim_start_matches('/')))
        .collect())
}

/// Literal directory prefix of a pattern and the walk depth it needs.
///
/// Depth is `None` for wildcard-free patterns and `Some(None)` when the
/// pattern contains `**`.
fn split_pattern(pattern: &str) -> (String, Option<Option<usize>>) {
    let parts: Vec<&str> = pattern.split('/').collect();
    let Some(first_magic) = parts.iter().position(|p| has_magic(p)) else {
        return (pattern.to_string(), None);
    };

    let mut prefix = parts[..first_magic].join("/");
    if prefix.is_empty() {
        prefix = "/".to_string();
    }
    let remaining = &parts[first_magic..];
    let depth = if remaining.iter().any(|p| p.contains("**")) {
        None
    } else {
        Some(remaining.len())
    };
    (prefix, Some(depth))
}

fn has_magic(component: &str) -> bool {
    component.contains(['*', '?', '[', '{'])
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim_matches('/') == b.trim_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFs;

    fn sample() -> MemoryFs {
        MemoryFs::with_files(vec![
            ("/a.txt", "a"),
            ("/src/lib.rs", "lib"),
            ("/src/main.rs", "main"),
            ("/src/nested/deep.rs", "deep"),
            ("/docs/readme.md", "readme"),
        ])
    }

    #[test]
    fn pattern_prefix_and_depth() {
        assert_eq!(split_pattern("/src/*.rs"), ("/src".into(), Some(Some(1))));
        assert_eq!(split_pattern("/src/**/*.rs"), ("/src".into(), Some(None)));
        assert_eq!(split_pattern("*.txt"), ("/".into(), Some(Some(1))));
        assert_eq!(split_pattern("/a.txt"), ("/a.txt".into(), None));
    }

    #[tokio::test]
    async fn test_walk_depth() {
        let fs = sample();
        let all = walk(&fs, "/", None).await.unwrap();
        assert!(all.iter().any(|r| r.name == "/src/nested/deep.rs"));

        let shallow = walk(&fs, "/", Some(1)).await.unwrap();
        let names: Vec<_> = shallow.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["/a.txt", "/docs", "/src"]);
    }

    #[tokio::test]
    async fn test_glob() {
        let fs = sample();
        let names: Vec<String> = glob(&fs, "/src/*.rs")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["/src/lib.rs", "/src/main.rs"]);

        let deep = glob(&fs, "/src/**/*.rs").await.unwrap();
        assert_eq!(deep.len(), 3);

        assert_eq!(glob(&fs, "/a.txt").await.unwrap().len(), 1);
        assert!(glob(&fs, "/missing/*.rs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_tree() {
        let fs = sample();
        remove_tree(&fs, "/src").await.unwrap();
        assert!(!fs.exists("/src").await.unwrap());
        assert!(!fs.exists("/src/nested/deep.rs").await.unwrap());
        assert!(fs.exists("/a.txt").await.unwrap());
    }
}
