//! Path resolution.
//!
//! Paths are `/`-separated ASCII. A leading `/` starts at the root
//! directory; otherwise resolution starts at a caller-supplied directory.
//! Runs of `/` collapse. Resolution is component-by-component: look the
//! name up in the current directory, open the child, close the parent.

use std::sync::Arc;

use arrayvec::ArrayString;
use sectorfs_types::{NAME_MAX, ROOT_DIR_SECTOR};

use crate::{dir::Dir, error::Error, fs::FsCore, inode::Inode};

/// Splits the next path component from `path`.
///
/// The returned remainder has no leading slashes. `None` when nothing but
/// slashes remains.
///
/// ```text
/// split_component("a/bb/c")  == Some(("a", "bb/c"))
/// split_component("///a//b") == Some(("a", "b"))
/// split_component("a/")      == Some(("a", ""))
/// split_component("///")     == None
/// split_component("")        == None
/// ```
fn split_component(path: &str) -> Option<(&str, &str)> {
    let start = path.find(|c| c != '/')?;
    let path = &path[start..];
    let end = path.find('/').unwrap_or(path.len());
    let elem = &path[..end];
    let rest = &path[end..];
    let next = rest.find(|c| c != '/').unwrap_or(rest.len());
    Some((elem, &rest[next..]))
}

fn start_inode<D: crate::Device>(
    core: &Arc<FsCore<D>>,
    cwd: Option<&Dir<D>>,
    path: &str,
) -> Inode<D> {
    match cwd {
        Some(dir) if !path.starts_with('/') => dir.inode().clone(),
        _ => Inode::open(core, ROOT_DIR_SECTOR),
    }
}

/// One traversal step: look `name` up in the directory behind `inode` and
/// open the child. The parent handle closes when this returns.
fn step<D: crate::Device>(
    core: &Arc<FsCore<D>>,
    inode: Inode<D>,
    name: &str,
) -> Result<Inode<D>, Error> {
    if name.len() > NAME_MAX {
        return Err(Error::InvalidName);
    }
    if inode.is_removed() {
        return Err(Error::Removed);
    }
    let dir = Dir::open(inode)?;
    let sector = dir.lookup(name).ok_or(Error::NotFound)?;
    Ok(Inode::open(core, sector))
}

/// Final mode: resolves the whole of `path` and returns the last
/// component's inode. `""` fails; `"/"` resolves to the root.
pub(crate) fn resolve<D: crate::Device>(
    core: &Arc<FsCore<D>>,
    cwd: Option<&Dir<D>>,
    path: &str,
) -> Result<Inode<D>, Error> {
    if path.is_empty() {
        return Err(Error::NotFound);
    }
    let mut inode = start_inode(core, cwd, path);
    let mut rest = path;
    while let Some((name, tail)) = split_component(rest) {
        rest = tail;
        inode = step(core, inode, name)?;
    }
    Ok(inode)
}

/// Parent mode: stops one level early, returning the parent directory
/// handle and the extracted last component.
pub(crate) fn resolve_parent<D: crate::Device>(
    core: &Arc<FsCore<D>>,
    cwd: Option<&Dir<D>>,
    path: &str,
) -> Result<(Dir<D>, ArrayString<NAME_MAX>), Error> {
    let mut inode = start_inode(core, cwd, path);
    let mut rest = path;
    loop {
        let Some((name, tail)) = split_component(rest) else {
            // No final component to hand back ("", "/", "///").
            return Err(Error::NotFound);
        };
        rest = tail;
        if rest.is_empty() {
            if name.len() > NAME_MAX {
                return Err(Error::InvalidName);
            }
            if inode.is_removed() {
                return Err(Error::Removed);
            }
            let dir = Dir::open(inode)?;
            let name = ArrayString::from(name).map_err(|_| Error::InvalidName)?;
            return Ok((dir, name));
        }
        inode = step(core, inode, name)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_splitting() {
        assert_eq!(split_component("a/bb/c"), Some(("a", "bb/c")));
        assert_eq!(split_component("///a//bb"), Some(("a", "bb")));
        assert_eq!(split_component("a"), Some(("a", "")));
        assert_eq!(split_component("a/"), Some(("a", "")));
        assert_eq!(split_component(""), None);
        assert_eq!(split_component("///"), None);
    }
}
