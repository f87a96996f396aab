//! File handles: a positional view over an open inode.

use crate::inode::Inode;

/// An open file. Each handle carries its own position; handles on the same
/// inode share content and length.
pub struct File<D: crate::Device> {
    inode: Inode<D>,
    pos: usize,
    deny_write: bool,
}

impl<D: crate::Device> File<D> {
    pub(crate) fn new(inode: Inode<D>) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    /// A fresh handle on the same inode, positioned at 0.
    pub fn reopen(&self) -> Self {
        Self::new(self.inode.clone())
    }

    pub fn inode(&self) -> &Inode<D> {
        &self.inode
    }

    /// Reads at the current position, advancing it by the returned count.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.inode.read_at(buf, self.pos);
        self.pos += n;
        n
    }

    /// Writes at the current position, advancing it by the returned count.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.inode.write_at(buf, self.pos);
        self.pos += n;
        n
    }

    /// Positional read; does not move the handle's position.
    pub fn read_at(&self, buf: &mut [u8], offset: usize) -> usize {
        self.inode.read_at(buf, offset)
    }

    /// Positional write; does not move the handle's position.
    pub fn write_at(&self, buf: &[u8], offset: usize) -> usize {
        self.inode.write_at(buf, offset)
    }

    /// Moves the position. Seeking past end of file is allowed; a later
    /// write there grows the file.
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.inode.length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks writes to the underlying inode through any handle. At most
    /// once per handle; cleared automatically when the handle closes.
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    /// Undoes this handle's [`File::deny_write`].
    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }
}

impl<D: crate::Device> Drop for File<D> {
    fn drop(&mut self) {
        if self.deny_write {
            self.inode.allow_write();
        }
    }
}
