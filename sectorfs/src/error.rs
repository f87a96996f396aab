/// File system operation failures.
///
/// Short transfers are not errors: end of file, denied writes, and
/// out-of-space truncation all surface as byte counts from the read/write
/// paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,
    #[error("name is empty or too long")]
    InvalidName,
    #[error("name already exists")]
    AlreadyExists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotADirectory,
    #[error("file or directory removed")]
    Removed,
    #[error("out of disk space")]
    NoSpace,
}
