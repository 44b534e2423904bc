use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("write called after writer closed")]
    WriteAfterClose,

    #[error("record with offset {0} not found after full scan")]
    RecordNotFound(u64),

    #[error("mmap read out of bounds: len={len}, req_off={offset}, req_len={requested}")]
    OutOfBounds {
        len: usize,
        offset: usize,
        requested: usize,
    },

    #[error("mmap store is empty or closed")]
    EmptyStore,

    #[error("cannot append to a segment opened read-only")]
    ReadOnly,

    #[error("base offset {0} does not fit the 15-digit segment name format")]
    SegmentNameOverflow(u64),

    #[error("multiple errors: {0:?}")]
    Multiple(Vec<Error>),
}

impl Error {
    /// Combine the errors of independently attempted phases (e.g. the
    /// writer/index/file legs of a close) into a single result.
    pub fn join(errors: Vec<Error>) -> Result<()> {
        let mut errors = errors;
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
