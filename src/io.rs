use std::{
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    result::{Error, Result},
    types::Artifact,
};

/// Find a path in `out_dir` for `filename` that is not taken yet
pub fn find_unused_path(out_dir: &Path, filename: &str) -> Result<PathBuf> {
    let mut output = out_dir.to_path_buf();

    let name = Path::new(filename);
    let stem = name
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    let dot_ext = name
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();

    // Check filenames one by one until one does not exist

    // Format for 1st file: <stem><ext>
    output.push(format!("{stem}{dot_ext}"));
    if !output.exists() {
        return Ok(output);
    }

    // Format for 2nd file and up: <stem> (<count>)<ext>
    for n in 2u16.. {
        output.set_file_name(format!("{stem} ({n}){dot_ext}"));
        if !output.exists() {
            return Ok(output);
        }
    }

    Err(Error::Io(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("too many files named {filename}"),
    )))
}

/// Write the artifact in `out_dir` under its display filename and return the final path.
///
/// The content goes to a temporary file first, so a crash never leaves a truncated output.
pub fn save_artifact(out_dir: &Path, artifact: &Artifact) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;

    let mut file = tempfile::Builder::new()
        .prefix(".wavefetch-")
        .tempfile_in(out_dir)?;
    file.write_all(&artifact.bytes)?;
    file.as_file().sync_all()?;

    let path = find_unused_path(out_dir, &artifact.filename)?;
    file.persist_noclobber(&path).map_err(|err| Error::Io(err.error))?;
    Ok(path)
}
